// ABOUTME: Streaming zip writer for non-seekable outputs such as HTTP response bodies
// ABOUTME: Adapts async_zip's stream entries to ArchiveSink through a dedicated writer task

use super::ArchiveSink;
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use async_zip::base::write::ZipFileWriter;
use async_zip::{Compression, ZipDateTime, ZipEntryBuilder};
use chrono::Utc;
use futures::io::AsyncWriteExt as _;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

const UNIX_FILE_MODE: u16 = 0o644;

type Reply = oneshot::Sender<Result<()>>;

enum Command {
    StartEntry(String, Reply),
    Write(Vec<u8>, Reply),
    CloseEntry(Reply),
    Finish(Reply),
}

impl Command {
    fn reject(self) {
        let reply = match self {
            Command::StartEntry(_, reply)
            | Command::Write(_, reply)
            | Command::CloseEntry(reply)
            | Command::Finish(reply) => reply,
        };
        let _ = reply.send(Err(anyhow!("Zip writer received a command out of order")));
    }
}

/// Counts bytes accepted by the output so `bytes_written` needs no round trip
struct CountingWriter<W> {
    inner: W,
    written: Arc<AtomicU64>,
}

impl<W: AsyncWrite + Unpin> AsyncWrite for CountingWriter<W> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_write(cx, buf);
        if let Poll::Ready(Ok(n)) = &poll {
            this.written.fetch_add(*n as u64, Ordering::Relaxed);
        }
        poll
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

/// Zip archive writer over any `AsyncWrite`
///
/// Entries are deflated as they arrive and never require seeking: sizes
/// and CRC trail each entry in a data descriptor, and Zip64 records are
/// added once the archive outgrows the classic limits (65535 entries or
/// 4 GiB). The central directory is written by [`ArchiveSink::finish`],
/// which flushes the output but never shuts it down; take it back with
/// [`ZipStreamWriter::into_inner`].
///
/// An open entry borrows the underlying zip writer, so the archive lives
/// in its own task and each sink call is one request to it. Dropping the
/// writer before `finish` drops the output with the archive unsealed.
/// Must be created inside a Tokio runtime.
pub struct ZipStreamWriter<W> {
    commands: mpsc::Sender<Command>,
    task: JoinHandle<Option<W>>,
    written: Arc<AtomicU64>,
    current: Option<String>,
    entries: usize,
    finished: bool,
}

impl<W> ZipStreamWriter<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(inner: W) -> Self {
        let written = Arc::new(AtomicU64::new(0));
        let output = CountingWriter {
            inner,
            written: Arc::clone(&written),
        };
        let (commands, receiver) = mpsc::channel(1);
        let task = tokio::spawn(drive(output, receiver));
        Self {
            commands,
            task,
            written,
            current: None,
            entries: 0,
            finished: false,
        }
    }

    /// Number of entries closed so far
    pub fn entry_count(&self) -> usize {
        self.entries
    }

    /// Hand back the underlying output of a finished archive
    pub async fn into_inner(self) -> Result<W> {
        if !self.finished {
            bail!("Zip archive must be finished before its output is taken back");
        }
        drop(self.commands);
        self.task
            .await
            .context("Zip writer task failed")?
            .context("Zip writer stopped without returning its output")
    }

    fn ensure_open(&self) -> Result<()> {
        if self.finished {
            bail!("Zip archive has already been finished");
        }
        Ok(())
    }

    async fn request(&self, command: impl FnOnce(Reply) -> Command) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| anyhow!("Zip writer has stopped after an earlier error"))?;
        response
            .await
            .map_err(|_| anyhow!("Zip writer has stopped after an earlier error"))?
    }
}

#[async_trait]
impl<W> ArchiveSink for ZipStreamWriter<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    async fn start_entry(&mut self, name: &str) -> Result<()> {
        self.ensure_open()?;
        if let Some(open) = &self.current {
            bail!(
                "Cannot start zip entry '{}' while entry '{}' is still open",
                name,
                open
            );
        }
        if name.len() > u16::MAX as usize {
            bail!("Zip entry name is too long ({} bytes)", name.len());
        }

        self.request(|reply| Command::StartEntry(name.to_string(), reply))
            .await?;
        self.current = Some(name.to_string());
        Ok(())
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        self.ensure_open()?;
        if self.current.is_none() {
            bail!("Cannot write zip data: no entry is open");
        }
        if data.is_empty() {
            return Ok(());
        }
        self.request(|reply| Command::Write(data.to_vec(), reply)).await
    }

    async fn close_entry(&mut self) -> Result<()> {
        self.ensure_open()?;
        if self.current.is_none() {
            bail!("Cannot close zip entry: no entry is open");
        }
        self.request(Command::CloseEntry).await?;
        self.current = None;
        self.entries += 1;
        Ok(())
    }

    async fn finish(&mut self) -> Result<()> {
        self.ensure_open()?;
        if let Some(open) = &self.current {
            bail!(
                "Cannot finish zip archive while entry '{}' is still open",
                open
            );
        }

        self.request(Command::Finish).await?;
        self.finished = true;
        tracing::debug!(
            "Zip archive finished: {} entries, {} bytes",
            self.entries,
            self.bytes_written()
        );
        Ok(())
    }

    fn bytes_written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }
}

/// Owns the archive until `Finish`; any failure ends the task
///
/// Returns the output only once the archive has been sealed.
async fn drive<W>(output: CountingWriter<W>, mut commands: mpsc::Receiver<Command>) -> Option<W>
where
    W: AsyncWrite + Unpin + Send,
{
    let mut zip = ZipFileWriter::with_tokio(output);

    while let Some(command) = commands.recv().await {
        match command {
            Command::StartEntry(name, reply) => {
                let entry = ZipEntryBuilder::new(name.clone().into(), Compression::Deflate)
                    .last_modification_date(ZipDateTime::from_chrono(&Utc::now()))
                    .unix_permissions(UNIX_FILE_MODE);
                let mut entry_writer = match zip.write_entry_stream(entry).await {
                    Ok(entry_writer) => entry_writer,
                    Err(e) => {
                        let err = anyhow::Error::new(e)
                            .context(format!("Failed to write zip header for '{}'", name));
                        let _ = reply.send(Err(err));
                        return None;
                    }
                };
                let _ = reply.send(Ok(()));

                loop {
                    match commands.recv().await {
                        Some(Command::Write(data, reply)) => {
                            if let Err(e) = entry_writer.write_all(&data).await {
                                let err = anyhow::Error::new(e)
                                    .context(format!("Failed to write zip data for '{}'", name));
                                let _ = reply.send(Err(err));
                                return None;
                            }
                            let _ = reply.send(Ok(()));
                        }
                        Some(Command::CloseEntry(reply)) => {
                            if let Err(e) = entry_writer.close().await {
                                let err = anyhow::Error::new(e)
                                    .context(format!("Failed to write zip data for '{}'", name));
                                let _ = reply.send(Err(err));
                                return None;
                            }
                            let _ = reply.send(Ok(()));
                            break;
                        }
                        Some(other) => other.reject(),
                        None => return None,
                    }
                }
            }
            Command::Finish(reply) => {
                return match seal(zip).await {
                    Ok(inner) => {
                        let _ = reply.send(Ok(()));
                        Some(inner)
                    }
                    Err(e) => {
                        let _ = reply.send(Err(e));
                        None
                    }
                };
            }
            other => other.reject(),
        }
    }
    None
}

async fn seal<W>(zip: ZipFileWriter<tokio_util::compat::Compat<CountingWriter<W>>>) -> Result<W>
where
    W: AsyncWrite + Unpin + Send,
{
    let mut output = zip
        .close()
        .await
        .context("Failed to write zip central directory")?
        .into_inner();
    // Flush, never shutdown: the caller decides when the output ends.
    output.flush().await.context("Failed to flush zip output")?;
    Ok(output.inner)
}
