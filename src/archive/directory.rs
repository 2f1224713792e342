// ABOUTME: Archive sink that writes each entry as a plain file in a directory
// ABOUTME: Used by the `export --output-dir` command to produce loose CSV files

use super::ArchiveSink;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;

pub struct DirectorySink {
    root: PathBuf,
    current: Option<(PathBuf, File)>,
    written: u64,
    finished: bool,
}

impl DirectorySink {
    /// Create the directory (and parents) if needed
    pub async fn create(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)
            .await
            .with_context(|| format!("Failed to create output directory {}", root.display()))?;
        Ok(Self {
            root,
            current: None,
            written: 0,
            finished: false,
        })
    }

    fn entry_path(&self, name: &str) -> Result<PathBuf> {
        let relative = Path::new(name);
        let mut components = relative.components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Ok(self.root.join(relative)),
            _ => bail!("Entry name '{}' is not a plain file name", name),
        }
    }
}

#[async_trait]
impl ArchiveSink for DirectorySink {
    async fn start_entry(&mut self, name: &str) -> Result<()> {
        if self.finished {
            bail!("Directory export has already been finished");
        }
        if let Some((path, _)) = &self.current {
            bail!(
                "Cannot start entry '{}' while {} is still open",
                name,
                path.display()
            );
        }
        let path = self.entry_path(name)?;
        let file = File::create(&path)
            .await
            .with_context(|| format!("Failed to create {}", path.display()))?;
        self.current = Some((path, file));
        Ok(())
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        let Some((path, file)) = self.current.as_mut() else {
            bail!("Cannot write: no entry is open");
        };
        file.write_all(data)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        self.written += data.len() as u64;
        Ok(())
    }

    async fn close_entry(&mut self) -> Result<()> {
        let Some((path, mut file)) = self.current.take() else {
            bail!("Cannot close entry: no entry is open");
        };
        file.flush()
            .await
            .with_context(|| format!("Failed to flush {}", path.display()))?;
        Ok(())
    }

    async fn finish(&mut self) -> Result<()> {
        if self.finished {
            bail!("Directory export has already been finished");
        }
        if let Some((path, _)) = &self.current {
            bail!("Cannot finish while {} is still open", path.display());
        }
        self.finished = true;
        Ok(())
    }

    fn bytes_written(&self) -> u64 {
        self.written
    }
}
