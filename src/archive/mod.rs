// ABOUTME: Archive sinks that receive one named entry per exported table
// ABOUTME: Entry close and archive finalization are separate operations by contract

pub mod directory;
pub mod zip_stream;

pub use directory::DirectorySink;
pub use zip_stream::ZipStreamWriter;

use anyhow::Result;
use async_trait::async_trait;

/// Append-only destination for a sequence of named entries
///
/// Exactly one entry may be open at a time. `close_entry` ends the current
/// entry and leaves the sink usable for the next one; only `finish` writes
/// the trailing archive metadata. Out-of-order calls are errors.
#[async_trait]
pub trait ArchiveSink: Send {
    async fn start_entry(&mut self, name: &str) -> Result<()>;

    /// Append bytes to the open entry
    async fn write(&mut self, data: &[u8]) -> Result<()>;

    async fn close_entry(&mut self) -> Result<()>;

    /// Seal the archive. Called once, with no entry open.
    async fn finish(&mut self) -> Result<()>;

    /// Total bytes emitted to the underlying output so far
    fn bytes_written(&self) -> u64;
}
