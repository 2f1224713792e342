// ABOUTME: Command implementations for the exporter binary
// ABOUTME: Exports serve, export and upload_url commands

pub mod export;
pub mod serve;
pub mod upload_url;

pub use export::{export, ExportTarget};
pub use serve::serve;
pub use upload_url::upload_url;
