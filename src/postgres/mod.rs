// ABOUTME: PostgreSQL access for the exporter
// ABOUTME: Connection lifecycle plus the TableSource used by exports

pub mod connection;
pub mod source;

pub use connection::connect;
pub use source::{PgConnector, PgSource};
