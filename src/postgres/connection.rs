// ABOUTME: PostgreSQL connection utilities for the exporter
// ABOUTME: Handles connection string parsing, credential overrides, TLS setup, and connection lifecycle

use crate::config::DatabaseConfig;
use anyhow::{Context, Result};
use native_tls::TlsConnector;
use postgres_native_tls::MakeTlsConnector;
use tokio::task::JoinHandle;
use tokio_postgres::Client;

/// Append TCP keepalive settings to a connection URL
///
/// An export holds one connection for as long as the client keeps reading,
/// and idle-looking sessions get cut by NAT gateways and load balancers.
/// Adds `keepalives=1`, `keepalives_idle=60` and `keepalives_interval=10`
/// unless the URL already sets them (case-insensitive).
///
/// ```
/// # use schema_zip_exporter::postgres::connection::add_keepalive_params;
/// assert_eq!(
///     add_keepalive_params("postgresql://db/app?sslmode=require"),
///     "postgresql://db/app?sslmode=require&keepalives=1&keepalives_idle=60&keepalives_interval=10"
/// );
/// ```
pub fn add_keepalive_params(connection_string: &str) -> String {
    const KEEPALIVES: [(&str, &str); 3] = [
        ("keepalives", "1"),
        ("keepalives_idle", "60"),
        ("keepalives_interval", "10"),
    ];

    let lower = connection_string.to_lowercase();
    let missing: Vec<String> = KEEPALIVES
        .iter()
        .filter(|(key, _)| !lower.contains(&format!("{}=", key)))
        .map(|(key, value)| format!("{}={}", key, value))
        .collect();

    if missing.is_empty() {
        return connection_string.to_string();
    }

    let separator = if connection_string.contains('?') { '&' } else { '?' };
    format!("{}{}{}", connection_string, separator, missing.join("&"))
}

/// Build the driver configuration from `[database]` settings
///
/// `user` and `password`, when set, override whatever the URL carries.
pub fn build_config(settings: &DatabaseConfig) -> Result<tokio_postgres::Config> {
    let mut config = add_keepalive_params(&settings.url)
        .parse::<tokio_postgres::Config>()
        .context(
            "Invalid connection string format. Expected: postgresql://[user[:password]@]host[:port]/database",
        )?;

    if let Some(user) = &settings.user {
        config.user(user);
    }
    if let Some(password) = &settings.password {
        config.password(password);
    }

    Ok(config)
}

/// An open connection: the client plus the task driving its socket
pub struct PgConnection {
    client: Client,
    driver: JoinHandle<()>,
}

impl PgConnection {
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Drop the client and wait for the connection task to wind down
    pub async fn close(self) -> Result<()> {
        let Self { client, driver } = self;
        drop(client);
        driver
            .await
            .context("PostgreSQL connection task panicked during shutdown")?;
        Ok(())
    }
}

/// Open one TLS-capable connection from `[database]` settings
///
/// The socket is driven by a spawned task; its handle stays with the
/// returned [`PgConnection`] so [`PgConnection::close`] can wait for it.
/// Driver errors are rewritten into a short hint about the likely cause.
pub async fn connect(settings: &DatabaseConfig) -> Result<PgConnection> {
    let config = build_config(settings)?;

    let tls_connector = TlsConnector::builder()
        .build()
        .context("Failed to build TLS connector")?;
    let tls = MakeTlsConnector::new(tls_connector);

    let (client, connection) = config
        .connect(tls)
        .await
        .map_err(|e| describe_connect_error(&e.to_string()))?;

    let driver = tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::error!("Connection error: {}", e);
        }
    });

    Ok(PgConnection { client, driver })
}

/// (needles, hint) pairs; the first entry whose needles all occur wins
const CONNECT_HINTS: &[(&[&str], &str)] = &[
    (
        &["password authentication failed"],
        "Authentication failed: check [database] user and password",
    ),
    (
        &["database", "does not exist"],
        "Database does not exist: check the database name in the URL",
    ),
    (
        &["no pg_hba.conf entry"],
        "Access denied: the server's pg_hba.conf does not allow this host",
    ),
    (
        &["Connection refused"],
        "Connection refused: is the server running and reachable on that host and port?",
    ),
    (
        &["could not connect"],
        "Connection refused: is the server running and reachable on that host and port?",
    ),
    (
        &["timed out"],
        "Connection timeout: the server did not answer in time",
    ),
    (
        &["timeout"],
        "Connection timeout: the server did not answer in time",
    ),
    (&["SSL"], "TLS error: secure connection could not be established"),
    (&["TLS"], "TLS error: secure connection could not be established"),
];

fn describe_connect_error(error_msg: &str) -> anyhow::Error {
    let hint = CONNECT_HINTS
        .iter()
        .find(|(needles, _)| needles.iter().all(|n| error_msg.contains(n)))
        .map(|(_, hint)| *hint);

    match hint {
        Some(hint) => anyhow::anyhow!("{}\nError: {}", hint, error_msg),
        None => anyhow::anyhow!("Failed to connect to database: {}", error_msg),
    }
}
