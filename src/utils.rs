// ABOUTME: Utility functions for validation, identifier quoting and naming
// ABOUTME: Shared by the catalog queries, the export pipeline and configuration loading

use anyhow::{bail, Result};

/// Check that a database URL is a `postgres://` or `postgresql://` URL
/// naming a database
///
/// User and password may be left out of the URL; `[database] user` and
/// `password` fill them in at connect time. Error messages never echo the
/// password.
///
/// ```
/// # use schema_zip_exporter::utils::validate_connection_string;
/// assert!(validate_connection_string("postgres://warehouse.internal/analytics").is_ok());
/// assert!(validate_connection_string("postgresql://warehouse.internal").is_err());
/// ```
pub fn validate_connection_string(url: &str) -> Result<()> {
    if url.trim().is_empty() {
        bail!("Connection string cannot be empty");
    }

    if !url.starts_with("postgres://") && !url.starts_with("postgresql://") {
        bail!(
            "Invalid connection string format.\n\
             Expected format: postgresql://[user[:password]@]host[:port]/database\n\
             Got: {}",
            redact_password(url)
        );
    }

    let without_query = url.split('?').next().unwrap_or(url);
    let database = without_query
        .splitn(4, '/')
        .nth(3)
        .map(str::trim)
        .unwrap_or_default();
    if database.is_empty() {
        bail!(
            "Connection string missing database name.\n\
             Expected format: postgresql://[user[:password]@]host[:port]/database"
        );
    }

    Ok(())
}

/// Replace the password component of a connection URL for logging
///
/// ```
/// # use schema_zip_exporter::utils::redact_password;
/// assert_eq!(
///     redact_password("postgresql://bob:hunter2@db:5432/app"),
///     "postgresql://bob:***@db:5432/app"
/// );
/// assert_eq!(redact_password("postgresql://db/app"), "postgresql://db/app");
/// ```
pub fn redact_password(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    let Some((auth, host)) = rest.split_once('@') else {
        return url.to_string();
    };
    match auth.split_once(':') {
        Some((user, _)) => format!("{}://{}:***@{}", scheme, user, host),
        None => url.to_string(),
    }
}

/// Quote a PostgreSQL identifier for direct interpolation into SQL
///
/// Wraps the identifier in double quotes and doubles any embedded quote, so
/// mixed-case names and names with spaces or punctuation keep their exact
/// spelling and cannot terminate the identifier early.
///
/// ```
/// # use schema_zip_exporter::utils::quote_ident;
/// assert_eq!(quote_ident("orders"), "\"orders\"");
/// assert_eq!(quote_ident("Weird\"Name"), "\"Weird\"\"Name\"");
/// ```
pub fn quote_ident(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

/// Sanitize an identifier (table name, schema name, etc.) for display
///
/// Removes control characters and limits length to prevent log injection attacks
/// and ensure readable error messages.
///
/// **Note**: This is for display purposes only. For SQL safety, use
/// [`quote_ident`] or bind parameters instead.
///
/// ```
/// # use schema_zip_exporter::utils::sanitize_identifier;
/// assert_eq!(sanitize_identifier("normal_table"), "normal_table");
/// assert_eq!(sanitize_identifier("table\x00name"), "tablename");
/// assert_eq!(sanitize_identifier("table\nname"), "tablename");
/// ```
pub fn sanitize_identifier(identifier: &str) -> String {
    identifier
        .chars()
        .filter(|c| !c.is_control())
        .take(100)
        .collect()
}

/// Build the archive entry name for a table
///
/// The entry is `<table>.csv`. Path separators and control characters are
/// replaced with `_` so that an entry can never escape the archive root when
/// extracted. An empty table name becomes `_`.
///
/// ```
/// # use schema_zip_exporter::utils::entry_name_for_table;
/// assert_eq!(entry_name_for_table("orders"), "orders.csv");
/// assert_eq!(entry_name_for_table("../etc/passwd"), ".._etc_passwd.csv");
/// assert_eq!(entry_name_for_table("Sales Q1"), "Sales Q1.csv");
/// ```
pub fn entry_name_for_table(table: &str) -> String {
    let mut stem: String = table
        .chars()
        .map(|c| {
            if c == '/' || c == '\\' || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect();

    if stem.is_empty() {
        stem.push('_');
    }

    format!("{}.csv", stem)
}
