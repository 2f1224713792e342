// ABOUTME: CLI entry point for schema-zip-exporter
// ABOUTME: Parses commands, loads configuration and routes to handlers

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use schema_zip_exporter::commands::{self, ExportTarget};
use schema_zip_exporter::config::AppConfig;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "schema-zip-exporter")]
#[command(about = "Export every table of a PostgreSQL schema as a zip of CSV files", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, env = "EXPORTER_CONFIG", default_value = "exporter.toml", global = true)]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP service (export download and upload URL endpoints)
    Serve {
        /// Listen address, overrides [server] listen
        #[arg(long)]
        listen: Option<String>,
    },
    /// Export a schema to a local zip file or directory
    Export {
        /// Write a single .zip archive here
        #[arg(long, conflicts_with = "output_dir")]
        output: Option<PathBuf>,
        /// Write one .csv file per table into this directory instead
        #[arg(long)]
        output_dir: Option<PathBuf>,
        /// Schema to export, overrides [database] schema
        #[arg(long)]
        schema: Option<String>,
    },
    /// Issue a presigned upload URL and print it
    UploadUrl {
        #[arg(long)]
        filename: String,
        #[arg(long)]
        content_type: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging - default to INFO level if RUST_LOG not set
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = AppConfig::load(&cli.config)?;

    match cli.command {
        Commands::Serve { listen } => {
            if let Some(listen) = listen {
                config.server.listen = listen;
            }
            commands::serve(&config).await
        }
        Commands::Export {
            output,
            output_dir,
            schema,
        } => {
            let target = match (output, output_dir) {
                (Some(path), None) => ExportTarget::ZipFile(path),
                (None, Some(path)) => ExportTarget::Directory(path),
                (None, None) => bail!("Either --output or --output-dir is required"),
                (Some(_), Some(_)) => bail!("--output and --output-dir cannot be combined"),
            };
            let schema = schema.unwrap_or_else(|| config.database.schema.clone());
            commands::export(&config.database, &schema, target).await
        }
        Commands::UploadUrl {
            filename,
            content_type,
        } => commands::upload_url(&config.storage, &filename, &content_type).await,
    }
}
