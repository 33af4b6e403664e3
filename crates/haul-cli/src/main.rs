//! haul - parallel multipart uploads to S3
//!
//! Uploads a file (or a fresh `pg_dump` of a database) as an S3 multipart
//! upload with per-part checksums.

use clap::{Parser, Subcommand, ValueEnum};
use haul_core::UploadConfig;
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;

use commands::{backup::BackupArgs, upload::UploadArgs, OutputFormat};

#[derive(Parser)]
#[command(name = "haul")]
#[command(author = "Haul Team")]
#[command(version = haul_core::VERSION)]
#[command(about = "Parallel, checksummed multipart uploads to S3", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (TOML)
    #[arg(short, long, global = true, env = "HAUL_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "HAUL_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Summary output format
    #[arg(short, long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    output: OutputFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a file
    Upload(UploadArgs),

    /// Dump a PostgreSQL database and upload the dump
    Backup(BackupArgs),
}

fn init_logging(level: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let json = (format == LogFormat::Json).then(|| {
        fmt::layer()
            .json()
            .with_writer(std::io::stderr)
    });
    let text = (format == LogFormat::Text).then(|| {
        fmt::layer()
            .with_target(true)
            .with_writer(std::io::stderr)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(json)
        .with(text)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_logging(&cli.log_level, cli.log_format);

    // File, then environment, then flags
    let config = UploadConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Upload(args) => commands::upload::run(args, config, cli.output).await,
        Commands::Backup(args) => commands::backup::run(args, config, cli.output).await,
    }
}
