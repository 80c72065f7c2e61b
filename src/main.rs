//! Wirecast server
//!
//! Run with: cargo run --bin wirecast -- --host 127.0.0.1 --port 4567
//!
//! Configuration is read from `--config`, or from the default locations,
//! then overridden by `WIRECAST_*` environment variables and finally by
//! command-line flags.

use anyhow::Context;
use clap::Parser;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};
use wirecast::{generate_default_config, Config, LoggingConfig, Server};

#[derive(Parser)]
#[command(name = "wirecast")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Single-threaded WebSocket broadcast server")]
struct Cli {
    /// Path to a TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Print a default config file and exit
    #[arg(long)]
    print_config: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.print_config {
        print!("{}", generate_default_config());
        return Ok(());
    }

    let mut config = match &cli.config {
        Some(path) => Config::load_with_env(path)
            .with_context(|| format!("Failed to load config from {:?}", path))?,
        None => Config::load_default(),
    };
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    init_logging(&config.logging)?;

    tracing::info!("Wirecast v{}", env!("CARGO_PKG_VERSION"));

    let addr = config.server.socket_addr()?;
    let mut server = Server::bind(addr, config.server.options())
        .with_context(|| format!("Cannot listen on {}", addr))?;

    server.run();
    Ok(())
}

/// Install the subscriber: console output plus an optional error-log file
fn init_logging(logging: &LoggingConfig) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("wirecast={}", logging.level).into());

    let console = if logging.format == "json" {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };

    let file = match &logging.file {
        Some(path) => {
            let sink = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Cannot open log file {}", path))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(sink))
                    .with_filter(tracing_subscriber::filter::LevelFilter::ERROR),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .init();

    Ok(())
}
