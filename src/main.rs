//! socksplit - SOCKS5 proxy server with first-flight payload splitting
//!
//! Loads the JSON configuration document, wires the configured policy
//! into the server core, and serves until a fatal accept-loop failure.

use anyhow::{Context, Result};
use clap::Parser;
use socksplit::config::{load_config, DEFAULT_CONFIG_FILE};
use socksplit::policy::{IpAllowList, PatternDenyList, UserTable};
use socksplit::Server;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// SOCKS5 proxy server with pluggable policy and payload splitting
#[derive(Parser, Debug)]
#[command(name = "socksplit")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration document
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Enable JSON logging format
    #[arg(long)]
    json_log: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    setup_logging(&args.log_level, args.json_log)?;

    let config = load_config(&args.config)
        .with_context(|| format!("could not load configuration from {:?}", args.config))?;

    info!("socksplit v{}", socksplit::VERSION);
    info!("configuration loaded from {:?}", args.config);

    let mut server = Server::new();
    server.no_auth_authorizer(IpAllowList::from_strings(&config.ipallow)?);
    server.userpass_authorizer(UserTable::from_entries(&config.userlist));
    server.handle_connect(PatternDenyList::from_strings(&config.pattern)?);
    server.handle_close_fn(|conn| {
        if let Some(user) = conn.data::<String>() {
            info!("goodbye {user}!");
        }
    });

    server.listen_and_serve(&config.listen_addr()).await
}

/// Setup logging based on configuration
fn setup_logging(level: &str, json: bool) -> Result<()> {
    let level = match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    if json {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .with_target(true)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    Ok(())
}
