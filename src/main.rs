//! Stub Server - CLI Entry Point

use anyhow::{Context, Result};
use clap::Parser;
use std::net::IpAddr;
use std::path::PathBuf;
use stub_server::fixture::DEFAULT_CONFIG_YAML;
use stub_server::{StubServer, StubServerConfig};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(
    name = "stub-server",
    about = "Local HTTP stub server - request stubbing and verification for tests",
    version
)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "stub-server.yaml")]
    config: PathBuf,

    /// Port to listen on (overrides the configuration file)
    #[arg(short, long)]
    port: Option<u16>,

    /// Address to bind (overrides the configuration file)
    #[arg(short, long)]
    bind: Option<IpAddr>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'L', long, default_value = "info")]
    log_level: Level,

    /// Print default configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if args.print_config {
        println!("{DEFAULT_CONFIG_YAML}");
        return Ok(());
    }

    let mut config = if args.config.exists() {
        info!(path = ?args.config, "Loading configuration");
        StubServerConfig::from_file(&args.config)
            .with_context(|| format!("loading {}", args.config.display()))?
    } else if args.validate {
        anyhow::bail!("Configuration file not found: {}", args.config.display());
    } else {
        info!("Using default configuration (no stubs)");
        StubServerConfig::default()
    };

    if args.validate {
        println!(
            "Configuration is valid ({} stubs defined)",
            config.stubs.len()
        );
        return Ok(());
    }

    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }

    let server = StubServer::start(config).await?;
    info!(url = %server.url("/"), "Serving stubs, press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;

    info!(
        requests = server.total_requests(),
        matched = server.total_matched(),
        unmatched = server.total_unmatched(),
        "Shutting down"
    );
    server.stop().await?;

    Ok(())
}
