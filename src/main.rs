//! Stubwire - CLI Entry Point

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use stubwire::{MockServer, PortSetting, ServerConfig};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(
    name = "stubwire",
    about = "HTTP stub server - request matching and canned responses for tests",
    version
)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "stubwire.yaml")]
    config: PathBuf,

    /// Port to listen on, or "dynamic" for an OS-assigned port
    #[arg(short, long, value_name = "PORT")]
    port: Option<String>,

    /// Address to bind to
    #[arg(short, long, value_name = "ADDR")]
    bind: Option<String>,

    /// Directory that file-backed response bodies are read from
    #[arg(long, value_name = "DIR")]
    root_dir: Option<PathBuf>,

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

fn parse_port(raw: &str) -> Result<PortSetting> {
    if raw.eq_ignore_ascii_case("dynamic") {
        return Ok(PortSetting::Dynamic);
    }
    raw.parse::<u16>()
        .map(PortSetting::Fixed)
        .map_err(|_| anyhow::anyhow!("Invalid port `{}`: expected a number or \"dynamic\"", raw))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if args.print_config {
        let default_config = include_str!("../config/default-config.yaml");
        println!("{}", default_config);
        return Ok(());
    }

    let mut config = if args.config.exists() {
        info!(path = ?args.config, "Loading configuration");
        ServerConfig::from_file(&args.config)?
    } else if args.validate {
        anyhow::bail!("Configuration file not found: {:?}", args.config);
    } else {
        info!("Using default configuration (no stubs)");
        ServerConfig::default()
    };

    // Command-line flags override the file.
    if let Some(port) = &args.port {
        config.port = parse_port(port)?;
    }
    if let Some(bind) = args.bind {
        config.bind_address = bind;
    }
    if let Some(root) = args.root_dir {
        config.stub_files_root = root;
    }

    if args.validate {
        config.validate()?;
        println!(
            "Configuration is valid ({} stubs defined)",
            config.stubs.len()
        );
        return Ok(());
    }

    let server = MockServer::start(config).await?;
    info!(url = %server.base_url(), "Serving stubs, press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    server.stop().await;

    Ok(())
}
