mod server;

use anyhow::Result;
use clap::Parser;
use std::path::Path;
use tracing::info;

use tandem_core::{logging, Config};

use server::TandemServer;

/// Tandem signaling server
#[derive(Parser, Debug)]
#[command(name = "tandem", version, about)]
struct Args {
    /// Configuration file (YAML, TOML or JSON)
    #[arg(short, long, env = "TANDEM_CONFIG_PATH")]
    config: Option<String>,

    /// Override the listen host
    #[arg(long)]
    host: Option<String>,

    /// Override the HTTP port
    #[arg(short, long)]
    port: Option<u16>,
}

/// Resolve the configuration file: explicit path, then ./config.yaml, then /config/config.yaml
fn load_config(explicit: Option<&str>) -> Result<Config> {
    let config_path = explicit
        .map(str::to_string)
        .or_else(|| {
            ["config.yaml", "/config/config.yaml"]
                .into_iter()
                .find(|p| Path::new(p).exists())
                .map(str::to_string)
        });

    let config = if let Some(path) = config_path {
        if !Path::new(&path).exists() {
            anyhow::bail!("Config file {path} does not exist");
        }
        eprintln!("Loading config from {path}");
        Config::from_file(&path)?
    } else {
        eprintln!("No config file found, using environment variables");
        Config::from_env()?
    };

    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 1. Load configuration
    let mut config = load_config(args.config.as_deref())?;
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.http_port = port;
    }

    // 2. Validate configuration (fail fast on misconfigurations)
    if let Err(errors) = config.validate() {
        for e in &errors {
            eprintln!("Config validation error: {e}");
        }
        anyhow::bail!(
            "Configuration validation failed with {} error(s)",
            errors.len()
        );
    }

    // 3. Initialize logging
    logging::init_logging(&config.logging)?;
    info!("Tandem signaling server starting...");
    info!(
        http_address = %config.http_address(),
        session_capacity = config.session.capacity,
        "Configuration loaded"
    );

    // 4. Run until shutdown
    TandemServer::new(config).start().await
}
