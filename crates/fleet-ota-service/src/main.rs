//! Fleet OTA service daemon (ota-serviced)

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use fleet_ota_service::{OtaDaemon, ServiceConfig, init_logging, shutdown_signal};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "ota-serviced")]
#[command(about = "Firmware release and rollout service for device fleets")]
#[command(version)]
struct Cli {
    /// Configuration file, created with defaults when missing
    #[arg(short, long, env = "FLEET_OTA_CONFIG", default_value = "ota-service.json")]
    config: PathBuf,

    /// Override the listen address from the config file
    #[arg(long)]
    bind: Option<String>,

    /// Load and validate the configuration, then exit
    #[arg(long)]
    check_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = ServiceConfig::load_from_path(&cli.config).await?;
    config.apply_env_overrides();
    if let Some(bind) = cli.bind {
        config.server.bind_address = bind;
    }
    config.validate()?;

    if cli.check_config {
        println!("Configuration OK: {}", cli.config.display());
        return Ok(());
    }

    init_logging(&config.observability)?;
    info!("Starting Fleet OTA service v{}", env!("CARGO_PKG_VERSION"));

    OtaDaemon::new(config).run(shutdown_signal()).await
}
