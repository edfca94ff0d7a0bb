//! CLI for wis2files
//!
//! Subscribes to a WIS2 notification topic and downloads every canonical link.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use wis2files::config::{Overrides, Settings, load_config};
use wis2files::utils::error::ConfigError;
use wis2files::utils::logging;

#[derive(Parser)]
#[command(name = "wis2files", version, about)]
struct Cli {
    /// MQTT server address (e.g. ssl://example.com:8883)
    #[arg(long)]
    server: Option<String>,
    /// MQTT topic to subscribe
    #[arg(long)]
    topic: Option<String>,
    /// MQTT username
    #[arg(long)]
    username: Option<String>,
    /// MQTT password
    #[arg(long)]
    password: Option<String>,
    /// Path to CA certificate file
    #[arg(long)]
    cafile: Option<PathBuf>,
    /// Path to client certificate file
    #[arg(long)]
    cert: Option<PathBuf>,
    /// Path to client key file
    #[arg(long)]
    key: Option<PathBuf>,
    /// Directory to save downloaded files [default: downloads]
    #[arg(long)]
    download: Option<PathBuf>,
    /// MQTT client ID [default: wis2-mqtt-subscriber]
    #[arg(long)]
    clientid: Option<String>,
    /// Maximum number of downloads running at once
    #[arg(long)]
    max_fetches: Option<usize>,
    /// Log level (error, warn, info, debug, trace)
    #[arg(long)]
    log_level: Option<String>,
    /// Settings file (toml, yaml or json)
    #[arg(long)]
    config: Option<PathBuf>,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            server: self.server.clone(),
            topic: self.topic.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            cafile: self.cafile.clone(),
            cert: self.cert.clone(),
            key: self.key.clone(),
            download: self.download.clone(),
            client_id: self.clientid.clone(),
            max_concurrent_fetches: self.max_fetches,
            log_level: self.log_level.clone(),
        }
    }
}

fn settings(cli: &Cli) -> Result<Settings, ConfigError> {
    let settings = load_config(cli.config.as_deref())?.with_overrides(cli.overrides());
    settings.validate()?;
    Ok(settings)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let settings = match settings(&cli) {
        Ok(settings) => settings,
        Err(e) => {
            logging::init(cli.log_level.as_deref().unwrap_or("info"));
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    logging::init(&settings.log_level);

    match wis2files::run(settings, shutdown_signal()).await {
        Ok(()) => {
            info!("exiting");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
