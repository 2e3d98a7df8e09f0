//! # Relay Gateway
//!
//! Realtime relay between browser sessions and the game and meeting
//! backends, plus the meeting signaling service.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! relay
//!
//! # Run with a config file in the working directory
//! cp relay.example.toml relay.toml && relay
//!
//! # Run with custom config
//! relay --config /path/to/relay.toml
//!
//! # Run with environment variables
//! RELAY_PORT=8080 RELAY_GAME__BACKEND_URL=ws://10.0.0.5:3000/socket relay
//! ```

mod config;
mod gateway;
mod handlers;
mod meeting_log;
mod metrics;
mod signaling;
mod wire;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Realtime relay gateway for game and meeting backends.
#[derive(Debug, Parser)]
#[command(name = "relay", version, about)]
struct Args {
    /// Config file to load instead of the default locations
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relay=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = match args.config {
        Some(path) => config::Config::from_file(path)?,
        None => config::Config::load()?,
    };

    tracing::info!("Starting relay gateway on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    handlers::run_server(config).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_args_definition() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_config_flag() {
        let args = Args::try_parse_from(["relay", "--config", "/etc/relay/custom.toml"]).unwrap();
        assert_eq!(args.config, Some(PathBuf::from("/etc/relay/custom.toml")));

        let args = Args::try_parse_from(["relay", "--config=relay.toml"]).unwrap();
        assert_eq!(args.config, Some(PathBuf::from("relay.toml")));

        let args = Args::try_parse_from(["relay", "-c", "relay.toml"]).unwrap();
        assert_eq!(args.config, Some(PathBuf::from("relay.toml")));

        let args = Args::try_parse_from(["relay"]).unwrap();
        assert!(args.config.is_none());
    }

    #[test]
    fn test_bad_arguments_are_rejected() {
        assert!(Args::try_parse_from(["relay", "--config"]).is_err());
        assert!(Args::try_parse_from(["relay", "--port", "9000"]).is_err());
    }
}
