use anyhow::{Context, Result};
use clap::{ArgAction, Args};
use mqtt3::broker::{AuthConfig, BrokerConfig, MqttBroker};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::signal;
use tracing::{debug, info};

#[derive(Args)]
pub struct BrokerCommand {
    /// Configuration file path (JSON format)
    #[arg(long, short)]
    pub config: Option<PathBuf>,

    /// TCP bind address (e.g., `0.0.0.0:1883` `[::]:1883`) - can be specified multiple times
    #[arg(long, short = 'H', action = ArgAction::Append)]
    pub host: Vec<String>,

    /// Maximum number of concurrent clients
    #[arg(long, default_value = "10000")]
    pub max_clients: usize,

    /// Seconds a connection may stay silent before it is closed
    #[arg(long, default_value = "60")]
    pub idle_timeout: u64,

    /// Refuse clients that connect without a username
    #[arg(long)]
    pub auth: bool,

    /// User credential as `username:password` - can be specified multiple times
    #[arg(long, short = 'u', action = ArgAction::Append, value_parser = parse_user)]
    pub user: Vec<(String, String)>,

    /// Password file path (format: username:hash per line)
    #[arg(long)]
    pub password_file: Option<PathBuf>,
}

fn parse_user(s: &str) -> Result<(String, String), String> {
    match s.split_once(':') {
        Some((username, password)) if !username.is_empty() => {
            Ok((username.to_string(), password.to_string()))
        }
        _ => Err(format!("expected username:password, got '{s}'")),
    }
}

pub async fn execute(cmd: BrokerCommand) -> Result<()> {
    info!("Starting MQTT v3.1.1 broker...");

    let config = if let Some(config_path) = &cmd.config {
        debug!("Loading configuration from: {:?}", config_path);
        load_config_from_file(config_path)
            .with_context(|| format!("Failed to load config from {config_path:?}"))?
    } else {
        config_from_args(&cmd)?
    };

    config
        .validate()
        .context("Configuration validation failed")?;

    info!(
        "Creating broker with bind addresses: {:?}",
        config.bind_addresses
    );
    let mut broker = MqttBroker::with_config(config.clone())
        .await
        .context("Failed to create MQTT broker")?;
    let shutdown = broker.shutdown_handle();

    println!("MQTT v3.1.1 broker starting...");
    println!(
        "  TCP: {}",
        config
            .bind_addresses
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!("  Max clients: {}", config.max_clients);
    if config.authentication.enabled {
        println!("  Authentication: required");
    }
    println!("  Press Ctrl+C to stop");

    let shutdown_signal = async {
        match signal::ctrl_c().await {
            Ok(()) => {
                println!("\nReceived Ctrl+C, shutting down gracefully...");
            }
            Err(err) => {
                tracing::error!("Unable to listen for shutdown signal: {}", err);
            }
        }
    };

    let mut broker_task = tokio::spawn(async move { broker.run().await });

    let interrupted = tokio::select! {
        result = &mut broker_task => {
            match result {
                Ok(Ok(())) => info!("Broker stopped normally"),
                Ok(Err(e)) => anyhow::bail!("Broker error: {e}"),
                Err(e) => anyhow::bail!("Broker task failed: {e}"),
            }
            false
        }
        () = shutdown_signal => true,
    };

    if interrupted {
        info!("Shutdown signal received, stopping broker...");
        shutdown.shutdown();
        broker_task
            .await
            .context("Broker task failed")?
            .context("Broker error during shutdown")?;
    }

    println!("MQTT broker stopped");
    Ok(())
}

fn config_from_args(cmd: &BrokerCommand) -> Result<BrokerConfig> {
    let mut config = BrokerConfig::default()
        .with_max_clients(cmd.max_clients)
        .with_idle_timeout(Duration::from_secs(cmd.idle_timeout));

    if !cmd.host.is_empty() {
        config.bind_addresses = cmd
            .host
            .iter()
            .map(|h| {
                h.parse::<SocketAddr>()
                    .with_context(|| format!("Invalid bind address: {h}"))
            })
            .collect::<Result<Vec<_>>>()?;
    }

    let mut auth = AuthConfig::new().with_enabled(cmd.auth);
    for (username, password) in &cmd.user {
        auth = auth.with_user(username.as_str(), password.as_str());
    }
    if let Some(path) = &cmd.password_file {
        auth = auth.with_password_file(path.clone());
    }

    Ok(config.with_authentication(auth))
}

fn load_config_from_file(config_path: &Path) -> Result<BrokerConfig> {
    let contents = std::fs::read_to_string(config_path).context("Failed to read config file")?;
    serde_json::from_str(&contents).context("Failed to parse config file as JSON")
}
