use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

use commands::broker_cmd::{self, BrokerCommand};

#[derive(Parser)]
#[command(name = "mqttv3")]
#[command(about = "MQTT 3.1 / 3.1.1 broker")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an MQTT broker
    Broker(BrokerCommand),
}

pub(crate) fn init_basic_tracing(verbose: bool, debug: bool) {
    let default_level = if debug {
        "mqtt3=trace,mqttv3_cli=debug"
    } else if verbose {
        "mqtt3=debug,mqttv3_cli=debug"
    } else {
        "mqtt3=info,mqttv3_cli=info"
    };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(debug)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_basic_tracing(cli.verbose, cli.debug);

    match cli.command {
        Commands::Broker(cmd) => broker_cmd::execute(cmd).await,
    }
}
