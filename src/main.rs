mod comms;
mod config;
mod security;
mod telemetry;
mod utils;

// Crate version exposed for runtime queries
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;

use config::SecurityConfig;

#[derive(Parser)]
#[command(name = "sentinel", version, about = "Agent security & telemetry core")]
struct AppCli {
    /// Identity of this agent process
    #[arg(long, default_value = "sentinel-agent", global = true)]
    agent_id: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the local security API
    Serve {
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
    /// Print the effective security configuration (secret redacted)
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    utils::logging::init();

    let args = AppCli::parse();
    let config = SecurityConfig::from_env();

    match args.command {
        Some(Commands::Config) => {
            let mut shown = config.clone();
            shown.jwt_secret = "<redacted>".to_string();
            println!("{}", serde_json::to_string_pretty(&shown)?);
        }
        Some(Commands::Serve { port }) => {
            info!(agent_id = %args.agent_id, port, "starting security API");
            comms::local_api::serve(config, &args.agent_id, port).await?;
        }
        None => {
            // Default: serve on the standard port
            info!(agent_id = %args.agent_id, "starting security API on port 8080");
            comms::local_api::serve(config, &args.agent_id, 8080).await?;
        }
    }

    Ok(())
}
