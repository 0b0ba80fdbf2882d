//! CLI module for Orderflow
//!
//! - `serve`: start the websocket server
//! - `config`: print the effective configuration

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::server::{self, AppConfig};

/// Orderflow order processing server
#[derive(Parser, Debug)]
#[command(name = "orderflow")]
#[command(about = "Conversational order processing over websockets")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Start the server
    Serve {
        /// Bind address, overrides `server.host`
        #[arg(long)]
        host: Option<String>,
        /// Listen port, overrides `server.port`
        #[arg(long)]
        port: Option<u16>,
    },
    /// Print the effective configuration as JSON
    Config,
}

/// Run the CLI command
pub async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Some(Commands::Serve { host, port }) => {
            let mut config = server::load_config().context("Failed to load configuration")?;
            apply_overrides(&mut config, host, port);
            config.validate()?;

            let _log_guard = server::logging::init(&config.logging)?;
            server::run(config).await
        }
        Some(Commands::Config) => {
            let config = server::load_config().context("Failed to load configuration")?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        None => {
            let mut cmd = <Cli as clap::CommandFactory>::command();
            cmd.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn apply_overrides(config: &mut AppConfig, host: Option<String>, port: Option<u16>) {
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
}
