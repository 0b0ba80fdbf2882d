//! Orderflow - Conversational order processing server
//!
//! CLI entry point for the Orderflow server.

#![forbid(unsafe_code)]

use anyhow::Result;
use clap::Parser;

mod api;
mod cli;
mod server;
mod websocket;
mod workflow;

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    let cli = cli::Cli::parse();
    cli::run(cli).await
}
