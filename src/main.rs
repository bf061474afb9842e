//! jmap-mcp-rs: multi-account JMAP mail over MCP
//!
//! Connects to one JMAP server with one or more credentials, classifies what
//! each account may do, and exposes mail tools over the Model Context
//! Protocol (stdio or streamable HTTP) and a compact command line.
//!
//! # Architecture
//!
//! - [`main`]: Process entry point with env loading and command dispatch
//! - [`cli`]: `clap` command surface and MCP transports
//! - [`config`]: Environment-driven configuration and credential parsing
//! - [`errors`]: Application error model with MCP error mapping
//! - [`transport`]: Per-session HTTP transport abstraction
//! - [`auth`]: Bearer-to-Basic rewriting and session descriptor URL repair
//! - [`jmap`]: Session descriptor model and method-call client
//! - [`capabilities`]: Capability classification for one account
//! - [`session`]: Per-account session initialization
//! - [`registry`]: Named, ordered account registry
//! - [`mail`]: Typed JMAP mail operations
//! - [`server`]: MCP tool handlers with validation
//! - [`models`]: Input/output DTOs and schema-bearing types

mod auth;
mod capabilities;
mod cli;
mod config;
mod errors;
mod jmap;
mod mail;
mod models;
mod registry;
mod server;
mod session;
mod transport;

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use cli::{Cli, Command, ServeArgs};
use config::ServerConfig;
use errors::AppResult;
use registry::AccountRegistry;
use server::JmapMcpServer;
use tracing_subscriber::EnvFilter;

/// Application entry point
///
/// Initializes tracing to stderr, loads config, opens every account session
/// and dispatches the requested command. Any account failing to open aborts
/// startup.
///
/// # Environment Variables
///
/// See [`ServerConfig::load_from_env`] for full configuration options.
///
/// # Example
///
/// ```no_run
/// JMAP_SESSION_URL=https://api.fastmail.com/jmap/session \
/// JMAP_BEARER_TOKEN=fmu1-... \
/// cargo run -- search --unread
/// ```
#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> AppResult<()> {
    let config = ServerConfig::load_from_env()?;
    let registry = AccountRegistry::connect(&config).await?;
    let server = JmapMcpServer::new(Arc::new(registry), config.body_max_chars);
    let command = cli.command.unwrap_or(Command::Serve(ServeArgs::default()));
    cli::run(server, cli.account, command).await
}
