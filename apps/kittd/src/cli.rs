// SPDX-FileCopyrightText: © 2025 KITT Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Command-line entry points, structured like
//! `apps/skit/src/cli.rs`'s `Cli`/`Commands`/`handle_command` shape.
//! `kittd` has no `--config <path>` flag: configuration resolves
//! entirely from `LIVEGPT_CONFIG_FILE`/`LIVEGPT_CONFIG_BODY`, not a CLI
//! argument, so there is nothing for a flag to override.

use std::net::SocketAddr;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use crate::config;
use crate::providers::ProviderClients;
use crate::room_unimplemented::{UnimplementedRoomClient, UnimplementedRoomDirectory};
use crate::server::{start_server, AppState};
use crate::supervisor::Supervisor;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Starts the kittd server
    Serve,
    /// Manage configuration
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Generate a default config document and print it to stdout
    Default,
}

fn log_startup_info(config: &config::Config) {
    info!(
        port = config.port,
        console_enable = config.logging.console_enable,
        file_enable = config.logging.file_enable,
        "starting kittd"
    );
}

/// Handles the "serve" command: loads config, initializes logging, wires
/// the process-wide providers and Supervisor, and serves until a
/// shutdown signal arrives. Exits the process with status 1 on any
/// startup failure (mirrors `apps/skit`'s `handle_serve_command`).
#[allow(clippy::print_stderr)]
async fn handle_serve_command() {
    let config_result = match config::load() {
        Ok(result) => result,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    let _log_guard = match crate::logging::init_logging(&config_result.config.logging) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            std::process::exit(1);
        }
    };

    if config_result.source_missing {
        warn!("configured LIVEGPT_CONFIG_FILE not found, using defaults");
    }
    log_startup_info(&config_result.config);

    let Some(openai_api_key) = config_result.config.resolved_openai_api_key() else {
        error!("no OPENAI_API_KEY configured (neither in config nor the environment)");
        std::process::exit(1);
    };

    let providers = match ProviderClients::connect(&openai_api_key) {
        Ok(providers) => Arc::new(providers),
        Err(e) => {
            error!(error = %e, "failed to initialize provider clients");
            std::process::exit(1);
        }
    };

    // The real SFU room client and room-lookup service are out of scope
    // here: a deployment supplies its own `RoomClientFactory`
    // and `RoomDirectory` wired to its actual LiveKit-shaped credentials
    // (`config_result.config.livekit`). These stand-ins make `kittd`
    // runnable end to end; every join attempt fails clearly instead of
    // silently.
    let room_factory: crate::supervisor::RoomClientFactory = Arc::new(|| Arc::new(UnimplementedRoomClient));
    let supervisor = Arc::new(Supervisor::new(providers, room_factory, kitt_core::Language::default_language()));
    let state = Arc::new(AppState { supervisor: supervisor.clone(), room_directory: Arc::new(UnimplementedRoomDirectory) });

    let addr = SocketAddr::from(([0, 0, 0, 0], config_result.config.port));
    if let Err(e) = start_server(addr, state).await {
        error!(error = %e, "server failed");
        supervisor.shutdown().await;
        std::process::exit(1);
    }
    supervisor.shutdown().await;
}

#[allow(clippy::print_stdout, clippy::print_stderr)]
fn handle_config_default_command() {
    match config::generate_default() {
        Ok(yaml) => println!("{yaml}"),
        Err(e) => {
            eprintln!("Failed to generate default config: {e}");
            std::process::exit(1);
        }
    }
}

/// Dispatches a parsed [`Cli`] to its handler.
pub async fn handle_command(cli: &Cli) {
    match cli.command.as_ref().unwrap_or(&Commands::Serve) {
        Commands::Serve => handle_serve_command().await,
        Commands::Config(ConfigCommands::Default) => handle_config_default_command(),
    }
}
