//! Leadscrape command-line entry point.

mod cli;
mod commands;
mod state;

use clap::Parser;
use cli::{Cli, Command};
use state::AppState;
use tracing::info;

/// Initialize tracing subscriber for logging
fn init_tracing() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,leadscrape=debug"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    info!("Starting Leadscrape v{}", env!("CARGO_PKG_VERSION"));

    let state = AppState::new(cli.config.as_deref()).await?;
    let result = match &cli.command {
        Command::Run(args) => commands::run(&state, args).await,
        Command::Resume {
            session_id,
            pause_on_interrupt,
        } => commands::resume(&state, session_id, *pause_on_interrupt).await,
        Command::Status { session_id } => commands::status(&state, session_id.as_deref()).await,
        Command::Export { session_id, out } => {
            commands::export_by_id(&state, session_id, out.as_deref()).await
        }
        Command::Lookup { session_id } => commands::lookup(&state, session_id).await,
    };

    state.db.close().await;
    result
}
