use anyhow::Result;
use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use hybridload::cli::commands::{
    handle_build_index, handle_collection, handle_config, handle_ingest, handle_search,
    handle_status,
};
use hybridload::cli::{Cli, Commands};
use hybridload::models::Config;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cancel = CancellationToken::new();
    let watcher = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        eprintln!("\nReceived shutdown signal, finishing in-flight work...");
        watcher.cancel();
    });

    run_command(cli, cancel).await
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();
}

async fn run_command(cli: Cli, cancel: CancellationToken) -> Result<()> {
    let verbose = cli.verbose;

    // Config commands must work even when the current file does not validate.
    let command = match cli.command {
        Commands::Config(cmd) => {
            let format = cli.format.unwrap_or_default();
            return handle_config(cmd, cli.config.as_deref(), format, verbose).await;
        }
        command => command,
    };

    let config = Config::load(cli.config.as_deref())?;
    let format = cli.format.unwrap_or(config.search.default_format);
    let config = &config;

    match command {
        Commands::Ingest(args) => handle_ingest(args, config, format, verbose, cancel).await,
        Commands::BuildIndex(args) => {
            handle_build_index(args, config, format, verbose, cancel).await
        }
        Commands::Search(args) => {
            until_cancelled(&cancel, handle_search(args, config, format, verbose)).await
        }
        Commands::Status => until_cancelled(&cancel, handle_status(config, format, verbose)).await,
        Commands::Collection(cmd) => {
            until_cancelled(&cancel, handle_collection(cmd, config, format, verbose)).await
        }
        Commands::Config(_) => Ok(()),
    }
}

/// Drop a command that has no cancellation points of its own on shutdown.
async fn until_cancelled<F>(cancel: &CancellationToken, command: F) -> Result<()>
where
    F: Future<Output = Result<()>>,
{
    tokio::select! {
        result = command => result,
        _ = cancel.cancelled() => anyhow::bail!("interrupted"),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
