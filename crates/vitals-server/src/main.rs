//! vitals - building sensor time-series service.

use std::io;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use serde::Serialize;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use vitals_server::cli::{parse_range, Cli, Command, LogFormat};
use vitals_server::{AppState, VitalsServer};

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "command failed");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = cli.server_config();
    let state = AppState::open(config)?;

    match cli.command {
        Command::Serve { .. } => {
            let server = VitalsServer::new(state);
            server.run(shutdown_signal()).await?;
        }
        Command::Sync { .. } => print_json(&state.sync().await?)?,
        Command::Backfill {
            start,
            end,
            chunk_minutes,
        } => {
            let range = parse_range(&start, &end)?;
            let chunk = Duration::from_secs(chunk_minutes.max(1) * 60);
            for site in &cli.sites {
                print_json(&state.backfill(site, range, chunk).await?)?;
            }
        }
        Command::Archive => print_json(&state.archive().await?)?,
        Command::Compress => print_json(&state.compress().await?)?,
        Command::Sweep => print_json(&state.sweep().await?)?,
    }
    Ok(())
}

fn print_json<T: Serialize>(report: &T) -> anyhow::Result<()> {
    serde_json::to_writer_pretty(io::stdout().lock(), report)?;
    println!();
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("received SIGINT, shutting down");
    }
}
