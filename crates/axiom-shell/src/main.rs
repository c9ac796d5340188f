//! AXIOM shell
//!
//! Drives the engine orchestrator over stdin/stdout. Requests and responses
//! are JSON lines; fan-out events are interleaved as `{"event": ..}` lines.
//! Logs go to stderr.

mod commands;
mod state;

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;

use axiom_core::Config;

use crate::commands::{CommandResult, EventLine, Request};
use crate::state::ShellState;

#[derive(Parser, Debug)]
#[command(name = "axiom", version, about = "AXIOM engine orchestrator shell")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the data directory
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Increase log verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn log_filter(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }
    Ok(config)
}

/// Single writer so response and event lines never interleave mid-line.
async fn write_lines(mut lines: mpsc::UnboundedReceiver<String>) {
    let mut stdout = tokio::io::stdout();
    while let Some(line) = lines.recv().await {
        let written = async {
            stdout.write_all(line.as_bytes()).await?;
            stdout.write_all(b"\n").await?;
            stdout.flush().await
        }
        .await;
        if let Err(e) = written {
            tracing::error!(error = %e, "Failed to write to stdout");
            break;
        }
    }
}

fn send_json<T: serde::Serialize>(out: &mpsc::UnboundedSender<String>, value: &T) {
    match serde_json::to_string(value) {
        Ok(line) => {
            let _ = out.send(line);
        }
        Err(e) => tracing::error!(error = %e, "Failed to encode output line"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    axiom_core::init_logging(log_filter(cli.verbose));

    let config = load_config(&cli).context("loading configuration")?;
    tracing::info!(data_dir = %config.data_dir.display(), "Starting AXIOM shell");

    let state = Arc::new(
        ShellState::from_config(&config)
            .await
            .context("starting orchestrator")?,
    );

    let (out, lines) = mpsc::unbounded_channel::<String>();
    let writer = tokio::spawn(write_lines(lines));

    let mut events = state.orchestrator().subscribe();
    let event_out = out.clone();
    let pump = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => send_json(&event_out, &EventLine { event: &event }),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event stream lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut input = BufReader::new(tokio::io::stdin()).lines();
    let mut requests = tokio::task::JoinSet::new();

    while let Some(line) = input.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let request: Request = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(e) => {
                send_json(
                    &out,
                    &CommandResult::err(serde_json::Value::Null, format!("Malformed request: {}", e)),
                );
                continue;
            }
        };

        if commands::is_shutdown(&request) {
            // Let in-flight requests answer before the engines go away
            while requests.join_next().await.is_some() {}
            let result = commands::dispatch(&state, request).await;
            send_json(&out, &result);
            break;
        }

        let state = state.clone();
        let out = out.clone();
        requests.spawn(async move {
            let result = commands::dispatch(&state, request).await;
            send_json(&out, &result);
        });
    }

    while requests.join_next().await.is_some() {}
    if let Err(e) = state.orchestrator().shutdown().await {
        tracing::warn!(error = %e, "Shutdown failed");
    }

    pump.abort();
    drop(out);
    let _ = writer.await;

    tracing::info!("AXIOM shell stopped");
    Ok(())
}
