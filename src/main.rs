//! `bakery` - interactive client for the Brane compile and execution services
//!
//! Submits cells to the kernel and renders what it reports: directive
//! output, compile diagnostics and invocation status as it changes.

use anyhow::{Context, Result};
use bakery_core::{CompletionStatus, Kernel, KernelConfig};
use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::cli::{CellBuffer, Cli, Commands};
use crate::surface::TerminalSurface;

mod cli;
mod surface;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let mut config = KernelConfig::resolve(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(strategy) = cli.strategy {
        config.strategy = strategy;
        config.validate().context("Invalid strategy")?;
    }

    match cli.command {
        Commands::Config => {
            print!("{}", config.to_toml_string()?);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Run { file } => {
            let code = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let (kernel, surface) = start_kernel(&config, cli.json)?;

            let completion = kernel.submit(&code).await;
            surface.completion(&completion);

            Ok(match completion.status {
                CompletionStatus::Ok => ExitCode::SUCCESS,
                CompletionStatus::Aborted | CompletionStatus::Error => ExitCode::FAILURE,
            })
        }
        Commands::Repl => {
            let (kernel, surface) = start_kernel(&config, cli.json)?;
            repl(&kernel, &surface).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("bakery=debug,bakery_core=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false).without_time())
        .with(filter)
        .init();
}

/// Exit status after an interrupt outside any submission.
const EXIT_INTERRUPTED: i32 = 130;

/// Build the kernel and route Ctrl-C to it: a running cell is interrupted,
/// otherwise the process exits.
fn start_kernel(config: &KernelConfig, json: bool) -> Result<(Arc<Kernel>, Arc<TerminalSurface>)> {
    let surface = Arc::new(TerminalSurface::new(json));
    let kernel = Arc::new(Kernel::new(config, surface.clone()).context("Failed to start kernel")?);
    tracing::debug!(strategy = kernel.strategy_name(), "kernel ready");

    let interrupt = kernel.clone();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if interrupt.is_busy() {
                interrupt.interrupt();
            } else {
                std::process::exit(EXIT_INTERRUPTED);
            }
        }
    });

    Ok((kernel, surface))
}

async fn repl(kernel: &Kernel, surface: &TerminalSurface) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut buffer = CellBuffer::default();

    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        if let Some(cell) = buffer.push(&line) {
            surface.completion(&kernel.submit(&cell).await);
        }
    }
    if let Some(cell) = buffer.finish() {
        surface.completion(&kernel.submit(&cell).await);
    }

    Ok(())
}
