//! CLI argument parsing using clap 4.x derive macros

use bakery_core::StrategyKind;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Interactive client for the Brane compile and execution services
///
/// Cells are compiled remotely, executed as invocations in a registry
/// session, and their status is rendered as it changes. Lines starting with
/// `//!` are directives handled before compilation.
#[derive(Parser, Debug)]
#[command(name = "bakery")]
#[command(author, about, long_about = None)]
#[command(version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("GIT_HASH"), ")"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (defaults to ./bakery.toml, then the user config dir)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// How invocations are observed: auto, poll or stream
    #[arg(long, global = true)]
    pub strategy: Option<StrategyKind>,

    /// Print render events and completions as JSON lines
    #[arg(long, global = true)]
    pub json: bool,

    /// Debug logging on stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Submit a file as a single cell
    Run {
        /// Source file
        file: PathBuf,
    },

    /// Read cells from stdin, separated by lines containing only `%%`
    ///
    /// Ctrl-C interrupts the running cell, or exits when none is running.
    /// End of input submits the last cell and exits.
    Repl,

    /// Print the effective configuration
    Config,
}

/// Line that separates cells in `repl` input
pub const CELL_SEPARATOR: &str = "%%";

/// Splits line-oriented input into cells.
#[derive(Debug, Default)]
pub struct CellBuffer {
    lines: Vec<String>,
}

impl CellBuffer {
    /// Feed one line. Returns a finished cell when the line is a separator.
    pub fn push(&mut self, line: &str) -> Option<String> {
        if line.trim_end() == CELL_SEPARATOR {
            return Some(self.take());
        }
        self.lines.push(line.to_string());
        None
    }

    /// Whatever is left at end of input.
    pub fn finish(mut self) -> Option<String> {
        let cell = self.take();
        (!cell.trim().is_empty()).then_some(cell)
    }

    fn take(&mut self) -> String {
        std::mem::take(&mut self.lines).join("\n")
    }
}
