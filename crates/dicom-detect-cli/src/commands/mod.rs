//! CLI command definitions and handlers.

pub mod models;
pub mod predict;

use clap::{Parser, Subcommand};

/// DICOM Detect - Run a detection model over DICOM instances
#[derive(Parser)]
#[command(name = "dicom-detect")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand)]
pub enum Commands {
    /// Run detection on DICOM files and print result records
    Predict(predict::PredictArgs),
    /// Inspect the model directory
    Models(models::ModelsArgs),
}

/// Process exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    /// Batch processed (skipped instances included).
    Success = 0,
    /// Startup failure or invalid invocation.
    Error = 2,
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> Self {
        Self::from(code as u8)
    }
}
