//! Models command - inspect the model directory.

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Args, Subcommand};
use dicom_detect_adapters::{list_model_files, model_paths, models_dir};
use dicom_detect_core::ExperimentConfig;

/// Arguments for the models command
#[derive(Args)]
pub struct ModelsArgs {
    /// Model root (defaults to the data directory)
    #[arg(long, value_name = "DIR", global = true)]
    pub model_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: ModelsCommand,
}

/// Models subcommands
#[derive(Subcommand)]
pub enum ModelsCommand {
    /// Print model directory path
    Path,
    /// Check that the config and checkpoint are present and the config parses
    Check,
}

/// Run the models command.
pub fn run(args: &ModelsArgs) -> Result<()> {
    let root = args.model_dir.clone().unwrap_or_else(models_dir);
    match args.command {
        ModelsCommand::Path => {
            println!("{}", root.display());
            Ok(())
        }
        ModelsCommand::Check => check_models(&root),
    }
}

fn check_models(root: &Path) -> Result<()> {
    let paths = model_paths(Some(root));

    println!("Model directory: {}", root.display());
    println!();

    let files = list_model_files(&paths);
    for (path, present) in &files {
        let status = if *present { "✓" } else { "✗" };
        println!("  {status} {}", path.display());
    }
    println!();

    let missing = files.iter().filter(|(_, present)| !present).count();
    if missing > 0 {
        anyhow::bail!("{missing} model file(s) missing under {}", root.display());
    }

    let config = ExperimentConfig::from_file(&paths.config)?;
    println!(
        "{} with {} stage(s), score threshold {}",
        config.model.name,
        config.model.stages.len(),
        config.predict.score_threshold
    );

    Ok(())
}
