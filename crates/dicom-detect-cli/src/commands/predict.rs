//! Predict command - run the adapter over DICOM files.

use std::collections::HashMap;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Args, ValueEnum};
use dicom_detect_adapters::{model_paths, read_identifiers, DicomDecoder};
use dicom_detect_core::{InferenceAdapter, Instance, PredictRequest, ResultType};
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::output::{JsonOutput, ProgressBar};

/// Output format for results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Single JSON array
    #[default]
    Json,
    /// JSON Lines (one record per line)
    Jsonl,
}

/// Parse and validate a threshold value (0.0-1.0).
fn parse_threshold(s: &str) -> Result<f32, String> {
    let value: f32 = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid number"))?;
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(format!("{value} is not in 0.0..=1.0"))
    }
}

/// Parse a `KEY=VALUE` argument.
fn parse_key_val(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("'{s}' is not KEY=VALUE")),
    }
}

/// Arguments for the predict command.
#[derive(Args, Clone)]
pub struct PredictArgs {
    /// DICOM files to run detection on, in output order
    pub files: Vec<PathBuf>,

    /// Free-form run argument, passed through to the request
    #[arg(long = "arg", value_name = "KEY=VALUE", value_parser = parse_key_val)]
    pub args: Vec<(String, String)>,

    /// Model root holding configs/ and checkpoints/
    #[arg(long, value_name = "DIR")]
    pub model_dir: Option<PathBuf>,

    /// Probability threshold (0.0-1.0), overriding the experiment config
    #[arg(long, value_parser = parse_threshold)]
    pub score_threshold: Option<f32>,

    /// Directory for temporary input images
    #[arg(long, value_name = "DIR")]
    pub tmp_dir: Option<PathBuf>,

    /// Output format
    #[arg(long, value_enum)]
    pub format: Option<OutputFormat>,

    /// Pretty-print JSON output (only affects --format json)
    #[arg(long)]
    pub pretty: bool,

    /// Show progress bar
    #[arg(long)]
    pub progress: bool,

    /// Suppress progress output
    #[arg(short, long)]
    pub quiet: bool,
}

impl PredictArgs {
    /// Apply configuration file values, respecting CLI precedence.
    ///
    /// Layering priority (lowest to highest):
    /// 1. Hardcoded defaults (in accessor methods)
    /// 2. Config file values (XDG, then project-local)
    /// 3. CLI arguments (already set on self)
    #[must_use]
    pub fn with_config(mut self, config: &AppConfig) -> Self {
        if self.model_dir.is_none() {
            self.model_dir.clone_from(&config.models.dir);
        }

        self.score_threshold = self.score_threshold.or(config.predict.score_threshold);
        if self.tmp_dir.is_none() {
            self.tmp_dir.clone_from(&config.predict.tmp_dir);
        }

        if self.format.is_none() {
            self.format = config
                .output
                .format
                .as_ref()
                .and_then(|s| match s.as_str() {
                    "json" => Some(OutputFormat::Json),
                    "jsonl" => Some(OutputFormat::Jsonl),
                    _ => None,
                });
        }

        if !self.pretty {
            self.pretty = config.output.pretty.unwrap_or(false);
        }
        if !self.progress {
            self.progress = config.output.progress.unwrap_or(false);
        }

        self
    }

    /// Get output format with fallback to a JSON array.
    fn format(&self) -> OutputFormat {
        self.format.unwrap_or_default()
    }
}

/// Summary of a predict run.
#[allow(dead_code)] // Fields exposed for programmatic use
pub struct PredictSummary {
    /// Number of instances in the batch.
    pub instances: usize,
    /// Number of `ANNOTATION` records.
    pub annotations: usize,
    /// Number of `NONE` records.
    pub negatives: usize,
}

/// Run the predict command.
///
/// Expects `args` to have been processed through `with_config()` first
/// to apply configuration file settings.
pub fn run(args: &PredictArgs) -> Result<PredictSummary> {
    if args.files.is_empty() {
        anyhow::bail!("No files specified");
    }
    info!("Running predict on {} files", args.files.len());

    let paths = model_paths(args.model_dir.as_deref());
    let mut adapter = InferenceAdapter::load(&paths, Box::new(DicomDecoder::new()))?;
    if let Some(threshold) = args.score_threshold {
        debug!("Score threshold override: {threshold}");
        adapter = adapter.with_score_threshold(threshold);
    }
    if let Some(ref dir) = args.tmp_dir {
        adapter = adapter.with_tmp_dir(dir);
    }

    let mut request = PredictRequest::new(args.files.iter().map(|p| read_instance(p)).collect());
    request.args = args.args.iter().cloned().collect::<HashMap<_, _>>();

    let show_progress = !args.quiet && (args.progress || std::io::stderr().is_terminal());
    let progress_bar = ProgressBar::new(
        Some(request.instances.len() as u64),
        args.quiet,
        show_progress,
    );

    let results = adapter.predict_with_progress(&request, &progress_bar);

    let output = JsonOutput::stdout();
    match args.format() {
        OutputFormat::Json => output.write_array(&results, args.pretty)?,
        OutputFormat::Jsonl => {
            for record in &results {
                output.write(record)?;
            }
        }
    }
    output.flush()?;

    let annotations = results
        .iter()
        .filter(|r| r.result_type == ResultType::Annotation)
        .count();

    Ok(PredictSummary {
        instances: request.instances.len(),
        annotations,
        negatives: results.len() - annotations,
    })
}

/// Builds an instance from a file, with tags read from its header.
///
/// Unreadable files still enter the batch, with whatever could be read, so
/// `predict` skips them.
fn read_instance(path: &Path) -> Instance {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("Failed to read {}: {e}", path.display());
            Vec::new()
        }
    };

    let tags = match read_identifiers(&bytes) {
        Ok(tags) => tags,
        Err(e) => {
            warn!("Failed to read tags from {}: {e:#}", path.display());
            HashMap::new()
        }
    };

    Instance::new(bytes, tags)
}
