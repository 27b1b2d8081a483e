//! HMM Spectral Eval CLI
//!
//! Compares spectral (and optionally EM) estimates of sequence probabilities
//! against a reference HMM and writes a tab-separated report.

use anyhow::{Context, Result};
use clap::Parser;
use hmm_spectral_eval::{EvalConfig, EvaluationRunner};
use std::path::PathBuf;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "hmm-spectral-eval")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Reference HMM artifact (.json, .yaml or .yml)
    model: PathBuf,

    /// Training sequences, one comma-separated row per sequence
    train: PathBuf,

    /// Testing sequences, one comma-separated row per sequence
    test: PathBuf,

    /// Text report path [default: HMM_SL.log]
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Also write the evaluation as JSON
    #[arg(long)]
    json: Option<PathBuf>,

    /// Rank of the spectral learner (overrides config)
    #[arg(long)]
    rank: Option<usize>,

    /// Train and report the Baum-Welch baseline
    #[arg(long)]
    em: bool,

    /// Hidden states for the Baum-Welch baseline (overrides config)
    #[arg(long)]
    em_states: Option<usize>,

    /// YAML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn eval_config(&self) -> Result<EvalConfig> {
        let mut config = match &self.config {
            Some(path) => EvalConfig::load(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => EvalConfig::default(),
        };

        if let Some(rank) = self.rank {
            config.spectral.rank = rank;
        }
        if self.em {
            config.em.enabled = true;
        }
        if let Some(states) = self.em_states {
            config.em.states = states;
        }
        if let Some(output) = &self.output {
            config.report.path.clone_from(output);
        }
        if let Some(json) = &self.json {
            config.report.json = Some(json.clone());
        }

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }
}

fn run(cli: &Cli) -> Result<()> {
    let config = cli.eval_config()?;
    let start = Instant::now();

    let mut runner = EvaluationRunner::load(&cli.train, &cli.test, &config)?;
    println!("Training set: {}", runner.train_set().len());
    println!("Testing set: {}", runner.test_set().len());

    let evaluation = runner
        .run(&cli.model, &config.report.path)
        .with_context(|| format!("Evaluation with model {} failed", cli.model.display()))?;

    println!("{}", evaluation.summary_table());
    println!("Report written to {}", config.report.path.display());
    tracing::info!(elapsed = ?start.elapsed(), "Evaluation complete");
    Ok(())
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    if let Err(e) = run(&cli) {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
