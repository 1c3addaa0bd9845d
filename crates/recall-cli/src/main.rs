use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use recall_core::{EngineConfig, EnginePaths, TriggerEngine};

mod commands;
mod logging;
mod output;

#[derive(Parser)]
#[command(
    name = "recall",
    version,
    about = "Surface relevant memory from the knowledge graph on each prompt"
)]
struct Cli {
    /// Increase verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Output format
    #[arg(long, global = true, default_value = "text")]
    format: output::OutputFormat,

    /// Config file (default: ~/.claude/memory-trigger-config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Show session statistics
    #[arg(long, conflicts_with_all = ["prompt", "stdin", "test"])]
    stats: bool,

    #[command(flatten)]
    evaluate: commands::evaluate::EvaluateArgs,

    #[command(subcommand)]
    command: Option<commands::Commands>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut paths = EnginePaths::discover().context("HOME is not set")?;
    if let Some(config) = &cli.config {
        paths = paths.with_config(config.clone());
    }

    // Config is read before tracing starts so the file layer can follow it.
    let loaded = if paths.config.exists() {
        EngineConfig::load(&paths.config)
    } else {
        Ok(EngineConfig::default())
    };
    let config = match &loaded {
        Ok(config) => config.clone(),
        Err(_) => EngineConfig::default(),
    };
    logging::init(cli.verbose, &config.logging, &paths);
    if let Err(e) = loaded {
        tracing::warn!("Failed to load config, using defaults: {e}");
    }

    if let Some(commands::Commands::Project(args)) = &cli.command {
        return commands::project::run(args, &paths, cli.format);
    }

    if !cli.stats && !cli.evaluate.has_prompt_source() {
        eprintln!("{}", Cli::command().render_usage());
        std::process::exit(1);
    }

    let engine = TriggerEngine::with_config(paths, config);
    if cli.stats {
        return commands::stats::run(&engine, cli.format);
    }
    commands::evaluate::run(&cli.evaluate, engine, cli.format)
}
