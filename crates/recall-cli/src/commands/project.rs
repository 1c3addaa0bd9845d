use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use recall_core::{EnginePaths, FileProjectTracker, ProjectTracker};

use crate::output::format::format_active_project;
use crate::output::OutputFormat;

#[derive(Args)]
pub struct ProjectArgs {
    #[command(subcommand)]
    pub action: ProjectAction,
}

#[derive(Subcommand)]
pub enum ProjectAction {
    /// Print the project observed on the last prompt
    Show,
    /// Forget the tracked project; the next prompt starts fresh
    Clear,
}

pub fn run(args: &ProjectArgs, paths: &EnginePaths, format: OutputFormat) -> Result<()> {
    let tracker = FileProjectTracker::new(&paths.active_project);
    match args.action {
        ProjectAction::Show => {
            let active = tracker
                .get_active_project()
                .context("Failed to read active project")?;
            let text = format_active_project(active.as_ref(), format);
            println!("{}", text.trim_end());
        }
        ProjectAction::Clear => {
            tracker
                .clear_active_project()
                .with_context(|| format!("Failed to remove {}", tracker.path().display()))?;
            println!("Active project cleared");
        }
    }
    Ok(())
}
