pub mod evaluate;
pub mod project;
pub mod stats;

use clap::Subcommand;

#[derive(Subcommand)]
pub enum Commands {
    /// Show or clear the tracked active project
    Project(project::ProjectArgs),
}
