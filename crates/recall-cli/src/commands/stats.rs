use anyhow::Result;
use recall_core::TriggerEngine;

use crate::output::format::format_stats;
use crate::output::OutputFormat;

pub fn run(engine: &TriggerEngine, format: OutputFormat) -> Result<()> {
    println!("{}", format_stats(&engine.stats(), format).trim_end());
    Ok(())
}
