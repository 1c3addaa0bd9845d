use chrono::Utc;
use recall_core::project::{format_time_ago, project_summary};
use recall_core::{ActiveProject, EngineStats, PlannedQuery, TriggerResult};
use serde::Serialize;

use super::OutputFormat;

/// What a prompt hook reads back from stdout.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HookOutput<'a> {
    pub system_message: &'a str,
    pub additional_context: &'a str,
    #[serde(rename = "continue")]
    pub proceed: bool,
}

impl<'a> HookOutput<'a> {
    pub fn new(text: &'a str) -> Self {
        Self {
            system_message: text,
            additional_context: text,
            proceed: true,
        }
    }
}

pub fn format_stats(stats: &EngineStats, fmt: OutputFormat) -> String {
    match fmt {
        OutputFormat::Json => serde_json::to_string_pretty(stats).unwrap_or_default(),
        OutputFormat::Text => format_stats_text(stats),
    }
}

fn format_stats_text(stats: &EngineStats) -> String {
    let mut out = String::new();
    out.push_str("=== Memory Trigger Statistics ===\n");
    out.push_str(&format!("Session ID:       {}\n", stats.session_id));
    out.push_str(&format!(
        "Session Start:    {}\n",
        stats.session_start.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    out.push_str(&format!(
        "Tokens Used:      {} / {}\n",
        stats.tokens_used, stats.tokens_budget
    ));
    out.push_str(&format!("Tokens Remaining: {}\n", stats.tokens_remaining));
    out.push_str(&format!("Triggers Fired:   {}\n", stats.triggers_fired));
    out.push_str(&format!(
        "Detectors:        {} enabled / {} registered\n",
        stats.detectors_enabled, stats.detectors_registered
    ));
    out
}

/// Dry-run description of the query a trigger would run.
pub fn format_test_run(trigger: &TriggerResult, fmt: OutputFormat) -> String {
    let planned = PlannedQuery::for_trigger(trigger).map(|q| q.to_string());
    match fmt {
        OutputFormat::Json => serde_json::to_string_pretty(&serde_json::json!({
            "trigger": trigger,
            "planned_query": planned,
        }))
        .unwrap_or_default(),
        OutputFormat::Text => {
            let params = serde_json::to_string(&trigger.query_params).unwrap_or_default();
            let mut out = String::new();
            out.push_str(&format!("Trigger fired: {trigger}\n\n"));
            out.push_str("[TEST MODE] Would query memory:\n");
            out.push_str(&format!("  Query type: {}\n", trigger.query_type));
            out.push_str(&format!("  Query params: {params}\n"));
            out.push_str(&format!("  Estimated tokens: {}\n", trigger.estimated_tokens));
            if let Some(planned) = planned {
                out.push_str(&format!("  Memory call: {planned}\n"));
            }
            out
        }
    }
}

pub fn format_active_project(active: Option<&ActiveProject>, fmt: OutputFormat) -> String {
    match fmt {
        OutputFormat::Json => serde_json::to_string_pretty(&active).unwrap_or_default(),
        OutputFormat::Text => {
            let Some(active) = active else {
                return "No active project tracked".to_string();
            };
            let mut out = format!("Active: {}\n", project_summary(&active.project));
            out.push_str(&format!(
                "Updated: {}\n",
                format_time_ago(active.updated_at, Utc::now())
            ));
            if active.has_uncommitted_changes {
                out.push_str("Has uncommitted changes\n");
            }
            out
        }
    }
}
