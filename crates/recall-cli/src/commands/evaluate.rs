use std::fs;
use std::io::Read as _;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use recall_core::TriggerEngine;
use serde::Deserialize;

use crate::output::format::{format_test_run, HookOutput};
use crate::output::OutputFormat;

#[derive(Args)]
pub struct EvaluateArgs {
    /// Prompt text to evaluate
    #[arg(long, conflicts_with = "stdin")]
    pub prompt: Option<String>,

    /// Read a hook payload (`{"user_prompt": ...}`) from stdin and answer in hook JSON
    #[arg(long)]
    pub stdin: bool,

    /// Dry run: report the trigger and the query it would run, without querying memory
    #[arg(long)]
    pub test: bool,
}

impl EvaluateArgs {
    pub fn has_prompt_source(&self) -> bool {
        self.prompt.is_some() || self.stdin
    }
}

/// Payload a prompt hook pipes to `--stdin`.
#[derive(Debug, Default, Deserialize)]
pub struct HookInput {
    #[serde(default)]
    pub user_prompt: Option<String>,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    #[serde(default)]
    pub transcript_path: Option<PathBuf>,
}

impl HookInput {
    pub fn parse(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).context("Failed to parse stdin JSON")
    }

    pub fn prompt_text(&self) -> &str {
        self.user_prompt
            .as_deref()
            .or(self.prompt.as_deref())
            .unwrap_or_default()
    }
}

/// Conversation size estimated from the transcript file, at four bytes per token.
fn conversation_tokens(transcript: &Path) -> Option<u64> {
    fs::metadata(transcript).ok().map(|m| m.len() / 4)
}

pub fn run(args: &EvaluateArgs, mut engine: TriggerEngine, format: OutputFormat) -> Result<()> {
    let hook = if args.stdin {
        let mut raw = String::new();
        std::io::stdin()
            .read_to_string(&mut raw)
            .context("Failed to read stdin")?;
        Some(HookInput::parse(&raw)?)
    } else {
        None
    };
    let prompt = match (&hook, &args.prompt) {
        (Some(hook), _) => hook.prompt_text().to_string(),
        (None, Some(prompt)) => prompt.clone(),
        (None, None) => anyhow::bail!("No prompt given; use --prompt or --stdin"),
    };

    if args.test {
        println!("[TEST MODE] Detector evaluation only, no memory calls");
    }
    if engine.registry().enabled_detectors().next().is_none() {
        tracing::warn!("No detectors registered");
        return Ok(());
    }

    let cwd = match hook.as_ref().and_then(|h| h.cwd.clone()) {
        Some(cwd) => cwd,
        None => std::env::current_dir().context("Failed to resolve current directory")?,
    };
    let mut context = engine.build_context(&cwd);
    if let Some(tokens) = hook
        .as_ref()
        .and_then(|h| h.transcript_path.as_deref())
        .and_then(conversation_tokens)
    {
        context = context.with_conversation_tokens(tokens);
    }

    let Some(trigger) = engine.evaluate_triggers(&prompt, Some(&context)) else {
        if args.test {
            println!("No trigger fired");
        }
        return Ok(());
    };
    tracing::debug!("Trigger fired: {trigger}");

    if args.test {
        println!("{}", format_test_run(&trigger, format).trim_end());
        return Ok(());
    }

    let memory = engine.query_memory(&trigger);
    let text = TriggerEngine::format_result(&trigger, memory.as_ref());
    match format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "trigger": trigger,
                "memory": memory,
                "formatted": text,
            }))?
        ),
        OutputFormat::Text => println!("{text}"),
    }
    if hook.is_some() {
        println!("{}", serde_json::to_string(&HookOutput::new(&text))?);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_hook_input_prompt_fields() {
        let hook = HookInput::parse(r#"{"user_prompt": "remember redis?", "session_id": "x"}"#).unwrap();
        assert_eq!(hook.prompt_text(), "remember redis?");

        let alt = HookInput::parse(r#"{"prompt": "why did we", "cwd": "/work/api"}"#).unwrap();
        assert_eq!(alt.prompt_text(), "why did we");
        assert_eq!(alt.cwd, Some(PathBuf::from("/work/api")));

        assert_eq!(HookInput::parse("{}").unwrap().prompt_text(), "");
        assert!(HookInput::parse("not json").is_err());
    }

    #[test]
    fn test_conversation_tokens_from_transcript() {
        let tmp = TempDir::new().unwrap();
        let transcript = tmp.path().join("transcript.jsonl");
        fs::write(&transcript, "x".repeat(4001)).unwrap();
        assert_eq!(conversation_tokens(&transcript), Some(1000));
        assert_eq!(conversation_tokens(&tmp.path().join("missing")), None);
    }
}
