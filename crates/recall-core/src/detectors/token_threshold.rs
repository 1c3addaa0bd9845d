use serde::Deserialize;
use serde_json::Value;

use super::{identity, Detector};
use crate::config::DetectorSettings;
use crate::error::CoreError;
use crate::model::{QueryParams, QueryType, TriggerContext, TriggerResult};

const NAME: &str = "token_threshold_detector";
const CONFIDENCE: f64 = 0.80;

#[derive(Debug, Deserialize)]
#[serde(default)]
struct TokenThresholdOptions {
    thresholds: Vec<u64>,
    estimated_tokens: u64,
}

impl Default for TokenThresholdOptions {
    fn default() -> Self {
        Self {
            thresholds: vec![50_000, 100_000, 150_000],
            estimated_tokens: 300,
        }
    }
}

/// Fires once per threshold as the host conversation grows, to surface
/// pending work before context gets crowded out.
#[derive(Debug)]
pub struct TokenThresholdDetector {
    enabled: bool,
    priority: i32,
    thresholds: Vec<u64>,
    estimated_tokens: u64,
}

impl TokenThresholdDetector {
    pub fn new(settings: &DetectorSettings) -> Result<Self, CoreError> {
        let (enabled, priority) = identity(settings);
        let options: TokenThresholdOptions = settings.parse_options()?;
        let mut thresholds = options.thresholds;
        thresholds.sort_unstable();
        thresholds.dedup();
        Ok(Self {
            enabled,
            priority,
            thresholds,
            estimated_tokens: options.estimated_tokens,
        })
    }
}

impl Detector for TokenThresholdDetector {
    fn name(&self) -> &str {
        NAME
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn evaluate(
        &self,
        _prompt: &str,
        context: &TriggerContext,
    ) -> Result<Option<TriggerResult>, CoreError> {
        let Some(tokens) = context.conversation_tokens else {
            return Ok(None);
        };
        let Some(&crossed) = self.thresholds.iter().rev().find(|&&t| t <= tokens) else {
            return Ok(None);
        };
        if context.last_threshold.is_some_and(|last| crossed <= last) {
            return Ok(None);
        }

        let mut params = QueryParams::new();
        params.insert("threshold".into(), Value::from(crossed));
        params.insert("token_count".into(), Value::from(tokens));
        Ok(Some(TriggerResult::fired(
            QueryType::ThresholdCheck,
            CONFIDENCE,
            self.estimated_tokens,
            params,
            format!("Conversation reached {tokens} tokens (threshold {crossed})"),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn detector() -> TokenThresholdDetector {
        TokenThresholdDetector::new(&DetectorSettings::enabled_at(4)).unwrap()
    }

    fn at(tokens: u64, last: Option<u64>) -> TriggerContext {
        let mut ctx = TriggerContext::new("s1", "/tmp").with_conversation_tokens(tokens);
        ctx.last_threshold = last;
        ctx
    }

    #[test]
    fn test_requires_conversation_size() {
        let ctx = TriggerContext::new("s1", "/tmp");
        assert!(detector().evaluate("x", &ctx).unwrap().is_none());
    }

    #[test]
    fn test_below_first_threshold() {
        assert!(detector().evaluate("x", &at(49_999, None)).unwrap().is_none());
    }

    #[test]
    fn test_highest_crossed_threshold_fires() {
        let result = detector().evaluate("x", &at(120_000, None)).unwrap().unwrap();
        assert_eq!(result.query_type, QueryType::ThresholdCheck);
        assert_eq!(result.param_u64("threshold"), Some(100_000));
        assert_eq!(result.param_u64("token_count"), Some(120_000));
        assert_eq!(result.estimated_tokens, 300);
        assert_eq!(
            result.reason,
            "Conversation reached 120000 tokens (threshold 100000)"
        );
    }

    #[test]
    fn test_each_threshold_fires_once() {
        let d = detector();
        assert!(d.evaluate("x", &at(60_000, Some(50_000))).unwrap().is_none());
        assert!(d.evaluate("x", &at(160_000, Some(150_000))).unwrap().is_none());
        let next = d.evaluate("x", &at(100_000, Some(50_000))).unwrap().unwrap();
        assert_eq!(next.param_u64("threshold"), Some(100_000));
    }

    #[test]
    fn test_custom_thresholds_are_sorted() {
        let settings = DetectorSettings::enabled_at(4)
            .with_option("thresholds", json!([2000, 1000]))
            .with_option("estimated_tokens", json!(120));
        let d = TokenThresholdDetector::new(&settings).unwrap();
        let result = d.evaluate("x", &at(2500, Some(1000))).unwrap().unwrap();
        assert_eq!(result.param_u64("threshold"), Some(2000));
        assert_eq!(result.estimated_tokens, 120);
    }
}
