use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use recall_memory::MemoryClient;
use serde::Deserialize;
use serde_json::Value;

use super::{identity, Detector};
use crate::config::DetectorSettings;
use crate::error::CoreError;
use crate::model::{QueryParams, QueryType, TriggerContext, TriggerResult};

const NAME: &str = "entity_mention_detector";
const MIN_PROMPT_CHARS: usize = 5;

#[derive(Debug, Deserialize)]
#[serde(default)]
struct EntityMentionOptions {
    min_name_length: usize,
    max_entities: usize,
    cache_ttl_seconds: u64,
    tokens_per_entity: u64,
}

impl Default for EntityMentionOptions {
    fn default() -> Self {
        Self {
            min_name_length: 3,
            max_entities: 5,
            cache_ttl_seconds: 300,
            tokens_per_entity: 75,
        }
    }
}

#[derive(Debug)]
struct NameCache {
    names: Vec<String>,
    fetched_at: Instant,
}

/// Fires when the prompt names entities already stored in memory.
#[derive(Debug)]
pub struct EntityMentionDetector {
    enabled: bool,
    priority: i32,
    options: EntityMentionOptions,
    memory: Arc<MemoryClient>,
    cache: Mutex<Option<NameCache>>,
}

impl EntityMentionDetector {
    pub fn new(settings: &DetectorSettings, memory: Arc<MemoryClient>) -> Result<Self, CoreError> {
        let (enabled, priority) = identity(settings);
        let options: EntityMentionOptions = settings.parse_options()?;
        if options.max_entities == 0 {
            return Err(CoreError::Config(
                "entity_mention.max_entities must be at least 1".into(),
            ));
        }
        Ok(Self {
            enabled,
            priority,
            options,
            memory,
            cache: Mutex::new(None),
        })
    }

    /// Known entity names, re-read from the store once the cache is stale.
    fn known_names(&self) -> Vec<String> {
        let ttl = Duration::from_secs(self.options.cache_ttl_seconds);
        let mut cache = match self.cache.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(cached) = cache.as_ref() {
            if cached.fetched_at.elapsed() < ttl {
                return cached.names.clone();
            }
        }

        let Some(graph) = self.memory.read_graph() else {
            return cache.as_ref().map(|c| c.names.clone()).unwrap_or_default();
        };
        let names: Vec<String> = graph
            .entities
            .into_iter()
            .map(|e| e.name)
            .filter(|n| n.chars().count() >= self.options.min_name_length)
            .collect();
        tracing::debug!(count = names.len(), "refreshed entity name cache");
        *cache = Some(NameCache {
            names: names.clone(),
            fetched_at: Instant::now(),
        });
        names
    }
}

impl Detector for EntityMentionDetector {
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
        prompt: &str,
        _context: &TriggerContext,
    ) -> Result<Option<TriggerResult>, CoreError> {
        if prompt.trim().chars().count() < MIN_PROMPT_CHARS || !self.memory.is_available() {
            return Ok(None);
        }
        let known = self.known_names();
        if known.is_empty() {
            return Ok(None);
        }

        let haystack = prompt.to_lowercase();
        let mut hits: Vec<(usize, String)> = known
            .into_iter()
            .filter_map(|name| find_whole_word(&haystack, &name.to_lowercase()).map(|at| (at, name)))
            .collect();
        hits.sort_by_key(|(at, _)| *at);

        let mut names: Vec<String> = Vec::new();
        for (_, name) in hits {
            if names.len() == self.options.max_entities {
                break;
            }
            if !names.iter().any(|n| n.eq_ignore_ascii_case(&name)) {
                names.push(name);
            }
        }
        if names.is_empty() {
            return Ok(None);
        }

        let confidence = (0.70 + 0.05 * (names.len() - 1) as f64).min(0.90);
        let estimated_tokens = self.options.tokens_per_entity * names.len() as u64;
        let reason = format!("Entity mention: {}", names.join(", "));

        let mut params = QueryParams::new();
        params.insert(
            "names".into(),
            Value::Array(names.into_iter().map(Value::String).collect()),
        );
        Ok(Some(TriggerResult::fired(
            QueryType::EntityDetails,
            confidence,
            estimated_tokens,
            params,
            reason,
        )))
    }
}

/// Byte offset of the first occurrence of `needle` not embedded in a longer word.
fn find_whole_word(haystack: &str, needle: &str) -> Option<usize> {
    if needle.is_empty() {
        return None;
    }
    let is_word = |c: char| c.is_alphanumeric() || c == '_';
    haystack.match_indices(needle).map(|(at, _)| at).find(|&at| {
        let before = haystack[..at].chars().next_back();
        let after = haystack[at + needle.len()..].chars().next();
        !before.is_some_and(is_word) && !after.is_some_and(is_word)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use recall_memory::{Entity, JsonlGraphBackend, McpSettings, MemoryBackend};
    use serde_json::json;
    use tempfile::TempDir;

    fn memory_with(tmp: &TempDir, names: &[&str]) -> Arc<MemoryClient> {
        let backend = JsonlGraphBackend::new(tmp.path().join("memory.jsonl"));
        let entities: Vec<Entity> = names
            .iter()
            .map(|n| Entity::new(n, "component", &["seen in review"]))
            .collect();
        backend.create_entities(&entities).unwrap();
        Arc::new(MemoryClient::new(Arc::new(backend), McpSettings::default()))
    }

    fn context() -> TriggerContext {
        TriggerContext::new("s1", "/tmp")
    }

    #[test]
    fn test_mentions_in_order_of_appearance() {
        let tmp = TempDir::new().unwrap();
        let memory = memory_with(&tmp, &["AuthService", "RedisCache", "Billing"]);
        let detector = EntityMentionDetector::new(&DetectorSettings::enabled_at(3), memory).unwrap();

        let result = detector
            .evaluate("does rediscache still front the authservice tokens?", &context())
            .unwrap()
            .unwrap();
        assert_eq!(result.query_type, QueryType::EntityDetails);
        assert_eq!(result.param_strings("names"), vec!["RedisCache", "AuthService"]);
        assert_eq!(result.estimated_tokens, 150);
        assert!((result.confidence - 0.75).abs() < 1e-9);
        assert_eq!(result.reason, "Entity mention: RedisCache, AuthService");
    }

    #[test]
    fn test_whole_words_only() {
        let tmp = TempDir::new().unwrap();
        let memory = memory_with(&tmp, &["api", "Billing"]);
        let detector = EntityMentionDetector::new(&DetectorSettings::enabled_at(3), memory).unwrap();

        assert!(detector
            .evaluate("the rapid prototype for billings", &context())
            .unwrap()
            .is_none());
        let hit = detector.evaluate("check the api.", &context()).unwrap().unwrap();
        assert_eq!(hit.param_strings("names"), vec!["api"]);
        assert!((hit.confidence - 0.70).abs() < 1e-9);
    }

    #[test]
    fn test_short_names_and_cap() {
        let tmp = TempDir::new().unwrap();
        let memory = memory_with(&tmp, &["db", "alpha", "beta", "gamma"]);
        let settings = DetectorSettings::enabled_at(3).with_option("max_entities", json!(2));
        let detector = EntityMentionDetector::new(&settings, memory).unwrap();

        let result = detector
            .evaluate("db gamma beta alpha", &context())
            .unwrap()
            .unwrap();
        assert_eq!(result.param_strings("names"), vec!["gamma", "beta"]);
    }

    #[test]
    fn test_confidence_cap() {
        let tmp = TempDir::new().unwrap();
        let names = ["one1", "two2", "three", "four", "five5", "six6"];
        let memory = memory_with(&tmp, &names);
        let settings = DetectorSettings::enabled_at(3).with_option("max_entities", json!(6));
        let detector = EntityMentionDetector::new(&settings, memory).unwrap();

        let result = detector
            .evaluate(&names.join(" "), &context())
            .unwrap()
            .unwrap();
        assert_eq!(result.param_strings("names").len(), 6);
        assert!((result.confidence - 0.90).abs() < 1e-9);
    }

    #[test]
    fn test_empty_store_never_fires() {
        let tmp = TempDir::new().unwrap();
        let memory = memory_with(&tmp, &[]);
        let detector = EntityMentionDetector::new(&DetectorSettings::enabled_at(3), memory).unwrap();
        assert!(detector
            .evaluate("anything about billing", &context())
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_names_cached_between_calls() {
        let tmp = TempDir::new().unwrap();
        let memory = memory_with(&tmp, &["Billing"]);
        let detector = EntityMentionDetector::new(&DetectorSettings::enabled_at(3), memory).unwrap();
        assert!(detector.evaluate("billing again", &context()).unwrap().is_some());

        // A name added after the first fetch is not seen until the TTL lapses.
        JsonlGraphBackend::new(tmp.path().join("memory.jsonl"))
            .create_entities(&[Entity::new("Ledger", "component", &[])])
            .unwrap();
        assert!(detector.evaluate("ledger again", &context()).unwrap().is_none());
    }

    #[test]
    fn test_zero_max_entities_rejected() {
        let tmp = TempDir::new().unwrap();
        let memory = memory_with(&tmp, &[]);
        let settings = DetectorSettings::enabled_at(3).with_option("max_entities", json!(0));
        assert!(EntityMentionDetector::new(&settings, memory).is_err());
    }

    #[test]
    fn test_find_whole_word() {
        assert_eq!(find_whole_word("use the api now", "api"), Some(8));
        assert_eq!(find_whole_word("rapid api", "api"), Some(6));
        assert_eq!(find_whole_word("apis", "api"), None);
        assert_eq!(find_whole_word("snake_api", "api"), None);
    }
}
