use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::{Regex, RegexBuilder};
use serde::Deserialize;
use serde_json::Value;

use super::{identity, Detector};
use crate::config::DetectorSettings;
use crate::error::CoreError;
use crate::model::{QueryParams, QueryType, TriggerContext, TriggerResult};

const NAME: &str = "keyword_detector";
const ESTIMATED_TOKENS: u64 = 150;
const MIN_PROMPT_CHARS: usize = 5;
const MAX_QUERY_TERMS: usize = 5;
const LONG_PROMPT_CHARS: usize = 50;

static DOUBLE_QUOTED: LazyLock<Regex> = LazyLock::new(|| compile(r#""([^"]+)""#));
static SINGLE_QUOTED: LazyLock<Regex> = LazyLock::new(|| compile(r"(?:^|\s)'([^']+)'"));
static CAMEL_CASE: LazyLock<Regex> =
    LazyLock::new(|| compile(r"\b[a-z]+(?:[A-Z][a-z0-9]+)+\b"));
static SNAKE_CASE: LazyLock<Regex> =
    LazyLock::new(|| compile(r"\b[a-z0-9]+(?:_[a-z0-9]+)+\b"));
static CAPITALIZED: LazyLock<Regex> = LazyLock::new(|| compile(r"\b[A-Z][a-zA-Z0-9]+\b"));
static WORD: LazyLock<Regex> = LazyLock::new(|| compile(r"\b[A-Za-z][A-Za-z0-9_-]*\b"));

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("built-in pattern is valid")
}

/// Words that carry no search value on their own.
const STOPWORDS: &[&str] = &[
    "a", "about", "again", "also", "an", "and", "any", "are", "at", "be", "before", "but",
    "can", "could", "decided", "decision", "did", "do", "does", "earlier", "for", "from",
    "had", "has", "have", "how", "i", "in", "into", "is", "it", "its", "just", "last",
    "like", "me", "my", "of", "on", "our", "previously", "recall", "remember", "session",
    "should", "some", "than", "that", "the", "their", "then", "there", "these", "they",
    "this", "those", "time", "to", "was", "we", "were", "what", "when", "where", "which",
    "who", "why", "will", "with", "would", "you",
];

fn is_stopword(word: &str) -> bool {
    STOPWORDS.contains(&word.to_lowercase().as_str())
}

/// Keyword categories, scanned in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum KeywordCategory {
    Memory,
    Decision,
    Architecture,
    Problem,
}

impl KeywordCategory {
    pub const ALL: [KeywordCategory; 4] = [
        KeywordCategory::Memory,
        KeywordCategory::Decision,
        KeywordCategory::Architecture,
        KeywordCategory::Problem,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Decision => "decision",
            Self::Architecture => "architecture",
            Self::Problem => "problem",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == name)
    }

    pub fn base_confidence(&self) -> f64 {
        match self {
            Self::Memory => 0.90,
            Self::Decision => 0.85,
            Self::Architecture | Self::Problem => 0.75,
        }
    }

    pub fn default_patterns(&self) -> &'static [&'static str] {
        match self {
            Self::Memory => &[
                r"\b(remember|recall|remind me)\b",
                r"\bwe (talked|discussed|spoke) about\b",
                r"\b(mentioned|said|discussed) (earlier|before|previously)\b",
                r"\blast (time|session)\b",
                r"\bpreviously\b",
            ],
            Self::Decision => &[
                r"\b(decided|decide|decision|decisions)\b",
                r"\bwhy did we\b",
                r"\b(chose|chosen|choose)\b",
                r"\bwent with\b",
            ],
            Self::Architecture => &[
                r"\b(architecture|architectural)\b",
                r"\b(pattern|patterns)\b",
                r"\b(design|designed)\b",
                r"\b(structure|approach)\b",
            ],
            Self::Problem => &[
                r"\b(bug|bugs|issue|issues|error|errors|problem|problems)\b",
                r"\b(fix|fixed|broken|crash|crashes)\b",
            ],
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct KeywordOptions {
    /// Category name to pattern list. Replaces the built-in table when present.
    keywords: Option<BTreeMap<String, Vec<String>>>,
}

/// Fires on prompts that read like questions about past work.
#[derive(Debug)]
pub struct KeywordDetector {
    enabled: bool,
    priority: i32,
    categories: Vec<(KeywordCategory, Vec<Regex>)>,
}

impl KeywordDetector {
    pub fn new(settings: &DetectorSettings) -> Result<Self, CoreError> {
        let (enabled, priority) = identity(settings);
        let options: KeywordOptions = settings.parse_options()?;

        let table: Vec<(KeywordCategory, Vec<String>)> = match options.keywords {
            Some(custom) => {
                let mut table = Vec::with_capacity(custom.len());
                for (name, patterns) in custom {
                    match KeywordCategory::from_name(&name) {
                        Some(category) => table.push((category, patterns)),
                        None => tracing::warn!(
                            category = %name,
                            "Unknown keyword category, ignoring its patterns"
                        ),
                    }
                }
                table.sort_by_key(|(category, _)| *category);
                table
            }
            None => KeywordCategory::ALL
                .into_iter()
                .map(|c| {
                    let patterns = c.default_patterns().iter().map(|p| p.to_string()).collect();
                    (c, patterns)
                })
                .collect(),
        };

        let mut categories = Vec::with_capacity(table.len());
        for (category, patterns) in table {
            let compiled = patterns
                .iter()
                .map(|p| RegexBuilder::new(p).case_insensitive(true).build())
                .collect::<Result<Vec<_>, _>>()?;
            categories.push((category, compiled));
        }

        Ok(Self {
            enabled,
            priority,
            categories,
        })
    }

    /// First matching category in declaration order, with the matched text.
    fn first_match<'p>(&self, prompt: &'p str) -> Option<(KeywordCategory, &'p str)> {
        self.categories.iter().find_map(|(category, patterns)| {
            patterns
                .iter()
                .find_map(|re| re.find(prompt))
                .map(|m| (*category, m.as_str()))
        })
    }
}

impl Detector for KeywordDetector {
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
        if prompt.trim().chars().count() < MIN_PROMPT_CHARS || looks_like_code(prompt) {
            return Ok(None);
        }
        let Some((category, matched)) = self.first_match(prompt) else {
            return Ok(None);
        };

        let mut confidence = category.base_confidence();
        if prompt.contains('?') {
            confidence += 0.1;
        }
        if prompt.chars().count() > LONG_PROMPT_CHARS {
            confidence += 0.05;
        }

        let terms = extract_query_terms(prompt);
        let query = if terms.is_empty() {
            matched.to_string()
        } else {
            terms.join(" ")
        };

        let mut params = QueryParams::new();
        params.insert("query".into(), Value::String(query));
        params.insert("category".into(), Value::String(category.as_str().into()));
        params.insert("matched_pattern".into(), Value::String(matched.into()));

        tracing::debug!(category = category.as_str(), matched, "keyword trigger");
        Ok(Some(TriggerResult::fired(
            QueryType::KeywordSearch,
            confidence.min(1.0),
            ESTIMATED_TOKENS,
            params,
            format!("Keyword match: category={}", category.as_str()),
        )))
    }
}

/// Pasted source rather than a natural-language question.
fn looks_like_code(prompt: &str) -> bool {
    if prompt.contains("```") {
        return true;
    }
    let lines: Vec<&str> = prompt.lines().filter(|l| !l.trim().is_empty()).collect();
    let indented = lines
        .iter()
        .filter(|l| l.starts_with("    ") || l.starts_with('\t'))
        .count();
    indented >= 2 && indented * 2 >= lines.len()
}

fn push(term: &str, terms: &mut Vec<String>) {
    let term = term.trim();
    if !term.is_empty() && terms.len() < MAX_QUERY_TERMS && !terms.iter().any(|t| t == term) {
        terms.push(term.to_string());
    }
}

/// Search terms in priority order: quoted text, camelCase, snake_case, then
/// capitalized words. Falls back to significant words when none are found.
pub fn extract_query_terms(prompt: &str) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();

    for caps in DOUBLE_QUOTED
        .captures_iter(prompt)
        .chain(SINGLE_QUOTED.captures_iter(prompt))
    {
        push(&caps[1], &mut terms);
    }
    for re in [&*CAMEL_CASE, &*SNAKE_CASE] {
        for m in re.find_iter(prompt) {
            push(m.as_str(), &mut terms);
        }
    }
    for m in CAPITALIZED.find_iter(prompt) {
        if !is_stopword(m.as_str()) {
            push(m.as_str(), &mut terms);
        }
    }

    if terms.is_empty() {
        for m in WORD.find_iter(prompt) {
            let word = m.as_str();
            if word.chars().count() >= 4 && !is_stopword(word) {
                push(word, &mut terms);
            }
        }
    }
    terms
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn detector() -> KeywordDetector {
        KeywordDetector::new(&DetectorSettings::enabled_at(2)).unwrap()
    }

    fn context() -> TriggerContext {
        TriggerContext::new("s1", "/tmp")
    }

    fn eval(prompt: &str) -> Option<TriggerResult> {
        detector().evaluate(prompt, &context()).unwrap()
    }

    #[test]
    fn test_short_prompts_ignored() {
        assert!(eval("why?").is_none());
        assert!(eval("   fix    ").is_none());
    }

    #[test]
    fn test_memory_category_wins_over_later_ones() {
        // "bug" would match `problem`, but `memory` is scanned first.
        let result = eval("Do you remember that bug with the Redis cache?").unwrap();
        assert_eq!(result.query_type, QueryType::KeywordSearch);
        assert_eq!(result.param_str("category"), Some("memory"));
        assert_eq!(result.param_str("matched_pattern"), Some("remember"));
        assert_eq!(result.estimated_tokens, 150);
        assert_eq!(result.reason, "Keyword match: category=memory");
        assert!((result.confidence - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_confidence_adjustments() {
        // 49 characters with a question mark: base 0.85 + 0.1.
        let result = eval("What did we decide about the authentication flow?").unwrap();
        assert_eq!(result.param_str("category"), Some("decision"));
        assert!((result.confidence - 0.95).abs() < 1e-9);

        let plain = eval("the retry approach looks odd").unwrap();
        assert_eq!(plain.param_str("category"), Some("architecture"));
        assert!((plain.confidence - 0.75).abs() < 1e-9);

        let long = eval("there is an error in the nightly import job when the upstream feed is empty").unwrap();
        assert_eq!(long.param_str("category"), Some("problem"));
        assert!((long.confidence - 0.80).abs() < 1e-9);
    }

    #[test]
    fn test_case_insensitive_match() {
        let result = eval("LAST TIME we touched the parser").unwrap();
        assert_eq!(result.param_str("category"), Some("memory"));
        assert_eq!(result.param_str("matched_pattern"), Some("LAST TIME"));
    }

    #[test]
    fn test_code_is_skipped() {
        assert!(eval("```rust\nfn main() {} // fix this bug\n```").is_none());
        let indented = "can you fix this\n    let x = parse();\n    x.unwrap()\n";
        assert!(eval(indented).is_none());
        // A single indented line in prose is still prose.
        assert!(eval("remember this:\n    the cache key changed").is_some());
    }

    #[test]
    fn test_no_keyword_no_trigger() {
        assert!(eval("please add a unit test for the tokenizer").is_none());
    }

    #[test]
    fn test_query_term_priority() {
        let terms = extract_query_terms(
            r#"Remember "token budget" and parseConfig in engine_state for Redis?"#,
        );
        assert_eq!(terms, vec!["token budget", "parseConfig", "engine_state", "Redis"]);
    }

    #[test]
    fn test_query_terms_single_quotes_and_cap() {
        let terms = extract_query_terms("recall 'alpha' Beta Gamma Delta Epsilon Zeta");
        assert_eq!(terms, vec!["alpha", "Beta", "Gamma", "Delta", "Epsilon"]);
        // Apostrophes inside words are not quotes.
        assert_eq!(extract_query_terms("don't recall Kafka's"), vec!["Kafka"]);
    }

    #[test]
    fn test_query_terms_fall_back_to_significant_words() {
        let terms = extract_query_terms("why did we choose that caching layer");
        assert_eq!(terms, vec!["choose", "caching", "layer"]);

        let result = eval("why did we choose that caching layer").unwrap();
        assert_eq!(result.param_str("query"), Some("choose caching layer"));
    }

    #[test]
    fn test_custom_keywords_replace_defaults() {
        let settings = DetectorSettings::enabled_at(2)
            .with_option("keywords", json!({"problem": ["\\bflaky\\b"]}));
        let detector = KeywordDetector::new(&settings).unwrap();

        let hit = detector.evaluate("the login test is flaky again", &context()).unwrap().unwrap();
        assert_eq!(hit.param_str("category"), Some("problem"));
        assert!(detector
            .evaluate("do you remember the login test", &context())
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_unknown_category_skipped_valid_ones_kept() {
        let settings = DetectorSettings::enabled_at(2).with_option(
            "keywords",
            json!({"feelings": ["\\bsad\\b"], "problem": ["\\bflaky\\b"]}),
        );
        let detector = KeywordDetector::new(&settings).unwrap();

        assert!(detector
            .evaluate("I am sad about the release", &context())
            .unwrap()
            .is_none());
        let hit = detector.evaluate("the login test is flaky", &context()).unwrap().unwrap();
        assert_eq!(hit.param_str("category"), Some("problem"));
    }

    #[test]
    fn test_bad_keyword_pattern_fails_construction() {
        let invalid = DetectorSettings::enabled_at(2)
            .with_option("keywords", json!({"memory": ["(unclosed"]}));
        assert!(matches!(KeywordDetector::new(&invalid), Err(CoreError::Pattern(_))));
    }
}
