//! Fixed-substring classification of agent output lines.

use serde::{Deserialize, Serialize};

/// Signal extracted from a single output line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    NoAssistant,
    ProviderError,
    /// Carries the full line so the scheduler can look for a reset hint.
    RateLimit(String),
}

/// Substring triggers, matched case-sensitively.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierPatterns {
    pub no_assistant: Vec<String>,
    pub provider_error: Vec<String>,
    pub rate_limit: Vec<String>,
}

impl Default for ClassifierPatterns {
    fn default() -> Self {
        Self {
            no_assistant: vec!["No messages returned".to_string()],
            provider_error: vec![
                "API Error: 500".to_string(),
                "API Error: 529".to_string(),
                "overloaded_error".to_string(),
            ],
            rate_limit: vec!["limit reached".to_string(), "rate_limit_error".to_string()],
        }
    }
}

/// Line classifier. Stateless apart from its pattern lists.
#[derive(Debug, Clone, Default)]
pub struct Classifier {
    patterns: ClassifierPatterns,
}

impl Classifier {
    pub fn new(patterns: ClassifierPatterns) -> Self {
        Self { patterns }
    }

    /// Classify one line.
    ///
    /// Order is no-assistant, provider-error, rate-limit; the first hit wins.
    pub fn classify(&self, line: &str) -> Option<Signal> {
        if contains_any(line, &self.patterns.no_assistant) {
            return Some(Signal::NoAssistant);
        }
        if contains_any(line, &self.patterns.provider_error) {
            return Some(Signal::ProviderError);
        }
        if contains_any(line, &self.patterns.rate_limit) {
            return Some(Signal::RateLimit(line.trim().to_string()));
        }
        None
    }
}

fn contains_any(line: &str, patterns: &[String]) -> bool {
    patterns
        .iter()
        .any(|pattern| !pattern.is_empty() && line.contains(pattern.as_str()))
}
