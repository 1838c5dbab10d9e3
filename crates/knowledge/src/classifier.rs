//! Query classification.

use crate::error::ClassificationError;
use crate::prompting::{query_variables, strip_code_fence, PromptRunner};
use crate::types::{Intent, Query};
use async_trait::async_trait;

/// Maps a query to an [`Intent`].
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, query: &Query) -> Result<Intent, ClassificationError>;
}

/// Classifier backed by the `router.classify` prompt.
///
/// Makes exactly one LLM call per query and never retries.
pub struct LlmClassifier {
    runner: PromptRunner,
}

impl LlmClassifier {
    pub fn new(runner: PromptRunner) -> Self {
        Self {
            runner: runner.with_max_tokens(16),
        }
    }
}

#[async_trait]
impl Classifier for LlmClassifier {
    async fn classify(&self, query: &Query) -> Result<Intent, ClassificationError> {
        let reply = self.runner.run(query_variables(query.text(), None)).await?;
        let intent = parse_intent(&reply);

        tracing::debug!("Classifier replied {:?}, parsed as '{}'", reply.trim(), intent);
        Ok(intent)
    }
}

/// Parse a classifier reply leniently.
///
/// Accepts `{"intent": "faq"}` or free text; the first token naming an
/// intent wins. Anything else is `Unknown`.
pub fn parse_intent(reply: &str) -> Intent {
    let body = strip_code_fence(reply);

    if let Ok(serde_json::Value::Object(map)) = serde_json::from_str::<serde_json::Value>(body) {
        return ["intent", "label", "category"]
            .iter()
            .find_map(|key| map.get(*key).and_then(|v| v.as_str()))
            .and_then(Intent::from_label)
            .unwrap_or(Intent::Unknown);
    }

    body.split(|c: char| !c.is_ascii_alphabetic())
        .find_map(Intent::from_label)
        .unwrap_or(Intent::Unknown)
}

const CATALOG_KEYWORDS: &[&str] = &[
    "price", "prices", "cost", "costs", "buy", "stock", "in stock", "available", "availability",
    "spec", "specs", "specifications", "product", "products", "model", "models", "compatible",
    "sell", "size", "color", "colour", "how much",
];

const FAQ_KEYWORDS: &[&str] = &[
    "return", "returns", "refund", "refunds", "shipping", "delivery", "policy", "warranty",
    "account", "payment", "pay", "exchange", "cancel", "track", "hours", "store",
];

const TROUBLESHOOTING_KEYWORDS: &[&str] = &[
    "not working", "won't", "doesn't", "does not", "can't", "cannot", "broken", "error",
    "crash", "crashes", "fix", "reset", "drains", "overheating", "overheats", "slow", "issue",
    "problem", "fails", "failed", "stuck", "freezes", "turn on", "no power",
];

/// Offline classifier that counts keyword hits per intent.
///
/// Zero hits, or a tie for the top score, yields `Unknown`.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeywordClassifier;

impl KeywordClassifier {
    pub fn classify_text(&self, text: &str) -> Intent {
        let normalized: String = text
            .to_lowercase()
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '\'' { c } else { ' ' })
            .collect();
        let padded = format!(" {} ", normalized.split_whitespace().collect::<Vec<_>>().join(" "));

        let hits = |keywords: &[&str]| {
            keywords
                .iter()
                .filter(|kw| padded.contains(&format!(" {} ", kw)))
                .count()
        };

        let scores = [
            (Intent::Catalog, hits(CATALOG_KEYWORDS)),
            (Intent::Faq, hits(FAQ_KEYWORDS)),
            (Intent::Troubleshooting, hits(TROUBLESHOOTING_KEYWORDS)),
        ];

        let best = scores.iter().map(|(_, n)| *n).max().unwrap_or(0);
        let mut leaders = scores.iter().filter(|(_, n)| *n == best && best > 0);

        match (leaders.next(), leaders.next()) {
            (Some((intent, _)), None) => *intent,
            _ => Intent::Unknown,
        }
    }
}

#[async_trait]
impl Classifier for KeywordClassifier {
    async fn classify(&self, query: &Query) -> Result<Intent, ClassificationError> {
        Ok(self.classify_text(query.text()))
    }
}
