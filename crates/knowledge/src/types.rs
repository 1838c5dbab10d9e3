//! Core retrieval types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Collection tag carried by documents that came from web search.
pub const WEB_COLLECTION: &str = "web";

/// A user question, immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    turn_id: Option<String>,
}

impl Query {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            turn_id: None,
        }
    }

    /// Attach a conversation turn identifier.
    pub fn with_turn_id(mut self, turn_id: impl Into<String>) -> Self {
        self.turn_id = Some(turn_id.into());
        self
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn turn_id(&self) -> Option<&str> {
        self.turn_id.as_deref()
    }
}

/// Category a query is routed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    Catalog,
    Faq,
    Troubleshooting,
    Unknown,
}

impl Intent {
    /// Intents that map to exactly one collection.
    pub const SPECIFIC: [Intent; 3] = [Intent::Catalog, Intent::Faq, Intent::Troubleshooting];

    /// Parse a classifier label. Returns `None` for labels that name no intent.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "catalog" | "product" | "products" => Some(Intent::Catalog),
            "faq" | "faqs" => Some(Intent::Faq),
            "troubleshooting" | "support" => Some(Intent::Troubleshooting),
            "unknown" => Some(Intent::Unknown),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Catalog => "catalog",
            Intent::Faq => "faq",
            Intent::Troubleshooting => "troubleshooting",
            Intent::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A retrieved unit of content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Stable identifier, unique within its collection
    pub id: String,

    /// Text body
    pub text: String,

    /// Collection the document was read from (`web` for web results)
    pub collection: String,

    /// Similarity score in [0.0, 1.0]
    pub score: f32,

    /// Free-form metadata (row fields, title, url)
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Where the documents of an attempt came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "intent", rename_all = "snake_case")]
pub enum AttemptSource {
    Collection(Intent),
    WebFallback,
}

impl fmt::Display for AttemptSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptSource::Collection(intent) => write!(f, "collection:{}", intent),
            AttemptSource::WebFallback => f.write_str("web"),
        }
    }
}

/// Verdict of the relevance grader over a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GradeResult {
    pub sufficient: bool,
    pub rationale: String,
}

impl GradeResult {
    pub fn sufficient(rationale: impl Into<String>) -> Self {
        Self {
            sufficient: true,
            rationale: rationale.into(),
        }
    }

    pub fn insufficient(rationale: impl Into<String>) -> Self {
        Self {
            sufficient: false,
            rationale: rationale.into(),
        }
    }

    /// Verdict for a batch with no documents.
    pub fn empty_batch() -> Self {
        Self::insufficient("no documents retrieved")
    }
}

/// One retrieval pass and its grade. Immutable once recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalAttempt {
    /// 1-based position within the session
    pub ordinal: usize,
    pub source: AttemptSource,
    pub documents: Vec<Document>,
    pub grade: GradeResult,
    pub graded_at: DateTime<Utc>,
}

/// Final answer returned to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub text: String,
    /// Ids of the documents the answer relies on
    pub citations: Vec<String>,
    /// False when no accepted evidence backs the answer
    pub grounded: bool,
}

impl Answer {
    /// The explicit "insufficient information" answer.
    pub fn insufficient() -> Self {
        Self {
            text: "I could not find enough information to answer that question.".to_string(),
            citations: Vec::new(),
            grounded: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intent_labels() {
        assert_eq!(Intent::from_label("FAQ"), Some(Intent::Faq));
        assert_eq!(Intent::from_label(" products "), Some(Intent::Catalog));
        assert_eq!(Intent::from_label("support"), Some(Intent::Troubleshooting));
        assert_eq!(Intent::from_label("unknown"), Some(Intent::Unknown));
        assert_eq!(Intent::from_label("weather"), None);
    }

    #[test]
    fn test_intent_serde_is_lowercase() {
        let json = serde_json::to_string(&Intent::Troubleshooting).unwrap();
        assert_eq!(json, "\"troubleshooting\"");

        let intent: Intent = serde_yaml::from_str("faq").unwrap();
        assert_eq!(intent, Intent::Faq);
    }

    #[test]
    fn test_query_turn_id() {
        let query = Query::new("where is my order").with_turn_id("t-1");
        assert_eq!(query.text(), "where is my order");
        assert_eq!(query.turn_id(), Some("t-1"));
    }

    #[test]
    fn test_empty_batch_is_insufficient() {
        assert!(!GradeResult::empty_batch().sufficient);
    }

    #[test]
    fn test_attempt_source_display() {
        assert_eq!(
            AttemptSource::Collection(Intent::Faq).to_string(),
            "collection:faq"
        );
        assert_eq!(AttemptSource::WebFallback.to_string(), "web");
    }
}
