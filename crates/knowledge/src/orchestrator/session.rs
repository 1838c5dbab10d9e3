//! Per-query session state and the report handed back to callers.

use crate::types::{Answer, AttemptSource, Document, GradeResult, Intent, Query, RetrievalAttempt};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// Mutable record of one orchestrator run. Owned by that run only.
#[derive(Debug)]
pub struct Session {
    id: Uuid,
    query: Query,
    started_at: DateTime<Utc>,
    classified_intent: Option<Intent>,
    intent_history: Vec<Intent>,
    attempts: Vec<RetrievalAttempt>,
    retries: u32,
    web_fallback_attempted: bool,
}

impl Session {
    pub fn new(query: Query) -> Self {
        Self {
            id: Uuid::new_v4(),
            query,
            started_at: Utc::now(),
            classified_intent: None,
            intent_history: Vec::new(),
            attempts: Vec::new(),
            retries: 0,
            web_fallback_attempted: false,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn attempts(&self) -> &[RetrievalAttempt] {
        &self.attempts
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn web_fallback_attempted(&self) -> bool {
        self.web_fallback_attempted
    }

    /// Intent of the most recent collection retrieval.
    pub fn current_intent(&self) -> Option<Intent> {
        self.intent_history.last().copied()
    }

    pub(crate) fn set_classified_intent(&mut self, intent: Intent) {
        self.classified_intent = Some(intent);
    }

    pub(crate) fn begin_retrieval(&mut self, intent: Intent) {
        self.intent_history.push(intent);
    }

    pub(crate) fn consume_retry(&mut self) {
        self.retries += 1;
    }

    pub(crate) fn mark_web_fallback(&mut self) {
        self.web_fallback_attempted = true;
    }

    pub(crate) fn record_attempt(
        &mut self,
        source: AttemptSource,
        documents: Vec<Document>,
        grade: GradeResult,
    ) -> &RetrievalAttempt {
        self.attempts.push(RetrievalAttempt {
            ordinal: self.attempts.len() + 1,
            source,
            documents,
            grade,
            graded_at: Utc::now(),
        });
        &self.attempts[self.attempts.len() - 1]
    }

    /// Documents of every sufficient attempt, first occurrence wins.
    pub fn accepted_documents(&self) -> Vec<Document> {
        let mut seen = HashSet::new();
        self.attempts
            .iter()
            .filter(|a| a.grade.sufficient)
            .flat_map(|a| a.documents.iter())
            .filter(|d| seen.insert(d.id.as_str()))
            .cloned()
            .collect()
    }

    pub(crate) fn finish(self, answer: Answer) -> SessionReport {
        let elapsed = Utc::now().signed_duration_since(self.started_at);

        SessionReport {
            session_id: self.id,
            query: self.query,
            classified_intent: self.classified_intent,
            intent_history: self.intent_history,
            answer,
            attempts: self.attempts,
            retries: self.retries,
            web_fallback_attempted: self.web_fallback_attempted,
            started_at: self.started_at,
            elapsed_ms: elapsed.num_milliseconds().max(0) as u64,
        }
    }
}

/// Outcome of a completed session: the answer plus its audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionReport {
    pub session_id: Uuid,
    pub query: Query,
    pub classified_intent: Option<Intent>,
    pub intent_history: Vec<Intent>,
    pub answer: Answer,
    pub attempts: Vec<RetrievalAttempt>,
    pub retries: u32,
    pub web_fallback_attempted: bool,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}
