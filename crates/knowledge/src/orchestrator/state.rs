//! Orchestrator states and the escalation policy.
//!
//! Everything here is pure: the orchestrator performs the I/O for a state and
//! asks these functions where to go next.

use crate::config::AfterUnknown;
use crate::types::{Answer, AttemptSource, Document, Intent};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Payload-free state name, used in errors and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Classifying,
    Retrieving,
    Grading,
    Escalating,
    WebFallback,
    Synthesizing,
    Done,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Classifying => "classifying",
            Phase::Retrieving => "retrieving",
            Phase::Grading => "grading",
            Phase::Escalating => "escalating",
            Phase::WebFallback => "searching the web",
            Phase::Synthesizing => "synthesizing",
            Phase::Done => "done",
        })
    }
}

/// A batch waiting for its grade.
#[derive(Debug, Clone)]
pub struct PendingBatch {
    pub source: AttemptSource,
    pub documents: Vec<Document>,
}

/// Orchestrator state with the data each step needs.
#[derive(Debug, Clone)]
pub enum State {
    Classifying,
    Retrieving(Intent),
    Grading(PendingBatch),
    Escalating,
    WebFallback,
    Synthesizing,
    Done(Answer),
}

impl State {
    pub fn phase(&self) -> Phase {
        match self {
            State::Classifying => Phase::Classifying,
            State::Retrieving(_) => Phase::Retrieving,
            State::Grading(_) => Phase::Grading,
            State::Escalating => Phase::Escalating,
            State::WebFallback => Phase::WebFallback,
            State::Synthesizing => Phase::Synthesizing,
            State::Done(_) => Phase::Done,
        }
    }
}

/// Where a graded batch sends the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AfterGrade {
    Synthesize,
    Escalate,
    WebFallback,
}

/// Inputs to the post-grading decision.
#[derive(Debug, Clone, Copy)]
pub struct GradeOutcome {
    pub source: AttemptSource,
    pub sufficient: bool,
    pub retries: u32,
    pub max_retries: u32,
    pub web_attempted: bool,
    pub web_enabled: bool,
}

/// Decide the state that follows a graded batch.
///
/// A sufficient batch, or the web batch whatever its verdict, goes to
/// synthesis. Otherwise retries are spent first, then the web.
pub fn after_grading(outcome: GradeOutcome) -> AfterGrade {
    if outcome.sufficient || outcome.source == AttemptSource::WebFallback {
        return AfterGrade::Synthesize;
    }
    if outcome.retries < outcome.max_retries {
        return AfterGrade::Escalate;
    }
    if outcome.web_enabled && !outcome.web_attempted {
        return AfterGrade::WebFallback;
    }
    AfterGrade::Synthesize
}

/// Result of escalating away from a failed collection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Escalation {
    /// Retrieve again with this intent (consumes one retry)
    Retrieve(Intent),
    /// Skip the remaining budget and search the web
    WebFallback,
}

/// Escalation order: a specific intent widens to `Unknown`; after `Unknown`
/// the policy decides between the web and another broad retrieval.
pub fn escalate(failed: Intent, policy: AfterUnknown) -> Escalation {
    match (failed, policy) {
        (Intent::Unknown, AfterUnknown::WebFallback) => Escalation::WebFallback,
        _ => Escalation::Retrieve(Intent::Unknown),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(source: AttemptSource, sufficient: bool, retries: u32) -> GradeOutcome {
        GradeOutcome {
            source,
            sufficient,
            retries,
            max_retries: 2,
            web_attempted: false,
            web_enabled: true,
        }
    }

    const FAQ: AttemptSource = AttemptSource::Collection(Intent::Faq);

    #[test]
    fn test_sufficient_goes_to_synthesis() {
        assert_eq!(after_grading(outcome(FAQ, true, 0)), AfterGrade::Synthesize);
    }

    #[test]
    fn test_insufficient_with_budget_escalates() {
        assert_eq!(after_grading(outcome(FAQ, false, 0)), AfterGrade::Escalate);
        assert_eq!(after_grading(outcome(FAQ, false, 1)), AfterGrade::Escalate);
    }

    #[test]
    fn test_exhausted_budget_falls_back_to_web_once() {
        assert_eq!(after_grading(outcome(FAQ, false, 2)), AfterGrade::WebFallback);

        let attempted = GradeOutcome {
            web_attempted: true,
            ..outcome(FAQ, false, 2)
        };
        assert_eq!(after_grading(attempted), AfterGrade::Synthesize);

        let disabled = GradeOutcome {
            web_enabled: false,
            ..outcome(FAQ, false, 2)
        };
        assert_eq!(after_grading(disabled), AfterGrade::Synthesize);
    }

    #[test]
    fn test_web_batch_always_synthesizes() {
        let web = outcome(AttemptSource::WebFallback, false, 0);
        assert_eq!(after_grading(web), AfterGrade::Synthesize);
    }

    #[test]
    fn test_zero_budget_goes_straight_to_web() {
        let no_retries = GradeOutcome {
            max_retries: 0,
            ..outcome(FAQ, false, 0)
        };
        assert_eq!(after_grading(no_retries), AfterGrade::WebFallback);
    }

    #[test]
    fn test_escalation_order() {
        for intent in Intent::SPECIFIC {
            assert_eq!(
                escalate(intent, AfterUnknown::WebFallback),
                Escalation::Retrieve(Intent::Unknown)
            );
        }
        assert_eq!(
            escalate(Intent::Unknown, AfterUnknown::WebFallback),
            Escalation::WebFallback
        );
        assert_eq!(
            escalate(Intent::Unknown, AfterUnknown::RetryUnknown),
            Escalation::Retrieve(Intent::Unknown)
        );
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(State::Retrieving(Intent::Faq).phase().to_string(), "retrieving");
        assert_eq!(Phase::WebFallback.to_string(), "searching the web");
    }
}
