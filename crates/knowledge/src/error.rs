//! Retrieval component and session errors.

use crate::orchestrator::state::Phase;
use crate::types::Intent;
use concierge_core::AppError;
use std::time::Duration;
use thiserror::Error;

/// Why a component call failed.
#[derive(Debug, Error)]
pub enum Cause {
    #[error(transparent)]
    Call(#[from] AppError),

    #[error("timed out after {}ms", .0.as_millis())]
    Timeout(Duration),
}

/// Built from an elapsed deadline.
pub trait TimedOut {
    fn timed_out(limit: Duration) -> Self;
}

macro_rules! component_error {
    ($(#[$meta:meta])* $name:ident, $msg:tt) => {
        $(#[$meta])*
        #[derive(Debug, Error)]
        #[error($msg)]
        pub struct $name(#[source] pub Cause);

        impl From<AppError> for $name {
            fn from(err: AppError) -> Self {
                Self(Cause::Call(err))
            }
        }

        impl TimedOut for $name {
            fn timed_out(limit: Duration) -> Self {
                Self(Cause::Timeout(limit))
            }
        }
    };
}

component_error!(
    /// The classifier could not produce a label.
    ClassificationError,
    "classification failed: {0}"
);
component_error!(
    /// The grader call failed or timed out.
    GraderFailure,
    "grading failed: {0}"
);
component_error!(
    /// The web search provider failed.
    WebSearchFailure,
    "web search failed: {0}"
);
component_error!(
    /// The synthesizer could not produce an answer.
    SynthesisFailure,
    "answer synthesis failed: {0}"
);

/// The vector store backend could not be reached.
#[derive(Debug, Error)]
#[error(
    "store unavailable for intent '{intent}' (collection {}): {cause}",
    .collection.as_deref().unwrap_or("*")
)]
pub struct StoreUnavailable {
    pub intent: Intent,
    /// Collection being queried, `None` when the failure was not collection-specific
    pub collection: Option<String>,
    #[source]
    pub cause: Cause,
}

impl StoreUnavailable {
    pub fn new(intent: Intent, collection: Option<String>, err: AppError) -> Self {
        Self {
            intent,
            collection,
            cause: Cause::Call(err),
        }
    }

    pub fn timed_out(intent: Intent, collection: Option<String>, limit: Duration) -> Self {
        Self {
            intent,
            collection,
            cause: Cause::Timeout(limit),
        }
    }
}

/// Fatal outcome of a retrieval session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("could not search the knowledge base while {state}: {source}")]
    StoreUnavailable {
        state: Phase,
        #[source]
        source: StoreUnavailable,
    },

    #[error("could not compose an answer while {state}: {source}")]
    Synthesis {
        state: Phase,
        #[source]
        source: SynthesisFailure,
    },

    #[error("session cancelled while {state}")]
    Cancelled { state: Phase },
}

impl SessionError {
    /// State the session was in when it ended.
    pub fn state(&self) -> Phase {
        match self {
            SessionError::StoreUnavailable { state, .. }
            | SessionError::Synthesis { state, .. }
            | SessionError::Cancelled { state } => *state,
        }
    }

    /// Intent and collection involved, for store failures.
    pub fn store_target(&self) -> Option<(Intent, Option<&str>)> {
        match self {
            SessionError::StoreUnavailable { source, .. } => {
                Some((source.intent, source.collection.as_deref()))
            }
            _ => None,
        }
    }
}

impl From<SessionError> for AppError {
    fn from(err: SessionError) -> Self {
        AppError::Retrieval(err.to_string())
    }
}
