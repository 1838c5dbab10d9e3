//! Retrieval orchestrator.
//!
//! Drives one query through classification, routed retrieval, grading,
//! escalation, an optional web fallback and synthesis:
//!
//! ```text
//! Classifying -> Retrieving -> Grading -> Synthesizing -> Done
//!                    ^            |  \
//!                    |            v   +-> WebFallback -> Grading
//!                    +------ Escalating
//! ```
//!
//! Each external call runs under its own deadline. Recoverable failures
//! (classifier, grader, web search) are logged and turned into branches;
//! store and synthesis failures end the session with a [`SessionError`].

pub mod session;
pub mod state;

#[cfg(test)]
mod testing;

pub use session::{Session, SessionReport};
pub use state::{Phase, State};

use crate::classifier::Classifier;
use crate::config::RetrievalConfig;
use crate::error::{SessionError, StoreUnavailable, TimedOut};
use crate::grader::Grader;
use crate::store::Retriever;
use crate::synthesizer::{top_ranked, Synthesizer};
use crate::types::{Answer, AttemptSource, Document, GradeResult, Intent, Query, WEB_COLLECTION};
use crate::web::WebSearch;
use state::{AfterGrade, Escalation, GradeOutcome, PendingBatch};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

/// Sequences the retrieval components for one query at a time.
///
/// Components are shared; an orchestrator can serve concurrent sessions.
pub struct Orchestrator {
    config: RetrievalConfig,
    classifier: Arc<dyn Classifier>,
    retriever: Arc<dyn Retriever>,
    grader: Arc<dyn Grader>,
    synthesizer: Arc<dyn Synthesizer>,
    web: Option<Arc<dyn WebSearch>>,
}

impl Orchestrator {
    pub fn new(
        config: RetrievalConfig,
        classifier: Arc<dyn Classifier>,
        retriever: Arc<dyn Retriever>,
        grader: Arc<dyn Grader>,
        synthesizer: Arc<dyn Synthesizer>,
    ) -> Self {
        Self {
            config,
            classifier,
            retriever,
            grader,
            synthesizer,
            web: None,
        }
    }

    /// Enable the web fallback tier.
    pub fn with_web_search(mut self, web: Arc<dyn WebSearch>) -> Self {
        self.web = Some(web);
        self
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    fn web_enabled(&self) -> bool {
        self.config.web_search.enabled && self.web.is_some()
    }

    /// Answer one query.
    pub async fn run(&self, query: Query) -> Result<SessionReport, SessionError> {
        self.run_with_cancellation(query, CancellationToken::new())
            .await
    }

    /// Answer one query, abandoning it as soon as `cancel` fires.
    ///
    /// The in-flight component call is dropped and the session discarded.
    pub async fn run_with_cancellation(
        &self,
        query: Query,
        cancel: CancellationToken,
    ) -> Result<SessionReport, SessionError> {
        let mut session = Session::new(query);
        let span = tracing::info_span!(
            "session",
            id = %session.id(),
            turn = session.query().turn_id()
        );

        async move {
            info!(query = session.query().text(), "Session started");
            let mut state = State::Classifying;

            loop {
                let current = match state {
                    State::Done(answer) => {
                        let report = session.finish(answer);
                        info!(
                            attempts = report.attempts.len(),
                            retries = report.retries,
                            grounded = report.answer.grounded,
                            elapsed_ms = report.elapsed_ms,
                            "Session finished"
                        );
                        return Ok(report);
                    }
                    current => current,
                };

                let phase = current.phase();
                let next = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        info!("Session cancelled while {}", phase);
                        return Err(SessionError::Cancelled { state: phase });
                    }
                    next = self.step(current, &mut session) => next?,
                };

                debug!(from = %phase, to = %next.phase(), "State transition");
                state = next;
            }
        }
        .instrument(span)
        .await
    }

    async fn step(&self, state: State, session: &mut Session) -> Result<State, SessionError> {
        Ok(match state {
            State::Classifying => self.classify(session).await,
            State::Retrieving(intent) => self.retrieve(intent, session).await?,
            State::Grading(batch) => self.grade(batch, session).await,
            State::Escalating => self.escalate(session),
            State::WebFallback => self.web_fallback(session).await,
            State::Synthesizing => self.synthesize(session).await?,
            State::Done(answer) => State::Done(answer),
        })
    }

    async fn classify(&self, session: &mut Session) -> State {
        let limit = self.config.timeouts.classifier();

        let intent = match with_timeout(limit, self.classifier.classify(session.query())).await {
            Ok(intent) => intent,
            Err(e) => {
                warn!("Classifier unavailable, routing as '{}': {}", Intent::Unknown, e);
                Intent::Unknown
            }
        };

        debug!("Classified query as '{}'", intent);
        session.set_classified_intent(intent);
        State::Retrieving(intent)
    }

    async fn retrieve(&self, intent: Intent, session: &mut Session) -> Result<State, SessionError> {
        session.begin_retrieval(intent);

        let limit = self.config.timeouts.retriever();
        let call = self
            .retriever
            .retrieve(intent, session.query(), self.config.top_k);

        let names = self.retriever.collections_for(intent);
        let documents = match tokio::time::timeout(limit, call).await {
            Ok(Ok(documents)) => documents,
            Ok(Err(source)) => return Err(store_failure(source)),
            Err(_) => {
                let collection = match names.as_slice() {
                    [only] => Some(only.clone()),
                    _ => None,
                };
                return Err(store_failure(StoreUnavailable::timed_out(
                    intent, collection, limit,
                )));
            }
        };

        let allowed: HashSet<String> = names.into_iter().collect();
        let documents = keep_owned(documents, self.config.top_k, |c| allowed.contains(c));

        Ok(State::Grading(PendingBatch {
            source: AttemptSource::Collection(intent),
            documents,
        }))
    }

    async fn grade(&self, batch: PendingBatch, session: &mut Session) -> State {
        let grade = self
            .grade_with_retry(session.query(), &batch.documents)
            .await;
        let sufficient = grade.sufficient;

        let attempt = session.record_attempt(batch.source, batch.documents, grade);
        debug!(
            ordinal = attempt.ordinal,
            source = %attempt.source,
            documents = attempt.documents.len(),
            sufficient,
            "Attempt graded: {}",
            attempt.grade.rationale
        );
        debug_assert!(session.attempts().len() <= self.config.max_attempts());

        let next = state::after_grading(GradeOutcome {
            source: batch.source,
            sufficient,
            retries: session.retries(),
            max_retries: self.config.max_retries,
            web_attempted: session.web_fallback_attempted(),
            web_enabled: self.web_enabled(),
        });

        match next {
            AfterGrade::Synthesize => State::Synthesizing,
            AfterGrade::Escalate => State::Escalating,
            AfterGrade::WebFallback => State::WebFallback,
        }
    }

    /// Grade a batch, retrying once after the configured backoff.
    ///
    /// A second failure grades the batch insufficient.
    async fn grade_with_retry(&self, query: &Query, documents: &[Document]) -> GradeResult {
        if documents.is_empty() {
            return GradeResult::empty_batch();
        }

        let limit = self.config.timeouts.grader();

        match with_timeout(limit, self.grader.grade(query, documents)).await {
            Ok(grade) => return grade,
            Err(e) => warn!(
                "Grader failed, retrying in {}ms: {}",
                self.config.grader_backoff_ms, e
            ),
        }

        tokio::time::sleep(self.config.grader_backoff()).await;

        match with_timeout(limit, self.grader.grade(query, documents)).await {
            Ok(grade) => grade,
            Err(e) => {
                warn!("Grader failed twice, treating batch as insufficient: {}", e);
                GradeResult::insufficient(format!("grader unavailable: {}", e))
            }
        }
    }

    fn escalate(&self, session: &mut Session) -> State {
        let failed = session.current_intent().unwrap_or(Intent::Unknown);

        match state::escalate(failed, self.config.after_unknown) {
            Escalation::Retrieve(intent) => {
                session.consume_retry();
                debug!(
                    retry = session.retries(),
                    "Escalating from '{}' to '{}'", failed, intent
                );
                State::Retrieving(intent)
            }
            Escalation::WebFallback if self.web_enabled() && !session.web_fallback_attempted() => {
                State::WebFallback
            }
            Escalation::WebFallback => State::Synthesizing,
        }
    }

    async fn web_fallback(&self, session: &mut Session) -> State {
        session.mark_web_fallback();

        let Some(web) = self.web.as_ref().filter(|_| self.config.web_search.enabled) else {
            return State::Synthesizing;
        };

        let limit = self.config.timeouts.web_search();
        let documents =
            match with_timeout(limit, web.search(session.query(), self.config.top_k)).await {
                Ok(documents) => {
                    keep_owned(documents, self.config.top_k, |c| c == WEB_COLLECTION)
                }
                Err(e) => {
                    warn!("Web search failed, continuing without web results: {}", e);
                    Vec::new()
                }
            };

        State::Grading(PendingBatch {
            source: AttemptSource::WebFallback,
            documents,
        })
    }

    async fn synthesize(&self, session: &mut Session) -> Result<State, SessionError> {
        let accepted = session.accepted_documents();
        let limit = self.config.timeouts.synthesizer();

        let answer = with_timeout(limit, self.synthesizer.synthesize(session.query(), &accepted))
            .await
            .map_err(|source| SessionError::Synthesis {
                state: Phase::Synthesizing,
                source,
            })?;

        Ok(State::Done(restrict_citations(answer, &accepted)))
    }
}

fn store_failure(source: StoreUnavailable) -> SessionError {
    tracing::error!("Retrieval aborted: {}", source);
    SessionError::StoreUnavailable {
        state: Phase::Retrieving,
        source,
    }
}

/// Run `call` under `limit`, mapping an elapsed deadline to the call's error.
async fn with_timeout<T, E, F>(limit: Duration, call: F) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    E: TimedOut,
{
    tokio::time::timeout(limit, call)
        .await
        .unwrap_or_else(|_| Err(E::timed_out(limit)))
}

/// Drop documents from collections the attempt may not read, then cap at `k`.
fn keep_owned(
    documents: Vec<Document>,
    k: usize,
    allowed: impl Fn(&str) -> bool,
) -> Vec<Document> {
    let total = documents.len();
    let mut kept: Vec<Document> = documents
        .into_iter()
        .filter(|d| allowed(&d.collection))
        .collect();

    if kept.len() < total {
        warn!(
            "Discarded {} documents from collections outside this attempt",
            total - kept.len()
        );
    }

    kept.truncate(k);
    kept
}

/// Keep only citations of accepted documents.
fn restrict_citations(answer: Answer, accepted: &[Document]) -> Answer {
    if accepted.is_empty() {
        if answer.grounded || !answer.citations.is_empty() {
            warn!("Synthesizer claimed grounding without accepted documents");
            return Answer::insufficient();
        }
        return answer;
    }

    if !answer.grounded {
        return Answer {
            citations: Vec::new(),
            ..answer
        };
    }

    let known: HashSet<&str> = accepted.iter().map(|d| d.id.as_str()).collect();
    let mut seen = HashSet::new();
    let mut citations: Vec<String> = answer
        .citations
        .iter()
        .filter(|id| known.contains(id.as_str()) && seen.insert(id.as_str()))
        .cloned()
        .collect();

    if citations.len() < answer.citations.len() {
        debug!(
            "Stripped {} citations outside the accepted documents",
            answer.citations.len() - citations.len()
        );
    }
    if citations.is_empty() {
        citations.extend(top_ranked(accepted).map(|d| d.id.clone()));
    }

    Answer {
        citations,
        ..answer
    }
}
