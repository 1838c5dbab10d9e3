//! In-memory component doubles for exercising the state machine.

use crate::classifier::Classifier;
use crate::config::{RetrievalConfig, Timeouts};
use crate::error::{
    ClassificationError, GraderFailure, StoreUnavailable, SynthesisFailure, WebSearchFailure,
};
use crate::grader::Grader;
use crate::store::Retriever;
use crate::synthesizer::Synthesizer;
use crate::types::{Answer, Document, GradeResult, Intent, Query, WEB_COLLECTION};
use crate::web::WebSearch;
use async_trait::async_trait;
use concierge_core::AppError;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub fn doc(id: &str, collection: &str, score: f32) -> Document {
    Document {
        id: id.to_string(),
        text: format!("{} document {}", collection, id),
        collection: collection.to_string(),
        score,
        metadata: serde_json::Value::Null,
    }
}

pub fn web_doc(id: &str, score: f32) -> Document {
    doc(id, WEB_COLLECTION, score)
}

/// Defaults with short deadlines so failing paths finish quickly.
pub fn fast_config() -> RetrievalConfig {
    RetrievalConfig {
        grader_backoff_ms: 1,
        timeouts: Timeouts {
            classifier_ms: 200,
            retriever_ms: 200,
            grader_ms: 200,
            web_search_ms: 200,
            synthesizer_ms: 200,
        },
        ..Default::default()
    }
}

fn collection_name(intent: Intent) -> &'static str {
    match intent {
        Intent::Catalog => "product_catalog",
        Intent::Faq => "faq",
        Intent::Troubleshooting => "troubleshooting",
        Intent::Unknown => "*",
    }
}

fn owned(ids: &[&str]) -> Vec<String> {
    ids.iter().map(|s| s.to_string()).collect()
}

async fn hang() {
    tokio::time::sleep(Duration::from_secs(3600)).await;
}

pub enum ClassifierBehavior {
    Returns(Intent),
    Fails,
    Hangs,
}

pub struct FakeClassifier {
    behavior: ClassifierBehavior,
    pub calls: AtomicUsize,
}

impl FakeClassifier {
    pub fn returning(intent: Intent) -> Self {
        Self::with(ClassifierBehavior::Returns(intent))
    }

    pub fn failing() -> Self {
        Self::with(ClassifierBehavior::Fails)
    }

    pub fn hanging() -> Self {
        Self::with(ClassifierBehavior::Hangs)
    }

    fn with(behavior: ClassifierBehavior) -> Self {
        Self {
            behavior,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Classifier for FakeClassifier {
    async fn classify(&self, _query: &Query) -> Result<Intent, ClassificationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            ClassifierBehavior::Returns(intent) => Ok(intent),
            ClassifierBehavior::Fails => Err(AppError::Llm("model offline".to_string()).into()),
            ClassifierBehavior::Hangs => {
                hang().await;
                Ok(Intent::Unknown)
            }
        }
    }
}

/// Serves fixed documents per intent, with the default routing table.
#[derive(Default)]
pub struct FakeRetriever {
    documents: HashMap<Intent, Vec<Document>>,
    failing: HashSet<Intent>,
    hanging: HashSet<Intent>,
    pub calls: Mutex<Vec<Intent>>,
}

impl FakeRetriever {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, intent: Intent, documents: Vec<Document>) -> Self {
        self.documents.insert(intent, documents);
        self
    }

    pub fn failing_for(mut self, intent: Intent) -> Self {
        self.failing.insert(intent);
        self
    }

    pub fn hanging_for(mut self, intent: Intent) -> Self {
        self.hanging.insert(intent);
        self
    }

    pub fn calls(&self) -> Vec<Intent> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Retriever for FakeRetriever {
    async fn retrieve(
        &self,
        intent: Intent,
        _query: &Query,
        k: usize,
    ) -> Result<Vec<Document>, StoreUnavailable> {
        self.calls.lock().unwrap().push(intent);

        if self.hanging.contains(&intent) {
            hang().await;
        }
        if self.failing.contains(&intent) {
            return Err(StoreUnavailable::new(
                intent,
                Some(collection_name(intent).to_string()),
                AppError::Store("connection refused".to_string()),
            ));
        }

        let mut documents = self.documents.get(&intent).cloned().unwrap_or_default();
        documents.truncate(k);
        Ok(documents)
    }

    fn collections_for(&self, intent: Intent) -> Vec<String> {
        match intent {
            Intent::Unknown => Intent::SPECIFIC
                .iter()
                .map(|i| collection_name(*i).to_string())
                .collect(),
            specific => vec![collection_name(specific).to_string()],
        }
    }
}

type Acceptance = Box<dyn Fn(&[Document]) -> bool + Send + Sync>;

pub struct FakeGrader {
    accept: Acceptance,
    failures_left: AtomicUsize,
    hangs: bool,
    pub calls: AtomicUsize,
}

impl FakeGrader {
    pub fn accepting(accept: impl Fn(&[Document]) -> bool + Send + Sync + 'static) -> Self {
        Self {
            accept: Box::new(accept),
            failures_left: AtomicUsize::new(0),
            hangs: false,
            calls: AtomicUsize::new(0),
        }
    }

    /// Accepts batches containing any of `ids`.
    pub fn accepting_ids(ids: &[&str]) -> Self {
        let ids: HashSet<String> = ids.iter().map(|s| s.to_string()).collect();
        Self::accepting(move |docs| docs.iter().any(|d| ids.contains(&d.id)))
    }

    pub fn rejecting_all() -> Self {
        Self::accepting(|_| false)
    }

    /// Fail the first `n` calls before judging.
    pub fn failing_first(self, n: usize) -> Self {
        self.failures_left.store(n, Ordering::SeqCst);
        self
    }

    /// Never answer.
    pub fn hanging() -> Self {
        Self {
            hangs: true,
            ..Self::rejecting_all()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Grader for FakeGrader {
    async fn grade(
        &self,
        _query: &Query,
        documents: &[Document],
    ) -> Result<GradeResult, GraderFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.hangs {
            hang().await;
        }

        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(AppError::Llm("503 Service Unavailable".to_string()).into());
        }

        Ok(if (self.accept)(documents) {
            GradeResult::sufficient("covers the question")
        } else {
            GradeResult::insufficient("does not cover the question")
        })
    }
}

pub struct FakeWeb {
    result: Option<Vec<Document>>,
    hangs: bool,
    pub calls: AtomicUsize,
}

impl FakeWeb {
    pub fn returning(documents: Vec<Document>) -> Self {
        Self {
            result: Some(documents),
            hangs: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            result: None,
            hangs: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn hanging() -> Self {
        Self {
            hangs: true,
            ..Self::failing()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WebSearch for FakeWeb {
    async fn search(&self, _query: &Query, k: usize) -> Result<Vec<Document>, WebSearchFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.hangs {
            hang().await;
        }
        match &self.result {
            Some(documents) => Ok(documents.iter().take(k).cloned().collect()),
            None => Err(AppError::WebSearch("rate limited".to_string()).into()),
        }
    }
}

enum SynthesisBehavior {
    /// Cite every accepted id plus these.
    AcceptedAnd(Vec<String>),
    /// Cite exactly these.
    Only(Vec<String>),
    Fails,
    Hangs,
}

pub struct FakeSynthesizer {
    behavior: SynthesisBehavior,
    pub received: Mutex<Vec<Vec<String>>>,
}

impl FakeSynthesizer {
    pub fn citing_accepted() -> Self {
        Self::citing_with(&[])
    }

    pub fn citing_with(extra: &[&str]) -> Self {
        Self::with(SynthesisBehavior::AcceptedAnd(owned(extra)))
    }

    /// Cite `ids` whatever was accepted.
    pub fn citing(ids: &[&str]) -> Self {
        Self::with(SynthesisBehavior::Only(owned(ids)))
    }

    pub fn failing() -> Self {
        Self::with(SynthesisBehavior::Fails)
    }

    pub fn hanging() -> Self {
        Self::with(SynthesisBehavior::Hangs)
    }

    fn with(behavior: SynthesisBehavior) -> Self {
        Self {
            behavior,
            received: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.received.lock().unwrap().len()
    }
}

#[async_trait]
impl Synthesizer for FakeSynthesizer {
    async fn synthesize(
        &self,
        _query: &Query,
        accepted: &[Document],
    ) -> Result<Answer, SynthesisFailure> {
        self.received
            .lock()
            .unwrap()
            .push(accepted.iter().map(|d| d.id.clone()).collect());

        let citations = match &self.behavior {
            SynthesisBehavior::Fails => {
                return Err(AppError::Llm("context length exceeded".to_string()).into());
            }
            SynthesisBehavior::Hangs => {
                hang().await;
                Vec::new()
            }
            _ if accepted.is_empty() => return Ok(Answer::insufficient()),
            SynthesisBehavior::AcceptedAnd(extra) => accepted
                .iter()
                .map(|d| d.id.clone())
                .chain(extra.iter().cloned())
                .collect(),
            SynthesisBehavior::Only(ids) => ids.clone(),
        };

        Ok(Answer {
            text: "synthesized answer".to_string(),
            citations,
            grounded: true,
        })
    }
}
