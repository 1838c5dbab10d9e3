//! Relevance grading of retrieved batches.

use crate::error::GraderFailure;
use crate::prompting::{query_variables, strip_code_fence, PromptRunner};
use crate::types::{Document, GradeResult, Query};
use async_trait::async_trait;

/// Judges whether a batch of documents can ground an answer.
#[async_trait]
pub trait Grader: Send + Sync {
    async fn grade(&self, query: &Query, documents: &[Document])
        -> Result<GradeResult, GraderFailure>;
}

/// Grader backed by the `router.grade` prompt.
pub struct LlmGrader {
    runner: PromptRunner,
}

impl LlmGrader {
    pub fn new(runner: PromptRunner) -> Self {
        Self {
            runner: runner.with_max_tokens(256),
        }
    }
}

#[async_trait]
impl Grader for LlmGrader {
    async fn grade(
        &self,
        query: &Query,
        documents: &[Document],
    ) -> Result<GradeResult, GraderFailure> {
        if documents.is_empty() {
            return Ok(GradeResult::empty_batch());
        }

        let reply = self
            .runner
            .run(query_variables(query.text(), Some(documents)))
            .await?;

        let grade = parse_verdict(&reply);
        tracing::debug!(
            sufficient = grade.sufficient,
            "Graded {} documents: {}",
            documents.len(),
            grade.rationale
        );
        Ok(grade)
    }
}

/// Parse a grader reply conservatively.
///
/// Only a JSON `"sufficient": true` or a reply starting with `YES` counts as
/// sufficient. Everything else, including malformed output, is insufficient.
pub fn parse_verdict(reply: &str) -> GradeResult {
    let body = strip_code_fence(reply);

    if let Ok(serde_json::Value::Object(map)) = serde_json::from_str::<serde_json::Value>(body) {
        let rationale = map
            .get("rationale")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .trim()
            .to_string();

        return match map.get("sufficient") {
            Some(serde_json::Value::Bool(true)) => GradeResult::sufficient(rationale),
            Some(serde_json::Value::Bool(false)) => GradeResult::insufficient(rationale),
            _ => GradeResult::insufficient("grader reply has no boolean verdict"),
        };
    }

    let first_word: String = body
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect();

    let rest = body[first_word.len()..]
        .trim_start_matches(|c: char| !c.is_alphanumeric())
        .trim();

    if first_word.eq_ignore_ascii_case("yes") {
        GradeResult::sufficient(rest)
    } else if first_word.eq_ignore_ascii_case("no") {
        GradeResult::insufficient(rest)
    } else {
        GradeResult::insufficient("unparseable grader reply")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompting::testing::ScriptedLlm;
    use concierge_prompt::builtin_prompt;
    use std::sync::Arc;

    fn grader(llm: Arc<ScriptedLlm>) -> LlmGrader {
        let definition = builtin_prompt("router.grade").unwrap().unwrap();
        LlmGrader::new(PromptRunner::new(definition, llm, "llama3.2"))
    }

    fn faq_doc() -> Document {
        Document {
            id: "faq-3".to_string(),
            text: "Items can be returned within 30 days with a receipt.".to_string(),
            collection: "faq".to_string(),
            score: 0.82,
            metadata: serde_json::Value::Null,
        }
    }

    #[test]
    fn test_parse_json_verdicts() {
        let grade = parse_verdict(r#"{"sufficient": true, "rationale": "States the window."}"#);
        assert!(grade.sufficient);
        assert_eq!(grade.rationale, "States the window.");

        assert!(!parse_verdict(r#"{"sufficient": false, "rationale": "Off topic"}"#).sufficient);
        assert!(parse_verdict("```json\n{\"sufficient\": true}\n```").sufficient);
    }

    #[test]
    fn test_parse_is_conservative() {
        assert!(!parse_verdict(r#"{"sufficient": "true"}"#).sufficient);
        assert!(!parse_verdict(r#"{"verdict": "yes"}"#).sufficient);
        assert!(!parse_verdict("Probably yes").sufficient);
        assert!(!parse_verdict("").sufficient);
        assert!(!parse_verdict("yesterday's docs").sufficient);
    }

    #[test]
    fn test_parse_plain_yes_no() {
        let grade = parse_verdict("YES - the policy is stated");
        assert!(grade.sufficient);
        assert_eq!(grade.rationale, "the policy is stated");

        assert!(!parse_verdict("No, nothing about refunds").sufficient);
    }

    #[tokio::test]
    async fn test_empty_batch_skips_the_model() {
        let llm = Arc::new(ScriptedLlm::replying(&[r#"{"sufficient": true}"#]));
        let grade = grader(llm.clone())
            .grade(&Query::new("return policy"), &[])
            .await
            .unwrap();

        assert!(!grade.sufficient);
        assert_eq!(llm.calls(), 0);
    }

    #[tokio::test]
    async fn test_grades_batch_with_one_call() {
        let llm = Arc::new(ScriptedLlm::replying(&[
            r#"{"sufficient": true, "rationale": "30-day window"}"#,
        ]));
        let grade = grader(llm.clone())
            .grade(&Query::new("What is your return policy?"), &[faq_doc()])
            .await
            .unwrap();

        assert!(grade.sufficient);
        assert_eq!(llm.calls(), 1);
        assert!(llm.requests.lock().unwrap()[0].json_mode);
    }

    #[tokio::test]
    async fn test_transport_error_is_grader_failure() {
        let llm = Arc::new(ScriptedLlm::failing("503 Service Unavailable"));
        let result = grader(llm).grade(&Query::new("x"), &[faq_doc()]).await;
        assert!(result.is_err());
    }
}
