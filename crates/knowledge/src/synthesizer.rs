//! Answer synthesis from accepted documents.

use crate::error::SynthesisFailure;
use crate::prompting::{query_variables, PromptRunner};
use crate::types::{Answer, Document, Query};
use async_trait::async_trait;
use concierge_prompt::INSUFFICIENT_MARKER;
use std::collections::HashSet;

/// Composes the final answer.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// `accepted` holds only documents from attempts graded sufficient.
    async fn synthesize(&self, query: &Query, accepted: &[Document])
        -> Result<Answer, SynthesisFailure>;
}

/// Synthesizer backed by the `router.synthesize` prompt.
pub struct LlmSynthesizer {
    runner: PromptRunner,
}

impl LlmSynthesizer {
    pub fn new(runner: PromptRunner) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl Synthesizer for LlmSynthesizer {
    async fn synthesize(
        &self,
        query: &Query,
        accepted: &[Document],
    ) -> Result<Answer, SynthesisFailure> {
        if accepted.is_empty() {
            return Ok(Answer::insufficient());
        }

        let reply = self
            .runner
            .run(query_variables(query.text(), Some(accepted)))
            .await?;
        let text = reply.trim();

        if text.is_empty() || text.contains(INSUFFICIENT_MARKER) {
            tracing::debug!("Model found the accepted documents insufficient");
            return Ok(Answer::insufficient());
        }

        let mut citations = extract_citations(text, accepted);
        if citations.is_empty() {
            citations.extend(top_ranked(accepted).map(|d| d.id.clone()));
        }

        Ok(Answer {
            text: text.to_string(),
            citations,
            grounded: true,
        })
    }
}

/// Highest-scoring document, the earliest on ties.
pub fn top_ranked(documents: &[Document]) -> Option<&Document> {
    documents
        .iter()
        .reduce(|best, d| if d.score > best.score { d } else { best })
}

/// Ids cited as `[id]` or `[id1, id2]` that belong to `accepted`, in order of
/// first appearance.
pub fn extract_citations(text: &str, accepted: &[Document]) -> Vec<String> {
    let known: HashSet<&str> = accepted.iter().map(|d| d.id.as_str()).collect();
    let mut seen = HashSet::new();
    let mut citations = Vec::new();

    let mut rest = text;
    while let Some(open) = rest.find('[') {
        let after = &rest[open + 1..];
        let Some(close) = after.find(']') else {
            break;
        };

        for id in after[..close].split(',').map(str::trim) {
            if known.contains(id) && seen.insert(id) {
                citations.push(id.to_string());
            }
        }
        rest = &after[close + 1..];
    }

    citations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompting::testing::ScriptedLlm;
    use concierge_prompt::builtin_prompt;
    use std::sync::Arc;

    fn doc(id: &str) -> Document {
        scored(id, 0.9)
    }

    fn scored(id: &str, score: f32) -> Document {
        Document {
            id: id.to_string(),
            text: format!("content of {}", id),
            collection: "faq".to_string(),
            score,
            metadata: serde_json::Value::Null,
        }
    }

    fn synthesizer(llm: Arc<ScriptedLlm>) -> LlmSynthesizer {
        let definition = builtin_prompt("router.synthesize").unwrap().unwrap();
        LlmSynthesizer::new(PromptRunner::new(definition, llm, "llama3.2"))
    }

    #[test]
    fn test_extract_citations() {
        let accepted = vec![doc("faq-1"), doc("faq-2"), doc("faq-3")];
        let text = "Returns take 30 days [faq-2]. Refunds go to the card [faq-1, faq-9] [faq-2].";

        assert_eq!(extract_citations(text, &accepted), vec!["faq-2", "faq-1"]);
        assert!(extract_citations("no brackets [unclosed", &accepted).is_empty());
    }

    #[tokio::test]
    async fn test_empty_accepted_skips_the_model() {
        let llm = Arc::new(ScriptedLlm::replying(&["anything"]));
        let answer = synthesizer(llm.clone())
            .synthesize(&Query::new("q"), &[])
            .await
            .unwrap();

        assert!(!answer.grounded);
        assert!(answer.citations.is_empty());
        assert_eq!(llm.calls(), 0);
    }

    #[tokio::test]
    async fn test_grounded_answer_cites_valid_ids_only() {
        let llm = Arc::new(ScriptedLlm::replying(&[
            "You can return items within 30 days [faq-1][web-7].",
        ]));
        let answer = synthesizer(llm)
            .synthesize(&Query::new("return policy"), &[doc("faq-1"), doc("faq-2")])
            .await
            .unwrap();

        assert!(answer.grounded);
        assert_eq!(answer.citations, vec!["faq-1"]);
    }

    #[tokio::test]
    async fn test_uncited_answer_cites_only_the_top_document() {
        let llm = Arc::new(ScriptedLlm::replying(&["Within 30 days [faq-9]."]));
        let accepted = [scored("faq-2", 0.88), scored("faq-1", 0.91), scored("faq-3", 0.40)];
        let answer = synthesizer(llm)
            .synthesize(&Query::new("return policy"), &accepted)
            .await
            .unwrap();

        assert!(answer.grounded);
        assert_eq!(answer.citations, vec!["faq-1"]);
    }

    #[test]
    fn test_top_ranked_prefers_the_earliest_on_ties() {
        let accepted = [scored("a", 0.5), scored("b", 0.7), scored("c", 0.7)];
        assert_eq!(top_ranked(&accepted).unwrap().id, "b");
        assert!(top_ranked(&[]).is_none());
    }

    #[tokio::test]
    async fn test_marker_reply_is_ungrounded() {
        let llm = Arc::new(ScriptedLlm::replying(&["INSUFFICIENT_INFORMATION"]));
        let answer = synthesizer(llm)
            .synthesize(&Query::new("warp drive"), &[doc("faq-1")])
            .await
            .unwrap();

        assert!(!answer.grounded);
        assert!(answer.citations.is_empty());
    }
}
