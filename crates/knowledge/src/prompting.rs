//! Runs router prompts against an LLM client.

use crate::types::Document;
use concierge_core::AppResult;
use concierge_llm::{LlmClient, LlmRequest};
use concierge_prompt::{build_prompt, resolve_prompt, PromptDefinition};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// A resolved prompt bound to a client and model.
#[derive(Clone)]
pub struct PromptRunner {
    client: Arc<dyn LlmClient>,
    model: String,
    definition: PromptDefinition,
    max_tokens: Option<u32>,
}

impl PromptRunner {
    /// Resolve `prompt_id` from the workspace (override or built-in).
    pub fn resolve(
        workspace: &Path,
        prompt_id: &str,
        client: Arc<dyn LlmClient>,
        model: impl Into<String>,
    ) -> AppResult<Self> {
        let (definition, origin) = resolve_prompt(workspace, prompt_id)?;
        tracing::debug!("Using {:?} prompt '{}'", origin, definition.id);
        Ok(Self::new(definition, client, model))
    }

    pub fn new(
        definition: PromptDefinition,
        client: Arc<dyn LlmClient>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            client,
            model: model.into(),
            definition,
            max_tokens: None,
        }
    }

    /// Cap the completion length.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn prompt_id(&self) -> &str {
        &self.definition.id
    }

    /// Render the prompt with `variables` and make exactly one completion call.
    pub async fn run(&self, variables: HashMap<String, String>) -> AppResult<String> {
        let built = build_prompt(&self.definition, variables)?;

        let mut request = LlmRequest::new(built.user, self.model.clone()).with_temperature(0.0);
        if let Some(system) = built.system {
            request = request.with_system(system);
        }
        if built.json_output {
            request = request.with_json_mode();
        }
        if let Some(max_tokens) = self.max_tokens {
            request = request.with_max_tokens(max_tokens);
        }

        let response = self.client.complete(&request).await?;

        tracing::debug!(
            prompt = %self.definition.id,
            tokens = response.usage.total_tokens,
            "LLM call completed"
        );

        Ok(response.content)
    }
}

/// Variables for prompts that take the query and a document list.
pub fn query_variables(query: &str, documents: Option<&[Document]>) -> HashMap<String, String> {
    let mut vars = HashMap::new();
    vars.insert("query".to_string(), query.to_string());
    if let Some(docs) = documents {
        vars.insert("documents".to_string(), render_documents(docs));
    }
    vars
}

/// One block per document, labelled with its citation id.
pub fn render_documents(documents: &[Document]) -> String {
    documents
        .iter()
        .map(|d| format!("[{}] ({}) {}", d.id, d.collection, d.text.trim()))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Strip a Markdown code fence around a model reply.
pub(crate) fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = rest.split_once('\n').map_or("", |(_, body)| body);
    body.trim_end().trim_end_matches("```").trim()
}


#[cfg(test)]
mod tests {
    use super::testing::ScriptedLlm;
    use super::*;
    use concierge_prompt::builtin_prompt;

    #[tokio::test]
    async fn test_run_sends_system_and_json_mode() {
        let llm = Arc::new(ScriptedLlm::replying(&[r#"{"sufficient": true}"#]));
        let definition = builtin_prompt("router.grade").unwrap().unwrap();
        let runner = PromptRunner::new(definition, llm.clone(), "llama3.2").with_max_tokens(64);

        let docs = vec![Document {
            id: "faq-1".to_string(),
            text: "Returns accepted within 30 days.".to_string(),
            collection: "faq".to_string(),
            score: 0.8,
            metadata: serde_json::Value::Null,
        }];
        let reply = runner
            .run(query_variables("return policy?", Some(&docs)))
            .await
            .unwrap();
        assert!(reply.contains("sufficient"));

        let requests = llm.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].json_mode);
        assert!(requests[0].system.is_some());
        assert_eq!(requests[0].max_tokens, Some(64));
        assert!(requests[0].prompt.contains("[faq-1] (faq) Returns accepted"));
    }

    #[test]
    fn test_strip_code_fence() {
        assert_eq!(strip_code_fence("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_code_fence("  plain  "), "plain");
    }
}
