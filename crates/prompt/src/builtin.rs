//! Built-in prompt definitions for the retrieval router.
//!
//! Each definition can be replaced by dropping a YAML file with the same id
//! into `.concierge/prompts/`.

use crate::types::PromptDefinition;
use concierge_core::{AppError, AppResult};

/// Query classification prompt id.
pub const CLASSIFY: &str = "router.classify";

/// Relevance grading prompt id.
pub const GRADE: &str = "router.grade";

/// Answer synthesis prompt id.
pub const SYNTHESIZE: &str = "router.synthesize";

/// Marker the synthesis prompt asks the model to emit when the documents
/// do not answer the question.
pub const INSUFFICIENT_MARKER: &str = "INSUFFICIENT_INFORMATION";

const CLASSIFY_YAML: &str = r#"
id: router.classify
title: Route a customer question to a knowledge collection
apiVersion: "1.0"
system: |
  You route customer questions to the knowledge collection most likely to answer them.
  Reply with exactly one word: catalog, faq, troubleshooting, or unknown.
template: |
  Categories:
  - catalog: products, specifications, prices, stock and availability
  - faq: store policies, shipping, returns, warranty, accounts and payments
  - troubleshooting: a device, product or order that is not working as expected
  - unknown: anything else, or when you are not sure

  Question: {{query}}

  Category:
output:
  format: label
"#;

const GRADE_YAML: &str = r#"
id: router.grade
title: Judge whether retrieved documents can ground an answer
apiVersion: "1.0"
system: |
  You judge whether a set of retrieved documents contains enough information to answer
  a question faithfully. Judge the documents together, not one by one. Be strict: if an
  essential fact is missing or the documents are only loosely related, they are not
  sufficient.
  Respond with a JSON object: {"sufficient": true or false, "rationale": "<one sentence>"}
template: |
  Question: {{query}}

  Documents:
  {{documents}}
output:
  format: json
"#;

const SYNTHESIZE_YAML: &str = r#"
id: router.synthesize
title: Answer a customer question from accepted documents
apiVersion: "1.0"
system: |
  You are a customer support assistant. Answer using only the documents provided.
  Cite every document you rely on with its id in square brackets, for example [faq-3].
  If the documents do not contain the answer, reply with exactly: INSUFFICIENT_INFORMATION
template: |
  Question: {{query}}

  Documents:
  {{documents}}

  Answer:
output:
  format: text
"#;

/// Look up a built-in definition by id.
pub fn builtin_prompt(id: &str) -> AppResult<Option<PromptDefinition>> {
    let yaml = match id {
        CLASSIFY => CLASSIFY_YAML,
        GRADE => GRADE_YAML,
        SYNTHESIZE => SYNTHESIZE_YAML,
        _ => return Ok(None),
    };

    let definition: PromptDefinition = serde_yaml::from_str(yaml).map_err(|e| {
        AppError::Prompt(format!("Built-in prompt '{}' is invalid: {}", id, e))
    })?;

    Ok(Some(definition))
}

/// Ids of every built-in definition.
pub fn builtin_ids() -> [&'static str; 3] {
    [CLASSIFY, GRADE, SYNTHESIZE]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_builtins_parse() {
        for id in builtin_ids() {
            let def = builtin_prompt(id).unwrap().unwrap();
            assert_eq!(def.id, id);
            assert!(def.system.is_some());
            assert!(def.template.contains("{{query}}"));
        }
    }

    #[test]
    fn test_grade_prompt_requests_json() {
        let def = builtin_prompt(GRADE).unwrap().unwrap();
        assert!(def.output.is_json());
    }

    #[test]
    fn test_synthesis_prompt_mentions_marker() {
        let def = builtin_prompt(SYNTHESIZE).unwrap().unwrap();
        assert!(def.system.unwrap().contains(INSUFFICIENT_MARKER));
    }

    #[test]
    fn test_unknown_builtin() {
        assert!(builtin_prompt("router.unknown").unwrap().is_none());
    }
}
