//! Ask command handler.
//!
//! Runs one retrieval session and prints the answer, optionally with the
//! attempt trace.

use clap::Args;
use concierge_core::{config::AppConfig, AppError, AppResult};
use concierge_knowledge::{
    build_orchestrator, load_config, Query, RouterOptions, SessionError, SessionReport,
};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

/// Answer a question from the registered collections
#[derive(Args, Debug)]
pub struct AskCommand {
    /// The question to ask
    pub query: Option<String>,

    /// Read the question from a file
    #[arg(short, long, conflicts_with = "query")]
    pub file: Option<PathBuf>,

    /// Documents requested per retrieval
    #[arg(short = 'k', long)]
    pub top_k: Option<usize>,

    /// Collection re-attempts allowed after the first retrieval
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Never fall back to web search
    #[arg(long)]
    pub no_web: bool,

    /// Conversation turn this question belongs to (logged and reported)
    #[arg(long)]
    pub turn_id: Option<String>,

    /// Classify with keyword rules instead of the LLM
    #[arg(long)]
    pub keyword_router: bool,

    /// Print the retrieval attempts after the answer
    #[arg(long)]
    pub trace: bool,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl AskCommand {
    /// Execute the ask command.
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing ask command");
        tracing::debug!("Ask command options: {:?}", self);

        let text = self.get_query()?;

        let mut retrieval = load_config(&config.workspace)?;
        if let Some(top_k) = self.top_k {
            retrieval.top_k = top_k;
        }
        if let Some(max_retries) = self.max_retries {
            retrieval.max_retries = max_retries;
        }
        if self.no_web {
            retrieval.web_search.enabled = false;
        }

        let options = RouterOptions {
            keyword_router: self.keyword_router,
        };
        let orchestrator = build_orchestrator(config, retrieval, &options)?;

        let cancel = CancellationToken::new();
        let on_interrupt = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Interrupt received, cancelling session");
                on_interrupt.cancel();
            }
        });

        let query = match &self.turn_id {
            Some(turn_id) => Query::new(text).with_turn_id(turn_id.clone()),
            None => Query::new(text),
        };

        match orchestrator.run_with_cancellation(query, cancel).await
        {
            Ok(report) => self.print_report(&report),
            Err(err) => {
                if !matches!(err, SessionError::Cancelled { .. }) {
                    eprintln!("{}", refusal(&err));
                }
                Err(err.into())
            }
        }
    }

    fn print_report(&self, report: &SessionReport) -> AppResult<()> {
        if self.json {
            let output = if self.trace {
                serde_json::to_value(report)?
            } else {
                serde_json::json!({
                    "sessionId": report.session_id,
                    "turnId": report.query.turn_id(),
                    "answer": report.answer.text,
                    "grounded": report.answer.grounded,
                    "citations": report.answer.citations,
                    "attempts": report.attempts.len(),
                    "retries": report.retries,
                })
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
            return Ok(());
        }

        println!("{}", report.answer.text);

        if report.answer.grounded && !report.answer.citations.is_empty() {
            println!();
            println!("Sources: {}", format_citations(&report.answer.citations));
        }

        if self.trace {
            println!();
            print!("{}", format_trace(report));
        }

        Ok(())
    }

    fn get_query(&self) -> AppResult<String> {
        let text = match (&self.query, &self.file) {
            (Some(query), _) => query.clone(),
            (None, Some(path)) => std::fs::read_to_string(path)?,
            (None, None) => {
                return Err(AppError::Config("No question provided".to_string()));
            }
        };

        let text = text.trim().to_string();
        if text.is_empty() {
            return Err(AppError::Config("Question is empty".to_string()));
        }
        Ok(text)
    }
}

/// User-facing message for a session that could not run to completion.
fn refusal(err: &SessionError) -> String {
    match err {
        SessionError::StoreUnavailable { .. } => match err.store_target() {
            Some((_, Some(collection))) => format!(
                "Sorry, I could not search the '{}' collection right now. Please try again later.",
                collection
            ),
            _ => "Sorry, I could not search the knowledge base right now. Please try again later."
                .to_string(),
        },
        SessionError::Synthesis { .. } => {
            "Sorry, I found relevant information but could not compose an answer. Please try again later."
                .to_string()
        }
        SessionError::Cancelled { .. } => "Cancelled.".to_string(),
    }
}

fn format_citations(citations: &[String]) -> String {
    citations
        .iter()
        .map(|id| format!("[{}]", id))
        .collect::<Vec<_>>()
        .join(" ")
}

fn format_trace(report: &SessionReport) -> String {
    let mut out = format!(
        "Session {} ({} attempts, {} retries, {}ms)\n",
        report.session_id,
        report.attempts.len(),
        report.retries,
        report.elapsed_ms
    );

    if let Some(intent) = report.classified_intent {
        out.push_str(&format!("  classified as {}\n", intent));
    }

    for attempt in &report.attempts {
        let verdict = if attempt.grade.sufficient {
            "sufficient"
        } else {
            "insufficient"
        };
        out.push_str(&format!(
            "  {}. {:<26} {:>2} docs  {:<12} {}\n",
            attempt.ordinal,
            attempt.source.to_string(),
            attempt.documents.len(),
            verdict,
            attempt.grade.rationale
        ));
        for doc in &attempt.documents {
            out.push_str(&format!("       [{}] {:.3}\n", doc.id, doc.score));
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use concierge_knowledge::error::StoreUnavailable;
    use concierge_knowledge::{Intent, Phase};

    #[test]
    fn test_refusal_names_the_collection() {
        let err = SessionError::StoreUnavailable {
            state: Phase::Retrieving,
            source: StoreUnavailable::new(
                Intent::Faq,
                Some("faq".to_string()),
                AppError::Store("disk I/O error".to_string()),
            ),
        };

        let message = refusal(&err);
        assert!(message.contains("could not search"));
        assert!(message.contains("'faq'"));
    }

    #[derive(clap::Parser)]
    struct AskArgs {
        #[command(flatten)]
        ask: AskCommand,
    }

    #[test]
    fn test_turn_id_flag() {
        use clap::Parser;

        let args = AskArgs::parse_from(["ask", "Where is my order?", "--turn-id", "t-42"]);
        assert_eq!(args.ask.turn_id.as_deref(), Some("t-42"));
        assert_eq!(args.ask.get_query().unwrap(), "Where is my order?");
    }

    #[test]
    fn test_format_citations() {
        let ids = vec!["p-7".to_string(), "f-2".to_string()];
        assert_eq!(format_citations(&ids), "[p-7] [f-2]");
    }
}
