//! Prompts command handler.

use clap::{Args, Subcommand};
use concierge_core::{config::AppConfig, AppResult};
use concierge_prompt::{builtin_ids, list_prompts, resolve_prompt};

/// Inspect router prompts
#[derive(Args, Debug)]
pub struct PromptsCommand {
    #[command(subcommand)]
    pub action: PromptsAction,
}

#[derive(Subcommand, Debug)]
pub enum PromptsAction {
    /// List prompts and where each one is loaded from
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the effective definition of a prompt
    Show {
        /// Prompt id (e.g. router.grade)
        id: String,
    },
}

impl PromptsCommand {
    pub fn execute(&self, config: &AppConfig) -> AppResult<()> {
        match &self.action {
            PromptsAction::List { json } => list(config, *json),
            PromptsAction::Show { id } => {
                let (definition, origin) = resolve_prompt(&config.workspace, id)?;
                tracing::debug!("Showing {:?} prompt '{}'", origin, id);
                print!("{}", serde_yaml::to_string(&definition)?);
                Ok(())
            }
        }
    }
}

fn list(config: &AppConfig, json: bool) -> AppResult<()> {
    let mut ids: Vec<String> = builtin_ids().iter().map(|id| id.to_string()).collect();
    for id in list_prompts(&config.workspace)? {
        if !ids.contains(&id) {
            ids.push(id);
        }
    }

    let mut rows = Vec::new();
    for id in ids {
        let (definition, origin) = resolve_prompt(&config.workspace, &id)?;
        rows.push(serde_json::json!({
            "id": definition.id,
            "title": definition.title,
            "origin": origin,
            "output": definition.output.format,
        }));
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    println!("{:<22} {:<10} {:<7} TITLE", "ID", "ORIGIN", "OUTPUT");
    for row in &rows {
        println!(
            "{:<22} {:<10} {:<7} {}",
            row["id"].as_str().unwrap_or_default(),
            row["origin"].as_str().unwrap_or_default(),
            row["output"].as_str().unwrap_or_default(),
            row["title"].as_str().unwrap_or_default()
        );
    }

    Ok(())
}
