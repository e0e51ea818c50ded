//! Conductor - interactive entry point.
//!
//! Collects reference files and a goal, then runs the planner/worker workflow.

use std::sync::Arc;

use conductor::agent::{TaskManager, WorkflowState};
use conductor::console::Console;
use conductor::llm::Gateway;
use conductor::uploads::{expand_input, Uploader};
use conductor::{Config, Session};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "conductor=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration and open the session; failures here are fatal
    let config = Config::from_env()?;
    info!(
        "Loaded configuration: model={}, image_model={}",
        config.text_model, config.image_model
    );
    let session = Session::start(config)?;
    let gateway = Arc::new(Gateway::new(&session));
    let mut console = Console::stdio();

    let mut references = Vec::new();
    match gateway.list_files().await {
        Ok(existing) => references.extend(console.select_existing(&existing)?),
        Err(e) => warn!("Could not list previously uploaded files: {}", e),
    }

    if console.confirm("Upload new files?")? {
        let uploader = Uploader::new(&session, gateway.clone());
        while let Some(line) = console.next_upload_input()? {
            let paths = expand_input(&line);
            if paths.is_empty() {
                console.message(&format!("No files match '{}'.", line))?;
                continue;
            }
            for file in uploader.upload_all(&paths).await {
                console.message(&format!("Uploaded {} ({})", file.display_name, file.name))?;
                references.push(file);
            }
        }
    }

    let goal = console.read_goal()?;
    if goal.is_empty() {
        console.message("No goal given; nothing to do.")?;
        return Ok(());
    }

    let manager = TaskManager::new(&session, gateway);
    let outcome = manager.run(&goal, &references, &mut console).await?;

    match outcome.state {
        WorkflowState::Aborted => console.message("Plan rejected. Nothing was executed.")?,
        _ => console.message(&format!(
            "Done: {} step(s) executed. Outputs are in {}",
            outcome.ledger.len(),
            session.layout().outputs_dir.display()
        ))?,
    }

    Ok(())
}
