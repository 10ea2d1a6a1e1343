use serde::Serialize;
use tether_core::EngineStatus;

use crate::commands::common::{format_todo_lines, open_engine};
use crate::config::Settings;
use crate::error::CliError;

#[derive(Debug, Serialize)]
struct StatusReport<'a> {
    api_base_url: &'a str,
    resource: &'a str,
    db_path: String,
    offline_demo: bool,
    #[serde(flatten)]
    engine: EngineStatus,
}

pub async fn run_status(as_json: bool, settings: &Settings) -> Result<(), CliError> {
    let engine = open_engine(settings).await?;
    let status = engine.status().await?;
    let pending = engine.pending_changes().await?;
    engine.shutdown().await?;

    if as_json {
        let report = StatusReport {
            api_base_url: &settings.api_base_url,
            resource: &settings.resource,
            db_path: settings.db_path.display().to_string(),
            offline_demo: settings.offline_demo,
            engine: status,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Server:     {}/{}", settings.api_base_url, settings.resource);
    println!("Database:   {}", settings.db_path.display());
    println!("Pending:    {}", status.pending);
    println!("Checkpoint: {}", format_checkpoint(status.checkpoint));
    for line in format_todo_lines(&pending) {
        println!("  {line}");
    }
    Ok(())
}

pub fn format_checkpoint(checkpoint_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(checkpoint_ms).map_or_else(
        || checkpoint_ms.to_string(),
        |time| time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}
