use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tether_core::remote::{HttpRemote, MemoryRemote, RemoteApi};
use tether_core::store::LocalStore;
use tether_core::{ColumnType, EngineConfig, LocalRow, RowState, SyncEngine, TableSchema};

use crate::config::Settings;
use crate::error::CliError;

pub const TODO_TABLE: &str = "todo";
pub const TODO_KEY: &str = "id";

/// How long a mutating command waits for its server confirmation
pub const CONFIRM_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
pub struct TodoListItem {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub completed: bool,
    pub date: Option<String>,
    pub state: RowState,
    pub modified_date: i64,
}

pub fn todo_schema() -> Result<Arc<TableSchema>, CliError> {
    let schema = TableSchema::builder(TODO_TABLE, TODO_KEY)
        .column(TODO_KEY, ColumnType::Integer)
        .nullable_column("title", ColumnType::Text)
        .nullable_column("description", ColumnType::Text)
        .nullable_column("completed", ColumnType::Bit)
        .nullable_column("date", ColumnType::Date)
        .nullable_column("modifiedDate", ColumnType::Integer)
        .build()?;
    Ok(Arc::new(schema))
}

pub async fn open_engine(settings: &Settings) -> Result<SyncEngine, CliError> {
    let schema = todo_schema()?;
    let remote: Arc<dyn RemoteApi> = if settings.offline_demo {
        tracing::info!("Offline demo: changes stay queued locally");
        let remote = MemoryRemote::new(schema.clone());
        remote.set_offline(true);
        Arc::new(remote)
    } else {
        Arc::new(
            HttpRemote::new(settings.api_base_url.as_str(), schema.clone())?
                .with_resource(settings.resource.as_str()),
        )
    };

    let store = LocalStore::open(&settings.db_path).await?;
    let engine = SyncEngine::builder(schema, remote)
        .config(EngineConfig::default().with_poll_interval(settings.poll_interval))
        .open(store)
        .await?;
    Ok(engine)
}

/// Let background confirmations land, bounded by [`CONFIRM_TIMEOUT`].
///
/// Returns whether every change reached the server.
pub async fn finish(engine: &SyncEngine) -> Result<bool, CliError> {
    match tokio::time::timeout(CONFIRM_TIMEOUT, engine.shutdown()).await {
        Ok(result) => result?,
        Err(_) => {
            tracing::warn!("Server confirmation is still running; the change stays queued");
            return Ok(false);
        }
    }
    Ok(engine.status().await?.failed == 0)
}

pub fn print_sync_hint(confirmed: bool) {
    if !confirmed {
        eprintln!("Not yet confirmed by the server; run `tether sync` to retry.");
    }
}

pub fn todo_id(todo: &LocalRow) -> i64 {
    todo.key(TODO_KEY).unwrap_or_default()
}

pub fn todo_title(todo: &LocalRow) -> &str {
    todo.row.get_str("title").unwrap_or("")
}

pub fn todo_completed(todo: &LocalRow) -> bool {
    todo.row
        .get("completed")
        .and_then(serde_json::Value::as_i64)
        .is_some_and(|bit| bit != 0)
}

pub fn todo_to_list_item(todo: &LocalRow) -> TodoListItem {
    TodoListItem {
        id: todo_id(todo),
        title: todo_title(todo).to_string(),
        description: todo.row.get_str("description").map(str::to_string),
        completed: todo_completed(todo),
        date: todo.row.get_str("date").map(str::to_string),
        state: todo.state(TODO_KEY),
        modified_date: todo.meta.modified_date,
    }
}

/// One line per todo: key, check box, first title line and an unsynced marker
pub fn format_todo_lines(todos: &[LocalRow]) -> Vec<String> {
    todos
        .iter()
        .map(|todo| {
            let check = if todo_completed(todo) { 'x' } else { ' ' };
            let title = todo_title(todo).lines().next().unwrap_or_default().trim();
            let line = format!("{:>6}  [{check}] {title}", todo_id(todo));
            match state_label(todo.state(TODO_KEY)) {
                Some(label) => format!("{line}  {label}"),
                None => line,
            }
        })
        .collect()
}

pub const fn state_label(state: RowState) -> Option<&'static str> {
    match state {
        RowState::Clean => None,
        RowState::PendingCreate => Some("(not synced)"),
        RowState::PendingUpdate => Some("(edited)"),
        RowState::PendingDelete => Some("(deleting)"),
    }
}

/// Trimmed text, or `None` when nothing is left
pub fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
}

/// Join title words and reject blank titles
pub fn normalize_title(parts: &[String]) -> Result<String, CliError> {
    let joined = parts.join(" ");
    let title = joined.trim();
    if title.is_empty() {
        Err(CliError::EmptyTitle)
    } else {
        Ok(title.to_string())
    }
}
