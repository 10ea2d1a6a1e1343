use crate::commands::common::{
    finish, non_blank, open_engine, print_sync_hint, todo_id, todo_title,
};
use crate::config::Settings;
use crate::error::CliError;

pub struct TodoChanges {
    pub title: Option<String>,
    pub description: Option<String>,
    pub completed: Option<bool>,
}

impl TodoChanges {
    pub fn new(
        title: Option<String>,
        description: Option<String>,
        completed: bool,
        open: bool,
    ) -> Result<Self, CliError> {
        let completed = match (completed, open) {
            (true, _) => Some(true),
            (false, true) => Some(false),
            (false, false) => None,
        };
        let changes = Self {
            title: non_blank(title),
            description,
            completed,
        };
        if changes.title.is_none() && changes.description.is_none() && changes.completed.is_none()
        {
            return Err(CliError::NothingToUpdate);
        }
        Ok(changes)
    }
}

pub async fn run_edit(id: i64, changes: TodoChanges, settings: &Settings) -> Result<(), CliError> {
    let engine = open_engine(settings).await?;
    let mut todo = engine
        .get(id)
        .await?
        .ok_or(CliError::TodoNotFound(id))?;

    if let Some(title) = changes.title {
        todo.row.set("title", title);
    }
    if let Some(description) = changes.description {
        // An empty description clears it
        match non_blank(Some(description)) {
            Some(description) => todo.row.set("description", description),
            None => todo.row.set("description", serde_json::Value::Null),
        }
    }
    if let Some(completed) = changes.completed {
        todo.row.set("completed", i64::from(completed));
    }

    let updated = engine.update(todo.row).await?;
    println!("{}  {}", todo_id(&updated), todo_title(&updated));
    print_sync_hint(finish(&engine).await?);
    Ok(())
}
