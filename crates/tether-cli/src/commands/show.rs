use crate::commands::common::{
    open_engine, state_label, todo_completed, todo_id, todo_title, todo_to_list_item,
};
use crate::config::Settings;
use crate::error::CliError;

pub async fn run_show(id: i64, as_json: bool, settings: &Settings) -> Result<(), CliError> {
    let engine = open_engine(settings).await?;
    // Temporary keys only exist locally
    let refreshed = if id < 0 {
        engine.get(id).await?
    } else {
        match engine.refresh(id).await {
            Ok(todo) => todo,
            Err(error) if error.is_remote() => {
                eprintln!("Showing local copy; server unavailable: {error}");
                engine.get(id).await?
            }
            Err(error) => return Err(error.into()),
        }
    };
    engine.shutdown().await?;

    let todo = refreshed
        .filter(|todo| !todo.meta.deleted)
        .ok_or(CliError::TodoNotFound(id))?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&todo_to_list_item(&todo))?);
        return Ok(());
    }

    let check = if todo_completed(&todo) { "x" } else { " " };
    println!("{}  [{check}] {}", todo_id(&todo), todo_title(&todo));
    if let Some(description) = todo.row.get_str("description") {
        println!("{description}");
    }
    if let Some(date) = todo.row.get_str("date") {
        println!("due {date}");
    }
    if let Some(label) = state_label(todo.state(crate::commands::common::TODO_KEY)) {
        println!("{label}");
    }
    Ok(())
}
