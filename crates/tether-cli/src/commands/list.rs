use tether_core::{DataView, Filter, ViewOptions};

use crate::commands::common::{
    format_todo_lines, non_blank, open_engine, todo_to_list_item, TodoListItem,
};
use crate::config::Settings;
use crate::error::CliError;

pub async fn run_list(
    title: Option<String>,
    local_only: bool,
    as_json: bool,
    settings: &Settings,
) -> Result<(), CliError> {
    let mut filter = Filter::new();
    if let Some(title) = non_blank(title) {
        filter.set("title", title);
    }

    let engine = open_engine(settings).await?;
    let todos = if local_only {
        engine.list(&filter).await?
    } else {
        let view = DataView::new(engine.clone(), ViewOptions::default());
        view.load(filter);
        view.wait_idle().await?;
        let state = view.state();
        if let Some(message) = state.error_message {
            eprintln!("Showing local copy; server unavailable: {message}");
        }
        state.items
    };
    engine.shutdown().await?;

    if as_json {
        let json_items = todos
            .iter()
            .map(todo_to_list_item)
            .collect::<Vec<TodoListItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
    } else if todos.is_empty() {
        println!("No todos.");
    } else {
        for line in format_todo_lines(&todos) {
            println!("{line}");
        }
    }

    Ok(())
}
