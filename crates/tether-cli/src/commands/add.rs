use tether_core::Row;

use crate::commands::common::{
    finish, non_blank, normalize_title, open_engine, print_sync_hint, todo_id,
};
use crate::config::Settings;
use crate::error::CliError;

pub async fn run_add(
    title_parts: &[String],
    description: Option<String>,
    date: Option<String>,
    settings: &Settings,
) -> Result<(), CliError> {
    let title = normalize_title(title_parts)?;
    let mut row = Row::new().with("title", title).with("completed", 0);
    if let Some(description) = non_blank(description) {
        row.set("description", description);
    }
    if let Some(date) = non_blank(date) {
        row.set("date", date);
    }

    let engine = open_engine(settings).await?;
    let todo = engine.create(row).await?;
    println!("{}", todo_id(&todo));

    print_sync_hint(finish(&engine).await?);
    Ok(())
}
