use crate::commands::common::{finish, open_engine, print_sync_hint};
use crate::config::Settings;
use crate::error::CliError;

pub async fn run_delete(id: i64, settings: &Settings) -> Result<(), CliError> {
    let engine = open_engine(settings).await?;
    match engine.delete(id).await {
        Ok(()) => {}
        Err(tether_core::Error::NotFound(_)) => return Err(CliError::TodoNotFound(id)),
        Err(error) => return Err(error.into()),
    }

    println!("Deleted todo {id}");
    print_sync_hint(finish(&engine).await?);
    Ok(())
}
