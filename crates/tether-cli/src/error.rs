use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] tether_core::Error),
    #[error(transparent)]
    Remote(#[from] tether_core::RemoteError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("No todo title provided")]
    EmptyTitle,
    #[error("Todo not found: {0}")]
    TodoNotFound(i64),
    #[error("Nothing to change; pass --title, --description, --completed or --open")]
    NothingToUpdate,
    #[error("Configuration error: {0}")]
    Config(String),
}
