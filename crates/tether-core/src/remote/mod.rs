//! The remote API seam: the authoritative server store for one table

mod http;
mod memory;

pub use http::HttpRemote;
pub use memory::{MemoryRemote, RemoteCall};

use async_trait::async_trait;
use thiserror::Error;

use crate::filter::Filter;
use crate::models::{RemoteRow, Row};

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("Invalid remote configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Remote HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Remote API error: {message}")]
    Api { status: u16, message: String },
    #[error("Remote unavailable: {0}")]
    Unavailable(String),
    #[error("Invalid remote payload: {0}")]
    InvalidPayload(String),
}

impl RemoteError {
    /// The server does not know the row (already gone)
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::Api { status: 404, .. })
    }
}

pub type RemoteResult<T> = Result<T, RemoteError>;

/// Operations the sync engine needs from the server, per table.
///
/// Rows passed in carry application columns only. Returned rows carry the
/// server's `modifiedDate`.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// Live rows matching `filter`
    async fn get(&self, filter: &Filter) -> RemoteResult<Vec<RemoteRow>>;

    async fn get_by_id(&self, id: i64) -> RemoteResult<Option<RemoteRow>>;

    /// Create a row. A negative key in `row` is the client's temporary key;
    /// the returned row carries the server-assigned one.
    async fn insert(&self, row: &Row) -> RemoteResult<RemoteRow>;

    async fn update(&self, row: &Row) -> RemoteResult<RemoteRow>;

    /// Tombstone the row with the key of `row`
    async fn delete(&self, row: &Row) -> RemoteResult<()>;

    /// Rows tombstoned with `modifiedDate > since`
    async fn get_deletions(&self, since: i64) -> RemoteResult<Vec<RemoteRow>>;
}
