//! tether-core - Core library for tether
//!
//! Offline-first synchronization of local `SQLite` tables with an
//! authoritative remote API. Writes land locally first and are confirmed in
//! the background; server truth is merged back with last-writer-wins.

pub mod clock;
pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod filter;
pub mod models;
pub mod reconcile;
pub mod remote;
pub mod schema;
pub mod store;
pub mod view;

pub use config::EngineConfig;
pub use engine::{EngineStatus, SyncEngine, SyncPass};
pub use error::{Error, Result};
pub use filter::Filter;
pub use models::{LocalRow, RemoteRow, Row, RowState, SyncMeta};
pub use remote::{RemoteApi, RemoteError};
pub use schema::{Column, ColumnType, TableSchema};
pub use view::{DataView, ViewOptions, ViewState};
