//! Data models for tether

mod remote_row;
mod row;

pub use remote_row::{RemoteRow, MODIFIED_DATE};
pub use row::{LocalRow, Row, RowState, SyncMeta};
