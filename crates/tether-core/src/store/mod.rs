//! Local store adapter
//!
//! All access goes through one `SQLite` connection guarded by an async mutex,
//! so multi-statement sequences never interleave.

mod connection;
mod table;

pub use connection::{LocalStore, ResultSet};
pub use table::TableStore;
