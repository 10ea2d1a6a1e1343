//! Single-row conflict resolution between local storage and the server
//!
//! Whole-row last-writer-wins: a locally modified row survives only when its
//! local write is newer than the server revision. The same resolution runs
//! for bulk pulls, insert and update confirmations and the retry loop.

use crate::error::{Error, Result};
use crate::models::{LocalRow, RemoteRow, SyncMeta};
use crate::store::TableStore;

/// Which side wins for one key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Nothing stored locally; store the server row as clean
    InsertServer,
    /// Overwrite the local slot with the server row and clear `modified`
    AdoptServer,
    /// The local edit is newer; discard the server values
    KeepLocal,
}

/// Decide between the stored row (if any) and a server row for the same key
pub fn decide(local: Option<&LocalRow>, server: &RemoteRow) -> Resolution {
    match local {
        None => Resolution::InsertServer,
        Some(local) if local.meta.modified && local.meta.modified_date > server.modified_date => {
            Resolution::KeepLocal
        }
        Some(_) => Resolution::AdoptServer,
    }
}

/// Result of reconciling one server row
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciled {
    /// The winning row as now stored, hydrated
    pub row: LocalRow,
    pub outcome: Resolution,
    /// Temporary key the row was moved away from, if any
    pub rekeyed_from: Option<i64>,
}

/// Reconcile `server` into the local row stored at `slot`.
///
/// `slot` is the key the caller knows the row under: the temporary key for an
/// insert confirmation, otherwise the server key. When the server key differs
/// from the slot the row is moved to the server key whichever side wins, and a
/// row already stored under the server key is replaced.
pub async fn reconcile(
    store: &TableStore,
    slot: i64,
    server: &RemoteRow,
    now: i64,
) -> Result<Reconciled> {
    let pk = store.schema().primary_key().to_string();
    let table = store.schema().name().to_string();
    let key = server.key(&pk).ok_or_else(|| {
        Error::InvalidInput(format!("server row for `{table}` has no integer `{pk}`"))
    })?;
    if key < 0 {
        return Err(Error::InvalidInput(format!(
            "server returned temporary key {key} for `{table}`"
        )));
    }

    let (row, outcome, rekeyed_from) = store
        .transaction(|rows| {
            let mut current_slot = slot;
            let mut local = rows.get_raw(slot)?;
            if local.is_none() && slot != key {
                local = rows.get_raw(key)?;
                current_slot = key;
            }

            let outcome = decide(local.as_ref(), server);
            let rekeyed_from = (current_slot != key).then_some(current_slot);
            match (outcome, local) {
                (Resolution::KeepLocal, Some(mut local)) => {
                    if current_slot != key {
                        rows.delete(key)?;
                        rows.move_key(current_slot, key)?;
                        local.row.set_key(&pk, key);
                    }
                    tracing::debug!(
                        table = %table,
                        key,
                        local_modified = local.meta.modified_date,
                        server_modified = server.modified_date,
                        "Local edit is newer than server row, keeping local"
                    );
                    Ok((local, outcome, rekeyed_from))
                }
                (Resolution::AdoptServer, Some(_)) => {
                    if current_slot != key {
                        rows.delete(key)?;
                    }
                    rows.write_slot(current_slot, &server.to_row(), &SyncMeta::clean(now))?;
                    Ok((rows.reread(key)?, outcome, rekeyed_from))
                }
                _ => {
                    rows.insert(&server.to_row(), &SyncMeta::clean(now))?;
                    Ok((rows.reread(key)?, Resolution::InsertServer, None))
                }
            }
        })
        .await?;

    if let Some(from) = rekeyed_from {
        tracing::debug!(table = store.schema().name(), from, to = key, "Rekeyed row");
    }

    Ok(Reconciled {
        row: store.codec().hydrate(row),
        outcome,
        rekeyed_from,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::RowCodec;
    use crate::config::TableMode;
    use crate::models::Row;
    use crate::schema::{ColumnType, TableSchema};
    use crate::store::LocalStore;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    async fn table() -> TableStore {
        let schema = TableSchema::builder("todos", "id")
            .column("id", ColumnType::Integer)
            .nullable_column("title", ColumnType::Text)
            .nullable_column("modifiedDate", ColumnType::Integer)
            .build()
            .unwrap();
        let codec = RowCodec::new(Arc::new(schema)).with_hydrator(Arc::new(|row: &mut Row| {
            let title = row.get_str("title").unwrap_or_default().len();
            row.set("title_len", title);
        }));
        let store = LocalStore::open_in_memory().await.unwrap();
        TableStore::open(store, codec, TableMode::Preserve, 0)
            .await
            .unwrap()
    }

    fn local(modified: bool, modified_date: i64) -> LocalRow {
        LocalRow::new(
            Row::new().with("id", 1),
            SyncMeta {
                modified,
                modified_date,
                deleted: false,
            },
        )
    }

    fn server(modified_date: i64) -> RemoteRow {
        RemoteRow::new(Row::new().with("id", 1), modified_date)
    }

    #[test]
    fn test_decide_last_writer_wins_by_timestamp() {
        assert_eq!(decide(None, &server(5)), Resolution::InsertServer);
        assert_eq!(decide(Some(&local(false, 10)), &server(5)), Resolution::AdoptServer);
        assert_eq!(decide(Some(&local(true, 10)), &server(5)), Resolution::KeepLocal);
        // Equal timestamps go to the server
        assert_eq!(decide(Some(&local(true, 5)), &server(5)), Resolution::AdoptServer);
        assert_eq!(decide(Some(&local(true, 4)), &server(5)), Resolution::AdoptServer);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_inserts_unknown_server_row() {
        let table = table().await;
        let server = RemoteRow::new(Row::new().with("id", 8).with("title", "abc"), 100);

        let result = reconcile(&table, 8, &server, 7).await.unwrap();
        assert_eq!(result.outcome, Resolution::InsertServer);
        assert_eq!(result.row.row.get("title_len"), Some(&serde_json::json!(3)));

        let stored = table.get_raw(8).await.unwrap().unwrap();
        assert_eq!(stored.meta, SyncMeta::clean(7));
        assert_eq!(stored.row.get("modifiedDate"), Some(&serde_json::json!(100)));
        // Hydrated fields never reach storage
        assert!(!stored.row.contains("title_len"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_rekeys_confirmed_insert() {
        let table = table().await;
        let pending = table
            .insert_pending(Row::new().with("title", "buy milk"), 50)
            .await
            .unwrap();
        let temp = pending.key("id").unwrap();

        let server = RemoteRow::new(Row::new().with("id", 42).with("title", "buy milk"), 1000);
        let result = reconcile(&table, temp, &server, 60).await.unwrap();
        assert_eq!(result.outcome, Resolution::AdoptServer);
        assert_eq!(result.rekeyed_from, Some(temp));

        assert!(table.get_raw(temp).await.unwrap().is_none());
        let stored = table.get_raw(42).await.unwrap().unwrap();
        assert!(!stored.meta.modified);
        assert_eq!(stored.row.key("id"), Some(42));

        // Confirming again is a plain overwrite at the new key
        let again = reconcile(&table, temp, &server, 70).await.unwrap();
        assert_eq!(again.outcome, Resolution::AdoptServer);
        assert_eq!(again.rekeyed_from, None);
        assert_eq!(table.count_modified().await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_newer_local_edit_survives_but_is_rekeyed() {
        let table = table().await;
        let pending = table
            .insert_pending(Row::new().with("title", "local"), 5_000)
            .await
            .unwrap();
        let temp = pending.key("id").unwrap();

        let server = RemoteRow::new(Row::new().with("id", 9).with("title", "server"), 1_000);
        let result = reconcile(&table, temp, &server, 6_000).await.unwrap();
        assert_eq!(result.outcome, Resolution::KeepLocal);
        assert_eq!(result.row.row.get_str("title"), Some("local"));

        let stored = table.get_raw(9).await.unwrap().unwrap();
        assert_eq!(stored.row.get_str("title"), Some("local"));
        assert_eq!(stored.meta, SyncMeta::pending(5_000));
        assert!(table.get_raw(temp).await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_rekey_replaces_row_already_at_server_key() {
        let table = table().await;
        table
            .insert_clean(Row::new().with("id", 42).with("title", "pulled"), 1)
            .await
            .unwrap();
        let pending = table.insert_pending(Row::new().with("title", "mine"), 2).await.unwrap();
        let temp = pending.key("id").unwrap();

        let server = RemoteRow::new(Row::new().with("id", 42).with("title", "mine"), 10);
        reconcile(&table, temp, &server, 11).await.unwrap();

        let rows = table.select(&crate::filter::Filter::new(), false).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].row.get_str("title"), Some("mine"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_rejects_temporary_server_key() {
        let table = table().await;
        let server = RemoteRow::new(Row::new().with("id", -1), 10);
        assert!(matches!(
            reconcile(&table, -1, &server, 1).await,
            Err(Error::InvalidInput(_))
        ));
    }
}
