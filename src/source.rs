//! Row source boundary.
//!
//! The storage layer owns rows. The engine only ever asks it for one thing:
//! the caller's own row in a table, addressed by the caller's subject id. The
//! trait has no general query method: a self-referential predicate can only
//! reach the caller's own row.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::RwLock;

use crate::errors::{AccessError, AccessResult};
use crate::row::Row;

/// Future returned by external collaborators
pub type SourceFuture<'a, T> = Pin<Box<dyn Future<Output = AccessResult<T>> + Send + 'a>>;

/// Storage-side lookup of a caller's own row
pub trait RowSource: Send + Sync {
    /// The row of `table` whose id is `subject_id`, if any
    fn fetch_own_row<'a>(&'a self, table: &'a str, subject_id: &'a str) -> SourceFuture<'a, Option<Row>>;
}

/// In-memory row store
#[derive(Debug, Default)]
pub struct MemoryRowSource {
    tables: RwLock<HashMap<String, HashMap<String, Row>>>,
}

impl MemoryRowSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a row
    pub fn upsert(&self, row: Row) -> AccessResult<()> {
        let mut tables = self.tables.write().map_err(poisoned)?;
        tables
            .entry(row.table().to_string())
            .or_default()
            .insert(row.id().to_string(), row);
        Ok(())
    }

    pub fn remove(&self, table: &str, id: &str) -> AccessResult<Option<Row>> {
        let mut tables = self.tables.write().map_err(poisoned)?;
        Ok(tables.get_mut(table).and_then(|rows| rows.remove(id)))
    }

    /// Every row of `table`, sorted by id (storage-side, unfiltered)
    pub fn scan(&self, table: &str) -> AccessResult<Vec<Row>> {
        let tables = self.tables.read().map_err(poisoned)?;
        let mut rows: Vec<Row> = tables
            .get(table)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default();
        rows.sort_by(|a, b| a.id().cmp(b.id()));
        Ok(rows)
    }
}

fn poisoned<T>(_: T) -> AccessError {
    AccessError::StorageError("Lock poisoned".to_string())
}

impl RowSource for MemoryRowSource {
    fn fetch_own_row<'a>(&'a self, table: &'a str, subject_id: &'a str) -> SourceFuture<'a, Option<Row>> {
        Box::pin(async move {
            let tables = self.tables.read().map_err(poisoned)?;
            Ok(tables.get(table).and_then(|rows| rows.get(subject_id)).cloned())
        })
    }
}
