//! Table enumerator: lists source tables once, with row counts.

use std::sync::Arc;
use tracing::info;

use crate::error::Result;
use crate::source::SourceDb;
use crate::store::{TableRecord, TrackingStore};

/// Records one pending unit per transferable source table.
pub struct TableEnumerator {
    store: Arc<dyn TrackingStore>,
    source: Arc<dyn SourceDb>,
}

impl TableEnumerator {
    pub fn new(store: Arc<dyn TrackingStore>, source: Arc<dyn SourceDb>) -> Self {
        Self { store, source }
    }

    /// Enumerate once per migration.
    ///
    /// Guarded by the tracking table's own row count: a non-empty ledger
    /// means the pass already ran. `excluded` must already contain the
    /// bookkeeping tables themselves, so the protocol never tries to
    /// transfer its own ledger.
    pub async fn run_once(&self, excluded: &[String]) -> Result<usize> {
        if self.store.count_tables().await? > 0 {
            return Ok(0);
        }

        let mut recorded = 0;
        for table in self.source.list_tables().await? {
            if excluded.iter().any(|e| e == &table.name) {
                continue;
            }
            if self
                .store
                .insert_table(TableRecord::new(&table.name, table.rows))
                .await?
            {
                recorded += 1;
            }
        }

        info!(recorded, "table enumeration finished");
        Ok(recorded)
    }
}
