//! Source database access.
//!
//! The database transfer engine only ever needs three things from the
//! source: the table list with row counts, a table's CREATE statement, and
//! bounded row slices at increasing offsets. [`SourceDb`] is that seam;
//! the production implementation reads MySQL, tests use the in-memory one.

mod memory;
mod mysql;

pub use memory::{MemorySource, MemoryTable};
pub use mysql::MysqlSource;

use async_trait::async_trait;

use crate::error::Result;

/// One table in the source database.
#[derive(Debug, Clone)]
pub struct SourceTable {
    /// Table name.
    pub name: String,
    /// Total row count at enumeration time.
    pub rows: i64,
}

/// A single column value read from a source row.
///
/// The portable dump treats everything as text unless the column is
/// natively numeric; binary columns are carried as raw bytes and emitted
/// as hex literals so the stream stays valid UTF-8.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Int(i64),
    Uint(u64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
}

/// One row: column names paired with values, in table order.
pub type SqlRow = Vec<(String, SqlValue)>;

/// An exact-match row exclusion on a named column.
#[derive(Debug, Clone, PartialEq)]
pub struct RowExclusion {
    pub column: String,
    pub value: String,
}

impl RowExclusion {
    /// Parse `column:value` entries, skipping malformed ones.
    pub fn parse_list(entries: &[String]) -> Vec<RowExclusion> {
        entries
            .iter()
            .filter_map(|entry| {
                let (column, value) = entry.split_once(':')?;
                if column.is_empty() || value.is_empty() {
                    return None;
                }
                Some(RowExclusion {
                    column: column.to_string(),
                    value: value.to_string(),
                })
            })
            .collect()
    }
}

/// Trait for source database readers.
#[async_trait]
pub trait SourceDb: Send + Sync {
    /// List every table in the source database with its row count.
    async fn list_tables(&self) -> Result<Vec<SourceTable>>;

    /// The table's CREATE statement, emitted once per table at offset 0.
    async fn create_table_sql(&self, table: &str) -> Result<String>;

    /// Fetch rows at `[offset, offset + limit)` in stable order, applying
    /// the row exclusions. Offsets must be requested in increasing order
    /// per table; a short result signals end-of-table.
    async fn fetch_slice(
        &self,
        table: &str,
        offset: i64,
        limit: i64,
        exclusions: &[RowExclusion],
    ) -> Result<Vec<SqlRow>>;
}
