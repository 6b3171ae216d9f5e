//! In-memory source database for tests.

use async_trait::async_trait;

use super::{RowExclusion, SourceDb, SourceTable, SqlRow, SqlValue};
use crate::error::{MigrateError, Result};

/// One fixture table.
#[derive(Debug, Clone)]
pub struct MemoryTable {
    pub name: String,
    pub create_sql: String,
    pub rows: Vec<SqlRow>,
}

/// In-memory source database.
#[derive(Default)]
pub struct MemorySource {
    tables: Vec<MemoryTable>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a fixture table.
    pub fn with_table(mut self, table: MemoryTable) -> Self {
        self.tables.push(table);
        self
    }

    fn table(&self, name: &str) -> Result<&MemoryTable> {
        self.tables
            .iter()
            .find(|t| t.name == name)
            .ok_or_else(|| MigrateError::State(format!("no such table: {name}")))
    }
}

fn row_excluded(row: &SqlRow, exclusions: &[RowExclusion]) -> bool {
    exclusions.iter().any(|exclusion| {
        row.iter().any(|(column, value)| {
            column == &exclusion.column
                && matches!(value, SqlValue::Text(text) if text == &exclusion.value)
        })
    })
}

#[async_trait]
impl SourceDb for MemorySource {
    async fn list_tables(&self) -> Result<Vec<SourceTable>> {
        Ok(self
            .tables
            .iter()
            .map(|t| SourceTable {
                name: t.name.clone(),
                rows: t.rows.len() as i64,
            })
            .collect())
    }

    async fn create_table_sql(&self, table: &str) -> Result<String> {
        Ok(self.table(table)?.create_sql.clone())
    }

    async fn fetch_slice(
        &self,
        table: &str,
        offset: i64,
        limit: i64,
        exclusions: &[RowExclusion],
    ) -> Result<Vec<SqlRow>> {
        let table = self.table(table)?;
        Ok(table
            .rows
            .iter()
            .filter(|row| !row_excluded(row, exclusions))
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect())
    }
}
