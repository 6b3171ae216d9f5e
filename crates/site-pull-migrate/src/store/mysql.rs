//! MySQL tracking store backend.
//!
//! The bookkeeping tables live in the source site's own database, which is
//! why table enumeration excludes them (`iwp_files_sent`, `iwp_db_sent`,
//! `iwp_options`). Schema creation is idempotent.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::mysql::{MySqlPool, MySqlRow};
use sqlx::Row;

use super::{
    FileRecord, FileStatus, NewFileRecord, TableRecord, TableStatus, TrackingStore, FILES_TABLE,
    OPTIONS_TABLE, TABLES_TABLE,
};
use crate::error::{MigrateError, Result};

/// MySQL tracking store.
pub struct MySqlStore {
    pool: MySqlPool,
}

impl MySqlStore {
    /// Wrap an existing connection pool.
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    /// The underlying pool, shared with the source-database reader.
    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }
}

fn map_file_row(row: &MySqlRow) -> Result<FileRecord> {
    let code: i32 = row.try_get("sent")?;
    let status = FileStatus::from_code(code)
        .ok_or_else(|| MigrateError::State(format!("unknown file status code {code}")))?;
    Ok(FileRecord {
        id: row.try_get("id")?,
        filepath: row.try_get("filepath")?,
        filepath_hash: row.try_get("filepath_hash")?,
        size: row.try_get("size")?,
        status,
        sent_filename: row.try_get("sent_filename")?,
        checksum: row.try_get("checksum")?,
        sending_since: row.try_get("sending_since")?,
    })
}

fn map_table_row(row: &MySqlRow) -> Result<TableRecord> {
    let code: i32 = row.try_get("completed")?;
    let status = TableStatus::from_code(code)
        .ok_or_else(|| MigrateError::State(format!("unknown table status code {code}")))?;
    Ok(TableRecord {
        table_name: row.try_get("table_name")?,
        table_name_hash: row.try_get("table_name_hash")?,
        rows_total: row.try_get("rows_total")?,
        offset: row.try_get("offset")?,
        status,
    })
}

#[async_trait]
impl TrackingStore for MySqlStore {
    async fn init_schema(&self) -> Result<()> {
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {OPTIONS_TABLE} (
                option_key VARCHAR(191) PRIMARY KEY,
                option_value LONGTEXT
            )"
        ))
        .execute(&self.pool)
        .await?;

        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {FILES_TABLE} (
                id BIGINT AUTO_INCREMENT PRIMARY KEY,
                filepath TEXT NOT NULL,
                filepath_hash VARCHAR(64) NOT NULL UNIQUE,
                sent INT NOT NULL DEFAULT 0,
                sent_filename VARCHAR(255) NULL,
                checksum VARCHAR(64) NULL,
                size BIGINT NOT NULL DEFAULT 0,
                sending_since TIMESTAMP NULL,
                INDEX idx_sent (sent),
                INDEX idx_file_size (size)
            )"
        ))
        .execute(&self.pool)
        .await?;

        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {TABLES_TABLE} (
                id BIGINT AUTO_INCREMENT PRIMARY KEY,
                table_name VARCHAR(191) NOT NULL,
                table_name_hash VARCHAR(64) NOT NULL UNIQUE,
                rows_total BIGINT NOT NULL DEFAULT 0,
                `offset` BIGINT NOT NULL DEFAULT 0,
                completed INT NOT NULL DEFAULT 0
            )"
        ))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_option(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query(&format!(
            "SELECT option_value FROM {OPTIONS_TABLE} WHERE option_key = ?"
        ))
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => Ok(row.try_get("option_value")?),
            None => Ok(None),
        }
    }

    async fn set_option(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO {OPTIONS_TABLE} (option_key, option_value) VALUES (?, ?)
             ON DUPLICATE KEY UPDATE option_value = VALUES(option_value)"
        ))
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_file(&self, record: NewFileRecord) -> Result<bool> {
        // INSERT IGNORE + unique hash gives re-enumeration its idempotence.
        let result = sqlx::query(&format!(
            "INSERT IGNORE INTO {FILES_TABLE} (filepath, filepath_hash, sent, size)
             VALUES (?, ?, ?, ?)"
        ))
        .bind(&record.filepath)
        .bind(&record.filepath_hash)
        .bind(record.status.code())
        .bind(record.size)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn find_file_by_hash(&self, hash: &str) -> Result<Option<FileRecord>> {
        let row = sqlx::query(&format!(
            "SELECT * FROM {FILES_TABLE} WHERE filepath_hash = ?"
        ))
        .bind(hash)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(map_file_row).transpose()
    }

    async fn count_files(&self) -> Result<i64> {
        let row = sqlx::query(&format!("SELECT COUNT(*) AS n FROM {FILES_TABLE}"))
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("n")?)
    }

    async fn count_files_with_status(&self, status: FileStatus) -> Result<i64> {
        let row = sqlx::query(&format!(
            "SELECT COUNT(*) AS n FROM {FILES_TABLE} WHERE sent = ?"
        ))
        .bind(status.code())
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("n")?)
    }

    async fn next_pending_file(&self) -> Result<Option<FileRecord>> {
        let row = sqlx::query(&format!(
            "SELECT * FROM {FILES_TABLE} WHERE sent = ? ORDER BY id LIMIT 1"
        ))
        .bind(FileStatus::Pending.code())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(map_file_row).transpose()
    }

    async fn pending_files_under(&self, max_size: i64, limit: i64) -> Result<Vec<FileRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT * FROM {FILES_TABLE} WHERE sent = ? AND size < ?
             ORDER BY size LIMIT ?"
        ))
        .bind(FileStatus::Pending.code())
        .bind(max_size)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(map_file_row).collect()
    }

    async fn set_file_status(&self, id: i64, status: FileStatus) -> Result<()> {
        let sending_since = if status == FileStatus::Sending {
            Some(Utc::now())
        } else {
            None
        };
        sqlx::query(&format!(
            "UPDATE {FILES_TABLE} SET sent = ?, sending_since = ? WHERE id = ?"
        ))
        .bind(status.code())
        .bind(sending_since)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_file_sent(&self, id: i64, sent_filename: &str, checksum: &str) -> Result<()> {
        sqlx::query(&format!(
            "UPDATE {FILES_TABLE}
             SET sent = ?, sent_filename = ?, checksum = ?, sending_since = NULL
             WHERE id = ?"
        ))
        .bind(FileStatus::Sent.code())
        .bind(sent_filename)
        .bind(checksum)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn unmark_sent(&self, sent_filename: &str, checksum: &str) -> Result<u64> {
        let result = sqlx::query(&format!(
            "UPDATE {FILES_TABLE} SET sent = ?
             WHERE sent = ? AND sent_filename = ? AND checksum = ?"
        ))
        .bind(FileStatus::Pending.code())
        .bind(FileStatus::Sent.code())
        .bind(sent_filename)
        .bind(checksum)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn reclaim_stale_sending(&self, older_than: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(&format!(
            "UPDATE {FILES_TABLE} SET sent = ?, sending_since = NULL
             WHERE sent = ? AND (sending_since IS NULL OR sending_since < ?)"
        ))
        .bind(FileStatus::Pending.code())
        .bind(FileStatus::Sending.code())
        .bind(older_than)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn count_tables(&self) -> Result<i64> {
        let row = sqlx::query(&format!("SELECT COUNT(*) AS n FROM {TABLES_TABLE}"))
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("n")?)
    }

    async fn count_tables_with_status(&self, status: TableStatus) -> Result<i64> {
        let row = sqlx::query(&format!(
            "SELECT COUNT(*) AS n FROM {TABLES_TABLE} WHERE completed = ?"
        ))
        .bind(status.code())
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("n")?)
    }

    async fn insert_table(&self, record: TableRecord) -> Result<bool> {
        let result = sqlx::query(&format!(
            "INSERT IGNORE INTO {TABLES_TABLE}
             (table_name, table_name_hash, rows_total, `offset`, completed)
             VALUES (?, ?, ?, ?, ?)"
        ))
        .bind(&record.table_name)
        .bind(&record.table_name_hash)
        .bind(record.rows_total)
        .bind(record.offset)
        .bind(record.status.code())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn first_table_with_status(&self, status: TableStatus) -> Result<Option<TableRecord>> {
        let row = sqlx::query(&format!(
            "SELECT * FROM {TABLES_TABLE} WHERE completed = ? ORDER BY id LIMIT 1"
        ))
        .bind(status.code())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(map_table_row).transpose()
    }

    async fn all_tables(&self) -> Result<Vec<TableRecord>> {
        let rows = sqlx::query(&format!("SELECT * FROM {TABLES_TABLE} ORDER BY id"))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(map_table_row).collect()
    }

    async fn update_table_progress(
        &self,
        table_name_hash: &str,
        offset: i64,
        status: TableStatus,
    ) -> Result<()> {
        sqlx::query(&format!(
            "UPDATE {TABLES_TABLE} SET `offset` = ?, completed = ? WHERE table_name_hash = ?"
        ))
        .bind(offset)
        .bind(status.code())
        .bind(table_name_hash)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
