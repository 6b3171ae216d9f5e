//! In-memory tracking store.
//!
//! Backs the test suite and embedders that need a throwaway store. Same
//! contract as the MySQL backend, minus durability.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;

use super::{FileRecord, FileStatus, NewFileRecord, TableRecord, TableStatus, TrackingStore};
use crate::error::Result;

#[derive(Default)]
struct Inner {
    options: HashMap<String, String>,
    files: Vec<FileRecord>,
    next_file_id: i64,
    tables: Vec<TableRecord>,
}

/// In-memory tracking store.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TrackingStore for MemoryStore {
    async fn init_schema(&self) -> Result<()> {
        Ok(())
    }

    async fn get_option(&self, key: &str) -> Result<Option<String>> {
        Ok(self.inner.lock().await.options.get(key).cloned())
    }

    async fn set_option(&self, key: &str, value: &str) -> Result<()> {
        self.inner
            .lock()
            .await
            .options
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn insert_file(&self, record: NewFileRecord) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        if inner
            .files
            .iter()
            .any(|f| f.filepath_hash == record.filepath_hash)
        {
            return Ok(false);
        }
        inner.next_file_id += 1;
        let id = inner.next_file_id;
        inner.files.push(FileRecord {
            id,
            filepath: record.filepath,
            filepath_hash: record.filepath_hash,
            size: record.size,
            status: record.status,
            sent_filename: None,
            checksum: None,
            sending_since: None,
        });
        Ok(true)
    }

    async fn find_file_by_hash(&self, hash: &str) -> Result<Option<FileRecord>> {
        Ok(self
            .inner
            .lock()
            .await
            .files
            .iter()
            .find(|f| f.filepath_hash == hash)
            .cloned())
    }

    async fn count_files(&self) -> Result<i64> {
        Ok(self.inner.lock().await.files.len() as i64)
    }

    async fn count_files_with_status(&self, status: FileStatus) -> Result<i64> {
        Ok(self
            .inner
            .lock()
            .await
            .files
            .iter()
            .filter(|f| f.status == status)
            .count() as i64)
    }

    async fn next_pending_file(&self) -> Result<Option<FileRecord>> {
        Ok(self
            .inner
            .lock()
            .await
            .files
            .iter()
            .find(|f| f.status == FileStatus::Pending)
            .cloned())
    }

    async fn pending_files_under(&self, max_size: i64, limit: i64) -> Result<Vec<FileRecord>> {
        let inner = self.inner.lock().await;
        let mut matching: Vec<FileRecord> = inner
            .files
            .iter()
            .filter(|f| f.status == FileStatus::Pending && f.size < max_size)
            .cloned()
            .collect();
        matching.sort_by_key(|f| f.size);
        matching.truncate(limit as usize);
        Ok(matching)
    }

    async fn set_file_status(&self, id: i64, status: FileStatus) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if let Some(file) = inner.files.iter_mut().find(|f| f.id == id) {
            file.status = status;
            file.sending_since = if status == FileStatus::Sending {
                Some(Utc::now())
            } else {
                None
            };
        }
        Ok(())
    }

    async fn mark_file_sent(&self, id: i64, sent_filename: &str, checksum: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if let Some(file) = inner.files.iter_mut().find(|f| f.id == id) {
            file.status = FileStatus::Sent;
            file.sent_filename = Some(sent_filename.to_string());
            file.checksum = Some(checksum.to_string());
            file.sending_since = None;
        }
        Ok(())
    }

    async fn unmark_sent(&self, sent_filename: &str, checksum: &str) -> Result<u64> {
        let mut inner = self.inner.lock().await;
        let mut reverted = 0;
        for file in inner.files.iter_mut() {
            if file.sent_filename.as_deref() == Some(sent_filename)
                && file.checksum.as_deref() == Some(checksum)
                && file.status == FileStatus::Sent
            {
                file.status = FileStatus::Pending;
                reverted += 1;
            }
        }
        Ok(reverted)
    }

    async fn reclaim_stale_sending(&self, older_than: DateTime<Utc>) -> Result<u64> {
        let mut inner = self.inner.lock().await;
        let mut reclaimed = 0;
        for file in inner.files.iter_mut() {
            if file.status == FileStatus::Sending
                && file.sending_since.map(|t| t < older_than).unwrap_or(true)
            {
                file.status = FileStatus::Pending;
                file.sending_since = None;
                reclaimed += 1;
            }
        }
        Ok(reclaimed)
    }

    async fn count_tables(&self) -> Result<i64> {
        Ok(self.inner.lock().await.tables.len() as i64)
    }

    async fn count_tables_with_status(&self, status: TableStatus) -> Result<i64> {
        Ok(self
            .inner
            .lock()
            .await
            .tables
            .iter()
            .filter(|t| t.status == status)
            .count() as i64)
    }

    async fn insert_table(&self, record: TableRecord) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        if inner
            .tables
            .iter()
            .any(|t| t.table_name_hash == record.table_name_hash)
        {
            return Ok(false);
        }
        inner.tables.push(record);
        Ok(true)
    }

    async fn first_table_with_status(&self, status: TableStatus) -> Result<Option<TableRecord>> {
        Ok(self
            .inner
            .lock()
            .await
            .tables
            .iter()
            .find(|t| t.status == status)
            .cloned())
    }

    async fn all_tables(&self) -> Result<Vec<TableRecord>> {
        Ok(self.inner.lock().await.tables.clone())
    }

    async fn update_table_progress(
        &self,
        table_name_hash: &str,
        offset: i64,
        status: TableStatus,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if let Some(table) = inner
            .tables
            .iter_mut()
            .find(|t| t.table_name_hash == table_name_hash)
        {
            table.offset = offset;
            table.status = status;
        }
        Ok(())
    }
}
