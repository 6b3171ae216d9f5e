//! Tracking store trait.
//!
//! Strategy seam between the engines and the bookkeeping database. The
//! production backend is [`super::MySqlStore`]; tests use
//! [`super::MemoryStore`]. Engines work with `Arc<dyn TrackingStore>`
//! without knowing the concrete type.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::{FileRecord, FileStatus, MigrateSettings, NewFileRecord, TableRecord, TableStatus};
use super::{OPT_MIGRATE_SETTINGS, OPT_SERVE_LEASE};
use crate::error::Result;

/// The single-flight serve lease, stored as a JSON option blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServeLease {
    /// Opaque holder token for the request that owns the lease.
    pub holder: String,
    /// When the lease expires and may be taken over.
    pub expires_at: DateTime<Utc>,
}

/// Trait for tracking store backends.
///
/// All methods are a single durable read or write; the protocol's
/// restartability depends on every state transition being one of these
/// calls. Implementations must be `Send + Sync`.
#[async_trait]
pub trait TrackingStore: Send + Sync {
    /// Create the bookkeeping tables and indexes. Idempotent.
    async fn init_schema(&self) -> Result<()>;

    // --- options -----------------------------------------------------

    /// Read an option value.
    async fn get_option(&self, key: &str) -> Result<Option<String>>;

    /// Write an option value (upsert).
    async fn set_option(&self, key: &str, value: &str) -> Result<()>;

    // --- file units --------------------------------------------------

    /// Insert a file unit unless one with the same identity hash exists.
    /// Returns `true` if a row was inserted.
    async fn insert_file(&self, record: NewFileRecord) -> Result<bool>;

    /// Look up a file unit by identity hash.
    async fn find_file_by_hash(&self, hash: &str) -> Result<Option<FileRecord>>;

    /// Count all recorded file units.
    async fn count_files(&self) -> Result<i64>;

    /// Count file units with a given status.
    async fn count_files_with_status(&self, status: FileStatus) -> Result<i64>;

    /// The next pending unit in insertion order, regardless of size.
    async fn next_pending_file(&self) -> Result<Option<FileRecord>>;

    /// Pending units smaller than `max_size`, ordered by ascending size,
    /// at most `limit` of them. This is the archive batch selection.
    async fn pending_files_under(&self, max_size: i64, limit: i64) -> Result<Vec<FileRecord>>;

    /// Set the status of a unit, stamping `sending_since` when the new
    /// status is `Sending` and clearing it otherwise.
    async fn set_file_status(&self, id: i64, status: FileStatus) -> Result<()>;

    /// Stamp a unit `Sent` under the archive it was delivered in.
    async fn mark_file_sent(&self, id: i64, sent_filename: &str, checksum: &str) -> Result<()>;

    /// Revert every unit stamped with this exact (name, checksum) pair
    /// back to `Pending`. Returns the number of reverted units.
    async fn unmark_sent(&self, sent_filename: &str, checksum: &str) -> Result<u64>;

    /// Revert units stuck in `Sending` since before `older_than` back to
    /// `Pending`. Returns the number of reclaimed units.
    async fn reclaim_stale_sending(&self, older_than: DateTime<Utc>) -> Result<u64>;

    // --- table units -------------------------------------------------

    /// Count all recorded table units.
    async fn count_tables(&self) -> Result<i64>;

    /// Count table units with a given status.
    async fn count_tables_with_status(&self, status: TableStatus) -> Result<i64>;

    /// Insert a table unit unless one with the same identity hash exists.
    async fn insert_table(&self, record: TableRecord) -> Result<bool>;

    /// The earliest table unit with a given status, in insertion order.
    async fn first_table_with_status(&self, status: TableStatus) -> Result<Option<TableRecord>>;

    /// All table units, for progress computation.
    async fn all_tables(&self) -> Result<Vec<TableRecord>>;

    /// Update a table unit's offset cursor and completion state.
    async fn update_table_progress(
        &self,
        table_name_hash: &str,
        offset: i64,
        status: TableStatus,
    ) -> Result<()>;

    // --- provided helpers --------------------------------------------

    /// Parse the per-migration settings blob, defaulting to empty.
    async fn migrate_settings(&self) -> Result<MigrateSettings> {
        match self.get_option(OPT_MIGRATE_SETTINGS).await? {
            Some(raw) if !raw.is_empty() => Ok(serde_json::from_str(&raw)?),
            _ => Ok(MigrateSettings::default()),
        }
    }

    /// Try to take the single-flight serve lease.
    ///
    /// The lease makes the "at most one in-flight request per migration
    /// key" assumption explicit instead of relying on caller discipline.
    /// An expired lease is taken over. Returns `false` when another
    /// holder currently owns it.
    async fn try_acquire_lease(&self, holder: &str, ttl_secs: i64) -> Result<bool> {
        let now = Utc::now();
        if let Some(raw) = self.get_option(OPT_SERVE_LEASE).await? {
            if !raw.is_empty() {
                if let Ok(lease) = serde_json::from_str::<ServeLease>(&raw) {
                    if lease.expires_at > now && lease.holder != holder {
                        return Ok(false);
                    }
                }
            }
        }
        let lease = ServeLease {
            holder: holder.to_string(),
            expires_at: now + Duration::seconds(ttl_secs),
        };
        self.set_option(OPT_SERVE_LEASE, &serde_json::to_string(&lease)?)
            .await?;
        Ok(true)
    }

    /// Release the serve lease if this holder still owns it.
    async fn release_lease(&self, holder: &str) -> Result<()> {
        if let Some(raw) = self.get_option(OPT_SERVE_LEASE).await? {
            if let Ok(lease) = serde_json::from_str::<ServeLease>(&raw) {
                if lease.holder == holder {
                    self.set_option(OPT_SERVE_LEASE, "").await?;
                }
            }
        }
        Ok(())
    }

    /// Read an integer option, defaulting when absent or malformed.
    async fn get_int_option(&self, key: &str, default: i64) -> Result<i64> {
        Ok(self
            .get_option(key)
            .await?
            .and_then(|v| v.parse().ok())
            .unwrap_or(default))
    }
}
