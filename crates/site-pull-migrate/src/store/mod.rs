//! Tracking store: durable per-migration bookkeeping.
//!
//! The store owns all persisted protocol state. The engines hold nothing
//! across requests; every decision is rederived from a store read at the
//! start of a request and a store write at the end.

mod backend;
mod memory;
mod mysql;

pub use backend::TrackingStore;
pub use memory::MemoryStore;
pub use mysql::MySqlStore;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Name of the file-unit tracking table.
pub const FILES_TABLE: &str = "iwp_files_sent";

/// Name of the table-unit tracking table.
pub const TABLES_TABLE: &str = "iwp_db_sent";

/// Name of the key/value options table.
pub const OPTIONS_TABLE: &str = "iwp_options";

/// Option key holding the puller's shared-secret signature.
pub const OPT_API_SIGNATURE: &str = "api_signature";

/// Option key holding the migration key this store belongs to.
pub const OPT_MIGRATE_KEY: &str = "migrate_key";

/// Option key for the persisted total file count of the current pass.
pub const OPT_TOTAL_FILES: &str = "total_files";

/// Option key for the enumeration cursor (index into the walk order).
pub const OPT_CURRENT_FILE_INDEX: &str = "current_file_index";

/// Option key for the per-migration settings blob.
pub const OPT_MIGRATE_SETTINGS: &str = "migrate_settings";

/// Option key for the source site URL.
pub const OPT_SITE_URL: &str = "site_url";

/// Option key for the destination site URL.
pub const OPT_DEST_URL: &str = "dest_url";

/// Option key for the single-flight serve lease.
pub const OPT_SERVE_LEASE: &str = "serve_lease";

/// Delivery status of a file unit.
///
/// Stored as the integer codes the puller already understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    /// Queued, not yet delivered.
    Pending,
    /// Durably stamped as delivered under an archive name + checksum.
    Sent,
    /// Mid-flight in the current request.
    Sending,
    /// Delivery attempted and failed (unreadable, archive insert failed).
    SendFailed,
    /// Ineligible at enumeration time; recorded so it is never retried.
    Unreadable,
}

impl FileStatus {
    /// Wire/store code for this status.
    pub fn code(self) -> i32 {
        match self {
            FileStatus::Pending => 0,
            FileStatus::Sent => 1,
            FileStatus::Sending => 2,
            FileStatus::SendFailed => 3,
            FileStatus::Unreadable => 5,
        }
    }

    /// Parse a store code.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(FileStatus::Pending),
            1 => Some(FileStatus::Sent),
            2 => Some(FileStatus::Sending),
            3 => Some(FileStatus::SendFailed),
            5 => Some(FileStatus::Unreadable),
            _ => None,
        }
    }
}

/// Completion state of a table unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableStatus {
    /// No slice served yet.
    NotStarted,
    /// At least one slice served, more rows may remain.
    InProgress,
    /// A fetched slice came back short; the table is done.
    Complete,
}

impl TableStatus {
    /// Wire/store code for this status.
    pub fn code(self) -> i32 {
        match self {
            TableStatus::NotStarted => 0,
            TableStatus::Complete => 1,
            TableStatus::InProgress => 2,
        }
    }

    /// Parse a store code.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(TableStatus::NotStarted),
            1 => Some(TableStatus::Complete),
            2 => Some(TableStatus::InProgress),
            _ => None,
        }
    }
}

/// One source-tree file queued for transfer.
#[derive(Debug, Clone)]
pub struct FileRecord {
    /// Store row id.
    pub id: i64,

    /// Absolute path of the source file.
    pub filepath: String,

    /// SHA256 of the absolute path; the unit's stable identity key.
    /// Re-enumeration looks this up before inserting, so re-walks never
    /// create duplicates.
    pub filepath_hash: String,

    /// Byte size recorded at enumeration time.
    pub size: i64,

    /// Delivery status.
    pub status: FileStatus,

    /// Name of the archive this unit was delivered in, once sent.
    pub sent_filename: Option<String>,

    /// Checksum of the archive this unit was delivered in, once sent.
    pub checksum: Option<String>,

    /// When this unit entered `Sending`, for stale-flight reclaim.
    pub sending_since: Option<chrono::DateTime<chrono::Utc>>,
}

/// A new file unit to record.
#[derive(Debug, Clone)]
pub struct NewFileRecord {
    pub filepath: String,
    pub filepath_hash: String,
    pub size: i64,
    pub status: FileStatus,
}

/// One source database table queued for transfer.
#[derive(Debug, Clone)]
pub struct TableRecord {
    /// Table name in the source database.
    pub table_name: String,

    /// SHA256 of the table name; the unit's identity key.
    pub table_name_hash: String,

    /// Total row count captured at enumeration time.
    pub rows_total: i64,

    /// Next row offset to serve. Monotonically non-decreasing.
    pub offset: i64,

    /// Completion state.
    pub status: TableStatus,
}

impl TableRecord {
    /// Create a not-started record for a freshly enumerated table.
    pub fn new(table_name: impl Into<String>, rows_total: i64) -> Self {
        let table_name = table_name.into();
        let table_name_hash = hash_identity(&table_name);
        Self {
            table_name,
            table_name_hash,
            rows_total,
            offset: 0,
            status: TableStatus::NotStarted,
        }
    }
}

/// Per-migration settings pushed into the store by the orchestrator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MigrateSettings {
    /// Relative paths excluded from the file walk.
    #[serde(default)]
    pub excluded_paths: Vec<String>,

    /// Tables never transferred.
    #[serde(default)]
    pub excluded_tables: Vec<String>,

    /// Per-table row exclusions, each entry `column:value`.
    #[serde(default)]
    pub excluded_tables_rows: HashMap<String, Vec<String>>,

    /// Free-form option flags (e.g. `skip_media_folder`).
    #[serde(default)]
    pub options: Vec<String>,
}

impl MigrateSettings {
    /// Whether a named option flag is set.
    pub fn has_option(&self, name: &str) -> bool {
        self.options.iter().any(|o| o == name)
    }
}

/// SHA256 hex digest used as the identity key for paths and table names.
pub fn hash_identity(input: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}
