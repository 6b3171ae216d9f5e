//! Configuration type definitions.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Source site configuration.
    pub site: SiteConfig,

    /// Database connection used for both the tracking store and the
    /// source database (the tracking tables live alongside the site's
    /// own tables, which is why table enumeration excludes them).
    pub database: DatabaseConfig,

    /// Batching and streaming knobs.
    #[serde(default)]
    pub transfer: TransferConfig,
}

/// Source site configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    /// Absolute path of the site root to migrate.
    pub root: PathBuf,
}

/// MySQL connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database host.
    pub host: String,

    /// Database port (default: 3306).
    #[serde(default = "default_mysql_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    pub password: String,
}

impl DatabaseConfig {
    /// Build a connection URL for sqlx.
    pub fn connection_url(&self) -> String {
        format!(
            "mysql://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, self.database
        )
    }
}

/// Batching constants governing the transfer protocol.
///
/// All overridable from the config file; the defaults are the protocol's
/// fixed defaults and match what pullers in the field expect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Read size for chunked streaming of file bodies (bytes).
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Maximum number of files bundled into one archive response.
    #[serde(default = "default_max_archive_files")]
    pub max_archive_files: i64,

    /// Files at or above this size are streamed individually instead of
    /// being added to an archive (bytes).
    #[serde(default = "default_max_archive_file_size")]
    pub max_archive_file_size: i64,

    /// Rows fetched per database slice.
    #[serde(default = "default_db_slice_rows")]
    pub db_slice_rows: i64,

    /// Files visited per enumeration window.
    #[serde(default = "default_files_per_window")]
    pub files_per_window: usize,

    /// Units stuck in `sending` longer than this are reclaimed back to
    /// `pending` at the start of the next file-serving request (seconds).
    #[serde(default = "default_sending_lease_secs")]
    pub sending_lease_secs: i64,

    /// Relative paths never transferred, merged with the per-migration
    /// exclusions stored in the tracking store.
    #[serde(default = "default_skip_folders")]
    pub base_skip_folders: Vec<String>,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            max_archive_files: default_max_archive_files(),
            max_archive_file_size: default_max_archive_file_size(),
            db_slice_rows: default_db_slice_rows(),
            files_per_window: default_files_per_window(),
            sending_lease_secs: default_sending_lease_secs(),
            base_skip_folders: default_skip_folders(),
        }
    }
}

fn default_mysql_port() -> u16 {
    3306
}

fn default_chunk_size() -> usize {
    2 * 1024 * 1024
}

fn default_max_archive_files() -> i64 {
    50
}

fn default_max_archive_file_size() -> i64 {
    1024 * 1024
}

fn default_db_slice_rows() -> i64 {
    100
}

fn default_files_per_window() -> usize {
    100
}

fn default_sending_lease_secs() -> i64 {
    300
}

fn default_skip_folders() -> Vec<String> {
    vec![
        "wp-content/cache".to_string(),
        "editor".to_string(),
        "wp-content/upgrade".to_string(),
        "wp-content/instawpbackups".to_string(),
    ]
}
