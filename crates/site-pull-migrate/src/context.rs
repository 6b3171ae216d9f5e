//! Serve context: the explicit bundle of everything a request handler needs.
//!
//! All collaborators are chosen at startup and threaded through as one
//! value; request handling never reaches for process-wide state.

use std::sync::Arc;

use sqlx::mysql::MySqlPoolOptions;
use tracing::info;

use crate::config::Config;
use crate::error::Result;
use crate::source::{MysqlSource, SourceDb};
use crate::store::{MySqlStore, TrackingStore};
use crate::transfer::{Archiver, ZipArchiver};

/// Shared, immutable request-handling context.
#[derive(Clone)]
pub struct ServeContext {
    pub config: Arc<Config>,
    pub store: Arc<dyn TrackingStore>,
    /// Absent when the deployment serves files only.
    pub source: Option<Arc<dyn SourceDb>>,
    /// Absent when archive bundling is unavailable; file serving then
    /// falls back to single-file streaming for every unit.
    pub archiver: Option<Arc<dyn Archiver>>,
}

impl ServeContext {
    /// Connect to the site database and build the production context.
    ///
    /// The tracking store and the source reader share one pool: the
    /// bookkeeping tables live in the same database as the site's own
    /// tables.
    pub async fn connect(config: Config) -> Result<Self> {
        let pool = MySqlPoolOptions::new()
            .max_connections(5)
            .connect(&config.database.connection_url())
            .await?;

        let store = MySqlStore::new(pool.clone());
        store.init_schema().await?;
        info!(database = %config.database.database, "tracking store ready");

        Ok(Self {
            config: Arc::new(config),
            store: Arc::new(store),
            source: Some(Arc::new(MysqlSource::new(pool))),
            archiver: Some(Arc::new(ZipArchiver)),
        })
    }

    /// Build a context from explicit parts, used by tests and embedders.
    pub fn new(
        config: Config,
        store: Arc<dyn TrackingStore>,
        source: Option<Arc<dyn SourceDb>>,
        archiver: Option<Arc<dyn Archiver>>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            store,
            source,
            archiver,
        }
    }
}
