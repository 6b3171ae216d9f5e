//! # site-pull-migrate
//!
//! Resumable pull-transfer site migration library.
//!
//! This library serves a live site (files + database) to a remote puller
//! over plain stateless HTTP, with support for:
//!
//! - **Resumable transfers** driven by a durable tracking store
//! - **Bounded batches**: archive bundles for small files, chunked
//!   streaming for large ones, sliced SQL for the database
//! - **Idempotent restarts**: every request is one complete state
//!   transition, safe to repeat after a crash
//! - **Explicit reconciliation** so the puller can revert a delivery it
//!   failed to unpack
//!
//! ## Example
//!
//! ```rust,no_run
//! use site_pull_migrate::{server, Config, ServeContext};
//!
//! #[tokio::main]
//! async fn main() -> site_pull_migrate::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let ctx = ServeContext::connect(config).await?;
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//!     axum::serve(listener, server::router(ctx)).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod context;
pub mod enumerate;
pub mod error;
pub mod policy;
pub mod server;
pub mod source;
pub mod store;
pub mod transfer;

// Re-exports for convenient access
pub use config::{Config, DatabaseConfig, SiteConfig, TransferConfig};
pub use context::ServeContext;
pub use error::{MigrateError, Result};
pub use source::{MysqlSource, SourceDb, SqlValue};
pub use store::{FileStatus, MemoryStore, MySqlStore, TableStatus, TrackingStore};
pub use transfer::{DbTransferEngine, FileServeOutcome, FileTransferEngine, Reconciler};
