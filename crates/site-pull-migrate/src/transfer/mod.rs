//! Transfer engines.
//!
//! Each engine handles one serve operation end to end: read state from
//! the tracking store, prepare at most one bounded batch, and hand the
//! caller everything needed to stream it and acknowledge it afterwards.

pub mod archive;
pub mod db;
pub mod files;
pub mod reconcile;

pub use archive::{archive_checksum, ArchiveWriter, Archiver, ZipArchiver};
pub use db::{DbServeOutcome, DbTransferEngine};
pub use files::{ArchiveDelivery, FileServeOutcome, FileTransferEngine, SingleDelivery};
pub use reconcile::Reconciler;
