//! Reconciliation: the puller's explicit negative acknowledgment.
//!
//! When the puller fails to unpack a delivered archive it calls back with
//! the archive's name and checksum; every unit stamped under that exact
//! pair reverts to pending and is re-served on a later request.

use std::sync::Arc;

use tracing::info;

use crate::error::{MigrateError, Result};
use crate::store::TrackingStore;

pub struct Reconciler {
    store: Arc<dyn TrackingStore>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn TrackingStore>) -> Self {
        Self { store }
    }

    /// Revert a failed delivery. Both identifiers are required; matching
    /// on a checksum alone could claw back units from a different archive
    /// that happened to collide.
    pub async fn unmark(&self, sent_filename: &str, checksum: &str) -> Result<u64> {
        if sent_filename.is_empty() || checksum.is_empty() {
            return Err(MigrateError::precondition(
                "reconciliation requires both sent_filename and checksum",
            ));
        }
        let reverted = self.store.unmark_sent(sent_filename, checksum).await?;
        info!(sent_filename, checksum, reverted, "delivery reverted to pending");
        Ok(reverted)
    }
}
