//! Slide administrator: the tower's dedicated arbitration task.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::tower::LookoutTower;

/// Spawn the administrator for `tower`. It runs until `shutdown` fires.
pub fn spawn_slide_admin(tower: Arc<LookoutTower>, shutdown: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut assigned: u64 = 0;
        while tower.assign_next_slide(&shutdown).await.is_ok() {
            assigned += 1;
        }
        tracing::debug!(assigned, "Slide administrator exiting");
    })
}
