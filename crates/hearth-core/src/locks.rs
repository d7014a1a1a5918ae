//! Per-child critical sections

use hearth_util::{ChildId, HearthError, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::OwnedMutexGuard;
use tracing::debug;

use crate::RequestContext;

/// Serializes mutations for one child while different children proceed
/// independently. Waiters are granted the lock in arrival order.
#[derive(Default)]
pub struct ChildLocks {
    locks: Mutex<HashMap<ChildId, Arc<tokio::sync::Mutex<()>>>>,
}

/// Held for the duration of a child's mutation
pub type ChildGuard = OwnedMutexGuard<()>;

impl ChildLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the child's critical section before `ctx.deadline`.
    pub async fn acquire(&self, ctx: &RequestContext, child_id: &ChildId) -> Result<ChildGuard> {
        // A lock that happens to be free must not mask an already-missed deadline
        if ctx.is_expired() {
            return Err(HearthError::deadline(format!("locking child {}", child_id)));
        }

        let lock = self.lock_for(child_id)?;
        match tokio::time::timeout_at(ctx.deadline, lock.lock_owned()).await {
            Ok(guard) => Ok(guard),
            Err(_) => {
                debug!(child_id = %child_id, "Deadline passed waiting for child lock");
                Err(HearthError::deadline(format!("locking child {}", child_id)))
            }
        }
    }

    fn lock_for(&self, child_id: &ChildId) -> Result<Arc<tokio::sync::Mutex<()>>> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| HearthError::internal("child lock table poisoned"))?;
        Ok(locks.entry(child_id.clone()).or_default().clone())
    }
}
