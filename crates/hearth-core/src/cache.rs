//! Short-TTL read-through cache of per-child live status

use hearth_api::ChildLiveStatus;
use hearth_util::{ChildId, HearthError, Result};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Read-through cache keyed by child.
///
/// Each child has a slot holding a generation counter and the cached entry.
/// `invalidate` bumps the generation without waiting, so it can run inside a
/// mutation's critical section. An entry is served only while its generation
/// matches the slot's and its TTL has not elapsed. Concurrent misses queue on
/// the slot and the first one recomputes; the rest observe its result.
pub struct LiveStatusCache {
    ttl: Duration,
    slots: Mutex<HashMap<ChildId, Arc<Slot>>>,
    recomputations: AtomicU64,
}

#[derive(Default)]
struct Slot {
    generation: AtomicU64,
    entry: tokio::sync::Mutex<Option<Cached>>,
}

struct Cached {
    status: ChildLiveStatus,
    generation: u64,
    fetched_at: Instant,
}

impl LiveStatusCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slots: Mutex::new(HashMap::new()),
            recomputations: AtomicU64::new(0),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Return a fresh cached status or compute, store and return a new one.
    pub async fn get_or_compute<F, Fut>(
        &self,
        child_id: &ChildId,
        compute: F,
    ) -> Result<ChildLiveStatus>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ChildLiveStatus>>,
    {
        let slot = self.slot(child_id)?;
        let mut entry = slot.entry.lock().await;

        let generation = slot.generation.load(Ordering::Acquire);
        if let Some(cached) = entry.as_ref()
            && cached.generation == generation
            && cached.fetched_at.elapsed() < self.ttl
        {
            debug!(child_id = %child_id, "Live status cache hit");
            return Ok(cached.status.clone());
        }

        self.recomputations.fetch_add(1, Ordering::Relaxed);
        debug!(child_id = %child_id, generation, "Recomputing live status");

        // An error leaves the previous (stale) entry in place; it will not be
        // served because its generation or age already disqualified it.
        let status = compute().await?;
        *entry = Some(Cached {
            status: status.clone(),
            generation,
            fetched_at: Instant::now(),
        });
        Ok(status)
    }

    /// Mark the child's entry stale. Never blocks.
    pub fn invalidate(&self, child_id: &ChildId) {
        match self.slot(child_id) {
            Ok(slot) => {
                let generation = slot.generation.fetch_add(1, Ordering::AcqRel) + 1;
                debug!(child_id = %child_id, generation, "Live status invalidated");
            }
            Err(e) => debug!(child_id = %child_id, error = %e, "Invalidate skipped"),
        }
    }

    /// Number of recomputations performed so far
    pub fn recomputations(&self) -> u64 {
        self.recomputations.load(Ordering::Relaxed)
    }

    fn slot(&self, child_id: &ChildId) -> Result<Arc<Slot>> {
        let mut slots = self
            .slots
            .lock()
            .map_err(|_| HearthError::internal("status cache poisoned"))?;
        Ok(slots.entry(child_id.clone()).or_default().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn status(child: &str, game: Option<&str>) -> ChildLiveStatus {
        ChildLiveStatus {
            child_id: ChildId::new(child),
            display_name: child.into(),
            is_gaming: game.is_some(),
            current_game: game.map(String::from),
            current_platform: None,
            session_duration: Duration::ZERO,
            remaining_screen_time: Duration::from_secs(3600),
            active_sessions: vec![],
            pending_approvals: vec![],
            computed_at: hearth_util::now(),
        }
    }

    #[tokio::test]
    async fn serves_cached_entry_within_ttl() {
        let cache = LiveStatusCache::new(Duration::from_secs(30));
        let child = ChildId::new("maya");

        let first = cache
            .get_or_compute(&child, || async { Ok(status("maya", Some("Celeste"))) })
            .await
            .unwrap();
        let second = cache
            .get_or_compute(&child, || async { Ok(status("maya", None)) })
            .await
            .unwrap();

        assert_eq!(first.current_game, second.current_game);
        assert_eq!(cache.recomputations(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn recomputes_after_ttl() {
        let cache = LiveStatusCache::new(Duration::from_secs(30));
        let child = ChildId::new("maya");

        cache
            .get_or_compute(&child, || async { Ok(status("maya", Some("Celeste"))) })
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(31)).await;
        let fresh = cache
            .get_or_compute(&child, || async { Ok(status("maya", None)) })
            .await
            .unwrap();

        assert!(!fresh.is_gaming);
        assert_eq!(cache.recomputations(), 2);
    }

    #[tokio::test]
    async fn invalidate_forces_recompute_within_ttl() {
        let cache = LiveStatusCache::new(Duration::from_secs(30));
        let child = ChildId::new("maya");

        cache
            .get_or_compute(&child, || async { Ok(status("maya", Some("Celeste"))) })
            .await
            .unwrap();
        cache.invalidate(&child);
        let fresh = cache
            .get_or_compute(&child, || async { Ok(status("maya", None)) })
            .await
            .unwrap();

        assert!(!fresh.is_gaming);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_misses_collapse_into_one_computation() {
        let cache = Arc::new(LiveStatusCache::new(Duration::from_secs(30)));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_compute(&ChildId::new("maya"), || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(status("maya", Some("Celeste")))
                    })
                    .await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().unwrap().is_gaming);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.recomputations(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn computation_started_before_invalidate_is_not_reused() {
        let cache = Arc::new(LiveStatusCache::new(Duration::from_secs(30)));
        let child = ChildId::new("maya");
        let (started_tx, started_rx) = tokio::sync::oneshot::channel();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

        let slow = {
            let cache = cache.clone();
            let child = child.clone();
            tokio::spawn(async move {
                cache
                    .get_or_compute(&child, || async move {
                        let _ = started_tx.send(());
                        let _ = release_rx.await;
                        Ok(status("maya", Some("Celeste")))
                    })
                    .await
            })
        };

        started_rx.await.unwrap();
        // The session ended while the old view was being computed
        cache.invalidate(&child);
        release_tx.send(()).unwrap();
        slow.await.unwrap().unwrap();

        let after = cache
            .get_or_compute(&child, || async { Ok(status("maya", None)) })
            .await
            .unwrap();
        assert!(!after.is_gaming);
        assert_eq!(cache.recomputations(), 2);
    }

    #[tokio::test]
    async fn failed_computation_is_not_cached() {
        let cache = LiveStatusCache::new(Duration::from_secs(30));
        let child = ChildId::new("maya");

        let err = cache
            .get_or_compute(&child, || async { Err(HearthError::upstream("db down")) })
            .await;
        assert!(err.is_err());

        let ok = cache
            .get_or_compute(&child, || async { Ok(status("maya", None)) })
            .await;
        assert!(ok.is_ok());
        assert_eq!(cache.recomputations(), 2);
    }
}
