//! Two-lane scheduling for one job run: a bounded pool for ordinary sources
//! and an exclusive lane for serialized ones.

use std::sync::Arc;

use tokio::sync::{
    OwnedRwLockReadGuard, OwnedRwLockWriteGuard, OwnedSemaphorePermit, RwLock, Semaphore,
};

#[derive(Debug, Clone)]
pub struct Lanes {
    workers: Arc<Semaphore>,
    exclusive: Arc<RwLock<()>>,
}

/// Held for the duration of one source execution.
#[derive(Debug)]
pub struct LaneGuard {
    _permit: Option<OwnedSemaphorePermit>,
    _shared: Option<OwnedRwLockReadGuard<()>>,
    exclusive: Option<OwnedRwLockWriteGuard<()>>,
}

impl LaneGuard {
    pub fn is_exclusive(&self) -> bool {
        self.exclusive.is_some()
    }
}

impl Lanes {
    pub fn new(max_workers: usize) -> Self {
        Self {
            workers: Arc::new(Semaphore::new(max_workers.max(1))),
            exclusive: Arc::new(RwLock::new(())),
        }
    }

    /// Wait for a slot.
    ///
    /// Serialized sources take the lane exclusively and run with nothing
    /// else in flight. Others take a worker permit and share the lane.
    /// The lock is fair, so a waiting serialized source holds back sources
    /// queued after it.
    pub async fn enter(&self, serialized: bool) -> LaneGuard {
        if serialized {
            let lane = Arc::clone(&self.exclusive).write_owned().await;
            return LaneGuard {
                _permit: None,
                _shared: None,
                exclusive: Some(lane),
            };
        }

        // The semaphore is never closed.
        let permit = Arc::clone(&self.workers).acquire_owned().await.ok();
        let lane = Arc::clone(&self.exclusive).read_owned().await;
        LaneGuard {
            _permit: permit,
            _shared: Some(lane),
            exclusive: None,
        }
    }

    /// Worker permits not currently held.
    pub fn available_workers(&self) -> usize {
        self.workers.available_permits()
    }
}
