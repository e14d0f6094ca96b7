//! Per-instance lock table.
//!
//! Every operation that reads the current task and then writes the next one
//! (`iterate`, `finish_task`, `restart_workflow`, context writes) runs while
//! holding the instance's lock. Different instances never contend.
//!
//! Entries are created on demand and removed once the last holder or waiter
//! lets go, so the table only ever contains instances being worked on.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// Lock table keyed by instance ID.
///
/// Cloning produces a shared view of the same table (backed by `Arc`).
#[derive(Debug, Clone, Default)]
pub struct InstanceLocks {
    inner: Arc<DashMap<Uuid, Arc<Mutex<()>>>>,
}

impl InstanceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for the lock of `instance_id`, giving up after `limit`.
    pub async fn acquire(
        &self,
        instance_id: Uuid,
        limit: Duration,
    ) -> Result<InstanceGuard, LockTimeout> {
        // Clone the mutex out so no DashMap guard is held across the await.
        let mutex = self
            .inner
            .entry(instance_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        match tokio::time::timeout(limit, mutex.lock_owned()).await {
            Ok(guard) => Ok(InstanceGuard {
                guard: Some(guard),
                table: self.inner.clone(),
                instance_id,
            }),
            Err(_) => {
                self.release_entry(instance_id);
                Err(LockTimeout { instance_id, waited: limit })
            }
        }
    }

    /// Number of instances currently locked or waited on.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    fn release_entry(&self, instance_id: Uuid) {
        release(&self.inner, instance_id);
    }
}

fn release(table: &DashMap<Uuid, Arc<Mutex<()>>>, instance_id: Uuid) {
    table.remove_if(&instance_id, |_, mutex| Arc::strong_count(mutex) == 1);
}

/// Held lock on one instance; released on drop, including on error paths.
#[derive(Debug)]
pub struct InstanceGuard {
    guard: Option<OwnedMutexGuard<()>>,
    table: Arc<DashMap<Uuid, Arc<Mutex<()>>>>,
    instance_id: Uuid,
}

impl InstanceGuard {
    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }
}

impl Drop for InstanceGuard {
    fn drop(&mut self) {
        // The owned guard holds a strong reference to the mutex; drop it first.
        self.guard.take();
        release(&self.table, self.instance_id);
    }
}

/// The lock could not be acquired in time.
#[derive(Debug, Clone, thiserror::Error)]
#[error("timed out after {waited:?} waiting for the lock of instance {instance_id}")]
pub struct LockTimeout {
    pub instance_id: Uuid,
    pub waited: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_guard_releases_entry_on_drop() {
        let locks = InstanceLocks::new();
        let id = Uuid::now_v7();
        {
            let guard = locks.acquire(id, Duration::from_secs(1)).await.unwrap();
            assert_eq!(guard.instance_id(), id);
            assert_eq!(locks.len(), 1);
        }
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_second_acquire_times_out_while_held() {
        let locks = InstanceLocks::new();
        let id = Uuid::now_v7();
        let _held = locks.acquire(id, Duration::from_secs(1)).await.unwrap();

        let err = locks.acquire(id, Duration::from_millis(20)).await.unwrap_err();
        assert_eq!(err.instance_id, id);
        assert_eq!(locks.len(), 1);
    }

    #[tokio::test]
    async fn test_different_instances_do_not_contend() {
        let locks = InstanceLocks::new();
        let _a = locks.acquire(Uuid::now_v7(), Duration::from_secs(1)).await.unwrap();
        let _b = locks
            .acquire(Uuid::now_v7(), Duration::from_millis(20))
            .await
            .unwrap();
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_mutual_exclusion() {
        let locks = InstanceLocks::new();
        let id = Uuid::now_v7();
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let locks = locks.clone();
            let inside = inside.clone();
            let max_seen = max_seen.clone();
            handles.push(tokio::spawn(async move {
                let _guard = locks.acquire(id, Duration::from_secs(5)).await.unwrap();
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert!(locks.is_empty());
    }
}
