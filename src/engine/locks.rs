// src/engine/locks.rs

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

/// One async mutex per subject id.
///
/// Phase runs, single-task reruns and manual edits for the same subject
/// hold this lock for their whole duration, so they never interleave.
/// Different subjects proceed independently.
#[derive(Debug, Default, Clone)]
pub struct SubjectLocks {
    inner: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl SubjectLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `subject`.
    pub async fn acquire(&self, subject: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(map.entry(subject.to_string()).or_default())
        };
        debug!(subject = %subject, "waiting for subject lock");
        lock.lock_owned().await
    }

    /// `None` if another invocation currently holds `subject`.
    pub fn try_acquire(&self, subject: &str) -> Option<OwnedMutexGuard<()>> {
        let lock = {
            let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(map.entry(subject.to_string()).or_default())
        };
        lock.try_lock_owned().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_subject_is_exclusive_other_subjects_are_not() {
        let locks = SubjectLocks::new();

        let held = locks.acquire("job-1").await;
        assert!(locks.try_acquire("job-1").is_none());
        assert!(locks.try_acquire("job-2").is_some());

        drop(held);
        assert!(locks.try_acquire("job-1").is_some());
    }
}
