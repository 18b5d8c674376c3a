use std::collections::HashMap;
use std::sync::Arc;

use common::SagaId;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Registry of async mutexes, one per operation tree.
///
/// A state-machine step may touch a saga, its parents and its children, so
/// steps are serialised on the tree's root id rather than on a single saga.
#[derive(Clone, Default)]
pub struct TreeLocks {
    locks: Arc<Mutex<HashMap<SagaId, Arc<Mutex<()>>>>>,
}

impl TreeLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to the tree rooted at `root`.
    ///
    /// Not reentrant: the holder must not lock the same tree again.
    pub async fn lock(&self, root: SagaId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            // Entries only referenced by the registry are idle.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(root).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Number of trees currently locked or waited on.
    #[cfg(test)]
    async fn len(&self) -> usize {
        self.locks
            .lock()
            .await
            .values()
            .filter(|lock| Arc::strong_count(lock) > 1)
            .count()
    }

    #[cfg(test)]
    async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_same_tree_is_exclusive() {
        let locks = TreeLocks::new();
        let root = SagaId::new();

        let guard = locks.lock(root).await;
        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.lock(root).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), contender)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_different_trees_do_not_block() {
        let locks = TreeLocks::new();
        let _first = locks.lock(SagaId::new()).await;
        let second = tokio::time::timeout(Duration::from_secs(1), locks.lock(SagaId::new())).await;
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn test_idle_entries_are_pruned() {
        let locks = TreeLocks::new();
        {
            let _guard = locks.lock(SagaId::new()).await;
            assert_eq!(locks.len().await, 1);
        }
        assert!(locks.is_empty().await);

        let _guard = locks.lock(SagaId::new()).await;
        assert_eq!(locks.locks.lock().await.len(), 1);
    }
}
