use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// Per-order mutual exclusion. Different orders never contend.
#[derive(Default)]
pub struct OrderLocks {
    locks: Arc<DashMap<Uuid, Arc<Mutex<()>>>>,
}

impl OrderLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, order_id: Uuid) -> OrderGuard {
        let lock = self.locks.entry(order_id).or_default().value().clone();
        let guard = lock.lock_owned().await;

        OrderGuard {
            order_id,
            guard: Some(guard),
            locks: self.locks.clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

pub struct OrderGuard {
    order_id: Uuid,
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<DashMap<Uuid, Arc<Mutex<()>>>>,
}

impl Drop for OrderGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Entry is dropped once nobody else holds or waits on it.
        self.locks
            .remove_if(&self.order_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::sync::Mutex;
    use uuid::Uuid;

    use super::OrderLocks;

    #[tokio::test]
    async fn same_order_is_serialized() {
        let locks = Arc::new(OrderLocks::new());
        let order_id = Uuid::new_v4();
        let log = Arc::new(Mutex::new(Vec::new()));

        let first = locks.acquire(order_id).await;

        let task = {
            let locks = locks.clone();
            let log = log.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire(order_id).await;
                log.lock().await.push("second");
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        log.lock().await.push("first");
        drop(first);

        task.await.unwrap();
        assert_eq!(*log.lock().await, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn different_orders_do_not_block_each_other() {
        let locks = OrderLocks::new();
        let _a = locks.acquire(Uuid::new_v4()).await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.acquire(Uuid::new_v4())).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn released_locks_are_pruned() {
        let locks = OrderLocks::new();
        let guard = locks.acquire(Uuid::new_v4()).await;
        assert_eq!(locks.len(), 1);
        drop(guard);
        assert!(locks.is_empty());
    }
}
