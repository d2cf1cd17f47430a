use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// key: payout-locks -> per-payment exclusive section
///
/// Serializes transitions inside one process; the store's compare-and-set covers the rest.
#[derive(Clone, Default)]
pub struct PaymentLocks {
    inner: Arc<DashMap<Uuid, Arc<Mutex<()>>>>,
}

impl PaymentLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, payment_id: Uuid) -> OwnedMutexGuard<()> {
        // clone out of the map so the shard guard is dropped before awaiting
        let lock = self
            .inner
            .entry(payment_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Drops lock entries nobody is holding or waiting on.
    pub fn prune(&self) {
        self.inner.retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
