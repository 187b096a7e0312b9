use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// In-process mutual exclusion per product id.
///
/// Guards the check-then-act window between reading a stock quantity and
/// committing its decrement; it does not serialize across nodes (the version
/// check does that). Locks are acquired in sorted, deduplicated order of
/// product id, which makes overlapping multi-product operations deadlock-free.
#[derive(Default)]
pub struct ProductLockTable {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

/// RAII guard over a set of product locks; releases on drop, on every exit
/// path.
pub struct ProductLockGuard {
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl ProductLockTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, product_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(product_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Acquire exclusive locks for every distinct product in `product_ids`.
    pub async fn acquire(&self, product_ids: &[String]) -> ProductLockGuard {
        let mut ids: Vec<&String> = product_ids.iter().collect();
        ids.sort();
        ids.dedup();

        let mut guards = Vec::with_capacity(ids.len());
        for id in ids {
            let lock = self.lock_for(id);
            guards.push(lock.lock_owned().await);
        }
        ProductLockGuard { _guards: guards }
    }
}
