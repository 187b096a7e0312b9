use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use super::event::{EventKind, ReplicationEvent};
use crate::error::{DbError, DbResult};
use crate::inventory::InventoryService;
use crate::server::auth::constant_time_eq;
use crate::store::{ApplyOutcome, ClientRecord, OrderRecord, ProductRecord, StockRecord, UserRecord};

/// Result of receiving one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveOutcome {
    /// The event mutated local state.
    Accepted,
    /// Already seen, or stale version: no side effects.
    DuplicateIgnored,
}

/// Bounded memory of recently applied event ids.
///
/// Retry storms present the same event id many times; the ledger
/// short-circuits those without touching the store. Eviction is safe: the
/// per-entity version check still rejects anything an evicted id could
/// re-deliver.
pub struct SeenLedger {
    recent: Mutex<LruCache<Uuid, ()>>,
}

impl SeenLedger {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            recent: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn contains(&self, event_id: Uuid) -> bool {
        self.recent.lock().get(&event_id).is_some()
    }

    pub fn record(&self, event_id: Uuid) {
        self.recent.lock().put(event_id, ());
    }
}

fn required<T: DeserializeOwned>(payload: &Value, key: &str) -> DbResult<T> {
    let value = payload
        .get(key)
        .filter(|v| !v.is_null())
        .cloned()
        .ok_or_else(|| DbError::BadRequest(format!("event payload missing '{}'", key)))?;
    serde_json::from_value(value)
        .map_err(|e| DbError::BadRequest(format!("invalid '{}' payload: {}", key, e)))
}

fn optional<T: DeserializeOwned>(payload: &Value, key: &str) -> DbResult<Option<T>> {
    match payload.get(key) {
        None => Ok(None),
        Some(Value::Null) => Ok(None),
        Some(value) => serde_json::from_value(value.clone())
            .map(Some)
            .map_err(|e| DbError::BadRequest(format!("invalid '{}' payload: {}", key, e))),
    }
}

/// Inbound side of replication: authenticates the peer, deduplicates by
/// event id, and applies through the same versioned-apply rule local writes
/// use.
pub struct ReplicaReceiver {
    inventory: Arc<InventoryService>,
    ledger: SeenLedger,
    token: String,
}

impl ReplicaReceiver {
    pub fn new(inventory: Arc<InventoryService>, token: String, seen_capacity: usize) -> Self {
        Self {
            inventory,
            ledger: SeenLedger::new(seen_capacity),
            token,
        }
    }

    pub async fn receive(
        &self,
        event: &ReplicationEvent,
        presented_token: Option<&str>,
    ) -> DbResult<ReceiveOutcome> {
        let presented = presented_token.unwrap_or("");
        if !constant_time_eq(presented.as_bytes(), self.token.as_bytes()) {
            return Err(DbError::ReplicaTokenMismatch);
        }

        if self.ledger.contains(event.event_id) {
            debug!("Event {} already applied, ignoring", event.event_id);
            return Ok(ReceiveOutcome::DuplicateIgnored);
        }

        let outcome = self.apply(event).await?;
        // Only a fully handled event is remembered; a failed apply (e.g. a
        // missing product) must stay retryable.
        self.ledger.record(event.event_id);

        Ok(match outcome {
            ApplyOutcome::Applied { .. } => ReceiveOutcome::Accepted,
            ApplyOutcome::Skipped { .. } => ReceiveOutcome::DuplicateIgnored,
        })
    }

    async fn apply(&self, event: &ReplicationEvent) -> DbResult<ApplyOutcome> {
        match event.event_type {
            EventKind::ClientUpsert => {
                let client: ClientRecord = required(&event.payload, "client")?;
                self.inventory.apply_remote_client(client)
            }
            EventKind::ProductUpsert => {
                let product: ProductRecord = required(&event.payload, "product")?;
                self.inventory.apply_remote_product(product)
            }
            EventKind::UserUpsert => {
                let user: UserRecord = required(&event.payload, "user")?;
                self.inventory.apply_remote_user(user)
            }
            EventKind::StockUpdate => {
                if let Some(product) = optional::<ProductRecord>(&event.payload, "product")? {
                    self.inventory.apply_remote_product(product)?;
                }
                let entry: StockRecord = required(&event.payload, "entry")?;
                self.inventory.apply_remote_stock(entry).await
            }
            EventKind::OrderCreated => {
                let order: OrderRecord = required(&event.payload, "order")?;
                let client: Option<ClientRecord> = optional(&event.payload, "client")?;
                let products: Vec<ProductRecord> =
                    optional(&event.payload, "products")?.unwrap_or_default();
                self.inventory.apply_remote_order(order, client, products)
            }
        }
    }
}
