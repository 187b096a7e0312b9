use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Kind of mutation an event carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    ClientUpsert,
    ProductUpsert,
    UserUpsert,
    OrderCreated,
    StockUpdate,
}

/// One accepted local mutation, as propagated to peers. Immutable once
/// created; `event_id` is the receiver-side deduplication key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationEvent {
    pub event_id: Uuid,
    pub event_type: EventKind,
    pub entity_id: String,
    pub version: u64,
    pub payload: Value,
    pub origin_node: String,
    pub created_at: DateTime<Utc>,
}

/// Constructs events for mutations this node originates.
#[derive(Debug, Clone)]
pub struct EventLog {
    node_id: String,
}

impl EventLog {
    pub fn new(node_id: String) -> Self {
        Self { node_id }
    }

    pub fn record(
        &self,
        event_type: EventKind,
        entity_id: &str,
        version: u64,
        payload: Value,
    ) -> ReplicationEvent {
        ReplicationEvent {
            event_id: Uuid::new_v4(),
            event_type,
            entity_id: entity_id.to_string(),
            version,
            payload,
            origin_node: self.node_id.clone(),
            created_at: Utc::now(),
        }
    }
}
