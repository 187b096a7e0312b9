use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;

use crate::error::DbResult;
use crate::replication::ReplicationQueue;
use crate::store::{EntityKind, StockRecord, StorageEngine};

#[derive(Debug, Serialize)]
pub struct EntityCounts {
    pub clients: usize,
    pub products: usize,
    pub users: usize,
    pub orders: usize,
}

#[derive(Debug, Serialize)]
pub struct ReplicationStatus {
    pub peers: Vec<String>,
    pub pending: BTreeMap<String, usize>,
}

#[derive(Debug, Serialize)]
pub struct StatusSnapshot {
    pub node: String,
    pub entities: EntityCounts,
    pub stock: BTreeMap<String, StockRecord>,
    pub replication: ReplicationStatus,
}

/// Read-only introspection over the store and the outbound queues. Takes no
/// locks of its own, so it can never block a mutation.
pub struct StatusReporter {
    engine: Arc<StorageEngine>,
    queues: Arc<ReplicationQueue>,
    node_id: String,
}

impl StatusReporter {
    pub fn new(engine: Arc<StorageEngine>, queues: Arc<ReplicationQueue>, node_id: String) -> Self {
        Self {
            engine,
            queues,
            node_id,
        }
    }

    pub fn snapshot(&self) -> DbResult<StatusSnapshot> {
        let stock: Vec<StockRecord> = self.engine.list(EntityKind::Stock)?;

        Ok(StatusSnapshot {
            node: self.node_id.clone(),
            entities: EntityCounts {
                clients: self.engine.count(EntityKind::Client),
                products: self.engine.count(EntityKind::Product),
                users: self.engine.count(EntityKind::User),
                orders: self.engine.count(EntityKind::Order),
            },
            stock: stock
                .into_iter()
                .map(|entry| (entry.product_id.clone(), entry))
                .collect(),
            replication: ReplicationStatus {
                peers: self
                    .queues
                    .peers()
                    .iter()
                    .map(|p| p.url().to_string())
                    .collect(),
                pending: self.queues.depths(),
            },
        })
    }
}
