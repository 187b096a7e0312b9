use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;
use uuid::Uuid;

use super::event::ReplicationEvent;

/// Outbound FIFO for one peer.
///
/// Owned by that peer's dispatcher: the dispatcher reads the head, attempts
/// delivery, and pops only after a 2xx acknowledgement. Events are shared
/// (`Arc`) across peer queues but each queue's ordering is independent.
pub struct PeerQueue {
    url: String,
    pending: Mutex<VecDeque<Arc<ReplicationEvent>>>,
    notify: Notify,
}

impl PeerQueue {
    fn new(url: String) -> Self {
        Self {
            url,
            pending: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn enqueue(&self, event: Arc<ReplicationEvent>) {
        self.pending.lock().push_back(event);
        self.notify.notify_one();
    }

    /// The event currently owed to the peer, if any. Not removed until
    /// acknowledged.
    pub fn head(&self) -> Option<Arc<ReplicationEvent>> {
        self.pending.lock().front().cloned()
    }

    /// Drop the head once the peer acknowledged it. The id guard keeps a
    /// late acknowledgement from popping a different event.
    pub fn acknowledge(&self, event_id: Uuid) {
        let mut pending = self.pending.lock();
        if pending.front().map(|e| e.event_id) == Some(event_id) {
            pending.pop_front();
        }
    }

    pub fn depth(&self) -> usize {
        self.pending.lock().len()
    }

    /// Wait until `enqueue` signals new work.
    pub async fn wait_for_event(&self) {
        self.notify.notified().await;
    }
}

/// All peer queues for this node, built once from configuration and injected
/// into the dispatchers.
pub struct ReplicationQueue {
    peers: Vec<Arc<PeerQueue>>,
}

impl ReplicationQueue {
    pub fn new(peer_urls: &[String]) -> Self {
        Self {
            peers: peer_urls
                .iter()
                .map(|url| Arc::new(PeerQueue::new(url.clone())))
                .collect(),
        }
    }

    /// Queue one event for every configured peer. Returns the shared event
    /// so callers can log it.
    pub fn broadcast(&self, event: ReplicationEvent) -> Arc<ReplicationEvent> {
        let event = Arc::new(event);
        for peer in &self.peers {
            peer.enqueue(event.clone());
        }
        event
    }

    pub fn peers(&self) -> &[Arc<PeerQueue>] {
        &self.peers
    }

    /// Pending-event count per peer URL.
    pub fn depths(&self) -> BTreeMap<String, usize> {
        self.peers
            .iter()
            .map(|peer| (peer.url().to_string(), peer.depth()))
            .collect()
    }
}
