use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::event::ReplicationEvent;
use super::queue::{PeerQueue, ReplicationQueue};
use crate::config::NodeConfig;
use crate::error::{DbError, DbResult};

/// Header carrying the shared inter-node secret.
pub const REPLICA_TOKEN_HEADER: &str = "X-Replica-Token";

/// Background delivery loop for one peer.
///
/// Sends the queue head as `POST {peer}/replica/event`; a 2xx acknowledges
/// and pops it, anything else (connect error, timeout, non-2xx) leaves it at
/// the head and sleeps the fixed retry interval. Events are never dropped on
/// failure; a down peer just accumulates backlog.
pub struct Dispatcher {
    queue: Arc<PeerQueue>,
    client: reqwest::Client,
    token: String,
    retry_interval: Duration,
    shutdown: watch::Receiver<bool>,
}

impl Dispatcher {
    /// Spawn one dispatcher task per configured peer.
    pub fn spawn_all(
        queues: &ReplicationQueue,
        config: &NodeConfig,
        shutdown: watch::Receiver<bool>,
    ) -> DbResult<Vec<JoinHandle<()>>> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| DbError::NetworkError(e.to_string()))?;

        let mut handles = Vec::with_capacity(queues.peers().len());
        for peer in queues.peers() {
            let dispatcher = Dispatcher {
                queue: peer.clone(),
                client: client.clone(),
                token: config.replication_token.clone(),
                retry_interval: config.retry_interval,
                shutdown: shutdown.clone(),
            };
            info!("Starting replication dispatcher for peer {}", peer.url());
            handles.push(tokio::spawn(dispatcher.run()));
        }
        Ok(handles)
    }

    pub async fn run(mut self) {
        loop {
            if *self.shutdown.borrow() {
                break;
            }

            let Some(event) = self.queue.head() else {
                tokio::select! {
                    _ = self.queue.wait_for_event() => {}
                    changed = self.shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
                continue;
            };

            match self.send(&event).await {
                Ok(()) => {
                    debug!(
                        "Delivered event {} ({:?}) to {}",
                        event.event_id,
                        event.event_type,
                        self.queue.url()
                    );
                    self.queue.acknowledge(event.event_id);
                }
                Err(err) => {
                    warn!(
                        "Delivery to {} failed ({}), retrying in {:?} ({} pending)",
                        self.queue.url(),
                        err,
                        self.retry_interval,
                        self.queue.depth()
                    );
                    tokio::select! {
                        _ = sleep(self.retry_interval) => {}
                        changed = self.shutdown.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                    }
                }
            }
        }
        debug!("Dispatcher for {} stopped", self.queue.url());
    }

    async fn send(&self, event: &ReplicationEvent) -> DbResult<()> {
        let url = format!("{}/replica/event", self.queue.url());
        let response = self
            .client
            .post(&url)
            .header(REPLICA_TOKEN_HEADER, &self.token)
            .json(event)
            .send()
            .await
            .map_err(|e| DbError::NetworkError(e.to_string()))?;

        response
            .error_for_status()
            .map_err(|e| DbError::NetworkError(e.to_string()))?;
        Ok(())
    }
}
