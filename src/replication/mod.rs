//! Peer-to-peer replication: event construction, per-peer outbound queues
//! with retrying dispatchers, and the idempotent inbound receiver.
//!
//! Every node is an equal primary. A committed local mutation becomes one
//! immutable event, queued FIFO per peer and redelivered until acknowledged;
//! receivers deduplicate by event id and by per-entity version, so delivery
//! is at-least-once while application stays at-most-once.

pub mod dispatcher;
pub mod event;
pub mod queue;
pub mod receiver;

pub use dispatcher::{Dispatcher, REPLICA_TOKEN_HEADER};
pub use event::{EventKind, EventLog, ReplicationEvent};
pub use queue::{PeerQueue, ReplicationQueue};
pub use receiver::{ReceiveOutcome, ReplicaReceiver, SeenLedger};
