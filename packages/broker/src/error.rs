//! Typed errors surfaced by the scheduling core.

use thiserror::Error;

use crate::queue::QueueError;

#[derive(Debug, Error)]
pub enum BrokerError {
    /// Placement found no AVAILABLE or BUSY worker; the request is rejected
    /// with a busy reply rather than queued nowhere.
    #[error("no live worker available")]
    NoLiveWorker,

    /// Every registry slot holds a live worker. Fatal: a worker the broker
    /// cannot track would execute tasks it cannot account for.
    #[error("worker registry is full ({0} slots)")]
    RegistryFull(usize),

    /// A reply named a worker that holds no in-flight task. The reply is
    /// dropped without touching any client or counter.
    #[error("reply from a worker with no task in flight")]
    OrphanReply,

    #[error(transparent)]
    Queue(#[from] QueueError),
}
