//! The dispatch loop: moves tasks from worker queues onto the wire.
//!
//! Runs beside the router loops and never blocks them: the selected task is
//! handed to the backend loop over a channel, so no socket I/O happens under
//! a registry or worker lock.

use std::sync::Arc;

use bytes::Bytes;
use log::debug;
use loadbroker_protocol as protocol;
use tokio::sync::mpsc::UnboundedSender;

use crate::registry::Registry;

/// Repeatedly drains dispatchable work; parks on the registry's wakeup
/// (bounded by a short fallback sleep) when every AVAILABLE worker has an
/// empty queue. Exits when the backend loop goes away.
pub async fn run(registry: Arc<Registry>, envelopes: UnboundedSender<Vec<Bytes>>) {
    loop {
        match registry.next_dispatch() {
            Some((worker, task)) => {
                debug!(
                    "dispatching request of {} to worker {}",
                    String::from_utf8_lossy(&task.client_id),
                    String::from_utf8_lossy(worker.identity())
                );
                let envelope =
                    protocol::task_envelope(worker.identity(), &task.client_id, &task.request);
                if envelopes.send(envelope).is_err() {
                    // Backend loop is gone; the broker is shutting down.
                    return;
                }
            }
            None => registry.dispatch_parked().await,
        }
    }
}
