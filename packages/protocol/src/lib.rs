//! Shared wire contract for the loadbroker fabric.
//!
//! The broker speaks an identity-preserving multipart framing on two router
//! endpoints. This crate owns the envelope shapes, the sentinel and reply
//! texts, and the peer display-id scheme, so the broker, client, and worker
//! binaries cannot drift apart. Frames are opaque byte sequences; nothing
//! here depends on the transport crate.

mod envelope;

pub use envelope::{
    parse_client_request, parse_task, parse_worker_event, reply_envelope, task_envelope,
    worker_reply, ClientRequest, EnvelopeError, WorkerEvent,
};

/// Frontend endpoint the broker binds for clients.
pub const FRONTEND_ENDPOINT: &str = "ipc://frontend.ipc";

/// Backend endpoint the broker binds for workers.
pub const BACKEND_ENDPOINT: &str = "ipc://backend.ipc";

/// Sentinel a worker sends as its whole payload to announce itself.
pub const READY: &[u8] = b"READY";

/// Reply sent to a client when no live worker can host its request.
pub const BUSY_REPLY: &[u8] = b"broker busy: no live worker available";

/// Reply a worker sends when it cannot execute the requested command.
pub const EXEC_FAILED_REPLY: &[u8] = b"server failed to execute requested command";

/// Display-id prefix for clients.
pub const CLIENT_ID_PREFIX: &str = "client_";

/// Display-id prefix for workers.
pub const SERVER_ID_PREFIX: &str = "server_";

const PEER_ID_SUFFIX_LEN: usize = 10;

/// Generates a peer display id: the given prefix followed by ten printable
/// alphanumerics. Used by the edge binaries for log correlation; the broker
/// never interprets it.
pub fn peer_id(prefix: &str) -> String {
    let mut id = String::with_capacity(prefix.len() + PEER_ID_SUFFIX_LEN);
    id.push_str(prefix);
    for _ in 0..PEER_ID_SUFFIX_LEN {
        id.push(fastrand::alphanumeric());
    }
    id
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_id_has_prefix_and_fixed_length() {
        let id = peer_id(CLIENT_ID_PREFIX);
        assert!(id.starts_with("client_"));
        assert_eq!(id.len(), 17);
        assert!(id[7..].chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn peer_ids_are_distinct() {
        assert_ne!(peer_id(SERVER_ID_PREFIX), peer_id(SERVER_ID_PREFIX));
    }
}
