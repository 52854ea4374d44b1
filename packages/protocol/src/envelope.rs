//! Multipart envelope parsing and construction.
//!
//! Frame layouts, as seen by the broker's router sockets (the first frame is
//! always the routing identity added by the transport):
//!
//! ```text
//! client -> broker   [client_id] [] [request]
//! broker -> client   [client_id] [] [reply]
//! worker -> broker   [worker_id] [] ["READY"]
//! broker -> worker   [worker_id] [] [client_id] [] [request]
//! worker -> broker   [worker_id] [] [client_id] [] [reply]
//! ```

use bytes::Bytes;
use thiserror::Error;

use crate::READY;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("expected {expected} frames, got {got}")]
    FrameCount { expected: usize, got: usize },
    #[error("delimiter frame {0} is not empty")]
    MissingDelimiter(usize),
}

/// A request as received on the frontend router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientRequest {
    pub client_id: Bytes,
    pub request: Bytes,
}

/// Everything a worker can say on the backend router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    /// First contact: the worker is alive and idle.
    Ready { worker_id: Bytes },
    /// A finished task, addressed back to the client that asked for it.
    Reply {
        worker_id: Bytes,
        client_id: Bytes,
        reply: Bytes,
    },
}

fn expect_delimiter(frames: &[Bytes], index: usize) -> Result<(), EnvelopeError> {
    if frames[index].is_empty() {
        Ok(())
    } else {
        Err(EnvelopeError::MissingDelimiter(index))
    }
}

/// Parses `[client_id] [] [request]` from the frontend router.
pub fn parse_client_request(frames: &[Bytes]) -> Result<ClientRequest, EnvelopeError> {
    if frames.len() != 3 {
        return Err(EnvelopeError::FrameCount {
            expected: 3,
            got: frames.len(),
        });
    }
    expect_delimiter(frames, 1)?;
    Ok(ClientRequest {
        client_id: frames[0].clone(),
        request: frames[2].clone(),
    })
}

/// Parses the two backend shapes: a three-frame `READY` registration or a
/// five-frame reply envelope.
pub fn parse_worker_event(frames: &[Bytes]) -> Result<WorkerEvent, EnvelopeError> {
    match frames.len() {
        3 if frames[2].as_ref() == READY => {
            expect_delimiter(frames, 1)?;
            Ok(WorkerEvent::Ready {
                worker_id: frames[0].clone(),
            })
        }
        5 => {
            expect_delimiter(frames, 1)?;
            expect_delimiter(frames, 3)?;
            Ok(WorkerEvent::Reply {
                worker_id: frames[0].clone(),
                client_id: frames[2].clone(),
                reply: frames[4].clone(),
            })
        }
        got => Err(EnvelopeError::FrameCount { expected: 5, got }),
    }
}

/// Parses the task as delivered to a worker after its REQ socket has
/// stripped the routing frames: `[client_id] [] [request]`.
pub fn parse_task(frames: &[Bytes]) -> Result<ClientRequest, EnvelopeError> {
    parse_client_request(frames)
}

/// Builds `[client_id] [] [payload]` for the frontend router.
pub fn reply_envelope(client_id: &Bytes, payload: Bytes) -> Vec<Bytes> {
    vec![client_id.clone(), Bytes::new(), payload]
}

/// Builds `[worker_id] [] [client_id] [] [request]` for the backend router.
pub fn task_envelope(worker_id: &Bytes, client_id: &Bytes, request: &Bytes) -> Vec<Bytes> {
    vec![
        worker_id.clone(),
        Bytes::new(),
        client_id.clone(),
        Bytes::new(),
        request.clone(),
    ]
}

/// Builds the reply body a worker sends through its REQ socket:
/// `[client_id] [] [reply]`.
pub fn worker_reply(client_id: &Bytes, reply: Bytes) -> Vec<Bytes> {
    vec![client_id.clone(), Bytes::new(), reply]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frames(parts: &[&[u8]]) -> Vec<Bytes> {
        parts.iter().map(|p| Bytes::copy_from_slice(p)).collect()
    }

    #[test]
    fn parses_client_request() {
        let req = parse_client_request(&frames(&[b"client_abc", b"", b"uname -a"])).unwrap();
        assert_eq!(req.client_id.as_ref(), b"client_abc");
        assert_eq!(req.request.as_ref(), b"uname -a");
    }

    #[test]
    fn rejects_missing_delimiter() {
        let err = parse_client_request(&frames(&[b"client_abc", b"x", b"ls"])).unwrap_err();
        assert_eq!(err, EnvelopeError::MissingDelimiter(1));
    }

    #[test]
    fn parses_ready_registration() {
        let event = parse_worker_event(&frames(&[b"server_xyz", b"", b"READY"])).unwrap();
        assert_eq!(
            event,
            WorkerEvent::Ready {
                worker_id: Bytes::from_static(b"server_xyz")
            }
        );
    }

    #[test]
    fn parses_worker_reply() {
        let event =
            parse_worker_event(&frames(&[b"server_xyz", b"", b"client_abc", b"", b"pong"]))
                .unwrap();
        match event {
            WorkerEvent::Reply {
                worker_id,
                client_id,
                reply,
            } => {
                assert_eq!(worker_id.as_ref(), b"server_xyz");
                assert_eq!(client_id.as_ref(), b"client_abc");
                assert_eq!(reply.as_ref(), b"pong");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn three_frames_without_sentinel_is_malformed() {
        let err = parse_worker_event(&frames(&[b"server_xyz", b"", b"pong"])).unwrap_err();
        assert!(matches!(err, EnvelopeError::FrameCount { .. }));
    }

    #[test]
    fn task_envelope_carries_identities_verbatim() {
        let worker = Bytes::from_static(b"server_xyz");
        let client = Bytes::from_static(b"client_abc");
        let request = Bytes::from_static(b"ping");
        let env = task_envelope(&worker, &client, &request);
        assert_eq!(env.len(), 5);
        assert_eq!(env[0], worker);
        assert_eq!(env[2], client);
        assert_eq!(env[4], request);
        assert!(env[1].is_empty() && env[3].is_empty());
    }
}
