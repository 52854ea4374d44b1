//! The broker's routing fabric: two router endpoints and the plumbing
//! between them.
//!
//! The frontend loop owns the client-facing socket, the backend loop owns
//! the worker-facing socket, and the two exchange work over channels so no
//! socket call ever happens under a scheduling lock. A transport receive
//! failure ends the affected loop and tears the broker down cleanly;
//! everything local to a single message is logged and dropped.

use std::sync::Arc;

use anyhow::{Context, Result};
use bytes::Bytes;
use loadbroker_protocol::{self as protocol, WorkerEvent};
use log::{debug, error, info, warn};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use zeromq::{RouterSocket, Socket, SocketRecv, SocketSend, ZmqMessage};

use crate::config::Config;
use crate::dispatch;
use crate::rebalance;
use crate::registry::Registry;
use crate::task::Task;

pub struct Broker {
    config: Config,
    registry: Arc<Registry>,
}

impl Broker {
    pub fn new(config: Config) -> Self {
        let registry = Arc::new(Registry::new(config.strategy, config.queue_policy));
        Self { config, registry }
    }

    /// Handle to the scheduling state, shared with the loops this broker
    /// spawns. Useful for observing the broker from tests and tooling.
    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    /// Binds both endpoints and runs until a transport receive fails.
    /// Returns `Ok(())` on that clean teardown path; errors are reserved for
    /// conditions the broker cannot survive (setup failures, registry
    /// exhaustion).
    pub async fn run(self) -> Result<()> {
        let mut frontend = RouterSocket::new();
        frontend
            .bind(&self.config.frontend_endpoint)
            .await
            .with_context(|| format!("bind frontend {}", self.config.frontend_endpoint))?;
        let mut backend = RouterSocket::new();
        backend
            .bind(&self.config.backend_endpoint)
            .await
            .with_context(|| format!("bind backend {}", self.config.backend_endpoint))?;

        info!(
            "🚀 loadbroker up: frontend {} backend {} strategy {}",
            self.config.frontend_endpoint,
            self.config.backend_endpoint,
            self.registry.strategy()
        );

        // Replies travel backend -> frontend; task envelopes travel
        // dispatch -> backend.
        let (reply_tx, reply_rx) = mpsc::unbounded_channel();
        let (envelope_tx, envelope_rx) = mpsc::unbounded_channel();

        tokio::spawn(dispatch::run(self.registry.clone(), envelope_tx));
        spawn_sigterm_dump(self.registry.clone());

        // The rebalancer runs in the same select so an unrecoverable
        // relocation failure tears the broker down like any other fatal.
        let rebalancer = rebalance::run(self.registry.clone(), self.config.rebalance_period);

        let registry = self.registry;
        tokio::select! {
            result = frontend_loop(&mut frontend, registry.clone(), reply_rx) => result,
            result = backend_loop(&mut backend, registry.clone(), reply_tx, envelope_rx) => result,
            result = rebalancer => result.context("rebalancer failed"),
        }
    }
}

/// Receives client requests and forwards completed replies back out.
async fn frontend_loop(
    socket: &mut RouterSocket,
    registry: Arc<Registry>,
    mut replies: UnboundedReceiver<Vec<Bytes>>,
) -> Result<()> {
    loop {
        tokio::select! {
            incoming = socket.recv() => {
                let message = match incoming {
                    Ok(message) => message,
                    Err(e) => {
                        error!("frontend receive failed, tearing down: {e}");
                        return Ok(());
                    }
                };
                handle_client_request(socket, &registry, message).await?;
            }
            reply = replies.recv() => {
                let Some(frames) = reply else { return Ok(()) };
                send_frames(socket, frames, "client reply").await;
            }
        }
    }
}

/// Places one accepted request on a worker queue, or rejects it when the
/// pool is empty.
async fn handle_client_request(
    socket: &mut RouterSocket,
    registry: &Registry,
    message: ZmqMessage,
) -> Result<()> {
    let frames = message.into_vec();
    let request = match protocol::parse_client_request(&frames) {
        Ok(request) => request,
        Err(e) => {
            warn!("dropping malformed client envelope: {e}");
            return Ok(());
        }
    };
    debug!(
        "request from {}: |{}|",
        String::from_utf8_lossy(&request.client_id),
        String::from_utf8_lossy(&request.request)
    );

    let Ok(worker) = registry.select_for_request() else {
        info!(
            "no live worker, rejecting request from {}",
            String::from_utf8_lossy(&request.client_id)
        );
        let busy = protocol::reply_envelope(
            &request.client_id,
            Bytes::from_static(protocol::BUSY_REPLY),
        );
        send_frames(socket, busy, "busy reply").await;
        return Ok(());
    };

    let task = Task::new(request.client_id, request.request);
    {
        let mut inner = worker.lock();
        inner
            .tasks
            .push(task.clone())
            .context("cannot enqueue accepted request")?;
        inner.stats.charge(&task.request);
    }
    registry.notify_dispatch();
    Ok(())
}

/// Receives worker registrations and replies; sends task envelopes picked
/// by the dispatch loop.
async fn backend_loop(
    socket: &mut RouterSocket,
    registry: Arc<Registry>,
    replies: UnboundedSender<Vec<Bytes>>,
    mut envelopes: UnboundedReceiver<Vec<Bytes>>,
) -> Result<()> {
    loop {
        tokio::select! {
            incoming = socket.recv() => {
                let message = match incoming {
                    Ok(message) => message,
                    Err(e) => {
                        error!("backend receive failed, tearing down: {e}");
                        return Ok(());
                    }
                };
                let frames = message.into_vec();
                match protocol::parse_worker_event(&frames) {
                    Ok(WorkerEvent::Ready { worker_id }) => {
                        registry
                            .register(worker_id)
                            .context("worker registration failed")?;
                    }
                    Ok(WorkerEvent::Reply { worker_id, client_id, reply }) => {
                        if registry.mark_complete(&worker_id).is_ok() {
                            if replies
                                .send(protocol::reply_envelope(&client_id, reply))
                                .is_err()
                            {
                                return Ok(());
                            }
                        } else {
                            warn!(
                                "dropping orphan reply from worker {}",
                                String::from_utf8_lossy(&worker_id)
                            );
                        }
                    }
                    Err(e) => warn!("dropping malformed worker envelope: {e}"),
                }
            }
            envelope = envelopes.recv() => {
                let Some(frames) = envelope else { return Ok(()) };
                send_frames(socket, frames, "task envelope").await;
            }
        }
    }
}

/// Best-effort multipart send. A routing failure (the peer is gone) is
/// local: logged and dropped.
async fn send_frames<S: SocketSend>(socket: &mut S, frames: Vec<Bytes>, what: &str) {
    let mut frames = frames.into_iter();
    let Some(first) = frames.next() else {
        warn!("refusing to send empty {what}");
        return;
    };
    let mut message = ZmqMessage::from(first);
    for frame in frames {
        message.push_back(frame);
    }
    if let Err(e) = socket.send(message).await {
        warn!("failed to send {what}: {e}");
    }
}

/// On SIGTERM, dump the scheduling state to stdout and terminate the way
/// the default handler would have.
fn spawn_sigterm_dump(registry: Arc<Registry>) {
    tokio::spawn(async move {
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
                print!("{}", registry.render_snapshot());
                // 128 + SIGTERM, as the default disposition would report.
                std::process::exit(143);
            }
            Err(e) => error!("cannot install SIGTERM handler: {e}"),
        }
    });
}
