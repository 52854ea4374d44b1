//! Worker binary: announce READY, then execute one request at a time.
//!
//! Commands run read-only from the broker's point of view; sandboxing
//! (network isolation, syscall filtering) belongs to the deployment around
//! this binary.

mod exec;

use anyhow::{bail, Context, Result};
use loadbroker_protocol as protocol;
use log::info;
use zeromq::{ReqSocket, Socket, SocketRecv, SocketSend, ZmqMessage};

fn backend_endpoint() -> String {
    std::env::var("LOADBROKER_BACKEND").unwrap_or_else(|_| protocol::BACKEND_ENDPOINT.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let worker_id = protocol::peer_id(protocol::SERVER_ID_PREFIX);
    let endpoint = backend_endpoint();

    let mut socket = ReqSocket::new();
    socket
        .connect(&endpoint)
        .await
        .with_context(|| format!("connect to broker backend {endpoint}"))?;

    socket
        .send(ZmqMessage::from(protocol::READY.to_vec()))
        .await
        .context("announce READY")?;
    info!("[{worker_id}] worker is ready");

    loop {
        let message = socket.recv().await.context("await task")?;
        let frames = message.into_vec();
        // The request/reply socket is in lockstep with the broker: every
        // received task must be answered, so a broken envelope is fatal.
        let task = match protocol::parse_task(&frames) {
            Ok(task) => task,
            Err(e) => bail!("malformed task envelope from broker: {e}"),
        };

        info!(
            "[{worker_id}] processing |{}| for {}",
            String::from_utf8_lossy(&task.request),
            String::from_utf8_lossy(&task.client_id)
        );
        let reply = exec::execute(&task.request).await;

        let frames = protocol::worker_reply(&task.client_id, reply);
        let mut envelope = ZmqMessage::from(frames[0].clone());
        envelope.push_back(frames[1].clone());
        envelope.push_back(frames[2].clone());
        socket.send(envelope).await.context("send reply")?;
    }
}
