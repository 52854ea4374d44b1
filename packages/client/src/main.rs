//! Transient client: one request, one reply, exit.

use anyhow::{Context, Result};
use clap::Parser;
use loadbroker_protocol as protocol;
use log::info;
use zeromq::{ReqSocket, Socket, SocketRecv, SocketSend};

#[derive(Parser)]
#[command(
    name = "loadbroker-client",
    about = "Execute a command on a remote worker through the broker"
)]
struct Args {
    /// Command to execute remotely.
    #[arg(default_value = "uname -a")]
    command: String,

    /// Frontend endpoint of the broker.
    #[arg(long, default_value = protocol::FRONTEND_ENDPOINT)]
    endpoint: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    let client_id = protocol::peer_id(protocol::CLIENT_ID_PREFIX);

    let mut socket = ReqSocket::new();
    socket
        .connect(&args.endpoint)
        .await
        .with_context(|| format!("connect to broker frontend {}", args.endpoint))?;

    info!("[{client_id}] executing |{}|", args.command);
    socket
        .send(args.command.clone().into())
        .await
        .context("send request")?;

    let reply = socket.recv().await.context("await reply")?;
    let payload = reply.get(0).cloned().unwrap_or_default();
    info!("[{client_id}] received {} byte(s)", payload.len());
    println!("{}", String::from_utf8_lossy(&payload));

    Ok(())
}
