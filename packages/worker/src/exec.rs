//! Shell command execution with a hard deadline.

use std::process::Stdio;
use std::time::Duration;

use bytes::Bytes;
use loadbroker_protocol as protocol;
use log::warn;
use tokio::process::Command;
use tokio::time::timeout;

/// A runaway command is cut off after this long.
pub const EXEC_TIMEOUT: Duration = Duration::from_secs(30);

/// Runs the request under `sh -c` and returns its captured stdout.
/// Spawn failures and timeouts yield the shared failure reply; a nonzero
/// exit still returns whatever the command printed.
pub async fn execute(request: &[u8]) -> Bytes {
    let command = String::from_utf8_lossy(request);
    let output = Command::new("sh")
        .arg("-c")
        .arg(&*command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output();

    match timeout(EXEC_TIMEOUT, output).await {
        Ok(Ok(output)) => Bytes::from(output.stdout),
        Ok(Err(e)) => {
            warn!("failed to run |{command}|: {e}");
            Bytes::from_static(protocol::EXEC_FAILED_REPLY)
        }
        Err(_) => {
            warn!("|{command}| exceeded {EXEC_TIMEOUT:?}, dropping");
            Bytes::from_static(protocol::EXEC_FAILED_REPLY)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_stdout() {
        let out = execute(b"echo pong").await;
        assert_eq!(out.as_ref(), b"pong\n");
    }

    #[tokio::test]
    async fn nonzero_exit_still_returns_output() {
        let out = execute(b"echo partial; false").await;
        assert_eq!(out.as_ref(), b"partial\n");
    }

    #[tokio::test]
    async fn stderr_is_not_part_of_the_reply() {
        let out = execute(b"echo visible; echo hidden 1>&2").await;
        assert_eq!(out.as_ref(), b"visible\n");
    }
}
