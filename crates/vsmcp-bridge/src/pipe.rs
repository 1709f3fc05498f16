//! Pipe naming and the listen/connect primitives.
//!
//! The pipe is a Unix domain socket in the temp directory, named after the
//! host process id: `vsmcp-<pid>` → `<temp_dir>/vsmcp-<pid>.sock`. One live
//! host instance therefore owns exactly one pipe name, reused for the
//! lifetime of one server process.

use std::path::PathBuf;
use std::time::Duration;

use tokio::net::{UnixListener, UnixStream};
use tokio::time::Instant;

use crate::channel::ChannelError;

pub const PIPE_PREFIX: &str = "vsmcp";

/// Delay between dial attempts while waiting for the host to bind.
const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(50);

pub fn pipe_name_for(pid: u32) -> String {
    format!("{PIPE_PREFIX}-{pid}")
}

/// Pipe name owned by the current process when acting as host.
pub fn host_pipe_name() -> String {
    pipe_name_for(std::process::id())
}

pub fn socket_path(pipe_name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("{pipe_name}.sock"))
}

/// Bind the pipe for listening, unlinking a stale socket file first.
pub fn bind(pipe_name: &str) -> std::io::Result<UnixListener> {
    let path = socket_path(pipe_name);
    if path.exists() {
        std::fs::remove_file(&path)?;
    }
    UnixListener::bind(&path)
}

/// Remove the socket file after the listener is done with it.
pub fn unlink(pipe_name: &str) {
    let _ = std::fs::remove_file(socket_path(pipe_name));
}

/// Dial the pipe, retrying until `timeout` elapses. The listener is started
/// before the server process is spawned, but retrying also covers a host
/// that is slow to re-bind between connections.
pub async fn connect(pipe_name: &str, timeout: Duration) -> Result<UnixStream, ChannelError> {
    let path = socket_path(pipe_name);
    let deadline = Instant::now() + timeout;
    loop {
        match UnixStream::connect(&path).await {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                if Instant::now() >= deadline {
                    tracing::debug!(pipe = %pipe_name, error = %e, "Connect deadline elapsed");
                    return Err(ChannelError::ConnectionTimeout(pipe_name.to_string()));
                }
                tokio::time::sleep(CONNECT_RETRY_DELAY).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_pipe_name() -> String {
        format!("{PIPE_PREFIX}-test-{}", uuid::Uuid::new_v4())
    }

    #[test]
    fn pipe_name_derives_from_pid() {
        assert_eq!(pipe_name_for(1234), "vsmcp-1234");
        assert!(host_pipe_name().starts_with("vsmcp-"));
    }

    #[test]
    fn socket_path_lands_in_temp_dir() {
        let path = socket_path("vsmcp-1234");
        assert!(path.starts_with(std::env::temp_dir()));
        assert_eq!(path.file_name().unwrap(), "vsmcp-1234.sock");
    }

    #[tokio::test]
    async fn bind_then_connect() {
        let name = test_pipe_name();
        let listener = bind(&name).unwrap();

        let (stream, accepted) = tokio::join!(
            connect(&name, Duration::from_secs(2)),
            async { listener.accept().await }
        );
        stream.unwrap();
        accepted.unwrap();
        unlink(&name);
    }

    #[tokio::test]
    async fn bind_replaces_stale_socket() {
        let name = test_pipe_name();
        let first = bind(&name).unwrap();
        drop(first);
        // The socket file is left behind; a fresh bind must reclaim it.
        assert!(socket_path(&name).exists());
        bind(&name).unwrap();
        unlink(&name);
    }

    #[tokio::test]
    async fn connect_times_out_when_never_bound() {
        let name = test_pipe_name();
        let timeout = Duration::from_millis(200);
        let started = std::time::Instant::now();
        let err = connect(&name, timeout).await.unwrap_err();
        assert!(matches!(err, ChannelError::ConnectionTimeout(_)));
        assert!(started.elapsed() >= timeout);
    }
}
