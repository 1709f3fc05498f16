//! Server-side accept loop with self-healing reconnect.
//!
//! States: `Idle → WaitingForConnection → Connected → WaitingForConnection`
//! (on disconnect, while still intended to run) `→ Closing → Idle`. One
//! client at a time: the pipe listener is dropped while a channel is live
//! and re-bound after the connection ends, so exactly one channel exists
//! per pipe name at any instant.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::UnixListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use vsmcp_bridge::{ChannelError, RpcChannel, RpcHandler, ToolInfo, methods, pipe};

/// Backoff between accept-loop iterations after a fault or disconnect,
/// keeping a persistent failure from becoming a tight loop.
const REBIND_BACKOFF: Duration = Duration::from_millis(100);

/// Bound on waiting for the accept loop to wind down during stop.
const STOP_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Idle,
    WaitingForConnection,
    Connected,
    Closing,
}

struct ListenerShared {
    state: watch::Sender<ListenerState>,
    channel: Mutex<Option<Arc<RpcChannel>>>,
}

impl ListenerShared {
    fn set_state(&self, state: ListenerState) {
        let _ = self.state.send(state);
    }

    fn store_channel(&self, channel: Option<Arc<RpcChannel>>) {
        *self.channel.lock().expect("listener channel lock poisoned") = channel;
    }
}

/// Accept loop for one pipe name, running as a background task until
/// [`RpcListener::stop`] is called.
pub struct RpcListener {
    pipe_name: String,
    shared: Arc<ListenerShared>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RpcListener {
    /// Bind the pipe name and start accepting. Inbound calls on every
    /// accepted connection are dispatched to `handler`.
    ///
    /// The first bind happens before this returns, so a process spawned
    /// afterwards always finds the pipe in place; a failed bind is retried
    /// from inside the loop.
    pub fn start(pipe_name: impl Into<String>, handler: Arc<dyn RpcHandler>) -> Self {
        let pipe_name = pipe_name.into();
        let (state_tx, _) = watch::channel(ListenerState::Idle);
        let shared = Arc::new(ListenerShared {
            state: state_tx,
            channel: Mutex::new(None),
        });
        let cancel = CancellationToken::new();

        let bound = match pipe::bind(&pipe_name) {
            Ok(listener) => {
                shared.set_state(ListenerState::WaitingForConnection);
                Some(listener)
            }
            Err(e) => {
                tracing::warn!(pipe = %pipe_name, error = %e, "Initial pipe bind failed");
                None
            }
        };

        let task = tokio::spawn(accept_loop(
            pipe_name.clone(),
            handler,
            Arc::clone(&shared),
            cancel.clone(),
            bound,
        ));

        Self {
            pipe_name,
            shared,
            cancel,
            task: Mutex::new(Some(task)),
        }
    }

    pub fn pipe_name(&self) -> &str {
        &self.pipe_name
    }

    pub fn state(&self) -> ListenerState {
        *self.shared.state.borrow()
    }

    /// Watch state transitions; used by callers that need to observe the
    /// listener becoming ready or connected.
    pub fn watch_state(&self) -> watch::Receiver<ListenerState> {
        self.shared.state.subscribe()
    }

    pub fn channel(&self) -> Option<Arc<RpcChannel>> {
        self.shared
            .channel
            .lock()
            .expect("listener channel lock poisoned")
            .clone()
    }

    pub fn is_connected(&self) -> bool {
        self.channel().is_some()
    }

    /// Query the server's capability catalog. Returns an empty list when no
    /// channel is connected; call faults propagate to the caller.
    pub async fn capabilities(&self) -> Result<Vec<ToolInfo>, ChannelError> {
        let Some(channel) = self.channel() else {
            return Ok(Vec::new());
        };
        let value = channel
            .call(methods::LIST_CAPABILITIES, serde_json::Value::Null)
            .await?;
        serde_json::from_value(value)
            .map_err(|e| ChannelError::Remote(format!("malformed capability list: {e}")))
    }

    /// Ask the server to shut down gracefully. Best-effort: any failure is
    /// swallowed, the server may already be gone.
    pub async fn request_shutdown(&self) {
        let Some(channel) = self.channel() else {
            return;
        };
        if let Err(e) = channel
            .call(methods::REQUEST_SHUTDOWN, serde_json::Value::Null)
            .await
        {
            tracing::debug!(error = %e, "Graceful shutdown request failed");
        }
    }

    /// Stop accepting and tear down the live channel, waiting a bounded time
    /// for the loop to wind down.
    pub async fn stop(&self) {
        self.shared.set_state(ListenerState::Closing);
        self.cancel.cancel();

        let task = self
            .task
            .lock()
            .expect("listener task lock poisoned")
            .take();
        if let Some(task) = task
            && tokio::time::timeout(STOP_JOIN_TIMEOUT, task).await.is_err()
        {
            tracing::warn!(pipe = %self.pipe_name, "Accept loop did not stop in time");
        }

        self.shared.set_state(ListenerState::Idle);
    }
}

async fn accept_loop(
    pipe_name: String,
    handler: Arc<dyn RpcHandler>,
    shared: Arc<ListenerShared>,
    cancel: CancellationToken,
    mut bound: Option<UnixListener>,
) {
    loop {
        shared.set_state(ListenerState::WaitingForConnection);

        let listener = match bound.take() {
            Some(listener) => listener,
            None => match pipe::bind(&pipe_name) {
                Ok(listener) => listener,
                Err(e) => {
                    if cancel.is_cancelled() {
                        break;
                    }
                    tracing::warn!(pipe = %pipe_name, error = %e, "Failed to bind pipe, retrying");
                    if backoff(&cancel).await {
                        break;
                    }
                    continue;
                }
            },
        };

        let stream = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => stream,
                Err(e) => {
                    tracing::warn!(pipe = %pipe_name, error = %e, "Accept failed, retrying");
                    if backoff(&cancel).await {
                        break;
                    }
                    continue;
                }
            },
        };

        // One channel per pipe name: stop accepting while this one is live.
        drop(listener);

        let channel = RpcChannel::spawn(stream, Arc::clone(&handler));
        shared.store_channel(Some(Arc::clone(&channel)));
        shared.set_state(ListenerState::Connected);
        tracing::info!(pipe = %pipe_name, "Server connected");

        tokio::select! {
            _ = cancel.cancelled() => {
                channel.close();
                shared.store_channel(None);
                break;
            }
            _ = channel.closed() => {
                shared.store_channel(None);
                tracing::info!(pipe = %pipe_name, "Server disconnected, resuming accept");
                if backoff(&cancel).await {
                    break;
                }
            }
        }
    }

    pipe::unlink(&pipe_name);
    shared.store_channel(None);
    shared.set_state(ListenerState::Idle);
    tracing::debug!(pipe = %pipe_name, "Accept loop exiting");
}

/// Sleep out the backoff; returns true if cancelled instead.
async fn backoff(cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep(REBIND_BACKOFF) => false,
    }
}
