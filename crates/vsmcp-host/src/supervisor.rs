//! Server process lifecycle: spawn, fast-fail detection, graceful shutdown
//! with forced-termination escalation.
//!
//! Flow on start:
//! 1. Open the log sink (file failures degrade to pane-only)
//! 2. Start the pipe listener, then spawn the server, in that order, so the
//!    server can never dial a pipe that is not yet bound
//! 3. Relay the server's stdout/stderr into the log sink
//! 4. After a short grace period, treat an already-exited process as a
//!    startup failure
//!
//! Stop mirrors it: suppress the unexpected-exit log, ask the server to
//! shut down over the channel, escalate to kill after the grace timeout,
//! and release the listener, process handle, and log file on every path.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, mpsc, watch};
use tokio_util::sync::CancellationToken;

use vsmcp_bridge::{ChannelError, RpcHandler, ToolInfo, pipe};

use crate::listener::RpcListener;
use crate::logsink::LogSink;
use crate::settings::ServerStartSettings;

/// Errors that abort [`ServerSupervisor::start`]. Stop never fails.
#[derive(Debug, thiserror::Error)]
pub enum StartError {
    #[error("server executable not found: {0}")]
    ExecutableNotFound(PathBuf),

    #[error("failed to spawn server process: {0}")]
    Spawn(#[from] std::io::Error),

    /// The process exited within the startup grace window. A slow-starting
    /// server that is merely delayed is not distinguished from one still
    /// initializing; this is a heuristic, not a handshake.
    #[error("server process exited during startup (code {code:?}): {stderr}")]
    StartupFailure { code: Option<i32>, stderr: String },
}

/// Timeouts governing the start and stop sequences. Defaults match
/// production behavior; tests compress them.
#[derive(Debug, Clone, Copy)]
pub struct SupervisorTimings {
    /// Wait after spawn before the fast-fail exit check.
    pub startup_grace: Duration,
    /// Wait for natural exit after a graceful shutdown request.
    pub shutdown_grace: Duration,
    /// Wait for forced termination to take effect.
    pub kill_wait: Duration,
}

impl Default for SupervisorTimings {
    fn default() -> Self {
        Self {
            startup_grace: Duration::from_millis(500),
            shutdown_grace: Duration::from_secs(5),
            kill_wait: Duration::from_secs(2),
        }
    }
}

/// Exit observation for a supervised process. `code` is None when the
/// process was terminated by a signal.
#[derive(Debug, Clone, Copy)]
struct ExitInfo {
    code: Option<i32>,
}

impl ExitInfo {
    fn describe(&self) -> String {
        match self.code {
            Some(code) => code.to_string(),
            None => "unknown".to_string(),
        }
    }
}

/// Handle to a spawned server process. The `Child` itself lives in a monitor
/// task; the handle observes exits through a watch channel and requests
/// termination through an mpsc, so waiting and killing never contend.
struct ProcessHandle {
    pid: u32,
    kill_tx: mpsc::Sender<()>,
    exit_rx: watch::Receiver<Option<ExitInfo>>,
}

impl ProcessHandle {
    fn spawn_monitor(mut child: Child) -> Self {
        let pid = child.id().unwrap_or_default();
        let (exit_tx, exit_rx) = watch::channel(None);
        let (kill_tx, mut kill_rx) = mpsc::channel::<()>(1);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    status = child.wait() => {
                        let info = match status {
                            Ok(status) => ExitInfo { code: status.code() },
                            Err(e) => {
                                tracing::warn!(error = %e, "Failed waiting on server process");
                                ExitInfo { code: None }
                            }
                        };
                        let _ = exit_tx.send(Some(info));
                        break;
                    }
                    Some(()) = kill_rx.recv() => {
                        if let Err(e) = child.start_kill() {
                            tracing::debug!(error = %e, "Kill failed (process already gone?)");
                        }
                    }
                }
            }
        });

        Self {
            pid,
            kill_tx,
            exit_rx,
        }
    }

    fn try_exit(&self) -> Option<ExitInfo> {
        *self.exit_rx.borrow()
    }

    fn is_running(&self) -> bool {
        self.try_exit().is_none()
    }

    async fn wait_exit(&self) -> ExitInfo {
        wait_exit(self.exit_rx.clone()).await
    }

    fn kill(&self) {
        let _ = self.kill_tx.try_send(());
    }
}

async fn wait_exit(mut rx: watch::Receiver<Option<ExitInfo>>) -> ExitInfo {
    loop {
        if let Some(info) = *rx.borrow_and_update() {
            return info;
        }
        if rx.changed().await.is_err() {
            // Monitor gone without reporting; treat as exited, code unknown.
            return ExitInfo { code: None };
        }
    }
}

struct RunningServer {
    handle: ProcessHandle,
    listener: RpcListener,
    log: Arc<LogSink>,
    /// Cancelled on deliberate stop so the unexpected-exit watcher stays
    /// silent; a duplicate exit entry would otherwise be logged.
    exit_watch_guard: CancellationToken,
}

/// Owns the lifecycle of exactly one server process bound to one channel.
///
/// Start and Stop are serialized through one internal lock, so a Stop racing
/// an in-flight Start waits for it rather than interleaving.
pub struct ServerSupervisor {
    inner: Mutex<Option<RunningServer>>,
    handler: Arc<dyn RpcHandler>,
    timings: SupervisorTimings,
}

impl ServerSupervisor {
    /// `handler` receives the calls the server makes back into the host;
    /// typically an [`crate::AutomationDispatcher`].
    pub fn new(handler: Arc<dyn RpcHandler>) -> Self {
        Self {
            inner: Mutex::new(None),
            handler,
            timings: SupervisorTimings::default(),
        }
    }

    pub fn with_timings(mut self, timings: SupervisorTimings) -> Self {
        self.timings = timings;
        self
    }

    /// Whether a live process handle is currently held.
    pub fn is_running(&self) -> bool {
        match self.inner.try_lock() {
            Ok(guard) => guard.as_ref().is_some_and(|r| r.handle.is_running()),
            // Start/Stop in progress; the handle still exists until it ends.
            Err(_) => true,
        }
    }

    /// Whether the server has dialed in and a channel is live.
    pub async fn is_connected(&self) -> bool {
        self.inner
            .lock()
            .await
            .as_ref()
            .is_some_and(|r| r.listener.is_connected())
    }

    pub async fn log_file_path(&self) -> Option<PathBuf> {
        self.inner
            .lock()
            .await
            .as_ref()
            .and_then(|r| r.log.file_path().map(|p| p.to_path_buf()))
    }

    /// Query the server's capability catalog; empty when not connected.
    pub async fn capabilities(&self) -> Result<Vec<ToolInfo>, ChannelError> {
        let guard = self.inner.lock().await;
        match guard.as_ref() {
            Some(running) => running.listener.capabilities().await,
            None => Ok(Vec::new()),
        }
    }

    /// Start the server. No-op when already running.
    pub async fn start(&self, settings: ServerStartSettings) -> Result<(), StartError> {
        let mut guard = self.inner.lock().await;

        if let Some(running) = guard.as_ref() {
            if running.handle.is_running() {
                return Ok(());
            }
            // Stale entry from an unexpected exit; release it before restarting.
            let stale = guard.take().expect("just observed Some");
            stale.exit_watch_guard.cancel();
            stale.listener.stop().await;
        }

        let log = LogSink::open(
            &settings.log_dir,
            settings.log_retention_days,
            settings.pane.clone(),
        );

        // Listener first: the server must never dial an unbound pipe.
        let pipe_name = pipe::host_pipe_name();
        let listener = RpcListener::start(&pipe_name, Arc::clone(&self.handler));

        if !settings.executable.is_file() {
            listener.stop().await;
            return Err(StartError::ExecutableNotFound(settings.executable.clone()));
        }

        let spawned = Command::new(&settings.executable)
            .arg("--pipe")
            .arg(&pipe_name)
            .arg("--host")
            .arg(&settings.bind_address)
            .arg("--port")
            .arg(settings.port.to_string())
            .arg("--name")
            .arg(&settings.display_name)
            .arg("--log-level")
            .arg(&settings.log_level)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                listener.stop().await;
                return Err(StartError::Spawn(e));
            }
        };

        // Error text captured for the fast-fail check; bounded so a chatty
        // server cannot grow it without limit.
        let captured_stderr = Arc::new(StdMutex::new(String::new()));
        if let Some(stdout) = child.stdout.take() {
            spawn_output_relay(stdout, Arc::clone(&log), None);
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_output_relay(stderr, Arc::clone(&log), Some(Arc::clone(&captured_stderr)));
        }

        let handle = ProcessHandle::spawn_monitor(child);

        log.log(&format!("Server started (PID: {})", handle.pid));
        log.log(&format!(
            "Binding: http://{}:{}",
            settings.bind_address, settings.port
        ));
        if let Some(path) = log.file_path() {
            log.log(&format!("Log file: {}", path.display()));
        }

        // Fast-fail heuristic: a process already dead after the grace window
        // never came up.
        tokio::time::sleep(self.timings.startup_grace).await;
        if let Some(exit) = handle.try_exit() {
            listener.stop().await;
            let stderr = captured_stderr
                .lock()
                .map(|s| s.trim_end().to_string())
                .unwrap_or_default();
            return Err(StartError::StartupFailure {
                code: exit.code,
                stderr,
            });
        }

        // Log exits we did not ask for; cancelled on deliberate stop.
        let exit_watch_guard = CancellationToken::new();
        {
            let guard_token = exit_watch_guard.clone();
            let log = Arc::clone(&log);
            let exit_rx = handle.exit_rx.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = guard_token.cancelled() => {}
                    exit = wait_exit(exit_rx) => {
                        tracing::warn!(code = ?exit.code, "Server exited unexpectedly");
                        log.log(&format!("Server process exited (Code: {})", exit.describe()));
                    }
                }
            });
        }

        *guard = Some(RunningServer {
            handle,
            listener,
            log,
            exit_watch_guard,
        });
        Ok(())
    }

    /// Stop the server. No-op when not running; never fails.
    pub async fn stop(&self) {
        // Hold the state lock for the whole sequence so a racing Start waits
        // for the teardown instead of interleaving with it.
        let mut guard = self.inner.lock().await;
        let Some(running) = guard.take() else {
            return;
        };

        let RunningServer {
            handle,
            listener,
            log,
            exit_watch_guard,
        } = running;

        if handle.is_running() {
            log.log("Stopping server...");

            // Silence the unexpected-exit watcher before anything can make
            // the process exit.
            exit_watch_guard.cancel();

            // Graceful request and natural exit share one grace window;
            // whichever of ack-then-exit or timeout happens first wins and
            // the loser is abandoned.
            let graceful = async {
                if listener.is_connected() {
                    listener.request_shutdown().await;
                }
                handle.wait_exit().await
            };

            let exit = match tokio::time::timeout(self.timings.shutdown_grace, graceful).await {
                Ok(exit) => Some(exit),
                Err(_) => {
                    log.log("Graceful shutdown timed out, forcing termination...");
                    handle.kill();
                    tokio::time::timeout(self.timings.kill_wait, handle.wait_exit())
                        .await
                        .ok()
                }
            };

            match exit {
                Some(exit) => log.log(&format!("Server stopped (Code: {})", exit.describe())),
                None => log.log("Server stopped (Code: unknown)"),
            }
        } else {
            exit_watch_guard.cancel();
        }

        listener.stop().await;
        // Dropping `handle` and `log` releases the monitor and the file.
    }
}

/// Relay captured output lines into the log sink, optionally mirroring them
/// into a bounded capture buffer for startup diagnostics.
fn spawn_output_relay(
    stream: impl tokio::io::AsyncRead + Unpin + Send + 'static,
    log: Arc<LogSink>,
    capture: Option<Arc<StdMutex<String>>>,
) {
    const CAPTURE_LIMIT: usize = 8 * 1024;

    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if line.is_empty() {
                continue;
            }
            log.server_line(&line);
            if let Some(capture) = &capture
                && let Ok(mut buf) = capture.lock()
                && buf.len() < CAPTURE_LIMIT
            {
                buf.push_str(&line);
                buf.push('\n');
            }
        }
    });
}
