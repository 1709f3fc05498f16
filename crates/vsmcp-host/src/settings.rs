//! Start-time configuration for one server run.

use std::path::PathBuf;
use std::sync::Arc;

use crate::logsink::PaneSink;

/// Immutable settings captured when the server is started. Changing them
/// requires a stop/start cycle.
#[derive(Clone)]
pub struct ServerStartSettings {
    /// Path to the server executable.
    pub executable: PathBuf,
    /// Address the server's MCP endpoint binds to, passed through verbatim.
    pub bind_address: String,
    pub port: u16,
    /// Server name displayed to MCP clients.
    pub display_name: String,
    /// Minimum log level forwarded to the server (`error` … `trace`).
    pub log_level: String,
    /// Directory for `server_<date>.log` files.
    pub log_dir: PathBuf,
    /// Log files older than this many days are deleted at startup;
    /// 0 retains everything.
    pub log_retention_days: u32,
    /// Live output pane, if the host UI provides one.
    pub pane: Option<Arc<dyn PaneSink>>,
}

impl ServerStartSettings {
    pub fn new(executable: impl Into<PathBuf>, log_dir: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            bind_address: "localhost".to_string(),
            port: 5050,
            display_name: "vsmcp".to_string(),
            log_level: "info".to_string(),
            log_dir: log_dir.into(),
            log_retention_days: 0,
            pane: None,
        }
    }

    pub fn with_pane(mut self, pane: Arc<dyn PaneSink>) -> Self {
        self.pane = Some(pane);
        self
    }

    pub fn with_retention_days(mut self, days: u32) -> Self {
        self.log_retention_days = days;
        self
    }
}
