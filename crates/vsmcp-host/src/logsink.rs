//! Dual-destination log sink: rotating daily file + live host-UI pane.
//!
//! Both destinations are best-effort and independent; a failure writing to
//! one never blocks or fails the other. The file is `server_<date>.log`,
//! one per calendar day, appended across restarts on the same day.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use chrono::{Local, NaiveDate};

/// Live output destination provided by the host UI.
pub trait PaneSink: Send + Sync {
    fn write_line(&self, line: &str);
}

pub struct LogSink {
    file: Option<Mutex<File>>,
    path: Option<PathBuf>,
    pane: Option<Arc<dyn PaneSink>>,
}

impl LogSink {
    /// Open the sink and kick off the retention sweep.
    ///
    /// File-open failures degrade to pane-only logging; they are never
    /// surfaced to the caller.
    pub fn open(
        log_dir: &Path,
        retention_days: u32,
        pane: Option<Arc<dyn PaneSink>>,
    ) -> Arc<Self> {
        let (file, path) = match open_log_file(log_dir) {
            Ok((file, path)) => (Some(Mutex::new(file)), Some(path)),
            Err(e) => {
                tracing::warn!(dir = %log_dir.display(), error = %e, "File logging unavailable");
                (None, None)
            }
        };

        let sink = Arc::new(Self { file, path, pane });
        sink.log(&format!(
            "=== Server log started {} ===",
            Local::now().format("%Y-%m-%d %H:%M:%S")
        ));

        if retention_days > 0 {
            let dir = log_dir.to_path_buf();
            let cutoff =
                SystemTime::now() - Duration::from_secs(u64::from(retention_days) * 86_400);
            tokio::spawn(async move {
                sweep_old_logs(&dir, cutoff);
            });
        }

        sink
    }

    /// Write one timestamped entry to both destinations.
    pub fn log(&self, message: &str) {
        let line = format!("[{}] {}", Local::now().format("%H:%M:%S%.3f"), message);

        if let Some(file) = &self.file
            && let Ok(mut file) = file.lock()
        {
            let _ = writeln!(file, "{line}");
        }

        if let Some(pane) = &self.pane {
            pane.write_line(&line);
        }
    }

    /// Relay one line captured from the server's output streams, tagged with
    /// its source.
    pub fn server_line(&self, line: &str) {
        self.log(&format!("[server] {line}"));
    }

    pub fn file_path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

pub fn log_file_name(date: NaiveDate) -> String {
    format!("server_{}.log", date.format("%Y-%m-%d"))
}

fn open_log_file(log_dir: &Path) -> std::io::Result<(File, PathBuf)> {
    std::fs::create_dir_all(log_dir)?;
    let path = log_dir.join(log_file_name(Local::now().date_naive()));
    let file = OpenOptions::new().create(true).append(true).open(&path)?;
    Ok((file, path))
}

/// Delete `server_*.log` files last written before `cutoff`. Individual
/// failures are ignored; the scan itself never errors out.
fn sweep_old_logs(log_dir: &Path, cutoff: SystemTime) {
    let entries = match std::fs::read_dir(log_dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::debug!(dir = %log_dir.display(), error = %e, "Log sweep skipped");
            return;
        }
    };

    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !name.starts_with("server_") || !name.ends_with(".log") {
            continue;
        }

        let modified = entry.metadata().and_then(|m| m.modified());
        if let Ok(modified) = modified
            && modified < cutoff
        {
            tracing::debug!(file = %name, "Deleting expired log file");
            let _ = std::fs::remove_file(entry.path());
        }
    }
}
