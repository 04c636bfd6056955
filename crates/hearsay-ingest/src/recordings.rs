//! The recordings tree: `<root>/YYYYMMDD/<endpoint-id>/audio_HHMMSS.wav`.
//!
//! Directory creation is serialized by a single mutex; the critical section
//! is a mkdir-if-absent plus a day-name cache update and contains no await
//! point. Day names use the server's local wall clock.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Local;
use tracing::info;
use uuid::Uuid;

/// Suffix appended to artifacts whose connection died before the end marker.
pub const INCOMPLETE_SUFFIX: &str = "incomplete";

/// Current local calendar day in directory-name form.
pub fn current_day() -> String {
    Local::now().format("%Y%m%d").to_string()
}

/// Path an incomplete utterance is renamed to (`audio_X.wav.incomplete`).
pub fn incomplete_path(original: &Path) -> PathBuf {
    let name = original
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("utterance.wav");
    original.with_file_name(format!("{name}.{INCOMPLETE_SUFFIX}"))
}

/// Mints utterance paths under the configured root, creating day and
/// endpoint directories on demand.
#[derive(Debug)]
pub struct RecordingsTree {
    root: PathBuf,
    day: Mutex<String>,
}

impl RecordingsTree {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            day: Mutex::new(String::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Reserve a path for a new utterance from `endpoint`, ensuring the
    /// day and endpoint directories exist. The directory is chosen at call
    /// time, so an utterance spanning midnight stays under its start day.
    pub fn utterance_path(&self, endpoint: Uuid) -> std::io::Result<PathBuf> {
        let now = Local::now();
        let day = now.format("%Y%m%d").to_string();
        let dir = self.root.join(&day).join(endpoint.to_string());

        {
            let mut cached = self.day.lock().unwrap_or_else(|e| e.into_inner());
            if *cached != day {
                std::fs::create_dir_all(self.root.join(&day))?;
                info!(day = %day, "created daily recordings directory");
                *cached = day;
            }
            std::fs::create_dir_all(&dir)?;
        }

        let name = format!("audio_{}.wav", now.format("%H%M%S"));
        Ok(dir.join(name))
    }
}
