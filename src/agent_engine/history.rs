use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::errors::PilotResult;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub ts: i64,
    pub role: String,
    pub content: Option<String>,
    pub action: Option<serde_json::Value>,
}

impl HistoryEntry {
    pub fn now(role: &str, content: Option<String>, action: Option<serde_json::Value>) -> Self {
        Self {
            ts: chrono::Utc::now().timestamp_millis(),
            role: role.to_string(),
            content,
            action,
        }
    }
}

/// JSONL transcript of one conversation. Screenshots are never written.
pub struct SessionHistory {
    pub session_id: String,
    entries: Vec<HistoryEntry>,
    file_path: Option<PathBuf>,
}

impl SessionHistory {
    /// Transcript under `dir`, or the platform data directory when `dir` is `None`.
    pub fn new(dir: Option<&Path>) -> Self {
        let session_id = uuid::Uuid::new_v4().to_string();
        let dir = dir.map(Path::to_path_buf).unwrap_or_else(data_dir_or_cwd);
        if let Err(e) = std::fs::create_dir_all(&dir) {
            tracing::warn!(path = %dir.display(), error = %e, "cannot create transcript directory");
        }
        let file_path = Some(dir.join(format!("session_{session_id}.jsonl")));
        Self {
            session_id,
            entries: Vec::new(),
            file_path,
        }
    }

    /// Keeps entries in memory only.
    pub fn in_memory() -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            entries: Vec::new(),
            file_path: None,
        }
    }

    /// Same destination, fresh session id and entries.
    pub fn restart(&mut self) {
        self.session_id = uuid::Uuid::new_v4().to_string();
        self.entries.clear();
        if let Some(path) = &self.file_path {
            let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
            self.file_path = Some(dir.join(format!("session_{}.jsonl", self.session_id)));
        }
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    /// Records an entry; write failures are logged and otherwise ignored.
    pub fn record(&mut self, entry: HistoryEntry) {
        self.entries.push(entry);
        if let Err(e) = self.flush() {
            tracing::warn!(session = %self.session_id, error = %e, "transcript write failed");
        }
    }

    /// Append the latest entry to the JSONL file.
    fn flush(&self) -> PilotResult<()> {
        let (Some(path), Some(last)) = (&self.file_path, self.entries.last()) else {
            return Ok(());
        };
        let line = serde_json::to_string(last)?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        writeln!(file, "{}", line)?;
        tracing::debug!(path = %path.display(), "history entry flushed");
        Ok(())
    }
}

/// `<data dir>/PagePilot/sessions`, falling back to the current working directory.
fn data_dir_or_cwd() -> PathBuf {
    match dirs::data_local_dir() {
        Some(base) => base.join("PagePilot").join("sessions"),
        None => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    }
}
