use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use crate::types::FormParams;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeadLetterKind {
    Sms,
    Voice,
}

/// One buffered event: the raw (already signature-accepted) form payload
/// plus an error snapshot, serialized as a single JSON line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub timestamp: i64,
    pub kind: DeadLetterKind,
    pub error: String,
    pub raw_payload: FormParams,
}

/// Durable append-only fallback for ingestion payloads that exhausted
/// their retries. Appending must never fail the caller: a buffer write
/// error is logged and swallowed.
#[derive(Clone)]
pub struct DeadLetterBuffer {
    path: PathBuf,
}

impl DeadLetterBuffer {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    pub fn append(&self, kind: DeadLetterKind, raw_payload: &FormParams, err_text: &str) {
        let entry = DeadLetterEntry {
            timestamp: Utc::now().timestamp(),
            kind,
            error: err_text.to_string(),
            raw_payload: raw_payload.clone(),
        };
        if let Err(err) = self.append_entry(&entry) {
            error!("dead-letter append failed (event lost to local buffer): {err:?}");
        }
    }

    fn append_entry(&self, entry: &DeadLetterEntry) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let line = serde_json::to_string(entry)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    /// Reads every buffered entry. Unparseable lines are logged and
    /// skipped; they stay in the archive.
    pub fn read_entries(&self) -> Vec<DeadLetterEntry> {
        Self::read_entries_from(&self.path)
    }

    /// Reads entries from a specific log file, live or an archived
    /// snapshot.
    pub fn read_entries_from(path: &Path) -> Vec<DeadLetterEntry> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(err) => {
                error!("dead-letter read failed: {err:?}");
                return Vec::new();
            }
        };
        let mut entries = Vec::new();
        for line in raw.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<DeadLetterEntry>(line) {
                Ok(entry) => entries.push(entry),
                Err(err) => warn!("skipping corrupt dead-letter line: {err}"),
            }
        }
        entries
    }

    /// Renames the consumed log aside under a timestamped name. The data is
    /// never deleted outright.
    pub fn archive(&self) -> anyhow::Result<Option<PathBuf>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let stamp = Utc::now().format("%Y%m%d%H%M%S");
        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "dead-letter.jsonl".to_string());
        let archived = self
            .path
            .with_file_name(format!("{file_name}.{stamp}.archived"));
        fs::rename(&self.path, &archived)?;
        info!(path = %archived.display(), "dead-letter log archived");
        Ok(Some(archived))
    }
}
