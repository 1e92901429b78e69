//! Per-turn event sink. Metadata key/values and raw stream events are
//! buffered in memory and flushed atomically at turn end.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Entries
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecordEntry {
    /// Metadata key/value (start/end markers, exit code, session id…).
    Meta {
        at: DateTime<Utc>,
        key: String,
        value: serde_json::Value,
    },
    /// Raw stream event from the agent process.
    Event {
        at: DateTime<Utc>,
        kind: String,
        payload: serde_json::Value,
    },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Recorder
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Buffered sink for one turn. Entries are appended in wall-time order;
/// `flush` writes `turn-<hex>.jsonl` atomically (tmp + rename), merging
/// any entries a previous flush of the same turn already wrote (a
/// wait-resume reuses the turn id and its record file).
pub struct Recorder {
    path: PathBuf,
    entries: Mutex<Vec<RecordEntry>>,
}

impl Recorder {
    pub fn new(records_dir: &Path, turn_hex: &str) -> Self {
        Self {
            path: records_dir.join(format!("turn-{turn_hex}.jsonl")),
            entries: Mutex::new(Vec::new()),
        }
    }

    pub fn record_meta(&self, key: &str, value: serde_json::Value) {
        self.entries.lock().push(RecordEntry::Meta {
            at: Utc::now(),
            key: key.to_string(),
            value,
        });
    }

    pub fn record_event(&self, kind: &str, payload: serde_json::Value) {
        self.entries.lock().push(RecordEntry::Event {
            at: Utc::now(),
            kind: kind.to_string(),
            payload,
        });
    }

    /// Number of buffered (unflushed) entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Atomically write all entries. The buffer is drained on success so
    /// a later flush of the same recorder only appends the delta.
    pub fn flush(&self) -> std::io::Result<()> {
        let drained: Vec<RecordEntry> = {
            let mut entries = self.entries.lock();
            std::mem::take(&mut *entries)
        };
        if drained.is_empty() {
            return Ok(());
        }

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        // Merge with any previous flush of this turn, then tmp + rename.
        let mut content = match std::fs::read_to_string(&self.path) {
            Ok(existing) => existing,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e),
        };
        for entry in &drained {
            let line = serde_json::to_string(entry)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            content.push_str(&line);
            content.push('\n');
        }

        let tmp = self.path.with_extension("jsonl.tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Where this recorder flushes to.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_entries(path: &Path) -> Vec<RecordEntry> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn flush_writes_entries_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let rec = Recorder::new(dir.path(), "abcd1234");

        rec.record_meta("turn_start", serde_json::json!({"profile": "dev"}));
        rec.record_event("stdout", serde_json::json!("hello"));
        rec.record_meta("exit_code", serde_json::json!(0));
        assert_eq!(rec.len(), 3);

        rec.flush().unwrap();
        assert!(rec.is_empty());

        let entries = read_entries(rec.path());
        assert_eq!(entries.len(), 3);
        assert!(matches!(&entries[0], RecordEntry::Meta { key, .. } if key == "turn_start"));
        assert!(matches!(&entries[1], RecordEntry::Event { kind, .. } if kind == "stdout"));
    }

    #[test]
    fn second_flush_appends_merged() {
        let dir = tempfile::tempdir().unwrap();
        let rec = Recorder::new(dir.path(), "abcd1234");

        rec.record_meta("a", serde_json::json!(1));
        rec.flush().unwrap();

        rec.record_meta("b", serde_json::json!(2));
        rec.flush().unwrap();

        let entries = read_entries(rec.path());
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn wait_resume_recorder_merges_same_turn_file() {
        let dir = tempfile::tempdir().unwrap();

        // First iteration of the turn.
        let rec1 = Recorder::new(dir.path(), "feed0000");
        rec1.record_meta("iteration", serde_json::json!(1));
        rec1.flush().unwrap();

        // Wait-resume: a fresh recorder for the same turn hex.
        let rec2 = Recorder::new(dir.path(), "feed0000");
        rec2.record_meta("iteration", serde_json::json!(2));
        rec2.flush().unwrap();

        let entries = read_entries(rec2.path());
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn empty_flush_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let rec = Recorder::new(dir.path(), "cafe0001");
        rec.flush().unwrap();
        assert!(!rec.path().exists());
    }
}
