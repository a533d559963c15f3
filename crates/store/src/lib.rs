//! Persisted per-file read progress for incremental scans.
//!
//! The store is a JSON snapshot keyed by absolute file path. Every
//! update rewrites the whole snapshot through a sibling temporary file
//! followed by an atomic rename, so a crash mid-write leaves either the
//! previous store or the new one. A missing, deleted, or corrupted
//! store degrades to "no cursors", which at worst costs a full re-scan.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use usage_core::TokenCounts;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to write cursor store: {0}")]
    Io(#[from] io::Error),
    #[error("failed to encode cursor store: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Read-progress marker for one log file.
///
/// `last_model` and `prev_totals` seed the Codex parser on resume: the
/// session model appears in lines before the cursor, and cumulative
/// token totals are needed to keep differencing across scans.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileCursor {
    pub byte_offset: u64,
    pub file_size: u64,
    pub mtime: Option<String>,
    pub updated_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_totals: Option<TokenCounts>,
}

impl FileCursor {
    pub fn new(byte_offset: u64, file_size: u64, mtime: Option<String>) -> Self {
        Self {
            byte_offset,
            file_size,
            mtime,
            updated_at: Utc::now().to_rfc3339(),
            last_model: None,
            prev_totals: None,
        }
    }

    /// A smaller file, or a modification time older than the recorded
    /// one, is conclusive proof the file was replaced or rotated; the
    /// recorded offset must not be trusted.
    pub fn is_stale(&self, file_size: u64, mtime: Option<&str>) -> bool {
        if file_size < self.file_size {
            return true;
        }
        match (self.mtime.as_deref(), mtime) {
            (Some(recorded), Some(current)) => current < recorded,
            _ => false,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct Snapshot {
    cursors: BTreeMap<String, FileCursor>,
}

#[derive(Serialize)]
struct SnapshotRef<'a> {
    cursors: &'a BTreeMap<String, FileCursor>,
}

#[derive(Debug)]
pub struct CursorStore {
    path: PathBuf,
    cursors: BTreeMap<String, FileCursor>,
}

impl CursorStore {
    /// Opens the store at `path`. An unreadable or unparseable file is
    /// treated as empty, never as an error.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let cursors = match fs::read_to_string(&path) {
            Ok(data) => serde_json::from_str::<Snapshot>(&data)
                .map(|snapshot| snapshot.cursors)
                .unwrap_or_default(),
            Err(_) => BTreeMap::new(),
        };
        Self { path, cursors }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, file_path: &str) -> Option<&FileCursor> {
        self.cursors.get(file_path)
    }

    pub fn put(&mut self, file_path: impl Into<String>, cursor: FileCursor) {
        self.cursors.insert(file_path.into(), cursor);
    }

    pub fn remove(&mut self, file_path: &str) -> Option<FileCursor> {
        self.cursors.remove(file_path)
    }

    pub fn clear(&mut self) {
        self.cursors.clear();
    }

    /// Keeps only the cursors the predicate accepts; used to drop
    /// cursors for files that no longer exist on disk.
    pub fn retain<F>(&mut self, f: F)
    where
        F: FnMut(&String, &mut FileCursor) -> bool,
    {
        self.cursors.retain(f);
    }

    pub fn len(&self) -> usize {
        self.cursors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cursors.is_empty()
    }

    /// Atomic replace: write the snapshot to a sibling temp file, then
    /// rename it over the target.
    pub fn persist(&self) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_vec_pretty(&SnapshotRef {
            cursors: &self.cursors,
        })?;
        let tmp = tmp_path(&self.path);
        fs::write(&tmp, &data)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_else(|| "cursors".into());
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn cursor(offset: u64, size: u64, mtime: &str) -> FileCursor {
        FileCursor::new(offset, size, Some(mtime.to_string()))
    }

    #[test]
    fn roundtrips_through_disk() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("cursors.json");
        let mut store = CursorStore::open(&path);
        let mut saved = cursor(128, 256, "2025-03-01T10:00:00+00:00");
        saved.last_model = Some("gpt-5".to_string());
        saved.prev_totals = Some(TokenCounts {
            input_tokens: 10,
            output_tokens: 2,
            cache_read_tokens: 1,
            cache_write_tokens: 0,
        });
        store.put("/logs/a.jsonl", saved.clone());
        store.persist().expect("persist");

        let reopened = CursorStore::open(&path);
        assert_eq!(reopened.len(), 1);
        assert_eq!(reopened.get("/logs/a.jsonl"), Some(&saved));
    }

    #[test]
    fn missing_file_opens_empty() {
        let dir = tempdir().expect("tempdir");
        let store = CursorStore::open(dir.path().join("nope.json"));
        assert!(store.is_empty());
    }

    #[test]
    fn corrupted_file_degrades_to_empty_and_recovers_on_persist() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("cursors.json");
        fs::write(&path, b"{ not json").expect("write garbage");

        let mut store = CursorStore::open(&path);
        assert!(store.is_empty());
        store.put("/logs/a.jsonl", cursor(1, 2, "2025-03-01T10:00:00+00:00"));
        store.persist().expect("persist over garbage");
        assert_eq!(CursorStore::open(&path).len(), 1);
    }

    #[test]
    fn retain_drops_rejected_cursors() {
        let dir = tempdir().expect("tempdir");
        let mut store = CursorStore::open(dir.path().join("cursors.json"));
        store.put("/logs/keep.jsonl", cursor(1, 2, "2025-03-01T10:00:00+00:00"));
        store.put("/logs/gone.jsonl", cursor(3, 4, "2025-03-01T10:00:00+00:00"));
        store.retain(|path, _| path.ends_with("keep.jsonl"));
        assert_eq!(store.len(), 1);
        assert!(store.get("/logs/gone.jsonl").is_none());
    }

    #[test]
    fn persist_leaves_no_temp_file_and_creates_parents() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("nested/deep/cursors.json");
        let store = CursorStore::open(&path);
        store.persist().expect("persist");
        assert!(path.is_file());
        assert!(!tmp_path(&path).exists());
    }

    #[test]
    fn shrunk_file_is_stale() {
        let c = cursor(100, 100, "2025-03-01T10:00:00+00:00");
        assert!(c.is_stale(99, Some("2025-03-01T11:00:00+00:00")));
        assert!(!c.is_stale(100, Some("2025-03-01T11:00:00+00:00")));
        assert!(!c.is_stale(150, Some("2025-03-01T11:00:00+00:00")));
    }

    #[test]
    fn older_mtime_is_stale() {
        let c = cursor(100, 100, "2025-03-01T10:00:00+00:00");
        assert!(c.is_stale(200, Some("2025-03-01T09:59:59+00:00")));
        assert!(!c.is_stale(200, Some("2025-03-01T10:00:00+00:00")));
        assert!(!c.is_stale(200, None));
    }
}
