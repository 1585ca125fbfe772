//! Append-only JSONL transcripts.
//!
//! Each session gets a `<key>.jsonl` file under the transcript directory,
//! keyed by the provisional id until the runtime's real id is bound and by
//! the real id afterwards.  [`TranscriptWriter`] keeps a write-through cache
//! so reads never hit disk after the first load, and does its file I/O on
//! the blocking pool.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use sb_domain::error::{Error, Result};
use sb_domain::trace::TraceEvent;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Entries
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    Reasoning,
    ToolInvocation,
    ToolResult,
    System,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Reasoning => "reasoning",
            Self::ToolInvocation => "tool_invocation",
            Self::ToolResult => "tool_result",
            Self::System => "system",
        }
    }
}

/// One persisted, role-tagged unit of conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub timestamp: String,
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl TranscriptEntry {
    /// Entry stamped with the current time.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            role,
            content: content.into(),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sink contract
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Append-only storage for transcript entries.
#[async_trait]
pub trait TranscriptSink: Send + Sync {
    /// Append entries in order.  An empty slice is a no-op.
    async fn append(&self, key: &str, entries: &[TranscriptEntry]) -> Result<()>;

    /// All entries stored under `key`, oldest first.
    async fn read(&self, key: &str) -> Result<Vec<TranscriptEntry>>;

    /// Move everything stored under `from` to the end of `to`.
    async fn relocate(&self, from: &str, to: &str) -> Result<()>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// JSONL writer
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct TranscriptWriter {
    base_dir: PathBuf,
    cache: RwLock<CacheState>,
}

/// Cached transcripts plus per-key write bookkeeping.  A disk read may
/// only populate the cache when no write to that key started or finished
/// while it ran, otherwise it would pin a snapshot missing that write.
#[derive(Default)]
struct CacheState {
    entries: HashMap<String, Vec<TranscriptEntry>>,
    writes: HashMap<String, KeyWrites>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct KeyWrites {
    in_flight: u32,
    generation: u64,
}

impl CacheState {
    fn begin_write(&mut self, key: &str) {
        self.writes.entry(key.to_owned()).or_default().in_flight += 1;
    }

    fn end_write(&mut self, key: &str) {
        let w = self.writes.entry(key.to_owned()).or_default();
        w.in_flight = w.in_flight.saturating_sub(1);
        w.generation += 1;
    }

    fn writes(&self, key: &str) -> KeyWrites {
        self.writes.get(key).copied().unwrap_or_default()
    }
}

impl TranscriptWriter {
    pub fn new(base_dir: &Path) -> Self {
        Self {
            base_dir: base_dir.to_path_buf(),
            cache: RwLock::new(CacheState::default()),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.base_dir.join(format!("{key}.jsonl"))
    }

    /// Append entries (async).  Disk first; the cache is only updated once
    /// the write succeeded.
    pub async fn append_async(&self, key: &str, entries: &[TranscriptEntry]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let buf = serialize_entries(entries)?;
        let path = self.path_for(key);

        self.cache.write().begin_write(key);
        let written = tokio::task::spawn_blocking(move || append_to_file(&path, &buf))
            .await
            .map_err(|e| Error::Other(format!("spawn_blocking join: {e}")))
            .and_then(|r| r);

        {
            let mut cache = self.cache.write();
            cache.end_write(key);
            match &written {
                // Only extend a cache that mirrors the full file.
                Ok(()) => {
                    if let Some(cached) = cache.entries.get_mut(key) {
                        cached.extend(entries.iter().cloned());
                    }
                }
                // The file may hold part of the batch now.
                Err(_) => {
                    cache.entries.remove(key);
                }
            }
        }
        written?;

        TraceEvent::TranscriptAppend {
            session_id: key.to_owned(),
            lines: entries.len(),
        }
        .emit();

        Ok(())
    }

    /// Read a transcript (async).  Cached entries if present, otherwise
    /// loads from disk and populates the cache.
    pub async fn read_async(&self, key: &str) -> Result<Vec<TranscriptEntry>> {
        let seen = match self.cached(key) {
            Ok(entries) => return Ok(entries),
            Err(seen) => seen,
        };

        let path = self.path_for(key);
        let sid = key.to_owned();
        let entries = tokio::task::spawn_blocking(move || read_jsonl_file(&path, &sid))
            .await
            .map_err(|e| Error::Other(format!("spawn_blocking join: {e}")))??;

        self.fill_cache(key, seen, &entries);
        Ok(entries)
    }

    /// Cached entries, or the write state to compare against after a
    /// disk read.
    fn cached(&self, key: &str) -> std::result::Result<Vec<TranscriptEntry>, KeyWrites> {
        let cache = self.cache.read();
        match cache.entries.get(key) {
            Some(entries) => Ok(entries.clone()),
            None => Err(cache.writes(key)),
        }
    }

    fn fill_cache(&self, key: &str, seen: KeyWrites, entries: &[TranscriptEntry]) {
        let mut cache = self.cache.write();
        if seen.in_flight == 0 && cache.writes(key) == seen {
            cache.entries.insert(key.to_owned(), entries.to_vec());
        }
    }

    /// Move `from.jsonl` onto `to.jsonl`.  Renames when the target does not
    /// exist yet, otherwise appends and removes the source.
    pub async fn relocate_async(&self, from: &str, to: &str) -> Result<()> {
        if from == to {
            return Ok(());
        }
        let src = self.path_for(from);
        let dst = self.path_for(to);

        {
            let mut cache = self.cache.write();
            cache.begin_write(from);
            cache.begin_write(to);
        }
        let moved = tokio::task::spawn_blocking(move || -> Result<()> {
            if !src.exists() {
                return Ok(());
            }
            if dst.exists() {
                let buf = std::fs::read_to_string(&src)?;
                append_to_file(&dst, &buf)?;
                std::fs::remove_file(&src)?;
            } else {
                std::fs::rename(&src, &dst)?;
            }
            Ok(())
        })
        .await
        .map_err(|e| Error::Other(format!("spawn_blocking join: {e}")))
        .and_then(|r| r);

        // Both keys are reloaded from disk on next read.
        {
            let mut cache = self.cache.write();
            for key in [from, to] {
                cache.end_write(key);
                cache.entries.remove(key);
            }
        }
        moved?;

        tracing::debug!(from, to, "transcript relocated");
        Ok(())
    }
}

#[async_trait]
impl TranscriptSink for TranscriptWriter {
    async fn append(&self, key: &str, entries: &[TranscriptEntry]) -> Result<()> {
        self.append_async(key, entries).await
    }

    async fn read(&self, key: &str) -> Result<Vec<TranscriptEntry>> {
        self.read_async(key).await
    }

    async fn relocate(&self, from: &str, to: &str) -> Result<()> {
        self.relocate_async(from, to).await
    }
}

fn serialize_entries(entries: &[TranscriptEntry]) -> Result<String> {
    let mut buf = String::new();
    for entry in entries {
        let json = serde_json::to_string(entry)
            .map_err(|e| Error::Other(format!("serializing transcript entry: {e}")))?;
        buf.push_str(&json);
        buf.push('\n');
    }
    Ok(buf)
}

fn append_to_file(path: &Path, buf: &str) -> Result<()> {
    use std::io::Write;
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    file.write_all(buf.as_bytes())?;
    Ok(())
}

fn read_jsonl_file(path: &Path, key: &str) -> Result<Vec<TranscriptEntry>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let raw = std::fs::read_to_string(path)?;
    let mut entries = Vec::new();
    for line in raw.lines() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<TranscriptEntry>(line) {
            Ok(entry) => entries.push(entry),
            Err(e) => {
                tracing::warn!(
                    session_id = key,
                    error = %e,
                    "skipping malformed transcript line"
                );
            }
        }
    }
    Ok(entries)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// In-memory sink
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Volatile sink for tests and the scripted demo mode.
#[derive(Default)]
pub struct MemorySink {
    entries: Mutex<HashMap<String, Vec<TranscriptEntry>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Synchronous view used by assertions.
    pub fn snapshot(&self, key: &str) -> Vec<TranscriptEntry> {
        self.entries.lock().get(key).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl TranscriptSink for MemorySink {
    async fn append(&self, key: &str, entries: &[TranscriptEntry]) -> Result<()> {
        if !entries.is_empty() {
            self.entries
                .lock()
                .entry(key.to_owned())
                .or_default()
                .extend(entries.iter().cloned());
        }
        Ok(())
    }

    async fn read(&self, key: &str) -> Result<Vec<TranscriptEntry>> {
        Ok(self.snapshot(key))
    }

    async fn relocate(&self, from: &str, to: &str) -> Result<()> {
        if from == to {
            return Ok(());
        }
        let mut map = self.entries.lock();
        if let Some(moved) = map.remove(from) {
            map.entry(to.to_owned()).or_default().extend(moved);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn append_then_read_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let writer = TranscriptWriter::new(dir.path());

        writer
            .append_async("s1", &[TranscriptEntry::new(Role::User, "hello")])
            .await
            .unwrap();
        writer
            .append_async("s1", &[TranscriptEntry::new(Role::Assistant, "hi")])
            .await
            .unwrap();

        // A fresh writer has no cache and must read the file.
        let fresh = TranscriptWriter::new(dir.path());
        let entries = fresh.read_async("s1").await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].role, Role::User);
        assert_eq!(entries[1].content, "hi");
    }

    #[tokio::test]
    async fn cache_tracks_appends_after_first_read() {
        let dir = tempfile::tempdir().unwrap();
        let writer = TranscriptWriter::new(dir.path());

        writer
            .append_async("s1", &[TranscriptEntry::new(Role::User, "a")])
            .await
            .unwrap();
        assert_eq!(writer.read_async("s1").await.unwrap().len(), 1);

        writer
            .append_async("s1", &[TranscriptEntry::new(Role::Assistant, "b")])
            .await
            .unwrap();
        assert_eq!(writer.read_async("s1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn read_racing_an_append_does_not_pin_a_stale_cache() {
        let dir = tempfile::tempdir().unwrap();
        let writer = TranscriptWriter::new(dir.path());
        writer
            .append_async("s1", &[TranscriptEntry::new(Role::User, "a")])
            .await
            .unwrap();

        // A reader misses the cache and loads the file...
        let seen = writer.cached("s1").unwrap_err();
        let stale = read_jsonl_file(&writer.path_for("s1"), "s1").unwrap();
        assert_eq!(stale.len(), 1);

        // ...while the turn appends the next entry...
        writer
            .append_async("s1", &[TranscriptEntry::new(Role::Assistant, "b")])
            .await
            .unwrap();

        // ...so its snapshot must not be cached.
        writer.fill_cache("s1", seen, &stale);
        assert!(writer.cached("s1").is_err());

        let entries = writer.read_async("s1").await.unwrap();
        assert_eq!(entries.len(), 2);
        writer
            .append_async("s1", &[TranscriptEntry::new(Role::User, "c")])
            .await
            .unwrap();
        assert_eq!(writer.read_async("s1").await.unwrap().len(), 3);
    }

    #[test]
    fn read_during_an_in_flight_write_is_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let writer = TranscriptWriter::new(dir.path());

        writer.cache.write().begin_write("s1");
        let seen = writer.cached("s1").unwrap_err();
        writer.fill_cache("s1", seen, &[]);
        assert!(writer.cached("s1").is_err());

        writer.cache.write().end_write("s1");
        let seen = writer.cached("s1").unwrap_err();
        writer.fill_cache("s1", seen, &[]);
        assert_eq!(writer.cached("s1").unwrap(), Vec::new());
    }

    #[tokio::test]
    async fn relocate_renames_or_merges() {
        let dir = tempfile::tempdir().unwrap();
        let writer = TranscriptWriter::new(dir.path());

        writer
            .append_async("pending-1", &[TranscriptEntry::new(Role::User, "first")])
            .await
            .unwrap();
        writer.relocate_async("pending-1", "real-1").await.unwrap();
        assert!(writer.read_async("pending-1").await.unwrap().is_empty());
        assert_eq!(writer.read_async("real-1").await.unwrap().len(), 1);

        writer
            .append_async("pending-2", &[TranscriptEntry::new(Role::User, "second")])
            .await
            .unwrap();
        writer.relocate_async("pending-2", "real-1").await.unwrap();
        let merged = writer.read_async("real-1").await.unwrap();
        assert_eq!(
            merged.iter().map(|e| e.content.as_str()).collect::<Vec<_>>(),
            vec!["first", "second"]
        );
    }

    #[tokio::test]
    async fn malformed_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("s1.jsonl"),
            "not json\n{\"timestamp\":\"t\",\"role\":\"system\",\"content\":\"ok\"}\n",
        )
        .unwrap();
        let writer = TranscriptWriter::new(dir.path());
        let entries = writer.read_async("s1").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].role, Role::System);
    }

    #[tokio::test]
    async fn memory_sink_relocates() {
        let sink = MemorySink::new();
        sink.append("a", &[TranscriptEntry::new(Role::User, "x")])
            .await
            .unwrap();
        sink.relocate("a", "b").await.unwrap();
        assert!(sink.snapshot("a").is_empty());
        assert_eq!(sink.snapshot("b").len(), 1);
    }
}
