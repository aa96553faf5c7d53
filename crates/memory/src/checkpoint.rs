//! Checkpoint stores for per-thread conversation state.
//!
//! - [`InMemoryCheckpointStore`]: process-lifetime map, for tests and the
//!   default gateway setup.
//! - [`FileCheckpointStore`]: one JSON file per thread under
//!   `~/.flavia/threads/`, replaced atomically on every save.

use async_trait::async_trait;
use flavia_core::checkpoint::CheckpointStore;
use flavia_core::error::MemoryError;
use flavia_core::message::{ConversationState, ThreadId};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Thread states held in a map.
#[derive(Clone, Default)]
pub struct InMemoryCheckpointStore {
    threads: Arc<RwLock<HashMap<ThreadId, ConversationState>>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn load(&self, thread_id: &ThreadId) -> Result<Option<ConversationState>, MemoryError> {
        Ok(self.threads.read().await.get(thread_id).cloned())
    }

    async fn save(&self, state: &ConversationState) -> Result<(), MemoryError> {
        self.threads
            .write()
            .await
            .insert(state.thread_id.clone(), state.clone());
        Ok(())
    }

    async fn delete(&self, thread_id: &ThreadId) -> Result<(), MemoryError> {
        self.threads.write().await.remove(thread_id);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<ThreadId>, MemoryError> {
        let mut ids: Vec<ThreadId> = self.threads.read().await.keys().cloned().collect();
        ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        Ok(ids)
    }
}

/// Longest escaped stem stored as-is. Leaves room for `.json.tmp` under the
/// usual 255-byte file name limit.
const MAX_PLAIN_STEM: usize = 200;

/// Marks a hashed stem. Never produced by [`encode_file_stem`].
const HASHED_STEM_PREFIX: char = '~';

/// A directory of `<thread>.json` files.
///
/// Thread ids whose escaped form would make an over-long file name are
/// stored under `~<sha256>.json` instead; [`CheckpointStore::list`] reads
/// those back from the saved state.
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, thread_id: &ThreadId) -> PathBuf {
        self.dir.join(format!("{}.json", file_stem_for(thread_id.as_str())))
    }

    async fn read_thread_id(&self, path: &Path) -> Option<ThreadId> {
        let content = tokio::fs::read_to_string(path).await.ok()?;
        let state: ConversationState = serde_json::from_str(&content).ok()?;
        Some(state.thread_id)
    }
}

fn file_stem_for(id: &str) -> String {
    let stem = encode_file_stem(id);
    if stem.len() <= MAX_PLAIN_STEM {
        return stem;
    }
    let digest = Sha256::digest(id.as_bytes());
    let mut hashed = String::with_capacity(1 + digest.len() * 2);
    hashed.push(HASHED_STEM_PREFIX);
    for byte in digest {
        hashed.push_str(&format!("{byte:02x}"));
    }
    hashed
}

/// Thread ids are caller-supplied; keep `[A-Za-z0-9_-]` and hex-escape the rest.
fn encode_file_stem(id: &str) -> String {
    let mut out = String::with_capacity(id.len());
    for byte in id.bytes() {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_' => out.push(byte as char),
            other => out.push_str(&format!("%{other:02X}")),
        }
    }
    out
}

fn decode_file_stem(stem: &str) -> Option<String> {
    let mut bytes = Vec::with_capacity(stem.len());
    let mut iter = stem.bytes();
    while let Some(b) = iter.next() {
        if b == b'%' {
            let hi = iter.next()?;
            let lo = iter.next()?;
            let hex = [hi, lo];
            let hex = std::str::from_utf8(&hex).ok()?;
            bytes.push(u8::from_str_radix(hex, 16).ok()?);
        } else {
            bytes.push(b);
        }
    }
    String::from_utf8(bytes).ok()
}

fn storage_error(action: &str, path: &Path, e: std::io::Error) -> MemoryError {
    MemoryError::Storage(format!("Failed to {action} {}: {e}", path.display()))
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn load(&self, thread_id: &ThreadId) -> Result<Option<ConversationState>, MemoryError> {
        let path = self.path_for(thread_id);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(storage_error("read", &path, e)),
        };

        let state = serde_json::from_str(&content).map_err(|e| MemoryError::Corrupted {
            key: thread_id.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Some(state))
    }

    async fn save(&self, state: &ConversationState) -> Result<(), MemoryError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| storage_error("create", &self.dir, e))?;

        let path = self.path_for(&state.thread_id);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(state)
            .map_err(|e| MemoryError::Storage(format!("Failed to serialize thread: {e}")))?;

        tokio::fs::write(&tmp, &json)
            .await
            .map_err(|e| storage_error("write", &tmp, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| storage_error("replace", &path, e))?;

        debug!(thread_id = %state.thread_id, messages = state.len(), "Thread checkpointed");
        Ok(())
    }

    async fn delete(&self, thread_id: &ThreadId) -> Result<(), MemoryError> {
        let path = self.path_for(thread_id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(storage_error("delete", &path, e)),
        }
    }

    async fn list(&self) -> Result<Vec<ThreadId>, MemoryError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(storage_error("list", &self.dir, e)),
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| storage_error("list", &self.dir, e))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if stem.starts_with(HASHED_STEM_PREFIX) {
                match self.read_thread_id(&path).await {
                    Some(id) => ids.push(id),
                    None => debug!(path = %path.display(), "Skipping unreadable thread file"),
                }
            } else if let Some(id) = decode_file_stem(stem) {
                ids.push(ThreadId(id));
            }
        }
        ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        Ok(ids)
    }
}
