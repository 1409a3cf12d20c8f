//! Optional on-disk snapshot of the response cache
//!
//! Entries are written with an absolute wall-clock expiry so that a restart
//! only revives responses that are still within their TTL.

use crate::http::Payload;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, info, warn};

const SNAPSHOT_VERSION: u32 = 1;

/// Errors reading or writing a cache snapshot
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("IO error on cache file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("Corrupt cache file '{path}': {message}")]
    Corrupt { path: String, message: String },
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedEntry {
    key: String,
    expires_at_ms: u64,
    payload: Payload,
}

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    saved_at_ms: u64,
    entries: Vec<PersistedEntry>,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// JSON file holding cached payloads
#[derive(Debug, Clone)]
pub struct PersistentCache {
    path: PathBuf,
}

impl PersistentCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn display_path(&self) -> String {
        self.path.to_string_lossy().to_string()
    }

    /// Read entries that are still fresh, with their remaining TTL.
    ///
    /// A missing file is an empty snapshot.
    pub fn load(&self) -> Result<Vec<(String, Payload, Duration)>, PersistError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No cache snapshot at {}", self.display_path());
                return Ok(Vec::new());
            }
            Err(source) => {
                return Err(PersistError::Io {
                    path: self.display_path(),
                    source,
                })
            }
        };

        let snapshot: Snapshot =
            serde_json::from_str(&content).map_err(|e| PersistError::Corrupt {
                path: self.display_path(),
                message: e.to_string(),
            })?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(PersistError::Corrupt {
                path: self.display_path(),
                message: format!(
                    "unsupported snapshot version {} (expected {})",
                    snapshot.version, SNAPSHOT_VERSION
                ),
            });
        }

        let now = now_ms();
        let total = snapshot.entries.len();
        let fresh: Vec<_> = snapshot
            .entries
            .into_iter()
            .filter(|entry| entry.expires_at_ms > now)
            .map(|entry| {
                let remaining = Duration::from_millis(entry.expires_at_ms - now);
                (entry.key, entry.payload, remaining)
            })
            .collect();

        if fresh.len() < total {
            debug!("Dropped {} expired snapshot entries", total - fresh.len());
        }
        info!(
            "Loaded {} cached responses from {}",
            fresh.len(),
            self.display_path()
        );
        Ok(fresh)
    }

    /// Write entries (with remaining TTL) to disk, replacing any previous snapshot
    pub fn save(&self, entries: &[(String, Arc<Payload>, Duration)]) -> Result<usize, PersistError> {
        let now = now_ms();
        let snapshot = Snapshot {
            version: SNAPSHOT_VERSION,
            saved_at_ms: now,
            entries: entries
                .iter()
                .map(|(key, payload, remaining)| PersistedEntry {
                    key: key.clone(),
                    expires_at_ms: now.saturating_add(remaining.as_millis() as u64),
                    payload: Payload::clone(payload),
                })
                .collect(),
        };

        let json = serde_json::to_string(&snapshot).map_err(|e| PersistError::Corrupt {
            path: self.display_path(),
            message: e.to_string(),
        })?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| PersistError::Io {
                path: parent.to_string_lossy().to_string(),
                source,
            })?;
        }

        // Write-then-rename keeps the previous snapshot intact on failure
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, json).map_err(|source| PersistError::Io {
            path: tmp.to_string_lossy().to_string(),
            source,
        })?;
        if let Err(source) = fs::rename(&tmp, &self.path) {
            warn!("Failed to replace cache snapshot {}", self.display_path());
            return Err(PersistError::Io {
                path: self.display_path(),
                source,
            });
        }

        info!(
            "Saved {} cached responses to {}",
            snapshot.entries.len(),
            self.display_path()
        );
        Ok(snapshot.entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = PersistentCache::new(dir.path().join("absent.json"));
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_save_then_load_keeps_fresh_entries() {
        let dir = TempDir::new().unwrap();
        let store = PersistentCache::new(dir.path().join("nested/cache.json"));
        let payload = Arc::new(Payload::new(200, "{}").with_content_type("application/json"));
        let entries = vec![
            ("fresh".to_string(), Arc::clone(&payload), Duration::from_secs(600)),
            ("stale".to_string(), payload, Duration::ZERO),
        ];

        assert_eq!(store.save(&entries).unwrap(), 2);
        let loaded = store.load().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].0, "fresh");
        assert_eq!(loaded[0].1.content_type.as_deref(), Some("application/json"));
        assert!(loaded[0].2 <= Duration::from_secs(600));
        assert!(loaded[0].2 > Duration::from_secs(590));
    }

    #[test]
    fn test_corrupt_file_reported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.json");
        fs::write(&path, "not json").unwrap();
        let err = PersistentCache::new(&path).load().unwrap_err();
        assert!(matches!(err, PersistError::Corrupt { .. }));
    }
}
