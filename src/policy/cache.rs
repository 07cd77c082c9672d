//! Content-addressed cache for evaluation results.
//!
//! Entries are keyed by the sorted file list of the evaluated tables and a
//! SHA-256 fingerprint over everything that can change the result. Results
//! live in memory for the session and, optionally, in a cache directory
//! (~/.cache/hdlcheck/eval/ by default).
//!
//! Disk writes go through a temporary file and a rename, so readers never
//! see a partial entry. Several processes writing the same directory at
//! once is not supported: the last rename wins.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use thiserror::Error;

use super::registry::CheckRegistry;
use super::types::{EvalResult, RuleConfig};
use crate::facts::Tables;

/// Bumped whenever rule semantics change, invalidating older entries.
pub const POLICY_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to serialize cache input: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("cache I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Identity of one evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub files: Vec<String>,
    pub fingerprint: String,
}

impl CacheKey {
    pub fn compute(
        tables: &Tables,
        config: &RuleConfig,
        registry: &CheckRegistry,
    ) -> Result<Self, CacheError> {
        let mut hasher = Sha256::new();
        hasher.update(serde_json::to_vec(tables)?);
        hasher.update(b"\0");
        hasher.update(serde_json::to_vec(config)?);
        hasher.update(b"\0");
        hasher.update(serde_json::to_vec(registry)?);
        hasher.update(b"\0");
        hasher.update(POLICY_VERSION.to_le_bytes());

        Ok(Self {
            files: tables.files_touched().into_iter().collect(),
            fingerprint: hex(&hasher.finalize()),
        })
    }

    /// File name of the on-disk entry. The fingerprint already covers the
    /// file list, so it alone is unique.
    fn file_name(&self) -> String {
        format!("{}.json", self.fingerprint)
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry {
    version: u32,
    key: CacheKey,
    result: EvalResult,
}

/// In-memory + file-based result cache.
pub struct EvalCache {
    memory: RwLock<HashMap<CacheKey, EvalResult>>,
    dir: Option<PathBuf>,
}

impl EvalCache {
    /// A cache backed by `dir`, or by the user cache directory when `None`.
    pub fn with_dir(dir: Option<PathBuf>) -> Self {
        let dir = dir.or_else(|| {
            ProjectDirs::from("", "", "hdlcheck").map(|dirs| dirs.cache_dir().join("eval"))
        });
        if let Some(ref dir) = dir {
            if let Err(e) = fs::create_dir_all(dir) {
                tracing::warn!(dir = %dir.display(), error = %e, "cache directory unavailable");
            }
        }
        Self {
            memory: RwLock::new(HashMap::new()),
            dir,
        }
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    pub fn get(&self, key: &CacheKey) -> Option<EvalResult> {
        if let Some(result) = self.memory.read().ok()?.get(key) {
            return Some(result.clone());
        }

        let result = self.read_entry(key)?;
        if let Ok(mut memory) = self.memory.write() {
            memory.insert(key.clone(), result.clone());
        }
        Some(result)
    }

    pub fn put(&self, key: CacheKey, result: &EvalResult) -> Result<(), CacheError> {
        self.write_entry(&key, result)?;
        if let Ok(mut memory) = self.memory.write() {
            memory.insert(key, result.clone());
        }
        Ok(())
    }

    fn read_entry(&self, key: &CacheKey) -> Option<EvalResult> {
        let path = self.dir.as_ref()?.join(key.file_name());
        let content = fs::read_to_string(&path).ok()?;
        let entry: StoredEntry = match serde_json::from_str(&content) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "ignoring unreadable cache entry");
                return None;
            }
        };
        (entry.version == POLICY_VERSION && entry.key == *key).then_some(entry.result)
    }

    fn write_entry(&self, key: &CacheKey, result: &EvalResult) -> Result<(), CacheError> {
        let Some(dir) = &self.dir else {
            return Ok(());
        };
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| CacheError::Io { path, source }
        };

        let entry = StoredEntry {
            version: POLICY_VERSION,
            key: key.clone(),
            result: result.clone(),
        };
        let content = serde_json::to_vec(&entry)?;

        let path = dir.join(key.file_name());
        let tmp = dir.join(format!(".{}.{}.tmp", key.fingerprint, std::process::id()));
        let mut file = fs::File::create(&tmp).map_err(io_err(&tmp))?;
        file.write_all(&content).map_err(io_err(&tmp))?;
        file.sync_all().map_err(io_err(&tmp))?;
        fs::rename(&tmp, &path).map_err(io_err(&path))?;
        Ok(())
    }
}

impl std::fmt::Debug for EvalCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvalCache").field("dir", &self.dir).finish()
    }
}
