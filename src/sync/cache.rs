//! Versioned file cache for mirrored resource state
//!
//! Each tracked resource persists its merged state as a JSON envelope of
//! `{format_version, build, payload}`. Loading is tolerant: a missing
//! file, unreadable file, corrupt payload, or too-old format version all
//! mean a cold start, logged but never an error. Saving goes through a
//! temp file and rename so a partial write cannot corrupt the previous
//! cache.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::types::error::{BridgeError, Result};

/// Format version written into every envelope
pub const CACHE_FORMAT_VERSION: u32 = 1;

/// Oldest format version this build still understands
const MIN_COMPATIBLE_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEnvelope<T> {
    format_version: u32,
    build: String,
    payload: T,
}

/// One resource's persisted cache file
#[derive(Debug, Clone)]
pub struct FileCache {
    path: PathBuf,
    build: String,
}

impl FileCache {
    pub fn new(dir: &Path, account: &str, resource: &str, build: &str) -> Self {
        Self {
            path: dir.join(format!("{account}.{resource}.json")),
            build: build.to_string(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the cached payload, or `None` for a cold start.
    pub fn load<T: DeserializeOwned>(&self) -> Option<T> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "no cached state, starting cold");
            return None;
        }
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "unreadable cache, starting cold");
                return None;
            }
        };
        let envelope: CacheEnvelope<T> = match serde_json::from_str(&raw) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "corrupt cache, starting cold");
                return None;
            }
        };
        if envelope.format_version < MIN_COMPATIBLE_VERSION {
            warn!(
                path = %self.path.display(),
                found = envelope.format_version,
                minimum = MIN_COMPATIBLE_VERSION,
                "cache format too old, starting cold"
            );
            return None;
        }
        debug!(
            path = %self.path.display(),
            build = %envelope.build,
            "loaded cached state"
        );
        Some(envelope.payload)
    }

    /// Persist `payload` atomically enough that a crash mid-write leaves
    /// the previous file intact.
    pub fn save<T: Serialize>(&self, payload: &T) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let envelope = CacheEnvelope {
            format_version: CACHE_FORMAT_VERSION,
            build: self.build.clone(),
            payload,
        };
        let data = serde_json::to_vec(&envelope)
            .map_err(|err| BridgeError::Cache(format!("Failed to encode cache: {err}")))?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, &data)?;
        fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), bytes = data.len(), "persisted state");
        Ok(())
    }
}
