//! Persisted build manifest: app id → last-known-good build metadata.
//!
//! Loaded once at startup, mutated in memory while a pass runs, flushed
//! durably at pass end (production) or after each individual build (dev).
//! Entries are written only after a successful build whose hash matches the
//! hash that triggered it, never speculatively, so a crash mid-build simply
//! leaves the old entry behind and the next pass rebuilds.
//!
//! Concurrent use is safe because each app id is owned by exactly one
//! in-flight build task at a time; no entry is ever written by two tasks
//! concurrently.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;

/// Manifest file name inside the output root.
pub const MANIFEST_FILE: &str = "manifest.json";

/// Last-known-good metadata for one app.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    pub id: String,
    pub hash: String,
    pub route: String,
    pub history_api_fallback: bool,
}

/// Shared handle to the manifest map. Cloning is cheap and clones see the
/// same in-memory state, which is how dev mode back-channels build results to
/// the HTTP layer.
#[derive(Debug, Clone)]
pub struct BuildManifest {
    path: PathBuf,
    entries: Arc<RwLock<HashMap<String, ManifestEntry>>>,
}

impl BuildManifest {
    /// Load the manifest from `out_root`, or start empty when no persisted
    /// store exists. An unreadable store is treated as empty too: uncertainty
    /// defaults to rebuilding, never to skipping.
    pub async fn load(out_root: &Path) -> Result<Self> {
        let path = out_root.join(MANIFEST_FILE);
        let entries = match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<HashMap<String, ManifestEntry>>(&bytes) {
                Ok(map) => {
                    debug!(entries = map.len(), path = %path.display(), "manifest loaded");
                    map
                }
                Err(err) => {
                    warn!(path = %path.display(), %err, "manifest unreadable, starting empty");
                    HashMap::new()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(err) => return Err(err.into()),
        };
        Ok(Self {
            path,
            entries: Arc::new(RwLock::new(entries)),
        })
    }

    pub fn get(&self, id: &str) -> Option<ManifestEntry> {
        self.entries.read().get(id).cloned()
    }

    /// In-memory update, immediate. Durable only after `flush`.
    pub fn commit(&self, entry: ManifestEntry) {
        self.entries.write().insert(entry.id.clone(), entry);
    }

    /// Durable write of the full map.
    pub async fn flush(&self) -> Result<()> {
        let snapshot = self.entries.read().clone();
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_vec_pretty(&snapshot)?;
        tokio::fs::write(&self.path, json).await?;
        debug!(entries = snapshot.len(), path = %self.path.display(), "manifest flushed");
        Ok(())
    }

    /// Snapshot of all entries, sorted by route for deterministic mounting.
    pub fn entries(&self) -> Vec<ManifestEntry> {
        let mut entries: Vec<ManifestEntry> = self.entries.read().values().cloned().collect();
        entries.sort_by(|a, b| a.route.cmp(&b.route));
        entries
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
