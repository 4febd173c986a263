//! State store - last-known-good snapshots of applied resources.
//!
//! One record per resource identity. The file-backed store keeps one TOML
//! file per identity, so concurrent writes to different identities never
//! contend, and saves go through a temp-file rename so a concurrent load
//! never observes a partial record.

use crate::error::Result;
use crate::types::{Attrs, ResourceId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// Persisted snapshot of a node's last successful apply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
    /// Identifier assigned by the provider
    pub provider_id: String,
    /// Attributes as last applied (bindings fully resolved)
    pub attrs: Attrs,
    /// Outputs published by the provider on the last apply
    #[serde(default)]
    pub outputs: Attrs,
    /// Dependencies at the time of the last apply; orders orphan deletion
    #[serde(default)]
    pub dependencies: Vec<ResourceId>,
    /// Last successful apply
    pub updated_at: DateTime<Utc>,
}

/// Persistence contract for state records.
///
/// `save` must be atomic with respect to a concurrent `load` of the same
/// identity; writes to different identities must not block each other.
pub trait StateStore: Send + Sync {
    fn load(&self, id: &ResourceId) -> Result<Option<StateRecord>>;
    fn save(&self, id: &ResourceId, record: &StateRecord) -> Result<()>;
    fn delete(&self, id: &ResourceId) -> Result<()>;
    /// All identities with a record.
    fn list(&self) -> Result<Vec<ResourceId>>;
}

// ============================================================================
// File-backed store
// ============================================================================

/// File-backed store: `<dir>/<kind>.<name>.toml` per identity.
#[derive(Debug)]
pub struct FileStateStore {
    dir: PathBuf,
}

impl FileStateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, id: &ResourceId) -> PathBuf {
        self.dir.join(format!("{id}.toml"))
    }
}

impl StateStore for FileStateStore {
    fn load(&self, id: &ResourceId) -> Result<Option<StateRecord>> {
        let path = self.record_path(id);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        let record: StateRecord = toml::from_str(&content)?;
        log::debug!("loaded state record for {id} from {}", path.display());
        Ok(Some(record))
    }

    fn save(&self, id: &ResourceId, record: &StateRecord) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let path = self.record_path(id);
        let content = toml::to_string_pretty(record)?;

        // Write-then-rename so a concurrent load never sees a torn record
        let tmp = path.with_extension("toml.tmp");
        fs::write(&tmp, &content)?;
        fs::rename(&tmp, &path)?;
        log::debug!("saved state record for {id} to {}", path.display());
        Ok(())
    }

    fn delete(&self, id: &ResourceId) -> Result<()> {
        let path = self.record_path(id);
        match fs::remove_file(&path) {
            Ok(()) => {
                log::debug!("deleted state record for {id}");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn list(&self) -> Result<Vec<ResourceId>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(stem) = name.to_str().and_then(|n| n.strip_suffix(".toml")) else {
                continue;
            };
            if let Some(id) = ResourceId::parse(stem) {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }
}

// ============================================================================
// In-memory store
// ============================================================================

/// In-memory store for tests and previews.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    records: RwLock<HashMap<ResourceId, StateRecord>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self, id: &ResourceId) -> Result<Option<StateRecord>> {
        Ok(self.records.read().expect("state lock poisoned").get(id).cloned())
    }

    fn save(&self, id: &ResourceId, record: &StateRecord) -> Result<()> {
        self.records
            .write()
            .expect("state lock poisoned")
            .insert(id.clone(), record.clone());
        Ok(())
    }

    fn delete(&self, id: &ResourceId) -> Result<()> {
        self.records.write().expect("state lock poisoned").remove(id);
        Ok(())
    }

    fn list(&self) -> Result<Vec<ResourceId>> {
        let mut ids: Vec<ResourceId> = self
            .records
            .read()
            .expect("state lock poisoned")
            .keys()
            .cloned()
            .collect();
        ids.sort();
        Ok(ids)
    }
}
