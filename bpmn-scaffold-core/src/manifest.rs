//! Generation ledger.
//!
//! Records, per entity, which files were generated and with what content, and
//! which shared-file blocks belong to it. The ledger seeds the identifier
//! registry on the next run and lets `verify` report drift.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::warn;
use uuid::Uuid;

use crate::error::{Result, ScaffoldError};
use crate::naming::{identifiers_overlap, IdentifierRegistry, IdentifierSet};
use crate::types::EntityKey;

pub const MANIFEST_VERSION: u32 = 1;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub version: u32,
    /// Keyed by the entity key's display form, e.g. `process:order`.
    pub entities: BTreeMap<String, EntityRecord>,
}

impl Default for Manifest {
    fn default() -> Self {
        Self {
            version: MANIFEST_VERSION,
            entities: BTreeMap::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub key: EntityKey,
    pub raw_name: String,
    pub identifiers: IdentifierSet,
    pub artifacts: Vec<ArtifactRecord>,
    pub fragments: Vec<FragmentRecord>,
    pub generated_at: DateTime<Utc>,
    pub run_id: Uuid,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    /// Relative to the target root.
    pub path: PathBuf,
    pub sha256: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentRecord {
    pub path: PathBuf,
    pub slot: String,
    pub block_id: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftKind {
    /// The file (or the entity's block inside a shared file) is gone.
    Missing,
    /// The file exists but its content hash differs from the recorded one.
    Modified,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Drift {
    pub entity: String,
    pub path: PathBuf,
    pub kind: DriftKind,
}

pub fn sha256_hex(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}

impl Manifest {
    /// Load the ledger, or an empty one when the file does not exist yet.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(ScaffoldError::io(path, e)),
        };
        let manifest: Manifest = serde_json::from_slice(&bytes)
            .map_err(|e| ScaffoldError::Manifest(format!("{}: {}", path.display(), e)))?;
        if manifest.version != MANIFEST_VERSION {
            return Err(ScaffoldError::Manifest(format!(
                "{}: unsupported manifest version {}",
                path.display(),
                manifest.version
            )));
        }
        Ok(manifest)
    }

    pub fn to_json(&self) -> Result<String> {
        let mut json = serde_json::to_string_pretty(self)
            .map_err(|e| ScaffoldError::Manifest(e.to_string()))?;
        json.push('\n');
        Ok(json)
    }

    pub fn get(&self, key: &EntityKey) -> Option<&EntityRecord> {
        self.entities.get(&key.to_string())
    }

    /// Insert or replace an entity's record. Returns paths the previous
    /// record owned that the new one no longer does.
    pub fn record(&mut self, record: EntityRecord) -> Vec<PathBuf> {
        let orphans = match self.entities.get(&record.key.to_string()) {
            Some(previous) => previous
                .artifacts
                .iter()
                .filter(|old| !record.artifacts.iter().any(|new| new.path == old.path))
                .map(|old| old.path.clone())
                .collect(),
            None => Vec::new(),
        };
        self.entities.insert(record.key.to_string(), record);
        orphans
    }

    pub fn remove(&mut self, key: &EntityKey) -> Option<EntityRecord> {
        self.entities.remove(&key.to_string())
    }

    /// Keys of other recorded entities that claim any identifier of `ids`.
    /// Those records go stale once `key` is committed with `ids`.
    pub fn superseded_by(&self, key: &EntityKey, ids: &IdentifierSet) -> Vec<EntityKey> {
        self.entities
            .values()
            .filter(|r| &r.key != key && identifiers_overlap(key, ids, &r.key, &r.identifiers))
            .map(|r| r.key.clone())
            .collect()
    }

    /// Claim every recorded entity's identifiers in `registry`.
    ///
    /// Newer records win. An older record whose identifiers are already
    /// claimed is skipped with a warning; that record is stale and gets
    /// replaced when its entity is generated again.
    pub fn seed(&self, registry: &mut IdentifierRegistry) -> Result<()> {
        let mut records: Vec<&EntityRecord> = self.entities.values().collect();
        records.sort_by(|a, b| b.generated_at.cmp(&a.generated_at));
        for record in records {
            match registry.allocate(&record.key, &record.identifiers) {
                Ok(()) => {}
                Err(ScaffoldError::IdentifierCollision { identifier, owner, .. }) => {
                    warn!(
                        entity = %record.key,
                        %identifier,
                        %owner,
                        "Stale manifest record, identifiers now owned by a newer entity"
                    );
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Compare the ledger with the files under `target_root`.
    pub fn drift(&self, target_root: &Path) -> Vec<Drift> {
        let mut drift = Vec::new();
        for (entity, record) in &self.entities {
            for artifact in &record.artifacts {
                let kind = match std::fs::read(target_root.join(&artifact.path)) {
                    Ok(bytes) if sha256_hex(&bytes) == artifact.sha256 => continue,
                    Ok(_) => DriftKind::Modified,
                    Err(_) => DriftKind::Missing,
                };
                drift.push(Drift {
                    entity: entity.clone(),
                    path: artifact.path.clone(),
                    kind,
                });
            }
            for fragment in &record.fragments {
                let marker = format!("@scaffold:begin {}", fragment.block_id);
                let present = std::fs::read_to_string(target_root.join(&fragment.path))
                    .map(|content| content.lines().any(|l| l.trim_end().ends_with(&marker)))
                    .unwrap_or(false);
                if !present {
                    drift.push(Drift {
                        entity: entity.clone(),
                        path: fragment.path.clone(),
                        kind: DriftKind::Missing,
                    });
                }
            }
        }
        drift
    }
}
