//! Identifier derivation for generated code.
//!
//! Every entity gets exactly one [`IdentifierSet`]; all of its artifacts use
//! those strings verbatim so file names, type names and table names stay
//! consistent with each other.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{Result, ScaffoldError};
use crate::types::{EntityKey, EntityKind};

/// PostgreSQL truncates identifiers longer than this many bytes.
const PG_IDENTIFIER_MAX: usize = 63;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifierSet {
    /// The name as it appeared in the model or request.
    pub raw: String,
    /// PascalCase type-name stem, e.g. `PembuatanArtikel`.
    pub type_name: String,
    /// Lowercase file/module stem, e.g. `pembuatan_artikel`.
    pub file_stem: String,
    /// Lowercase SQL table name.
    pub table_name: String,
}

impl IdentifierSet {
    /// Rust module name for an entity of `kind`, e.g. `order_process`.
    pub fn module_name(&self, kind: EntityKind) -> String {
        format!("{}_{}", self.file_stem, kind.as_str())
    }
}

/// Derive the identifier set for a raw name. Pure and deterministic.
pub fn normalize(raw: &str) -> IdentifierSet {
    let separated: String = raw
        .chars()
        .map(|c| if c == ' ' || c == '-' { '_' } else { c })
        .collect();

    let mut type_name: String = separated
        .split('_')
        .filter(|seg| !seg.is_empty())
        .map(capitalize)
        .collect::<String>()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect();
    if type_name.starts_with(|c: char| c.is_ascii_digit()) {
        type_name.insert(0, 'T');
    }

    let lowered: String = separated
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();

    let file_stem = if lowered.starts_with(|c: char| c.is_ascii_digit()) {
        format!("_{}", lowered)
    } else {
        lowered.clone()
    };

    let mut table_name = if lowered.starts_with(|c: char| c.is_ascii_digit() || c == '_') {
        format!("t_{}", lowered)
    } else {
        lowered
    };
    // ASCII only at this point, so byte truncation is a char boundary.
    table_name.truncate(PG_IDENTIFIER_MAX);

    IdentifierSet {
        raw: raw.to_string(),
        type_name,
        file_stem,
        table_name,
    }
}

fn capitalize(segment: &str) -> String {
    let mut chars = segment.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

// ── Registry ──

/// Which identifier family a claim belongs to.
///
/// Type names and file stems are suffixed with the entity kind in generated
/// code, so they only clash within one kind. Table names share the database
/// namespace and clash across kinds.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Claim {
    Type(EntityKind, String),
    File(EntityKind, String),
    Table(String),
}

impl Claim {
    fn identifier(&self) -> &str {
        match self {
            Claim::Type(_, s) | Claim::File(_, s) | Claim::Table(s) => s,
        }
    }
}

fn claims(kind: EntityKind, ids: &IdentifierSet) -> [Claim; 3] {
    [
        Claim::Type(kind, ids.type_name.clone()),
        Claim::File(kind, ids.file_stem.clone()),
        Claim::Table(ids.table_name.clone()),
    ]
}

/// True when the two entities would claim at least one common identifier.
pub fn identifiers_overlap(a: &EntityKey, a_ids: &IdentifierSet, b: &EntityKey, b_ids: &IdentifierSet) -> bool {
    let theirs = claims(b.kind, b_ids);
    claims(a.kind, a_ids).iter().any(|c| theirs.contains(c))
}

/// Tracks which entity owns each derived identifier.
#[derive(Debug, Default)]
pub struct IdentifierRegistry {
    owners: BTreeMap<Claim, EntityKey>,
}

impl IdentifierRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the identifiers of `ids` for `key`.
    ///
    /// Re-allocating the same identifiers to the same key is a no-op. Nothing
    /// is recorded when the call fails.
    pub fn allocate(&mut self, key: &EntityKey, ids: &IdentifierSet) -> Result<()> {
        if ids.type_name.is_empty() || ids.file_stem.trim_matches('_').is_empty() {
            return Err(ScaffoldError::InvalidIdentifier(ids.raw.clone()));
        }

        let claims = claims(key.kind, ids);
        for claim in &claims {
            if let Some(owner) = self.owners.get(claim) {
                if owner != key {
                    return Err(ScaffoldError::IdentifierCollision {
                        identifier: claim.identifier().to_string(),
                        entity: key.to_string(),
                        owner: owner.to_string(),
                    });
                }
            }
        }

        for claim in claims {
            self.owners.insert(claim, key.clone());
        }
        Ok(())
    }

    /// Drop every claim held by `key`, e.g. before re-registering a renamed
    /// entity.
    pub fn release(&mut self, key: &EntityKey) {
        self.owners.retain(|_, owner| owner != key);
    }

    pub fn owner_of_table(&self, table_name: &str) -> Option<&EntityKey> {
        self.owners.get(&Claim::Table(table_name.to_string()))
    }
}
