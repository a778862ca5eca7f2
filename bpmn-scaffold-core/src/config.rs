//! Generator configuration.
//!
//! Loaded from YAML. Every field has a default, so an empty file (or no file
//! at all) yields a working configuration for a target crate laid out as
//! `src/{store,cache,handlers,service}` plus `migrations/`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, ScaffoldError};
use crate::extract::DuplicatePolicy;
use crate::patch::PatchMode;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScaffoldConfig {
    /// Root of the codebase that receives generated code.
    pub target_root: PathBuf,
    /// Directory holding `.form` files, relative to the working directory.
    pub forms_dir: PathBuf,
    pub layout: Layout,
    pub anchors: Anchors,
    pub patch_mode: PatchMode,
    pub duplicate_extensions: DuplicatePolicy,
    pub features: Features,
    /// Ledger location, relative to `target_root`.
    pub manifest_path: PathBuf,
}

impl Default for ScaffoldConfig {
    fn default() -> Self {
        Self {
            target_root: PathBuf::from("."),
            forms_dir: PathBuf::from("resources"),
            layout: Layout::default(),
            anchors: Anchors::default(),
            patch_mode: PatchMode::default(),
            duplicate_extensions: DuplicatePolicy::default(),
            features: Features::default(),
            manifest_path: PathBuf::from(".scaffold/manifest.json"),
        }
    }
}

/// Target-relative locations of generated and shared files.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Layout {
    pub migrations_dir: PathBuf,
    pub store_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub handlers_dir: PathBuf,
    pub service_dir: PathBuf,
    pub routes_file: PathBuf,
}

impl Default for Layout {
    fn default() -> Self {
        Self {
            migrations_dir: PathBuf::from("migrations"),
            store_dir: PathBuf::from("src/store"),
            cache_dir: PathBuf::from("src/cache"),
            handlers_dir: PathBuf::from("src/handlers"),
            service_dir: PathBuf::from("src/service"),
            routes_file: PathBuf::from("src/routes.rs"),
        }
    }
}

/// Sentinel text for each insertion slot. A line containing the text is the
/// anchor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Anchors {
    pub store_modules: String,
    pub store_fields: String,
    pub store_constructors: String,
    pub cache_modules: String,
    pub cache_fields: String,
    pub cache_constructors: String,
    pub handler_modules: String,
    pub service_modules: String,
    pub process_routes: String,
    pub user_task_routes: String,
}

impl Default for Anchors {
    fn default() -> Self {
        let anchor = |slot: &str| format!("@scaffold:anchor {}", slot);
        Self {
            store_modules: anchor("store-modules"),
            store_fields: anchor("store-fields"),
            store_constructors: anchor("store-constructors"),
            cache_modules: anchor("cache-modules"),
            cache_fields: anchor("cache-fields"),
            cache_constructors: anchor("cache-constructors"),
            handler_modules: anchor("handler-modules"),
            service_modules: anchor("service-modules"),
            process_routes: anchor("process-routes"),
            user_task_routes: anchor("user-task-routes"),
        }
    }
}

/// Optional parts of the generated process module.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Features {
    pub search: bool,
    pub update: bool,
    pub history: bool,
}

impl Default for Features {
    fn default() -> Self {
        Self {
            search: true,
            update: true,
            history: true,
        }
    }
}

impl ScaffoldConfig {
    /// Load from a YAML file, or return defaults when `path` is `None`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let content = std::fs::read_to_string(path)
            .map_err(|e| ScaffoldError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_yaml(&content)
            .map_err(|e| ScaffoldError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(yaml).map_err(|e| ScaffoldError::Config(e.to_string()))
    }

    /// Absolute-or-cwd-relative path of a target-relative file.
    pub fn target_path(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.target_root.join(relative)
    }

    pub fn manifest_file(&self) -> PathBuf {
        self.target_path(&self.manifest_path)
    }
}
