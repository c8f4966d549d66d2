//! Addon manifests and the in-memory manifest store.
//!
//! Every addon directory carries a `manifest.json`. A scan of an addons root
//! produces a [`ManifestLoad`]: the valid manifests keyed by id plus one
//! [`LoadError`] per manifest that could not be used. A single bad manifest
//! never aborts a scan.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{LoadError, ManifestError};
use crate::types::{AddonType, normalize_relative_path, validate_addon_id};

pub const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddonManifest {
    pub id: String,
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub types: Vec<AddonType>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frontend: Option<FrontendDecl>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<BackendDecl>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendDecl {
    /// Entry file, relative to the addon directory.
    pub entry: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setup: Option<String>,
    #[serde(default = "default_health_path")]
    pub health_path: String,
    #[serde(default)]
    pub requires_config: Vec<String>,
    #[serde(default = "default_requirements_dir")]
    pub requirements_dir: String,
}

fn default_health_path() -> String {
    "/health".into()
}

fn default_requirements_dir() -> String {
    "requirements".into()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummarySize {
    Sm,
    Md,
    Lg,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrontendDecl {
    pub base_path: String,
    #[serde(default)]
    pub has_settings_page: bool,
    #[serde(default)]
    pub show_in_sidebar: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sidebar_label: Option<String>,
    #[serde(default)]
    pub show_on_frontpage: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary_component: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary_size: Option<SummarySize>,
}

impl AddonManifest {
    /// Structural validation beyond what serde enforces.
    pub fn validate(&self) -> Result<(), ManifestError> {
        validate_addon_id(&self.id).map_err(ManifestError::Invalid)?;
        if self.name.trim().is_empty() {
            return Err(ManifestError::Invalid("name must not be empty".into()));
        }
        if self.version.trim().is_empty() {
            return Err(ManifestError::Invalid("version must not be empty".into()));
        }
        if self.types.is_empty() {
            return Err(ManifestError::Invalid(
                "at least one addon type is required".into(),
            ));
        }
        if let Some(backend) = &self.backend {
            let entry = normalize_relative_path(&backend.entry).map_err(ManifestError::Invalid)?;
            if entry == "." {
                return Err(ManifestError::Invalid(
                    "backend entry must name a file".into(),
                ));
            }
            if let Some(setup) = &backend.setup {
                normalize_relative_path(setup).map_err(ManifestError::Invalid)?;
            }
            normalize_relative_path(&backend.requirements_dir).map_err(ManifestError::Invalid)?;
            if !backend.health_path.starts_with('/') {
                return Err(ManifestError::Invalid(
                    "backend healthPath must start with '/'".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Read and validate the manifest of a single addon directory.
pub fn read_manifest(addon_dir: &Path) -> Result<AddonManifest, ManifestError> {
    let path = addon_dir.join(MANIFEST_FILE);
    if !path.is_file() {
        return Err(ManifestError::Missing(path));
    }
    let content = std::fs::read_to_string(&path)?;
    let manifest: AddonManifest = serde_json::from_str(&content)?;
    manifest.validate()?;
    Ok(manifest)
}

/// Result of scanning an addons root.
#[derive(Debug, Clone, Default)]
pub struct ManifestLoad {
    pub addons: BTreeMap<String, AddonManifest>,
    pub errors: Vec<LoadError>,
}

/// Scan `<root>/*/manifest.json` in directory-name order.
///
/// Directories without a manifest and dot-prefixed directories are ignored.
/// The first manifest seen for an id wins; later ones are load errors.
pub fn load_manifests(root: &Path) -> ManifestLoad {
    let mut load = ManifestLoad::default();

    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(path = %root.display(), "Addons directory not readable: {e}");
            return load;
        }
    };

    let mut dirs: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_dir()
                && path
                    .file_name()
                    .is_some_and(|n| !n.to_string_lossy().starts_with('.'))
        })
        .collect();
    dirs.sort();

    for dir in dirs {
        if !dir.join(MANIFEST_FILE).exists() {
            continue;
        }
        match read_manifest(&dir) {
            Ok(manifest) => {
                if load.addons.contains_key(&manifest.id) {
                    tracing::warn!(
                        addon_id = %manifest.id,
                        path = %dir.display(),
                        "Duplicate addon id, keeping first"
                    );
                    load.errors.push(LoadError {
                        addon_path: dir,
                        message: format!("duplicate addon id '{}'", manifest.id),
                    });
                    continue;
                }
                load.addons.insert(manifest.id.clone(), manifest);
            }
            Err(e) => {
                tracing::warn!(path = %dir.display(), "Skipping addon manifest: {e}");
                load.errors.push(LoadError {
                    addon_path: dir,
                    message: e.to_string(),
                });
            }
        }
    }

    tracing::debug!(
        root = %root.display(),
        addons = load.addons.len(),
        errors = load.errors.len(),
        "Manifest scan complete"
    );
    load
}

/// Current manifest snapshot of one addons root.
///
/// `reload` builds a complete new [`ManifestLoad`] before swapping it in,
/// so readers see either the old or the new snapshot and never a partial one.
pub struct ManifestStore {
    root: PathBuf,
    current: RwLock<Arc<ManifestLoad>>,
}

impl ManifestStore {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            current: RwLock::new(Arc::new(ManifestLoad::default())),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Rescan the root on the blocking pool and swap in the new snapshot.
    /// If the scan task dies, the previous snapshot stays current.
    pub async fn reload(&self) -> Arc<ManifestLoad> {
        let root = self.root.clone();
        let load = match tokio::task::spawn_blocking(move || load_manifests(&root)).await {
            Ok(load) => Arc::new(load),
            Err(e) => {
                tracing::error!(root = %self.root.display(), "Manifest scan aborted: {e}");
                return self.snapshot().await;
            }
        };
        let mut current = self.current.write().await;
        *current = Arc::clone(&load);
        load
    }

    pub async fn snapshot(&self) -> Arc<ManifestLoad> {
        Arc::clone(&*self.current.read().await)
    }

    pub async fn get(&self, addon_id: &str) -> Option<AddonManifest> {
        self.current.read().await.addons.get(addon_id).cloned()
    }

    pub async fn list(&self) -> Vec<AddonManifest> {
        self.current.read().await.addons.values().cloned().collect()
    }

    pub async fn errors(&self) -> Vec<LoadError> {
        self.current.read().await.errors.clone()
    }
}
