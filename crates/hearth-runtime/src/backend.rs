use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use hearth_core::AddonManifest;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::error::HotLoadError;

pub const API_PREFIX: &str = "/api/addons";

pub fn mount_prefix(addon_id: &str) -> String {
    format!("{API_PREFIX}/{addon_id}")
}

/// The host's routing layer.
pub trait BackendMounter: Send + Sync {
    fn mount<'a>(
        &'a self,
        addon_id: &'a str,
        prefix: &'a str,
        entry: &'a Path,
    ) -> Pin<Box<dyn Future<Output = Result<(), HotLoadError>> + Send + 'a>>;

    /// Best-effort removal. Returns `false` when the routes stay mounted.
    fn unmount<'a>(
        &'a self,
        addon_id: &'a str,
        prefix: &'a str,
    ) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>>;
}

/// Route table of a host that can add routes at runtime but never remove
/// them. Unmounted prefixes keep answering until the host restarts.
#[derive(Default)]
pub struct RouteTableMounter {
    routes: RwLock<BTreeMap<String, PathBuf>>,
}

impl RouteTableMounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn routes(&self) -> Vec<(String, PathBuf)> {
        self.routes
            .read()
            .await
            .iter()
            .map(|(p, e)| (p.clone(), e.clone()))
            .collect()
    }
}

impl BackendMounter for RouteTableMounter {
    fn mount<'a>(
        &'a self,
        addon_id: &'a str,
        prefix: &'a str,
        entry: &'a Path,
    ) -> Pin<Box<dyn Future<Output = Result<(), HotLoadError>> + Send + 'a>> {
        Box::pin(async move {
            let mut routes = self.routes.write().await;
            routes.insert(prefix.to_string(), entry.to_path_buf());
            tracing::info!(addon_id, prefix, entry = %entry.display(), "Backend routes mounted");
            Ok(())
        })
    }

    fn unmount<'a>(
        &'a self,
        _addon_id: &'a str,
        _prefix: &'a str,
    ) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>> {
        Box::pin(async { false })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadedBackend {
    pub prefix: String,
    pub entry: PathBuf,
    pub loaded_at: DateTime<Utc>,
}

/// Owned set of backends mounted in this process.
pub struct BackendRegistry {
    mounter: Arc<dyn BackendMounter>,
    loaded: RwLock<BTreeMap<String, LoadedBackend>>,
}

impl BackendRegistry {
    pub fn new(mounter: Arc<dyn BackendMounter>) -> Self {
        Self {
            mounter,
            loaded: RwLock::new(BTreeMap::new()),
        }
    }

    /// Mount the backend of an installed addon.
    ///
    /// Returns `Ok(false)` when it was already loaded.
    pub async fn hot_load(
        &self,
        manifest: &AddonManifest,
        addon_dir: &Path,
    ) -> Result<bool, HotLoadError> {
        let backend = manifest
            .backend
            .as_ref()
            .ok_or_else(|| HotLoadError::NoBackend(manifest.id.clone()))?;

        if self.is_loaded(&manifest.id).await {
            tracing::debug!(addon_id = %manifest.id, "Backend already loaded");
            return Ok(false);
        }

        let entry = hearth_core::types::normalize_relative_path(&backend.entry)
            .map(|rel| addon_dir.join(rel))
            .map_err(HotLoadError::Mount)?;
        if !entry.is_file() {
            return Err(HotLoadError::EntryMissing(entry));
        }

        let prefix = mount_prefix(&manifest.id);
        self.mounter.mount(&manifest.id, &prefix, &entry).await?;

        let mut loaded = self.loaded.write().await;
        loaded.insert(
            manifest.id.clone(),
            LoadedBackend {
                prefix,
                entry,
                loaded_at: Utc::now(),
            },
        );
        Ok(true)
    }

    /// Drop an addon from the loaded set.
    ///
    /// Returns a warning when the host could not actually remove the routes.
    pub async fn unload(&self, addon_id: &str) -> Option<String> {
        let removed = self.loaded.write().await.remove(addon_id)?;
        tracing::info!(addon_id, "Backend unloaded");
        if self.mounter.unmount(addon_id, &removed.prefix).await {
            None
        } else {
            Some(format!(
                "Backend routes under {} stay mounted until the host restarts",
                removed.prefix
            ))
        }
    }

    pub async fn is_loaded(&self, addon_id: &str) -> bool {
        self.loaded.read().await.contains_key(addon_id)
    }

    pub async fn loaded_ids(&self) -> Vec<String> {
        self.loaded.read().await.keys().cloned().collect()
    }

    pub async fn get(&self, addon_id: &str) -> Option<LoadedBackend> {
        self.loaded.read().await.get(addon_id).cloned()
    }
}
