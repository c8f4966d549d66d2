//! `AddonService`: the single entry point over manifests, catalogs,
//! installs, setup, health and the backend registry.
//!
//! Disk is the source of truth for what is installed. The merged catalog,
//! the health cache and the loaded-backend set are in-memory views owned by
//! the service and rebuilt by [`AddonService::startup`].

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use hearth_core::lifecycle::resolve;
use hearth_core::manifest::ManifestLoad;
use hearth_core::merge::merge;
use hearth_core::{
    AddonStatus, CatalogAddonEntry, CatalogSource, HealthCacheEntry, LifecycleFacts,
    LifecyclePhase, LoadError, ManifestState, ManifestStore, MergedCatalog, SourceStatus,
};
use hearth_runtime::{
    BackendMounter, BackendRegistry, Clock, HealthCache, HealthProbe, HookLoader,
    HttpHealthProbe, ProcessHookLoader, RouteTableMounter, SetupRunner, SystemClock, read_stamp,
};
use serde::Serialize;
use tokio::sync::RwLock;

use crate::config::HearthConfig;
use crate::error::{InstallError, StoreError};
use crate::fetch::{CatalogCache, CatalogFetcher, FetchReport};
use crate::install::{InstallPipeline, InstallRequest, InstallResult};
use crate::loader::FsCatalogLoader;
use crate::payload::{GitFetcher, PayloadFetcher};
use crate::refresh::RefreshTask;
use crate::sources::{CatalogSourcesStore, CreateSourceRequest, UpdateSourceRequest};

/// Replaceable collaborators. Tests swap in scripted probes, clocks and
/// mounters; the binary uses [`ServiceSeams::from_config`].
pub struct ServiceSeams {
    pub payload: Arc<dyn PayloadFetcher>,
    pub hooks: Arc<dyn HookLoader>,
    pub probe: Arc<dyn HealthProbe>,
    pub mounter: Arc<dyn BackendMounter>,
    pub clock: Arc<dyn Clock>,
}

impl ServiceSeams {
    pub fn from_config(config: &HearthConfig) -> Result<Self, StoreError> {
        let probe = HttpHealthProbe::new(config.health.base_url.clone(), config.probe_timeout())
            .map_err(|e| StoreError::Config(format!("health probe: {e}")))?;
        Ok(Self {
            payload: Arc::new(GitFetcher::new(config.git_timeout())),
            hooks: Arc::new(ProcessHookLoader),
            probe: Arc::new(probe),
            mounter: Arc::new(RouteTableMounter::new()),
            clock: Arc::new(SystemClock),
        })
    }
}

/// One addon as shown in the store.
#[derive(Debug, Clone, Serialize)]
pub struct StoreEntry {
    pub source_id: String,
    pub trusted: bool,
    pub addon: CatalogAddonEntry,
    pub installed: bool,
    pub backend_loaded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub setup_success: Option<bool>,
    pub lifecycle: LifecyclePhase,
    pub health: HealthCacheEntry,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub install_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend_prefix: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreView {
    pub sources: Vec<SourceStatus>,
    pub addons: Vec<StoreEntry>,
}

pub struct AddonService {
    config: HearthConfig,
    manifests: ManifestStore,
    sources: Arc<CatalogSourcesStore>,
    fetcher: CatalogFetcher,
    loader: FsCatalogLoader,
    catalog: RwLock<Arc<MergedCatalog>>,
    setup: Arc<SetupRunner>,
    health: Arc<HealthCache>,
    backends: Arc<BackendRegistry>,
    pipeline: InstallPipeline,
}

impl AddonService {
    pub fn new(config: HearthConfig, seams: ServiceSeams) -> Result<Self, StoreError> {
        let sources = Arc::new(CatalogSourcesStore::new(
            config.sources_file(),
            config.paths.core_root.clone(),
        ));
        let cache = CatalogCache::new(config.catalog_cache_dir());
        let fetcher = CatalogFetcher::new(sources.clone(), cache.clone(), config.fetch_timeout())?;
        let loader = FsCatalogLoader::new(config.paths.core_root.clone(), cache);

        let setup = Arc::new(SetupRunner::new(seams.hooks, config.setup_timeout()));
        let health = Arc::new(HealthCache::new(seams.probe, seams.clock, config.health_ttl()));
        let backends = Arc::new(BackendRegistry::new(seams.mounter));
        let pipeline = InstallPipeline::new(
            config.addons_dir(),
            config.retained_dir(),
            config.links.clone(),
            seams.payload,
            setup.clone(),
            backends.clone(),
            health.clone(),
            config.setup_config_json(),
        );

        Ok(Self {
            manifests: ManifestStore::new(config.addons_dir()),
            config,
            sources,
            fetcher,
            loader,
            catalog: RwLock::new(Arc::new(MergedCatalog::default())),
            setup,
            health,
            backends,
            pipeline,
        })
    }

    pub fn config(&self) -> &HearthConfig {
        &self.config
    }

    /// Prepare directories, load sources and manifests and merge catalogs.
    /// Nothing is set up or mounted; one-shot commands stop here.
    pub async fn prepare(&self) -> Result<Arc<ManifestLoad>, StoreError> {
        for dir in [
            self.config.addons_dir(),
            self.config.retained_dir(),
            self.config.catalog_cache_dir(),
        ] {
            tokio::fs::create_dir_all(&dir).await?;
        }

        self.reload_catalog().await?;
        Ok(self.manifests.reload().await)
    }

    /// [`prepare`](Self::prepare), then run cached setup and hot-load every
    /// installed backend.
    pub async fn startup(&self) -> Result<(), StoreError> {
        let load = self.prepare().await?;
        let setup_config = self.config.setup_config_json();

        for manifest in load.addons.values().filter(|m| m.backend.is_some()) {
            let _guard = self.pipeline.lock(&manifest.id).await;
            let dir = self.pipeline.addon_dir(&manifest.id);
            if !dir.is_dir() {
                tracing::debug!(addon_id = %manifest.id, "Removed during startup; skipping");
                continue;
            }
            if let Some(outcome) = self.setup.run(manifest, &dir, &setup_config, false).await
                && !outcome.success
            {
                tracing::warn!(addon_id = %manifest.id, "Skipping hot-load after failed setup");
                continue;
            }
            if let Err(e) = self.backends.hot_load(manifest, &dir).await {
                tracing::warn!(addon_id = %manifest.id, code = e.code(), "Backend hot-load failed: {e}");
            }
        }

        let loaded = self.backends.loaded_ids().await.len();
        tracing::info!(
            installed = load.addons.len(),
            loaded,
            manifest_errors = load.errors.len(),
            "Addon service started"
        );
        Ok(())
    }

    /// Re-read catalog sources and their cached documents and re-merge.
    pub async fn reload_catalog(&self) -> Result<Vec<SourceStatus>, StoreError> {
        let sources = self.sources.load().await?;
        let merged = Arc::new(merge(&sources, &self.loader));
        tracing::info!(
            sources = merged.sources.len(),
            addons = merged.winners.len(),
            "Catalog merged"
        );
        let statuses = merged.sources.clone();
        *self.catalog.write().await = merged;
        Ok(statuses)
    }

    /// Fetch every enabled remote source now, then re-merge.
    pub async fn refresh_catalogs(&self) -> Result<Vec<FetchReport>, StoreError> {
        let reports = self.fetcher.fetch_enabled().await?;
        self.reload_catalog().await?;
        Ok(reports)
    }

    pub async fn list_merged(&self, query: Option<&str>) -> StoreView {
        let catalog = Arc::clone(&*self.catalog.read().await);
        let manifests = self.manifests.snapshot().await;
        let needle = query
            .map(|q| q.trim().to_lowercase())
            .filter(|q| !q.is_empty());

        let mut addons = Vec::new();
        for winner in catalog.winners.values() {
            let entry = &winner.entry;
            if let Some(needle) = &needle {
                let hit = entry.id.to_lowercase().contains(needle)
                    || entry.name.to_lowercase().contains(needle)
                    || entry
                        .description
                        .as_deref()
                        .is_some_and(|d| d.to_lowercase().contains(needle));
                if !hit {
                    continue;
                }
            }
            addons.push(
                self.store_entry(&winner.source_id, winner.trusted, entry, &manifests)
                    .await,
            );
        }

        StoreView {
            sources: catalog.sources.clone(),
            addons,
        }
    }

    pub async fn get_entry(&self, addon_id: &str) -> Result<StoreEntry, StoreError> {
        let catalog = Arc::clone(&*self.catalog.read().await);
        let winner = catalog
            .winners
            .get(addon_id)
            .ok_or_else(|| StoreError::NotFound(format!("addon '{addon_id}'")))?;
        let manifests = self.manifests.snapshot().await;
        Ok(self
            .store_entry(&winner.source_id, winner.trusted, &winner.entry, &manifests)
            .await)
    }

    async fn store_entry(
        &self,
        source_id: &str,
        trusted: bool,
        entry: &CatalogAddonEntry,
        manifests: &ManifestLoad,
    ) -> StoreEntry {
        let status = self.status_with(&entry.id, manifests).await;
        let install_path = self.installed(&entry.id).then(|| self.pipeline.addon_dir(&entry.id));
        let backend_prefix = self.backends.get(&entry.id).await.map(|b| b.prefix);
        StoreEntry {
            source_id: source_id.to_string(),
            trusted,
            addon: entry.clone(),
            installed: install_path.is_some(),
            backend_loaded: backend_prefix.is_some(),
            setup_success: status.setup_success,
            lifecycle: status.phase,
            health: status.health,
            install_path,
            backend_prefix,
        }
    }

    /// Install the catalog winner for `addon_id`.
    pub async fn install(&self, addon_id: &str, force: bool) -> InstallResult {
        let winner = self.catalog.read().await.winners.get(addon_id).cloned();
        let Some(winner) = winner else {
            return (addon_id, InstallError::NotInCatalog(addon_id.to_string())).into();
        };

        let result = self
            .pipeline
            .install(InstallRequest {
                addon_id: addon_id.to_string(),
                repo: winner.entry.repo,
                git_ref: winner.entry.git_ref,
                path: winner.entry.path,
                force,
            })
            .await;
        self.manifests.reload().await;
        result
    }

    pub async fn uninstall(&self, addon_id: &str, remove_files: bool) -> InstallResult {
        let result = self.pipeline.uninstall(addon_id, remove_files).await;
        self.manifests.reload().await;
        result
    }

    /// Lifecycle of one addon known to the catalog or installed on disk.
    pub async fn status(&self, addon_id: &str) -> Result<AddonStatus, StoreError> {
        let known = self.catalog.read().await.winners.contains_key(addon_id);
        if !known && !self.installed(addon_id) {
            return Err(StoreError::NotFound(format!("addon '{addon_id}'")));
        }
        let manifests = self.manifests.snapshot().await;
        Ok(self.status_with(addon_id, &manifests).await)
    }

    /// Status of every catalog winner and every installed addon, by id.
    pub async fn status_all(&self) -> Result<Vec<AddonStatus>, StoreError> {
        let mut ids: Vec<String> = self.catalog.read().await.winners.keys().cloned().collect();
        ids.extend(self.installed_ids().await?);
        ids.sort();
        ids.dedup();

        let manifests = self.manifests.snapshot().await;
        let mut statuses = Vec::with_capacity(ids.len());
        for id in ids {
            statuses.push(self.status_with(&id, &manifests).await);
        }
        Ok(statuses)
    }

    async fn status_with(&self, addon_id: &str, manifests: &ManifestLoad) -> AddonStatus {
        let dir = self.pipeline.addon_dir(addon_id);
        let installed = self.installed(addon_id);

        let manifest = match manifests.addons.get(addon_id) {
            Some(m) => ManifestState::Valid {
                backend: m.backend.clone(),
            },
            None => match manifests.errors.iter().find(|e| e.addon_path == dir) {
                Some(e) => ManifestState::Invalid(e.message.clone()),
                None => ManifestState::Absent,
            },
        };

        let facts = LifecycleFacts {
            addon_id: addon_id.to_string(),
            installed,
            manifest,
            backend_loaded: self.backends.is_loaded(addon_id).await,
            setup_success: installed
                .then(|| read_stamp(&dir).map(|s| s.success))
                .flatten(),
        };
        resolve(&facts, self.health.as_ref()).await
    }

    fn installed(&self, addon_id: &str) -> bool {
        hearth_core::types::validate_addon_id(addon_id).is_ok()
            && self.pipeline.addon_dir(addon_id).is_dir()
    }

    async fn installed_ids(&self) -> Result<Vec<String>, StoreError> {
        let mut ids = Vec::new();
        let mut entries = match tokio::fs::read_dir(self.config.addons_dir()).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ids),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with('.') && entry.file_type().await?.is_dir() {
                ids.push(name);
            }
        }
        Ok(ids)
    }

    pub async fn manifest_errors(&self) -> Vec<LoadError> {
        self.manifests.errors().await
    }

    pub async fn list_sources(&self) -> Result<Vec<CatalogSource>, StoreError> {
        self.sources.load().await
    }

    pub async fn add_source(&self, req: CreateSourceRequest) -> Result<CatalogSource, StoreError> {
        let source = self.sources.add_source(req).await?;
        self.reload_catalog().await?;
        Ok(source)
    }

    pub async fn update_source(
        &self,
        id: &str,
        req: UpdateSourceRequest,
    ) -> Result<CatalogSource, StoreError> {
        let source = self.sources.update_source(id, req).await?;
        self.reload_catalog().await?;
        Ok(source)
    }

    pub async fn delete_source(&self, id: &str) -> Result<(), StoreError> {
        self.sources.delete_source(id).await?;
        self.reload_catalog().await?;
        Ok(())
    }
}

impl RefreshTask for AddonService {
    fn refresh<'a>(&'a self) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            match self.refresh_catalogs().await {
                Ok(reports) => {
                    let failed = reports.iter().filter(|r| r.error.is_some()).count();
                    tracing::info!(sources = reports.len(), failed, "Catalog refresh complete");
                }
                Err(e) => tracing::warn!(code = e.code(), "Catalog refresh failed: {e}"),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_runtime::{ManualClock, ProbeError, ProbeResponse};
    use std::time::Duration;
    use tempfile::TempDir;

    struct Unreachable;

    impl HealthProbe for Unreachable {
        fn probe<'a>(
            &'a self,
            _addon_id: &'a str,
            _health_path: &'a str,
        ) -> Pin<Box<dyn Future<Output = Result<ProbeResponse, ProbeError>> + Send + 'a>> {
            Box::pin(async { Err(ProbeError::Timeout) })
        }
    }

    fn service(tmp: &TempDir) -> AddonService {
        let mut config = HearthConfig::default();
        config.paths.data_dir = tmp.path().join("data");
        config.paths.core_root = tmp.path().join("core");
        let seams = ServiceSeams {
            payload: Arc::new(GitFetcher::new(Duration::from_secs(5))),
            hooks: Arc::new(ProcessHookLoader),
            probe: Arc::new(Unreachable),
            mounter: Arc::new(RouteTableMounter::new()),
            clock: Arc::new(ManualClock::new(chrono::Utc::now())),
        };
        AddonService::new(config, seams).unwrap()
    }

    #[tokio::test]
    async fn startup_waits_for_the_addon_lock() {
        let tmp = TempDir::new().unwrap();
        let addon = tmp.path().join("data/addons/weather");
        std::fs::create_dir_all(&addon).unwrap();
        std::fs::write(
            addon.join("manifest.json"),
            serde_json::json!({
                "id": "weather",
                "name": "Weather",
                "version": "1.0.0",
                "types": ["action"],
                "backend": { "entry": "main.py" },
            })
            .to_string(),
        )
        .unwrap();
        std::fs::write(addon.join("main.py"), "").unwrap();

        let service = Arc::new(service(&tmp));
        let guard = service.pipeline.lock("weather").await;
        let startup = tokio::spawn({
            let service = Arc::clone(&service);
            async move { service.startup().await }
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!service.backends.is_loaded("weather").await);

        drop(guard);
        startup.await.unwrap().unwrap();
        assert!(service.backends.is_loaded("weather").await);
    }

    #[tokio::test]
    async fn startup_skips_addons_removed_while_waiting() {
        let tmp = TempDir::new().unwrap();
        let addon = tmp.path().join("data/addons/weather");
        std::fs::create_dir_all(&addon).unwrap();
        std::fs::write(
            addon.join("manifest.json"),
            serde_json::json!({
                "id": "weather",
                "name": "Weather",
                "version": "1.0.0",
                "types": ["action"],
                "backend": { "entry": "main.py" },
            })
            .to_string(),
        )
        .unwrap();
        std::fs::write(addon.join("main.py"), "").unwrap();

        let service = Arc::new(service(&tmp));
        service.prepare().await.unwrap();
        let guard = service.pipeline.lock("weather").await;
        let startup = tokio::spawn({
            let service = Arc::clone(&service);
            async move { service.startup().await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        std::fs::remove_dir_all(&addon).unwrap();
        drop(guard);

        startup.await.unwrap().unwrap();
        assert!(!service.backends.is_loaded("weather").await);
    }
}
