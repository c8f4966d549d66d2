//! Install and uninstall of addon payloads.
//!
//! An install stages the payload in a temp dir, validates its manifest,
//! moves it into `<data>/addons/<id>` via a dot-prefixed partial dir, runs
//! setup, and only then exposes it through link surfaces and the backend
//! registry. A failed setup removes the installed directory again.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use hearth_core::manifest::read_manifest;
use hearth_core::types::{normalize_relative_path, validate_addon_id};
use hearth_core::{AddonManifest, ManifestError};
use hearth_runtime::{BackendRegistry, HealthCache, SetupRunner};
use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard};
use url::Url;

use crate::config::LinksConfig;
use crate::error::InstallError;
use crate::payload::PayloadFetcher;

/// Per-addon async locks. Different ids never block each other.
#[derive(Default)]
pub struct AddonLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl AddonLocks {
    pub async fn acquire(&self, addon_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks
                .entry(addon_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

#[derive(Debug, Clone)]
pub struct InstallRequest {
    pub addon_id: String,
    pub repo: Url,
    pub git_ref: String,
    pub path: String,
    pub force: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallStatus {
    Installed,
    Uninstalled,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct InstallResult {
    pub addon_id: String,
    pub status: InstallStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest: Option<AddonManifest>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl InstallResult {
    pub fn failed(addon_id: &str, errors: Vec<String>) -> Self {
        Self {
            addon_id: addon_id.to_string(),
            status: InstallStatus::Failed,
            manifest: None,
            errors,
            warnings: Vec::new(),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.status == InstallStatus::Failed
    }
}

impl From<(&str, InstallError)> for InstallResult {
    fn from((addon_id, err): (&str, InstallError)) -> Self {
        InstallResult::failed(addon_id, vec![format!("{} ({})", err, err.code())])
    }
}

pub struct InstallPipeline {
    addons_dir: PathBuf,
    retained_dir: PathBuf,
    links: LinksConfig,
    fetcher: Arc<dyn PayloadFetcher>,
    setup: Arc<SetupRunner>,
    backends: Arc<BackendRegistry>,
    health: Arc<HealthCache>,
    setup_config: serde_json::Value,
    locks: AddonLocks,
}

impl InstallPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        addons_dir: PathBuf,
        retained_dir: PathBuf,
        links: LinksConfig,
        fetcher: Arc<dyn PayloadFetcher>,
        setup: Arc<SetupRunner>,
        backends: Arc<BackendRegistry>,
        health: Arc<HealthCache>,
        setup_config: serde_json::Value,
    ) -> Self {
        Self {
            addons_dir,
            retained_dir,
            links,
            fetcher,
            setup,
            backends,
            health,
            setup_config,
            locks: AddonLocks::default(),
        }
    }

    pub fn addon_dir(&self, addon_id: &str) -> PathBuf {
        self.addons_dir.join(addon_id)
    }

    /// Hold the per-addon lock that installs and uninstalls take.
    pub async fn lock(&self, addon_id: &str) -> OwnedMutexGuard<()> {
        self.locks.acquire(addon_id).await
    }

    pub async fn install(&self, req: InstallRequest) -> InstallResult {
        let addon_id = req.addon_id.clone();
        if let Err(e) = validate_addon_id(&addon_id) {
            return (addon_id.as_str(), InstallError::InvalidId(e)).into();
        }
        let _guard = self.locks.acquire(&addon_id).await;

        match self.install_locked(&req).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(addon_id = %addon_id, code = e.code(), "Install failed: {e}");
                (addon_id.as_str(), e).into()
            }
        }
    }

    async fn install_locked(&self, req: &InstallRequest) -> Result<InstallResult, InstallError> {
        let addon_id = req.addon_id.as_str();
        let rel = normalize_relative_path(&req.path).map_err(InstallError::PathTraversal)?;

        let target = self.addon_dir(addon_id);
        if target.exists() && !req.force {
            return Err(InstallError::AlreadyInstalled(addon_id.to_string()));
        }

        tokio::fs::create_dir_all(&self.addons_dir).await?;
        let stage = tempfile::Builder::new()
            .prefix(&format!("hearth-install-{addon_id}-"))
            .tempdir()?;
        let checkout = stage.path().join("payload");

        tracing::info!(addon_id, repo = %req.repo, git_ref = %req.git_ref, "Fetching addon payload");
        self.fetcher.fetch(&req.repo, &req.git_ref, &checkout).await?;

        let payload = checkout.join(&rel);
        let payload = payload
            .canonicalize()
            .map_err(|_| InstallError::ManifestMissing(payload.clone()))?;
        let root = checkout.canonicalize()?;
        if !payload.starts_with(&root) {
            return Err(InstallError::PathTraversal(req.path.clone()));
        }

        let manifest = read_manifest(&payload).map_err(|e| match e {
            ManifestError::Missing(path) => InstallError::ManifestMissing(path),
            other => InstallError::ManifestInvalid(other.to_string()),
        })?;
        if manifest.id != addon_id {
            return Err(InstallError::IdMismatch {
                expected: addon_id.to_string(),
                found: manifest.id,
            });
        }

        let mut warnings = Vec::new();
        if target.exists() {
            if let Some(warning) = self.backends.unload(addon_id).await {
                warnings.push(warning);
            }
            tracing::info!(addon_id, "Replacing existing install");
            tokio::fs::remove_dir_all(&target).await?;
        }

        let partial = self.addons_dir.join(format!(".{addon_id}.partial"));
        if partial.exists() {
            tokio::fs::remove_dir_all(&partial).await?;
        }
        {
            let (src, dst) = (payload.clone(), partial.clone());
            tokio::task::spawn_blocking(move || crate::payload::copy_dir_recursive(&src, &dst))
                .await
                .map_err(|e| InstallError::Fetch(e.to_string()))??;
        }
        tokio::fs::rename(&partial, &target).await?;
        drop(stage);
        tracing::info!(addon_id, path = %target.display(), "Addon files installed");

        if let Some(outcome) = self
            .setup
            .run(&manifest, &target, &self.setup_config, true)
            .await
            && !outcome.success
        {
            let message = outcome
                .error
                .unwrap_or_else(|| "setup reported failure".into());
            tracing::warn!(addon_id, "Rolling back install after failed setup");
            if let Err(e) = tokio::fs::remove_dir_all(&target).await {
                tracing::warn!(addon_id, "Failed to roll back install: {e}");
            }
            // A forced reinstall leaves the previous links pointing at the
            // directory just removed.
            for problem in self.unlink_surfaces(addon_id).await {
                tracing::warn!(addon_id, "{problem}");
            }
            self.health.invalidate(addon_id).await;
            return Ok(InstallResult::failed(
                addon_id,
                vec!["Addon setup failed".into(), message],
            ));
        }

        warnings.extend(self.link_surfaces(addon_id, &target).await);

        if manifest.backend.is_some() {
            match self.backends.hot_load(&manifest, &target).await {
                Ok(_) => tracing::info!(addon_id, "Backend mounted"),
                Err(e) => {
                    tracing::warn!(addon_id, code = e.code(), "Backend hot-load failed: {e}");
                    warnings.push(format!("Backend hot-load failed: {e}"));
                }
            }
        }
        self.health.invalidate(addon_id).await;

        tracing::info!(addon_id, version = %manifest.version, "Addon installed");
        Ok(InstallResult {
            addon_id: addon_id.to_string(),
            status: InstallStatus::Installed,
            manifest: Some(manifest),
            errors: Vec::new(),
            warnings,
        })
    }

    /// Remove an installed addon. With `remove_files = false` the directory
    /// moves to `<data>/retained/<id>` instead of being deleted.
    pub async fn uninstall(&self, addon_id: &str, remove_files: bool) -> InstallResult {
        if let Err(e) = validate_addon_id(addon_id) {
            return (addon_id, InstallError::InvalidId(e)).into();
        }
        let _guard = self.locks.acquire(addon_id).await;

        let target = self.addon_dir(addon_id);
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        if let Some(warning) = self.backends.unload(addon_id).await {
            warnings.push(warning);
        }

        errors.extend(self.unlink_surfaces(addon_id).await);

        let installed = target.is_dir();
        if !installed {
            errors.push(format!("Addon '{addon_id}' is not installed"));
        } else if remove_files {
            if let Err(e) = tokio::fs::remove_dir_all(&target).await {
                errors.push(format!("Failed to remove {}: {e}", target.display()));
            }
        } else if let Err(e) = self.retain(addon_id, &target).await {
            errors.push(format!("Failed to retain {}: {e}", target.display()));
        }

        self.health.invalidate(addon_id).await;

        let status = if installed && !target.exists() {
            tracing::info!(addon_id, remove_files, "Addon uninstalled");
            InstallStatus::Uninstalled
        } else {
            InstallStatus::Failed
        };
        InstallResult {
            addon_id: addon_id.to_string(),
            status,
            manifest: None,
            errors,
            warnings,
        }
    }

    async fn retain(&self, addon_id: &str, target: &Path) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.retained_dir).await?;
        let retained = self.retained_dir.join(addon_id);
        if retained.exists() {
            tokio::fs::remove_dir_all(&retained).await?;
        }
        match tokio::fs::rename(target, &retained).await {
            Ok(()) => Ok(()),
            // Cross-device rename; fall back to copy + delete.
            Err(_) => {
                let (src, dst) = (target.to_path_buf(), retained.clone());
                tokio::task::spawn_blocking(move || crate::payload::copy_dir_recursive(&src, &dst))
                    .await
                    .map_err(std::io::Error::other)??;
                tokio::fs::remove_dir_all(target).await
            }
        }
    }

    fn link_paths(&self, addon_id: &str) -> Vec<PathBuf> {
        [&self.links.backend_dir, &self.links.frontend_dir]
            .into_iter()
            .flatten()
            .map(|dir| dir.join(addon_id))
            .collect()
    }

    /// Remove the addon's symlinks from every link surface. Anything that is
    /// not a symlink stays and is reported.
    async fn unlink_surfaces(&self, addon_id: &str) -> Vec<String> {
        let mut problems = Vec::new();
        for link in self.link_paths(addon_id) {
            match tokio::fs::symlink_metadata(&link).await {
                Ok(meta) if meta.file_type().is_symlink() => {
                    if let Err(e) = tokio::fs::remove_file(&link).await {
                        problems.push(format!("Failed to remove link {}: {e}", link.display()));
                    }
                }
                Ok(_) => problems.push(format!(
                    "{} is not a symlink; left untouched",
                    link.display()
                )),
                Err(_) => {}
            }
        }
        problems
    }

    /// Point each configured link surface at the installed addon. Returns
    /// warnings; nothing here fails the install.
    async fn link_surfaces(&self, addon_id: &str, target: &Path) -> Vec<String> {
        let mut warnings = Vec::new();
        if let Some(dir) = &self.links.backend_dir
            && let Err(e) = ensure_symlink(&dir.join(addon_id), target).await
        {
            warnings.push(format!("Backend link not created: {e}"));
        }
        let frontend = target.join("frontend");
        if let Some(dir) = &self.links.frontend_dir
            && frontend.is_dir()
            && let Err(e) = ensure_symlink(&dir.join(addon_id), &frontend).await
        {
            warnings.push(format!("Frontend link not created: {e}"));
        }
        warnings
    }
}

/// Create or repoint `link -> target`. A real file or directory at `link`
/// is never replaced.
async fn ensure_symlink(link: &Path, target: &Path) -> std::io::Result<()> {
    match tokio::fs::symlink_metadata(link).await {
        Ok(meta) if meta.file_type().is_symlink() => {
            if tokio::fs::read_link(link).await? == target {
                return Ok(());
            }
            tokio::fs::remove_file(link).await?;
        }
        Ok(_) => {
            return Err(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("{} exists and is not a symlink", link.display()),
            ));
        }
        Err(_) => {}
    }
    if let Some(parent) = link.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    symlink(target, link).await
}

#[cfg(unix)]
async fn symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    tokio::fs::symlink(target, link).await
}

#[cfg(not(unix))]
async fn symlink(_target: &Path, link: &Path) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        format!("symlinks are not supported here ({})", link.display()),
    ))
}
