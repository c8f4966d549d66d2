//! Catalog sources file (`<data>/catalogs.json`).
//!
//! All read-modify-write cycles go through one async mutex, and every save
//! replaces the file atomically (temp file + rename). A missing file is
//! bootstrapped with a trusted local `dev` source.

use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use hearth_core::{CatalogSource, SourceKind};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::{StoreError, ValidationError};

pub const SOURCES_VERSION: u32 = 1;
pub const DEV_SOURCE_ID: &str = "dev";
pub const DEV_CATALOG_PATH: &str = "catalogs/dev_catalog.json";

static SLUG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("[^a-z0-9]+").expect("slug pattern"));

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SourcesFile {
    version: u32,
    #[serde(default)]
    sources: Vec<CatalogSource>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateSourceRequest {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<SourceKind>,
    pub url: Option<String>,
    pub path: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub trusted: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateSourceRequest {
    pub name: Option<String>,
    pub url: Option<String>,
    pub path: Option<String>,
    pub enabled: Option<bool>,
    pub trusted: Option<bool>,
}

/// Lowercase slug used as the readable part of generated source ids.
pub fn slugify(name: &str) -> String {
    let lower = name.trim().to_lowercase();
    let slug = SLUG_RE.replace_all(&lower, "-");
    let slug = slug.trim_matches('-');
    if slug.is_empty() {
        "catalog".into()
    } else {
        slug.to_string()
    }
}

fn generate_id(name: &str) -> String {
    let suffix: String = uuid::Uuid::new_v4().simple().to_string().chars().take(4).collect();
    format!("{}-{suffix}", slugify(name))
}

pub struct CatalogSourcesStore {
    file: PathBuf,
    core_root: PathBuf,
    lock: Mutex<()>,
}

impl CatalogSourcesStore {
    pub fn new(file: PathBuf, core_root: PathBuf) -> Self {
        Self {
            file,
            core_root,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.file
    }

    /// Load all sources, bootstrapping the file when it does not exist.
    pub async fn load(&self) -> Result<Vec<CatalogSource>, StoreError> {
        let _guard = self.lock.lock().await;
        self.read_locked().await
    }

    pub async fn get(&self, id: &str) -> Result<CatalogSource, StoreError> {
        self.load()
            .await?
            .into_iter()
            .find(|s| s.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("catalog source '{id}'")))
    }

    pub async fn add_source(&self, req: CreateSourceRequest) -> Result<CatalogSource, StoreError> {
        let kind = req
            .kind
            .ok_or_else(|| ValidationError("source type is required".into()))?;
        let (url, path) = match kind {
            SourceKind::Remote => {
                let url = req
                    .url
                    .as_deref()
                    .ok_or_else(|| ValidationError("remote sources require a url".into()))?;
                (Some(validate_url(url)?), None)
            }
            SourceKind::Local => {
                let path = req
                    .path
                    .as_deref()
                    .ok_or_else(|| ValidationError("local sources require a path".into()))?;
                (None, Some(self.validate_local_path(path)?))
            }
        };

        let name = req
            .name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .or_else(|| url.clone())
            .or_else(|| path.clone())
            .unwrap_or_else(|| "catalog".into());

        let _guard = self.lock.lock().await;
        let mut sources = self.read_locked().await?;

        let mut id = generate_id(&name);
        while sources.iter().any(|s| s.id == id) {
            id = generate_id(&name);
        }

        let now = Utc::now();
        let source = CatalogSource {
            id,
            name,
            kind,
            url,
            path,
            enabled: req.enabled,
            trusted: req.trusted,
            created_at: now,
            updated_at: now,
            last_loaded_at: None,
            last_error: None,
        };
        sources.push(source.clone());
        self.write_locked(&sources).await?;

        tracing::info!(source = %source.id, kind = %source.kind, "Catalog source added");
        Ok(source)
    }

    pub async fn update_source(
        &self,
        id: &str,
        req: UpdateSourceRequest,
    ) -> Result<CatalogSource, StoreError> {
        let _guard = self.lock.lock().await;
        let mut sources = self.read_locked().await?;
        let source = sources
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("catalog source '{id}'")))?;

        if let Some(url) = &req.url {
            if source.kind != SourceKind::Remote {
                return Err(ValidationError("url can only be set on remote sources".into()).into());
            }
            source.url = Some(validate_url(url)?);
        }
        if let Some(path) = &req.path {
            if source.kind != SourceKind::Local {
                return Err(ValidationError("path can only be set on local sources".into()).into());
            }
            source.path = Some(self.validate_local_path(path)?);
        }
        if let Some(name) = req.name.map(|n| n.trim().to_string()) {
            if name.is_empty() {
                return Err(ValidationError("name must not be empty".into()).into());
            }
            source.name = name;
        }
        if let Some(enabled) = req.enabled {
            source.enabled = enabled;
        }
        if let Some(trusted) = req.trusted {
            source.trusted = trusted;
        }
        source.updated_at = Utc::now();

        let updated = source.clone();
        self.write_locked(&sources).await?;
        tracing::info!(source = %id, "Catalog source updated");
        Ok(updated)
    }

    pub async fn delete_source(&self, id: &str) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let mut sources = self.read_locked().await?;
        let before = sources.len();
        sources.retain(|s| s.id != id);
        if sources.len() == before {
            return Err(StoreError::NotFound(format!("catalog source '{id}'")));
        }
        self.write_locked(&sources).await?;
        tracing::info!(source = %id, "Catalog source deleted");
        Ok(())
    }

    /// Record fetch bookkeeping. `last_loaded_at` is only overwritten when given.
    pub async fn set_runtime(
        &self,
        id: &str,
        last_loaded_at: Option<DateTime<Utc>>,
        last_error: Option<String>,
    ) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let mut sources = self.read_locked().await?;
        let Some(source) = sources.iter_mut().find(|s| s.id == id) else {
            // Deleted while a fetch was in flight.
            tracing::debug!(source = %id, "Skipping runtime update for removed source");
            return Ok(());
        };
        if last_loaded_at.is_some() {
            source.last_loaded_at = last_loaded_at;
        }
        source.last_error = last_error;
        self.write_locked(&sources).await
    }

    /// Absolute location of a local source path.
    pub fn resolve_local_path(&self, path: &str) -> PathBuf {
        let p = Path::new(path);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.core_root.join(p)
        }
    }

    fn validate_local_path(&self, raw: &str) -> Result<String, ValidationError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ValidationError("path must not be empty".into()));
        }
        let path = Path::new(trimmed);
        if path.is_absolute() {
            return Err(ValidationError(format!(
                "path '{trimmed}' must be relative to the core root"
            )));
        }
        if path
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)))
        {
            return Err(ValidationError(format!(
                "path '{trimmed}' must stay inside the core root"
            )));
        }
        let resolved = self.resolve_local_path(trimmed);
        if resolved.exists() && !resolved.is_file() {
            return Err(ValidationError(format!("path '{trimmed}' is not a file")));
        }
        Ok(trimmed.to_string())
    }

    // ── File access (caller holds the lock) ──────────────────────────────────

    async fn read_locked(&self) -> Result<Vec<CatalogSource>, StoreError> {
        if !self.file.exists() {
            let sources = vec![default_dev_source()];
            self.write_locked(&sources).await?;
            tracing::info!(path = %self.file.display(), "Bootstrapped catalog sources");
            return Ok(sources);
        }
        let content = tokio::fs::read_to_string(&self.file).await?;
        let file: SourcesFile = serde_json::from_str(&content)?;
        Ok(file.sources)
    }

    async fn write_locked(&self, sources: &[CatalogSource]) -> Result<(), StoreError> {
        if let Some(parent) = self.file.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = SourcesFile {
            version: SOURCES_VERSION,
            sources: sources.to_vec(),
        };
        let tmp = self.file.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_string_pretty(&file)?).await?;
        tokio::fs::rename(&tmp, &self.file).await?;
        Ok(())
    }
}

fn validate_url(raw: &str) -> Result<String, ValidationError> {
    let trimmed = raw.trim();
    let url = url::Url::parse(trimmed)
        .map_err(|e| ValidationError(format!("invalid url '{trimmed}': {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ValidationError(format!(
            "url '{trimmed}' must use http or https"
        )));
    }
    Ok(trimmed.to_string())
}

fn default_dev_source() -> CatalogSource {
    let now = Utc::now();
    CatalogSource {
        id: DEV_SOURCE_ID.into(),
        name: "Development catalog".into(),
        kind: SourceKind::Local,
        url: None,
        path: Some(DEV_CATALOG_PATH.into()),
        enabled: true,
        trusted: true,
        created_at: now,
        updated_at: now,
        last_loaded_at: None,
        last_error: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(tmp: &TempDir) -> CatalogSourcesStore {
        CatalogSourcesStore::new(tmp.path().join("data/catalogs.json"), tmp.path().join("core"))
    }

    #[test]
    fn slugify_collapses_symbols() {
        assert_eq!(slugify("Official Catalog!"), "official-catalog");
        assert_eq!(slugify("  ***  "), "catalog");
        assert_eq!(slugify("Über"), "ber");
    }

    #[tokio::test]
    async fn bootstraps_dev_source() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        let sources = store.load().await.unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].id, DEV_SOURCE_ID);
        assert!(sources[0].trusted);
        assert!(store.path().exists());

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(store.path()).unwrap()).unwrap();
        assert_eq!(raw["version"], 1);
    }

    #[tokio::test]
    async fn add_update_delete_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);

        let added = store
            .add_source(CreateSourceRequest {
                name: Some("Community Hub".into()),
                kind: Some(SourceKind::Remote),
                url: Some("https://hub.example/catalog.json".into()),
                enabled: true,
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(added.id.starts_with("community-hub-"));
        assert_eq!(added.id.len(), "community-hub-".len() + 4);
        assert!(!added.trusted);

        let updated = store
            .update_source(
                &added.id,
                UpdateSourceRequest {
                    trusted: Some(true),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(updated.trusted);
        assert!(updated.updated_at >= added.updated_at);

        store.delete_source(&added.id).await.unwrap();
        assert!(matches!(
            store.delete_source(&added.id).await,
            Err(StoreError::NotFound(_))
        ));
        assert_eq!(store.load().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn validation_happens_before_write() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);

        let missing_url = store
            .add_source(CreateSourceRequest {
                kind: Some(SourceKind::Remote),
                ..Default::default()
            })
            .await;
        assert!(matches!(missing_url, Err(StoreError::Validation(_))));

        let escaping = store
            .add_source(CreateSourceRequest {
                kind: Some(SourceKind::Local),
                path: Some("../outside.json".into()),
                ..Default::default()
            })
            .await;
        assert!(matches!(escaping, Err(StoreError::Validation(_))));

        let absolute = store
            .add_source(CreateSourceRequest {
                kind: Some(SourceKind::Local),
                path: Some("/etc/passwd".into()),
                ..Default::default()
            })
            .await;
        assert!(matches!(absolute, Err(StoreError::Validation(_))));

        std::fs::create_dir_all(tmp.path().join("core/catalogs/a-dir")).unwrap();
        let directory = store
            .add_source(CreateSourceRequest {
                kind: Some(SourceKind::Local),
                path: Some("catalogs/a-dir".into()),
                ..Default::default()
            })
            .await;
        assert!(matches!(directory, Err(StoreError::Validation(_))));

        assert!(!store.path().exists(), "rejected input must not touch the file");
    }

    #[tokio::test]
    async fn update_rejects_field_of_other_kind() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        let err = store
            .update_source(
                DEV_SOURCE_ID,
                UpdateSourceRequest {
                    url: Some("https://x.example/c.json".into()),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(err, Err(StoreError::Validation(_))));
    }

    #[tokio::test]
    async fn set_runtime_records_errors_and_keeps_last_loaded() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        let loaded = Utc::now();
        store.set_runtime(DEV_SOURCE_ID, Some(loaded), None).await.unwrap();
        store
            .set_runtime(DEV_SOURCE_ID, None, Some("Fetch failed (500): boom".into()))
            .await
            .unwrap();

        let dev = store.get(DEV_SOURCE_ID).await.unwrap();
        assert_eq!(dev.last_loaded_at, Some(loaded));
        assert_eq!(dev.last_error.as_deref(), Some("Fetch failed (500): boom"));

        store.set_runtime("gone", None, None).await.unwrap();
    }

    #[tokio::test]
    async fn concurrent_adds_are_all_kept() {
        let tmp = TempDir::new().unwrap();
        let store = std::sync::Arc::new(store(&tmp));
        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .add_source(CreateSourceRequest {
                        name: Some(format!("remote {i}")),
                        kind: Some(SourceKind::Remote),
                        url: Some(format!("https://r{i}.example/catalog.json")),
                        enabled: true,
                        ..Default::default()
                    })
                    .await
                    .unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(store.load().await.unwrap().len(), 9);
    }
}
