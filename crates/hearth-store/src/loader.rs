use std::path::PathBuf;

use hearth_core::{CatalogDocument, CatalogDocumentLoader, CatalogError, CatalogSource, SourceKind};

use crate::fetch::CatalogCache;

/// Reads catalog documents from disk: local files for local sources and
/// the fetcher's cache for remote ones.
pub struct FsCatalogLoader {
    core_root: PathBuf,
    cache: CatalogCache,
}

impl FsCatalogLoader {
    pub fn new(core_root: PathBuf, cache: CatalogCache) -> Self {
        Self { core_root, cache }
    }
}

impl CatalogDocumentLoader for FsCatalogLoader {
    fn load(&self, source: &CatalogSource) -> Result<CatalogDocument, CatalogError> {
        let path = match source.kind {
            SourceKind::Local => {
                let rel = source
                    .path
                    .as_deref()
                    .ok_or_else(|| CatalogError::Unavailable("Local source has no path".into()))?;
                let path = self.core_root.join(rel);
                if !path.is_file() {
                    return Err(CatalogError::Unavailable(format!(
                        "Catalog file not found: {}",
                        path.display()
                    )));
                }
                path
            }
            SourceKind::Remote => {
                let path = self
                    .cache
                    .body_path(&source.id)
                    .map_err(|e| CatalogError::Unavailable(e.to_string()))?;
                if !path.is_file() {
                    let reason = source
                        .last_error
                        .clone()
                        .unwrap_or_else(|| "No cached catalog yet".into());
                    return Err(CatalogError::Unavailable(reason));
                }
                path
            }
        };

        let bytes = std::fs::read(&path)?;
        CatalogDocument::parse(&bytes)
    }
}
