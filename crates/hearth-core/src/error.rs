use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("manifest not found: {0}")]
    Missing(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid manifest JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid manifest: {0}")]
    Invalid(String),
}

impl ManifestError {
    pub fn code(&self) -> &'static str {
        match self {
            ManifestError::Missing(_) => "MANIFEST_MISSING",
            ManifestError::Io(_) => "MANIFEST_IO",
            ManifestError::Json(_) => "MANIFEST_PARSE",
            ManifestError::Invalid(_) => "MANIFEST_INVALID",
        }
    }
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid catalog JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported catalog schema: {0}")]
    UnsupportedSchema(String),

    #[error("invalid catalog entry: {0}")]
    InvalidEntry(String),

    #[error("{0}")]
    Unavailable(String),
}

impl CatalogError {
    pub fn code(&self) -> &'static str {
        match self {
            CatalogError::Io(_) => "CATALOG_IO",
            CatalogError::Json(_) => "CATALOG_PARSE",
            CatalogError::UnsupportedSchema(_) => "CATALOG_SCHEMA",
            CatalogError::InvalidEntry(_) => "CATALOG_ENTRY",
            CatalogError::Unavailable(_) => "CATALOG_UNAVAILABLE",
        }
    }
}

/// A manifest that was skipped during a scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadError {
    pub addon_path: PathBuf,
    pub message: String,
}
