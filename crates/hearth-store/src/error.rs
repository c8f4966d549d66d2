use std::path::PathBuf;

use thiserror::Error;

/// Rejected catalog-source input. Raised before anything is written.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct ValidationError(pub String);

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid catalog: {0}")]
    InvalidBody(String),

    #[error("source '{0}' has no url")]
    MissingUrl(String),

    #[error("source id '{0}' cannot name a cache file")]
    InvalidSourceId(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl FetchError {
    /// Code used in `last_error`: the HTTP status, or a symbolic name.
    pub fn code(&self) -> String {
        match self {
            FetchError::Http { status, .. } => status.to_string(),
            FetchError::Transport(_) => "TRANSPORT".into(),
            FetchError::InvalidBody(_) => "INVALID_CATALOG".into(),
            FetchError::MissingUrl(_) => "MISSING_URL".into(),
            FetchError::InvalidSourceId(_) => "INVALID_SOURCE_ID".into(),
            FetchError::Io(_) => "IO".into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum InstallError {
    #[error("invalid addon id: {0}")]
    InvalidId(String),

    #[error("path traversal rejected: {0}")]
    PathTraversal(String),

    #[error("payload fetch failed: {0}")]
    Fetch(String),

    #[error("manifest not found in payload: {0}")]
    ManifestMissing(PathBuf),

    #[error("invalid manifest: {0}")]
    ManifestInvalid(String),

    #[error("manifest id '{found}' does not match requested id '{expected}'")]
    IdMismatch { expected: String, found: String },

    #[error("addon '{0}' is already installed")]
    AlreadyInstalled(String),

    #[error("addon '{0}' is not in the catalog")]
    NotInCatalog(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl InstallError {
    pub fn code(&self) -> &'static str {
        match self {
            InstallError::InvalidId(_) => "INVALID_ID",
            InstallError::PathTraversal(_) => "PATH_TRAVERSAL",
            InstallError::Fetch(_) => "FETCH_FAILED",
            InstallError::ManifestMissing(_) => "MANIFEST_MISSING",
            InstallError::ManifestInvalid(_) => "MANIFEST_INVALID",
            InstallError::IdMismatch { .. } => "ID_MISMATCH",
            InstallError::AlreadyInstalled(_) => "ALREADY_INSTALLED",
            InstallError::NotInCatalog(_) => "NOT_IN_CATALOG",
            InstallError::Io(_) => "IO",
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::NotFound(_) => "NOT_FOUND",
            StoreError::Validation(_) => "VALIDATION",
            StoreError::Config(_) => "CONFIG",
            StoreError::Io(_) => "IO",
            StoreError::Json(_) => "SERIALIZATION",
        }
    }
}
