//! Core model for Hearth.
//!
//! Pure building blocks shared by the runtime and store crates: addon
//! manifests and the [`ManifestStore`](manifest::ManifestStore), catalog
//! documents and their normalization, the deterministic catalog
//! [`merge`](merge::merge), and the lifecycle
//! [`resolve`](lifecycle::resolve) function.

pub mod catalog;
pub mod error;
pub mod lifecycle;
pub mod manifest;
pub mod merge;
pub mod types;

pub use catalog::{CATALOG_SCHEMA, CatalogAddonEntry, CatalogDocument};
pub use error::{CatalogError, LoadError, ManifestError};
pub use lifecycle::{HealthSource, HealthTarget, LifecycleFacts, ManifestState};
pub use manifest::{AddonManifest, BackendDecl, FrontendDecl, ManifestStore};
pub use merge::{CatalogDocumentLoader, MergedCatalog, MergedEntry, SourceStatus};
pub use types::{
    AddonStatus, AddonType, BackendState, CatalogSource, HealthCacheEntry, HealthStatus,
    LifecyclePhase, SourceKind,
};
