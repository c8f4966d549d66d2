//! Persistent side of Hearth.
//!
//! Configuration, the catalog-sources file, remote catalog fetching and its
//! refresh loop, the install pipeline, and [`AddonService`], the facade the
//! `hearth` binary drives.

pub mod config;
pub mod error;
pub mod fetch;
pub mod install;
pub mod loader;
pub mod payload;
pub mod refresh;
pub mod service;
pub mod sources;

pub use config::HearthConfig;
pub use error::{FetchError, InstallError, StoreError, ValidationError};
pub use fetch::{CatalogCache, CatalogFetcher, FetchReport};
pub use install::{InstallPipeline, InstallRequest, InstallResult, InstallStatus};
pub use payload::{GitFetcher, PayloadFetcher};
pub use refresh::{CatalogRefreshScheduler, RefreshTask};
pub use service::{AddonService, ServiceSeams, StoreEntry, StoreView};
pub use sources::{CatalogSourcesStore, CreateSourceRequest, UpdateSourceRequest};
