use std::future::Future;
use std::pin::Pin;

use crate::manifest::BackendDecl;
use crate::types::{AddonStatus, BackendState, HealthCacheEntry, HealthStatus, LifecyclePhase};

/// What a health lookup needs to know about one addon.
#[derive(Debug, Clone)]
pub struct HealthTarget {
    pub addon_id: String,
    pub backend: Option<BackendDecl>,
    pub backend_loaded: bool,
}

/// Health lookup used by the resolver. Never fails; problems become
/// `error` or `unknown` entries.
pub trait HealthSource: Send + Sync {
    fn check<'a>(
        &'a self,
        target: &'a HealthTarget,
    ) -> Pin<Box<dyn Future<Output = HealthCacheEntry> + Send + 'a>>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum ManifestState {
    Absent,
    Invalid(String),
    Valid { backend: Option<BackendDecl> },
}

/// Facts gathered from disk and the loaded set at query time.
#[derive(Debug, Clone)]
pub struct LifecycleFacts {
    pub addon_id: String,
    pub installed: bool,
    pub manifest: ManifestState,
    pub backend_loaded: bool,
    /// Outcome of the last recorded setup run, if any.
    pub setup_success: Option<bool>,
}

/// Derive the lifecycle phase of one addon.
///
/// Only addons that are installed, declare a backend and have it loaded
/// reach the health source. A recorded setup failure forces `error` for
/// any installed addon.
pub async fn resolve(facts: &LifecycleFacts, health: &dyn HealthSource) -> AddonStatus {
    let status = |phase, health, backend| AddonStatus {
        addon_id: facts.addon_id.clone(),
        phase,
        health,
        backend,
        setup_success: facts.setup_success,
    };

    if !facts.installed {
        return status(
            LifecyclePhase::Available,
            HealthCacheEntry::unknown("NOT_INSTALLED", "Addon is not installed"),
            BackendState::None,
        );
    }

    let backend = match &facts.manifest {
        ManifestState::Absent => {
            return status(
                LifecyclePhase::Unknown,
                HealthCacheEntry::unknown("MANIFEST_MISSING", "Installed addon has no manifest"),
                BackendState::None,
            );
        }
        ManifestState::Invalid(msg) => {
            return status(
                LifecyclePhase::Unknown,
                HealthCacheEntry::unknown("MANIFEST_INVALID", msg.clone()),
                BackendState::None,
            );
        }
        ManifestState::Valid { backend } => backend,
    };

    let (mut phase, entry, backend_state) = match backend {
        None => (
            LifecyclePhase::Installed,
            HealthCacheEntry::ok(None),
            BackendState::None,
        ),
        Some(_) if !facts.backend_loaded => (
            LifecyclePhase::Installed,
            HealthCacheEntry::unknown("NOT_LOADED", "Backend router not loaded"),
            BackendState::NotLoaded,
        ),
        Some(decl) => {
            let target = HealthTarget {
                addon_id: facts.addon_id.clone(),
                backend: Some(decl.clone()),
                backend_loaded: true,
            };
            let entry = health.check(&target).await;
            let phase = match entry.status {
                HealthStatus::Ok => LifecyclePhase::Online,
                HealthStatus::Error => LifecyclePhase::Error,
                HealthStatus::Unknown => LifecyclePhase::Installed,
            };
            (phase, entry, BackendState::Loaded)
        }
    };

    if facts.setup_success == Some(false) {
        phase = LifecyclePhase::Error;
    }

    status(phase, entry, backend_state)
}
