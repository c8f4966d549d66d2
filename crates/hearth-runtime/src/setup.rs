use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use hearth_core::AddonManifest;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::SetupError;
use crate::hook::{HookLoader, HookReturn, SetupContext};

pub const NO_REQUIREMENTS_DIR: &str = "no-requirements-dir";
pub const NO_REQUIREMENTS_FILES: &str = "no-requirements-files";

const CACHED_MESSAGE: &str = "setup skipped (cached)";

/// Hash the `*.txt` files of a requirements directory.
///
/// Files are fed in name order as `name \n content \n`. A missing
/// directory or one without `.txt` files yields a fixed sentinel instead.
pub fn requirements_hash(requirements_dir: &Path) -> std::io::Result<String> {
    if !requirements_dir.is_dir() {
        return Ok(NO_REQUIREMENTS_DIR.into());
    }

    let mut files: Vec<PathBuf> = Vec::new();
    for entry in std::fs::read_dir(requirements_dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|e| e == "txt") {
            files.push(path);
        }
    }
    if files.is_empty() {
        return Ok(NO_REQUIREMENTS_FILES.into());
    }
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

    let mut hasher = Sha256::new();
    for path in &files {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        hasher.update(name.as_bytes());
        hasher.update(b"\n");
        hasher.update(std::fs::read(path)?);
        hasher.update(b"\n");
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Persisted record of the last real setup run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetupStamp {
    pub success: bool,
    pub requirements_hash: String,
    pub checked_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub fn stamp_path(addon_dir: &Path) -> PathBuf {
    addon_dir.join("runtime").join("meta").join("setup.stamp")
}

/// Read the stamp of an addon. Missing or corrupt stamps read as `None`.
pub fn read_stamp(addon_dir: &Path) -> Option<SetupStamp> {
    let path = stamp_path(addon_dir);
    let content = std::fs::read_to_string(&path).ok()?;
    match serde_json::from_str(&content) {
        Ok(stamp) => Some(stamp),
        Err(e) => {
            tracing::debug!(path = %path.display(), "Ignoring unreadable setup stamp: {e}");
            None
        }
    }
}

/// Write the stamp via a temp file and rename.
pub fn write_stamp(addon_dir: &Path, stamp: &SetupStamp) -> std::io::Result<()> {
    let path = stamp_path(addon_dir);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("stamp.tmp");
    std::fs::write(&tmp, serde_json::to_vec_pretty(stamp)?)?;
    std::fs::rename(&tmp, &path)?;
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetupOutcome {
    pub success: bool,
    /// True when the hook was skipped because a matching success stamp exists.
    pub cached: bool,
    pub requirements_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Runs addon setup hooks at most once per requirements change.
pub struct SetupRunner {
    loader: Arc<dyn HookLoader>,
    timeout: Duration,
}

impl SetupRunner {
    pub fn new(loader: Arc<dyn HookLoader>, timeout: Duration) -> Self {
        Self { loader, timeout }
    }

    /// Run the setup hook of an addon if one is declared.
    ///
    /// Returns `None` when the manifest declares no setup hook. Every failure
    /// of the hook (load error, non-zero exit, panic, timeout, explicit
    /// `success: false`) becomes a failed outcome; nothing propagates.
    pub async fn run(
        &self,
        manifest: &AddonManifest,
        addon_dir: &Path,
        config: &serde_json::Value,
        force: bool,
    ) -> Option<SetupOutcome> {
        let backend = manifest.backend.as_ref()?;
        let entry = backend.setup.as_ref()?;
        let addon_id = manifest.id.as_str();

        // The hook never runs here, so the stamp keeps describing the last
        // real run.
        let hash = match requirements_hash(&addon_dir.join(&backend.requirements_dir)) {
            Ok(hash) => hash,
            Err(e) => {
                tracing::error!(addon_id, error = %e, "Failed to hash requirements");
                return Some(SetupOutcome {
                    success: false,
                    cached: false,
                    requirements_hash: String::new(),
                    message: None,
                    error: Some(format!("Failed to hash requirements: {e}")),
                });
            }
        };

        if !force
            && let Some(stamp) = read_stamp(addon_dir)
            && stamp.success
            && stamp.requirements_hash == hash
        {
            tracing::debug!(addon_id, "Setup cache hit");
            return Some(SetupOutcome {
                success: true,
                cached: true,
                requirements_hash: hash,
                message: Some(CACHED_MESSAGE.into()),
                error: None,
            });
        }

        tracing::info!(addon_id, entry = %entry, force, "Running setup hook");
        let ctx = SetupContext {
            addon_id: addon_id.to_string(),
            addon_dir: addon_dir.to_path_buf(),
            config: config.clone(),
        };
        let result = self.invoke(addon_dir, entry, &ctx).await;

        let outcome = match result {
            Ok(HookReturn::Report {
                success: Some(false),
                message,
            }) => SetupOutcome {
                success: false,
                cached: false,
                requirements_hash: hash,
                message: None,
                error: Some(message.unwrap_or_else(|| "setup reported failure".into())),
            },
            Ok(HookReturn::Report { message, .. }) => SetupOutcome {
                success: true,
                cached: false,
                requirements_hash: hash,
                message: message.or_else(|| Some("setup completed".into())),
                error: None,
            },
            Ok(HookReturn::Nothing) => SetupOutcome {
                success: true,
                cached: false,
                requirements_hash: hash,
                message: Some("setup completed".into()),
                error: None,
            },
            Ok(HookReturn::Unrecognized(value)) => {
                tracing::debug!(addon_id, returned = %value, "Setup hook returned an unrecognized value");
                SetupOutcome {
                    success: true,
                    cached: false,
                    requirements_hash: hash,
                    message: Some("setup completed".into()),
                    error: None,
                }
            }
            Err(e) => SetupOutcome {
                success: false,
                cached: false,
                requirements_hash: hash,
                message: None,
                error: Some(e.to_string()),
            },
        };

        self.record(addon_id, addon_dir, &outcome);
        Some(outcome)
    }

    async fn invoke(
        &self,
        addon_dir: &Path,
        entry: &str,
        ctx: &SetupContext,
    ) -> Result<HookReturn, SetupError> {
        let hook = self.loader.load(addon_dir, entry)?;
        let guarded = AssertUnwindSafe(hook.run(ctx)).catch_unwind();
        match tokio::time::timeout(self.timeout, guarded).await {
            Err(_) => Err(SetupError::TimedOut(self.timeout)),
            Ok(Err(panic)) => Err(SetupError::Panicked(panic_message(panic.as_ref()))),
            Ok(Ok(result)) => result,
        }
    }

    fn record(&self, addon_id: &str, addon_dir: &Path, outcome: &SetupOutcome) {
        if outcome.success {
            tracing::info!(addon_id, "Setup succeeded");
        } else {
            tracing::error!(
                addon_id,
                error = outcome.error.as_deref().unwrap_or_default(),
                "Setup failed"
            );
        }

        let stamp = SetupStamp {
            success: outcome.success,
            requirements_hash: outcome.requirements_hash.clone(),
            checked_at: Utc::now(),
            message: outcome.message.clone(),
            error: outcome.error.clone(),
        };
        if let Err(e) = write_stamp(addon_dir, &stamp) {
            tracing::warn!(addon_id, "Failed to write setup stamp: {e}");
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".into()
    }
}
