//! The addon-code boundary for setup hooks.
//!
//! A [`HookLoader`] turns the `backend.setup` path of a manifest into a
//! [`SetupHook`]. The default [`ProcessHookLoader`] runs the hook as a
//! subprocess inside the addon directory:
//!
//! - `.py` scripts run under `python3`, `.sh` scripts under `sh`, anything
//!   else is executed directly.
//! - `HEARTH_ADDON_ID`, `HEARTH_ADDON_DIR` and `HEARTH_ADDON_CONFIG` (JSON)
//!   describe the invocation.
//! - Exit status 0 is success. If the last non-empty stdout line is a JSON
//!   value it becomes the hook's return value, so a script can print
//!   `{"success": false, "message": "..."}` to report a soft failure.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;

use tokio::process::Command;

use crate::error::SetupError;

/// Arguments passed to every setup hook.
#[derive(Debug, Clone)]
pub struct SetupContext {
    pub addon_id: String,
    pub addon_dir: PathBuf,
    pub config: serde_json::Value,
}

/// What a hook handed back.
#[derive(Debug, Clone, PartialEq)]
pub enum HookReturn {
    Nothing,
    Report {
        success: Option<bool>,
        message: Option<String>,
    },
    Unrecognized(serde_json::Value),
}

impl HookReturn {
    pub fn from_value(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => HookReturn::Nothing,
            serde_json::Value::Object(ref map)
                if map.contains_key("success") || map.contains_key("message") =>
            {
                HookReturn::Report {
                    success: map.get("success").and_then(|v| v.as_bool()),
                    message: map
                        .get("message")
                        .and_then(|v| v.as_str())
                        .map(String::from),
                }
            }
            other => HookReturn::Unrecognized(other),
        }
    }
}

pub trait SetupHook: Send + Sync {
    fn run<'a>(
        &'a self,
        ctx: &'a SetupContext,
    ) -> Pin<Box<dyn Future<Output = Result<HookReturn, SetupError>> + Send + 'a>>;
}

pub trait HookLoader: Send + Sync {
    /// Resolve `entry` (relative to `addon_dir`) into a runnable hook.
    fn load(&self, addon_dir: &Path, entry: &str) -> Result<Box<dyn SetupHook>, SetupError>;
}

/// Resolve a hook path and make sure it stays inside the addon directory.
pub fn resolve_hook_path(addon_dir: &Path, entry: &str) -> Result<PathBuf, SetupError> {
    let relative = hearth_core::types::normalize_relative_path(entry).map_err(SetupError::HookLoad)?;
    let path = addon_dir.join(&relative);
    if !path.is_file() {
        return Err(SetupError::HookNotFound(path));
    }
    let root = addon_dir.canonicalize()?;
    let resolved = path.canonicalize()?;
    if !resolved.starts_with(&root) {
        return Err(SetupError::HookLoad(format!(
            "{} resolves outside the addon directory",
            path.display()
        )));
    }
    Ok(resolved)
}

#[derive(Debug, Default, Clone)]
pub struct ProcessHookLoader;

impl HookLoader for ProcessHookLoader {
    fn load(&self, addon_dir: &Path, entry: &str) -> Result<Box<dyn SetupHook>, SetupError> {
        let script = resolve_hook_path(addon_dir, entry)?;
        Ok(Box::new(ProcessSetupHook { script }))
    }
}

pub struct ProcessSetupHook {
    script: PathBuf,
}

impl ProcessSetupHook {
    fn command(&self) -> Command {
        let ext = self.script.extension().and_then(|e| e.to_str());
        match ext {
            Some("py") => {
                let mut cmd = Command::new("python3");
                cmd.arg(&self.script);
                cmd
            }
            Some("sh") => {
                let mut cmd = Command::new("sh");
                cmd.arg(&self.script);
                cmd
            }
            _ => Command::new(&self.script),
        }
    }
}

impl SetupHook for ProcessSetupHook {
    fn run<'a>(
        &'a self,
        ctx: &'a SetupContext,
    ) -> Pin<Box<dyn Future<Output = Result<HookReturn, SetupError>> + Send + 'a>> {
        Box::pin(async move {
            let output = self
                .command()
                .current_dir(&ctx.addon_dir)
                .env("HEARTH_ADDON_ID", &ctx.addon_id)
                .env("HEARTH_ADDON_DIR", &ctx.addon_dir)
                .env("HEARTH_ADDON_CONFIG", ctx.config.to_string())
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .output()
                .await
                .map_err(|e| SetupError::HookLoad(format!("{}: {e}", self.script.display())))?;

            let stdout = String::from_utf8_lossy(&output.stdout);
            let stderr = String::from_utf8_lossy(&output.stderr);

            if !output.status.success() {
                let message = [stderr.trim(), stdout.trim()]
                    .into_iter()
                    .find(|s| !s.is_empty())
                    .map(String::from)
                    .unwrap_or_else(|| format!("exit status {}", output.status));
                return Err(SetupError::HookFailed {
                    exit_code: output.status.code(),
                    message,
                });
            }

            let last_line = stdout.lines().rev().find(|l| !l.trim().is_empty());
            Ok(match last_line.map(|l| serde_json::from_str::<serde_json::Value>(l.trim())) {
                Some(Ok(value)) => HookReturn::from_value(value),
                _ => HookReturn::Nothing,
            })
        })
    }
}
