use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SetupError {
    #[error("setup hook not found: {0}")]
    HookNotFound(PathBuf),

    #[error("setup hook could not be loaded: {0}")]
    HookLoad(String),

    #[error("setup hook failed: {message}")]
    HookFailed {
        exit_code: Option<i32>,
        message: String,
    },

    #[error("setup hook panicked: {0}")]
    Panicked(String),

    #[error("setup hook timed out after {}s", .0.as_secs())]
    TimedOut(Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SetupError {
    pub fn code(&self) -> &'static str {
        match self {
            SetupError::HookNotFound(_) => "SETUP_NOT_FOUND",
            SetupError::HookLoad(_) => "SETUP_LOAD_FAILED",
            SetupError::HookFailed { .. } => "SETUP_FAILED",
            SetupError::Panicked(_) => "SETUP_PANICKED",
            SetupError::TimedOut(_) => "SETUP_TIMEOUT",
            SetupError::Io(_) => "SETUP_IO",
        }
    }
}

#[derive(Debug, Error)]
pub enum HotLoadError {
    #[error("addon '{0}' declares no backend")]
    NoBackend(String),

    #[error("backend entry not found: {0}")]
    EntryMissing(PathBuf),

    #[error("backend mount failed: {0}")]
    Mount(String),
}

impl HotLoadError {
    pub fn code(&self) -> &'static str {
        match self {
            HotLoadError::NoBackend(_) => "NO_BACKEND",
            HotLoadError::EntryMissing(_) => "BACKEND_ENTRY_MISSING",
            HotLoadError::Mount(_) => "MOUNT_FAILED",
        }
    }
}

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("health probe transport error: {0}")]
    Transport(String),

    #[error("health probe timed out")]
    Timeout,
}
