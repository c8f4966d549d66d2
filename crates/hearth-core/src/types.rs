use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Maximum length of an addon id in bytes.
pub const MAX_ADDON_ID_LEN: usize = 128;

static ADDON_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").expect("addon id pattern")
});

/// Check that `id` can be used both as a merge key and as a directory name.
pub fn validate_addon_id(id: &str) -> Result<(), String> {
    if id.is_empty() {
        return Err("addon id must not be empty".into());
    }
    if id.len() > MAX_ADDON_ID_LEN {
        return Err(format!("addon id exceeds {MAX_ADDON_ID_LEN} bytes"));
    }
    if !ADDON_ID_RE.is_match(id) {
        return Err(format!(
            "addon id '{id}' must match [A-Za-z0-9][A-Za-z0-9._-]*"
        ));
    }
    Ok(())
}

/// Normalize a relative path taken from a manifest or catalog entry.
///
/// Backslashes count as separators. Empty input and `.` both become `.`.
/// Absolute paths, drive prefixes, remote-looking values and any `..`
/// component are rejected.
pub fn normalize_relative_path(raw: &str) -> Result<String, String> {
    let unified = raw.trim().replace('\\', "/");
    if unified.contains("://") {
        return Err(format!("path '{raw}' must be a local relative path"));
    }
    if unified.starts_with('/') {
        return Err(format!("path '{raw}' must be relative"));
    }
    let bytes = unified.as_bytes();
    if bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic() {
        return Err(format!("path '{raw}' must be relative"));
    }

    let mut parts = Vec::new();
    for part in unified.split('/') {
        match part {
            "" | "." => continue,
            ".." => return Err(format!("path '{raw}' must not contain '..'")),
            other => parts.push(other),
        }
    }

    if parts.is_empty() {
        Ok(".".into())
    } else {
        Ok(parts.join("/"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddonType {
    Llm,
    Voice,
    Knowledge,
    Action,
    Ui,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Local,
    Remote,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceKind::Local => write!(f, "local"),
            SourceKind::Remote => write!(f, "remote"),
        }
    }
}

/// A configured catalog source.
///
/// Only the sources store mutates these records; merging treats them as
/// read-only input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogSource {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: SourceKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub trusted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub last_loaded_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_error: Option<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Unknown,
    Ok,
    Error,
}

/// Last known health of one addon backend.
///
/// `last_checked` is `None` for synthesized entries that never involved a
/// probe (not installed, no backend, backend not loaded).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCacheEntry {
    pub status: HealthStatus,
    pub last_checked: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl HealthCacheEntry {
    pub fn ok(checked: Option<DateTime<Utc>>) -> Self {
        Self {
            status: HealthStatus::Ok,
            last_checked: checked,
            error_code: None,
            error_message: None,
        }
    }

    pub fn unknown(code: &str, message: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Unknown,
            last_checked: None,
            error_code: Some(code.into()),
            error_message: Some(message.into()),
        }
    }

    pub fn error(
        checked: DateTime<Utc>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            status: HealthStatus::Error,
            last_checked: Some(checked),
            error_code: Some(code.into()),
            error_message: Some(message.into()),
        }
    }
}

/// Derived lifecycle phase. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecyclePhase {
    Available,
    Installed,
    Online,
    Error,
    Unknown,
}

impl std::fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LifecyclePhase::Available => "available",
            LifecyclePhase::Installed => "installed",
            LifecyclePhase::Online => "online",
            LifecyclePhase::Error => "error",
            LifecyclePhase::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendState {
    /// The addon declares no backend.
    None,
    NotLoaded,
    Loaded,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddonStatus {
    pub addon_id: String,
    pub phase: LifecyclePhase,
    pub health: HealthCacheEntry,
    pub backend: BackendState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setup_success: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_ids() {
        assert!(validate_addon_id("weather-widget").is_ok());
        assert!(validate_addon_id("hello_action.v2").is_ok());
        assert!(validate_addon_id("A1").is_ok());
    }

    #[test]
    fn rejects_unsafe_ids() {
        assert!(validate_addon_id("").is_err());
        assert!(validate_addon_id("..").is_err());
        assert!(validate_addon_id(".hidden").is_err());
        assert!(validate_addon_id("a/b").is_err());
        assert!(validate_addon_id("a\\b").is_err());
        assert!(validate_addon_id(&"x".repeat(MAX_ADDON_ID_LEN + 1)).is_err());
    }

    #[test]
    fn normalizes_relative_paths() {
        assert_eq!(normalize_relative_path("").unwrap(), ".");
        assert_eq!(normalize_relative_path("./").unwrap(), ".");
        assert_eq!(normalize_relative_path("addons\\weather").unwrap(), "addons/weather");
        assert_eq!(normalize_relative_path("./a//b/").unwrap(), "a/b");
    }

    #[test]
    fn rejects_escaping_paths() {
        assert!(normalize_relative_path("../x").is_err());
        assert!(normalize_relative_path("a\\..\\b").is_err());
        assert!(normalize_relative_path("/etc").is_err());
        assert!(normalize_relative_path("C:\\addons").is_err());
        assert!(normalize_relative_path("https://example.com/a").is_err());
    }

    #[test]
    fn source_serializes_kind_as_type() {
        let now = Utc::now();
        let source = CatalogSource {
            id: "dev".into(),
            name: "Dev".into(),
            kind: SourceKind::Local,
            url: None,
            path: Some("catalogs/dev.json".into()),
            enabled: true,
            trusted: true,
            created_at: now,
            updated_at: now,
            last_loaded_at: None,
            last_error: None,
        };
        let json = serde_json::to_value(&source).unwrap();
        assert_eq!(json["type"], "local");
        assert!(json.get("url").is_none());
    }
}
