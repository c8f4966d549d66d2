use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::StoreError;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HearthConfig {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub links: LinksConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub setup: SetupConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Base for relative local catalog paths.
    #[serde(default = "default_core_root")]
    pub core_root: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            core_root: default_core_root(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".hearth")
}

fn default_core_root() -> PathBuf {
    PathBuf::from(".")
}

/// Directories where the host expects symlinks to installed addons.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LinksConfig {
    pub backend_dir: Option<PathBuf>,
    pub frontend_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogConfig {
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: default_refresh_interval(),
            fetch_timeout_secs: default_fetch_timeout(),
        }
    }
}

fn default_refresh_interval() -> u64 {
    6 * 60 * 60
}
fn default_fetch_timeout() -> u64 {
    20
}

#[derive(Debug, Clone, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "default_health_base_url")]
    pub base_url: String,
    #[serde(default = "default_ttl")]
    pub ttl_secs: u64,
    #[serde(default = "default_probe_timeout")]
    pub timeout_ms: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            base_url: default_health_base_url(),
            ttl_secs: default_ttl(),
            timeout_ms: default_probe_timeout(),
        }
    }
}

fn default_health_base_url() -> String {
    "http://127.0.0.1:9001".into()
}
fn default_ttl() -> u64 {
    10
}
fn default_probe_timeout() -> u64 {
    1000
}

#[derive(Debug, Clone, Deserialize)]
pub struct SetupConfig {
    #[serde(default = "default_setup_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_git_timeout")]
    pub git_timeout_secs: u64,
    /// Passed to every setup hook as JSON.
    #[serde(default)]
    pub config: toml::Table,
}

impl Default for SetupConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_setup_timeout(),
            git_timeout_secs: default_git_timeout(),
            config: toml::Table::new(),
        }
    }
}

fn default_setup_timeout() -> u64 {
    300
}
fn default_git_timeout() -> u64 {
    120
}

impl HearthConfig {
    pub fn from_file(path: &Path) -> Result<Self, StoreError> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| StoreError::Config(format!("Failed to parse {}: {e}", path.display())))
    }

    /// Load from the first config file found, or fall back to defaults.
    ///
    /// Lookup order: `explicit`, `$HEARTH_CONFIG`, `./hearth.toml`,
    /// `~/.config/hearth/hearth.toml`.
    pub fn discover(explicit: Option<&Path>) -> Result<Self, StoreError> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        if let Ok(path) = std::env::var("HEARTH_CONFIG") {
            return Self::from_file(Path::new(&path));
        }
        let candidates = [
            Some(PathBuf::from("hearth.toml")),
            dirs::config_dir().map(|d| d.join("hearth").join("hearth.toml")),
        ];
        for path in candidates.into_iter().flatten() {
            if path.is_file() {
                tracing::debug!(path = %path.display(), "Using config file");
                return Self::from_file(&path);
            }
        }
        Ok(Self::default())
    }

    pub fn data_dir(&self) -> &Path {
        &self.paths.data_dir
    }

    pub fn addons_dir(&self) -> PathBuf {
        self.paths.data_dir.join("addons")
    }

    pub fn retained_dir(&self) -> PathBuf {
        self.paths.data_dir.join("retained")
    }

    pub fn catalog_cache_dir(&self) -> PathBuf {
        self.paths.data_dir.join("catalog_cache")
    }

    pub fn sources_file(&self) -> PathBuf {
        self.paths.data_dir.join("catalogs.json")
    }

    pub fn setup_config_json(&self) -> serde_json::Value {
        serde_json::to_value(&self.setup.config).unwrap_or(serde_json::Value::Null)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.catalog.refresh_interval_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.catalog.fetch_timeout_secs)
    }

    pub fn health_ttl(&self) -> Duration {
        Duration::from_secs(self.health.ttl_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.health.timeout_ms)
    }

    pub fn setup_timeout(&self) -> Duration {
        Duration::from_secs(self.setup.timeout_secs)
    }

    pub fn git_timeout(&self) -> Duration {
        Duration::from_secs(self.setup.git_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config: HearthConfig = toml::from_str("").unwrap();
        assert_eq!(config.catalog.refresh_interval_secs, 21600);
        assert_eq!(config.catalog.fetch_timeout_secs, 20);
        assert_eq!(config.health.base_url, "http://127.0.0.1:9001");
        assert_eq!(config.health_ttl(), Duration::from_secs(10));
        assert_eq!(config.probe_timeout(), Duration::from_secs(1));
        assert_eq!(config.setup.timeout_secs, 300);
        assert!(config.links.backend_dir.is_none());
        assert!(config.paths.data_dir.ends_with(".hearth"));
    }

    #[test]
    fn parses_full_config() {
        let toml_str = r#"
[paths]
data_dir = "/var/lib/hearth"
core_root = "/opt/host"

[links]
backend_dir = "/opt/host/addons"

[catalog]
refresh_interval_secs = 60

[health]
base_url = "http://localhost:8080"
ttl_secs = 3

[setup]
timeout_secs = 30

[setup.config]
region = "eu"
"#;
        let config: HearthConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.addons_dir(), PathBuf::from("/var/lib/hearth/addons"));
        assert_eq!(config.sources_file(), PathBuf::from("/var/lib/hearth/catalogs.json"));
        assert_eq!(config.links.backend_dir, Some(PathBuf::from("/opt/host/addons")));
        assert_eq!(config.refresh_interval(), Duration::from_secs(60));
        assert_eq!(config.catalog.fetch_timeout_secs, 20);
        assert_eq!(config.health.ttl_secs, 3);
        assert_eq!(config.setup_config_json(), serde_json::json!({ "region": "eu" }));
    }

    #[test]
    fn from_file_reports_parse_errors() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("hearth.toml");
        std::fs::write(&path, "[catalog\n").unwrap();
        assert!(matches!(
            HearthConfig::from_file(&path),
            Err(StoreError::Config(_))
        ));
    }
}
