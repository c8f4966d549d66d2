use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::CatalogError;
use crate::manifest::FrontendDecl;
use crate::types::{AddonType, normalize_relative_path, validate_addon_id};

pub const CATALOG_SCHEMA: &str = "hearth.addons.catalog.v1";

const DEFAULT_REF: &str = "main";
const ALLOWED_REPO_SCHEMES: &[&str] = &["http", "https", "file", "ssh", "git"];

/// A catalog document as published by one source.
///
/// Entries stay as raw JSON until [`CatalogDocument::entries`] normalizes
/// them, so one malformed entry never invalidates its siblings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogDocument {
    pub schema: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(default)]
    pub addons: Vec<serde_json::Value>,
}

impl CatalogDocument {
    /// Parse a document and check its schema tag.
    pub fn parse(bytes: &[u8]) -> Result<Self, CatalogError> {
        let doc: CatalogDocument = serde_json::from_slice(bytes)?;
        if doc.schema != CATALOG_SCHEMA {
            return Err(CatalogError::UnsupportedSchema(doc.schema));
        }
        Ok(doc)
    }

    /// `generated_at` as a timestamp. Absent or unparsable values are `None`.
    pub fn generated_at_ts(&self) -> Option<DateTime<Utc>> {
        self.generated_at
            .as_deref()
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }

    /// Normalize every entry, keeping per-entry failures separate.
    pub fn entries(&self) -> Vec<Result<CatalogAddonEntry, CatalogError>> {
        self.addons
            .iter()
            .map(CatalogAddonEntry::from_value)
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct RawCatalogEntry {
    id: String,
    name: String,
    #[serde(default)]
    description: Option<String>,
    repo: String,
    #[serde(default, rename = "ref")]
    git_ref: Option<String>,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    types: Vec<AddonType>,
    min_core_version: String,
    #[serde(default)]
    max_core_version: Option<String>,
    #[serde(default)]
    frontend: Option<FrontendDecl>,
}

/// A normalized catalog entry: defaults applied, paths checked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogAddonEntry {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub repo: Url,
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub path: String,
    pub types: Vec<AddonType>,
    pub min_core_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_core_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frontend: Option<FrontendDecl>,
}

impl CatalogAddonEntry {
    pub fn from_value(value: &serde_json::Value) -> Result<Self, CatalogError> {
        let raw: RawCatalogEntry = serde_json::from_value(value.clone())
            .map_err(|e| CatalogError::InvalidEntry(e.to_string()))?;

        validate_addon_id(&raw.id).map_err(CatalogError::InvalidEntry)?;
        let invalid = |msg: String| CatalogError::InvalidEntry(format!("{}: {msg}", raw.id));

        if raw.name.trim().is_empty() {
            return Err(invalid("name must not be empty".into()));
        }

        let repo = Url::parse(raw.repo.trim()).map_err(|e| invalid(format!("repo: {e}")))?;
        if !ALLOWED_REPO_SCHEMES.contains(&repo.scheme()) {
            return Err(invalid(format!("unsupported repo scheme '{}'", repo.scheme())));
        }

        let git_ref = match raw.git_ref.as_deref().map(str::trim) {
            None | Some("") => DEFAULT_REF.to_string(),
            Some(r) if r.starts_with('-') => {
                return Err(invalid(format!("ref '{r}' is not a valid git ref")));
            }
            Some(r) => r.to_string(),
        };

        let path = normalize_relative_path(raw.path.as_deref().unwrap_or("."))
            .map_err(invalid)?;

        if raw.min_core_version.trim().is_empty() {
            return Err(invalid("min_core_version must not be empty".into()));
        }

        Ok(Self {
            id: raw.id,
            name: raw.name,
            description: raw.description,
            repo,
            git_ref,
            path,
            types: raw.types,
            min_core_version: raw.min_core_version,
            max_core_version: raw.max_core_version,
            frontend: raw.frontend,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(extra: serde_json::Value) -> serde_json::Value {
        let mut base = serde_json::json!({
            "id": "weather-widget",
            "name": "Weather Widget",
            "repo": "https://github.com/example/weather",
            "types": ["ui"],
            "min_core_version": "0.1.0",
        });
        if let (Some(base), Some(extra)) = (base.as_object_mut(), extra.as_object()) {
            for (k, v) in extra {
                base.insert(k.clone(), v.clone());
            }
        }
        base
    }

    #[test]
    fn applies_ref_and_path_defaults() {
        let e = CatalogAddonEntry::from_value(&entry(serde_json::json!({}))).unwrap();
        assert_eq!(e.git_ref, "main");
        assert_eq!(e.path, ".");
    }

    #[test]
    fn normalizes_backslash_paths() {
        let e = CatalogAddonEntry::from_value(&entry(serde_json::json!({
            "path": "addons\\weather",
            "ref": "v1.2.0",
        })))
        .unwrap();
        assert_eq!(e.path, "addons/weather");
        assert_eq!(e.git_ref, "v1.2.0");
    }

    #[test]
    fn rejects_traversal_and_remote_paths() {
        for bad in ["..\\evil", "a/../../b", "/abs", "https://x.test/y"] {
            let result = CatalogAddonEntry::from_value(&entry(serde_json::json!({ "path": bad })));
            assert!(
                matches!(result, Err(CatalogError::InvalidEntry(_))),
                "path {bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn rejects_bad_repo_and_ref() {
        assert!(CatalogAddonEntry::from_value(&entry(serde_json::json!({ "repo": "not a url" }))).is_err());
        assert!(CatalogAddonEntry::from_value(&entry(serde_json::json!({ "repo": "javascript:alert(1)" }))).is_err());
        assert!(CatalogAddonEntry::from_value(&entry(serde_json::json!({ "ref": "--upload-pack=x" }))).is_err());
    }

    #[test]
    fn parse_checks_schema() {
        let ok = serde_json::json!({ "schema": CATALOG_SCHEMA, "addons": [] });
        assert!(CatalogDocument::parse(ok.to_string().as_bytes()).is_ok());

        let bad = serde_json::json!({ "schema": "other.v9", "addons": [] });
        assert!(matches!(
            CatalogDocument::parse(bad.to_string().as_bytes()),
            Err(CatalogError::UnsupportedSchema(_))
        ));
    }

    #[test]
    fn unparsable_generated_at_is_none() {
        let mut doc: CatalogDocument = serde_json::from_value(serde_json::json!({
            "schema": CATALOG_SCHEMA,
            "generated_at": "yesterday",
        }))
        .unwrap();
        assert!(doc.generated_at_ts().is_none());

        doc.generated_at = Some("2026-03-01T12:00:00Z".into());
        assert!(doc.generated_at_ts().is_some());
    }

    #[test]
    fn bad_entry_does_not_affect_siblings() {
        let doc = CatalogDocument {
            schema: CATALOG_SCHEMA.into(),
            generated_at: None,
            catalog_id: None,
            catalog_name: None,
            signature: None,
            addons: vec![entry(serde_json::json!({})), serde_json::json!({ "id": "broken" })],
        };
        let entries = doc.entries();
        assert!(entries[0].is_ok());
        assert!(entries[1].is_err());
    }
}
