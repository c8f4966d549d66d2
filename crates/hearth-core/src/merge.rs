//! Catalog merge: one winning entry per addon id across all sources.
//!
//! Candidates for the same id are ranked by a strict total order:
//! trusted sources first, then the newer `generated_at`, then the smaller
//! source id. The result depends only on the inputs, never on their order.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::{CatalogAddonEntry, CatalogDocument};
use crate::error::CatalogError;
use crate::types::{CatalogSource, SourceKind};

/// Supplies the document for a source.
///
/// Local sources read their file; remote sources read the cached payload
/// written by the fetcher. Loaders never touch the network.
pub trait CatalogDocumentLoader: Send + Sync {
    fn load(&self, source: &CatalogSource) -> Result<CatalogDocument, CatalogError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceStatus {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: SourceKind,
    pub enabled: bool,
    pub trusted: bool,
    pub addons_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rejected: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedEntry {
    pub source_id: String,
    pub trusted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_at: Option<DateTime<Utc>>,
    pub entry: CatalogAddonEntry,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergedCatalog {
    /// One status per source, ordered by source id.
    pub sources: Vec<SourceStatus>,
    pub winners: BTreeMap<String, MergedEntry>,
}

/// Precedence between two candidates for the same id. `Less` wins.
pub fn precedence(a: &MergedEntry, b: &MergedEntry) -> Ordering {
    b.trusted
        .cmp(&a.trusted)
        .then_with(|| b.generated_at.cmp(&a.generated_at))
        .then_with(|| a.source_id.cmp(&b.source_id))
}

pub fn merge(sources: &[CatalogSource], loader: &dyn CatalogDocumentLoader) -> MergedCatalog {
    let mut statuses = Vec::with_capacity(sources.len());
    let mut candidates: BTreeMap<String, Vec<MergedEntry>> = BTreeMap::new();

    for source in sources {
        let mut status = SourceStatus {
            id: source.id.clone(),
            name: source.name.clone(),
            kind: source.kind,
            enabled: source.enabled,
            trusted: source.trusted,
            addons_count: 0,
            generated_at: None,
            error: None,
            rejected: Vec::new(),
        };

        if !source.enabled {
            statuses.push(status);
            continue;
        }

        let doc = match loader.load(source) {
            Ok(doc) => doc,
            Err(e) => {
                tracing::warn!(source = %source.id, "Catalog source unavailable: {e}");
                status.error = Some(e.to_string());
                statuses.push(status);
                continue;
            }
        };

        // A cached remote catalog is served stale alongside its last error.
        status.error = source.last_error.clone();
        status.generated_at = doc.generated_at.clone();
        let generated_at = doc.generated_at_ts();

        let mut seen = BTreeSet::new();
        for result in doc.entries() {
            let entry = match result {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::debug!(source = %source.id, "Dropping catalog entry: {e}");
                    status.rejected.push(e.to_string());
                    continue;
                }
            };
            if !seen.insert(entry.id.clone()) {
                status
                    .rejected
                    .push(format!("duplicate entry '{}' ignored", entry.id));
                continue;
            }
            status.addons_count += 1;
            candidates.entry(entry.id.clone()).or_default().push(MergedEntry {
                source_id: source.id.clone(),
                trusted: source.trusted,
                generated_at,
                entry,
            });
        }

        statuses.push(status);
    }

    statuses.sort_by(|a, b| a.id.cmp(&b.id));

    let winners = candidates
        .into_iter()
        .filter_map(|(id, entries)| entries.into_iter().min_by(precedence).map(|w| (id, w)))
        .collect();

    MergedCatalog {
        sources: statuses,
        winners,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CATALOG_SCHEMA;
    use std::collections::HashMap;

    struct MapLoader(HashMap<String, Result<CatalogDocument, String>>);

    impl CatalogDocumentLoader for MapLoader {
        fn load(&self, source: &CatalogSource) -> Result<CatalogDocument, CatalogError> {
            match self.0.get(&source.id) {
                Some(Ok(doc)) => Ok(doc.clone()),
                Some(Err(msg)) => Err(CatalogError::Unavailable(msg.clone())),
                None => Err(CatalogError::Unavailable("no cached catalog yet".into())),
            }
        }
    }

    fn source(id: &str, trusted: bool) -> CatalogSource {
        let now = Utc::now();
        CatalogSource {
            id: id.into(),
            name: id.into(),
            kind: SourceKind::Remote,
            url: Some(format!("https://{id}.test/catalog.json")),
            path: None,
            enabled: true,
            trusted,
            created_at: now,
            updated_at: now,
            last_loaded_at: None,
            last_error: None,
        }
    }

    fn doc(generated_at: Option<&str>, entries: &[(&str, &str)]) -> CatalogDocument {
        CatalogDocument {
            schema: CATALOG_SCHEMA.into(),
            generated_at: generated_at.map(String::from),
            catalog_id: None,
            catalog_name: None,
            signature: None,
            addons: entries
                .iter()
                .map(|(id, version)| {
                    serde_json::json!({
                        "id": id,
                        "name": format!("{id} {version}"),
                        "repo": format!("https://git.test/{id}"),
                        "ref": version,
                        "types": ["ui"],
                        "min_core_version": "0.1.0",
                    })
                })
                .collect(),
        }
    }

    fn loader(docs: Vec<(&str, CatalogDocument)>) -> MapLoader {
        MapLoader(
            docs.into_iter()
                .map(|(id, d)| (id.to_string(), Ok(d)))
                .collect(),
        )
    }

    #[test]
    fn trusted_source_beats_newer_untrusted() {
        let sources = vec![source("official", true), source("community", false)];
        let loader = loader(vec![
            ("official", doc(Some("2026-01-01T00:00:00Z"), &[("weather-widget", "v1")])),
            ("community", doc(Some("2026-06-01T00:00:00Z"), &[("weather-widget", "v2")])),
        ]);

        let merged = merge(&sources, &loader);
        let winner = &merged.winners["weather-widget"];
        assert_eq!(winner.source_id, "official");
        assert_eq!(winner.entry.git_ref, "v1");
    }

    #[test]
    fn newer_catalog_wins_between_equally_trusted() {
        let sources = vec![source("a", false), source("b", false)];
        let loader = loader(vec![
            ("a", doc(Some("2026-01-01T00:00:00Z"), &[("x", "old")])),
            ("b", doc(Some("2026-02-01T00:00:00Z"), &[("x", "new")])),
        ]);
        assert_eq!(merge(&sources, &loader).winners["x"].source_id, "b");
    }

    #[test]
    fn missing_timestamp_sorts_oldest() {
        let sources = vec![source("a", false), source("b", false)];
        let loader = loader(vec![
            ("a", doc(None, &[("x", "undated")])),
            ("b", doc(Some("2020-01-01T00:00:00Z"), &[("x", "dated")])),
        ]);
        assert_eq!(merge(&sources, &loader).winners["x"].source_id, "b");
    }

    #[test]
    fn tie_breaks_on_source_id_regardless_of_order() {
        let stamp = Some("2026-01-01T00:00:00Z");
        let ids = ["zeta", "alpha", "mid"];
        let docs = || {
            ids.iter()
                .map(|id| (*id, doc(stamp, &[("x", *id)])))
                .collect::<Vec<_>>()
        };

        let permutations = [[0, 1, 2], [2, 1, 0], [1, 2, 0], [1, 0, 2]];
        let mut results = Vec::new();
        for perm in permutations {
            let sources: Vec<_> = perm.iter().map(|&i| source(ids[i], true)).collect();
            results.push(merge(&sources, &loader(docs())));
        }

        for merged in &results {
            assert_eq!(merged.winners["x"].source_id, "alpha");
            assert_eq!(merged, &results[0]);
        }
    }

    #[test]
    fn failed_source_is_reported_and_contributes_nothing() {
        let sources = vec![source("good", false), source("down", true)];
        let mut map = HashMap::new();
        map.insert("good".to_string(), Ok(doc(None, &[("x", "v1")])));
        map.insert("down".to_string(), Err("Fetch failed (500): boom".to_string()));

        let merged = merge(&sources, &MapLoader(map));
        assert_eq!(merged.winners["x"].source_id, "good");
        let down = merged.sources.iter().find(|s| s.id == "down").unwrap();
        assert_eq!(down.error.as_deref(), Some("Fetch failed (500): boom"));
        assert_eq!(down.addons_count, 0);
    }

    #[test]
    fn stale_cache_carries_last_error() {
        let mut remote = source("remote", false);
        remote.last_error = Some("Fetch failed (503): unavailable".into());
        let merged = merge(&[remote], &loader(vec![("remote", doc(None, &[("x", "v1")]))]));
        assert!(merged.winners.contains_key("x"));
        assert_eq!(
            merged.sources[0].error.as_deref(),
            Some("Fetch failed (503): unavailable")
        );
    }

    #[test]
    fn invalid_and_duplicate_entries_are_dropped_individually() {
        let mut d = doc(None, &[("x", "first"), ("x", "second"), ("y", "v1")]);
        d.addons.push(serde_json::json!({ "id": "z", "path": "../../etc" }));
        let merged = merge(&[source("s", false)], &loader(vec![("s", d)]));

        assert_eq!(merged.winners["x"].entry.git_ref, "first");
        assert!(merged.winners.contains_key("y"));
        assert!(!merged.winners.contains_key("z"));
        assert_eq!(merged.sources[0].addons_count, 2);
        assert_eq!(merged.sources[0].rejected.len(), 2);
    }

    #[test]
    fn disabled_sources_are_listed_but_not_loaded() {
        let mut off = source("off", true);
        off.enabled = false;
        let merged = merge(&[off], &loader(vec![("off", doc(None, &[("x", "v1")]))]));
        assert!(merged.winners.is_empty());
        assert!(!merged.sources[0].enabled);
        assert!(merged.sources[0].error.is_none());
    }
}
