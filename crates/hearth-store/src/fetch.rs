use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use hearth_core::types::validate_addon_id;
use hearth_core::{CatalogDocument, CatalogSource, SourceKind};
use reqwest::StatusCode;
use reqwest::header::{ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED};
use serde::{Deserialize, Serialize};

use crate::error::{FetchError, StoreError};
use crate::sources::CatalogSourcesStore;

/// Conditional-request metadata kept next to each cached catalog.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CachedHeaders {
    #[serde(default)]
    pub etag: Option<String>,
    #[serde(default)]
    pub last_modified: Option<String>,
    #[serde(default)]
    pub last_fetched_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchOutcome {
    /// False on `304 Not Modified`.
    pub changed: bool,
    pub status_code: u16,
}

/// Per-source result of a batch fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchReport {
    pub source_id: String,
    pub changed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Location of cached remote catalogs.
///
/// ```text
/// cache_dir/
///   {source_id}.json          - last good catalog body
///   {source_id}.headers.json  - etag / last-modified
/// ```
#[derive(Debug, Clone)]
pub struct CatalogCache {
    dir: PathBuf,
}

impl CatalogCache {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// Source ids name files in the cache dir, so they follow the addon id
    /// rule: no separators, no leading dot.
    fn file_stem(source_id: &str) -> Result<&str, FetchError> {
        validate_addon_id(source_id).map_err(|_| FetchError::InvalidSourceId(source_id.into()))?;
        Ok(source_id)
    }

    pub fn body_path(&self, source_id: &str) -> Result<PathBuf, FetchError> {
        let stem = Self::file_stem(source_id)?;
        Ok(self.dir.join(format!("{stem}.json")))
    }

    pub fn headers_path(&self, source_id: &str) -> Result<PathBuf, FetchError> {
        let stem = Self::file_stem(source_id)?;
        Ok(self.dir.join(format!("{stem}.headers.json")))
    }

    /// Stored validators, or defaults when missing or unreadable.
    pub async fn read_headers(&self, source_id: &str) -> Result<CachedHeaders, FetchError> {
        let path = self.headers_path(source_id)?;
        Ok(tokio::fs::read_to_string(path)
            .await
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default())
    }

    async fn write(&self, source_id: &str, body: &[u8], headers: &CachedHeaders) -> Result<(), FetchError> {
        let body_path = self.body_path(source_id)?;
        let headers_path = self.headers_path(source_id)?;
        tokio::fs::create_dir_all(&self.dir).await?;
        write_atomic(&body_path, body).await?;
        let headers_json = serde_json::to_vec_pretty(headers)
            .map_err(|e| FetchError::InvalidBody(e.to_string()))?;
        write_atomic(&headers_path, &headers_json).await?;
        Ok(())
    }

    async fn touch_headers(&self, source_id: &str, mut headers: CachedHeaders) -> Result<(), FetchError> {
        let headers_path = self.headers_path(source_id)?;
        headers.last_fetched_at = Some(Utc::now());
        tokio::fs::create_dir_all(&self.dir).await?;
        let headers_json = serde_json::to_vec_pretty(&headers)
            .map_err(|e| FetchError::InvalidBody(e.to_string()))?;
        write_atomic(&headers_path, &headers_json).await
    }
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), FetchError> {
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

/// Downloads remote catalogs into the cache.
///
/// A body is validated before it replaces the cache, so the cache always
/// holds the last good copy. Failures leave the stale cache in place.
pub struct CatalogFetcher {
    client: reqwest::Client,
    cache: CatalogCache,
    sources: Arc<CatalogSourcesStore>,
}

impl CatalogFetcher {
    pub fn new(
        sources: Arc<CatalogSourcesStore>,
        cache: CatalogCache,
        timeout: Duration,
    ) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("hearth/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| StoreError::Config(format!("http client: {e}")))?;
        Ok(Self {
            client,
            cache,
            sources,
        })
    }

    pub fn cache(&self) -> &CatalogCache {
        &self.cache
    }

    pub async fn fetch_one(&self, source: &CatalogSource) -> Result<FetchOutcome, FetchError> {
        if source.kind != SourceKind::Remote {
            return Ok(FetchOutcome {
                changed: false,
                status_code: 0,
            });
        }
        let url = source
            .url
            .as_deref()
            .ok_or_else(|| FetchError::MissingUrl(source.id.clone()))?;

        let cached = self.cache.read_headers(&source.id).await?;
        let has_body = tokio::fs::try_exists(self.cache.body_path(&source.id)?)
            .await
            .unwrap_or(false);

        let mut request = self.client.get(url);
        if has_body {
            if let Some(etag) = &cached.etag {
                request = request.header(IF_NONE_MATCH, etag);
            }
            if let Some(modified) = &cached.last_modified {
                request = request.header(IF_MODIFIED_SINCE, modified);
            }
        }

        let resp = request
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        let status = resp.status();

        if status == StatusCode::NOT_MODIFIED {
            tracing::debug!(source = %source.id, "Catalog not modified");
            self.cache.touch_headers(&source.id, cached).await?;
            return Ok(FetchOutcome {
                changed: false,
                status_code: status.as_u16(),
            });
        }

        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let message: String = body.trim().chars().take(200).collect();
            return Err(FetchError::Http {
                status: status.as_u16(),
                message: if message.is_empty() {
                    status.canonical_reason().unwrap_or("request failed").to_string()
                } else {
                    message
                },
            });
        }

        let header = |name: reqwest::header::HeaderName| {
            resp.headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(String::from)
        };
        let headers = CachedHeaders {
            etag: header(ETAG),
            last_modified: header(LAST_MODIFIED),
            last_fetched_at: Some(Utc::now()),
        };

        let body = resp
            .bytes()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        CatalogDocument::parse(&body).map_err(|e| FetchError::InvalidBody(e.to_string()))?;

        self.cache.write(&source.id, &body, &headers).await?;
        tracing::info!(source = %source.id, bytes = body.len(), "Catalog fetched");
        Ok(FetchOutcome {
            changed: true,
            status_code: status.as_u16(),
        })
    }

    /// Fetch every enabled remote source and record the outcome on it.
    ///
    /// One failing source never stops the batch, and neither does a failure
    /// to record its bookkeeping. Only reading the sources file is fatal.
    pub async fn fetch_enabled(&self) -> Result<Vec<FetchReport>, StoreError> {
        let sources = self.sources.load().await?;
        let mut reports = Vec::new();

        for source in sources
            .iter()
            .filter(|s| s.enabled && s.kind == SourceKind::Remote)
        {
            let (report, runtime) = match self.fetch_one(source).await {
                Ok(outcome) => (
                    FetchReport {
                        source_id: source.id.clone(),
                        changed: outcome.changed,
                        error: None,
                    },
                    (Some(Utc::now()), None),
                ),
                Err(e) => {
                    let message = format!("Fetch failed ({}): {e}", e.code());
                    tracing::warn!(source = %source.id, "{message}");
                    (
                        FetchReport {
                            source_id: source.id.clone(),
                            changed: false,
                            error: Some(message.clone()),
                        },
                        (None, Some(message)),
                    )
                }
            };

            let (loaded_at, last_error) = runtime;
            if let Err(e) = self.sources.set_runtime(&source.id, loaded_at, last_error).await {
                tracing::warn!(
                    source = %source.id,
                    error = %e,
                    code = e.code(),
                    "Failed to record fetch outcome"
                );
            }
            reports.push(report);
        }

        Ok(reports)
    }
}
