use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use hearth_core::{HealthCacheEntry, HealthSource, HealthStatus, HealthTarget};
use tokio::sync::RwLock;

use crate::backend::mount_prefix;
use crate::error::ProbeError;

pub const DEFAULT_HEALTH_TTL: Duration = Duration::from_secs(10);
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(1);

const MAX_DETAIL_LEN: usize = 200;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    millis: AtomicI64,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            millis: AtomicI64::new(start.timestamp_millis()),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.millis
            .fetch_add(by.as_millis() as i64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.millis.load(Ordering::SeqCst)).unwrap_or_default()
    }
}

/// Raw reply of a health endpoint.
#[derive(Debug, Clone)]
pub struct ProbeResponse {
    pub status: u16,
    pub body: String,
}

pub trait HealthProbe: Send + Sync {
    fn probe<'a>(
        &'a self,
        addon_id: &'a str,
        health_path: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<ProbeResponse, ProbeError>> + Send + 'a>>;
}

/// Probes `<base_url>/api/addons/<id><health_path>` over HTTP.
pub struct HttpHealthProbe {
    client: reqwest::Client,
    base_url: String,
}

impl HttpHealthProbe {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProbeError::Transport(e.to_string()))?;
        let base_url: String = base_url.into();
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn url_for(&self, addon_id: &str, health_path: &str) -> String {
        format!("{}{}{}", self.base_url, mount_prefix(addon_id), health_path)
    }
}

impl HealthProbe for HttpHealthProbe {
    fn probe<'a>(
        &'a self,
        addon_id: &'a str,
        health_path: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<ProbeResponse, ProbeError>> + Send + 'a>> {
        Box::pin(async move {
            let url = self.url_for(addon_id, health_path);
            let resp = self.client.get(&url).send().await.map_err(|e| {
                if e.is_timeout() {
                    ProbeError::Timeout
                } else {
                    ProbeError::Transport(e.to_string())
                }
            })?;
            let status = resp.status().as_u16();
            let body = resp
                .text()
                .await
                .map_err(|e| ProbeError::Transport(e.to_string()))?;
            Ok(ProbeResponse { status, body })
        })
    }
}

/// Turn a probe result into a health entry stamped with `now`.
pub fn interpret(result: Result<ProbeResponse, ProbeError>, now: DateTime<Utc>) -> HealthCacheEntry {
    let resp = match result {
        Ok(resp) => resp,
        Err(e) => return HealthCacheEntry::error(now, "EXCEPTION", e.to_string()),
    };

    if !(200..300).contains(&resp.status) {
        let detail: String = resp.body.trim().chars().take(MAX_DETAIL_LEN).collect();
        let message = if detail.is_empty() {
            format!("HTTP {}", resp.status)
        } else {
            format!("HTTP {}: {detail}", resp.status)
        };
        return HealthCacheEntry::error(now, resp.status.to_string(), message);
    }

    let Ok(serde_json::Value::Object(body)) = serde_json::from_str::<serde_json::Value>(&resp.body)
    else {
        return HealthCacheEntry::ok(Some(now));
    };

    let text = |keys: &[&str]| {
        keys.iter()
            .find_map(|k| body.get(*k).and_then(|v| v.as_str()))
            .map(String::from)
    };

    // Non-string values are compared by their JSON text, so `false` or
    // `500` land in the unexpected-status arm.
    let status = match body.get("status") {
        None | Some(serde_json::Value::Null) => String::new(),
        Some(serde_json::Value::String(s)) => s.trim().to_lowercase(),
        Some(other) => other.to_string().to_lowercase(),
    };

    match status.as_str() {
        "" | "ok" | "healthy" => HealthCacheEntry::ok(Some(now)),
        "error" | "failed" | "unhealthy" => HealthCacheEntry::error(
            now,
            text(&["error_code", "code"]).unwrap_or_else(|| "HEALTH_ERROR".into()),
            text(&["error_message", "message"])
                .unwrap_or_else(|| "Addon reported unhealthy status".into()),
        ),
        other => HealthCacheEntry::error(
            now,
            "UNKNOWN_STATUS",
            format!("Addon returned unexpected status value: {other}"),
        ),
    }
}

/// Per-addon health entries with a fixed time-to-live.
///
/// Reads within the TTL return the stored entry unchanged. An expired entry
/// is re-probed synchronously on read and overwritten whatever the outcome.
pub struct HealthCache {
    probe: Arc<dyn HealthProbe>,
    clock: Arc<dyn Clock>,
    ttl: TimeDelta,
    entries: RwLock<HashMap<String, HealthCacheEntry>>,
}

impl HealthCache {
    pub fn new(probe: Arc<dyn HealthProbe>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            probe,
            clock,
            ttl: TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX),
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub async fn check(&self, target: &HealthTarget) -> HealthCacheEntry {
        let Some(backend) = &target.backend else {
            return HealthCacheEntry::ok(None);
        };
        if !target.backend_loaded {
            return HealthCacheEntry::unknown("NOT_LOADED", "Backend router not loaded");
        }

        let now = self.clock.now();
        {
            let entries = self.entries.read().await;
            if let Some(entry) = entries.get(&target.addon_id)
                && let Some(checked) = entry.last_checked
                && now - checked < self.ttl
            {
                tracing::debug!(addon_id = %target.addon_id, "Health cache hit");
                return entry.clone();
            }
        }

        let result = self.probe.probe(&target.addon_id, &backend.health_path).await;
        let entry = interpret(result, self.clock.now());
        if entry.status == HealthStatus::Error {
            tracing::warn!(
                addon_id = %target.addon_id,
                code = entry.error_code.as_deref().unwrap_or_default(),
                "Addon health check failed"
            );
        }

        let mut entries = self.entries.write().await;
        entries.insert(target.addon_id.clone(), entry.clone());
        entry
    }

    pub async fn invalidate(&self, addon_id: &str) {
        self.entries.write().await.remove(addon_id);
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }
}

impl HealthSource for HealthCache {
    fn check<'a>(
        &'a self,
        target: &'a HealthTarget,
    ) -> Pin<Box<dyn Future<Output = HealthCacheEntry> + Send + 'a>> {
        Box::pin(HealthCache::check(self, target))
    }
}
