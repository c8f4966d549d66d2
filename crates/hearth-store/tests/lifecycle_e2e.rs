//! End-to-end lifecycle tests for `AddonService`.
//!
//! Addon payloads are served from `file://` directories, the health probe is
//! scripted, and time is driven by a `ManualClock`, so nothing here needs
//! the network or a running host. Setup hooks run as real `sh` scripts.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::Utc;
use hearth_core::{CATALOG_SCHEMA, HealthStatus, LifecyclePhase, SourceKind};
use hearth_runtime::{
    HealthProbe, ManualClock, ProbeError, ProbeResponse, ProcessHookLoader, RouteTableMounter,
};
use hearth_store::sources::CreateSourceRequest;
use hearth_store::{
    AddonService, GitFetcher, HearthConfig, InstallStatus, ServiceSeams, StoreError,
};
use tempfile::TempDir;

/// Health endpoint that always answers `{"status": "ok"}` and counts calls.
#[derive(Default)]
struct ScriptedProbe {
    calls: AtomicUsize,
}

impl ScriptedProbe {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl HealthProbe for ScriptedProbe {
    fn probe<'a>(
        &'a self,
        _addon_id: &'a str,
        _health_path: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<ProbeResponse, ProbeError>> + Send + 'a>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ProbeResponse {
                status: 200,
                body: r#"{"status": "ok"}"#.into(),
            })
        })
    }
}

struct Harness {
    tmp: TempDir,
    probe: Arc<ScriptedProbe>,
    clock: Arc<ManualClock>,
}

impl Harness {
    fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("core/catalogs")).unwrap();
        std::fs::create_dir_all(tmp.path().join("repos")).unwrap();
        Self {
            tmp,
            probe: Arc::new(ScriptedProbe::default()),
            clock: Arc::new(ManualClock::new(Utc::now())),
        }
    }

    fn root(&self) -> &Path {
        self.tmp.path()
    }

    fn repos(&self) -> PathBuf {
        self.root().join("repos")
    }

    fn data_dir(&self) -> PathBuf {
        self.root().join("data")
    }

    fn config(&self) -> HearthConfig {
        let mut config = HearthConfig::default();
        config.paths.data_dir = self.data_dir();
        config.paths.core_root = self.root().join("core");
        config
    }

    fn service(&self) -> AddonService {
        let seams = ServiceSeams {
            payload: Arc::new(GitFetcher::new(Duration::from_secs(10))),
            hooks: Arc::new(ProcessHookLoader),
            probe: self.probe.clone(),
            mounter: Arc::new(RouteTableMounter::new()),
            clock: self.clock.clone(),
        };
        AddonService::new(self.config(), seams).unwrap()
    }

    /// Write a catalog file under the core root.
    fn write_catalog(&self, rel: &str, generated_at: &str, addons: &[serde_json::Value]) {
        let body = serde_json::json!({
            "schema": CATALOG_SCHEMA,
            "generated_at": generated_at,
            "addons": addons,
        });
        std::fs::write(self.root().join("core").join(rel), body.to_string()).unwrap();
    }

    fn catalog_entry(&self, id: &str, name: &str, description: &str) -> serde_json::Value {
        serde_json::json!({
            "id": id,
            "name": name,
            "description": description,
            "repo": url::Url::from_directory_path(self.repos()).unwrap().to_string(),
            "ref": "main",
            "path": id,
            "min_core_version": "0.1.0",
        })
    }

    fn write_addon(&self, id: &str, manifest: serde_json::Value, files: &[(&str, &str)]) {
        let dir = self.repos().join(id);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("manifest.json"), manifest.to_string()).unwrap();
        for (rel, content) in files {
            let path = dir.join(rel);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, content).unwrap();
        }
    }

    fn seed_standard_addons(&self) {
        self.write_addon(
            "weather-widget",
            serde_json::json!({
                "id": "weather-widget",
                "name": "Weather Widget",
                "version": "1.2.0",
                "types": ["ui"],
                "backend": { "entry": "backend/main.py", "setup": "setup.sh" },
                "frontend": { "basePath": "/weather" },
            }),
            &[
                ("backend/main.py", "router = None\n"),
                ("requirements/base.txt", "httpx==0.27\n"),
                (
                    "setup.sh",
                    "echo run >> setup_runs.log\necho '{\"success\": true, \"message\": \"deps ready\"}'\n",
                ),
            ],
        );
        self.write_addon(
            "hello-action",
            serde_json::json!({
                "id": "hello-action",
                "name": "Hello Action",
                "version": "0.1.0",
                "types": ["action"],
                "backend": { "entry": "backend/main.py", "setup": "setup.sh" },
            }),
            &[
                ("backend/main.py", "router = None\n"),
                ("setup.sh", "echo 'missing toolchain' >&2\nexit 1\n"),
            ],
        );
        self.write_addon(
            "demo",
            serde_json::json!({
                "id": "demo",
                "name": "Demo",
                "version": "0.0.1",
                "types": ["knowledge"],
            }),
            &[],
        );

        self.write_catalog(
            "catalogs/dev_catalog.json",
            "2026-01-01T00:00:00Z",
            &[
                self.catalog_entry("weather-widget", "Weather Widget", "Local forecast tile"),
                self.catalog_entry("hello-action", "Hello Action", "Says hello"),
                self.catalog_entry("demo", "Demo", "Frontend-free example"),
            ],
        );
    }

    fn setup_runs(&self) -> usize {
        std::fs::read_to_string(self.data_dir().join("addons/weather-widget/setup_runs.log"))
            .map(|s| s.lines().count())
            .unwrap_or(0)
    }
}

#[tokio::test]
async fn weather_widget_goes_online_and_caches_health() {
    let h = Harness::new();
    h.seed_standard_addons();
    let service = h.service();
    service.startup().await.unwrap();

    let before = service.status("weather-widget").await.unwrap();
    assert_eq!(before.phase, LifecyclePhase::Available);

    let result = service.install("weather-widget", false).await;
    assert_eq!(result.status, InstallStatus::Installed, "{:?}", result.errors);
    assert_eq!(h.setup_runs(), 1);

    let status = service.status("weather-widget").await.unwrap();
    assert_eq!(status.phase, LifecyclePhase::Online);
    assert_eq!(status.health.status, HealthStatus::Ok);
    assert_eq!(status.setup_success, Some(true));
    assert_eq!(h.probe.calls(), 1);

    // Within the TTL the same entry comes back and nothing is probed.
    let again = service.status("weather-widget").await.unwrap();
    assert_eq!(again.health, status.health);
    assert_eq!(h.probe.calls(), 1);

    h.clock.advance(Duration::from_secs(11));
    service.status("weather-widget").await.unwrap();
    service.status("weather-widget").await.unwrap();
    assert_eq!(h.probe.calls(), 2);

    let entry = service.get_entry("weather-widget").await.unwrap();
    assert!(entry.installed);
    assert_eq!(entry.backend_prefix.as_deref(), Some("/api/addons/weather-widget"));
}

#[tokio::test]
async fn restart_reuses_setup_stamp_until_requirements_change() {
    let h = Harness::new();
    h.seed_standard_addons();
    {
        let service = h.service();
        service.startup().await.unwrap();
        service.install("weather-widget", false).await;
    }
    assert_eq!(h.setup_runs(), 1);

    let restarted = h.service();
    restarted.startup().await.unwrap();
    assert_eq!(h.setup_runs(), 1, "cached setup must not invoke the hook");
    assert_eq!(
        restarted.status("weather-widget").await.unwrap().phase,
        LifecyclePhase::Online
    );

    std::fs::write(
        h.data_dir().join("addons/weather-widget/requirements/base.txt"),
        "httpx==0.28\n",
    )
    .unwrap();
    let changed = h.service();
    changed.startup().await.unwrap();
    assert_eq!(h.setup_runs(), 2);
}

#[tokio::test]
async fn hello_action_failed_setup_leaves_no_trace() {
    let h = Harness::new();
    h.seed_standard_addons();
    let service = h.service();
    service.startup().await.unwrap();

    let result = service.install("hello-action", false).await;
    assert_eq!(result.status, InstallStatus::Failed);
    assert_eq!(result.errors[0], "Addon setup failed");
    assert!(result.errors[1].contains("missing toolchain"));
    assert!(!h.data_dir().join("addons/hello-action").exists());

    let status = service.status("hello-action").await.unwrap();
    assert_eq!(status.phase, LifecyclePhase::Available);
    assert_eq!(h.probe.calls(), 0);
}

#[tokio::test]
async fn demo_without_backend_is_never_probed() {
    let h = Harness::new();
    h.seed_standard_addons();
    let service = h.service();
    service.startup().await.unwrap();

    let result = service.install("demo", false).await;
    assert_eq!(result.status, InstallStatus::Installed, "{:?}", result.errors);

    for _ in 0..3 {
        let status = service.status("demo").await.unwrap();
        assert_eq!(status.phase, LifecyclePhase::Installed);
        assert_eq!(status.health.status, HealthStatus::Ok);
    }
    h.clock.advance(Duration::from_secs(60));
    service.status_all().await.unwrap();
    assert_eq!(h.probe.calls(), 0);

    let removed = service.uninstall("demo", false).await;
    assert_eq!(removed.status, InstallStatus::Uninstalled);
    assert!(h.data_dir().join("retained/demo/manifest.json").is_file());
    assert_eq!(
        service.status("demo").await.unwrap().phase,
        LifecyclePhase::Available
    );
}

#[tokio::test]
async fn trusted_source_wins_and_listing_filters() {
    let h = Harness::new();
    h.seed_standard_addons();
    h.write_catalog(
        "catalogs/community.json",
        "2030-01-01T00:00:00Z",
        &[h.catalog_entry("demo", "Demo (community)", "Newer but untrusted")],
    );

    let service = h.service();
    service.startup().await.unwrap();
    let community = service
        .add_source(CreateSourceRequest {
            name: Some("Community".into()),
            kind: Some(SourceKind::Local),
            path: Some("catalogs/community.json".into()),
            enabled: true,
            trusted: false,
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(community.id.starts_with("community-"));

    let demo = service.get_entry("demo").await.unwrap();
    assert_eq!(demo.source_id, "dev");
    assert_eq!(demo.addon.name, "Demo");

    let view = service.list_merged(Some("FORECAST")).await;
    assert_eq!(view.addons.len(), 1);
    assert_eq!(view.addons[0].addon.id, "weather-widget");
    assert_eq!(view.sources.len(), 2);

    let all = service.list_merged(None).await;
    let ids: Vec<_> = all.addons.iter().map(|e| e.addon.id.as_str()).collect();
    assert_eq!(ids, ["demo", "hello-action", "weather-widget"]);
}

#[tokio::test]
async fn unknown_addons_are_reported() {
    let h = Harness::new();
    h.seed_standard_addons();
    let service = h.service();
    service.startup().await.unwrap();

    let result = service.install("ghost", false).await;
    assert_eq!(result.status, InstallStatus::Failed);
    assert!(result.errors[0].contains("NOT_IN_CATALOG"));

    assert!(matches!(
        service.status("ghost").await,
        Err(StoreError::NotFound(_))
    ));
    assert!(matches!(
        service.get_entry("ghost").await,
        Err(StoreError::NotFound(_))
    ));
}

#[tokio::test]
async fn broken_manifest_on_disk_surfaces_as_unknown() {
    let h = Harness::new();
    h.seed_standard_addons();
    let broken = h.data_dir().join("addons/demo");
    std::fs::create_dir_all(&broken).unwrap();
    std::fs::write(broken.join("manifest.json"), "{ not json").unwrap();

    let service = h.service();
    service.startup().await.unwrap();

    let status = service.status("demo").await.unwrap();
    assert_eq!(status.phase, LifecyclePhase::Unknown);
    assert_eq!(status.health.error_code.as_deref(), Some("MANIFEST_INVALID"));
    assert_eq!(service.manifest_errors().await.len(), 1);
}
