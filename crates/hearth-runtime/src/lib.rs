//! Addon runtime for Hearth.
//!
//! Everything here touches addon code or addon processes:
//!
//! - [`SetupRunner`] runs `backend.setup` hooks once per requirements change
//!   and records the result in a setup stamp.
//! - [`HealthCache`] keeps a TTL-bounded health entry per addon backend.
//! - [`BackendRegistry`] tracks which backends are mounted in this process.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use hearth_runtime::{ProcessHookLoader, SetupRunner};
//!
//! # async fn run(manifest: hearth_core::AddonManifest) {
//! let runner = SetupRunner::new(Arc::new(ProcessHookLoader), Duration::from_secs(300));
//! let dir = std::path::Path::new("/var/lib/hearth/addons/weather");
//! if let Some(outcome) = runner.run(&manifest, dir, &serde_json::Value::Null, false).await {
//!     println!("setup ok: {}", outcome.success);
//! }
//! # }
//! ```

pub mod backend;
pub mod error;
pub mod health;
pub mod hook;
pub mod setup;

pub use backend::{BackendMounter, BackendRegistry, LoadedBackend, RouteTableMounter, mount_prefix};
pub use error::{HotLoadError, ProbeError, SetupError};
pub use health::{
    Clock, HealthCache, HealthProbe, HttpHealthProbe, ManualClock, ProbeResponse, SystemClock,
};
pub use hook::{HookLoader, HookReturn, ProcessHookLoader, SetupContext, SetupHook};
pub use setup::{SetupOutcome, SetupRunner, SetupStamp, read_stamp, requirements_hash};
