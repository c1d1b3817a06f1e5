//! pagecap: render web pages to images over HTTP.
//!
//! The service bridges two concurrency regimes: any number of stateless
//! HTTP handlers on one side, and a single-threaded, stateful rendering
//! engine on the other. The bridge is the render-request broker:
//!
//! - handlers validate parameters into a [`RenderJob`] keyed by a fresh
//!   correlation id,
//! - the [`Dispatcher`] queues jobs to the one worker thread that owns the
//!   engine and publishes exactly one [`Completion`] per job,
//! - the submitting handler waits on the [`CompletionRegistry`] until its
//!   result appears or the deadline elapses, then consumes it.
//!
//! Engines implement [`PageEngine`]; the built-in [`HtmlEngine`] fetches a
//! page, lays it out as wireframe blocks, and rasterizes those into PNG or
//! JPEG output.

use std::path::PathBuf;
use std::time::Duration;

pub mod auth;
pub mod cache;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod params;
pub mod registry;
pub mod server;

pub use dispatch::Dispatcher;
pub use engine::{HtmlEngine, PageEngine, PagePolicy, Surface, Viewport};
pub use error::{Error, Result};
pub use params::{ImageFormat, OutputMode, RenderJob, RenderRequest};
pub use registry::{Completion, CompletionRegistry, RenderFailure};
pub use server::{build_router, AppState};

/// Process-wide configuration, read once at startup. Only the auth handle
/// is ever reloaded afterwards.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address
    pub bind: String,
    /// Read timeout in seconds; also the engine's page-load timeout
    pub read_timeout_secs: u64,
    /// Write timeout in seconds
    pub write_timeout_secs: u64,
    /// Cache maximum age in seconds
    pub max_age_secs: u64,
    /// Response cache capacity in entries; 0 disables caching
    pub cache_entries: usize,
    /// Credential file for Basic auth; `None` disables auth
    pub htpasswd: Option<PathBuf>,
    /// Log file path; `None` logs to stderr
    pub log_file: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:55888".to_string(),
            read_timeout_secs: 5,
            write_timeout_secs: 15,
            max_age_secs: 86400,
            cache_entries: 0,
            htpasswd: None,
            log_file: None,
        }
    }
}

impl ServerConfig {
    /// How long a handler waits for its completion.
    pub fn wait_deadline(&self) -> Duration {
        Duration::from_secs(self.wait_secs())
    }

    pub fn wait_secs(&self) -> u64 {
        self.read_timeout_secs + self.write_timeout_secs
    }

    pub fn cache_enabled(&self) -> bool {
        self.cache_entries > 0
    }
}
