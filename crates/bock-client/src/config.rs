//! Client configuration.

use std::path::PathBuf;
use std::time::Duration;

use bock_common::{BockPaths, env};

use crate::engine::events::TASK_TOPIC_PREFIX;

/// Engine namespace used when none is configured.
pub const DEFAULT_NAMESPACE: &str = "bock";

/// Runtime client configuration options.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Paths for client-owned state.
    pub paths: BockPaths,
    /// Engine namespace all containers and events live in.
    pub namespace: String,
    /// Keep bundle directories after delete.
    pub no_clean: bool,
    /// Create tasks without `pivot_root`.
    pub no_pivot_root: bool,
    /// Delay before re-subscribing after an event stream error.
    pub event_retry_backoff: Duration,
    /// Budget for deleting an exec process whose start failed.
    pub exec_cleanup_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            paths: BockPaths::new(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            no_clean: false,
            no_pivot_root: false,
            event_retry_backoff: Duration::from_secs(1),
            exec_cleanup_timeout: Duration::from_secs(45),
        }
    }
}

impl ClientConfig {
    /// Defaults with the environment overrides applied.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            no_clean: env::no_clean(),
            no_pivot_root: env::ramdisk(),
            ..Self::default()
        }
    }

    /// Set the root directory.
    #[must_use]
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.paths = BockPaths::with_root(root);
        self
    }

    /// Set the engine namespace.
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Keep bundles after delete.
    #[must_use]
    pub const fn with_no_clean(mut self, no_clean: bool) -> Self {
        self.no_clean = no_clean;
        self
    }

    /// Create tasks without `pivot_root`.
    #[must_use]
    pub const fn with_no_pivot_root(mut self, no_pivot_root: bool) -> Self {
        self.no_pivot_root = no_pivot_root;
        self
    }

    /// Set the event stream retry backoff.
    #[must_use]
    pub const fn with_event_retry_backoff(mut self, backoff: Duration) -> Self {
        self.event_retry_backoff = backoff;
        self
    }

    /// Set the exec cleanup timeout.
    #[must_use]
    pub const fn with_exec_cleanup_timeout(mut self, timeout: Duration) -> Self {
        self.exec_cleanup_timeout = timeout;
        self
    }

    /// Bundle directory of container `id`.
    #[must_use]
    pub fn bundle_dir(&self, id: &str) -> PathBuf {
        self.paths.bundle(id)
    }

    /// Event bus filters selecting this namespace's task events.
    #[must_use]
    pub fn event_filters(&self) -> Vec<String> {
        vec![format!(
            "namespace=={},topic~=|^{TASK_TOPIC_PREFIX}|",
            self.namespace
        )]
    }
}
