//! Standard filesystem paths for Bock.

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;

/// Default root directory for Bock data.
pub static BOCK_ROOT: Lazy<PathBuf> = Lazy::new(|| {
    std::env::var("BOCK_ROOT")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/var/lib/bock"))
});

/// Name of the OCI runtime configuration file inside a bundle.
pub const BUNDLE_CONFIG: &str = "config.json";

/// Standard paths used by the runtime client.
#[derive(Debug, Clone)]
pub struct BockPaths {
    /// Root data directory (default: /var/lib/bock).
    pub root: PathBuf,
}

impl BockPaths {
    /// Create paths with default locations.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create paths with a custom root directory.
    #[must_use]
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Client-owned state directory holding one bundle per container.
    #[must_use]
    pub fn containers(&self) -> PathBuf {
        self.root.join("containers")
    }

    /// Bundle directory for a specific container.
    #[must_use]
    pub fn bundle(&self, id: &str) -> PathBuf {
        self.containers().join(id)
    }

    /// Runtime configuration file of a bundle.
    #[must_use]
    pub fn bundle_config(bundle: &Path) -> PathBuf {
        bundle.join(BUNDLE_CONFIG)
    }
}

impl Default for BockPaths {
    fn default() -> Self {
        Self {
            root: BOCK_ROOT.clone(),
        }
    }
}
