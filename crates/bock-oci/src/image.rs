//! OCI Image Specification types.
//!
//! Checkpoints are published by the runtime engine as an image whose target
//! is an index; the index's manifests point at the individual checkpoint
//! blobs, told apart by media type.
//!
//! Based on the OCI Image Specification v1.1.0:
//! <https://github.com/opencontainers/image-spec>

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// OCI Image Index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageIndex {
    /// Schema version (must be 2).
    pub schema_version: u32,
    /// Media type.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    /// Manifest list.
    #[serde(default)]
    pub manifests: Vec<Descriptor>,
    /// Annotations.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub annotations: HashMap<String, String>,
}

impl ImageIndex {
    /// Create an index over `manifests`.
    #[must_use]
    pub fn new(manifests: Vec<Descriptor>) -> Self {
        Self {
            schema_version: 2,
            media_type: Some(media_types::INDEX.to_string()),
            manifests,
            annotations: HashMap::new(),
        }
    }

    /// First manifest with the given media type.
    #[must_use]
    pub fn find(&self, media_type: &str) -> Option<&Descriptor> {
        self.manifests.iter().find(|m| m.media_type == media_type)
    }
}

/// Content descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    /// Media type of the referenced content.
    pub media_type: String,
    /// Content digest (`<algorithm>:<hex>`).
    pub digest: String,
    /// Content size in bytes.
    pub size: i64,
    /// Annotations.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub annotations: HashMap<String, String>,
}

impl Descriptor {
    /// Create a descriptor without annotations.
    pub fn new(media_type: impl Into<String>, digest: impl Into<String>, size: i64) -> Self {
        Self {
            media_type: media_type.into(),
            digest: digest.into(),
            size,
            annotations: HashMap::new(),
        }
    }
}

/// Common media types.
pub mod media_types {
    /// OCI image index media type.
    pub const INDEX: &str = "application/vnd.oci.image.index.v1+json";
    /// Checkpoint image (CRIU dump archived as tar).
    pub const CHECKPOINT: &str = "application/vnd.containerd.container.criu.checkpoint.criu.tar";
    /// Runtime spec captured alongside a checkpoint.
    pub const CHECKPOINT_CONFIG: &str =
        "application/vnd.containerd.container.checkpoint.config.v1+proto";
}

/// Labels understood by the engine's content store.
pub mod labels {
    /// Marks content as a garbage-collection root.
    pub const GC_ROOT: &str = "containerd.io/gc.root";
}
