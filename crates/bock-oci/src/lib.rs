//! # bock-oci
//!
//! OCI (Open Container Initiative) specification types for Bock.
//!
//! This crate provides Rust types for:
//! - The parts of the OCI Runtime Specification (config.json) the client reads
//! - OCI image index and content descriptors (checkpoint images)
//! - Task status values

#![warn(missing_docs)]

pub mod image;
pub mod runtime;
pub mod state;

pub use image::{Descriptor, ImageIndex};
pub use runtime::Spec;
pub use state::TaskStatus;
