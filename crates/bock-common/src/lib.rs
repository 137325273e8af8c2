//! # bock-common
//!
//! Shared utilities and types for the Bock container ecosystem.
//!
//! This crate provides common functionality used across all Bock crates:
//! - The normalized error taxonomy
//! - Standard filesystem paths
//! - Environment overrides

#![warn(missing_docs)]

pub mod env;
pub mod error;
pub mod paths;

pub use error::{BockError, BockResult, BoxError, ErrorKind};
pub use paths::BockPaths;
