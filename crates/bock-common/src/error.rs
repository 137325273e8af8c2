//! Common error types for the Bock ecosystem.
//!
//! Every fallible operation exposed to engine callers returns a [`BockError`],
//! whose [`ErrorKind`] is one of a small, stable taxonomy. Runtime-specific
//! failures are folded into this taxonomy before they leave the client.

use std::fmt;

use miette::Diagnostic;
use thiserror::Error;

/// Result type alias using [`BockError`].
pub type BockResult<T> = Result<T, BockError>;

/// Boxed error used as the source of wrapped failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Normalized error classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Unknown container, task or process.
    NotFound,
    /// Duplicate ID, already-started task or already-registered process.
    Conflict,
    /// Operation is invalid for the current state.
    InvalidParameter,
    /// Infrastructure failure (bundle I/O, content store, decoding).
    System,
    /// Unclassified failure passed through from the runtime.
    Unknown,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "not found"),
            Self::Conflict => write!(f, "conflict"),
            Self::InvalidParameter => write!(f, "invalid parameter"),
            Self::System => write!(f, "system"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Common errors across the Bock ecosystem.
#[derive(Error, Diagnostic, Debug)]
pub enum BockError {
    /// The referenced container, task or process does not exist.
    #[error("{message}")]
    #[diagnostic(code(bock::not_found))]
    NotFound {
        /// What was missing.
        message: String,
        /// Runtime error this was classified from, if any.
        #[source]
        source: Option<BoxError>,
    },

    /// The request collides with existing state.
    #[error("{message}")]
    #[diagnostic(code(bock::conflict))]
    Conflict {
        /// What collided.
        message: String,
        /// Runtime error this was classified from, if any.
        #[source]
        source: Option<BoxError>,
    },

    /// The request is not valid for the current state.
    #[error("{message}")]
    #[diagnostic(code(bock::invalid_parameter))]
    InvalidParameter {
        /// Why the request was rejected.
        message: String,
        /// Runtime error this was classified from, if any.
        #[source]
        source: Option<BoxError>,
    },

    /// Infrastructure failure.
    #[error("{message}")]
    #[diagnostic(
        code(bock::system),
        help("Check the state directory and the runtime engine logs")
    )]
    System {
        /// What failed.
        message: String,
        /// Underlying cause.
        #[source]
        source: Option<BoxError>,
    },

    /// Unclassified error from the runtime, passed through unchanged.
    #[error(transparent)]
    #[diagnostic(code(bock::unknown))]
    Unknown(BoxError),
}

impl BockError {
    /// Create a [`BockError::NotFound`].
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
            source: None,
        }
    }

    /// Create a [`BockError::Conflict`].
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
            source: None,
        }
    }

    /// Create a [`BockError::InvalidParameter`].
    pub fn invalid_parameter(message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            message: message.into(),
            source: None,
        }
    }

    /// Create a [`BockError::System`] without an underlying cause.
    pub fn system(message: impl Into<String>) -> Self {
        Self::System {
            message: message.into(),
            source: None,
        }
    }

    /// Wrap `source` as a [`BockError::System`] with context.
    pub fn system_with(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::System {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Pass an unclassified error through as [`BockError::Unknown`].
    pub fn unknown(source: impl Into<BoxError>) -> Self {
        Self::Unknown(source.into())
    }

    /// The normalized class of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::InvalidParameter { .. } => ErrorKind::InvalidParameter,
            Self::System { .. } => ErrorKind::System,
            Self::Unknown(_) => ErrorKind::Unknown,
        }
    }

    /// Returns true if this is a [`ErrorKind::NotFound`] error.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self.kind(), ErrorKind::NotFound)
    }

    /// Returns true if this is a [`ErrorKind::Conflict`] error.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self.kind(), ErrorKind::Conflict)
    }
}

impl From<std::io::Error> for BockError {
    fn from(err: std::io::Error) -> Self {
        Self::system_with("I/O error", err)
    }
}

impl From<serde_json::Error> for BockError {
    fn from(err: serde_json::Error) -> Self {
        Self::system_with("serialization error", err)
    }
}
