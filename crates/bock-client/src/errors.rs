//! Translation of engine errors into the normalized taxonomy.
//!
//! Classification is heuristic. Structured codes are trusted first; engines
//! that flatten errors into plain strings are caught by matching a fixed list
//! of phrases, which can drift when the engine rewords its messages.

use bock_common::BockError;

use crate::engine::{Code, EngineError};

/// Message fragments engines use for missing objects.
pub const NOT_FOUND_PHRASES: &[&str] =
    &["container does not exist", "not found", "no such container"];

/// Normalize an engine error.
#[must_use]
pub fn translate(err: EngineError) -> BockError {
    match err.code() {
        Code::NotFound => {
            return BockError::NotFound {
                message: err.message().to_string(),
                source: Some(Box::new(err)),
            };
        }
        Code::AlreadyExists => {
            return BockError::Conflict {
                message: err.message().to_string(),
                source: Some(Box::new(err)),
            };
        }
        Code::InvalidArgument | Code::FailedPrecondition => {
            return BockError::InvalidParameter {
                message: err.message().to_string(),
                source: Some(Box::new(err)),
            };
        }
        _ => {}
    }

    if NOT_FOUND_PHRASES.iter().any(|p| err.message().contains(p)) {
        return BockError::NotFound {
            message: err.message().to_string(),
            source: Some(Box::new(err)),
        };
    }
    BockError::unknown(err)
}

/// Normalize the error side of an engine result.
///
/// # Errors
///
/// Returns the translated error if `result` is an error.
pub fn wrap<T>(result: Result<T, EngineError>) -> Result<T, BockError> {
    result.map_err(translate)
}
