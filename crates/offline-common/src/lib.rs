//! # Offline Common
//!
//! Shared plumbing for the offline worker crates.
//!
//! ## Features
//!
//! - Logging configuration and subscriber setup
//! - Result extension traits for failures that are logged and then dropped

use std::fmt::Display;

pub mod logging;

pub use logging::{init_logging, LogConfig, LogFormat};

/// Extension trait for results whose errors are reported but not propagated.
pub trait ResultExt<T> {
    /// Log the error at warn level with `context` and discard it.
    fn log_err(self, context: &str) -> Option<T>;

    /// Log the error at debug level with `context` and discard it.
    fn debug_err(self, context: &str) -> Option<T>;
}

impl<T, E: Display> ResultExt<T> for Result<T, E> {
    #[track_caller]
    fn log_err(self, context: &str) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(error) => {
                let caller = std::panic::Location::caller();
                tracing::warn!(error = %error, location = %caller, "{context}");
                None
            }
        }
    }

    #[track_caller]
    fn debug_err(self, context: &str) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(error) => {
                tracing::debug!(error = %error, "{context}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("boom")]
    struct Boom;

    #[test]
    fn test_log_err_passes_ok_through() {
        let ok: Result<u32, Boom> = Ok(7);
        assert_eq!(ok.log_err("should not log"), Some(7));
    }

    #[test]
    fn test_log_err_swallows_error() {
        let err: Result<u32, Boom> = Err(Boom);
        assert_eq!(err.log_err("expected failure"), None);
        let err: Result<u32, Boom> = Err(Boom);
        assert_eq!(err.debug_err("expected failure"), None);
    }
}
