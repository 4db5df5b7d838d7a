//! Error types for the timeseries runtime.
//!
//! Lookup misses (unknown key, unknown backend name) are never errors; they
//! are reported as `None` by the lookup functions. Everything here is either
//! a configuration problem the caller can recover from, or a per-backend
//! failure that is aggregated by [`FlushError`] and [`ResolveError`].

use std::fmt;

use thiserror::Error;

use crate::backend::BackendId;

/// The main error type for all timeseries operations.
#[derive(Error, Debug)]
pub enum TimeseriesError {
    /// A backend rejected its options or failed an operation.
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    /// A backend could not be registered or addressed.
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// One or more backends failed to resolve keys.
    #[error("resolve error: {0}")]
    Resolve(#[from] ResolveError),

    /// One or more backends failed during a flush.
    #[error("flush error: {0}")]
    Flush(#[from] FlushError),
}

/// Errors raised by an individual backend plugin.
#[derive(Error, Debug)]
pub enum BackendError {
    /// The option string could not be parsed by the backend.
    #[error("invalid options for backend '{backend}': {reason}")]
    InvalidOptions {
        /// The backend that rejected the options.
        backend: String,
        /// Why the options were rejected.
        reason: String,
    },

    /// An external resource required by the backend could not be opened.
    #[error("backend '{backend}' cannot open {resource}: {source}")]
    Unavailable {
        /// The backend name.
        backend: String,
        /// The file, socket, or endpoint that could not be opened.
        resource: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The backend was used before being enabled.
    #[error("backend '{backend}' is not enabled")]
    NotEnabled {
        /// The backend name.
        backend: String,
    },

    /// The backend is already enabled with a different option string.
    #[error("backend '{backend}' is already enabled with options '{current}'")]
    AlreadyEnabled {
        /// The backend name.
        backend: String,
        /// The options the backend is currently enabled with.
        current: String,
    },

    /// The backend could not produce an identifier for a key.
    #[error("backend '{backend}' cannot resolve key '{key}': {reason}")]
    Resolve {
        /// The backend name.
        backend: String,
        /// The key that could not be resolved.
        key: String,
        /// Why resolution failed.
        reason: String,
    },

    /// Writing a batch failed with an I/O error.
    #[error("backend '{backend}' write failed: {source}")]
    Write {
        /// The backend name.
        backend: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A remote endpoint refused or failed to accept the batch.
    #[error("backend '{backend}' remote write failed: {reason}")]
    Remote {
        /// The backend name.
        backend: String,
        /// Description of the remote failure.
        reason: String,
    },
}

/// Errors that can occur when registering or addressing backends.
#[derive(Error, Debug)]
pub enum RegistryError {
    /// No backend is registered under the given id.
    #[error("no backend registered with id {id}")]
    UnknownBackend {
        /// The requested id.
        id: BackendId,
    },

    /// The id does not fit in the backend table.
    #[error("backend id {id} out of range (max {max})")]
    IdOutOfRange {
        /// The offending id.
        id: BackendId,
        /// The exclusive upper bound on ids.
        max: usize,
    },

    /// Another backend already owns this id.
    #[error("backend id {id} is already registered")]
    DuplicateId {
        /// The conflicting id.
        id: BackendId,
    },

    /// Another backend already uses this name.
    #[error("backend name '{name}' is already registered")]
    DuplicateName {
        /// The conflicting name.
        name: String,
    },
}

/// A single backend's failure inside an aggregated resolve or flush.
#[derive(Debug)]
pub struct BackendFailure {
    /// Name of the backend that failed.
    pub backend: String,
    /// What went wrong.
    pub error: BackendError,
}

/// Aggregated failure of [`KeyPackage::resolve`](crate::KeyPackage::resolve).
///
/// Pairs resolved before or alongside the failures keep their state.
#[derive(Error, Debug)]
#[error("{} failure(s) resolving keys{}", .failures.len(), FailureList(.failures))]
pub struct ResolveError {
    /// Every (backend, key) failure encountered.
    pub failures: Vec<BackendFailure>,
}

/// Aggregated failure of [`KeyPackage::flush`](crate::KeyPackage::flush).
///
/// A flush that returns this error may still have written to some backends.
#[derive(Error, Debug)]
#[error("{} backend(s) failed to flush{}", failed_backends(.failures), FailureList(.failures))]
pub struct FlushError {
    /// Every failure encountered, resolve and write alike.
    pub failures: Vec<BackendFailure>,
}

impl FlushError {
    /// Returns `true` if the named backend contributed a failure.
    pub fn failed(&self, backend: &str) -> bool {
        self.failures.iter().any(|f| f.backend == backend)
    }
}

fn failed_backends(failures: &[BackendFailure]) -> usize {
    let mut names: Vec<&str> = failures.iter().map(|f| f.backend.as_str()).collect();
    names.sort_unstable();
    names.dedup();
    names.len()
}

struct FailureList<'a>(&'a [BackendFailure]);

impl fmt::Display for FailureList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for failure in self.0 {
            write!(f, "; {}", failure.error)?;
        }
        Ok(())
    }
}

/// Type alias for `Result<T, TimeseriesError>`.
pub type Result<T> = std::result::Result<T, TimeseriesError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn write_failure(backend: &str) -> BackendFailure {
        BackendFailure {
            backend: backend.to_string(),
            error: BackendError::Remote {
                backend: backend.to_string(),
                reason: "HTTP 503".to_string(),
            },
        }
    }

    #[test]
    fn test_flush_error_counts_distinct_backends() {
        let err = FlushError {
            failures: vec![write_failure("graphite"), write_failure("graphite"), write_failure("ascii")],
        };
        let msg = err.to_string();
        assert!(msg.starts_with("2 backend(s) failed to flush"), "{msg}");
        assert!(err.failed("ascii"));
        assert!(!err.failed("prometheus"));
    }

    #[test]
    fn test_resolve_error_lists_failures() {
        let err = ResolveError {
            failures: vec![BackendFailure {
                backend: "prometheus".to_string(),
                error: BackendError::Resolve {
                    backend: "prometheus".to_string(),
                    key: "".to_string(),
                    reason: "empty key".to_string(),
                },
            }],
        };
        assert_eq!(
            err.to_string(),
            "1 failure(s) resolving keys; backend 'prometheus' cannot resolve key '': empty key"
        );
    }

    #[test]
    fn test_from_conversions() {
        let err: TimeseriesError = RegistryError::DuplicateName {
            name: "ascii".to_string(),
        }
        .into();
        assert!(matches!(err, TimeseriesError::Registry(RegistryError::DuplicateName { .. })));
    }
}
