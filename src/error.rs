//! Geolookup - Error taxonomy
//!
//! Lookup failures are typed so the transport can map them onto stable
//! status codes. Load failures never reach a caller of `resolve`; the
//! watcher logs them and keeps serving the previous dataset.

use thiserror::Error;

/// Failure returned by [`LookupService::resolve`](crate::service::LookupService::resolve).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LookupError {
    /// The key is absent from the active dataset. Expected, not an error.
    #[error("The address {0} is not in the database.")]
    NotFound(String),

    /// No dataset handle is registered (startup race or every load failed).
    #[error("Dataset {0} is not available")]
    DatasetUnavailable(String),

    /// The provider failed to decode or query a loaded dataset.
    #[error("Unexpected error while resolving IP {key}")]
    Provider { key: String, message: String },
}

impl LookupError {
    /// Stable negative status code exposed on the transport.
    pub fn status_code(&self) -> i32 {
        match self {
            LookupError::NotFound(_) => -1,
            LookupError::DatasetUnavailable(_) => -2,
            LookupError::Provider { .. } => -3,
        }
    }

    /// Machine-readable failure kind.
    pub fn kind(&self) -> &'static str {
        match self {
            LookupError::NotFound(_) => "not_found",
            LookupError::DatasetUnavailable(_) => "dataset_unavailable",
            LookupError::Provider { .. } => "provider_error",
        }
    }
}

/// Failure to build a dataset resource from a byte source.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read {source_name}: {error}")]
    Io {
        source_name: String,
        #[source]
        error: std::io::Error,
    },

    #[error("line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("line {line}: network overlaps a previous entry")]
    Overlap { line: usize },

    #[error("dataset contains no records")]
    Empty,
}

/// Failure while closing the registry's handles.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("failed to close {} dataset(s): {}", failures.len(), failures.join("; "))]
    Close { failures: Vec<String> },
}

/// Failure to start the dataset watcher.
#[derive(Debug, Error)]
pub enum WatcherError {
    #[error("dataset watcher is already started")]
    AlreadyStarted,

    #[error("cannot watch {0}: not a file path")]
    InvalidPath(String),

    #[error("failed to watch {path}: {source}")]
    Watch {
        path: String,
        #[source]
        source: notify::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_are_negative_and_distinct() {
        let codes = [
            LookupError::NotFound("1.2.3.4".into()).status_code(),
            LookupError::DatasetUnavailable("city".into()).status_code(),
            LookupError::Provider {
                key: "x".into(),
                message: "boom".into(),
            }
            .status_code(),
        ];
        assert!(codes.iter().all(|c| *c < 0));
        assert_ne!(codes[0], codes[1]);
        assert_ne!(codes[1], codes[2]);
    }

    #[test]
    fn test_messages() {
        assert_eq!(
            LookupError::NotFound("127.0.0.1".into()).to_string(),
            "The address 127.0.0.1 is not in the database."
        );
        let err = RegistryError::Close {
            failures: vec!["city: busy".into(), "asn: gone".into()],
        };
        assert_eq!(
            err.to_string(),
            "failed to close 2 dataset(s): city: busy; asn: gone"
        );
    }
}
