//! Geolookup - Lookup provider seam
//!
//! The core never decodes datasets itself. A [`LookupProvider`] turns a
//! [`DatasetSource`] into a read-only resource and answers keyed queries
//! against it.

use std::fmt;
use std::io;
use std::path::PathBuf;

use crate::error::LoadError;

/// Where a dataset's bytes come from.
#[derive(Debug, Clone)]
pub enum DatasetSource {
    /// A file on disk, read into memory on load.
    File(PathBuf),
    /// A dataset compiled into the binary.
    Embedded(&'static [u8]),
}

impl DatasetSource {
    /// Read the whole source into memory.
    pub fn read_bytes(&self) -> Result<Vec<u8>, LoadError> {
        match self {
            DatasetSource::File(path) => std::fs::read(path).map_err(|error| LoadError::Io {
                source_name: self.to_string(),
                error,
            }),
            DatasetSource::Embedded(bytes) => Ok(bytes.to_vec()),
        }
    }
}

impl fmt::Display for DatasetSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatasetSource::File(path) => write!(f, "{}", path.display()),
            DatasetSource::Embedded(_) => write!(f, "<embedded>"),
        }
    }
}

/// Outcome of a single query against a loaded resource.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome<V> {
    Found(V),
    NotFound,
    Failed(String),
}

/// A loaded, read-only dataset.
pub trait Resource: Send + Sync + 'static {
    /// Release the underlying resource. Only the registry calls this.
    fn close(&self) -> io::Result<()> {
        Ok(())
    }
}

/// Builds resources from byte sources and queries them.
pub trait LookupProvider: Send + Sync + 'static {
    type Resource: Resource;
    type Value: Clone + Send + Sync + 'static;

    /// Build a resource from `source`. May block on I/O.
    fn open(&self, source: &DatasetSource) -> Result<Self::Resource, LoadError>;

    /// Resolve `key` against `resource`.
    fn query(&self, resource: &Self::Resource, key: &str) -> QueryOutcome<Self::Value>;
}


#[cfg(test)]
mod tests {
    use super::fixtures::MapProvider;
    use super::*;

    #[test]
    fn test_source_display() {
        assert_eq!(DatasetSource::Embedded(b"").to_string(), "<embedded>");
        assert_eq!(
            DatasetSource::File(PathBuf::from("/data/city.jsonl")).to_string(),
            "/data/city.jsonl"
        );
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let source = DatasetSource::File(PathBuf::from("/definitely/not/here.jsonl"));
        assert!(matches!(source.read_bytes(), Err(LoadError::Io { .. })));
    }

    #[test]
    fn test_map_provider_outcomes() {
        let provider = MapProvider;
        let resource = provider
            .open(&DatasetSource::Embedded(b"a=1\nb=!fail\n"))
            .unwrap();
        assert_eq!(provider.query(&resource, "a"), QueryOutcome::Found("1".to_string()));
        assert_eq!(provider.query(&resource, "z"), QueryOutcome::NotFound);
        assert!(matches!(provider.query(&resource, "b"), QueryOutcome::Failed(_)));
    }
}
