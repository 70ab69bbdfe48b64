//! Geolookup - Dataset byte access
//!
//! Loads dataset files into memory (or wraps a dataset compiled into the
//! binary) and pre-computes line offsets so decoders can walk records by
//! index.

use crate::error::LoadError;
use crate::provider::DatasetSource;

/// Storage backend for the dataset bytes
enum DataStorage {
    /// Owned copy of a dataset file. Never mapped: the watcher reloads while
    /// writers may still be truncating the file.
    InMemory(Vec<u8>),
    /// Bytes compiled into the binary
    Static(&'static [u8]),
}

impl DataStorage {
    fn as_bytes(&self) -> &[u8] {
        match self {
            DataStorage::InMemory(v) => v.as_slice(),
            DataStorage::Static(b) => b,
        }
    }
}

/// Raw dataset bytes with a line index
pub struct DatasetBytes {
    storage: DataStorage,
    /// Byte offsets for the start of each line
    line_offsets: Vec<usize>,
}

impl DatasetBytes {
    /// Open a dataset source and build the line index
    pub fn open(source: &DatasetSource) -> Result<Self, LoadError> {
        let storage = match source {
            DatasetSource::File(_) => DataStorage::InMemory(source.read_bytes()?),
            DatasetSource::Embedded(bytes) => DataStorage::Static(*bytes),
        };

        let line_offsets = index_lines(storage.as_bytes());
        Ok(Self {
            storage,
            line_offsets,
        })
    }

    /// Total number of lines
    pub fn line_count(&self) -> usize {
        self.line_offsets.len()
    }

    /// Total size in bytes
    pub fn size(&self) -> usize {
        self.storage.as_bytes().len()
    }

    /// Get a specific line by index (0-indexed), without its newline
    ///
    /// Returns None if the index is out of bounds or the line is not UTF-8.
    pub fn get_line(&self, index: usize) -> Option<&str> {
        if index >= self.line_offsets.len() {
            return None;
        }

        let data = self.storage.as_bytes();
        let start = self.line_offsets[index];
        let end = if index + 1 < self.line_offsets.len() {
            self.line_offsets[index + 1] - 1
        } else {
            data.len()
        };

        let end = end.min(data.len());
        if start >= end {
            return Some("");
        }

        std::str::from_utf8(&data[start..end])
            .ok()
            .map(|line| line.strip_suffix('\r').unwrap_or(line))
    }
}

fn index_lines(data: &[u8]) -> Vec<usize> {
    if data.is_empty() {
        return Vec::new();
    }
    let mut line_offsets = vec![0];
    for (i, &byte) in data.iter().enumerate() {
        if byte == b'\n' && i + 1 < data.len() {
            line_offsets.push(i + 1);
        }
    }
    line_offsets
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_line_access() -> anyhow::Result<()> {
        let mut file = NamedTempFile::new()?;
        writeln!(file, r#"{{"network": "1.0.0.0/24"}}"#)?;
        writeln!(file, r#"{{"network": "2.0.0.0/24"}}"#)?;
        write!(file, "\r\n")?;
        writeln!(file, r#"{{"network": "3.0.0.0/24"}}"#)?;

        let data = DatasetBytes::open(&DatasetSource::File(file.path().to_path_buf()))?;
        assert_eq!(data.line_count(), 4);
        assert!(data.get_line(0).unwrap().contains("1.0.0.0"));
        assert_eq!(data.get_line(2), Some(""));
        assert!(data.get_line(3).unwrap().contains("3.0.0.0"));
        assert_eq!(data.get_line(4), None);
        Ok(())
    }

    #[test]
    fn test_embedded_and_empty() -> anyhow::Result<()> {
        let data = DatasetBytes::open(&DatasetSource::Embedded(b"a\nb"))?;
        assert_eq!(data.line_count(), 2);
        assert_eq!(data.get_line(1), Some("b"));
        assert_eq!(data.size(), 3);

        let empty = NamedTempFile::new()?;
        let data = DatasetBytes::open(&DatasetSource::File(empty.path().to_path_buf()))?;
        assert_eq!(data.line_count(), 0);
        Ok(())
    }

    #[test]
    fn test_file_bytes_are_owned() -> anyhow::Result<()> {
        let mut file = NamedTempFile::new()?;
        writeln!(file, "first line")?;
        writeln!(file, "second line")?;

        let data = DatasetBytes::open(&DatasetSource::File(file.path().to_path_buf()))?;
        // Truncating the file afterwards leaves the loaded bytes intact
        std::fs::write(file.path(), "")?;
        assert_eq!(data.line_count(), 2);
        assert_eq!(data.get_line(1), Some("second line"));
        assert_eq!(data.size(), 23);
        Ok(())
    }
}
