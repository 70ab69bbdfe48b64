//! Geolookup - City dataset decoder
//!
//! The city dataset is a JSON-lines table, one network per line:
//!
//! ```text
//! {"network": "75.2.0.0/16", "country_iso_code": "US", "country_name": "United States",
//!  "continent_name": "North America", "timezone": "America/Chicago",
//!  "latitude": 37.751, "longitude": -97.822}
//! ```
//!
//! Networks are CIDR blocks (IPv4 or IPv6) and must not overlap. IPv4 is
//! stored as IPv4-mapped IPv6 so both families share one sorted range
//! table, searched with a binary search per query.

use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};

use rayon::prelude::*;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::data::DatasetBytes;
use crate::error::LoadError;
use crate::provider::{DatasetSource, LookupProvider, QueryOutcome, Resource};

/// Identifier of the city dataset in the registry.
pub const CITY_DATASET: &str = "city";

/// Embedded default city dataset, used when no external file is usable.
pub static EMBEDDED_CITY_DATASET: &[u8] = include_bytes!("../assets/city-default.jsonl");

// ─── Records ────────────────────────────────────────────────────────────────

/// Geographic attributes attached to a network.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CityRecord {
    pub country_iso_code: Option<String>,
    pub country_name: Option<String>,
    pub continent_name: Option<String>,
    pub region_name: Option<String>,
    pub city_name: Option<String>,
    pub timezone: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawLine {
    network: String,
    #[serde(flatten)]
    record: CityRecord,
}

/// Output fields and how to extract each from a record.
///
/// Every field is always present in the payload; missing attributes are
/// `null` so the payload shape never depends on the data.
pub const CITY_FIELDS: &[(&str, fn(&CityRecord) -> Value)] = &[
    ("country_iso_code", |r: &CityRecord| opt_str(&r.country_iso_code)),
    ("country_name", |r: &CityRecord| opt_str(&r.country_name)),
    ("continent_name", |r: &CityRecord| opt_str(&r.continent_name)),
    ("region_name", |r: &CityRecord| opt_str(&r.region_name)),
    ("city_name", |r: &CityRecord| opt_str(&r.city_name)),
    ("timezone", |r: &CityRecord| opt_str(&r.timezone)),
    ("lat", |r: &CityRecord| opt_f64(r.latitude)),
    ("lon", |r: &CityRecord| opt_f64(r.longitude)),
];

fn opt_str(value: &Option<String>) -> Value {
    value.clone().map(Value::String).unwrap_or(Value::Null)
}

fn opt_f64(value: Option<f64>) -> Value {
    value
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

impl CityRecord {
    /// Render the record through [`CITY_FIELDS`].
    pub fn to_payload(&self) -> Value {
        let mut geo = Map::with_capacity(CITY_FIELDS.len());
        for (name, extract) in CITY_FIELDS {
            geo.insert((*name).to_string(), extract(self));
        }
        Value::Object(geo)
    }
}

// ─── Networks ───────────────────────────────────────────────────────────────

/// Inclusive address range covered by a CIDR block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkRange {
    pub start: u128,
    pub end: u128,
}

/// Map an address onto the shared IPv6 number space.
fn address_bits(addr: IpAddr) -> u128 {
    match addr {
        IpAddr::V4(v4) => u128::from(v4.to_ipv6_mapped()),
        IpAddr::V6(v6) => u128::from(v6),
    }
}

/// Parse `addr/prefix` (or a bare address) into an inclusive range.
pub fn parse_network(cidr: &str) -> Result<NetworkRange, String> {
    let (addr, prefix) = match cidr.trim().split_once('/') {
        Some((addr, prefix)) => (addr, Some(prefix)),
        None => (cidr.trim(), None),
    };
    let addr: IpAddr = addr
        .parse()
        .map_err(|_| format!("invalid network address: {}", addr))?;

    let (max_prefix, family_offset) = match addr {
        IpAddr::V4(_) => (32u32, 96u32),
        IpAddr::V6(_) => (128u32, 0u32),
    };
    let prefix = match prefix {
        Some(p) => p
            .parse::<u32>()
            .ok()
            .filter(|p| *p <= max_prefix)
            .ok_or_else(|| format!("invalid prefix length: {}", p))?,
        None => max_prefix,
    };

    let host_bits = 128 - family_offset - prefix;
    let host_mask = if host_bits == 128 {
        u128::MAX
    } else {
        (1u128 << host_bits) - 1
    };
    let start = address_bits(addr) & !host_mask;
    Ok(NetworkRange {
        start,
        end: start | host_mask,
    })
}

// ─── Database ───────────────────────────────────────────────────────────────

/// A loaded city dataset.
pub struct CityDatabase {
    /// Sorted, non-overlapping ranges with an index into `records`.
    ranges: Vec<(NetworkRange, usize)>,
    records: Vec<CityRecord>,
    closed: AtomicBool,
}

impl CityDatabase {
    /// Decode a city dataset from raw bytes.
    pub fn from_bytes(data: &DatasetBytes) -> Result<Self, LoadError> {
        // Parse every line in parallel, then order by start address
        let parsed: Vec<Option<(usize, NetworkRange, CityRecord)>> = (0..data.line_count())
            .into_par_iter()
            .map(|i| parse_line(data, i))
            .collect::<Result<_, _>>()?;

        let mut entries: Vec<(usize, NetworkRange, CityRecord)> =
            parsed.into_iter().flatten().collect();
        if entries.is_empty() {
            return Err(LoadError::Empty);
        }
        entries.sort_by_key(|(_, range, _)| range.start);

        let mut ranges: Vec<(NetworkRange, usize)> = Vec::with_capacity(entries.len());
        let mut records = Vec::with_capacity(entries.len());
        for (line, range, record) in entries {
            if let Some((last, _)) = ranges.last() {
                if range.start <= last.end {
                    return Err(LoadError::Overlap { line });
                }
            }
            ranges.push((range, records.len()));
            records.push(record);
        }

        Ok(Self {
            ranges,
            records,
            closed: AtomicBool::new(false),
        })
    }

    /// Record covering `addr`, if any.
    pub fn lookup(&self, addr: IpAddr) -> Option<&CityRecord> {
        let bits = address_bits(addr);
        let idx = self.ranges.partition_point(|(range, _)| range.start <= bits);
        let (range, record) = self.ranges.get(idx.checked_sub(1)?)?;
        (bits <= range.end).then(|| &self.records[*record])
    }

    pub fn network_count(&self) -> usize {
        self.records.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Resource for CityDatabase {
    fn close(&self) -> std::io::Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

/// Parse line `i`; blank lines yield `None`. Line numbers in errors are 1-based.
fn parse_line(
    data: &DatasetBytes,
    i: usize,
) -> Result<Option<(usize, NetworkRange, CityRecord)>, LoadError> {
    let line_no = i + 1;
    let line = data.get_line(i).ok_or_else(|| LoadError::Parse {
        line: line_no,
        message: "invalid UTF-8".into(),
    })?;
    if line.trim().is_empty() {
        return Ok(None);
    }

    let raw: RawLine = serde_json::from_str(line).map_err(|e| LoadError::Parse {
        line: line_no,
        message: e.to_string(),
    })?;
    let range = parse_network(&raw.network).map_err(|message| LoadError::Parse {
        line: line_no,
        message,
    })?;
    Ok(Some((line_no, range, raw.record)))
}

// ─── Provider ───────────────────────────────────────────────────────────────

/// [`LookupProvider`] over JSON-lines city datasets.
#[derive(Debug, Default, Clone, Copy)]
pub struct CityProvider;

impl LookupProvider for CityProvider {
    type Resource = CityDatabase;
    type Value = Value;

    fn open(&self, source: &DatasetSource) -> Result<CityDatabase, LoadError> {
        let data = DatasetBytes::open(source)?;
        let db = CityDatabase::from_bytes(&data)?;
        debug!(
            "Decoded {} networks ({} bytes) from {}",
            db.network_count(),
            data.size(),
            source
        );
        Ok(db)
    }

    fn query(&self, db: &CityDatabase, key: &str) -> QueryOutcome<Value> {
        if db.is_closed() {
            return QueryOutcome::Failed("dataset is closed".into());
        }
        let addr: IpAddr = match key.trim().parse() {
            Ok(addr) => addr,
            Err(_) => return QueryOutcome::Failed(format!("'{}' is not an IP address", key)),
        };
        match db.lookup(addr) {
            Some(record) => QueryOutcome::Found(record.to_payload()),
            None => QueryOutcome::NotFound,
        }
    }
}
