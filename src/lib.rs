//! Geolookup - GeoIP lookups over a hot-swappable dataset.
//!
//! Resolves IP addresses against a city dataset that can be replaced on disk
//! while the service keeps answering.
//!
//! ## Core
//!
//! - **Registry** (`registry`): the active dataset handle per identifier,
//!   swapped atomically on reload.
//! - **Result cache** (`cache`): bounded LRU with a fixed TTL.
//! - **Watcher** (`watcher`): initial load, embedded fallback, and file
//!   watching with reloads.
//! - **Refresher** (`refresher`): re-resolves cached keys after a reload.
//! - **Service** (`service`): the `resolve` entry point.
//!
//! ## Shell
//!
//! - **Decoder** (`geo`): JSON-lines city datasets, read via `data`.
//! - **Server** (`server`): JSON-RPC over HTTP.

pub mod cache;
pub mod config;
pub mod data;
pub mod error;
pub mod geo;
pub mod provider;
pub mod refresher;
pub mod registry;
pub mod server;
pub mod service;
pub mod watcher;
