//! `drivesense` - Vehicle motion telemetry ingest
//!
//! Sensor sources send accelerometer and gyroscope readings as UDP datagrams.
//! Each datagram is decoded into a partial update, merged into a single
//! canonical [`Snapshot`], enriched with derived driving metrics, persisted,
//! and served to consumers over HTTP.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod api;
pub mod cli;
pub mod config;
pub mod decoder;
pub mod error;
pub mod listener;
pub mod logging;
pub mod metrics;
pub mod server;
pub mod snapshot;
pub mod storage;
pub mod store;

pub use api::QueryFacade;
pub use config::Config;
pub use decoder::{decode, Decoded, RejectReason};
pub use error::{Error, Result};
pub use listener::Listener;
pub use logging::init_logging;
pub use snapshot::{Axes, Field, PartialUpdate, Snapshot};
pub use storage::SnapshotBackend;
pub use store::{MergeOutcome, SnapshotStore};
