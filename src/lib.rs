//! Real-time ingestion and normalization pipeline for IoT sensor fleets.
//!
//! `fleetflow` sits between an MQTT broker and the rest of a fleet dashboard:
//! it owns one broker session, parses heterogeneous topic/payload shapes into
//! canonical readings, rate-limits and smooths per-device streams, validates
//! values against physical bounds, and merges the live stream with persisted
//! history into a single bounded, time-ordered view.
//!
//! Storage, alert persistence and the device registry are external
//! collaborators reached through the traits in [`collab`]. Everything else
//! (UI, auth, HTTP routes) lives outside this crate.

pub mod alerts;
pub mod client;
pub mod collab;
pub mod config;
mod error;
pub mod ingest;
pub mod model;
pub mod network;
pub mod normalizer;
pub mod store;

pub use alerts::AlertSink;
pub use client::FleetClient;
pub use collab::{AlertStore, Collaborators, DeviceRegistry, DeviceTopic, HistoryStore, ReadingStore};
pub use config::{MetricBound, PipelineConfig};
pub use error::PipelineError;
pub use ingest::{Ingestor, RangeValidator, SmoothedSnapshot, Smoother, Throttle};
pub use model::{AnomalyKind, AnomalyNotice, CanonicalReading, Metric, UNKNOWN_DEVICE};
pub use network::{Backoff, ConnectionState};
pub use store::{merge, RingBuffer};
