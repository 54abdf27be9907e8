//! Metrics Ingestion
//!
//! Accepts self-reported backend health samples, smooths latency with an
//! EWMA, persists to the cold and hot stores, and kicks the coordinator
//! when enough fresh inputs have arrived.

pub mod ewma;
pub mod handlers;

mod ingest;

pub use ingest::{IngestError, IngestOutcome, MetricsIngestor};
