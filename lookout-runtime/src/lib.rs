//! Lookout Runtime
//!
//! Runs the ingestion pipeline end to end:
//! - `PipelineOrchestrator` state machine over fetch, extract, geocode, persist
//! - `RunControl` for cancellation and run timeouts
//! - Geocode backfill for stored events still lacking coordinates

pub mod orchestrator;

pub use orchestrator::*;
