//! Lookout Core - domain model and shared services for incident ingestion
//!
//! This crate provides the pieces every pipeline stage leans on:
//! - Article / ExtractedEvent / GeocodeResult / QualitySample types
//! - Pipeline configuration (TOML) and the tiered source registry
//! - RateGate token bucket for the extraction service budget
//! - SeenGuidSet for cross-run deduplication
//! - Gazetteer-backed Geocoder with layered fallback
//! - QualityRecorder health windows
//! - The persistence interface and two stores

pub mod types;
pub mod config;
pub mod sources;
pub mod rate_gate;
pub mod seen;
pub mod geocoder;
pub mod quality;
pub mod store;

pub use types::*;
pub use config::*;
pub use sources::*;
pub use rate_gate::*;
pub use seen::*;
pub use geocoder::*;
pub use quality::*;
pub use store::*;

/// Default minimum delay between requests to one origin, in seconds
pub const DEFAULT_MIN_DELAY_SECS: f64 = 3.0;

/// Default extraction batch size
pub const DEFAULT_BATCH_SIZE: usize = 3;

/// Default confidence threshold for accepting an extracted event
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.6;

/// Success rate under which a stage is reported as `warning`
pub const DEFAULT_WARNING_THRESHOLD: f64 = 0.85;

/// Success rate under which a stage is reported as `error`
pub const DEFAULT_ERROR_THRESHOLD: f64 = 0.5;
