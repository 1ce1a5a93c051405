//! Lookout Agents
//!
//! LLM-backed stages of the ingestion pipeline:
//! - **Backend**: OpenAI-compatible and Anthropic clients with fault classification
//! - **Schema**: the versioned `lookout.extract.v1` request/response contract
//! - **Extractor**: batched, rate-gated, retrying event extraction with validation

pub mod backend;
pub mod schema;
pub mod extractor;

pub use backend::*;
pub use schema::*;
pub use extractor::*;
