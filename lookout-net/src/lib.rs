//! Lookout network layer
//!
//! Everything that talks to news sites:
//! - HTTP client construction (optional proxy, rotating user agents)
//! - Per-origin politeness with blocking and cooperative waits
//! - RSS/Atom/JSON feed and HTML listing parsing
//! - Article body extraction
//! - Keyword relevance classification
//! - The tiered, deduplicating FeedFetcher

pub mod client;
pub mod politeness;
pub mod feed;
pub mod page;
pub mod relevance;
pub mod fetcher;

pub use client::*;
pub use politeness::*;
pub use feed::*;
pub use page::*;
pub use relevance::*;
pub use fetcher::*;
