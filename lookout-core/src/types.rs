//! Records that flow through the ingestion pipeline
//!
//! FeedFetcher produces [`Article`]s, the Extractor turns them into
//! [`ExtractedEvent`]s, the Geocoder attaches a [`GeocodeResult`] and the
//! QualityRecorder emits [`QualitySample`]s.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A candidate news article produced by the fetcher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    /// Canonical article URL
    pub url: String,
    /// Headline
    pub title: String,
    /// Feed summary (always present, may be empty)
    pub summary: String,
    /// Body text; falls back to the summary when the page could not be fetched
    pub content: String,
    /// Configured name of the source this came from
    pub source: String,
    /// Publication timestamp, when the feed carries one
    pub published: Option<DateTime<Utc>>,
    /// Stable dedup key
    pub guid: String,
    /// Whether the full article page was retrieved
    pub fetch_succeeded: bool,
    /// Keyword classifier verdict on title + summary
    pub relevant: bool,
}

impl Article {
    /// Lightweight reference carried by extracted events
    pub fn reference(&self) -> ArticleRef {
        ArticleRef {
            guid: self.guid.clone(),
            url: self.url.clone(),
            source: self.source.clone(),
            title: self.title.clone(),
        }
    }
}

/// Pointer from an event back to the article it was extracted from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleRef {
    pub guid: String,
    pub url: String,
    pub source: String,
    pub title: String,
}

/// Kind of violent incident
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    ArmedAttack,
    Kidnapping,
    Bombing,
    CommunalClash,
    Banditry,
    Insurgency,
    Protest,
    Other,
}

impl EventType {
    /// Lenient parse of a model-provided label
    pub fn from_label(label: &str) -> Self {
        let key: String = label
            .trim()
            .to_lowercase()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();

        match key.as_str() {
            "armed_attack" | "attack" | "shooting" | "gun_attack" => Self::ArmedAttack,
            "kidnapping" | "abduction" => Self::Kidnapping,
            "bombing" | "explosion" | "ied" | "suicide_bombing" => Self::Bombing,
            "communal_clash" | "clash" | "farmer_herder_clash" => Self::CommunalClash,
            "banditry" | "bandit_attack" | "cattle_rustling" => Self::Banditry,
            "insurgency" | "insurgent_attack" | "terrorism" => Self::Insurgency,
            "protest" | "riot" => Self::Protest,
            _ => Self::Other,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ArmedAttack => "armed_attack",
            Self::Kidnapping => "kidnapping",
            Self::Bombing => "bombing",
            Self::CommunalClash => "communal_clash",
            Self::Banditry => "banditry",
            Self::Insurgency => "insurgency",
            Self::Protest => "protest",
            Self::Other => "other",
        };
        f.write_str(s)
    }
}

/// A validated incident record extracted from one article
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedEvent {
    pub article: ArticleRef,
    pub state: String,
    pub lga: String,
    pub settlement: Option<String>,
    pub event_type: EventType,
    pub actors: Vec<String>,
    pub fatalities: u32,
    pub injuries: u32,
    /// Model confidence in [0, 1]
    pub confidence: f64,
    /// Raw model response for audit
    pub raw_response: String,
}

/// Granularity at which a geocode lookup succeeded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Resolution {
    Settlement,
    Lga,
    StateFallback,
    Unresolved,
}

impl Resolution {
    pub fn is_resolved(&self) -> bool {
        !matches!(self, Self::Unresolved)
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Settlement => "settlement",
            Self::Lga => "lga",
            Self::StateFallback => "state-fallback",
            Self::Unresolved => "unresolved",
        };
        f.write_str(s)
    }
}

/// Outcome of a gazetteer lookup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeocodeResult {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub resolution: Resolution,
    /// Normalized `state/lga[/settlement]` key that matched
    pub matched_key: Option<String>,
}

impl GeocodeResult {
    pub fn resolved(lat: f64, lon: f64, resolution: Resolution, key: String) -> Self {
        Self {
            latitude: Some(lat),
            longitude: Some(lon),
            resolution,
            matched_key: Some(key),
        }
    }

    pub fn unresolved() -> Self {
        Self {
            latitude: None,
            longitude: None,
            resolution: Resolution::Unresolved,
            matched_key: None,
        }
    }
}

/// Pipeline stage a quality sample describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Fetching,
    Extraction,
    Geocoding,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Fetching, Stage::Extraction, Stage::Geocoding];
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Fetching => "fetching",
            Self::Extraction => "extraction",
            Self::Geocoding => "geocoding",
        };
        f.write_str(s)
    }
}

/// Health classification derived from a success rate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Error,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Healthy => "healthy",
            Self::Warning => "warning",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// Immutable health snapshot for one stage over one window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualitySample {
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub stage: Stage,
    pub attempts: u64,
    pub successes: u64,
    pub success_rate: f64,
    pub status: HealthStatus,
}
