//! Gazetteer geocoding with layered fallback
//!
//! Lookup precedence for `(state, lga, settlement)`:
//! 1. settlement within the given state/LGA
//! 2. LGA centroid within the given state
//! 3. state fallback: centroid of the state's first LGA in lexical order
//! 4. unresolved (unknown state or empty input)
//!
//! Every step is a map lookup; no live geocoding service is ever consulted.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tracing::{debug, trace};

use crate::{GeocodeResult, Resolution};

const EMBEDDED_GAZETTEER: &str = include_str!("../data/gazetteer.json");

/// Errors loading reference data
#[derive(Debug, Error)]
pub enum GazetteerError {
    #[error("Gazetteer I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Gazetteer is not valid JSON: {0}")]
    Format(#[from] serde_json::Error),

    #[error("Gazetteer has no states")]
    Empty,
}

#[derive(Debug, Deserialize)]
struct RawGazetteer {
    states: Vec<RawState>,
}

#[derive(Debug, Deserialize)]
struct RawState {
    name: String,
    lgas: Vec<RawLga>,
}

#[derive(Debug, Deserialize)]
struct RawLga {
    name: String,
    lat: f64,
    lon: f64,
    #[serde(default)]
    settlements: Vec<RawPoint>,
}

#[derive(Debug, Deserialize)]
struct RawPoint {
    name: String,
    lat: f64,
    lon: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Point {
    lat: f64,
    lon: f64,
}

#[derive(Debug)]
struct LgaEntry {
    centroid: Point,
    settlements: BTreeMap<String, Point>,
}

#[derive(Debug)]
struct StateEntry {
    lgas: BTreeMap<String, LgaEntry>,
}

/// Read-only state -> LGA -> settlement reference table
#[derive(Debug)]
pub struct Gazetteer {
    states: BTreeMap<String, StateEntry>,
}

impl Gazetteer {
    /// The table compiled into the binary
    pub fn embedded() -> Result<Self, GazetteerError> {
        Self::from_json(EMBEDDED_GAZETTEER)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, GazetteerError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn from_json(json: &str) -> Result<Self, GazetteerError> {
        let raw: RawGazetteer = serde_json::from_str(json)?;
        let mut states = BTreeMap::new();

        for state in raw.states {
            let mut lgas = BTreeMap::new();
            for lga in state.lgas {
                let settlements = lga
                    .settlements
                    .into_iter()
                    .map(|s| (normalize_key(&s.name), Point { lat: s.lat, lon: s.lon }))
                    .collect();
                lgas.insert(
                    normalize_key(&lga.name),
                    LgaEntry {
                        centroid: Point { lat: lga.lat, lon: lga.lon },
                        settlements,
                    },
                );
            }
            // A state with no LGAs cannot anchor a fallback
            if !lgas.is_empty() {
                states.insert(normalize_key(&state.name), StateEntry { lgas });
            }
        }

        if states.is_empty() {
            return Err(GazetteerError::Empty);
        }
        Ok(Self { states })
    }

    pub fn state_count(&self) -> usize {
        self.states.len()
    }

    fn state(&self, name: &str) -> Option<(&String, &StateEntry)> {
        let key = canonical_state(&normalize_key(name));
        self.states.get_key_value(key.as_str())
    }
}

/// Normalize a place name for lookup: lowercase, punctuation folded to
/// spaces, whitespace collapsed, administrative suffixes dropped.
pub fn normalize_key(name: &str) -> String {
    let folded: String = name
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    let mut key = folded.split_whitespace().collect::<Vec<_>>().join(" ");

    for suffix in [" local government area", " local government", " lga", " state"] {
        if key.len() > suffix.len() && key.ends_with(suffix) {
            key.truncate(key.len() - suffix.len());
            break;
        }
    }
    key
}

fn canonical_state(key: &str) -> String {
    match key {
        "fct" | "abuja" | "fct abuja" | "abuja fct" => "federal capital territory".to_string(),
        "nasarawa" | "nassarawa" => "nasarawa".to_string(),
        other => other.to_string(),
    }
}

/// Attempt/success counters exposed to the quality recorder
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GeocodeStats {
    pub attempts: u64,
    pub successes: u64,
}

/// Resolves free-text locations against a [`Gazetteer`]
#[derive(Debug)]
pub struct Geocoder {
    gazetteer: Gazetteer,
    attempts: AtomicU64,
    successes: AtomicU64,
}

impl Geocoder {
    pub fn new(gazetteer: Gazetteer) -> Self {
        Self {
            gazetteer,
            attempts: AtomicU64::new(0),
            successes: AtomicU64::new(0),
        }
    }

    /// Resolve a location triple. Never fails: unknown input is `Unresolved`.
    pub fn resolve(&self, state: &str, lga: &str, settlement: Option<&str>) -> GeocodeResult {
        self.attempts.fetch_add(1, Ordering::Relaxed);

        let result = self.lookup(state, lga, settlement);
        if result.resolution.is_resolved() {
            self.successes.fetch_add(1, Ordering::Relaxed);
        }

        debug!(
            state,
            lga,
            settlement = settlement.unwrap_or(""),
            resolution = %result.resolution,
            "geocoded"
        );
        result
    }

    fn lookup(&self, state: &str, lga: &str, settlement: Option<&str>) -> GeocodeResult {
        if state.trim().is_empty() {
            return GeocodeResult::unresolved();
        }
        let Some((state_key, state_entry)) = self.gazetteer.state(state) else {
            trace!("Unknown state: {}", state);
            return GeocodeResult::unresolved();
        };

        let lga_key = normalize_key(lga);
        if let Some(lga_entry) = state_entry.lgas.get(&lga_key) {
            if let Some(settlement) = settlement {
                let settlement_key = normalize_key(settlement);
                if let Some(point) = lga_entry.settlements.get(&settlement_key) {
                    return GeocodeResult::resolved(
                        point.lat,
                        point.lon,
                        Resolution::Settlement,
                        format!("{}/{}/{}", state_key, lga_key, settlement_key),
                    );
                }
            }
            let c = lga_entry.centroid;
            return GeocodeResult::resolved(
                c.lat,
                c.lon,
                Resolution::Lga,
                format!("{}/{}", state_key, lga_key),
            );
        }

        // BTreeMap iteration is lexical, so this is deterministic
        match state_entry.lgas.iter().next() {
            Some((first_key, first)) => GeocodeResult::resolved(
                first.centroid.lat,
                first.centroid.lon,
                Resolution::StateFallback,
                format!("{}/{}", state_key, first_key),
            ),
            None => GeocodeResult::unresolved(),
        }
    }

    /// Counters since construction or the last `take_stats`
    pub fn stats(&self) -> GeocodeStats {
        GeocodeStats {
            attempts: self.attempts.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
        }
    }

    /// Read and reset the counters
    pub fn take_stats(&self) -> GeocodeStats {
        GeocodeStats {
            attempts: self.attempts.swap(0, Ordering::Relaxed),
            successes: self.successes.swap(0, Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geocoder() -> Geocoder {
        Geocoder::new(Gazetteer::embedded().unwrap())
    }

    #[test]
    fn test_settlement_match() {
        let g = geocoder();
        let r = g.resolve("Plateau", "Bokkos", Some("Mushere"));
        assert_eq!(r.resolution, Resolution::Settlement);
        assert_eq!(r.latitude, Some(9.2833));
        assert_eq!(r.longitude, Some(9.1333));
        assert_eq!(r.matched_key.as_deref(), Some("plateau/bokkos/mushere"));
    }

    #[test]
    fn test_unknown_settlement_falls_back_to_lga() {
        let g = geocoder();
        let r = g.resolve("Plateau", "Bokkos", Some("Nowhere Village"));
        assert_eq!(r.resolution, Resolution::Lga);
        assert_eq!(r.latitude, Some(9.3));
        assert_eq!(r.matched_key.as_deref(), Some("plateau/bokkos"));
    }

    #[test]
    fn test_unknown_lga_falls_back_to_first_lga_of_state() {
        let g = geocoder();
        let r = g.resolve("Plateau State", "Atlantis", None);
        assert_eq!(r.resolution, Resolution::StateFallback);
        assert_eq!(r.matched_key.as_deref(), Some("plateau/barkin ladi"));
        assert_eq!(r.latitude, Some(9.5333));
    }

    #[test]
    fn test_unknown_state_and_empty_input() {
        let g = geocoder();
        assert_eq!(g.resolve("Wakanda", "Bokkos", None).resolution, Resolution::Unresolved);
        assert_eq!(g.resolve("", "", None).resolution, Resolution::Unresolved);
        assert_eq!(g.resolve("   ", "Bokkos", Some("Mushere")).resolution, Resolution::Unresolved);
    }

    #[test]
    fn test_counters_track_attempts_and_successes() {
        let g = geocoder();
        g.resolve("Plateau", "Bokkos", Some("Mushere"));
        g.resolve("Benue", "Guma", None);
        g.resolve("Nowhere", "", None);

        assert_eq!(g.stats(), GeocodeStats { attempts: 3, successes: 2 });
        assert_eq!(g.take_stats(), GeocodeStats { attempts: 3, successes: 2 });
        assert_eq!(g.stats(), GeocodeStats::default());
    }

    #[test]
    fn test_normalization_and_aliases() {
        assert_eq!(normalize_key("  Jos-North  LGA "), "jos north");
        assert_eq!(normalize_key("Kaduna State"), "kaduna");
        let g = geocoder();
        let r = g.resolve("FCT", "Bwari", None);
        assert_eq!(r.resolution, Resolution::Lga);
        let r = g.resolve("BENUE", "guma local government area", Some("YELWATA"));
        assert_eq!(r.resolution, Resolution::Settlement);
    }

    #[test]
    fn test_total_over_arbitrary_input() {
        let g = geocoder();
        let inputs = ["", "x", "Plateau", "🙂", "state", "lga", "Borno"];
        for s in inputs {
            for l in inputs {
                for t in [None, Some(""), Some("Mushere")] {
                    let r = g.resolve(s, l, t);
                    assert_eq!(r.resolution.is_resolved(), r.latitude.is_some());
                }
            }
        }
    }

    #[test]
    fn test_empty_gazetteer_rejected() {
        assert!(matches!(
            Gazetteer::from_json(r#"{"states": []}"#),
            Err(GazetteerError::Empty)
        ));
    }
}
