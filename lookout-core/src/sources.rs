//! News source registry and tiered fetch plans
//!
//! Sources are grouped into latency/reliability tiers. A [`FetchPlan`] is the
//! explicit, ordered list of tiers a run will walk, fastest first.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse grouping of sources by expected fetch latency/reliability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Fast = 1,
    Standard = 2,
    Slow = 3,
}

impl Tier {
    pub fn priority(&self) -> u8 {
        *self as u8
    }

    pub fn from_priority(priority: u8) -> Option<Self> {
        match priority {
            1 => Some(Self::Fast),
            2 => Some(Self::Standard),
            3 => Some(Self::Slow),
            _ => None,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Fast => "fast",
            Self::Standard => "standard",
            Self::Slow => "slow",
        };
        f.write_str(s)
    }
}

/// How a source publishes its items
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// RSS, Atom or JSON feed
    #[default]
    Feed,
    /// HTML listing page with headline links
    Page,
}

/// A configured news source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Human-readable name
    pub name: String,
    /// Fetch tier
    pub tier: Tier,
    /// Feed or listing page URL
    pub url: String,
    #[serde(default)]
    pub kind: SourceKind,
    /// Inactive sources are never fetched
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

/// Built-in source table: (name, tier, url, kind)
static DEFAULT_SOURCES: &[(&str, Tier, &str, SourceKind)] = &[
    ("Premium Times", Tier::Fast, "https://www.premiumtimesng.com/feed", SourceKind::Feed),
    ("Punch", Tier::Fast, "https://punchng.com/feed/", SourceKind::Feed),
    ("Vanguard", Tier::Fast, "https://www.vanguardngr.com/feed/", SourceKind::Feed),
    ("Daily Trust", Tier::Standard, "https://dailytrust.com/feed/", SourceKind::Feed),
    ("The Cable", Tier::Standard, "https://www.thecable.ng/feed", SourceKind::Feed),
    ("Channels TV", Tier::Standard, "https://www.channelstv.com/feed/", SourceKind::Feed),
    ("Sahara Reporters", Tier::Slow, "https://saharareporters.com/articles/rss-feed", SourceKind::Feed),
    ("HumAngle", Tier::Slow, "https://humanglemedia.com/feed/", SourceKind::Feed),
    ("Leadership", Tier::Slow, "https://leadership.ng/category/news/", SourceKind::Page),
];

/// The built-in registry, used when the configuration lists no sources
pub fn default_sources() -> Vec<SourceConfig> {
    DEFAULT_SOURCES
        .iter()
        .map(|(name, tier, url, kind)| SourceConfig {
            name: name.to_string(),
            tier: *tier,
            url: url.to_string(),
            kind: *kind,
            active: true,
        })
        .collect()
}

/// One tier's worth of sources
#[derive(Debug, Clone)]
pub struct TierGroup {
    pub tier: Tier,
    pub sources: Vec<SourceConfig>,
}

/// Ordered list of tiers to fetch, fastest first
#[derive(Debug, Clone, Default)]
pub struct FetchPlan {
    tiers: Vec<TierGroup>,
}

impl FetchPlan {
    /// Build a plan from active sources whose tier is at most `max_tier`.
    /// Source order inside a tier follows configuration order.
    pub fn new(sources: &[SourceConfig], max_tier: Tier) -> Self {
        let mut tiers: Vec<TierGroup> = Vec::new();

        for tier in [Tier::Fast, Tier::Standard, Tier::Slow] {
            if tier > max_tier {
                break;
            }
            let members: Vec<SourceConfig> = sources
                .iter()
                .filter(|s| s.active && s.tier == tier)
                .cloned()
                .collect();
            if !members.is_empty() {
                tiers.push(TierGroup {
                    tier,
                    sources: members,
                });
            }
        }

        Self { tiers }
    }

    pub fn tiers(&self) -> &[TierGroup] {
        &self.tiers
    }

    pub fn source_count(&self) -> usize {
        self.tiers.iter().map(|t| t.sources.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(name: &str, tier: Tier, active: bool) -> SourceConfig {
        SourceConfig {
            name: name.to_string(),
            tier,
            url: format!("https://{}.example/feed", name),
            kind: SourceKind::Feed,
            active,
        }
    }

    #[test]
    fn test_plan_orders_tiers_fastest_first() {
        let sources = vec![
            source("slow", Tier::Slow, true),
            source("fast", Tier::Fast, true),
            source("standard", Tier::Standard, true),
        ];

        let plan = FetchPlan::new(&sources, Tier::Slow);
        let order: Vec<Tier> = plan.tiers().iter().map(|t| t.tier).collect();
        assert_eq!(order, vec![Tier::Fast, Tier::Standard, Tier::Slow]);
        assert_eq!(plan.source_count(), 3);
    }

    #[test]
    fn test_plan_respects_max_tier_and_active_flag() {
        let sources = vec![
            source("a", Tier::Fast, true),
            source("b", Tier::Fast, false),
            source("c", Tier::Standard, true),
        ];

        let plan = FetchPlan::new(&sources, Tier::Fast);
        assert_eq!(plan.tiers().len(), 1);
        assert_eq!(plan.tiers()[0].sources.len(), 1);
        assert_eq!(plan.tiers()[0].sources[0].name, "a");
    }

    #[test]
    fn test_default_sources() {
        let sources = default_sources();
        assert!(sources.len() >= 6);
        assert!(sources.iter().any(|s| s.tier == Tier::Fast));
        assert_eq!(Tier::from_priority(2), Some(Tier::Standard));
        assert_eq!(Tier::from_priority(9), None);
    }
}
