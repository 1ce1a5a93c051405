//! Topical relevance classification
//!
//! Deterministic keyword heuristic over headline + summary. An item is
//! relevant with one strong term, or with two distinct weak terms.

use regex::Regex;
use std::collections::HashSet;

/// Terms that on their own indicate a violent incident
const STRONG_TERMS: &[&str] = &[
    "killed", "kill", "kills", "killing", "killings", "murdered", "massacre", "gunmen",
    "bandits", "abducted", "abduction", "kidnapped", "kidnap", "kidnappers", "insurgents",
    "boko haram", "iswap", "militia", "suicide bomber", "explosion", "bomb", "ied",
    "shot dead", "beheaded", "ambush", "ambushed", "razed", "fatalities", "death toll",
];

/// Terms that need corroboration
const WEAK_TERMS: &[&str] = &[
    "attack", "attacked", "attacks", "clash", "clashes", "violence", "herders", "farmers",
    "police", "troops", "army", "villagers", "community", "raid", "injured", "wounded",
    "gunshot", "security", "terrorists", "hostage", "rescued", "crisis",
];

/// Result of classifying one item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelevanceVerdict {
    pub relevant: bool,
    pub strong_hits: usize,
    pub weak_hits: usize,
}

/// Keyword relevance classifier
#[derive(Debug, Clone)]
pub struct RelevanceClassifier {
    strong: Regex,
    weak: Regex,
}

impl RelevanceClassifier {
    pub fn new() -> Self {
        Self::with_extra_keywords(&[])
    }

    /// Classifier with additional strong terms from configuration
    pub fn with_extra_keywords(extra: &[String]) -> Self {
        let mut strong: Vec<String> = STRONG_TERMS.iter().map(|t| regex::escape(t)).collect();
        strong.extend(
            extra
                .iter()
                .map(|t| t.trim().to_lowercase())
                .filter(|t| !t.is_empty())
                .map(|t| regex::escape(&t)),
        );
        let weak: Vec<String> = WEAK_TERMS.iter().map(|t| regex::escape(t)).collect();

        Self {
            strong: build_alternation(&strong),
            weak: build_alternation(&weak),
        }
    }

    pub fn classify(&self, title: &str, summary: &str) -> RelevanceVerdict {
        let haystack = format!("{} {}", title, summary).to_lowercase();
        let strong_hits = distinct_matches(&self.strong, &haystack);
        let weak_hits = distinct_matches(&self.weak, &haystack);

        RelevanceVerdict {
            relevant: strong_hits >= 1 || weak_hits >= 2,
            strong_hits,
            weak_hits,
        }
    }

    pub fn is_relevant(&self, title: &str, summary: &str) -> bool {
        self.classify(title, summary).relevant
    }
}

impl Default for RelevanceClassifier {
    fn default() -> Self {
        Self::new()
    }
}

fn build_alternation(terms: &[String]) -> Regex {
    Regex::new(&format!(r"\b(?:{})\b", terms.join("|")))
        .expect("escaped terms form a valid pattern")
}

fn distinct_matches(re: &Regex, haystack: &str) -> usize {
    re.find_iter(haystack)
        .map(|m| m.as_str())
        .collect::<HashSet<_>>()
        .len()
}
