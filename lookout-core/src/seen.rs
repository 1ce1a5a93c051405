//! Cross-run deduplication of feed entries
//!
//! The set only grows during a run. Persisting it is an explicit call made by
//! the orchestrator; inserts never touch disk.

use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;
use tracing::debug;
use url::Url;

/// Errors loading or saving the seen set
#[derive(Debug, Error)]
pub enum SeenSetError {
    #[error("Seen set I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Seen set is not valid JSON: {0}")]
    Format(#[from] serde_json::Error),
}

/// Process-wide set of already processed GUIDs
#[derive(Debug, Default)]
pub struct SeenGuidSet {
    guids: Mutex<HashSet<String>>,
}

impl SeenGuidSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_guids<I, S>(guids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            guids: Mutex::new(guids.into_iter().map(Into::into).collect()),
        }
    }

    /// Load from a JSON array file; a missing file is an empty set
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, SeenSetError> {
        let path = path.as_ref();
        if !path.exists() {
            debug!("No seen set at {}, starting empty", path.display());
            return Ok(Self::new());
        }
        let content = std::fs::read_to_string(path)?;
        let guids: Vec<String> = serde_json::from_str(&content)?;
        debug!("Loaded {} seen guids from {}", guids.len(), path.display());
        Ok(Self::from_guids(guids))
    }

    /// Write the set as a sorted JSON array, replacing the file atomically
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), SeenSetError> {
        let path = path.as_ref();
        let mut guids: Vec<String> = self.guids.lock().iter().cloned().collect();
        guids.sort();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(&guids)?)?;
        std::fs::rename(&tmp, path)?;
        debug!("Saved {} seen guids to {}", guids.len(), path.display());
        Ok(())
    }

    /// Insert a guid; returns false when it was already present
    pub fn insert(&self, guid: &str) -> bool {
        self.guids.lock().insert(guid.to_string())
    }

    pub fn contains(&self, guid: &str) -> bool {
        self.guids.lock().contains(guid)
    }

    pub fn len(&self) -> usize {
        self.guids.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.guids.lock().is_empty()
    }
}

/// Stable GUID for entries without a source-provided identifier
///
/// Scheme and host are case-folded by URL parsing; path and query keep their
/// case. The fragment and a trailing slash are ignored.
pub fn derive_guid(url: &str) -> String {
    let trimmed = url.trim();
    let normalized = match Url::parse(trimmed) {
        Ok(mut parsed) => {
            parsed.set_fragment(None);
            parsed.to_string().trim_end_matches('/').to_string()
        }
        Err(_) => trimmed.trim_end_matches('/').to_string(),
    };
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    format!("url:{}", &format!("{:x}", hasher.finalize())[..32])
}
