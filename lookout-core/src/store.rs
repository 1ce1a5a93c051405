//! Persistence interface consumed by the pipeline
//!
//! The pipeline only needs append / mark / record / query. Storage engines
//! live behind [`EventStore`]. This module provides an in-memory store for
//! tests and dry runs plus a single-document JSON file store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex as WriteLock;
use tracing::debug;
use uuid::Uuid;

use crate::{ExtractedEvent, GeocodeResult, QualitySample};

/// Identifier assigned by the store on append
pub type EventId = Uuid;

/// Persistence faults; terminal for a run
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store format error: {0}")]
    Format(#[from] serde_json::Error),

    #[error("Unknown event id: {0}")]
    NotFound(EventId),
}

/// An event as held by a store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub id: EventId,
    pub event: ExtractedEvent,
    pub geocode: Option<GeocodeResult>,
    pub recorded_at: DateTime<Utc>,
    /// Last time a geocode result was marked, resolved or not
    #[serde(default)]
    pub geocode_attempted_at: Option<DateTime<Utc>>,
}

impl StoredEvent {
    pub fn missing_coordinates(&self) -> bool {
        self.geocode
            .as_ref()
            .map_or(true, |g| g.latitude.is_none() || g.longitude.is_none())
    }
}

/// Storage contract; at-least-once append semantics
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn append_event(&self, event: &ExtractedEvent) -> Result<EventId, StoreError>;

    async fn mark_geocode(&self, id: EventId, result: &GeocodeResult) -> Result<(), StoreError>;

    async fn record_quality_sample(&self, sample: &QualitySample) -> Result<(), StoreError>;

    /// Events lacking coordinates, least recently attempted first: never
    /// attempted events lead in insertion order, so repeated passes rotate
    /// past events that cannot resolve.
    async fn query_events_missing_coordinates(
        &self,
        limit: usize,
    ) -> Result<Vec<StoredEvent>, StoreError>;
}

/// Thread-safe reference to a store
pub type SharedStore = Arc<dyn EventStore>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreState {
    events: Vec<StoredEvent>,
    samples: Vec<QualitySample>,
}

impl StoreState {
    fn append(&mut self, event: &ExtractedEvent) -> EventId {
        let id = Uuid::new_v4();
        self.events.push(StoredEvent {
            id,
            event: event.clone(),
            geocode: None,
            recorded_at: Utc::now(),
            geocode_attempted_at: None,
        });
        id
    }

    fn mark(&mut self, id: EventId, result: &GeocodeResult) -> Result<(), StoreError> {
        let stored = self
            .events
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or(StoreError::NotFound(id))?;
        stored.geocode = Some(result.clone());
        stored.geocode_attempted_at = Some(Utc::now());
        Ok(())
    }

    fn missing(&self, limit: usize) -> Vec<StoredEvent> {
        let mut pending: Vec<&StoredEvent> =
            self.events.iter().filter(|e| e.missing_coordinates()).collect();
        // Stable: ties keep insertion order
        pending.sort_by_key(|e| e.geocode_attempted_at);
        pending.into_iter().take(limit).cloned().collect()
    }
}

/// In-memory store
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<StoredEvent> {
        self.state.lock().events.clone()
    }

    pub fn samples(&self) -> Vec<QualitySample> {
        self.state.lock().samples.clone()
    }
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn append_event(&self, event: &ExtractedEvent) -> Result<EventId, StoreError> {
        Ok(self.state.lock().append(event))
    }

    async fn mark_geocode(&self, id: EventId, result: &GeocodeResult) -> Result<(), StoreError> {
        self.state.lock().mark(id, result)
    }

    async fn record_quality_sample(&self, sample: &QualitySample) -> Result<(), StoreError> {
        self.state.lock().samples.push(sample.clone());
        Ok(())
    }

    async fn query_events_missing_coordinates(
        &self,
        limit: usize,
    ) -> Result<Vec<StoredEvent>, StoreError> {
        Ok(self.state.lock().missing(limit))
    }
}

/// Whole-document JSON store, rewritten atomically on every change.
///
/// Writes go through `tokio::fs` and are serialized by a write lock held
/// from mutation to rename, so documents land on disk in mutation order.
/// If a write fails the in-memory state stays ahead of the file until the
/// next successful write.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    state: Mutex<StoreState>,
    writer: WriteLock<()>,
}

impl JsonFileStore {
    /// Open (or start) the store at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let state = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            serde_json::from_str(&content)?
        } else {
            StoreState::default()
        };
        debug!(
            "Opened store {} ({} events, {} samples)",
            path.display(),
            state.events.len(),
            state.samples.len()
        );
        Ok(Self {
            path,
            state: Mutex::new(state),
            writer: WriteLock::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn event_count(&self) -> usize {
        self.state.lock().events.len()
    }

    async fn write_document(&self, document: Vec<u8>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, document).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    async fn update<T>(
        &self,
        apply: impl FnOnce(&mut StoreState) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let _writer = self.writer.lock().await;
        let (value, document) = {
            let mut state = self.state.lock();
            let value = apply(&mut state)?;
            (value, serde_json::to_vec_pretty(&*state)?)
        };
        self.write_document(document).await?;
        Ok(value)
    }
}

#[async_trait]
impl EventStore for JsonFileStore {
    async fn append_event(&self, event: &ExtractedEvent) -> Result<EventId, StoreError> {
        self.update(|state| Ok(state.append(event))).await
    }

    async fn mark_geocode(&self, id: EventId, result: &GeocodeResult) -> Result<(), StoreError> {
        self.update(|state| state.mark(id, result)).await
    }

    async fn record_quality_sample(&self, sample: &QualitySample) -> Result<(), StoreError> {
        self.update(|state| {
            state.samples.push(sample.clone());
            Ok(())
        })
        .await
    }

    async fn query_events_missing_coordinates(
        &self,
        limit: usize,
    ) -> Result<Vec<StoredEvent>, StoreError> {
        Ok(self.state.lock().missing(limit))
    }
}
