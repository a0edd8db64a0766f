//! In-process track store.
//!
//! Applies the same row rules as [`Database`](super::Database) without a
//! server. Used for dry runs and tests.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};

use super::{TrackBatch, TrackStore, TrackRow, VesselRow};
use crate::{
    errors::ImportError,
    models::{FixupReport, RawRow, TrackPoint},
};

#[derive(Debug, Default)]
struct MemoryState {
    tracks: Vec<TrackRow>,
    vessels: BTreeMap<i64, VesselRow>,
    next_vessel_id: i64,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    reject_commits: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent commit fail.
    pub fn reject_commits(&self, reject: bool) {
        self.reject_commits.store(reject, Ordering::SeqCst);
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn track_count(&self) -> usize {
        self.state().tracks.len()
    }

    pub fn vessel_count(&self) -> usize {
        self.state().vessels.len()
    }

    pub fn vessel(&self, id: i64) -> Option<VesselRow> {
        self.state().vessels.get(&id).cloned()
    }

    /// Tracks of one vessel in insertion order
    pub fn tracks(&self, vessel_id: i64) -> Vec<TrackRow> {
        self.state()
            .tracks
            .iter()
            .filter(|t| t.vessel_id == vessel_id)
            .cloned()
            .collect()
    }
}

impl TrackStore for MemoryStore {
    type Batch = MemoryBatch;

    async fn begin(&self) -> Result<MemoryBatch, ImportError> {
        Ok(MemoryBatch {
            store: self.clone(),
            points: Vec::new(),
        })
    }

    async fn fixup(&self) -> FixupReport {
        let mut state = self.state();
        let MemoryState {
            tracks,
            vessels,
            next_vessel_id,
        } = &mut *state;

        let mut earliest: BTreeMap<i64, DateTime<Utc>> = BTreeMap::new();
        for track in tracks.iter() {
            earliest
                .entry(track.vessel_id)
                .and_modify(|t| *t = (*t).min(track.time))
                .or_insert(track.time);
        }
        for vessel in vessels.values_mut() {
            if let Some(time) = earliest.get(&vessel.id) {
                vessel.created_at = *time;
            }
        }

        let mut failures = Vec::new();
        let max_id = vessels.keys().next_back().copied().unwrap_or(0);
        let next = match max_id.checked_add(1) {
            Some(next) => {
                *next_vessel_id = next;
                Some(next)
            }
            None => {
                failures.push(format!("vessel id sequence exhausted at {max_id}"));
                None
            }
        };

        FixupReport {
            vessels_updated: Some(vessels.len() as u64),
            next_vessel_id: next,
            failures,
        }
    }
}

/// Rows buffered until commit
#[derive(Debug)]
pub struct MemoryBatch {
    store: MemoryStore,
    points: Vec<TrackPoint>,
}

impl TrackBatch for MemoryBatch {
    async fn push(&mut self, row: &RawRow) -> Result<(), ImportError> {
        self.points.push(TrackPoint::try_from(row)?);
        Ok(())
    }

    async fn commit(self) -> Result<u64, ImportError> {
        if self.store.reject_commits.load(Ordering::SeqCst) {
            return Err(ImportError::StorageError("commit rejected".to_string()));
        }

        let now = Utc::now();
        let mut state = self.store.state();
        for point in &self.points {
            state.tracks.push(TrackRow {
                vessel_id: point.vessel_id.value(),
                time: point.time,
                lon: point.lon,
                lat: point.lat,
            });
            state
                .vessels
                .entry(point.vessel_id.value())
                .or_insert_with(|| VesselRow {
                    id: point.vessel_id.value(),
                    name: point.vessel_name.clone(),
                    created_at: now,
                });
        }
        Ok(self.points.len() as u64)
    }
}
