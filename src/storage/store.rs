use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};

/// Latest reported snapshot of one camera.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraRecord {
    pub latitude: f64,
    pub longitude: f64,
    pub people_count: i64,
}

/// Body of `POST /update_count`. Unknown fields are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraUpdate {
    pub camera_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub people_count: i64,
}

impl CameraUpdate {
    pub fn record(&self) -> CameraRecord {
        CameraRecord {
            latitude: self.latitude,
            longitude: self.longitude,
            people_count: self.people_count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CrowdSummary {
    pub camera_count: usize,
    pub total_people: i64,
    pub crowd_threshold: i64,
    pub over_threshold: bool,
    pub location: Option<Location>,
}

/// Latest record per camera id. Clones share the same map.
pub struct CameraStore {
    cameras: Arc<RwLock<HashMap<String, CameraRecord>>>,
}

impl CameraStore {
    pub fn new() -> Self {
        Self {
            cameras: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    // Every write is a single insert, so a poisoned map is still consistent.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, CameraRecord>> {
        self.cameras.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, CameraRecord>> {
        self.cameras.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replaces whatever was stored for `update.camera_id` and returns the new record.
    pub fn update(&self, update: CameraUpdate) -> CameraRecord {
        let record = update.record();

        tracing::debug!(
            camera = %update.camera_id,
            latitude = update.latitude,
            longitude = update.longitude,
            people = update.people_count,
            "camera update"
        );

        self.write().insert(update.camera_id, record);
        record
    }

    pub fn list_all(&self) -> BTreeMap<String, CameraRecord> {
        self.read()
            .iter()
            .map(|(id, record)| (id.clone(), *record))
            .collect()
    }

    pub fn get(&self, camera_id: &str) -> Option<CameraRecord> {
        self.read().get(camera_id).copied()
    }

    pub fn summary(&self, crowd_threshold: i64) -> CrowdSummary {
        let cameras = self.list_all();
        // Counts are unchecked client input; clamp instead of overflowing.
        let total_people = cameras
            .values()
            .fold(0i64, |acc, r| acc.saturating_add(r.people_count));
        let location = cameras.values().next().map(|r| Location {
            latitude: r.latitude,
            longitude: r.longitude,
        });

        CrowdSummary {
            camera_count: cameras.len(),
            total_people,
            crowd_threshold,
            over_threshold: total_people > crowd_threshold,
            location,
        }
    }
}

impl Default for CameraStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for CameraStore {
    fn clone(&self) -> Self {
        Self {
            cameras: Arc::clone(&self.cameras),
        }
    }
}
