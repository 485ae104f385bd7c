//! Per-camera zone table shared between the supervisor and its workers
//!
//! SPDX-License-Identifier: GPL-3.0-or-later

use crate::events::CameraId;
use secureeye_motion_ai::zone::Zone;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Zones keyed by camera. A zone may be set before its camera starts.
#[derive(Default)]
pub struct ZoneStore {
    zones: Mutex<HashMap<CameraId, Zone>>,
}

impl ZoneStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the camera's zone, returning the previous one.
    pub fn set(&self, camera_id: &CameraId, zone: Zone) -> Option<Zone> {
        self.lock().insert(camera_id.clone(), zone)
    }

    pub fn get(&self, camera_id: &CameraId) -> Option<Zone> {
        self.lock().get(camera_id).copied()
    }

    pub fn clear(&self, camera_id: &CameraId) -> Option<Zone> {
        self.lock().remove(camera_id)
    }

    /// Read-only handle for the worker of `camera_id`.
    pub fn reader(self: &Arc<Self>, camera_id: CameraId) -> ZoneReader {
        ZoneReader {
            store: Arc::clone(self),
            camera_id,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<CameraId, Zone>> {
        // The map is always left consistent, so a poisoned lock is still usable.
        self.zones.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A worker's view of its own zone.
#[derive(Clone)]
pub struct ZoneReader {
    store: Arc<ZoneStore>,
    camera_id: CameraId,
}

impl ZoneReader {
    /// Snapshot of the zone right now; never a partially updated value.
    pub fn current(&self) -> Option<Zone> {
        self.store.get(&self.camera_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reader_sees_updates_for_its_camera_only() {
        let store = Arc::new(ZoneStore::new());
        let reader = store.reader(CameraId::new("front"));
        assert_eq!(reader.current(), None);

        store.set(&CameraId::new("back"), Zone::new(0, 0, 10, 10));
        assert_eq!(reader.current(), None);

        store.set(&CameraId::new("front"), Zone::new(1, 2, 3, 4));
        assert_eq!(reader.current(), Some(Zone::new(1, 2, 3, 4)));

        let previous = store.set(&CameraId::new("front"), Zone::new(5, 5, 50, 50));
        assert_eq!(previous, Some(Zone::new(1, 2, 3, 4)));
        assert_eq!(reader.current(), Some(Zone::new(5, 5, 50, 50)));

        store.clear(&CameraId::new("front"));
        assert_eq!(reader.current(), None);
    }
}
