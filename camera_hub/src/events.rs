//! Alert events published by camera workers
//!
//! SPDX-License-Identifier: GPL-3.0-or-later

use chrono::{DateTime, Utc};
use secureeye_motion_ai::motion::detector::MotionDetection;
use secureeye_motion_ai::presence::PresenceDetection;
use secureeye_motion_ai::zone::Zone;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use std::time::SystemTime;

/// Caller-chosen camera identifier, unique among running workers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CameraId(String);

impl CameraId {
    pub fn new(id: impl Into<String>) -> Self {
        CameraId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CameraId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for CameraId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CameraId {
    fn from(id: &str) -> Self {
        CameraId::new(id)
    }
}

impl From<String> for CameraId {
    fn from(id: String) -> Self {
        CameraId(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionKind {
    Motion,
    Presence,
}

impl DetectionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionKind::Motion => "motion",
            DetectionKind::Presence => "presence",
        }
    }
}

impl fmt::Display for DetectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionEvent {
    pub camera_id: CameraId,
    pub kind: DetectionKind,
    pub count: u32,
    pub confidence: f32,
    /// The clamped zone the detection was made in.
    pub zone: Zone,
    pub motion_area: u64,
    /// When the frame that triggered the detection was captured.
    pub timestamp: DateTime<Utc>,
}

impl DetectionEvent {
    pub fn motion(
        camera_id: CameraId,
        zone: Zone,
        detection: &MotionDetection,
        captured_at: SystemTime,
    ) -> Self {
        DetectionEvent {
            camera_id,
            kind: DetectionKind::Motion,
            count: detection.count,
            confidence: detection.confidence,
            zone,
            motion_area: detection.area,
            timestamp: captured_at.into(),
        }
    }

    pub fn presence(
        camera_id: CameraId,
        zone: Zone,
        detection: &PresenceDetection,
        captured_at: SystemTime,
    ) -> Self {
        DetectionEvent {
            camera_id,
            kind: DetectionKind::Presence,
            count: detection.count,
            confidence: detection.confidence,
            zone,
            motion_area: detection.area,
            timestamp: captured_at.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CameraFault {
    /// Too many consecutive frame reads failed.
    CameraUnresponsive,
    /// The stream source could not be opened.
    OpenFailed,
}

impl CameraFault {
    pub fn as_str(&self) -> &'static str {
        match self {
            CameraFault::CameraUnresponsive => "camera-unresponsive",
            CameraFault::OpenFailed => "open-failed",
        }
    }
}

impl fmt::Display for CameraFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraErrorEvent {
    pub camera_id: CameraId,
    pub error: CameraFault,
    pub timestamp: DateTime<Utc>,
}

impl CameraErrorEvent {
    pub fn new(camera_id: CameraId, error: CameraFault) -> Self {
        CameraErrorEvent {
            camera_id,
            error,
            timestamp: Utc::now(),
        }
    }
}

/// Everything a worker can push to an [`AlertSink`](crate::traits::AlertSink).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AlertEvent {
    Detection(DetectionEvent),
    CameraError(CameraErrorEvent),
}

impl AlertEvent {
    pub fn camera_id(&self) -> &CameraId {
        match self {
            AlertEvent::Detection(d) => &d.camera_id,
            AlertEvent::CameraError(e) => &e.camera_id,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
