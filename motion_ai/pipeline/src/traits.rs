//! Detector interfaces shared by the motion and presence paths
//!
//! SPDX-License-Identifier: GPL-3.0-or-later

use crate::motion::detector::MotionOutcome;
use crate::zone::Rect;
use image::RgbImage;
use thiserror::Error;

/// A detector fault. Faults are transient: the caller resets the detector and
/// moves on to the next frame.
#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("crop has no pixels ({0}x{1})")]
    EmptyCrop(u32, u32),
    #[error("image shape changed from {expected:?} to {actual:?}")]
    ShapeMismatch {
        expected: (u32, u32),
        actual: (u32, u32),
    },
    #[error("buffer error: {0}")]
    Buffer(String),
}

/// Frame-differencing style detector over successive crops of one zone.
pub trait MotionDetector: Send {
    fn analyze(&mut self, crop: &RgbImage) -> Result<MotionOutcome, DetectorError>;

    /// Drops any per-zone state so the next crop seeds a fresh baseline.
    fn reset(&mut self);
}

/// Finds people in a crop; returns one box per detection in crop coordinates.
pub trait PresenceDetector: Send {
    fn detect(&mut self, crop: &RgbImage) -> Result<Vec<Rect>, DetectorError>;

    fn reset(&mut self) {}
}
