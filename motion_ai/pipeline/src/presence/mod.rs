//! Secondary person-presence check run on a subset of frames
//!
//! SPDX-License-Identifier: GPL-3.0-or-later

pub mod combined;
pub mod shape;

pub use combined::CombinedPresenceDetector;
pub use shape::{BodyProfile, ShapePresenceDetector};

use crate::config::PRESENCE_CONFIDENCE_STEP;
use crate::traits::{DetectorError, PresenceDetector};
use crate::zone::Rect;
use image::RgbImage;

/// People found in one crop.
#[derive(Debug, Clone, PartialEq)]
pub struct PresenceDetection {
    pub count: u32,
    pub boxes: Vec<Rect>,
    /// Summed box area, in pixels.
    pub area: u64,
    pub confidence: f32,
}

/// Runs a [`PresenceDetector`] on every `every`th frame and scores its output.
pub struct PresenceAnalyzer {
    detector: Box<dyn PresenceDetector>,
    every: u32,
}

impl PresenceAnalyzer {
    pub fn new(detector: Box<dyn PresenceDetector>, every: u32) -> Self {
        PresenceAnalyzer {
            detector,
            every: every.max(1),
        }
    }

    /// The standard full-body plus upper-body shape detector.
    pub fn people(every: u32) -> Self {
        Self::new(
            Box::new(CombinedPresenceDetector::new(
                ShapePresenceDetector::new(BodyProfile::FULL_BODY),
                ShapePresenceDetector::new(BodyProfile::UPPER_BODY),
            )),
            every,
        )
    }

    /// Whether the frame with 1-based index `frame_index` should be checked.
    pub fn is_due(&self, frame_index: u64) -> bool {
        frame_index % self.every as u64 == 0
    }

    pub fn analyze(&mut self, crop: &RgbImage) -> Result<Option<PresenceDetection>, DetectorError> {
        let boxes = self.detector.detect(crop)?;
        if boxes.is_empty() {
            return Ok(None);
        }

        let count = boxes.len() as u32;
        Ok(Some(PresenceDetection {
            count,
            area: boxes.iter().map(Rect::area).sum(),
            confidence: presence_confidence(count),
            boxes,
        }))
    }

    pub fn reset(&mut self) {
        self.detector.reset();
    }
}

/// 0.3 per detection, capped at 1.0.
pub fn presence_confidence(count: u32) -> f32 {
    (count as f32 * PRESENCE_CONFIDENCE_STEP).min(1.0)
}
