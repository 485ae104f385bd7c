//! Zone motion detection by differencing successive blurred crops
//!
//! SPDX-License-Identifier: GPL-3.0-or-later

use crate::config::{
    CONFIDENCE_SCALE, DIFF_THRESHOLD, DILATE_ITERATIONS, MIN_COMPONENT_AREA,
    MIN_TOTAL_MOTION_AREA, MORPH_RADIUS, MOTION_BLUR_SIGMA,
};
use crate::motion::preprocessing;
use crate::traits::{DetectorError, MotionDetector};
use image::{GrayImage, RgbImage};
use log::debug;
use std::time::Instant;

/// A positive motion decision for one crop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionDetection {
    /// Components that passed the per-component area filter.
    pub count: u32,
    /// Summed area of those components, in pixels.
    pub area: u64,
    pub confidence: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MotionOutcome {
    /// No usable baseline existed (first crop, or the zone changed shape); this
    /// crop became the baseline.
    Seeded,
    /// Compared against the baseline but below the firing thresholds.
    Still { count: u32, area: u64 },
    Motion(MotionDetection),
}

/// Compares each crop with the previous one from the same zone.
///
/// The previous blurred crop is replaced on every call whether or not motion
/// fired, so slow drift never accumulates into a detection.
#[derive(Default)]
pub struct MotionAnalyzer {
    previous: Option<GrayImage>,
    last_detection: Option<Instant>,
}

impl MotionAnalyzer {
    pub fn new() -> Self {
        MotionAnalyzer {
            previous: None,
            last_detection: None,
        }
    }

    pub fn has_baseline(&self) -> bool {
        self.previous.is_some()
    }

    /// When motion last fired for the current zone.
    pub fn last_detection(&self) -> Option<Instant> {
        self.last_detection
    }
}

impl MotionDetector for MotionAnalyzer {
    fn analyze(&mut self, crop: &RgbImage) -> Result<MotionOutcome, DetectorError> {
        let (width, height) = crop.dimensions();
        if width == 0 || height == 0 {
            return Err(DetectorError::EmptyCrop(width, height));
        }

        let current = preprocessing::grayscale_blurred(crop, MOTION_BLUR_SIGMA);

        let previous = match self.previous.take() {
            Some(previous) if previous.dimensions() == current.dimensions() => previous,
            Some(previous) => {
                debug!(
                    "Zone reshaped from {:?} to {:?}, reseeding baseline",
                    previous.dimensions(),
                    current.dimensions()
                );
                self.previous = Some(current);
                return Ok(MotionOutcome::Seeded);
            }
            None => {
                self.previous = Some(current);
                return Ok(MotionOutcome::Seeded);
            }
        };

        let mask = preprocessing::threshold_difference(&current, &previous, DIFF_THRESHOLD);
        self.previous = Some(current);
        let mask = mask?;

        let cleaned = preprocessing::clean_mask(&mask, MORPH_RADIUS, DILATE_ITERATIONS);
        let (count, area) = preprocessing::find_blobs(&cleaned)
            .iter()
            .filter(|blob| blob.area > MIN_COMPONENT_AREA)
            .fold((0u32, 0u64), |(count, area), blob| (count + 1, area + blob.area));

        if count > 0 && area > MIN_TOTAL_MOTION_AREA {
            let confidence = motion_confidence(area, width as u64 * height as u64);
            self.last_detection = Some(Instant::now());
            debug!(
                "Motion detected: {} components, {} px, confidence {:.2}",
                count, area, confidence
            );
            Ok(MotionOutcome::Motion(MotionDetection {
                count,
                area,
                confidence,
            }))
        } else {
            Ok(MotionOutcome::Still { count, area })
        }
    }

    fn reset(&mut self) {
        self.previous = None;
        self.last_detection = None;
    }
}

/// Maps moving area to [0, 1], relative to the zone area. Non-decreasing in `area`.
pub fn motion_confidence(area: u64, zone_area: u64) -> f32 {
    if zone_area == 0 {
        return 0.0;
    }
    (area as f64 / zone_area as f64 * CONFIDENCE_SCALE).min(1.0) as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn blank(width: u32, height: u32) -> RgbImage {
        RgbImage::new(width, height)
    }

    fn with_block(width: u32, height: u32, x0: u32, y0: u32, side: u32) -> RgbImage {
        let mut image = blank(width, height);
        for y in y0..y0 + side {
            for x in x0..x0 + side {
                image.put_pixel(x, y, Rgb([255, 255, 255]));
            }
        }
        image
    }

    #[test]
    fn first_crop_only_seeds() {
        let mut analyzer = MotionAnalyzer::new();
        let busy = with_block(400, 300, 50, 50, 100);

        assert_eq!(analyzer.analyze(&busy).unwrap(), MotionOutcome::Seeded);
        assert!(analyzer.has_baseline());
    }

    #[test]
    fn identical_crops_are_still() {
        let mut analyzer = MotionAnalyzer::new();
        let crop = with_block(400, 300, 50, 50, 40);

        analyzer.analyze(&crop).unwrap();
        assert_eq!(
            analyzer.analyze(&crop).unwrap(),
            MotionOutcome::Still { count: 0, area: 0 }
        );
    }

    #[test]
    fn appearing_block_fires() {
        let mut analyzer = MotionAnalyzer::new();
        analyzer.analyze(&blank(400, 300)).unwrap();

        let outcome = analyzer.analyze(&with_block(400, 300, 50, 50, 30)).unwrap();
        let MotionOutcome::Motion(detection) = outcome else {
            panic!("expected motion, got {outcome:?}");
        };
        assert!(analyzer.last_detection().is_some());
        assert_eq!(detection.count, 1);
        assert!(detection.area > 900 && detection.area < 5000, "{detection:?}");
        assert!(detection.confidence > 0.0 && detection.confidence < 1.0);
    }

    #[test]
    fn baseline_advances_after_detection() {
        let mut analyzer = MotionAnalyzer::new();
        let moved = with_block(400, 300, 50, 50, 30);
        analyzer.analyze(&blank(400, 300)).unwrap();
        analyzer.analyze(&moved).unwrap();

        assert!(matches!(
            analyzer.analyze(&moved).unwrap(),
            MotionOutcome::Still { .. }
        ));
    }

    #[test]
    fn isolated_specks_do_not_fire() {
        let mut analyzer = MotionAnalyzer::new();
        analyzer.analyze(&blank(400, 300)).unwrap();

        let mut specks = blank(400, 300);
        for i in 0..20 {
            specks.put_pixel(10 + i * 17, 20 + i * 11, Rgb([255, 255, 255]));
        }
        assert_eq!(
            analyzer.analyze(&specks).unwrap(),
            MotionOutcome::Still { count: 0, area: 0 }
        );
    }

    #[test]
    fn reshaped_zone_reseeds() {
        let mut analyzer = MotionAnalyzer::new();
        analyzer.analyze(&blank(400, 300)).unwrap();

        let outcome = analyzer.analyze(&with_block(200, 200, 10, 10, 100)).unwrap();
        assert_eq!(outcome, MotionOutcome::Seeded);
    }

    #[test]
    fn reset_forgets_baseline() {
        let mut analyzer = MotionAnalyzer::new();
        analyzer.analyze(&blank(100, 100)).unwrap();
        analyzer.reset();
        assert!(!analyzer.has_baseline());
        assert_eq!(
            analyzer.analyze(&with_block(100, 100, 10, 10, 50)).unwrap(),
            MotionOutcome::Seeded
        );
    }

    #[test]
    fn empty_crop_is_a_fault() {
        let mut analyzer = MotionAnalyzer::new();
        assert!(matches!(
            analyzer.analyze(&RgbImage::new(0, 10)),
            Err(DetectorError::EmptyCrop(0, 10))
        ));
    }

    #[test]
    fn confidence_is_bounded_and_monotonic() {
        let zone_area = 400 * 300;
        let mut last = 0.0f32;
        for area in (0..=zone_area).step_by(997) {
            let confidence = motion_confidence(area, zone_area);
            assert!((0.0..=1.0).contains(&confidence));
            assert!(confidence >= last);
            last = confidence;
        }
        assert_eq!(motion_confidence(zone_area, zone_area), 1.0);
        assert_eq!(motion_confidence(10, 0), 0.0);
    }
}
