//! Foreground blobs matched against human body proportions
//!
//! SPDX-License-Identifier: GPL-3.0-or-later

use crate::config::{
    BACKGROUND_ALPHA, FOREGROUND_THRESHOLD, MIN_PRESENCE_AREA, PRESENCE_BLUR_SIGMA,
    PRESENCE_MORPH_RADIUS,
};
use crate::motion::background::BackgroundModel;
use crate::motion::preprocessing::{self, Blob};
use crate::traits::{DetectorError, PresenceDetector};
use crate::zone::Rect;
use image::RgbImage;
use imageproc::distance_transform::Norm;
use imageproc::morphology;
use log::debug;

/// Height-to-width range a foreground blob must fall in to count as a person.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BodyProfile {
    pub name: &'static str,
    pub min_ratio: f32,
    pub max_ratio: f32,
    pub min_area: u64,
}

impl BodyProfile {
    pub const FULL_BODY: BodyProfile = BodyProfile {
        name: "full_body",
        min_ratio: 1.2,
        max_ratio: 4.0,
        min_area: MIN_PRESENCE_AREA,
    };

    /// Head and shoulders, as seen by a camera close to a doorway.
    pub const UPPER_BODY: BodyProfile = BodyProfile {
        name: "upper_body",
        min_ratio: 0.7,
        max_ratio: 1.2,
        min_area: MIN_PRESENCE_AREA,
    };

    pub fn matches(&self, blob: &Blob) -> bool {
        if blob.area <= self.min_area || blob.bounds.width == 0 {
            return false;
        }
        let ratio = blob.bounds.height as f32 / blob.bounds.width as f32;
        ratio >= self.min_ratio && ratio < self.max_ratio
    }
}

/// Keeps a background model of the zone and reports foreground blobs shaped
/// like `profile`.
pub struct ShapePresenceDetector {
    profile: BodyProfile,
    background: Option<BackgroundModel>,
}

impl ShapePresenceDetector {
    pub fn new(profile: BodyProfile) -> Self {
        ShapePresenceDetector {
            profile,
            background: None,
        }
    }
}

impl PresenceDetector for ShapePresenceDetector {
    fn detect(&mut self, crop: &RgbImage) -> Result<Vec<Rect>, DetectorError> {
        let (width, height) = crop.dimensions();
        if width == 0 || height == 0 {
            return Err(DetectorError::EmptyCrop(width, height));
        }

        let gray = preprocessing::grayscale_blurred(crop, PRESENCE_BLUR_SIGMA);

        let reseed = self
            .background
            .as_ref()
            .map_or(true, |model| model.dimensions() != gray.dimensions());
        if reseed {
            self.background = Some(BackgroundModel::new(&gray)?);
            return Ok(Vec::new());
        }
        let Some(background) = self.background.as_mut() else {
            return Ok(Vec::new());
        };

        let mask = background.apply(&gray, BACKGROUND_ALPHA, FOREGROUND_THRESHOLD)?;
        let mask = morphology::open(&mask, Norm::LInf, PRESENCE_MORPH_RADIUS);

        let boxes: Vec<Rect> = preprocessing::find_blobs(&mask)
            .into_iter()
            .filter(|blob| self.profile.matches(blob))
            .map(|blob| blob.bounds)
            .collect();

        if !boxes.is_empty() {
            debug!("{}: {} candidate(s)", self.profile.name, boxes.len());
        }
        Ok(boxes)
    }

    fn reset(&mut self) {
        self.background = None;
    }
}
