//! Detection zones and frame cropping
//!
//! SPDX-License-Identifier: GPL-3.0-or-later

use crate::config::{FRAME_HEIGHT, FRAME_WIDTH};
use crate::frame::Frame;
use image::{imageops, RgbImage};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Rectangle of interest in frame coordinates.
///
/// Fields are signed so that out-of-range values from callers are representable;
/// they are clamped against the frame before use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Zone {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Zone {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Zone {
            x,
            y,
            width,
            height,
        }
    }

    /// The whole normalized frame.
    pub fn full_frame() -> Self {
        Zone::new(0, 0, FRAME_WIDTH as i32, FRAME_HEIGHT as i32)
    }

    pub fn area(&self) -> u64 {
        self.width.max(0) as u64 * self.height.max(0) as u64
    }

    /// Clamps the zone into a `frame_width` x `frame_height` frame.
    ///
    /// The origin is pulled into the frame first, then the extent is limited to
    /// what remains to the right of and below the origin. Returns `None` when the
    /// result has no area.
    pub fn clamp_to(&self, frame_width: u32, frame_height: u32) -> Option<Zone> {
        let fw = frame_width as i64;
        let fh = frame_height as i64;

        let x = (self.x as i64).clamp(0, fw);
        let y = (self.y as i64).clamp(0, fh);
        let width = (self.width as i64).clamp(0, fw - x);
        let height = (self.height as i64).clamp(0, fh - y);

        if width == 0 || height == 0 {
            return None;
        }

        // All four values fit in i32 since they are bounded by the frame size.
        Some(Zone::new(x as i32, y as i32, width as i32, height as i32))
    }
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{} at ({}, {})",
            self.width, self.height, self.x, self.y
        )
    }
}

/// Unsigned box in crop coordinates, used for blobs and presence detections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn overlaps(&self, other: &Rect) -> bool {
        self.x < other.x + other.width
            && other.x < self.x + self.width
            && self.y < other.y + other.height
            && other.y < self.y + self.height
    }
}

/// Pixels of one frame inside one (clamped) zone.
#[derive(Debug, Clone)]
pub struct CroppedFrame {
    image: RgbImage,
    zone: Zone,
}

impl CroppedFrame {
    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    /// The clamped zone the pixels were taken from.
    pub fn zone(&self) -> Zone {
        self.zone
    }
}

/// Crops `frame` to `zone`, clamping first. `None` when nothing is left.
pub fn crop(frame: &Frame, zone: &Zone) -> Option<CroppedFrame> {
    let zone = zone.clamp_to(frame.width(), frame.height())?;
    let image = imageops::crop_imm(
        frame.image(),
        zone.x as u32,
        zone.y as u32,
        zone.width as u32,
        zone.height as u32,
    )
    .to_image();

    Some(CroppedFrame { image, zone })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn oversized_zone_is_clamped_to_frame() {
        let zone = Zone::new(-10, 0, 10000, 480);
        assert_eq!(zone.clamp_to(640, 480), Some(Zone::new(0, 0, 640, 480)));
    }

    #[test]
    fn zone_hanging_off_the_corner_is_trimmed() {
        let zone = Zone::new(600, 400, 100, 100);
        assert_eq!(zone.clamp_to(640, 480), Some(Zone::new(600, 400, 40, 80)));
    }

    #[test]
    fn degenerate_zones_clamp_to_none() {
        assert_eq!(Zone::new(640, 0, 50, 50).clamp_to(640, 480), None);
        assert_eq!(Zone::new(10, 10, 0, 50).clamp_to(640, 480), None);
        assert_eq!(Zone::new(10, 10, -5, 50).clamp_to(640, 480), None);
    }

    #[test]
    fn crop_takes_pixels_from_the_zone() {
        let mut image = RgbImage::new(640, 480);
        image.put_pixel(110, 120, Rgb([200, 0, 0]));
        let frame = Frame::new(image, 1).unwrap();

        let cropped = crop(&frame, &Zone::new(100, 100, 400, 300)).unwrap();
        assert_eq!(cropped.image().dimensions(), (400, 300));
        assert_eq!(cropped.image().get_pixel(10, 20), &Rgb([200, 0, 0]));
        assert_eq!(cropped.zone(), Zone::new(100, 100, 400, 300));
    }

    #[test]
    fn rect_overlap() {
        let a = Rect {
            x: 0,
            y: 0,
            width: 10,
            height: 10,
        };
        let touching = Rect {
            x: 10,
            y: 0,
            width: 5,
            height: 5,
        };
        let inside = Rect {
            x: 2,
            y: 2,
            width: 3,
            height: 3,
        };
        assert!(!a.overlaps(&touching));
        assert!(a.overlaps(&inside));
        assert!(inside.overlaps(&a));
    }
}
