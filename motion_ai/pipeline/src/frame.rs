//! Decoded video frames at the fixed analysis resolution
//!
//! SPDX-License-Identifier: GPL-3.0-or-later

use crate::config::{FRAME_HEIGHT, FRAME_WIDTH};
use fast_image_resize::images::Image;
use fast_image_resize::{PixelType, ResizeAlg, ResizeOptions, Resizer};
use image::RgbImage;
use std::time::SystemTime;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame has no pixels ({0}x{1})")]
    Empty(u32, u32),
    #[error("frame buffer holds {actual} bytes, expected {expected} for {width}x{height} RGB")]
    BufferSize {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
    #[error("resizing frame failed: {0}")]
    Resize(String),
}

/// One decoded frame, always 640x480 RGB.
///
/// A frame is immutable once built and is owned by the worker pass that read it.
#[derive(Clone, Debug)]
pub struct Frame {
    image: RgbImage,
    seq: u64,
    captured_at: SystemTime,
}

impl Frame {
    /// Wraps a decoded image, resizing it to the analysis resolution when needed.
    pub fn new(image: RgbImage, seq: u64) -> Result<Self, FrameError> {
        Ok(Frame {
            image: normalize(image)?,
            seq,
            captured_at: SystemTime::now(),
        })
    }

    /// Builds a frame from a packed RGB24 buffer, as emitted by a rawvideo decoder.
    pub fn from_rgb24(width: u32, height: u32, data: Vec<u8>, seq: u64) -> Result<Self, FrameError> {
        if width == 0 || height == 0 {
            return Err(FrameError::Empty(width, height));
        }

        let expected = width as usize * height as usize * 3;
        let actual = data.len();
        if actual != expected {
            return Err(FrameError::BufferSize {
                width,
                height,
                expected,
                actual,
            });
        }

        let image = RgbImage::from_raw(width, height, data).ok_or(FrameError::BufferSize {
            width,
            height,
            expected,
            actual,
        })?;
        Self::new(image, seq)
    }

    /// Overrides the capture time, for frames that were decoded before being wrapped.
    pub fn captured(mut self, at: SystemTime) -> Self {
        self.captured_at = at;
        self
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn captured_at(&self) -> SystemTime {
        self.captured_at
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Resizes `image` to 640x480 unless it is already that size.
pub fn normalize(image: RgbImage) -> Result<RgbImage, FrameError> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(FrameError::Empty(width, height));
    }
    if width == FRAME_WIDTH && height == FRAME_HEIGHT {
        return Ok(image);
    }

    // fast_image_resize is considerably quicker than image::imageops for this.
    let src = Image::from_vec_u8(width, height, image.into_raw(), PixelType::U8x3)
        .map_err(|e| FrameError::Resize(e.to_string()))?;
    let mut dst = Image::new(FRAME_WIDTH, FRAME_HEIGHT, PixelType::U8x3);

    let mut resizer = Resizer::new();
    resizer
        .resize(
            &src,
            &mut dst,
            &ResizeOptions::new().resize_alg(ResizeAlg::Nearest),
        )
        .map_err(|e| FrameError::Resize(e.to_string()))?;

    let expected = FRAME_WIDTH as usize * FRAME_HEIGHT as usize * 3;
    let buffer = dst.buffer().to_vec();
    let actual = buffer.len();
    RgbImage::from_raw(FRAME_WIDTH, FRAME_HEIGHT, buffer).ok_or(FrameError::BufferSize {
        width: FRAME_WIDTH,
        height: FRAME_HEIGHT,
        expected,
        actual,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn larger_frames_are_downscaled() {
        let image = RgbImage::from_pixel(1280, 720, Rgb([10, 20, 30]));
        let frame = Frame::new(image, 1).unwrap();

        assert_eq!((frame.width(), frame.height()), (FRAME_WIDTH, FRAME_HEIGHT));
        assert_eq!(frame.image().get_pixel(320, 240), &Rgb([10, 20, 30]));
    }

    #[test]
    fn native_resolution_is_untouched() {
        let mut image = RgbImage::new(FRAME_WIDTH, FRAME_HEIGHT);
        image.put_pixel(5, 7, Rgb([255, 0, 0]));
        let frame = Frame::new(image.clone(), 9).unwrap();

        assert_eq!(frame.image(), &image);
        assert_eq!(frame.seq(), 9);
    }

    #[test]
    fn capture_time_can_be_carried_over() {
        let at = SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(1_700_000_000);
        let frame = Frame::new(RgbImage::new(8, 8), 3).unwrap().captured(at);
        assert_eq!(frame.captured_at(), at);
        assert_eq!(frame.seq(), 3);
    }

    #[test]
    fn short_rgb24_buffer_is_rejected() {
        let err = Frame::from_rgb24(4, 4, vec![0; 10], 1).unwrap_err();
        assert!(matches!(
            err,
            FrameError::BufferSize {
                expected: 48,
                actual: 10,
                ..
            }
        ));
    }

    #[test]
    fn empty_frame_is_rejected() {
        assert!(matches!(
            Frame::from_rgb24(0, 480, Vec::new(), 1),
            Err(FrameError::Empty(0, 480))
        ));
    }
}
