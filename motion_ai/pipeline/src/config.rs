//! Fixed analysis parameters shared by the motion and presence detectors
//!
//! SPDX-License-Identifier: GPL-3.0-or-later

/// Every frame is normalized to this resolution before any zone is applied,
/// so zone coordinates do not depend on the camera's native resolution.
pub const FRAME_WIDTH: u32 = 640;
pub const FRAME_HEIGHT: u32 = 480;

// Motion (frame differencing)
pub const MOTION_BLUR_SIGMA: f32 = 3.5; // Same spread as a 21x21 Gaussian kernel with derived sigma
pub const DIFF_THRESHOLD: u8 = 30; // Per-pixel change (8-bit) needed to count as moving
pub const MORPH_RADIUS: u8 = 2; // 5x5 structuring element for open/close/dilate
pub const DILATE_ITERATIONS: usize = 2;
pub const MIN_COMPONENT_AREA: u64 = 100; // A component must exceed this to be kept (px^2)
pub const MIN_TOTAL_MOTION_AREA: u64 = 500; // Summed kept area must exceed this to fire (px^2)
pub const CONFIDENCE_SCALE: f64 = 10.0; // ~10% of the zone moving saturates confidence

// Presence (secondary detector)
pub const PRESENCE_EVERY: u32 = 3; // Run on every Nth frame
pub const PRESENCE_CONFIDENCE_STEP: f32 = 0.3; // Confidence contributed by each detection
pub const PRESENCE_BLUR_SIGMA: f32 = 1.5;
pub const BACKGROUND_ALPHA: f32 = 0.05; // Running-average update rate of the background model
pub const FOREGROUND_THRESHOLD: u8 = 25;
pub const PRESENCE_MORPH_RADIUS: u8 = 1; // 3x3 speckle removal
pub const MIN_PRESENCE_AREA: u64 = 200;
