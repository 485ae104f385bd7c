//! Scripted frame sources and helpers for worker and supervisor tests

use crate::events::AlertEvent;
use crate::frame_source::{OpenError, ReadError, StreamSource};
use crate::traits::{FrameSource, FrameSourceFactory};
use crate::worker::WorkerPolicy;
use crossbeam_channel::Receiver;
use image::{Rgb, RgbImage};
use secureeye_motion_ai::frame::Frame;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub fn blank_frame(seq: u64) -> Frame {
    Frame::new(RgbImage::new(640, 480), seq).unwrap()
}

/// Black frame with a white `side` x `side` square at (`x`, `y`).
pub fn block_frame(seq: u64, x: u32, y: u32, side: u32) -> Frame {
    let mut image = RgbImage::new(640, 480);
    for py in y..y + side {
        for px in x..x + side {
            image.put_pixel(px, py, Rgb([255, 255, 255]));
        }
    }
    Frame::new(image, seq).unwrap()
}

/// Plays back `frames`, then repeats the last one forever.
pub struct ScriptedSource {
    frames: VecDeque<Frame>,
    last: Option<Frame>,
}

impl ScriptedSource {
    pub fn new(frames: Vec<Frame>) -> Self {
        ScriptedSource {
            frames: frames.into(),
            last: None,
        }
    }
}

impl FrameSource for ScriptedSource {
    fn read(&mut self) -> Result<Frame, ReadError> {
        if let Some(frame) = self.frames.pop_front() {
            self.last = Some(frame.clone());
            return Ok(frame);
        }
        self.last.clone().ok_or(ReadError::EndOfStream)
    }

    fn close(&mut self) {
        self.frames.clear();
    }
}

/// Every read fails.
pub struct FailingSource;

impl FrameSource for FailingSource {
    fn read(&mut self) -> Result<Frame, ReadError> {
        Err(ReadError::Decode("connection refused".into()))
    }

    fn close(&mut self) {}
}

/// Blocks inside `read` until the paired sender is dropped.
pub struct GatedSource {
    pub release: Receiver<()>,
}

impl FrameSource for GatedSource {
    fn read(&mut self) -> Result<Frame, ReadError> {
        let _ = self.release.recv();
        Err(ReadError::EndOfStream)
    }

    fn close(&mut self) {}
}

pub fn scripted(
    frames: impl Fn() -> Vec<Frame> + Send + Sync + 'static,
) -> Arc<dyn FrameSourceFactory> {
    Arc::new(
        move |_: &StreamSource| -> Result<Box<dyn FrameSource>, OpenError> {
            Ok(Box::new(ScriptedSource::new(frames())))
        },
    )
}

pub fn failing_open() -> Arc<dyn FrameSourceFactory> {
    Arc::new(
        |source: &StreamSource| -> Result<Box<dyn FrameSource>, OpenError> {
            match source {
                StreamSource::Device(index) => Err(OpenError::DeviceNotFound(*index)),
                StreamSource::Url(url) => Err(OpenError::InvalidSource(url.clone())),
            }
        },
    )
}

pub fn fast_policy() -> WorkerPolicy {
    WorkerPolicy {
        max_read_failures: 10,
        read_backoff: Duration::from_millis(1),
        frame_pace: Duration::from_millis(1),
        test_alert_interval: None,
    }
}

/// Receives until an event matches `wanted` or `timeout` passes.
pub fn recv_until(
    rx: &Receiver<AlertEvent>,
    timeout: Duration,
    wanted: impl Fn(&AlertEvent) -> bool,
) -> Option<AlertEvent> {
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(remaining) {
            Ok(event) if wanted(&event) => return Some(event),
            Ok(_) => continue,
            Err(_) => return None,
        }
    }
}
