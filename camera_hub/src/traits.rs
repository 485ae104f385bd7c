//! SecureEye camera hub traits.
//!
//! SPDX-License-Identifier: GPL-3.0-or-later

use crate::events::{AlertEvent, DetectionEvent};
use crate::frame_source::{OpenError, ReadError, StreamSource};
use crate::sink::PublishError;
use secureeye_motion_ai::frame::Frame;

/// A source of decoded frames for one camera. Owned by exactly one worker.
pub trait FrameSource: Send {
    /// Blocks until the next frame is decoded.
    fn read(&mut self) -> Result<Frame, ReadError>;

    /// Releases the device or stream. Further reads may reopen it.
    fn close(&mut self);
}

/// Opens frame sources. The worker calls this on its own thread.
pub trait FrameSourceFactory: Send + Sync {
    fn open(&self, source: &StreamSource) -> Result<Box<dyn FrameSource>, OpenError>;
}

impl<F> FrameSourceFactory for F
where
    F: Fn(&StreamSource) -> Result<Box<dyn FrameSource>, OpenError> + Send + Sync,
{
    fn open(&self, source: &StreamSource) -> Result<Box<dyn FrameSource>, OpenError> {
        self(source)
    }
}

/// Where workers push alerts. Must not block: a full or closed sink is reported
/// and the alert is dropped by the caller.
pub trait AlertSink: Send + Sync {
    fn publish(&self, event: AlertEvent) -> Result<(), PublishError>;
}

/// Durable record of detections.
pub trait DetectionStore: Send + Sync {
    fn record(&self, event: &DetectionEvent) -> anyhow::Result<()>;
}
