//! Frame acquisition from local capture devices and network streams
//!
//! SPDX-License-Identifier: GPL-3.0-or-later

use crate::traits::{FrameSource, FrameSourceFactory};
use cfg_if::cfg_if;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use ffmpeg_sidecar::child::FfmpegChild;
use ffmpeg_sidecar::command::FfmpegCommand;
use ffmpeg_sidecar::event::{FfmpegEvent, LogLevel};
use secureeye_motion_ai::frame::{Frame, FrameError};
use std::fmt;
use std::io;
use std::str::FromStr;
use std::thread;
use std::time::{Duration, Instant, SystemTime};
use thiserror::Error;

/// Where a camera's frames come from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StreamSource {
    /// Local capture device by index.
    Device(u32),
    /// Anything ffmpeg can open: rtsp://, http://, a file path.
    Url(String),
}

impl StreamSource {
    /// An all-digit string is a device index; anything else non-empty is a URL.
    pub fn parse(raw: &str) -> Result<Self, OpenError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(OpenError::InvalidSource(raw.to_string()));
        }
        if raw.chars().all(|c| c.is_ascii_digit()) {
            return raw
                .parse()
                .map(StreamSource::Device)
                .map_err(|_| OpenError::InvalidSource(raw.to_string()));
        }
        Ok(StreamSource::Url(raw.to_string()))
    }
}

impl FromStr for StreamSource {
    type Err = OpenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StreamSource::parse(s)
    }
}

impl fmt::Display for StreamSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamSource::Device(index) => write!(f, "device {index}"),
            StreamSource::Url(url) => f.write_str(url),
        }
    }
}

#[derive(Debug, Error)]
pub enum OpenError {
    #[error("invalid stream source {0:?}")]
    InvalidSource(String),
    #[error("capture device {0} not found")]
    DeviceNotFound(u32),
    #[error("failed to launch ffmpeg: {0}")]
    Spawn(#[source] io::Error),
    #[error("ffmpeg produced no output stream: {0}")]
    NoOutput(String),
    #[error("no frame within {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Error)]
pub enum ReadError {
    #[error("stream ended")]
    EndOfStream,
    #[error("decoder reported: {0}")]
    Decode(String),
    #[error("no frame within {0:?}")]
    Timeout(Duration),
    #[error("bad frame: {0}")]
    Frame(#[from] FrameError),
    #[error("reconnect failed: {0}")]
    Reconnect(#[source] OpenError),
}

cfg_if! {
    if #[cfg(target_os = "linux")] {
        fn capture_input(index: u32) -> Result<(&'static str, String), OpenError> {
            let device = format!("/dev/video{index}");
            if !std::path::Path::new(&device).exists() {
                return Err(OpenError::DeviceNotFound(index));
            }
            Ok(("v4l2", device))
        }
    } else if #[cfg(target_os = "macos")] {
        fn capture_input(index: u32) -> Result<(&'static str, String), OpenError> {
            Ok(("avfoundation", format!("{index}:none")))
        }
    } else {
        fn capture_input(index: u32) -> Result<(&'static str, String), OpenError> {
            Err(OpenError::DeviceNotFound(index))
        }
    }
}

pub const OPEN_TIMEOUT: Duration = Duration::from_secs(10);
pub const READ_TIMEOUT: Duration = Duration::from_secs(5);
const DECODER_QUEUE: usize = 2;

/// Decoder settings shared by every stream a factory opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamOptions {
    pub fps: u32,
    /// How long `open` waits for the first decoded frame.
    pub open_timeout: Duration,
    /// How long one `read` waits before the stream counts as stalled.
    pub read_timeout: Duration,
}

impl StreamOptions {
    /// Default timeouts, with the decoder paced to one frame per `frame_pace`.
    pub fn paced(frame_pace: Duration) -> Self {
        let pace_ms = frame_pace.as_millis().max(1);
        StreamOptions {
            fps: (1000 / pace_ms).clamp(1, 60) as u32,
            open_timeout: OPEN_TIMEOUT,
            read_timeout: READ_TIMEOUT,
        }
    }
}

/// Packed RGB24 pixels straight from the decoder.
#[derive(Debug)]
struct RawFrame {
    width: u32,
    height: u32,
    data: Vec<u8>,
    received_at: SystemTime,
}

#[derive(Debug)]
enum DecoderEvent {
    Frame(RawFrame),
    Error(String),
}

enum Next {
    Frame(RawFrame),
    /// The decoder exited, with the last error it reported.
    Ended(Option<String>),
    TimedOut,
}

fn decoder_event(event: FfmpegEvent) -> Option<DecoderEvent> {
    match event {
        FfmpegEvent::OutputFrame(frame) => Some(DecoderEvent::Frame(RawFrame {
            width: frame.width,
            height: frame.height,
            data: frame.data,
            received_at: SystemTime::now(),
        })),
        FfmpegEvent::Log(LogLevel::Error | LogLevel::Fatal, message) | FfmpegEvent::Error(message) => {
            Some(DecoderEvent::Error(message))
        }
        _ => None,
    }
}

/// Decoder events moved onto a channel by a pump thread, so waits can time out.
///
/// The pump exits when the decoder's output ends or the feed is dropped.
struct DecoderFeed {
    label: String,
    events: Receiver<DecoderEvent>,
}

impl DecoderFeed {
    fn pump<I>(label: String, events: I) -> io::Result<Self>
    where
        I: Iterator<Item = DecoderEvent> + Send + 'static,
    {
        let (tx, rx) = bounded(DECODER_QUEUE);
        thread::Builder::new()
            .name("ffmpeg-pump".into())
            .spawn(move || {
                for event in events {
                    if tx.send(event).is_err() {
                        break;
                    }
                }
            })?;
        Ok(DecoderFeed { label, events: rx })
    }

    fn next(&self, timeout: Duration) -> Next {
        let deadline = Instant::now() + timeout;
        let mut last_error = None;
        loop {
            match self.events.recv_deadline(deadline) {
                Ok(DecoderEvent::Frame(frame)) => return Next::Frame(frame),
                Ok(DecoderEvent::Error(message)) => {
                    debug!("ffmpeg ({}): {message}", self.label);
                    last_error = Some(message);
                }
                Err(RecvTimeoutError::Timeout) => return Next::TimedOut,
                Err(RecvTimeoutError::Disconnected) => return Next::Ended(last_error),
            }
        }
    }

    /// Waits for the stream to prove it is open by delivering a frame.
    fn first_frame(&self, timeout: Duration) -> Result<RawFrame, OpenError> {
        match self.next(timeout) {
            Next::Frame(frame) => Ok(frame),
            Next::Ended(error) => Err(OpenError::NoOutput(
                error.unwrap_or_else(|| "stream ended before the first frame".into()),
            )),
            Next::TimedOut => Err(OpenError::Timeout(timeout)),
        }
    }
}

/// Decodes a stream to RGB24 frames through an ffmpeg child process.
///
/// `open` succeeds only once a first frame has arrived. A read that sees no
/// frame within the read timeout, or finds the decoder gone, kills the child;
/// the next `read` respawns it, so a dropped network stream reconnects on its
/// own while the worker keeps counting failures.
pub struct FfmpegFrameSource {
    source: StreamSource,
    options: StreamOptions,
    child: Option<FfmpegChild>,
    feed: Option<DecoderFeed>,
    pending: Option<RawFrame>,
    seq: u64,
}

impl FfmpegFrameSource {
    pub fn open(source: StreamSource, options: StreamOptions) -> Result<Self, OpenError> {
        let (child, feed) = spawn_decoder(&source, &options)?;
        let opened = Self::attach(source, options, Some(child), feed)?;
        info!("Opened {} at {} fps", opened.source, opened.options.fps);
        Ok(opened)
    }

    fn attach(
        source: StreamSource,
        options: StreamOptions,
        child: Option<FfmpegChild>,
        feed: DecoderFeed,
    ) -> Result<Self, OpenError> {
        let mut opened = FfmpegFrameSource {
            source,
            options,
            child,
            feed: None,
            pending: None,
            seq: 0,
        };
        // On failure, dropping `opened` kills the child.
        opened.pending = Some(feed.first_frame(options.open_timeout)?);
        opened.feed = Some(feed);
        Ok(opened)
    }

    fn reconnect(&mut self) -> Result<RawFrame, OpenError> {
        self.close();
        debug!("Reconnecting to {}", self.source);
        let (child, feed) = spawn_decoder(&self.source, &self.options)?;
        self.child = Some(child);
        let first = feed.first_frame(self.options.open_timeout);
        self.feed = Some(feed);
        if first.is_err() {
            self.close();
        }
        first
    }

    fn next_raw(&mut self) -> Result<RawFrame, ReadError> {
        if let Some(raw) = self.pending.take() {
            return Ok(raw);
        }
        let Some(feed) = self.feed.as_ref() else {
            return self.reconnect().map_err(ReadError::Reconnect);
        };

        match feed.next(self.options.read_timeout) {
            Next::Frame(raw) => Ok(raw),
            Next::Ended(error) => {
                self.close();
                Err(error.map_or(ReadError::EndOfStream, ReadError::Decode))
            }
            Next::TimedOut => {
                warn!(
                    "No frame from {} in {:?}, restarting decoder",
                    self.source, self.options.read_timeout
                );
                self.close();
                Err(ReadError::Timeout(self.options.read_timeout))
            }
        }
    }
}

/// Input options that bound how long ffmpeg itself waits on a network peer.
fn network_timeout_args(url: &str, timeout: Duration) -> Vec<String> {
    let micros = timeout.as_micros().to_string();
    if url.starts_with("rtsp://") {
        vec![
            "-rtsp_transport".into(),
            "tcp".into(),
            "-timeout".into(),
            micros,
        ]
    } else if url.contains("://") {
        vec!["-rw_timeout".into(), micros]
    } else {
        Vec::new()
    }
}

fn spawn_decoder(
    source: &StreamSource,
    options: &StreamOptions,
) -> Result<(FfmpegChild, DecoderFeed), OpenError> {
    let mut command = FfmpegCommand::new();
    command.hide_banner();
    match source {
        StreamSource::Device(index) => {
            let (format, input) = capture_input(*index)?;
            command.format(format).input(input);
        }
        StreamSource::Url(url) => {
            command.args(network_timeout_args(url, options.read_timeout));
            command.input(url);
        }
    }
    // Drop frames inside ffmpeg instead of letting them queue behind a slow reader.
    let pacing = format!("fps={}", options.fps.max(1));
    command.args(["-vf", pacing.as_str()]);
    command.rawvideo();

    let mut child = command.spawn().map_err(OpenError::Spawn)?;
    let feed = child
        .iter()
        .map_err(|e| OpenError::NoOutput(e.to_string()))
        .and_then(|events| {
            DecoderFeed::pump(source.to_string(), events.filter_map(decoder_event))
                .map_err(OpenError::Spawn)
        });
    match feed {
        Ok(feed) => Ok((child, feed)),
        Err(e) => {
            let _ = child.kill();
            let _ = child.wait();
            Err(e)
        }
    }
}

impl FrameSource for FfmpegFrameSource {
    fn read(&mut self) -> Result<Frame, ReadError> {
        let raw = self.next_raw()?;
        self.seq += 1;
        let frame = Frame::from_rgb24(raw.width, raw.height, raw.data, self.seq)?;
        Ok(frame.captured(raw.received_at))
    }

    fn close(&mut self) {
        self.feed = None;
        self.pending = None;
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill() {
                debug!("ffmpeg for {} already gone: {e}", self.source);
            }
            let _ = child.wait();
        }
    }
}

impl Drop for FfmpegFrameSource {
    fn drop(&mut self) {
        self.close();
    }
}

/// Opens [`FfmpegFrameSource`]s with shared decoder settings.
pub struct FfmpegSourceFactory {
    pub options: StreamOptions,
}

impl FfmpegSourceFactory {
    pub fn new(options: StreamOptions) -> Self {
        FfmpegSourceFactory { options }
    }
}

impl FrameSourceFactory for FfmpegSourceFactory {
    fn open(&self, source: &StreamSource) -> Result<Box<dyn FrameSource>, OpenError> {
        Ok(Box::new(FfmpegFrameSource::open(source.clone(), self.options)?))
    }
}
