//! SecureEye camera hub.
//!
//! SPDX-License-Identifier: GPL-3.0-or-later

#[macro_use]
extern crate log;

use anyhow::Context;
use crossbeam_channel::RecvTimeoutError;
use docopt::Docopt;
use secureeye_camera_hub::config::{HubConfig, DEFAULT_TEST_ALERT_INTERVAL_SECS};
use secureeye_camera_hub::detection_log::JsonlDetectionLog;
use secureeye_camera_hub::frame_source::FfmpegSourceFactory;
use secureeye_camera_hub::sink::ChannelSink;
use secureeye_camera_hub::supervisor::DetectionSupervisor;
use secureeye_camera_hub::worker::standard_detectors;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

const IDLE_POLL: Duration = Duration::from_secs(1);

const USAGE: &str = "
SecureEye camera hub: watches a zone of each configured camera for motion and people, and prints alerts as JSON lines.

Usage:
  secureeye-camera-hub [--config=<file>] [--test-alerts] [--duration=<secs>]
  secureeye-camera-hub (--version | -v)
  secureeye-camera-hub (--help | -h)

Options:
    --config=<file>     Camera configuration [default: cameras.yaml]
    --test-alerts       Also send a synthetic alert from every camera periodically
    --duration=<secs>   Stop all cameras and exit after this many seconds
    --version, -v       Show version
    --help, -h          Show help
";

#[derive(Debug, Clone, Deserialize)]
struct Args {
    flag_config: String,
    flag_test_alerts: bool,
    flag_duration: Option<u64>,
}

fn main() -> anyhow::Result<()> {
    let version = env!("CARGO_PKG_NAME").to_string() + ", version: " + env!("CARGO_PKG_VERSION");
    env_logger::init();

    let args: Args = Docopt::new(USAGE)
        .map(|d| d.help(true))
        .map(|d| d.version(Some(version)))
        .and_then(|d| d.deserialize())
        .unwrap_or_else(|e| e.exit());

    let mut config = HubConfig::load(&args.flag_config).with_context(|| {
        format!(
            "loading {} (see example_cameras.yaml for the format)",
            args.flag_config
        )
    })?;
    if args.flag_test_alerts && config.pipeline.test_alert_interval_secs.is_none() {
        config.pipeline.test_alert_interval_secs = Some(DEFAULT_TEST_ALERT_INTERVAL_SECS);
    }

    let (sink, alerts) = ChannelSink::bounded(config.alerts.queue_capacity);
    let mut builder = DetectionSupervisor::builder(Arc::new(sink))
        .opener(Arc::new(FfmpegSourceFactory::new(
            config.pipeline.stream_options(),
        )))
        .policy(config.pipeline.policy())
        .detectors(standard_detectors(
            config.pipeline.presence,
            config.pipeline.presence_every,
        ));
    if let Some(path) = &config.alerts.detection_log {
        let log = JsonlDetectionLog::open(path)?;
        info!("Recording detections to {}", log.path().display());
        builder = builder.store(Arc::new(log));
    }
    let supervisor = builder.build();

    for camera in &config.cameras {
        if let Some(zone) = camera.zone {
            supervisor.update_zone(&camera.id, zone);
        }
        if let Err(e) = supervisor.start(&camera.id, &camera.source) {
            error!("{e}");
        }
    }

    let deadline = args
        .flag_duration
        .map(|secs| Instant::now() + Duration::from_secs(secs));

    loop {
        let wait = deadline
            .map(|d| d.saturating_duration_since(Instant::now()).min(IDLE_POLL))
            .unwrap_or(IDLE_POLL);
        match alerts.recv_timeout(wait) {
            Ok(alert) => match alert.to_json() {
                Ok(line) => println!("{line}"),
                Err(e) => warn!("Could not serialize alert: {e}"),
            },
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        if deadline.is_some_and(|d| Instant::now() >= d) {
            info!("Run time elapsed, stopping cameras");
            break;
        }
        if supervisor.list().is_empty() {
            info!("No cameras left running");
            break;
        }
    }

    supervisor.shutdown();
    for alert in alerts.try_iter() {
        println!("{}", alert.to_json()?);
    }

    Ok(())
}
