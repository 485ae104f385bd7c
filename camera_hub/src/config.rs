//! Camera hub configuration (cameras.yaml)
//!
//! SPDX-License-Identifier: GPL-3.0-or-later

use crate::frame_source::{StreamOptions, OPEN_TIMEOUT, READ_TIMEOUT};
use crate::worker::{WorkerPolicy, FRAME_PACE, MAX_READ_FAILURES, READ_BACKOFF};
use secureeye_motion_ai::config::PRESENCE_EVERY;
use secureeye_motion_ai::zone::Zone;
use serde::Deserialize;
use std::collections::HashSet;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_QUEUE_CAPACITY: usize = 256;
pub const DEFAULT_TEST_ALERT_INTERVAL_SECS: u64 = 5;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid YAML: {0}")]
    Parse(#[from] serde_yml::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub max_read_failures: u32,
    pub read_backoff_ms: u64,
    pub frame_pace_ms: u64,
    /// How long opening a stream may take to deliver its first frame.
    pub open_timeout_ms: u64,
    /// A stream silent for this long is restarted and the read counts as failed.
    pub read_timeout_ms: u64,
    pub presence: bool,
    pub presence_every: u32,
    /// Emit a synthetic alert per camera at this interval.
    pub test_alert_interval_secs: Option<u64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            max_read_failures: MAX_READ_FAILURES,
            read_backoff_ms: READ_BACKOFF.as_millis() as u64,
            frame_pace_ms: FRAME_PACE.as_millis() as u64,
            open_timeout_ms: OPEN_TIMEOUT.as_millis() as u64,
            read_timeout_ms: READ_TIMEOUT.as_millis() as u64,
            presence: true,
            presence_every: PRESENCE_EVERY,
            test_alert_interval_secs: None,
        }
    }
}

impl PipelineConfig {
    pub fn policy(&self) -> WorkerPolicy {
        WorkerPolicy {
            max_read_failures: self.max_read_failures,
            read_backoff: Duration::from_millis(self.read_backoff_ms),
            frame_pace: Duration::from_millis(self.frame_pace_ms),
            test_alert_interval: self.test_alert_interval_secs.map(Duration::from_secs),
        }
    }

    pub fn stream_options(&self) -> StreamOptions {
        StreamOptions {
            open_timeout: Duration::from_millis(self.open_timeout_ms),
            read_timeout: Duration::from_millis(self.read_timeout_ms),
            ..StreamOptions::paced(Duration::from_millis(self.frame_pace_ms))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AlertsConfig {
    pub queue_capacity: usize,
    /// JSON-lines file every detection is appended to.
    pub detection_log: Option<PathBuf>,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        AlertsConfig {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            detection_log: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CameraConfig {
    pub id: String,
    /// Device index ("0") or stream URL.
    pub source: String,
    #[serde(default)]
    pub zone: Option<Zone>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HubConfig {
    pub pipeline: PipelineConfig,
    pub alerts: AlertsConfig,
    pub cameras: Vec<CameraConfig>,
}

impl HubConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: HubConfig = serde_yml::from_reader(file)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: HubConfig = serde_yml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pipeline.max_read_failures == 0 {
            return Err(ConfigError::Invalid(
                "pipeline.max_read_failures must be at least 1".into(),
            ));
        }
        if self.pipeline.open_timeout_ms == 0 || self.pipeline.read_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "pipeline stream timeouts must be at least 1 ms".into(),
            ));
        }
        if self.pipeline.presence_every == 0 {
            return Err(ConfigError::Invalid(
                "pipeline.presence_every must be at least 1".into(),
            ));
        }
        if self.pipeline.test_alert_interval_secs == Some(0) {
            return Err(ConfigError::Invalid(
                "pipeline.test_alert_interval_secs must be at least 1".into(),
            ));
        }
        if self.alerts.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "alerts.queue_capacity must be at least 1".into(),
            ));
        }

        let mut seen = HashSet::new();
        for camera in &self.cameras {
            if camera.id.trim().is_empty() {
                return Err(ConfigError::Invalid("camera id must not be empty".into()));
            }
            if camera.source.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "camera {} has an empty source",
                    camera.id
                )));
            }
            if !seen.insert(camera.id.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "camera id {} is used more than once",
                    camera.id
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_file_parses() {
        let config = HubConfig::from_yaml(
            r#"
pipeline:
  max_read_failures: 5
  frame_pace_ms: 50
  read_timeout_ms: 2000
  presence: false
  test_alert_interval_secs: 30
alerts:
  queue_capacity: 16
  detection_log: /var/lib/secureeye/detections.jsonl
cameras:
  - id: front_door
    source: "0"
    zone: { x: 100, y: 100, width: 400, height: 300 }
  - id: driveway
    source: rtsp://192.168.1.20:554/stream1
"#,
        )
        .unwrap();

        assert_eq!(config.pipeline.max_read_failures, 5);
        assert_eq!(config.pipeline.read_backoff_ms, 500);
        assert!(!config.pipeline.presence);
        assert_eq!(config.alerts.queue_capacity, 16);
        assert_eq!(config.cameras.len(), 2);
        assert_eq!(config.cameras[0].zone, Some(Zone::new(100, 100, 400, 300)));
        assert_eq!(config.cameras[1].zone, None);

        let policy = config.pipeline.policy();
        assert_eq!(policy.frame_pace, Duration::from_millis(50));
        assert_eq!(policy.test_alert_interval, Some(Duration::from_secs(30)));

        let stream = config.pipeline.stream_options();
        assert_eq!(stream.fps, 20);
        assert_eq!(stream.read_timeout, Duration::from_secs(2));
        assert_eq!(stream.open_timeout, OPEN_TIMEOUT);
    }

    #[test]
    fn empty_file_uses_defaults() {
        let config = HubConfig::from_yaml("{}").unwrap();
        assert_eq!(config, HubConfig::default());
        assert_eq!(config.pipeline.policy(), WorkerPolicy::default());
        assert_eq!(config.pipeline.presence_every, 3);
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let err = HubConfig::from_yaml(
            r#"
cameras:
  - { id: a, source: "0" }
  - { id: a, source: "1" }
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn zero_limits_are_rejected() {
        assert!(HubConfig::from_yaml("pipeline: { max_read_failures: 0 }").is_err());
        assert!(HubConfig::from_yaml("alerts: { queue_capacity: 0 }").is_err());
        assert!(HubConfig::from_yaml("pipeline: { read_timeout_ms: 0 }").is_err());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(matches!(
            HubConfig::from_yaml("pipeline: { frame_rate: 5 }"),
            Err(ConfigError::Parse(_))
        ));
    }
}
