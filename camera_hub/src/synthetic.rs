use crate::events::{CameraId, DetectionEvent, DetectionKind};
use chrono::Utc;
use secureeye_motion_ai::zone::Zone;
use std::time::{Duration, Instant};

/// Fires every `interval` to produce a fixed test alert, so the delivery path
/// can be exercised without real motion.
pub struct SyntheticAlerts {
    interval: Duration,
    deadline: Option<Instant>,
}

impl SyntheticAlerts {
    pub fn new(interval: Duration) -> Self {
        SyntheticAlerts {
            interval,
            deadline: None,
        }
    }

    /// The first poll arms the timer; later polls fire once per elapsed interval.
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.deadline {
            None => {
                self.deadline = Some(now + self.interval);
                false
            }
            Some(deadline) if now >= deadline => {
                self.deadline = Some(now + self.interval);
                true
            }
            Some(_) => false,
        }
    }

    pub fn event(camera_id: &CameraId) -> DetectionEvent {
        DetectionEvent {
            camera_id: camera_id.clone(),
            kind: DetectionKind::Motion,
            count: 1,
            confidence: 0.9,
            zone: Zone::full_frame(),
            motion_area: 1000,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_once_per_interval_after_arming() {
        let start = Instant::now();
        let mut timer = SyntheticAlerts::new(Duration::from_secs(10));

        assert!(!timer.poll(start));
        assert!(!timer.poll(start + Duration::from_secs(9)));
        assert!(timer.poll(start + Duration::from_secs(10)));
        assert!(!timer.poll(start + Duration::from_secs(15)));
        assert!(timer.poll(start + Duration::from_secs(21)));
    }

    #[test]
    fn test_alert_has_fixed_shape() {
        let event = SyntheticAlerts::event(&CameraId::new("cam1"));
        assert_eq!(event.kind, DetectionKind::Motion);
        assert_eq!(event.count, 1);
        assert_eq!(event.confidence, 0.9);
        assert_eq!(event.motion_area, 1000);
        assert_eq!(event.zone, Zone::new(0, 0, 640, 480));
    }
}
