//! Dwell-time and motion-speed gating.

use crate::config::CaptureConfig;
use crate::session::{CaptureSession, CenterSample};
use crate::types::Point;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StabilityStatus {
    /// Face is still, but the dwell time has not elapsed yet.
    Settling,
    /// Face moved faster than allowed; dwell restarted.
    Moving,
    /// Dwell time reached with no excessive motion.
    Stable,
}

#[derive(Debug, Clone)]
pub struct StabilityTracker {
    stable_duration_ms: u64,
    max_speed_px_per_sec: f32,
}

impl StabilityTracker {
    pub fn new(config: &CaptureConfig) -> Self {
        Self {
            stable_duration_ms: config.stable_duration_ms,
            max_speed_px_per_sec: config.max_center_speed_px_per_sec,
        }
    }

    /// Feed one frame's bounding-box center (image pixels).
    pub fn update(&self, center: Point, now_ms: u64, session: &mut CaptureSession) -> StabilityStatus {
        if !self.is_movement_stable(center, now_ms, session) {
            session.stable_since_ms = Some(now_ms);
            return StabilityStatus::Moving;
        }

        let since = *session.stable_since_ms.get_or_insert(now_ms);
        if now_ms.saturating_sub(since) < self.stable_duration_ms {
            StabilityStatus::Settling
        } else {
            StabilityStatus::Stable
        }
    }

    /// Speed check against the previous frame. Always records the new center.
    fn is_movement_stable(&self, center: Point, now_ms: u64, session: &mut CaptureSession) -> bool {
        let previous = session.last_center.replace(CenterSample {
            center,
            timestamp_ms: now_ms,
        });
        let Some(previous) = previous else {
            return true;
        };

        let elapsed_ms = now_ms.saturating_sub(previous.timestamp_ms).max(1);
        let speed = previous.center.distance(center) * 1000.0 / elapsed_ms as f32;
        if speed > self.max_speed_px_per_sec {
            tracing::debug!(speed, max = self.max_speed_px_per_sec, "face moving too fast");
            return false;
        }
        true
    }
}
