//! Shared device state: operational parameters plus the busy re-entrancy
//! guard. One instance lives for the whole process behind an `Arc<RwLock>`;
//! it is mutated only by config sync, the watering controller (busy flag,
//! duration escalation), and the RPC layer (LED flag).

use std::sync::Arc;
use tokio::sync::RwLock;

pub type SharedState = Arc<RwLock<DeviceState>>;

#[derive(Debug, Clone, PartialEq)]
pub struct DeviceState {
    pub led_on: bool,
    pub must_sleep: bool,
    /// Sleep duration and periodic-cycle interval, in minutes.
    pub minutes_to_sleep: u32,
    /// Soil-humidity percentage below which watering triggers.
    pub humidity_threshold: f64,
    /// Pump-on duration. Grows on verification failure; never shrinks
    /// within a process lifetime (reboot restores the default).
    pub watering_duration_ms: u32,
    /// True while a watering/verification sequence is in flight. Gates deep
    /// sleep and new cycle starts.
    pub busy: bool,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self {
            led_on: false,
            must_sleep: false,
            minutes_to_sleep: 240,
            humidity_threshold: 50.0,
            watering_duration_ms: 2500,
            busy: false,
        }
    }
}

impl DeviceState {
    pub fn shared() -> SharedState {
        Arc::new(RwLock::new(Self::default()))
    }

    /// Grow the watering duration after a failed verification. The new value
    /// is `floor(previous * 1.5)`, so the duration is monotonically
    /// non-decreasing until reboot.
    pub fn escalate_watering_duration(&mut self) {
        self.watering_duration_ms = (self.watering_duration_ms as f64 * 1.5).floor() as u32;
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let st = DeviceState::default();
        assert!(!st.led_on);
        assert!(!st.must_sleep);
        assert_eq!(st.minutes_to_sleep, 240);
        assert_eq!(st.humidity_threshold, 50.0);
        assert_eq!(st.watering_duration_ms, 2500);
        assert!(!st.busy);
    }

    #[test]
    fn escalation_is_floored_times_1_5() {
        let mut st = DeviceState::default();
        st.escalate_watering_duration();
        assert_eq!(st.watering_duration_ms, 3750);

        // 3750 * 1.5 = 5625, 5625 * 1.5 = 8437.5 → floor
        st.escalate_watering_duration();
        assert_eq!(st.watering_duration_ms, 5625);
        st.escalate_watering_duration();
        assert_eq!(st.watering_duration_ms, 8437);
    }

    #[test]
    fn escalation_never_decreases() {
        let mut st = DeviceState::default();
        let mut prev = st.watering_duration_ms;
        for _ in 0..10 {
            st.escalate_watering_duration();
            assert!(st.watering_duration_ms >= prev);
            prev = st.watering_duration_ms;
        }
    }
}
