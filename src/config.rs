//! Remote configuration sync: JSON messages arriving on the device config
//! topic update the shared state. Parsing is fail-open: a malformed payload
//! yields the hard-coded default configuration, never the pre-update state.

use serde::Deserialize;

use crate::hw::Board;
use crate::state::DeviceState;

// ---------------------------------------------------------------------------
// Inbound message
// ---------------------------------------------------------------------------

/// Remote configuration payload. Every field is optional-with-default so a
/// partial message still yields a complete configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ConfigMsg {
    pub led_state: bool,
    pub must_sleep: bool,
    pub humidity_threshold: f64,
    pub minutes_to_sleep: u32,
    pub watering_duration_msec: u32,
}

impl Default for ConfigMsg {
    fn default() -> Self {
        Self {
            led_state: false,
            must_sleep: false,
            humidity_threshold: 50.0,
            minutes_to_sleep: 240,
            watering_duration_msec: 2500,
        }
    }
}

/// Parse a config payload, substituting the default object on any failure.
pub fn parse(payload: &[u8]) -> ConfigMsg {
    match serde_json::from_slice(payload) {
        Ok(msg) => msg,
        Err(e) => {
            tracing::warn!("bad config payload, applying defaults: {e}");
            ConfigMsg::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Application
// ---------------------------------------------------------------------------

/// Apply a config message: all five fields are written, and the LED line is
/// driven to the new state immediately.
pub fn apply<B: Board>(msg: &ConfigMsg, state: &mut DeviceState, board: &mut B) {
    state.led_on = msg.led_state;
    state.must_sleep = msg.must_sleep;
    state.humidity_threshold = msg.humidity_threshold;
    state.minutes_to_sleep = msg.minutes_to_sleep;
    state.watering_duration_ms = msg.watering_duration_msec;

    board.set_led(state.led_on);

    tracing::info!(
        led = state.led_on,
        must_sleep = state.must_sleep,
        humidity_threshold = state.humidity_threshold,
        minutes_to_sleep = state.minutes_to_sleep,
        watering_duration_ms = state.watering_duration_ms,
        "config applied"
    );
}

// ===========================================================================
// Tests
// ===========================================================================
