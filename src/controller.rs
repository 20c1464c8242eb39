//! Watering controller: the closed-loop decide/actuate/verify state machine.
//!
//! One cycle owns one `TelemetryRecord` and publishes it exactly once, at the
//! terminal state. The pump is the only physical side effect beyond sensor
//! sampling.
//!
//! ```text
//! Idle ──▶ Deciding ──[soil >= 90]─────────────▶ Idle (sensor fault)
//!             │       [soil >= threshold]──────▶ Idle (nothing to do)
//!             │ [soil < threshold]
//!             ▼
//!          Actuating ──▶ Settling ──▶ Verifying ──[below threshold,
//!             ▲                           │         attempt < 5]
//!             └───────────(retry)─────────┘
//!                                         └──[else]──▶ Idle (publish)
//! ```
//!
//! A verification that shows no measurable moisture gain marks the cycle
//! failed and escalates the watering duration, but does not stop retrying:
//! very dry soil legitimately needs several rounds, and the attempt cap
//! bounds water use if the pump really is dead.

use std::time::Duration;

use rumqttc::AsyncClient;
use tracing::{info, warn};

use crate::hw::{Board, SharedBoard};
use crate::sensor::{self, SENSOR_FAIL_CEILING};
use crate::state::SharedState;
use crate::telemetry::{self, TelemetryRecord};

/// Hard cap on pump actuations within one cycle.
pub const MAX_ATTEMPTS: u32 = 5;

/// Minimum soil-humidity gain (percentage points) a watering attempt must
/// produce before the pump and sensor are trusted.
pub const MIN_EXPECTED_DELTA: f64 = 1.0;

/// Soak margin between pump-off and the verification sample.
pub const SOAK_MARGIN: Duration = Duration::from_secs(30);

/// Grace delay between the terminal publish and clearing the busy guard, so
/// the broker handshake can drain before deep sleep becomes eligible.
pub const BUSY_CLEAR_DELAY: Duration = Duration::from_secs(10);

pub const ERR_SOIL_SENSOR: &str =
    "SOIL_HUMIDITY_SENSOR_FAIL: soil humidity sensor failure; cannot be higher than 90%";
pub const ERR_PUMP_OR_SENSOR: &str =
    "PUMP_OR_HUMIDITY_SENSOR_FAIL: watering pump or soil humidity sensor failure";
pub const ERR_RETRIES_EXHAUSTED: &str =
    "WATERING_RETRIES_EXHAUSTED: soil humidity still below threshold after final attempt";

// ---------------------------------------------------------------------------
// Decision logic (pure)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Reading implausibly high: report, never actuate.
    SensorFault,
    /// Below threshold: start watering.
    Water,
    /// Moisture adequate: nothing to do.
    NoAction,
}

pub fn decide(soil_humidity: f64, threshold: f64) -> Decision {
    if soil_humidity >= SENSOR_FAIL_CEILING {
        Decision::SensorFault
    } else if soil_humidity < threshold {
        Decision::Water
    } else {
        Decision::NoAction
    }
}

/// Outcome of one verification sample. `fault` and `retry` are independent:
/// a suspected pump fault still retries while attempts remain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verification {
    pub fault: bool,
    pub retry: bool,
}

/// Judge a verification sample against the cycle's initially recorded soil
/// humidity (the record field is only rewritten at the terminal state).
pub fn verify(recorded: f64, new: f64, threshold: f64, attempt: u32) -> Verification {
    Verification {
        fault: new < recorded + MIN_EXPECTED_DELTA,
        retry: new < threshold && attempt < MAX_ATTEMPTS,
    }
}

// ---------------------------------------------------------------------------
// Actuation
// ---------------------------------------------------------------------------

/// One pump pulse: on, hold for `duration_ms`, off. The lock is released
/// while the pump runs so RPC reads stay responsive.
pub async fn pump_pulse<B: Board>(board: &SharedBoard<B>, duration_ms: u32) {
    board.lock().await.set_pump(true);
    tokio::time::sleep(Duration::from_millis(u64::from(duration_ms))).await;
    board.lock().await.set_pump(false);
}

// ---------------------------------------------------------------------------
// The cycle
// ---------------------------------------------------------------------------

/// Run the state machine to its terminal state and return the record to
/// publish. Does not touch the busy guard; `run_cycle` owns that.
pub async fn water_cycle<B: Board>(board: &SharedBoard<B>, state: &SharedState) -> TelemetryRecord {
    let (reading, climate) = {
        let mut b = board.lock().await;
        (sensor::sample_stabilized(&mut *b), sensor::sample_climate(&mut *b))
    };
    let mut record = TelemetryRecord::new(reading.soil_humidity, climate);
    let threshold = state.read().await.humidity_threshold;

    match decide(reading.soil_humidity, threshold) {
        Decision::SensorFault => {
            warn!(
                soil_humidity = reading.soil_humidity,
                "implausible soil reading — not watering"
            );
            record.fail(ERR_SOIL_SENSOR);
            return record;
        }
        Decision::NoAction => {
            info!(
                soil_humidity = reading.soil_humidity,
                threshold, "soil humidity adequate"
            );
            return record;
        }
        Decision::Water => {}
    }

    record.attempt = Some(1);
    record.watered_flag = Some(true);

    loop {
        let attempt = record.attempt.unwrap_or(1);
        let duration_ms = state.read().await.watering_duration_ms;
        info!(attempt, duration_ms, "watering plant");

        pump_pulse(board, duration_ms).await;
        tokio::time::sleep(SOAK_MARGIN).await;

        let new = {
            let mut b = board.lock().await;
            sensor::sample(&mut *b).soil_humidity
        };
        let threshold = state.read().await.humidity_threshold;
        let v = verify(record.soil_humidity, new, threshold, attempt);
        info!(
            prev = record.soil_humidity,
            new, attempt, "checking watering result"
        );

        if v.fault {
            warn!("no measurable moisture gain — escalating watering duration");
            state.write().await.escalate_watering_duration();
            record.fail(ERR_PUMP_OR_SENSOR);
        }

        if v.retry {
            record.attempt = Some(attempt + 1);
            continue;
        }

        if new < threshold {
            // Attempts exhausted while still dry: distinct terminal error,
            // not the per-attempt fault string.
            record.fail(ERR_RETRIES_EXHAUSTED);
        }
        record.soil_humidity = new;
        return record;
    }
}

/// One full watering cycle behind the busy guard: set busy, run the state
/// machine, publish the terminal record, hold the grace delay, clear busy.
///
/// Both scheduler triggers and any overlapping connection event funnel
/// through here; a trigger that arrives while a cycle is in flight is
/// dropped.
pub async fn run_cycle<B: Board>(
    board: SharedBoard<B>,
    state: SharedState,
    mqtt: AsyncClient,
    device_id: String,
) {
    {
        let mut st = state.write().await;
        if st.busy {
            warn!("watering cycle already in flight — dropping trigger");
            return;
        }
        st.busy = true;
    }

    let record = water_cycle(&board, &state).await;
    telemetry::publish_event(&mqtt, &device_id, &record).await;

    tokio::time::sleep(BUSY_CLEAR_DELAY).await;
    state.write().await.busy = false;
}

// ===========================================================================
// Tests
// ===========================================================================
