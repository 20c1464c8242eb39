//! Power scheduler: the wake sequence (status → settle → watering cycle →
//! optional deep sleep) and its two triggers.
//!
//! Trigger A is the MQTT connection event, which on a deep-sleeping device
//! fires once per boot. Trigger B is a periodic loop with period
//! `minutes_to_sleep`, alive for the whole process, so watering still
//! repeats when sleep is administratively disabled. Both triggers run the
//! same sequence and are serialized behind the controller's busy guard.
//!
//! Deep sleep ends the process: nothing executes past it, and the platform
//! restarts from initialisation on wake.

use std::sync::Arc;
use std::time::Duration;

use rumqttc::AsyncClient;
use tracing::info;

use crate::controller;
use crate::hw::{Board, SharedBoard, MAX_DEEP_SLEEP_USEC};
use crate::state::SharedState;
use crate::telemetry;

/// Settle delay after the connection trigger, before the watering decision.
/// Long enough for the analog line to stabilise and for a retained config
/// message to arrive.
pub const CONNECT_SETTLE: Duration = Duration::from_secs(10);

/// Settle delay for the periodic trigger. The line is already powered, so
/// this one is shorter.
pub const PERIODIC_SETTLE: Duration = Duration::from_secs(5);

/// How often the pre-sleep loop polls the busy guard.
pub const SLEEP_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Convert the configured sleep minutes to microseconds, clamped to the
/// platform's maximum representable duration.
pub fn sleep_duration_usec(minutes: u32) -> u64 {
    u64::from(minutes)
        .saturating_mul(60)
        .saturating_mul(1_000_000)
        .min(MAX_DEEP_SLEEP_USEC)
}

/// One wake sequence: publish status, settle, start a watering cycle, and —
/// if the sleep policy is active — power down once the cycle completes.
pub async fn run_wake_sequence<B: Board + Send + 'static>(
    board: SharedBoard<B>,
    state: SharedState,
    mqtt: AsyncClient,
    device_id: String,
    settle: Duration,
) {
    let adc_enabled = board.lock().await.adc_enabled();
    telemetry::publish_state(&mqtt, &device_id, adc_enabled).await;

    tokio::time::sleep(settle).await;

    // The cycle runs as its own task; its completion is observable only
    // through the busy guard.
    tokio::spawn(controller::run_cycle(
        Arc::clone(&board),
        Arc::clone(&state),
        mqtt,
        device_id,
    ));

    if state.read().await.must_sleep {
        wait_and_sleep(board, state).await;
    }
}

/// Poll until the busy guard clears, then enter deep sleep. The poll loop
/// self-terminates by taking the action that ends the process.
async fn wait_and_sleep<B: Board>(board: SharedBoard<B>, state: SharedState) {
    loop {
        tokio::time::sleep(SLEEP_POLL_INTERVAL).await;
        if !state.read().await.busy {
            break;
        }
        info!("watering still in flight — postponing deep sleep");
    }

    let minutes = state.read().await.minutes_to_sleep;
    let usec = sleep_duration_usec(minutes);
    info!(minutes, usec, "entering deep sleep");
    board.lock().await.deep_sleep(usec);
}

/// The periodic trigger. The period is re-read each round so a config change
/// takes effect at the next cycle.
pub async fn run_periodic<B: Board + Send + 'static>(
    board: SharedBoard<B>,
    state: SharedState,
    mqtt: AsyncClient,
    device_id: String,
) {
    loop {
        let minutes = state.read().await.minutes_to_sleep;
        tokio::time::sleep(Duration::from_secs(u64::from(minutes) * 60)).await;

        info!(minutes, "periodic trigger");
        run_wake_sequence(
            Arc::clone(&board),
            Arc::clone(&state),
            mqtt.clone(),
            device_id.clone(),
            PERIODIC_SETTLE,
        )
        .await;
    }
}

// ===========================================================================
// Tests
// ===========================================================================
