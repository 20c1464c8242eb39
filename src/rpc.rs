//! Ad-hoc RPC over MQTT: requests arrive on the device's RPC request topic
//! as `{ "id": n, "method": "Name.Verb" }`, responses go out on the response
//! topic as `{ "id": n, "result": { ... } }`. These handlers bypass the
//! scheduler entirely.

use std::sync::Arc;

use rumqttc::{AsyncClient, QoS};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::controller;
use crate::hw::{Board, SharedBoard};
use crate::scheduler;
use crate::sensor;
use crate::state::SharedState;
use crate::telemetry::rpc_response_topic;

pub const ERR_DHT_SENSOR: &str = "DHT_SENSOR_FAIL: failed to get temp and humidity readings";

#[derive(Debug, Deserialize)]
struct RpcRequest {
    id: u64,
    method: String,
}

/// Dispatch one RPC request payload. Returns the response to publish, or
/// `None` when there is nothing to say (unparseable request, or
/// `Board.Sleep`, which on real hardware never returns).
pub async fn handle_request<B: Board + Send + 'static>(
    payload: &[u8],
    board: &SharedBoard<B>,
    state: &SharedState,
) -> Option<Value> {
    let req: RpcRequest = match serde_json::from_slice(payload) {
        Ok(req) => req,
        Err(e) => {
            warn!("bad rpc request: {e}");
            return None;
        }
    };
    info!(id = req.id, method = %req.method, "rpc request");

    let result = match req.method.as_str() {
        "ADC.Read" => {
            let r = {
                let mut b = board.lock().await;
                sensor::sample(&mut *b)
            };
            json!({
                "adc_reading": r.raw,
                "adc_percentage": r.percentage,
                "success": true,
            })
        }

        "ToggleLED.Action" => {
            let led_on = {
                let mut st = state.write().await;
                st.led_on = !st.led_on;
                st.led_on
            };
            board.lock().await.set_led(led_on);
            json!({ "success": true })
        }

        "Board.Sleep" => {
            let minutes = state.read().await.minutes_to_sleep;
            let usec = scheduler::sleep_duration_usec(minutes);
            info!(minutes, "rpc-triggered deep sleep");
            board.lock().await.deep_sleep(usec);
            return None;
        }

        "WaterPlant.Action" => {
            // Fire the pump for the configured duration; the pulse runs as
            // its own task so the response goes out immediately.
            let duration_ms = state.read().await.watering_duration_ms;
            let board = Arc::clone(board);
            tokio::spawn(async move {
                controller::pump_pulse(&board, duration_ms).await;
            });
            json!({ "success": true })
        }

        "TempHumidity.Read" => {
            let (temp, humidity) = {
                let mut b = board.lock().await;
                (b.read_temp(), b.read_humidity())
            };
            if temp.is_nan() || humidity.is_nan() {
                json!({ "success": false, "error": ERR_DHT_SENSOR })
            } else {
                json!({ "temp": temp, "humidity": humidity, "success": true })
            }
        }

        other => {
            warn!(method = %other, "unknown rpc method");
            json!({ "success": false, "error": format!("unknown method '{other}'") })
        }
    };

    Some(json!({ "id": req.id, "result": result }))
}

/// Publish an RPC response; a broker failure is logged, not propagated.
pub async fn respond(mqtt: &AsyncClient, device_id: &str, response: &Value) {
    let topic = rpc_response_topic(device_id);
    match serde_json::to_vec(response) {
        Ok(payload) => {
            if let Err(e) = mqtt.publish(&topic, QoS::AtLeastOnce, false, payload).await {
                tracing::error!("rpc response publish failed: {e}");
            }
        }
        Err(e) => tracing::error!("rpc response serialize failed: {e}"),
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::FakeBoard;
    use crate::state::DeviceState;
    use std::time::Duration;
    use tokio::sync::Mutex;

    fn shared_board(raws: &[i32]) -> SharedBoard<FakeBoard> {
        Arc::new(Mutex::new(FakeBoard::new(raws)))
    }

    async fn dispatch(
        payload: &[u8],
        board: &SharedBoard<FakeBoard>,
        state: &SharedState,
    ) -> Option<Value> {
        handle_request(payload, board, state).await
    }

    // -- ADC.Read -----------------------------------------------------------

    #[tokio::test]
    async fn adc_read_returns_raw_and_percentage() {
        let board = shared_board(&[2047]);
        let state = DeviceState::shared();

        let resp = dispatch(br#"{"id":1,"method":"ADC.Read"}"#, &board, &state)
            .await
            .unwrap();

        assert_eq!(resp["id"], 1);
        let result = &resp["result"];
        assert_eq!(result["adc_reading"], 2047);
        assert!((result["adc_percentage"].as_f64().unwrap() - 49.98).abs() < 0.1);
        assert_eq!(result["success"], true);
    }

    // -- ToggleLED.Action ---------------------------------------------------

    #[tokio::test]
    async fn toggle_led_flips_state_and_line() {
        let board = shared_board(&[]);
        let state = DeviceState::shared();

        let resp = dispatch(br#"{"id":2,"method":"ToggleLED.Action"}"#, &board, &state)
            .await
            .unwrap();
        assert_eq!(resp["result"]["success"], true);
        assert!(state.read().await.led_on);
        assert!(board.lock().await.led_on);

        dispatch(br#"{"id":3,"method":"ToggleLED.Action"}"#, &board, &state).await;
        assert!(!state.read().await.led_on);
        assert!(!board.lock().await.led_on);
    }

    // -- Board.Sleep ----------------------------------------------------------

    #[tokio::test]
    async fn board_sleep_has_no_response_and_sleeps_clamped() {
        let board = shared_board(&[]);
        let state = DeviceState::shared();

        let resp = dispatch(br#"{"id":4,"method":"Board.Sleep"}"#, &board, &state).await;

        assert!(resp.is_none(), "deep sleep has no normal return");
        // Default 240 minutes, well under the platform cap.
        assert_eq!(board.lock().await.slept_usec, Some(14_400_000_000));
    }

    // -- WaterPlant.Action ----------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn water_plant_pulses_for_configured_duration() {
        let board = shared_board(&[]);
        let state = DeviceState::shared();
        state.write().await.watering_duration_ms = 1500;

        let resp = dispatch(br#"{"id":5,"method":"WaterPlant.Action"}"#, &board, &state)
            .await
            .unwrap();
        assert_eq!(resp["result"]["success"], true);

        // Pulse runs in the background; let it finish.
        tokio::time::sleep(Duration::from_secs(2)).await;
        let b = board.lock().await;
        assert_eq!(b.pump_pulses(), 1);
        assert_eq!(b.pump_log.last(), Some(&false), "pump must end OFF");
    }

    // -- TempHumidity.Read ----------------------------------------------------

    #[tokio::test]
    async fn temp_humidity_returns_readings() {
        let board = shared_board(&[]);
        board.lock().await.temp = 23.0;
        board.lock().await.humidity = 51.0;
        let state = DeviceState::shared();

        let resp = dispatch(br#"{"id":6,"method":"TempHumidity.Read"}"#, &board, &state)
            .await
            .unwrap();
        let result = &resp["result"];
        assert_eq!(result["temp"], 23.0);
        assert_eq!(result["humidity"], 51.0);
        assert_eq!(result["success"], true);
    }

    #[tokio::test]
    async fn temp_humidity_nan_is_an_error() {
        let board = shared_board(&[]);
        board.lock().await.humidity = f64::NAN;
        let state = DeviceState::shared();

        let resp = dispatch(br#"{"id":7,"method":"TempHumidity.Read"}"#, &board, &state)
            .await
            .unwrap();
        let result = &resp["result"];
        assert_eq!(result["success"], false);
        assert_eq!(result["error"], ERR_DHT_SENSOR);
        assert!(result.get("temp").is_none());
    }

    // -- Envelope -------------------------------------------------------------

    #[tokio::test]
    async fn unknown_method_reports_error() {
        let board = shared_board(&[]);
        let state = DeviceState::shared();

        let resp = dispatch(br#"{"id":8,"method":"Nope.Action"}"#, &board, &state)
            .await
            .unwrap();
        assert_eq!(resp["id"], 8);
        assert_eq!(resp["result"]["success"], false);
        assert!(resp["result"]["error"]
            .as_str()
            .unwrap()
            .contains("Nope.Action"));
    }

    #[tokio::test]
    async fn unparseable_request_is_dropped() {
        let board = shared_board(&[]);
        let state = DeviceState::shared();

        assert!(dispatch(b"not json", &board, &state).await.is_none());
        assert!(dispatch(br#"{"method":"ADC.Read"}"#, &board, &state)
            .await
            .is_none());
    }
}
