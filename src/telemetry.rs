//! Outbound MQTT payloads and topic layout.
//!
//! One `TelemetryRecord` exists per watering cycle: built at the first
//! sample, mutated across retries, serialized and published exactly once at
//! the terminal state. Status messages are lighter and fire at the start of
//! every wake sequence. Broker NACKs are logged and never propagated.

use rumqttc::{AsyncClient, QoS};
use serde::{Deserialize, Serialize};
use sysinfo::System;

use crate::sensor::Climate;

// ---------------------------------------------------------------------------
// Topics (device-id-scoped)
// ---------------------------------------------------------------------------

/// Outbound status: `/devices/{id}/state`.
pub fn state_topic(device_id: &str) -> String {
    format!("/devices/{device_id}/state")
}

/// Outbound telemetry: `/devices/{id}/events`.
pub fn events_topic(device_id: &str) -> String {
    format!("/devices/{device_id}/events")
}

/// Inbound configuration: `/devices/{id}/config`.
pub fn config_topic(device_id: &str) -> String {
    format!("/devices/{device_id}/config")
}

/// Inbound RPC requests: `/devices/{id}/rpc/request`.
pub fn rpc_request_topic(device_id: &str) -> String {
    format!("/devices/{device_id}/rpc/request")
}

/// Outbound RPC responses: `/devices/{id}/rpc/response`.
pub fn rpc_response_topic(device_id: &str) -> String {
    format!("/devices/{device_id}/rpc/response")
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// Event payload for one watering cycle. Optional fields are omitted from
/// the JSON entirely when absent (a NaN DHT read, a cycle that never
/// watered).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub soil_humidity: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub humidity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub watered_flag: Option<bool>,
}

impl TelemetryRecord {
    pub fn new(soil_humidity: f64, climate: Climate) -> Self {
        Self {
            success: true,
            error: None,
            soil_humidity,
            humidity: climate.humidity,
            temp: climate.temp,
            attempt: None,
            watered_flag: None,
        }
    }

    /// Latch a failure. `success` never flips back to true within a cycle.
    pub fn fail(&mut self, error: &str) {
        self.success = false;
        self.error = Some(error.to_string());
    }
}

/// Status payload published at the start of each wake sequence.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusMsg {
    /// Free memory in bytes.
    pub free: u64,
    /// Total memory in bytes.
    pub total: u64,
    pub adc_enabled: bool,
}

impl StatusMsg {
    pub fn gather(adc_enabled: bool) -> Self {
        let mut sys = System::new();
        sys.refresh_memory();
        Self {
            free: sys.free_memory(),
            total: sys.total_memory(),
            adc_enabled,
        }
    }
}

// ---------------------------------------------------------------------------
// Publishing
// ---------------------------------------------------------------------------

/// Publish the status message. A failed publish is logged, not an error for
/// the caller.
pub async fn publish_state(mqtt: &AsyncClient, device_id: &str, adc_enabled: bool) {
    let msg = StatusMsg::gather(adc_enabled);
    let topic = state_topic(device_id);
    match serde_json::to_vec(&msg) {
        Ok(payload) => {
            tracing::info!(topic = %topic, free = msg.free, total = msg.total, "publishing status");
            if let Err(e) = mqtt.publish(&topic, QoS::AtLeastOnce, false, payload).await {
                tracing::error!("status publish failed: {e}");
            }
        }
        Err(e) => tracing::error!("status serialize failed: {e}"),
    }
}

/// Publish the terminal telemetry record for a watering cycle.
pub async fn publish_event(mqtt: &AsyncClient, device_id: &str, record: &TelemetryRecord) {
    let topic = events_topic(device_id);
    match serde_json::to_vec(record) {
        Ok(payload) => {
            tracing::info!(
                topic = %topic,
                success = record.success,
                soil_humidity = record.soil_humidity,
                "publishing telemetry"
            );
            if let Err(e) = mqtt.publish(&topic, QoS::AtLeastOnce, false, payload).await {
                tracing::error!("telemetry publish failed: {e}");
            }
        }
        Err(e) => tracing::error!("telemetry serialize failed: {e}"),
    }
}

// ===========================================================================
// Tests
// ===========================================================================
