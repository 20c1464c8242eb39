mod config;
mod controller;
mod hw;
mod rpc;
mod scheduler;
mod sensor;
mod state;
mod telemetry;

use anyhow::Result;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::{env, sync::Arc, time::Duration};
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use hw::SimBoard;
use state::DeviceState;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    // ── Env config ──────────────────────────────────────────────────
    let broker = env::var("MQTT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port: u16 = env::var("MQTT_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(1883);
    let device_id = env::var("DEVICE_ID").unwrap_or_else(|_| "soilguard-01".to_string());

    // ── Board + shared state ────────────────────────────────────────
    let board = Arc::new(Mutex::new(SimBoard::new()));
    let state = DeviceState::shared();

    // ── MQTT ────────────────────────────────────────────────────────
    let client_id = format!("soilguard-{device_id}");
    let mut mqttoptions = MqttOptions::new(client_id, broker, port);
    mqttoptions.set_keep_alive(Duration::from_secs(30));

    let (mqtt, mut eventloop) = AsyncClient::new(mqttoptions, 20);

    let config_topic = telemetry::config_topic(&device_id);
    let rpc_topic = telemetry::rpc_request_topic(&device_id);
    mqtt.subscribe(&config_topic, QoS::AtLeastOnce).await?;
    mqtt.subscribe(&rpc_topic, QoS::AtLeastOnce).await?;
    info!(config = %config_topic, rpc = %rpc_topic, "subscribed");

    // ── Periodic trigger (lifetime of the process) ──────────────────
    tokio::spawn(scheduler::run_periodic(
        Arc::clone(&board),
        Arc::clone(&state),
        mqtt.clone(),
        device_id.clone(),
    ));

    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("mqtt connected");
                tokio::spawn(scheduler::run_wake_sequence(
                    Arc::clone(&board),
                    Arc::clone(&state),
                    mqtt.clone(),
                    device_id.clone(),
                    scheduler::CONNECT_SETTLE,
                ));
            }
            Ok(Event::Incoming(Packet::Publish(p))) => {
                if p.topic == config_topic {
                    let msg = config::parse(&p.payload);
                    let mut st = state.write().await;
                    let mut b = board.lock().await;
                    config::apply(&msg, &mut st, &mut *b);
                } else if p.topic == rpc_topic {
                    if let Some(response) = rpc::handle_request(&p.payload, &board, &state).await {
                        rpc::respond(&mqtt, &device_id, &response).await;
                    }
                } else {
                    warn!(topic = %p.topic, "unhandled topic");
                }
            }
            Ok(_) => {}
            Err(e) => {
                error!("mqtt error: {e}. reconnecting...");
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
        }
    }
}
