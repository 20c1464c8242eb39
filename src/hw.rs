//! Hardware seam: pump/LED GPIO lines, soil-moisture ADC, DHT sensor, and
//! the deep-sleep primitive, behind a single `Board` trait.
//!
//! Real drivers live on the other side of this trait and are not part of
//! this crate. The default `SimBoard` models a capacitive sensor well enough
//! to exercise the controller end to end:
//! - Temporal coherence via random walk with drying drift
//! - Per-reading electronic noise
//! - Closed-loop watering response (moisture rises while the pump runs)

use std::sync::Arc;
use tokio::sync::Mutex;

/// The board is shared between the scheduler, the controller, and the RPC
/// layer; access is serialized through one async mutex.
pub type SharedBoard<B> = Arc<Mutex<B>>;

// ---------------------------------------------------------------------------
// Platform constants
// ---------------------------------------------------------------------------

/// Full-scale raw value of the soil-moisture ADC channel (12-bit).
pub const ADC_FULL_SCALE: i32 = 4095;

/// Longest representable deep-sleep duration: the RTC wakeup counter is
/// 48 bits of microseconds. Requested durations are clamped to this.
pub const MAX_DEEP_SLEEP_USEC: u64 = (1 << 48) - 1;

// ---------------------------------------------------------------------------
// Board trait
// ---------------------------------------------------------------------------

/// Driver contract consumed by the controller, scheduler, and RPC layer.
pub trait Board {
    /// Drive the pump output line.
    fn set_pump(&mut self, on: bool);

    /// Drive the indicator LED line.
    fn set_led(&mut self, on: bool);

    /// Whether the ADC channel came up at boot.
    fn adc_enabled(&self) -> bool;

    /// One raw soil-moisture sample, 0..=`ADC_FULL_SCALE`.
    fn read_soil_raw(&mut self) -> i32;

    /// DHT temperature in Celsius; NaN when the sensor does not respond.
    fn read_temp(&mut self) -> f64;

    /// DHT relative humidity in percent; NaN when the sensor does not respond.
    fn read_humidity(&mut self) -> f64;

    /// Enter deep sleep for `usec` microseconds. On real hardware this never
    /// returns; the platform restarts the process from initialisation on wake.
    fn deep_sleep(&mut self, usec: u64);
}

// ---------------------------------------------------------------------------
// Simulated board (development — no hardware)
// ---------------------------------------------------------------------------

/// Approximate a sample from N(0,1) using the Irwin-Hall method:
/// sum of 12 uniform [0,1) values minus 6.
fn approx_std_normal() -> f64 {
    let mut sum: f64 = 0.0;
    for _ in 0..12 {
        sum += fastrand::f64();
    }
    sum - 6.0
}

/// Stateful simulator producing plausible soil/DHT readings.
pub struct SimBoard {
    /// Current "true" raw moisture value. High = dry.
    base: f64,
    /// Drying drift per sample, in ADC units (positive = drier).
    drift: f64,
    /// Electronic noise sigma, in ADC units.
    noise_sigma: f64,
    /// Raw-units decrease per sample while the pump is on.
    wet_rate: f64,
    pump_on: bool,
    led_on: bool,
}

impl Default for SimBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl SimBoard {
    pub fn new() -> Self {
        Self {
            // Start on the dry side so a first run actually waters.
            base: 0.70 * ADC_FULL_SCALE as f64,
            drift: 0.5,
            noise_sigma: 12.0,
            wet_rate: 120.0,
            pump_on: false,
            led_on: false,
        }
    }
}

impl Board for SimBoard {
    fn set_pump(&mut self, on: bool) {
        self.pump_on = on;
        tracing::info!(on, "[sim] pump");
    }

    fn set_led(&mut self, on: bool) {
        self.led_on = on;
        tracing::info!(on, "[sim] led");
    }

    fn adc_enabled(&self) -> bool {
        true
    }

    fn read_soil_raw(&mut self) -> i32 {
        let wet = if self.pump_on { -self.wet_rate } else { 0.0 };
        self.base = (self.base + self.drift + wet).clamp(0.0, ADC_FULL_SCALE as f64);

        let noise = self.noise_sigma * approx_std_normal();
        (self.base + noise).round().clamp(0.0, ADC_FULL_SCALE as f64) as i32
    }

    fn read_temp(&mut self) -> f64 {
        21.0 + approx_std_normal() * 0.3
    }

    fn read_humidity(&mut self) -> f64 {
        42.0 + approx_std_normal() * 1.5
    }

    fn deep_sleep(&mut self, usec: u64) {
        // Deep sleep ends the process; the platform reboots it on wake.
        tracing::info!(usec, "[sim] entering deep sleep");
        std::process::exit(0);
    }
}

// ---------------------------------------------------------------------------
// Scripted board (test-only)
// ---------------------------------------------------------------------------

/// Deterministic board for tests: raw soil readings come from a queue (the
/// last value repeats once drained), every pump transition is logged, and
/// the deep-sleep request is recorded instead of terminating.
#[cfg(test)]
pub struct FakeBoard {
    pub soil_raw: std::collections::VecDeque<i32>,
    pub last_raw: i32,
    pub temp: f64,
    pub humidity: f64,
    pub adc_ok: bool,
    pub pump_log: Vec<bool>,
    pub led_on: bool,
    pub slept_usec: Option<u64>,
}

#[cfg(test)]
impl FakeBoard {
    pub fn new(soil_raw: &[i32]) -> Self {
        Self {
            soil_raw: soil_raw.iter().copied().collect(),
            last_raw: soil_raw.last().copied().unwrap_or(0),
            temp: 20.5,
            humidity: 45.0,
            adc_ok: true,
            pump_log: Vec::new(),
            led_on: false,
            slept_usec: None,
        }
    }

    /// Number of completed pump pulses (on transitions).
    pub fn pump_pulses(&self) -> usize {
        self.pump_log.iter().filter(|&&on| on).count()
    }
}

#[cfg(test)]
impl Board for FakeBoard {
    fn set_pump(&mut self, on: bool) {
        self.pump_log.push(on);
    }

    fn set_led(&mut self, on: bool) {
        self.led_on = on;
    }

    fn adc_enabled(&self) -> bool {
        self.adc_ok
    }

    fn read_soil_raw(&mut self) -> i32 {
        match self.soil_raw.pop_front() {
            Some(v) => {
                self.last_raw = v;
                v
            }
            None => self.last_raw,
        }
    }

    fn read_temp(&mut self) -> f64 {
        self.temp
    }

    fn read_humidity(&mut self) -> f64 {
        self.humidity
    }

    fn deep_sleep(&mut self, usec: u64) {
        self.slept_usec = Some(usec);
    }
}

// ===========================================================================
// Tests
// ===========================================================================
