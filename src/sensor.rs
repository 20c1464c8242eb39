//! Sensor sampling and unit conversion. Raw ADC counts become a moisture
//! percentage; soil humidity is the inverse (the probe reads near zero when
//! immersed in water). DHT reads may come back NaN when the sensor does not
//! respond; that is mapped to `None` and is never fatal.

use crate::hw::{Board, ADC_FULL_SCALE};

/// Soil humidity at or above this is implausible and treated as a sensor
/// failure rather than a watering candidate.
pub const SENSOR_FAIL_CEILING: f64 = 90.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SoilReading {
    pub raw: i32,
    /// Raw value as a percentage of full scale. High = dry.
    pub percentage: f64,
    /// `100 - percentage`, rounded to one decimal. 0 = dry, 100 = saturated.
    pub soil_humidity: f64,
}

/// Round to one decimal place.
pub fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

fn convert(raw: i32) -> SoilReading {
    let percentage = raw as f64 * 100.0 / ADC_FULL_SCALE as f64;
    SoilReading {
        raw,
        percentage,
        soil_humidity: round1(100.0 - percentage),
    }
}

/// One raw sample, converted.
pub fn sample<B: Board>(board: &mut B) -> SoilReading {
    convert(board.read_soil_raw())
}

/// Three consecutive raw samples, keeping only the last. Damps the power-on
/// transient of the analog line before a watering decision is made.
pub fn sample_stabilized<B: Board>(board: &mut B) -> SoilReading {
    let mut raw = board.read_soil_raw();
    for _ in 0..2 {
        raw = board.read_soil_raw();
    }
    convert(raw)
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Climate {
    pub temp: Option<f64>,
    pub humidity: Option<f64>,
}

/// Read the DHT sensor. NaN results are dropped, not errors: the record
/// simply goes out without the affected field.
pub fn sample_climate<B: Board>(board: &mut B) -> Climate {
    let temp = board.read_temp();
    let humidity = board.read_humidity();
    Climate {
        temp: (!temp.is_nan()).then_some(temp),
        humidity: (!humidity.is_nan()).then_some(humidity),
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::FakeBoard;

    #[test]
    fn full_scale_raw_is_zero_soil_humidity() {
        let mut board = FakeBoard::new(&[ADC_FULL_SCALE]);
        let r = sample(&mut board);
        assert_eq!(r.percentage, 100.0);
        assert_eq!(r.soil_humidity, 0.0);
    }

    #[test]
    fn zero_raw_is_saturated() {
        let mut board = FakeBoard::new(&[0]);
        let r = sample(&mut board);
        assert_eq!(r.percentage, 0.0);
        assert_eq!(r.soil_humidity, 100.0);
    }

    #[test]
    fn soil_humidity_rounds_to_one_decimal() {
        // 1234 / 4095 * 100 = 30.134...% → soil humidity 69.866...% → 69.9
        let mut board = FakeBoard::new(&[1234]);
        let r = sample(&mut board);
        assert_eq!(r.soil_humidity, 69.9);
    }

    #[test]
    fn stabilized_sample_uses_third_reading() {
        let mut board = FakeBoard::new(&[0, 100, 2047]);
        let r = sample_stabilized(&mut board);
        assert_eq!(r.raw, 2047);
        assert!(board.soil_raw.is_empty(), "should consume three samples");
    }

    #[test]
    fn climate_maps_nan_to_none() {
        let mut board = FakeBoard::new(&[]);
        board.temp = f64::NAN;
        board.humidity = f64::NAN;
        let c = sample_climate(&mut board);
        assert_eq!(c.temp, None);
        assert_eq!(c.humidity, None);
    }

    #[test]
    fn climate_keeps_valid_readings() {
        let mut board = FakeBoard::new(&[]);
        board.temp = 19.5;
        board.humidity = 61.0;
        let c = sample_climate(&mut board);
        assert_eq!(c.temp, Some(19.5));
        assert_eq!(c.humidity, Some(61.0));
    }

    #[test]
    fn climate_can_be_partial() {
        let mut board = FakeBoard::new(&[]);
        board.temp = f64::NAN;
        board.humidity = 55.0;
        let c = sample_climate(&mut board);
        assert_eq!(c.temp, None);
        assert_eq!(c.humidity, Some(55.0));
    }

    #[test]
    fn round1_behaviour() {
        assert_eq!(round1(69.849), 69.8);
        assert_eq!(round1(69.85), 69.9);
        assert_eq!(round1(0.0), 0.0);
        assert_eq!(round1(100.0), 100.0);
    }
}
