//! Vendor unit conversions and the zero-as-missing reading policy.
//!
//! Every function is pure; the same input always yields the same output.

/// Wind speed in metres per second to kilometres per hour (`v * 3.6`).
pub fn mps_to_kmh(value: f64) -> f64 {
    value * 3.6
}

/// Pressure in pascals to hectopascals (`v * 0.01`).
pub fn pa_to_hpa(value: f64) -> f64 {
    value * 0.01
}

/// Ecobee raw temperature (tenths of a degree Fahrenheit) to the stored
/// scale: `(raw - 320) * 5 / 90`. Not the textbook `5 / 9` conversion.
pub fn ecobee_tenths_f_to_c(raw: i64) -> f64 {
    (raw as f64 - 320.0) * 5.0 / 90.0
}

/// A reading is only kept when it is not exactly zero. Used for temperature,
/// where zero means "no data" but negative values are real.
pub fn nonzero(value: Option<f64>) -> Option<f64> {
    value.filter(|v| *v != 0.0)
}

/// A reading is only kept when strictly positive. Used for humidity,
/// pressure and wind speed, where zero means "no data".
pub fn positive(value: Option<f64>) -> Option<f64> {
    value.filter(|v| *v > 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ecobee_scale_uses_ninety_divisor() {
        assert_eq!(ecobee_tenths_f_to_c(320), 0.0);
        assert_eq!(ecobee_tenths_f_to_c(716), (716.0 - 320.0) * 5.0 / 90.0);
        assert!((ecobee_tenths_f_to_c(716) - 22.0).abs() < 1e-9);
        assert!((ecobee_tenths_f_to_c(140) + 10.0).abs() < 1e-9);
    }

    #[test]
    fn speed_and_pressure_conversions() {
        assert!((mps_to_kmh(5.0) - 18.0).abs() < 1e-9);
        assert!((pa_to_hpa(101_325.0) - 1013.25).abs() < 1e-9);
    }

    #[test]
    fn zero_policies_differ_for_negatives() {
        assert_eq!(nonzero(Some(0.0)), None);
        assert_eq!(nonzero(Some(-0.001)), Some(-0.001));
        assert_eq!(nonzero(None), None);

        assert_eq!(positive(Some(0.0)), None);
        assert_eq!(positive(Some(-3.0)), None);
        assert_eq!(positive(Some(0.01)), Some(0.01));
    }
}
