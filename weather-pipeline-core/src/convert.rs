/// Convert a temperature from Kelvin to Fahrenheit.
///
/// No range validation is done: negative or sub-absolute-zero inputs are
/// converted as-is, and NaN/infinity propagate.
pub fn kelvin_to_fahrenheit(temp: f64) -> f64 {
    (temp - 273.15) * (9.0 / 5.0) + 32.0
}
