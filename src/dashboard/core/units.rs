use std::fmt;
use std::str::FromStr;

use crate::error::WindflowError;

const COMPASS_POINTS: [&str; 16] = [
    "N", "NNE", "NE", "ENE", "E", "ESE", "SE", "SSE", "S", "SSW", "SW", "WSW", "W", "WNW", "NW",
    "NNW",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TemperatureUnit {
    #[default]
    Celsius,
    Fahrenheit,
    Kelvin,
}

impl TemperatureUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            TemperatureUnit::Celsius => "C",
            TemperatureUnit::Fahrenheit => "F",
            TemperatureUnit::Kelvin => "K",
        }
    }
}

impl fmt::Display for TemperatureUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TemperatureUnit {
    type Err = WindflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "C" => Ok(TemperatureUnit::Celsius),
            "F" => Ok(TemperatureUnit::Fahrenheit),
            "K" => Ok(TemperatureUnit::Kelvin),
            other => Err(WindflowError::ValidationError(format!(
                "unknown temperature unit '{}'",
                other
            ))),
        }
    }
}

/// Converts a Celsius reading into `unit`.
pub fn convert_temperature(value_c: f64, unit: TemperatureUnit) -> f64 {
    match unit {
        TemperatureUnit::Celsius => value_c,
        TemperatureUnit::Fahrenheit => value_c * 9.0 / 5.0 + 32.0,
        TemperatureUnit::Kelvin => value_c + 273.15,
    }
}

/// Converts between any two scales by way of Celsius.
pub fn convert_between(value: f64, from: TemperatureUnit, to: TemperatureUnit) -> f64 {
    let celsius = match from {
        TemperatureUnit::Celsius => value,
        TemperatureUnit::Fahrenheit => (value - 32.0) * 5.0 / 9.0,
        TemperatureUnit::Kelvin => value - 273.15,
    };
    convert_temperature(celsius, to)
}

/// Card-style rendering, e.g. `"21.50 °C"`.
pub fn format_temperature(value_c: f64, unit: TemperatureUnit) -> String {
    format!("{:.2} °{}", convert_temperature(value_c, unit), unit)
}

/// Quantizes a bearing onto the 16-point compass rose.
///
/// Callers are expected to pass `degrees` already reduced to `[0, 360)`.
pub fn compass_direction(degrees: f64) -> &'static str {
    let index = (degrees / 22.5).round() as i64;
    COMPASS_POINTS[index.rem_euclid(16) as usize]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_celsius_to_other_scales() {
        assert_eq!(convert_temperature(0.0, TemperatureUnit::Fahrenheit), 32.0);
        assert_eq!(convert_temperature(100.0, TemperatureUnit::Fahrenheit), 212.0);
        assert_eq!(convert_temperature(0.0, TemperatureUnit::Kelvin), 273.15);
        assert_eq!(convert_temperature(-12.5, TemperatureUnit::Celsius), -12.5);
    }

    #[test]
    fn fahrenheit_round_trip_restores_celsius() {
        for x in [-40.0, -3.7, 0.0, 18.25, 36.6, 49.9] {
            let f = convert_between(x, TemperatureUnit::Celsius, TemperatureUnit::Fahrenheit);
            let back = convert_between(f, TemperatureUnit::Fahrenheit, TemperatureUnit::Celsius);
            assert!((back - x).abs() < 1e-9, "{} -> {} -> {}", x, f, back);
        }
    }

    #[test]
    fn compass_boundaries() {
        assert_eq!(compass_direction(0.0), "N");
        assert_eq!(compass_direction(348.75), "N");
        assert_eq!(compass_direction(180.0), "S");
        assert_eq!(compass_direction(90.0), "E");
        assert_eq!(compass_direction(11.24), "N");
        assert_eq!(compass_direction(11.25), "NNE");
        assert_eq!(compass_direction(315.0), "NW");
        assert_eq!(compass_direction(337.5), "NNW");
        assert_eq!(compass_direction(348.74), "NNW");
    }

    #[test]
    fn parses_unit_symbols() {
        assert_eq!("f".parse::<TemperatureUnit>().unwrap(), TemperatureUnit::Fahrenheit);
        assert_eq!(" K ".parse::<TemperatureUnit>().unwrap(), TemperatureUnit::Kelvin);
        assert!("R".parse::<TemperatureUnit>().is_err());
    }

    #[test]
    fn formats_for_display() {
        assert_eq!(format_temperature(21.5, TemperatureUnit::Celsius), "21.50 °C");
        assert_eq!(format_temperature(10.0, TemperatureUnit::Fahrenheit), "50.00 °F");
    }
}
