use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize, Serializer};

use crate::error::ShapeError;

/// Current-weather document as returned by the OpenWeather API.
///
/// Only the fields the pipeline reads are modelled; anything else is ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct WeatherObservation {
    pub name: String,
    pub weather: Vec<Condition>,
    pub main: MainMeasurements,
    pub wind: Wind,
    /// Observation instant, epoch seconds (UTC).
    pub dt: i64,
    /// Shift from UTC in seconds.
    pub timezone: i64,
    pub sys: Sys,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Condition {
    pub description: String,
}

/// Temperatures are in Kelvin.
#[derive(Debug, Clone, Deserialize)]
pub struct MainMeasurements {
    pub temp: f64,
    pub feels_like: f64,
    pub temp_min: f64,
    pub temp_max: f64,
    pub pressure: i64,
    pub humidity: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Wind {
    pub speed: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Sys {
    pub sunrise: i64,
    pub sunset: i64,
}

impl WeatherObservation {
    /// Parse a fetched JSON document. An empty `weather` array is rejected.
    pub fn from_value(value: &serde_json::Value) -> Result<Self, ShapeError> {
        let obs: WeatherObservation = serde_json::from_value(value.clone())?;
        obs.check()
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, ShapeError> {
        let obs: WeatherObservation = serde_json::from_slice(bytes)?;
        obs.check()
    }

    /// Description of the first reported condition.
    pub fn description(&self) -> Result<&str, ShapeError> {
        self.weather
            .first()
            .map(|c| c.description.as_str())
            .ok_or(ShapeError::NoConditions)
    }

    fn check(self) -> Result<Self, ShapeError> {
        self.description()?;
        Ok(self)
    }
}

/// One flattened output row. Field order is the CSV column order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeatherRecord {
    #[serde(rename = "City")]
    pub city: String,
    #[serde(rename = "Description")]
    pub description: String,
    #[serde(rename = "Temperature (F)")]
    pub temperature_f: f64,
    #[serde(rename = "Feels Like (F)")]
    pub feels_like_f: f64,
    #[serde(rename = "Minimum Temp (F)")]
    pub min_temp_f: f64,
    #[serde(rename = "Maximum Temp (F)")]
    pub max_temp_f: f64,
    #[serde(rename = "Pressure")]
    pub pressure: i64,
    #[serde(rename = "Humidity")]
    pub humidity: i64,
    #[serde(rename = "Wind Speed")]
    pub wind_speed: f64,
    #[serde(rename = "Time of Record", serialize_with = "naive_timestamp")]
    pub time_of_record: NaiveDateTime,
    #[serde(rename = "Sunrise (Local Time)", serialize_with = "naive_timestamp")]
    pub sunrise: NaiveDateTime,
    #[serde(rename = "Sunset (Local Time)", serialize_with = "naive_timestamp")]
    pub sunset: NaiveDateTime,
}

impl WeatherRecord {
    pub const COLUMNS: [&'static str; 12] = [
        "City",
        "Description",
        "Temperature (F)",
        "Feels Like (F)",
        "Minimum Temp (F)",
        "Maximum Temp (F)",
        "Pressure",
        "Humidity",
        "Wind Speed",
        "Time of Record",
        "Sunrise (Local Time)",
        "Sunset (Local Time)",
    ];
}

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

fn naive_timestamp<S: Serializer>(ts: &NaiveDateTime, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(&ts.format(TIMESTAMP_FORMAT))
}
