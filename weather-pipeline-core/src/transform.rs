use bytes::Bytes;
use chrono::{DateTime, NaiveDateTime};
use tracing::{debug, info};

use crate::{
    convert::kelvin_to_fahrenheit,
    error::{PipelineError, Result, ShapeError},
    model::{WeatherObservation, WeatherRecord},
    sink::{Sink, StoredObject},
};

pub const OBJECT_NAME_PREFIX: &str = "current_weather_data";

/// Interpret `epoch + offset` as seconds since the Unix epoch and return the
/// resulting calendar time without a zone attached.
///
/// This is a shift of the UTC instant, not a timezone conversion: the result is
/// "local" wall-clock time only in the sense that the offset was added.
pub fn shifted_utc(epoch: i64, offset: i64) -> Result<NaiveDateTime, ShapeError> {
    epoch
        .checked_add(offset)
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .map(|dt| dt.naive_utc())
        .ok_or(ShapeError::TimestampOutOfRange { epoch, offset })
}

/// Flatten an observation into an output row, converting temperatures to °F.
pub fn to_record(obs: &WeatherObservation) -> Result<WeatherRecord, ShapeError> {
    let description = obs.description()?.to_owned();

    Ok(WeatherRecord {
        city: obs.name.clone(),
        description,
        temperature_f: kelvin_to_fahrenheit(obs.main.temp),
        feels_like_f: kelvin_to_fahrenheit(obs.main.feels_like),
        min_temp_f: kelvin_to_fahrenheit(obs.main.temp_min),
        max_temp_f: kelvin_to_fahrenheit(obs.main.temp_max),
        pressure: obs.main.pressure,
        humidity: obs.main.humidity,
        wind_speed: obs.wind.speed,
        time_of_record: shifted_utc(obs.dt, obs.timezone)?,
        sunrise: shifted_utc(obs.sys.sunrise, obs.timezone)?,
        sunset: shifted_utc(obs.sys.sunset, obs.timezone)?,
    })
}

/// Lowercase the city and collapse every run of non-alphanumerics into `_`.
pub fn city_slug(city: &str) -> String {
    let mut slug = String::with_capacity(city.len());
    let mut pending_sep = false;

    for ch in city.chars() {
        if ch.is_alphanumeric() {
            if pending_sep && !slug.is_empty() {
                slug.push('_');
            }
            pending_sep = false;
            slug.extend(ch.to_lowercase());
        } else {
            pending_sep = true;
        }
    }

    slug
}

/// `current_weather_data_<city>_<DDMMYYYYHHMMSS>`, stamped with the invocation time.
pub fn destination_id(city: &str, invoked_at: NaiveDateTime) -> String {
    format!(
        "{OBJECT_NAME_PREFIX}_{}_{}",
        city_slug(city),
        invoked_at.format("%d%m%Y%H%M%S")
    )
}

/// Header row plus exactly one data row.
pub fn encode_csv(record: &WeatherRecord) -> Result<Bytes> {
    let mut wtr = csv::Writer::from_writer(Vec::new());
    wtr.serialize(record)?;
    let buf = wtr
        .into_inner()
        .map_err(|e| PipelineError::Encode(e.into_error().into()))?;
    Ok(Bytes::from(buf))
}

/// Output of a successful transform, before it is persisted.
#[derive(Debug, Clone)]
pub struct PreparedObject {
    pub record: WeatherRecord,
    pub object_name: String,
    pub body: Bytes,
}

/// Parse, flatten and encode a fetched payload. Performs no I/O.
pub fn prepare(payload: &serde_json::Value, invoked_at: NaiveDateTime) -> Result<PreparedObject> {
    let obs = WeatherObservation::from_value(payload)?;
    let record = to_record(&obs)?;
    let object_name = format!("{}.csv", destination_id(&record.city, invoked_at));
    let body = encode_csv(&record)?;

    debug!(city = %record.city, object = %object_name, bytes = body.len(), "Prepared weather record");

    Ok(PreparedObject { record, object_name, body })
}

/// Transform a fetched payload and append it to `sink` as a new object.
///
/// Nothing is written unless the whole transform succeeds.
pub async fn transform_and_store(
    payload: &serde_json::Value,
    invoked_at: NaiveDateTime,
    sink: &dyn Sink,
) -> Result<StoredObject> {
    let prepared = prepare(payload, invoked_at)?;
    let stored = sink.write(&prepared.object_name, prepared.body).await?;

    info!(
        city = %prepared.record.city,
        location = %stored.location,
        size = stored.size,
        "Stored weather record"
    );

    Ok(stored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{RecordingSink, sample};
    use chrono::NaiveDate;
    use serde_json::json;

    fn ts(y: i32, m: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, mi, s)
            .unwrap()
    }

    fn sample_record() -> WeatherRecord {
        let obs = WeatherObservation::from_value(&sample()).unwrap();
        to_record(&obs).unwrap()
    }

    #[test]
    fn sample_observation_is_flattened() {
        let record = sample_record();

        assert_eq!(record.city, "Ahmedabad");
        assert_eq!(record.description, "clear sky");
        assert!((record.temperature_f - 80.33).abs() < 1e-6);
        assert!((record.feels_like_f - kelvin_to_fahrenheit(301.0)).abs() < 1e-9);
        assert!((record.min_temp_f - kelvin_to_fahrenheit(298.0)).abs() < 1e-9);
        assert!((record.max_temp_f - kelvin_to_fahrenheit(303.0)).abs() < 1e-9);
        assert_eq!(record.pressure, 1010);
        assert_eq!(record.humidity, 40);
        assert_eq!(record.wind_speed, 3.5);
    }

    #[test]
    fn local_times_are_shifted_utc_without_zone() {
        let record = sample_record();

        // 1694332800 is 2023-09-10 08:00:00 UTC; +19800s (5h30) is labelled as-is.
        assert_eq!(record.time_of_record, ts(2023, 9, 10, 13, 30, 0));
        assert_eq!(
            record.time_of_record,
            DateTime::from_timestamp(1694332800 + 19800, 0).unwrap().naive_utc()
        );
        assert_eq!(record.sunrise, ts(2023, 9, 10, 6, 30, 0));
        assert_eq!(record.sunset, ts(2023, 9, 10, 18, 40, 0));
    }

    #[test]
    fn negative_offset_shifts_backwards() {
        assert_eq!(shifted_utc(0, -3600).unwrap(), ts(1969, 12, 31, 23, 0, 0));
    }

    #[test]
    fn overflowing_offset_is_a_shape_error() {
        assert!(matches!(
            shifted_utc(i64::MAX, 1),
            Err(ShapeError::TimestampOutOfRange { .. })
        ));
    }

    #[test]
    fn city_slug_normalises_names() {
        assert_eq!(city_slug("Ahmedabad"), "ahmedabad");
        assert_eq!(city_slug("New York"), "new_york");
        assert_eq!(city_slug("  Saint-Étienne, FR "), "saint_étienne_fr");
    }

    #[test]
    fn destination_uses_invocation_time() {
        let id = destination_id("Ahmedabad", ts(2023, 9, 10, 7, 5, 9));
        assert_eq!(id, "current_weather_data_ahmedabad_10092023070509");
    }

    #[test]
    fn distinct_seconds_give_distinct_destinations() {
        let a = destination_id("Ahmedabad", ts(2023, 9, 10, 7, 5, 9));
        let b = destination_id("Ahmedabad", ts(2023, 9, 10, 7, 5, 10));
        assert_ne!(a, b);
        assert!(!a.starts_with(&b) && !b.starts_with(&a));
    }

    #[test]
    fn csv_has_header_and_one_row() {
        let body = encode_csv(&sample_record()).unwrap();
        let text = std::str::from_utf8(&body).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], WeatherRecord::COLUMNS.join(","));
        assert_eq!(
            lines[1],
            "Ahmedabad,clear sky,80.33000000000004,82.13000000000005,76.73000000000005,\
             85.73000000000005,1010,40,3.5,2023-09-10 13:30:00,2023-09-10 06:30:00,\
             2023-09-10 18:40:00"
        );
    }

    #[test]
    fn csv_quotes_fields_with_commas() {
        let mut record = sample_record();
        record.description = "rain, heavy".to_string();
        let body = encode_csv(&record).unwrap();
        let text = std::str::from_utf8(&body).unwrap();
        assert!(text.contains("\"rain, heavy\""));
        assert_eq!(text.lines().count(), 2);
    }

    #[tokio::test]
    async fn transform_and_store_writes_once() {
        let sink = RecordingSink::default();
        let invoked_at = ts(2023, 9, 10, 7, 5, 9);

        let stored = transform_and_store(&sample(), invoked_at, &sink).await.unwrap();

        let writes = sink.writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].0, "current_weather_data_ahmedabad_10092023070509.csv");
        assert_eq!(stored.size, writes[0].1.len());
    }

    #[tokio::test]
    async fn shape_error_performs_no_write() {
        let sink = RecordingSink::default();
        let mut payload = sample();
        payload["weather"] = json!([]);

        let err = transform_and_store(&payload, ts(2023, 9, 10, 7, 5, 9), &sink)
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Shape(ShapeError::NoConditions)));
        assert!(sink.writes().is_empty());
    }

    #[tokio::test]
    async fn missing_sunrise_performs_no_write() {
        let sink = RecordingSink::default();
        let mut payload = sample();
        payload["sys"].as_object_mut().unwrap().remove("sunrise");

        let err = transform_and_store(&payload, ts(2023, 9, 10, 7, 5, 9), &sink)
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Shape(ShapeError::Malformed(_))));
        assert!(sink.writes().is_empty());
    }
}
