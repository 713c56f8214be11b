//! Open-Meteo historical weather archive.
//!
//! One request per location per month returns a column-oriented `daily`
//! object. It is flattened into one CSV row per day with location metadata
//! and a handful of derived metrics downstream models rely on.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use divvy_lake_ingest_models::{ContentFormat, PartitionKey, SourceKind};
use serde_json::Value;

use crate::locations::{Location, LocationRegistry};
use crate::{FetchError, RawPayload, SourceFetcher, http};

pub const DEFAULT_BASE_URL: &str = "https://archive-api.open-meteo.com/v1/archive";
pub const DEFAULT_TIMEZONE: &str = "America/Chicago";

/// Daily variables requested from the archive, in output column order.
pub const DAILY_VARIABLES: [&str; 17] = [
    "temperature_2m_max",
    "temperature_2m_min",
    "temperature_2m_mean",
    "apparent_temperature_max",
    "apparent_temperature_min",
    "apparent_temperature_mean",
    "precipitation_sum",
    "rain_sum",
    "snowfall_sum",
    "snow_depth_max",
    "wind_speed_10m_max",
    "wind_gusts_10m_max",
    "wind_direction_10m_dominant",
    "cloud_cover_mean",
    "relative_humidity_2m_max",
    "relative_humidity_2m_min",
    "relative_humidity_2m_mean",
];

const METADATA_COLUMNS: [&str; 7] = [
    "location_key",
    "location_name",
    "latitude",
    "longitude",
    "year",
    "month",
    "fetched_at",
];

const DERIVED_COLUMNS: [&str; 5] = [
    "temperature_2m_range",
    "apparent_temperature_range",
    "humidity_range",
    "weather_category",
    "comfort_index",
];

/// Fetches one month of daily weather for a registered location.
pub struct WeatherFetcher {
    client: reqwest::Client,
    base_url: String,
    timezone: String,
    locations: LocationRegistry,
}

impl WeatherFetcher {
    #[must_use]
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        timezone: impl Into<String>,
        locations: LocationRegistry,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            timezone: timezone.into(),
            locations,
        }
    }

    /// Query parameters for `key` at `location`.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Permanent`] if the key's month has no valid
    /// calendar dates.
    pub fn query(
        &self,
        key: &PartitionKey,
        location: &Location,
    ) -> Result<Vec<(&'static str, String)>, FetchError> {
        let month = key.year_month();
        let (Some(start), Some(end)) = (month.first_day(), month.last_day()) else {
            return Err(FetchError::permanent(format!("{month} has no calendar dates")));
        };
        Ok(vec![
            ("latitude", location.latitude.to_string()),
            ("longitude", location.longitude.to_string()),
            ("start_date", start.format("%Y-%m-%d").to_string()),
            ("end_date", end.format("%Y-%m-%d").to_string()),
            ("daily", DAILY_VARIABLES.join(",")),
            ("timezone", self.timezone.clone()),
        ])
    }
}

#[async_trait]
impl SourceFetcher for WeatherFetcher {
    fn kind(&self) -> SourceKind {
        SourceKind::Weather
    }

    async fn fetch(&self, key: &PartitionKey) -> Result<RawPayload, FetchError> {
        let location = self.locations.get(key.scope()).ok_or_else(|| {
            FetchError::permanent(format!("unknown weather location {:?}", key.scope()))
        })?;
        let query = self.query(key, location)?;
        log::debug!("[{key}] GET {} {query:?}", self.base_url);

        let body = http::send_json(self.client.get(&self.base_url).query(&query)).await?;
        let (bytes, record_count) = build_weather_csv(&body, key, location, Utc::now())?;

        Ok(RawPayload {
            bytes,
            format: ContentFormat::DelimitedText,
            record_count,
        })
    }
}

/// Flattens an archive response into CSV. Returns the bytes and the number
/// of days written.
///
/// # Errors
///
/// Returns [`FetchError::Validation`] if the response has no `daily.time`
/// series, it is empty, or one of its entries is not a date string.
pub fn build_weather_csv(
    response: &Value,
    key: &PartitionKey,
    location: &Location,
    fetched_at: DateTime<Utc>,
) -> Result<(Vec<u8>, u64), FetchError> {
    let daily = response
        .get("daily")
        .and_then(Value::as_object)
        .ok_or_else(|| FetchError::validation("response has no daily object"))?;
    let dates: Vec<&str> = daily
        .get("time")
        .and_then(Value::as_array)
        .ok_or_else(|| FetchError::validation("response has no daily.time series"))?
        .iter()
        .enumerate()
        .map(|(i, v)| {
            v.as_str().filter(|date| !date.is_empty()).ok_or_else(|| {
                FetchError::validation(format!("daily.time[{i}] is not a date: {v}"))
            })
        })
        .collect::<Result<_, FetchError>>()?;
    if dates.is_empty() {
        return Err(FetchError::validation("daily.time series is empty"));
    }

    let series: Vec<Vec<Option<f64>>> = DAILY_VARIABLES
        .iter()
        .map(|var| {
            let values = daily.get(*var).and_then(Value::as_array);
            (0..dates.len())
                .map(|i| values.and_then(|v| v.get(i)).and_then(Value::as_f64))
                .collect()
        })
        .collect();

    let mut writer = csv::Writer::from_writer(Vec::new());
    let header = std::iter::once("date")
        .chain(DAILY_VARIABLES)
        .chain(METADATA_COLUMNS)
        .chain(DERIVED_COLUMNS);
    writer.write_record(header).map_err(csv_error)?;

    let fetched_at = fetched_at.format("%Y-%m-%d %H:%M:%S UTC").to_string();
    for (day, date) in dates.iter().enumerate() {
        let values: Vec<Option<f64>> = series.iter().map(|s| s[day]).collect();
        let derived = DailyValues::new(&values);

        let mut row: Vec<String> = Vec::with_capacity(1 + 17 + 7 + 5);
        row.push((*date).to_string());
        row.extend(values.iter().map(|v| fmt_opt(*v)));
        row.push(location.key.clone());
        row.push(location.name.clone());
        row.push(location.latitude.to_string());
        row.push(location.longitude.to_string());
        row.push(key.year().to_string());
        row.push(key.month().to_string());
        row.push(fetched_at.clone());
        row.push(fmt_opt(range(derived.temp_max, derived.temp_min)));
        row.push(fmt_opt(range(derived.apparent_max, derived.apparent_min)));
        row.push(fmt_opt(range(derived.humidity_max, derived.humidity_min)));
        row.push(derived.category().to_string());
        row.push(fmt_opt(derived.comfort_index()));
        writer.write_record(&row).map_err(csv_error)?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| FetchError::validation(format!("failed to finish CSV: {e}")))?;
    Ok((bytes, dates.len() as u64))
}

fn csv_error(e: csv::Error) -> FetchError {
    FetchError::validation(format!("failed to write CSV: {e}"))
}

fn fmt_opt(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn range(max: Option<f64>, min: Option<f64>) -> Option<f64> {
    Some(max? - min?)
}

/// The inputs the derived columns need, picked out of one day's values.
struct DailyValues {
    temp_max: Option<f64>,
    temp_min: Option<f64>,
    temp_mean: Option<f64>,
    apparent_max: Option<f64>,
    apparent_min: Option<f64>,
    precipitation: Option<f64>,
    snowfall: Option<f64>,
    wind_max: Option<f64>,
    cloud_cover: Option<f64>,
    humidity_max: Option<f64>,
    humidity_min: Option<f64>,
}

impl DailyValues {
    fn new(values: &[Option<f64>]) -> Self {
        let get = |name: &str| {
            DAILY_VARIABLES
                .iter()
                .position(|v| *v == name)
                .and_then(|i| values.get(i).copied().flatten())
        };
        Self {
            temp_max: get("temperature_2m_max"),
            temp_min: get("temperature_2m_min"),
            temp_mean: get("temperature_2m_mean"),
            apparent_max: get("apparent_temperature_max"),
            apparent_min: get("apparent_temperature_min"),
            precipitation: get("precipitation_sum"),
            snowfall: get("snowfall_sum"),
            wind_max: get("wind_speed_10m_max"),
            cloud_cover: get("cloud_cover_mean"),
            humidity_max: get("relative_humidity_2m_max"),
            humidity_min: get("relative_humidity_2m_min"),
        }
    }

    /// Dry days are graded by cloud cover (unknown cover counts as cloudy),
    /// wet days by snow and precipitation amount.
    fn category(&self) -> &'static str {
        match self.precipitation {
            None | Some(0.0) => match self.cloud_cover {
                Some(c) if c < 40.0 => "clear",
                Some(c) if c < 80.0 => "partly_cloudy",
                _ => "cloudy",
            },
            Some(_) if self.snowfall.is_some_and(|s| s > 0.0) => "snowy",
            Some(p) if p > 10.0 => "rainy",
            Some(_) => "light_rain",
        }
    }

    /// Mean of temperature, precipitation, and wind scores on a 0-100 scale.
    fn comfort_index(&self) -> Option<f64> {
        let temp = (100.0 - (self.temp_mean? - 20.0).abs() * 3.0).clamp(0.0, 100.0);
        let precip = self.precipitation?.mul_add(-10.0, 100.0).max(0.0);
        let wind = self.wind_max?.mul_add(-2.0, 100.0).max(0.0);
        Some((temp + precip + wind) / 3.0)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone as _;
    use divvy_lake_ingest_models::YearMonth;
    use serde_json::json;

    use super::*;

    fn chicago() -> Location {
        LocationRegistry::builtin().get("chicago").unwrap().clone()
    }

    fn key(month: u32) -> PartitionKey {
        PartitionKey::monthly(
            SourceKind::Weather,
            "chicago",
            YearMonth::new(2023, month).unwrap(),
        )
        .unwrap()
    }

    fn values(v: &[(&str, f64)]) -> Vec<Option<f64>> {
        DAILY_VARIABLES
            .iter()
            .map(|name| v.iter().find(|(n, _)| n == name).map(|(_, x)| *x))
            .collect()
    }

    #[test]
    fn query_covers_the_whole_month() {
        let fetcher = WeatherFetcher::new(
            reqwest::Client::new(),
            DEFAULT_BASE_URL,
            DEFAULT_TIMEZONE,
            LocationRegistry::builtin(),
        );
        let query = fetcher.query(&key(2), &chicago()).unwrap();
        let get = |name: &str| {
            query
                .iter()
                .find(|(k, _)| *k == name)
                .map(|(_, v)| v.as_str())
                .unwrap()
        };
        assert_eq!(get("start_date"), "2023-02-01");
        assert_eq!(get("end_date"), "2023-02-28");
        assert_eq!(get("latitude"), "41.8781");
        assert_eq!(get("timezone"), "America/Chicago");
        assert_eq!(get("daily").split(',').count(), 17);
    }

    #[test]
    fn builds_one_row_per_day() {
        let response = json!({
            "daily": {
                "time": ["2023-01-01", "2023-01-02"],
                "temperature_2m_max": [5.0, 3.5],
                "temperature_2m_min": [-1.0, -2.5],
                "temperature_2m_mean": [2.0, 0.5],
                "precipitation_sum": [0.0, 12.0],
                "snowfall_sum": [0.0, 0.0],
                "wind_speed_10m_max": [10.0, 20.0],
                "cloud_cover_mean": [20.0, 95.0],
                "relative_humidity_2m_max": [90.0, 95.0],
                "relative_humidity_2m_min": [60.0, 70.0]
            }
        });
        let fetched_at = Utc.with_ymd_and_hms(2024, 1, 5, 12, 0, 0).unwrap();

        let (bytes, count) = build_weather_csv(&response, &key(1), &chicago(), fetched_at).unwrap();
        assert_eq!(count, 2);

        let mut reader = csv::Reader::from_reader(bytes.as_slice());
        let headers = reader.headers().unwrap().clone();
        assert_eq!(headers.len(), 1 + 17 + 7 + 5);
        assert_eq!(&headers[0], "date");
        assert_eq!(&headers[headers.len() - 1], "comfort_index");

        let rows: Vec<csv::StringRecord> = reader.records().map(Result::unwrap).collect();
        assert_eq!(rows.len(), 2);
        let col = |name: &str| headers.iter().position(|h| h == name).unwrap();

        assert_eq!(&rows[0][col("date")], "2023-01-01");
        assert_eq!(&rows[0][col("location_name")], "Chicago");
        assert_eq!(&rows[0][col("month")], "1");
        assert_eq!(&rows[0][col("fetched_at")], "2024-01-05 12:00:00 UTC");
        assert_eq!(&rows[0][col("temperature_2m_range")], "6");
        assert_eq!(&rows[0][col("weather_category")], "clear");
        assert_eq!(&rows[1][col("weather_category")], "rainy");
        assert_eq!(&rows[0][col("rain_sum")], "", "missing variables stay empty");
        assert_eq!(&rows[0][col("apparent_temperature_range")], "");
    }

    #[test]
    fn response_without_daily_time_is_invalid() {
        let err = build_weather_csv(
            &json!({"daily": {"temperature_2m_max": [1.0]}}),
            &key(1),
            &chicago(),
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, FetchError::Validation { .. }));

        let err = build_weather_csv(&json!({"error": true}), &key(1), &chicago(), Utc::now())
            .unwrap_err();
        assert!(matches!(err, FetchError::Validation { .. }));
    }

    #[test]
    fn non_string_dates_are_invalid() {
        let response = json!({
            "daily": {
                "time": ["2023-01-01", null, "2023-01-03"],
                "temperature_2m_max": [1.0, 2.0, 3.0],
            }
        });
        let err = build_weather_csv(&response, &key(1), &chicago(), Utc::now()).unwrap_err();
        assert!(matches!(err, FetchError::Validation { .. }));
        assert!(err.message().contains("daily.time[1]"), "{err}");
    }

    #[test]
    fn categorizes_weather() {
        let category = |v: &[(&str, f64)]| DailyValues::new(&values(v)).category();
        assert_eq!(category(&[("cloud_cover_mean", 10.0)]), "clear");
        assert_eq!(
            category(&[("precipitation_sum", 0.0), ("cloud_cover_mean", 50.0)]),
            "partly_cloudy"
        );
        assert_eq!(category(&[]), "cloudy");
        assert_eq!(
            category(&[("precipitation_sum", 4.0), ("snowfall_sum", 1.5)]),
            "snowy"
        );
        assert_eq!(category(&[("precipitation_sum", 10.5)]), "rainy");
        assert_eq!(category(&[("precipitation_sum", 2.0)]), "light_rain");
    }

    #[test]
    fn comfort_index_averages_three_scores() {
        let ideal = DailyValues::new(&values(&[
            ("temperature_2m_mean", 20.0),
            ("precipitation_sum", 0.0),
            ("wind_speed_10m_max", 0.0),
        ]));
        assert!((ideal.comfort_index().unwrap() - 100.0).abs() < 1e-9);

        let harsh = DailyValues::new(&values(&[
            ("temperature_2m_mean", -20.0),
            ("precipitation_sum", 20.0),
            ("wind_speed_10m_max", 25.0),
        ]));
        assert!((harsh.comfort_index().unwrap() - 50.0 / 3.0).abs() < 1e-9);

        let missing = DailyValues::new(&values(&[("temperature_2m_mean", 20.0)]));
        assert_eq!(missing.comfort_index(), None);
    }
}
