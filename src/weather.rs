//! Historical weather client (C7 step 3): hourly humidity, cloud cover,
//! wind speed, and global tilted irradiance from the Open-Meteo archive API.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use reqwest::Client;
use serde::Deserialize;

use crate::error::ClientError;

#[derive(Debug, Clone, Copy, Default)]
pub struct WeatherPoint {
    pub humidity: Option<f64>,
    pub cloud_cover: Option<f64>,
    pub wind_speed: Option<f64>,
    pub ghi: Option<f64>,
}

#[derive(Deserialize)]
struct ArchiveResponse {
    hourly: HourlyBlock,
}

#[derive(Deserialize)]
struct HourlyBlock {
    time: Vec<String>,
    relative_humidity_2m: Option<Vec<Option<f64>>>,
    cloud_cover: Option<Vec<Option<f64>>>,
    wind_speed_10m: Option<Vec<Option<f64>>>,
    global_tilted_irradiance: Option<Vec<Option<f64>>>,
}

#[derive(Clone)]
pub struct WeatherClient {
    http: Client,
    base_url: String,
    latitude: f64,
    longitude: f64,
}

impl WeatherClient {
    pub fn new(base_url: impl Into<String>, latitude: f64, longitude: f64) -> Self {
        WeatherClient {
            http: Client::new(),
            base_url: base_url.into(),
            latitude,
            longitude,
        }
    }

    /// Fetches hourly weather for `[start_date, end_date]` (inclusive, local
    /// calendar dates) and indexes the result by UTC instant.
    ///
    /// Open-Meteo's `hourly.time` values are naive local-clock timestamps in
    /// whatever zone the `timezone` query param names, not UTC — so they
    /// must be localized to that zone before converting to UTC, the same
    /// correction `feature_enhancer.py`'s `tz_localize(TIMEZONE)` applies.
    pub async fn fetch_hourly(
        &self,
        start_date: NaiveDate,
        end_date: NaiveDate,
        timezone: &Tz,
    ) -> Result<BTreeMap<DateTime<Utc>, WeatherPoint>, ClientError> {
        let response = self
            .http
            .get(&self.base_url)
            .query(&[
                ("latitude", self.latitude.to_string()),
                ("longitude", self.longitude.to_string()),
                (
                    "hourly",
                    "relative_humidity_2m,cloud_cover,wind_speed_10m,global_tilted_irradiance"
                        .to_string(),
                ),
                ("timezone", timezone.name().to_string()),
                ("start_date", start_date.format("%Y-%m-%d").to_string()),
                ("end_date", end_date.format("%Y-%m-%d").to_string()),
            ])
            .timeout(std::time::Duration::from_secs(30))
            .send()
            .await
            .map_err(|source| ClientError::Transport {
                url: self.base_url.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::HttpStatus {
                url: self.base_url.clone(),
                status: status.as_u16(),
            });
        }

        let parsed: ArchiveResponse =
            response.json().await.map_err(|source| ClientError::Decode {
                url: self.base_url.clone(),
                source,
            })?;

        Ok(index_by_hour(parsed.hourly, timezone))
    }
}

fn index_by_hour(hourly: HourlyBlock, timezone: &Tz) -> BTreeMap<DateTime<Utc>, WeatherPoint> {
    let mut map = BTreeMap::new();

    for (i, ts) in hourly.time.iter().enumerate() {
        let Ok(naive) = NaiveDateTime::parse_from_str(ts, "%Y-%m-%dT%H:%M") else {
            continue;
        };
        // `.earliest()` resolves DST-ambiguous local times to the first
        // (pre-transition) candidate rather than dropping the row.
        let Some(local) = timezone.from_local_datetime(&naive).earliest() else {
            continue;
        };
        let instant = local.with_timezone(&Utc);

        let point = WeatherPoint {
            humidity: hourly.relative_humidity_2m.as_ref().and_then(|v| v.get(i).copied().flatten()),
            cloud_cover: hourly.cloud_cover.as_ref().and_then(|v| v.get(i).copied().flatten()),
            wind_speed: hourly.wind_speed_10m.as_ref().and_then(|v| v.get(i).copied().flatten()),
            ghi: hourly
                .global_tilted_irradiance
                .as_ref()
                .and_then(|v| v.get(i).copied().flatten()),
        };
        map.insert(instant, point);
    }

    map
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indexes_points_by_parsed_hour() {
        let hourly = HourlyBlock {
            time: vec!["2025-03-01T00:00".to_string(), "2025-03-01T01:00".to_string()],
            relative_humidity_2m: Some(vec![Some(80.0), Some(81.0)]),
            cloud_cover: Some(vec![Some(10.0), None]),
            wind_speed_10m: Some(vec![Some(5.0), Some(6.0)]),
            global_tilted_irradiance: None,
        };
        let tz: Tz = "UTC".parse().unwrap();
        let map = index_by_hour(hourly, &tz);
        assert_eq!(map.len(), 2);
        let first = map.values().next().unwrap();
        assert_eq!(first.humidity, Some(80.0));
        assert_eq!(first.ghi, None);
    }

    #[test]
    fn localizes_naive_local_time_to_the_requested_zone_before_converting_to_utc() {
        // Open-Meteo returns naive clock times in the requested zone; a
        // summer-time London "noon" is 11:00 UTC, not 12:00.
        let hourly = HourlyBlock {
            time: vec!["2025-06-21T12:00".to_string()],
            relative_humidity_2m: Some(vec![Some(50.0)]),
            cloud_cover: None,
            wind_speed_10m: None,
            global_tilted_irradiance: None,
        };
        let tz: Tz = "Europe/London".parse().unwrap();
        let map = index_by_hour(hourly, &tz);
        let (instant, _) = map.iter().next().unwrap();
        assert_eq!(instant.to_rfc3339(), "2025-06-21T11:00:00+00:00");
    }
}
