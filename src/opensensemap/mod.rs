//! Typed client for the OpenSenseMap public API (C2).
//!
//! Only reads and parses; it never writes to the store. Retry policy per
//! the design doc: exponential backoff up to 3 attempts for metadata, 2 for
//! measurements, retrying only on connection/timeout/5xx/decode errors.
//! 4xx other than 429 is permanent; 429 honors `Retry-After` when present.

use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, StatusCode};
use tracing::{debug, warn};

use crate::error::ClientError;
use crate::models::{BoxMeta, RawMeasurement};

const METADATA_TIMEOUT: Duration = Duration::from_secs(30);
const MEASUREMENTS_TIMEOUT: Duration = Duration::from_secs(60);
const METADATA_RETRIES: u32 = 3;
const MEASUREMENTS_RETRIES: u32 = 2;
const BASE_BACKOFF: Duration = Duration::from_millis(500);

#[derive(Clone)]
pub struct OpenSenseMapClient {
    http: Client,
    base_url: String,
}

impl OpenSenseMapClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        OpenSenseMapClient {
            http: Client::new(),
            base_url: base_url.into(),
        }
    }

    pub fn default_client() -> Self {
        Self::new("https://api.opensensemap.org")
    }

    /// `GET {BASE}/boxes/{box_id}`.
    pub async fn fetch_box_metadata(&self, box_id: &str) -> Result<BoxMeta, ClientError> {
        let url = format!("{}/boxes/{box_id}", self.base_url);
        self.get_with_retry(&url, METADATA_TIMEOUT, METADATA_RETRIES)
            .await
    }

    /// `GET {BASE}/boxes/{box_id}/data/{sensor_id}?from-date=...&to-date=...&format=json`.
    pub async fn fetch_measurements(
        &self,
        box_id: &str,
        sensor_id: &str,
        from_utc: DateTime<Utc>,
        to_utc: DateTime<Utc>,
    ) -> Result<Vec<RawMeasurement>, ClientError> {
        let url = format!("{}/boxes/{box_id}/data/{sensor_id}", self.base_url);
        let from_str = format_api_datetime(from_utc);
        let to_str = format_api_datetime(to_utc);

        self.get_with_retry_params(
            &url,
            &[
                ("from-date", from_str.as_str()),
                ("to-date", to_str.as_str()),
                ("format", "json"),
            ],
            MEASUREMENTS_TIMEOUT,
            MEASUREMENTS_RETRIES,
        )
        .await
    }

    async fn get_with_retry<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        timeout: Duration,
        max_attempts: u32,
    ) -> Result<T, ClientError> {
        self.get_with_retry_params(url, &[], timeout, max_attempts)
            .await
    }

    async fn get_with_retry_params<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
        timeout: Duration,
        max_attempts: u32,
    ) -> Result<T, ClientError> {
        let mut last_err: Option<ClientError> = None;

        for attempt in 1..=max_attempts {
            let request = self.http.get(url).query(query).timeout(timeout);
            let result = request.send().await;

            match result {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return response
                            .json::<T>()
                            .await
                            .map_err(|source| ClientError::Decode {
                                url: url.to_string(),
                                source,
                            });
                    }

                    let retry_after = retry_after_delay(&response);
                    let err = ClientError::HttpStatus {
                        url: url.to_string(),
                        status: status.as_u16(),
                    };

                    if !err.is_retryable() || attempt == max_attempts {
                        return Err(err);
                    }

                    warn!(
                        url,
                        attempt, status = status.as_u16(), "retryable HTTP status, backing off"
                    );
                    tokio::time::sleep(retry_after.unwrap_or_else(|| backoff_for(attempt))).await;
                    last_err = Some(err);
                }
                Err(source) => {
                    let err = if source.is_timeout() {
                        ClientError::Timeout {
                            url: url.to_string(),
                        }
                    } else {
                        ClientError::Transport {
                            url: url.to_string(),
                            source,
                        }
                    };

                    if !err.is_retryable() || attempt == max_attempts {
                        return Err(err);
                    }

                    debug!(url, attempt, "transport error, backing off");
                    tokio::time::sleep(backoff_for(attempt)).await;
                    last_err = Some(err);
                }
            }
        }

        Err(last_err.unwrap_or(ClientError::Timeout {
            url: url.to_string(),
        }))
    }
}

fn backoff_for(attempt: u32) -> Duration {
    BASE_BACKOFF * 2u32.pow(attempt.saturating_sub(1))
}

fn retry_after_delay(response: &reqwest::Response) -> Option<Duration> {
    if response.status() != StatusCode::TOO_MANY_REQUESTS {
        return None;
    }
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Format as RFC 3339 with millisecond precision and trailing `Z`, matching
/// the upstream API's expected query format.
fn format_api_datetime(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn formats_with_millis_and_trailing_z() {
        let dt = Utc.with_ymd_and_hms(2025, 3, 21, 0, 0, 0).unwrap();
        assert_eq!(format_api_datetime(dt), "2025-03-21T00:00:00.000Z");
    }

    #[test]
    fn backoff_doubles_each_attempt() {
        assert_eq!(backoff_for(1), BASE_BACKOFF);
        assert_eq!(backoff_for(2), BASE_BACKOFF * 2);
        assert_eq!(backoff_for(3), BASE_BACKOFF * 4);
    }
}
