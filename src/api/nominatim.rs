use anyhow::Result;
use serde::Deserialize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::retry::{RetryPolicy, fetch_json, http_client};
use crate::config::ServiceConfig;

/// Nominatim usage policy: at most one request per second
const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Postal address components for a point
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Address {
    #[serde(default)]
    pub road: Option<String>,
    #[serde(default)]
    pub house_number: Option<String>,
    #[serde(default)]
    pub suburb: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub postcode: Option<String>,
}

/// Reverse geocoding collaborator
pub trait Geocoder: Send + Sync {
    /// Address components for (lat, lon); `None` if nothing is known there
    fn reverse(&self, lat: f64, lon: f64) -> Result<Option<Address>>;
}

#[derive(Debug, Deserialize)]
struct ReverseResult {
    #[serde(default)]
    address: Option<Address>,
    #[serde(default)]
    error: Option<String>,
}

/// Nominatim `/reverse` client
pub struct Nominatim {
    client: reqwest::blocking::Client,
    base_url: String,
    retry: RetryPolicy,
    last_request: Mutex<Option<Instant>>,
}

impl Nominatim {
    pub fn new(config: &ServiceConfig) -> Result<Self> {
        Ok(Self {
            client: http_client(config.timeout())?,
            base_url: config.url.trim_end_matches('/').to_string(),
            retry: config.retry_policy(),
            last_request: Mutex::new(None),
        })
    }

    /// Sleep until the rate limit allows another request. Workers share one client.
    fn throttle(&self) {
        let Ok(mut last) = self.last_request.lock() else {
            return;
        };
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < MIN_INTERVAL {
                std::thread::sleep(MIN_INTERVAL - elapsed);
            }
        }
        *last = Some(Instant::now());
    }
}

impl Geocoder for Nominatim {
    fn reverse(&self, lat: f64, lon: f64) -> Result<Option<Address>> {
        self.throttle();

        let url = format!("{}/reverse", self.base_url);
        let lat = lat.to_string();
        let lon = lon.to_string();
        let result: ReverseResult = fetch_json(&self.retry, "geocoding", || {
            self.client.get(&url).query(&[
                ("lat", lat.as_str()),
                ("lon", lon.as_str()),
                ("format", "jsonv2"),
                ("zoom", "17"),
            ])
        })?;

        if let Some(error) = result.error {
            tracing::debug!(%error, "Reverse geocoding found nothing");
            return Ok(None);
        }
        Ok(result.address)
    }
}
