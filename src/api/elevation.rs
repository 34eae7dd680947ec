use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::cache::{ElevationCache, QuantizedKey};
use super::retry::{RetryPolicy, ensure_len, fetch_json, http_client};
use crate::config::ServiceConfig;

/// Locations sent per lookup request
const BATCH_SIZE: usize = 100;

/// Terrain height lookup for (lat, lon) points
pub trait ElevationService: Send + Sync {
    /// One entry per input point; `None` where the service has no value
    fn elevations(&self, points: &[(f64, f64)]) -> Result<Vec<Option<f64>>>;
}

#[derive(Debug, Serialize)]
struct LookupRequest {
    locations: Vec<Location>,
}

#[derive(Debug, Serialize)]
struct Location {
    latitude: f64,
    longitude: f64,
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    results: Vec<LookupResult>,
}

#[derive(Debug, Deserialize)]
struct LookupResult {
    #[serde(default)]
    elevation: Option<f64>,
}

/// Client for Open-Elevation compatible `POST /lookup` endpoints
pub struct OpenElevation {
    client: reqwest::blocking::Client,
    url: String,
    retry: RetryPolicy,
}

impl OpenElevation {
    pub fn new(config: &ServiceConfig) -> Result<Self> {
        Ok(Self {
            client: http_client(config.timeout())?,
            url: config.url.clone(),
            retry: config.retry_policy(),
        })
    }
}

impl ElevationService for OpenElevation {
    fn elevations(&self, points: &[(f64, f64)]) -> Result<Vec<Option<f64>>> {
        let mut out = Vec::with_capacity(points.len());

        for chunk in points.chunks(BATCH_SIZE) {
            let body = LookupRequest {
                locations: chunk
                    .iter()
                    .map(|&(latitude, longitude)| Location {
                        latitude,
                        longitude,
                    })
                    .collect(),
            };

            let response: LookupResponse = fetch_json(&self.retry, "elevation", || {
                self.client.post(&self.url).json(&body)
            })?;
            ensure_len(response.results.len(), chunk.len(), "elevation")?;

            out.extend(response.results.into_iter().map(|r| r.elevation));
        }

        Ok(out)
    }
}

/// Elevation lookups that consult a cache first and only query misses
pub struct CachedElevation<S, C> {
    service: S,
    cache: C,
}

impl<S: ElevationService, C: ElevationCache> CachedElevation<S, C> {
    pub fn new(service: S, cache: C) -> Self {
        Self { service, cache }
    }

    pub fn cache(&self) -> &C {
        &self.cache
    }
}

impl<S: ElevationService, C: ElevationCache> ElevationService for CachedElevation<S, C> {
    fn elevations(&self, points: &[(f64, f64)]) -> Result<Vec<Option<f64>>> {
        let keys: Vec<QuantizedKey> = points
            .iter()
            .map(|&(lat, lon)| QuantizedKey::new(lat, lon))
            .collect();

        let mut out: Vec<Option<f64>> = keys.iter().map(|k| self.cache.get(k)).collect();
        let misses: Vec<usize> = (0..points.len()).filter(|&i| out[i].is_none()).collect();

        if misses.is_empty() {
            return Ok(out);
        }
        tracing::debug!(
            hits = points.len() - misses.len(),
            misses = misses.len(),
            "Elevation cache lookup"
        );

        let query: Vec<(f64, f64)> = misses.iter().map(|&i| points[i]).collect();
        let fetched = self.service.elevations(&query)?;
        ensure_len(fetched.len(), query.len(), "elevation")?;

        for (&i, value) in misses.iter().zip(fetched) {
            if let Some(z) = value {
                self.cache.put(keys[i], z);
            }
            out[i] = value;
        }

        Ok(out)
    }
}
