use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

use super::retry::{RetryPolicy, fetch_json, http_client};
use crate::config::ServiceConfig;

/// A probe point moved onto the nearest road
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnappedPoint {
    /// (lat, lon) on the road geometry
    pub location: (f64, f64),
    /// Street name, empty when the router does not know it
    pub street: String,
    /// Distance the probe moved, in meters
    #[serde(default)]
    pub distance_m: Option<f64>,
}

/// Road snapping collaborator
pub trait RoadSnapper: Send + Sync {
    /// Snap one (lat, lon) point to the nearest road
    fn snap(&self, point: (f64, f64)) -> Result<SnappedPoint>;
}

#[derive(Debug, Deserialize)]
struct NearestResponse {
    code: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    waypoints: Vec<Waypoint>,
}

#[derive(Debug, Deserialize)]
struct Waypoint {
    /// [lon, lat]
    location: [f64; 2],
    #[serde(default)]
    name: String,
    #[serde(default)]
    distance: Option<f64>,
}

/// OSRM `nearest` service client
pub struct OsrmSnapper {
    client: reqwest::blocking::Client,
    base_url: String,
    profile: String,
    retry: RetryPolicy,
}

impl OsrmSnapper {
    pub fn new(config: &ServiceConfig) -> Result<Self> {
        Ok(Self {
            client: http_client(config.timeout())?,
            base_url: config.url.trim_end_matches('/').to_string(),
            profile: "driving".to_string(),
            retry: config.retry_policy(),
        })
    }

    fn nearest_url(&self, (lat, lon): (f64, f64)) -> String {
        format!(
            "{}/nearest/v1/{}/{:.7},{:.7}",
            self.base_url, self.profile, lon, lat
        )
    }
}

fn parse_nearest(response: NearestResponse) -> Result<SnappedPoint> {
    if response.code != "Ok" {
        bail!(
            "OSRM nearest returned {}: {}",
            response.code,
            response.message.unwrap_or_default()
        );
    }
    let Some(waypoint) = response.waypoints.into_iter().next() else {
        bail!("OSRM nearest returned no waypoint");
    };
    let [lon, lat] = waypoint.location;
    Ok(SnappedPoint {
        location: (lat, lon),
        street: waypoint.name,
        distance_m: waypoint.distance,
    })
}

impl RoadSnapper for OsrmSnapper {
    fn snap(&self, point: (f64, f64)) -> Result<SnappedPoint> {
        let url = self.nearest_url(point);
        let response: NearestResponse = fetch_json(&self.retry, "routing", || {
            self.client.get(&url).query(&[("number", "1")])
        })?;
        parse_nearest(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nearest_response() {
        let json = r#"{
            "code": "Ok",
            "waypoints": [
                {"hint": "abc", "distance": 12.4, "name": "Rua Augusta", "location": [-46.6512, -23.5561]}
            ]
        }"#;
        let response: NearestResponse = serde_json::from_str(json).unwrap();
        let snapped = parse_nearest(response).unwrap();

        assert_eq!(snapped.location, (-23.5561, -46.6512));
        assert_eq!(snapped.street, "Rua Augusta");
        assert_eq!(snapped.distance_m, Some(12.4));
    }

    #[test]
    fn test_parse_nearest_error_code() {
        let json = r#"{"code": "InvalidQuery", "message": "Query string malformed"}"#;
        let response: NearestResponse = serde_json::from_str(json).unwrap();
        let err = parse_nearest(response).unwrap_err();
        assert!(err.to_string().contains("InvalidQuery"));
    }

    #[test]
    fn test_nearest_url_is_lon_lat() {
        let snapper = OsrmSnapper::new(&ServiceConfig::with_url("http://localhost:5000/")).unwrap();
        assert_eq!(
            snapper.nearest_url((-23.55, -46.63)),
            "http://localhost:5000/nearest/v1/driving/-46.6300000,-23.5500000"
        );
    }
}
