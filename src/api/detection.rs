use anyhow::Result;
use serde::Deserialize;

use super::retry::{RetryPolicy, fetch_json, http_client};
use crate::config::ServiceConfig;
use crate::domain::Detection;

/// Lot boundary detector run on an overhead image
pub trait Detector: Send + Sync {
    /// Best detection in the image, if any
    fn detect(&self, image: &[u8]) -> Result<Option<Detection>>;
}

#[derive(Debug, Deserialize)]
struct DetectResponse {
    #[serde(default)]
    detections: Vec<Detection>,
}

/// Keep the most confident detection whose polygon lies in normalized image space
fn best_detection(response: DetectResponse) -> Option<Detection> {
    response
        .detections
        .into_iter()
        .filter(|d| d.polygon.len() >= 3 && d.is_normalized())
        .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
}

/// Inference server that accepts raw image bytes and answers with JSON detections
pub struct HttpDetector {
    client: reqwest::blocking::Client,
    url: String,
    retry: RetryPolicy,
}

impl HttpDetector {
    pub fn new(config: &ServiceConfig) -> Result<Self> {
        Ok(Self {
            client: http_client(config.timeout())?,
            url: config.url.clone(),
            retry: config.retry_policy(),
        })
    }
}

impl Detector for HttpDetector {
    fn detect(&self, image: &[u8]) -> Result<Option<Detection>> {
        let response: DetectResponse = fetch_json(&self.retry, "detection", || {
            self.client
                .post(&self.url)
                .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
                .body(image.to_vec())
        })?;
        Ok(best_detection(response))
    }
}
