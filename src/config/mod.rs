use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::api::RetryPolicy;
use crate::geometry::AdjustmentParams;
use crate::mesh::TerrainParams;

fn default_store_dir() -> PathBuf {
    PathBuf::from("lots")
}
fn default_objects_dir() -> PathBuf {
    PathBuf::from("artifacts")
}
fn default_verbose() -> bool {
    false
}

/// Top-level `lot3d.toml`
#[derive(Debug, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub store_dir: Option<PathBuf>,
    #[serde(default)]
    pub objects_dir: Option<PathBuf>,
    #[serde(default)]
    pub verbose: Option<bool>,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub adjustment: AdjustmentParams,
    #[serde(default)]
    pub terrain: TerrainParams,
    #[serde(default)]
    pub frontage: FrontageConfig,
    #[serde(default)]
    pub elevation: ServiceConfig,
    #[serde(default = "default_routing")]
    pub routing: ServiceConfig,
    #[serde(default = "default_geocoding")]
    pub geocoding: ServiceConfig,
    #[serde(default = "default_detection")]
    pub detection: ServiceConfig,
    #[serde(default)]
    pub export: ExportConfig,
}

impl FileConfig {
    pub fn load() -> Option<Self> {
        let config_paths = get_config_paths();

        for path in config_paths {
            if path.exists()
                && let Ok(contents) = std::fs::read_to_string(&path)
            {
                match toml::from_str(&contents) {
                    Ok(config) => return Some(config),
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "Failed to parse config file");
                    }
                }
            }
        }
        None
    }

    pub fn store_dir(&self) -> PathBuf {
        self.store_dir.clone().unwrap_or_else(default_store_dir)
    }

    pub fn objects_dir(&self) -> PathBuf {
        self.objects_dir.clone().unwrap_or_else(default_objects_dir)
    }

    pub fn verbose(&self) -> bool {
        self.verbose.unwrap_or_else(default_verbose)
    }
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            store_dir: None,
            objects_dir: None,
            verbose: None,
            pipeline: PipelineConfig::default(),
            adjustment: AdjustmentParams::default(),
            terrain: TerrainParams::default(),
            frontage: FrontageConfig::default(),
            elevation: ServiceConfig::default(),
            routing: default_routing(),
            geocoding: default_geocoding(),
            detection: default_detection(),
            export: ExportConfig::default(),
        }
    }
}

fn get_config_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    paths.push(PathBuf::from("lot3d.toml"));
    paths.push(PathBuf::from(".lot3d.toml"));

    if let Some(config_dir) = dirs::config_dir() {
        paths.push(config_dir.join("lot3d").join("config.toml"));
        paths.push(config_dir.join("lot3d.toml"));
    }

    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".lot3d.toml"));
    }

    paths
}

fn default_workers() -> usize {
    4
}
fn default_min_confidence() -> f64 {
    0.5
}
fn default_work_dir() -> PathBuf {
    std::env::temp_dir().join("lot3d")
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    /// Records processed concurrently
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Detections below this confidence are skipped
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
    /// Scratch space for exporter input/output files
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
    #[serde(default = "default_max_retries")]
    pub storage_retries: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            min_confidence: default_min_confidence(),
            work_dir: default_work_dir(),
            storage_retries: default_max_retries(),
        }
    }
}

fn default_probe_points() -> usize {
    12
}
fn default_front_points() -> usize {
    2
}

#[derive(Debug, Deserialize, Clone, Copy)]
pub struct FrontageConfig {
    /// Probe points placed around the lot, 7..=15
    #[serde(default = "default_probe_points")]
    pub probe_points: usize,
    /// Boundary points kept as the front edge
    #[serde(default = "default_front_points")]
    pub front_points: usize,
}

impl Default for FrontageConfig {
    fn default() -> Self {
        Self {
            probe_points: default_probe_points(),
            front_points: default_front_points(),
        }
    }
}

fn default_elevation_url() -> String {
    "https://api.open-elevation.com/api/v1/lookup".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_ms() -> u64 {
    500
}

/// Connection settings for one HTTP collaborator
#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    #[serde(default = "default_elevation_url")]
    pub url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

impl ServiceConfig {
    pub fn with_url(url: &str) -> Self {
        Self {
            url: url.to_string(),
            ..Default::default()
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, Duration::from_millis(self.backoff_ms))
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            url: default_elevation_url(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

fn default_routing() -> ServiceConfig {
    ServiceConfig::with_url("https://router.project-osrm.org")
}

fn default_geocoding() -> ServiceConfig {
    ServiceConfig::with_url("https://nominatim.openstreetmap.org")
}

fn default_detection() -> ServiceConfig {
    ServiceConfig::with_url("http://127.0.0.1:8080/detect")
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Stl,
    Command,
}

fn default_command_args() -> Vec<String> {
    vec!["{input}".to_string(), "{output}".to_string()]
}

fn default_output_extension() -> String {
    "glb".to_string()
}

fn default_export_timeout_secs() -> u64 {
    300
}

fn default_export_retries() -> u32 {
    1
}

/// Mesh export strategy selection
#[derive(Debug, Deserialize, Clone)]
pub struct ExportConfig {
    #[serde(default)]
    pub format: ExportFormat,
    /// External tool for `format = "command"`
    #[serde(default)]
    pub program: Option<PathBuf>,
    /// Arguments; `{input}` and `{output}` are substituted
    #[serde(default = "default_command_args")]
    pub args: Vec<String>,
    #[serde(default = "default_output_extension")]
    pub extension: String,
    #[serde(default = "default_export_timeout_secs")]
    pub timeout_secs: u64,
    /// Attempts after the first failed export
    #[serde(default = "default_export_retries")]
    pub max_retries: u32,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            format: ExportFormat::default(),
            program: None,
            args: default_command_args(),
            extension: default_output_extension(),
            timeout_secs: default_export_timeout_secs(),
            max_retries: default_export_retries(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: FileConfig = toml::from_str("").unwrap();
        assert_eq!(config.pipeline.workers, 4);
        assert_eq!(config.pipeline.min_confidence, 0.5);
        assert_eq!(config.adjustment.area_diff_threshold, 0.18);
        assert_eq!(config.adjustment.improvement_factor, 0.8);
        assert_eq!(config.terrain.base_depth, 20.0);
        assert_eq!(config.terrain.bottom_shade, 0.3);
        assert_eq!(config.terrain.side_shade, 0.7);
        assert_eq!(config.frontage.front_points, 2);
        assert_eq!(config.export.format, ExportFormat::Stl);
        assert!(config.routing.url.contains("osrm"));
        assert_eq!(config.store_dir(), PathBuf::from("lots"));
    }

    #[test]
    fn test_partial_sections() {
        let config: FileConfig = toml::from_str(
            r#"
            store_dir = "/data/lots"

            [adjustment]
            area_diff_threshold = 0.1

            [terrain]
            base_depth = 5.0

            [routing]
            url = "http://localhost:5000"
            max_retries = 1

            [export]
            format = "command"
            program = "/usr/bin/blender"
            args = ["--background", "--python", "export.py", "--", "{input}", "{output}"]
            "#,
        )
        .unwrap();

        assert_eq!(config.store_dir(), PathBuf::from("/data/lots"));
        assert_eq!(config.adjustment.area_diff_threshold, 0.1);
        assert_eq!(config.adjustment.max_points, 6);
        assert_eq!(config.terrain.base_depth, 5.0);
        assert_eq!(config.terrain.side_shade, 0.7);
        assert_eq!(config.routing.url, "http://localhost:5000");
        assert_eq!(config.routing.max_retries, 1);
        assert_eq!(config.routing.timeout_secs, 30);
        assert_eq!(config.export.format, ExportFormat::Command);
        assert_eq!(config.export.args.len(), 6);
    }
}
