use anyhow::{Context, Result, bail};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use super::extrusion::VolumetricMesh;
use super::ply::write_ply;
use super::stl::write_stl;
use super::validation::validate_and_fix;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Result of a successful export
#[derive(Debug, Clone, PartialEq)]
pub struct ExportReport {
    pub path: PathBuf,
    pub bytes: u64,
    /// Validation summary and any tool output
    pub diagnostics: String,
}

/// Turns a terrain mesh into a file on disk
pub trait MeshExporter: Send + Sync {
    /// File extension of the produced scene, without the dot
    fn extension(&self) -> &str;
    fn export(&self, mesh: &VolumetricMesh, output: &Path) -> Result<ExportReport>;
}

fn check_output(output: &Path, min_bytes: u64) -> Result<u64> {
    let bytes = fs::metadata(output)
        .with_context(|| format!("Export produced no file at {}", output.display()))?
        .len();
    if bytes < min_bytes {
        bail!(
            "Exported file {} is {} bytes, below the {} byte minimum",
            output.display(),
            bytes,
            min_bytes
        );
    }
    Ok(bytes)
}

/// In-process binary STL writer with face colors
#[derive(Debug, Clone)]
pub struct StlExporter {
    pub min_bytes: u64,
}

impl StlExporter {
    pub fn new(min_bytes: u64) -> Self {
        Self { min_bytes }
    }
}

impl MeshExporter for StlExporter {
    fn extension(&self) -> &str {
        "stl"
    }

    fn export(&self, mesh: &VolumetricMesh, output: &Path) -> Result<ExportReport> {
        let (triangles, report) = validate_and_fix(mesh);
        if triangles.is_empty() {
            bail!("No valid triangles to export: {}", report.summary());
        }
        write_stl(output, &triangles)?;
        let bytes = check_output(output, self.min_bytes)?;
        Ok(ExportReport {
            path: output.to_path_buf(),
            bytes,
            diagnostics: report.summary(),
        })
    }
}

/// External converter fed with an ASCII PLY of the mesh
///
/// `{input}` and `{output}` in `args` are replaced with the PLY path and the
/// requested output path. The tool must exit 0 and leave an output of at least
/// `min_bytes` behind.
#[derive(Debug, Clone)]
pub struct CommandExporter {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub extension: String,
    pub timeout: Duration,
    pub min_bytes: u64,
}

impl CommandExporter {
    fn expand_args(&self, input: &Path, output: &Path) -> Vec<String> {
        let input = input.display().to_string();
        let output = output.display().to_string();
        self.args
            .iter()
            .map(|a| a.replace("{input}", &input).replace("{output}", &output))
            .collect()
    }
}

impl MeshExporter for CommandExporter {
    fn extension(&self) -> &str {
        &self.extension
    }

    fn export(&self, mesh: &VolumetricMesh, output: &Path) -> Result<ExportReport> {
        let (_, report) = validate_and_fix(mesh);
        let input = output.with_extension("src.ply");
        let log_path = output.with_extension("log");
        write_ply(&input, mesh)?;
        if output.exists() {
            fs::remove_file(output)?;
        }

        let log = File::create(&log_path)
            .with_context(|| format!("Failed to create export log: {}", log_path.display()))?;
        let args = self.expand_args(&input, output);

        tracing::debug!(program = %self.program.display(), ?args, "Running mesh export tool");
        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log.try_clone()?))
            .stderr(Stdio::from(log))
            .spawn()
            .with_context(|| format!("Failed to start export tool '{}'", self.program.display()))?;

        let started = Instant::now();
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if started.elapsed() > self.timeout {
                let _ = child.kill();
                let _ = child.wait();
                bail!(
                    "Export tool '{}' timed out after {:?}",
                    self.program.display(),
                    self.timeout
                );
            }
            std::thread::sleep(POLL_INTERVAL);
        };

        let tool_output = fs::read_to_string(&log_path).unwrap_or_default();
        if !status.success() {
            bail!(
                "Export tool '{}' failed with {}: {}",
                self.program.display(),
                status,
                tool_output.trim()
            );
        }
        let bytes = check_output(output, self.min_bytes)?;

        Ok(ExportReport {
            path: output.to_path_buf(),
            bytes,
            diagnostics: format!("{}\n{}", report.summary(), tool_output.trim()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::extrusion::{TerrainParams, build_volumetric_mesh};
    use tempfile::tempdir;

    fn mesh() -> VolumetricMesh {
        let points = vec![
            [0.0, 0.0, 1.0],
            [10.0, 0.0, 2.0],
            [10.0, 10.0, 3.0],
            [0.0, 10.0, 2.0],
            [5.0, 5.0, 2.5],
        ];
        build_volumetric_mesh(&points, &[[120, 130, 140]; 5], &TerrainParams::default()).unwrap()
    }

    #[test]
    fn test_stl_exporter() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("terrain.stl");
        let report = StlExporter::new(100).export(&mesh(), &out).unwrap();
        assert_eq!(report.bytes, fs::metadata(&out).unwrap().len());
        assert!(report.diagnostics.contains("closed"));
    }

    #[test]
    fn test_stl_exporter_min_size() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("terrain.stl");
        assert!(StlExporter::new(1_000_000).export(&mesh(), &out).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_command_exporter_copies_input() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("terrain.glb");
        let exporter = CommandExporter {
            program: PathBuf::from("cp"),
            args: vec!["{input}".into(), "{output}".into()],
            extension: "glb".into(),
            timeout: Duration::from_secs(10),
            min_bytes: 64,
        };
        let report = exporter.export(&mesh(), &out).unwrap();
        assert!(report.bytes >= 64);
        assert!(fs::read_to_string(&out).unwrap().starts_with("ply\n"));
    }

    #[cfg(unix)]
    #[test]
    fn test_command_exporter_nonzero_exit() {
        let dir = tempdir().unwrap();
        let exporter = CommandExporter {
            program: PathBuf::from("false"),
            args: vec![],
            extension: "glb".into(),
            timeout: Duration::from_secs(10),
            min_bytes: 1,
        };
        let err = exporter
            .export(&mesh(), &dir.path().join("terrain.glb"))
            .unwrap_err();
        assert!(err.to_string().contains("failed"));
    }

    #[cfg(unix)]
    #[test]
    fn test_command_exporter_missing_output() {
        let dir = tempdir().unwrap();
        let exporter = CommandExporter {
            program: PathBuf::from("true"),
            args: vec![],
            extension: "glb".into(),
            timeout: Duration::from_secs(10),
            min_bytes: 1,
        };
        assert!(exporter.export(&mesh(), &dir.path().join("terrain.glb")).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_command_exporter_timeout() {
        let dir = tempdir().unwrap();
        let exporter = CommandExporter {
            program: PathBuf::from("sleep"),
            args: vec!["5".into()],
            extension: "glb".into(),
            timeout: Duration::from_millis(200),
            min_bytes: 1,
        };
        let err = exporter
            .export(&mesh(), &dir.path().join("terrain.glb"))
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }
}
