use anyhow::{Result, bail};
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::{TempDir, tempdir};

use lot3d::api::{ElevationService, RetryPolicy, RoadSnapper, SnappedPoint};
use lot3d::domain::{Detection, Stage};
use lot3d::geometry::ImageFrame;
use lot3d::mesh::{ExportReport, MeshExporter, StlExporter, VolumetricMesh};
use lot3d::pipeline::{Collaborators, LotOutcome, Pipeline, PipelineParams};
use lot3d::slope::SlopeDirection;
use lot3d::store::{DocumentStore, MemoryObjectStore, MemoryStore, ObjectStore};
use lot3d::tabular;

const CENTER: (f64, f64) = (-23.5505, -46.6333);

/// Terrain that rises towards the south
struct Ramp;

impl ElevationService for Ramp {
    fn elevations(&self, points: &[(f64, f64)]) -> Result<Vec<Option<f64>>> {
        Ok(points
            .iter()
            .map(|&(lat, _)| Some(100.0 + (CENTER.0 - lat) * 10_000.0))
            .collect())
    }
}

/// A street running east-west just north of the lot
struct NorthStreet;

impl RoadSnapper for NorthStreet {
    fn snap(&self, point: (f64, f64)) -> Result<SnappedPoint> {
        Ok(SnappedPoint {
            location: (CENTER.0 + 0.0005, point.1),
            street: "Rua Augusta".to_string(),
            distance_m: None,
        })
    }
}

struct Offline;

impl RoadSnapper for Offline {
    fn snap(&self, _point: (f64, f64)) -> Result<SnappedPoint> {
        bail!("routing service unavailable")
    }
}

struct Harness {
    store: Arc<MemoryStore>,
    objects: Arc<MemoryObjectStore>,
    _work: TempDir,
    params: PipelineParams,
}

impl Harness {
    fn new() -> Self {
        let work = tempdir().unwrap();
        let mut params = PipelineParams::default();
        params.work_dir = work.path().to_path_buf();
        params.terrain.min_output_bytes = 100;
        params.storage_retry = RetryPolicy::new(2, Duration::ZERO);
        params.export_retry = RetryPolicy::new(1, Duration::ZERO);
        Self {
            store: Arc::new(MemoryStore::new()),
            objects: Arc::new(MemoryObjectStore::new()),
            _work: work,
            params,
        }
    }

    fn collaborators(&self, snapper: Arc<dyn RoadSnapper>) -> Collaborators {
        Collaborators {
            store: self.store.clone(),
            objects: self.objects.clone(),
            elevation: Arc::new(Ramp),
            snapper,
            geocoder: None,
            exporter: Arc::new(StlExporter::new(self.params.terrain.min_output_bytes)),
        }
    }

    fn pipeline(&self, snapper: Arc<dyn RoadSnapper>) -> Pipeline {
        Pipeline::new(self.collaborators(snapper), self.params.clone())
    }
}

/// Object store whose first write of each point file fails like an overloaded backend
struct FlakyObjects {
    inner: Arc<MemoryObjectStore>,
    csv_puts: AtomicUsize,
}

impl ObjectStore for FlakyObjects {
    fn put(&self, path: &str, bytes: &[u8]) -> Result<String> {
        if path.ends_with("points.csv") && self.csv_puts.fetch_add(1, Ordering::SeqCst) == 0 {
            bail!("503 transient");
        }
        self.inner.put(path, bytes)
    }

    fn get(&self, path: &str) -> Result<Vec<u8>> {
        self.inner.get(path)
    }

    fn url(&self, path: &str) -> String {
        self.inner.url(path)
    }
}

/// Exporter that fails its first call
struct FlakyExporter {
    inner: StlExporter,
    calls: AtomicUsize,
}

impl MeshExporter for FlakyExporter {
    fn extension(&self) -> &str {
        self.inner.extension()
    }

    fn export(&self, mesh: &VolumetricMesh, output: &Path) -> Result<ExportReport> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            bail!("exporter crashed");
        }
        self.inner.export(mesh, output)
    }
}

fn png() -> Vec<u8> {
    let image = image::RgbImage::from_fn(256, 256, |x, y| {
        if y < 128 {
            image::Rgb([200, (x % 256) as u8, 40])
        } else {
            image::Rgb([30, 160, 60])
        }
    });
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .unwrap();
    bytes
}

fn detection(confidence: f64) -> Detection {
    Detection {
        polygon: vec![(0.3, 0.3), (0.7, 0.3), (0.7, 0.7), (0.3, 0.7)],
        confidence,
        class_id: 0,
    }
}

fn ingest(pipeline: &Pipeline, id: &str, confidence: f64) {
    let frame = ImageFrame::new(CENTER, 19, 1.0, 256, 256);
    pipeline
        .ingest(id, frame, detection(confidence), Some(("png", &png())))
        .unwrap();
}

#[test]
fn test_full_run_reaches_slope() {
    let h = Harness::new();
    let pipeline = h.pipeline(Arc::new(NorthStreet));
    ingest(&pipeline, "lot-1", 0.9);

    let outcome = pipeline.process("lot-1", None).unwrap();
    assert_eq!(
        outcome,
        LotOutcome::Completed {
            from: Some(Stage::Detected)
        }
    );

    let record = h.store.get("lot-1").unwrap().unwrap();
    assert_eq!(record.stage(), Some(Stage::SlopeClassified));
    assert!(record.is_consistent());
    assert!(record.failure.is_none());

    let area = record.area.as_ref().unwrap();
    assert!(area.geodesic_area_m2 > 0.0);
    assert_eq!(record.colors.as_ref().unwrap().len(), area.boundary.len());

    let frontage = record.frontage.as_ref().unwrap();
    assert_eq!(frontage.front.len(), 2);
    assert_eq!(frontage.streets, vec!["Rua Augusta".to_string()]);
    // The front is the northern edge
    let south = area.boundary.iter().map(|p| p.0).fold(f64::INFINITY, f64::min);
    for &i in &frontage.front {
        assert!(area.boundary[i].0 > south + 1e-6);
    }

    let csv = record.csv.as_ref().unwrap();
    assert_eq!(csv.path, "lots/lot-1/points.csv");
    let text = String::from_utf8(h.objects.get(&csv.path).unwrap()).unwrap();
    let rows = tabular::parse(&text).unwrap();
    let lot_rows = rows.iter().filter(|r| !r.road).count();
    assert_eq!(lot_rows, area.boundary.len());
    assert_eq!(rows.iter().filter(|r| r.front).count(), 2);
    assert!(rows.iter().any(|r| r.road && r.color == tabular::ROAD_COLOR));
    assert!(rows.iter().all(|r| r.zone_number == 23 && r.zone_letter == 'K'));

    let mesh = record.mesh.as_ref().unwrap();
    assert_eq!(mesh.path, "lots/lot-1/terrain.stl");
    assert!(mesh.bytes >= 100);
    assert!(h.objects.contains(&mesh.path));

    let slope = record.slope.as_ref().unwrap();
    assert!(slope.slope_percent > 0.0);
    assert_eq!(slope.direction, Some(SlopeDirection::Uphill));
    assert!(slope.amplitude > 0.0);
}

#[test]
fn test_rerun_does_nothing() {
    let h = Harness::new();
    let pipeline = h.pipeline(Arc::new(NorthStreet));
    ingest(&pipeline, "lot-1", 0.9);

    pipeline.process("lot-1", None).unwrap();
    let before = h.store.get("lot-1").unwrap().unwrap();
    let outcome = pipeline.process("lot-1", None).unwrap();
    assert_eq!(
        outcome,
        LotOutcome::Unchanged {
            stage: Some(Stage::SlopeClassified)
        }
    );
    assert_eq!(h.store.get("lot-1").unwrap().unwrap(), before);
    assert!(pipeline.pending().unwrap().is_empty());
}

#[test]
fn test_low_confidence_is_skipped() {
    let h = Harness::new();
    let pipeline = h.pipeline(Arc::new(NorthStreet));
    ingest(&pipeline, "faint", 0.2);

    let outcome = pipeline.process("faint", None).unwrap();
    assert_eq!(outcome, LotOutcome::Skipped { confidence: 0.2 });
    assert_eq!(
        h.store.get("faint").unwrap().unwrap().stage(),
        Some(Stage::Detected)
    );
}

#[test]
fn test_failure_is_recorded_and_resumed() {
    let h = Harness::new();
    let offline = h.pipeline(Arc::new(Offline));
    ingest(&offline, "lot-2", 0.9);

    let outcome = offline.process("lot-2", None).unwrap();
    let LotOutcome::Failed { stage, message } = outcome else {
        panic!("expected failure, got {:?}", outcome);
    };
    assert_eq!(stage, Stage::FrontageResolved);
    assert!(message.contains("no probe point"));

    let record = h.store.get("lot-2").unwrap().unwrap();
    assert_eq!(record.stage(), Some(Stage::CardinalPointsAdded));
    assert!(record.probes.is_some());
    assert!(record.frontage.is_none());
    assert_eq!(record.failure.as_ref().unwrap().stage, Stage::FrontageResolved);

    let online = h.pipeline(Arc::new(NorthStreet));
    let outcome = online.process("lot-2", None).unwrap();
    assert_eq!(
        outcome,
        LotOutcome::Completed {
            from: Some(Stage::CardinalPointsAdded)
        }
    );
    let record = h.store.get("lot-2").unwrap().unwrap();
    assert!(record.failure.is_none());
    assert_eq!(record.stage(), Some(Stage::SlopeClassified));
}

#[test]
fn test_until_stops_early() {
    let h = Harness::new();
    let pipeline = h.pipeline(Arc::new(NorthStreet));
    ingest(&pipeline, "lot-3", 0.9);

    let outcome = pipeline.process("lot-3", Some(Stage::Elevated)).unwrap();
    assert_eq!(
        outcome,
        LotOutcome::Advanced {
            from: Some(Stage::Detected),
            to: Stage::Elevated
        }
    );
    let record = h.store.get("lot-3").unwrap().unwrap();
    assert_eq!(record.stage(), Some(Stage::Elevated));
    assert!(record.metric.is_none());

    assert_eq!(
        pipeline.process("lot-3", Some(Stage::AreaComputed)).unwrap(),
        LotOutcome::Unchanged {
            stage: Some(Stage::Elevated)
        }
    );

    let status = pipeline.status().unwrap();
    assert_eq!(status[&Stage::Elevated], 1);
    assert_eq!(status[&Stage::Detected], 0);
}

#[test]
fn test_batch_report() {
    let h = Harness::new();
    let pipeline = h.pipeline(Arc::new(NorthStreet));
    ingest(&pipeline, "done", 0.9);
    ingest(&pipeline, "fresh", 0.9);
    ingest(&pipeline, "faint", 0.1);
    pipeline.process("done", None).unwrap();

    let ids: Vec<String> = ["done", "fresh", "faint", "missing"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let seen = std::sync::Mutex::new(Vec::new());
    let report = pipeline
        .run_batch(&ids, 3, None, &|id: &str, _: &LotOutcome| {
            seen.lock().unwrap().push(id.to_string());
        })
        .unwrap();

    assert_eq!(report.completed, 1);
    assert_eq!(report.unchanged, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(report.total(), 4);
    assert_eq!(report.failures[0].0, "missing");
    assert_eq!(seen.lock().unwrap().len(), 4);
}

#[test]
fn test_transient_storage_failure_is_retried() {
    let h = Harness::new();
    let flaky = Arc::new(FlakyObjects {
        inner: h.objects.clone(),
        csv_puts: AtomicUsize::new(0),
    });
    let mut collab = h.collaborators(Arc::new(NorthStreet));
    collab.objects = flaky.clone();
    let pipeline = Pipeline::new(collab, h.params.clone());
    ingest(&pipeline, "lot-4", 0.9);

    let outcome = pipeline.process("lot-4", None).unwrap();
    assert_eq!(
        outcome,
        LotOutcome::Completed {
            from: Some(Stage::Detected)
        }
    );
    assert_eq!(flaky.csv_puts.load(Ordering::SeqCst), 2);
    assert!(h.objects.contains("lots/lot-4/points.csv"));
}

#[test]
fn test_transient_export_failure_is_retried() {
    let h = Harness::new();
    let exporter = Arc::new(FlakyExporter {
        inner: StlExporter::new(h.params.terrain.min_output_bytes),
        calls: AtomicUsize::new(0),
    });
    let mut collab = h.collaborators(Arc::new(NorthStreet));
    collab.exporter = exporter.clone();
    let pipeline = Pipeline::new(collab, h.params.clone());
    ingest(&pipeline, "lot-5", 0.9);

    let outcome = pipeline.process("lot-5", None).unwrap();
    assert!(matches!(outcome, LotOutcome::Completed { .. }));
    assert_eq!(exporter.calls.load(Ordering::SeqCst), 2);
    assert!(h.objects.contains("lots/lot-5/terrain.stl"));
}
