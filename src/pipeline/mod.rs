//! Per-lot stage runner and batch driver
//!
//! A record's stage is derived from which of its fields are populated. Each
//! transition computes the next field and commits it with a single partial
//! update, so an interrupted batch resumes where it stopped and re-running a
//! finished batch does no work.

pub mod stages;

use anyhow::{Context, Result, anyhow, bail};
use rayon::prelude::*;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::api::{ElevationService, Geocoder, RetryPolicy, RoadSnapper};
use crate::config::{FileConfig, FrontageConfig};
use crate::domain::{Detection, LotRecord, Stage, StageFailure};
use crate::geometry::{AdjustmentParams, ImageFrame};
use crate::mesh::{MeshExporter, TerrainParams};
use crate::store::{
    DocumentStore, FieldFilter, ObjectStore, RetryingDocumentStore, RetryingObjectStore,
};

/// External services a pipeline talks to
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn DocumentStore>,
    pub objects: Arc<dyn ObjectStore>,
    pub elevation: Arc<dyn ElevationService>,
    pub snapper: Arc<dyn RoadSnapper>,
    /// Fills street names the router does not know
    pub geocoder: Option<Arc<dyn Geocoder>>,
    pub exporter: Arc<dyn MeshExporter>,
}

#[derive(Debug, Clone)]
pub struct PipelineParams {
    pub min_confidence: f64,
    pub adjustment: AdjustmentParams,
    pub terrain: TerrainParams,
    pub frontage: FrontageConfig,
    /// Scratch directory for exporter files
    pub work_dir: PathBuf,
    /// Retries for document and object store calls
    pub storage_retry: RetryPolicy,
    /// Retries for the mesh exporter
    pub export_retry: RetryPolicy,
}

impl Default for PipelineParams {
    fn default() -> Self {
        Self::from_config(&FileConfig::default())
    }
}

impl PipelineParams {
    pub fn from_config(config: &FileConfig) -> Self {
        Self {
            min_confidence: config.pipeline.min_confidence,
            adjustment: config.adjustment,
            terrain: config.terrain.clone(),
            frontage: config.frontage,
            work_dir: config.pipeline.work_dir.clone(),
            storage_retry: RetryPolicy::new(
                config.pipeline.storage_retries,
                std::time::Duration::from_millis(200),
            ),
            export_retry: RetryPolicy::new(
                config.export.max_retries,
                std::time::Duration::from_secs(1),
            ),
        }
    }
}

/// What happened to one record in a run
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum LotOutcome {
    /// Reached the final stage in this run
    Completed { from: Option<Stage> },
    /// Moved forward but stopped at the requested stage
    Advanced { from: Option<Stage>, to: Stage },
    /// Already at or past the requested stage
    Unchanged { stage: Option<Stage> },
    /// Detection confidence below the threshold
    Skipped { confidence: f64 },
    Failed { stage: Stage, message: String },
}

/// Per-batch counts, printed at the end of a run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchReport {
    pub completed: usize,
    pub advanced: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub failed: usize,
    /// (lot id, message) for each failure
    pub failures: Vec<(String, String)>,
}

impl BatchReport {
    pub fn total(&self) -> usize {
        self.completed + self.advanced + self.unchanged + self.skipped + self.failed
    }

    fn record(&mut self, id: &str, outcome: &LotOutcome) {
        match outcome {
            LotOutcome::Completed { .. } => self.completed += 1,
            LotOutcome::Advanced { .. } => self.advanced += 1,
            LotOutcome::Unchanged { .. } => self.unchanged += 1,
            LotOutcome::Skipped { .. } => self.skipped += 1,
            LotOutcome::Failed { stage, message } => {
                self.failed += 1;
                self.failures
                    .push((id.to_string(), format!("{}: {}", stage, message)));
            }
        }
    }
}

pub struct Pipeline {
    collab: Collaborators,
    params: PipelineParams,
}

impl Pipeline {
    /// Storage collaborators are wrapped so that every call retries transient failures
    pub fn new(mut collab: Collaborators, params: PipelineParams) -> Self {
        collab.store = Arc::new(RetryingDocumentStore::new(collab.store, params.storage_retry));
        collab.objects = Arc::new(RetryingObjectStore::new(collab.objects, params.storage_retry));
        Self { collab, params }
    }

    pub fn params(&self) -> &PipelineParams {
        &self.params
    }

    /// Store a new record, uploading its image when given
    pub fn ingest(
        &self,
        id: &str,
        frame: ImageFrame,
        detection: Detection,
        image: Option<(&str, &[u8])>,
    ) -> Result<LotRecord> {
        let mut record = LotRecord::new(id, frame, detection);
        if let Some((extension, bytes)) = image {
            let path = stages::object_path(id, &format!("image.{}", extension));
            self.collab.objects.put(&path, bytes)?;
            record = record.with_image(&path);
        }
        self.collab.store.insert(&record)?;
        tracing::info!(lot = %id, confidence = record.detection.confidence, "Lot ingested");
        Ok(record)
    }

    /// Ids of records that have not reached the final stage
    pub fn pending(&self) -> Result<Vec<String>> {
        self.collab
            .store
            .find(&FieldFilter::new().missing(Stage::SlopeClassified.field()))
    }

    /// Number of records sitting at each stage
    pub fn status(&self) -> Result<BTreeMap<Stage, usize>> {
        let mut counts = BTreeMap::new();
        for stage in Stage::ALL {
            let n = self.collab.store.find(&FieldFilter::at_stage(stage))?.len();
            counts.insert(stage, n);
        }
        Ok(counts)
    }

    fn commit(&self, id: &str, path: &str, value: Value) -> Result<()> {
        self.collab.store.set_field(id, path, value)
    }

    fn record_failure(&self, record: &LotRecord, stage: Stage, error: &anyhow::Error) -> LotOutcome {
        let message = format!("{:#}", error);
        tracing::warn!(lot = %record.id, %stage, error = %message, "Stage failed");

        let failure = StageFailure {
            stage,
            message: message.clone(),
        };
        let persisted = serde_json::to_value(&failure)
            .map_err(anyhow::Error::from)
            .and_then(|v| self.commit(&record.id, "failure", v));
        if let Err(e) = persisted {
            tracing::error!(lot = %record.id, error = %e, "Could not persist stage failure");
        }
        LotOutcome::Failed { stage, message }
    }

    /// Compute the field for `stage` and commit it; the local record is updated on success
    fn run_stage(&self, record: &mut LotRecord, stage: Stage) -> Result<()> {
        let collab = &self.collab;
        let params = &self.params;

        let value = match stage {
            Stage::Detected => bail!("detection is provided at ingest"),
            Stage::AreaComputed => {
                let area = stages::compute_area(record, params)?;
                let value = serde_json::to_value(&area)?;
                record.area = Some(area);
                value
            }
            Stage::Colored => {
                let colors = stages::sample_colors(record, collab)?;
                let value = serde_json::to_value(&colors)?;
                record.colors = Some(colors);
                value
            }
            Stage::Elevated => {
                let elevations = stages::lookup_elevations(record, collab)?;
                let value = serde_json::to_value(&elevations)?;
                record.elevation = Some(elevations);
                value
            }
            Stage::MetricConverted => {
                let metric = stages::convert_metric(record)?;
                let value = serde_json::to_value(&metric)?;
                record.metric = Some(metric);
                value
            }
            Stage::CardinalPointsAdded => {
                let probes = stages::place_probes(record, params)?;
                let value = serde_json::to_value(&probes)?;
                record.probes = Some(probes);
                value
            }
            Stage::FrontageResolved => {
                let frontage = stages::resolve_frontage(record, collab, params)?;
                let value = serde_json::to_value(&frontage)?;
                record.frontage = Some(frontage);
                value
            }
            Stage::CsvExported => {
                let csv = stages::export_csv(record, collab)?;
                let value = serde_json::to_value(&csv)?;
                record.csv = Some(csv);
                value
            }
            Stage::MeshExported => {
                let mesh = stages::export_mesh(record, collab, params)?;
                let value = serde_json::to_value(&mesh)?;
                record.mesh = Some(mesh);
                value
            }
            Stage::SlopeClassified => {
                let slope = stages::classify_slope(record, collab)?;
                let value = serde_json::to_value(&slope)?;
                record.slope = Some(slope);
                value
            }
        };

        self.commit(&record.id, stage.field(), value)
            .with_context(|| format!("Failed to commit {}", stage))
    }

    /// Advance one record as far as `until` (the final stage when `None`)
    ///
    /// Stages whose field is already populated are skipped. Only errors reading
    /// the record are returned as `Err`; stage failures become [`LotOutcome::Failed`].
    pub fn process(&self, id: &str, until: Option<Stage>) -> Result<LotOutcome> {
        let mut record = self
            .collab
            .store
            .get(id)?
            .ok_or_else(|| anyhow!("No record with id {}", id))?;
        let target = until.unwrap_or(Stage::SlopeClassified);

        if record.detection.confidence < self.params.min_confidence {
            tracing::info!(lot = %id, confidence = record.detection.confidence, "Skipping low-confidence detection");
            return Ok(LotOutcome::Skipped {
                confidence: record.detection.confidence,
            });
        }

        let from = record.stage();
        let Some(mut current) = from else {
            let error = anyhow!(crate::error::LotError::TooFewPoints(0));
            return Ok(self.record_failure(&record, Stage::Detected, &error));
        };
        if !record.is_consistent() {
            tracing::warn!(lot = %id, stage = %current, "Record has fields beyond its stage");
        }
        if current >= target {
            return Ok(LotOutcome::Unchanged { stage: from });
        }

        while let Some(next) = current.next() {
            if next > target {
                break;
            }
            if record.has(next) {
                tracing::debug!(lot = %id, stage = %next, "Already populated");
            } else {
                let span = tracing::info_span!("stage", lot = %id, stage = %next);
                let _guard = span.enter();
                if let Err(e) = self.run_stage(&mut record, next) {
                    return Ok(self.record_failure(&record, next, &e));
                }
                tracing::info!("Stage complete");
            }
            current = next;
        }

        if record.failure.is_some()
            && let Err(e) = self.collab.store.unset_field(id, "failure")
        {
            tracing::warn!(lot = %id, error = %e, "Could not clear previous failure");
        }

        Ok(if current.is_final() {
            LotOutcome::Completed { from }
        } else {
            LotOutcome::Advanced { from, to: current }
        })
    }

    /// Process `ids` on a pool of `workers` threads, one record per task
    ///
    /// `on_done` is called from worker threads as each record finishes.
    pub fn run_batch(
        &self,
        ids: &[String],
        workers: usize,
        until: Option<Stage>,
        on_done: &(dyn Fn(&str, &LotOutcome) + Sync),
    ) -> Result<BatchReport> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers.max(1))
            .build()
            .context("Failed to build worker pool")?;

        let outcomes: Vec<(String, LotOutcome)> = pool.install(|| {
            ids.par_iter()
                .map(|id| {
                    let outcome = self.process(id, until).unwrap_or_else(|e| LotOutcome::Failed {
                        stage: Stage::Detected,
                        message: format!("{:#}", e),
                    });
                    on_done(id, &outcome);
                    (id.clone(), outcome)
                })
                .collect()
        });

        let mut report = BatchReport::default();
        for (id, outcome) in &outcomes {
            report.record(id, outcome);
        }
        tracing::info!(
            completed = report.completed,
            advanced = report.advanced,
            unchanged = report.unchanged,
            skipped = report.skipped,
            failed = report.failed,
            "Batch finished"
        );
        Ok(report)
    }
}
