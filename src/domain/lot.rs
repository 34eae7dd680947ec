use serde::{Deserialize, Serialize};

use super::stage::Stage;
use crate::api::SnappedPoint;
use crate::geometry::{Adjustment, ImageFrame, MetricConversion};
use crate::slope::Declivity;

/// Output of the detector for one lot image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Normalized (0..1) image-space outline
    pub polygon: Vec<(f64, f64)>,
    pub confidence: f64,
    #[serde(default)]
    pub class_id: u32,
}

impl Detection {
    pub fn is_normalized(&self) -> bool {
        self.polygon
            .iter()
            .all(|&(x, y)| (0.0..=1.0).contains(&x) && (0.0..=1.0).contains(&y))
    }
}

/// Boundary regularisation and area
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AreaStage {
    /// `None` when no adjustment was possible and the raw polygon is kept
    pub adjustment: Option<Adjustment>,
    /// Normalized outline used downstream (adjusted, or raw)
    pub outline: Vec<(f64, f64)>,
    /// Outline area in image pixels
    pub pixel_area: f64,
    pub geodesic_area_m2: f64,
    /// Outline vertices as (lat, lon), same order as `outline`
    pub boundary: Vec<(f64, f64)>,
}

/// Road snapping and the resulting front edge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrontageStage {
    /// Indices into the boundary of the front points, nearest first
    pub front: Vec<usize>,
    pub snapped: Vec<SnappedPoint>,
    /// Distinct street names seen while snapping
    pub streets: Vec<String>,
}

/// A file written to object storage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub path: String,
    pub url: String,
    pub bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageFailure {
    pub stage: Stage,
    pub message: String,
}

/// Everything known about one lot. Owned by the pipeline; stages fill one field each.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LotRecord {
    pub id: String,
    pub frame: ImageFrame,
    pub detection: Detection,
    /// Object-storage path of the source image
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub area: Option<AreaStage>,
    #[serde(default)]
    pub colors: Option<Vec<[u8; 3]>>,
    #[serde(default)]
    pub elevation: Option<Vec<Option<f64>>>,
    #[serde(default)]
    pub metric: Option<MetricConversion>,
    #[serde(default)]
    pub probes: Option<Vec<(f64, f64)>>,
    #[serde(default)]
    pub frontage: Option<FrontageStage>,
    #[serde(default)]
    pub csv: Option<Artifact>,
    #[serde(default)]
    pub mesh: Option<Artifact>,
    #[serde(default)]
    pub slope: Option<Declivity>,
    #[serde(default)]
    pub failure: Option<StageFailure>,
}

impl LotRecord {
    pub fn new(id: &str, frame: ImageFrame, detection: Detection) -> Self {
        Self {
            id: id.to_string(),
            frame,
            detection,
            image: None,
            area: None,
            colors: None,
            elevation: None,
            metric: None,
            probes: None,
            frontage: None,
            csv: None,
            mesh: None,
            slope: None,
            failure: None,
        }
    }

    pub fn with_image(mut self, path: &str) -> Self {
        self.image = Some(path.to_string());
        self
    }

    /// Whether the output field of `stage` is populated
    pub fn has(&self, stage: Stage) -> bool {
        match stage {
            Stage::Detected => !self.detection.polygon.is_empty(),
            Stage::AreaComputed => self.area.is_some(),
            Stage::Colored => self.colors.is_some(),
            Stage::Elevated => self.elevation.is_some(),
            Stage::MetricConverted => self.metric.is_some(),
            Stage::CardinalPointsAdded => self.probes.is_some(),
            Stage::FrontageResolved => self.frontage.is_some(),
            Stage::CsvExported => self.csv.is_some(),
            Stage::MeshExported => self.mesh.is_some(),
            Stage::SlopeClassified => self.slope.is_some(),
        }
    }

    /// Furthest stage whose field and all earlier fields are populated
    ///
    /// `None` only for a record without a detection polygon.
    pub fn stage(&self) -> Option<Stage> {
        Stage::ALL
            .iter()
            .copied()
            .take_while(|&s| self.has(s))
            .last()
    }

    /// No later field is populated while an earlier one is missing
    pub fn is_consistent(&self) -> bool {
        let populated: Vec<bool> = Stage::ALL.iter().map(|&s| self.has(s)).collect();
        populated.windows(2).all(|w| w[0] || !w[1])
    }

    pub fn boundary(&self) -> Option<&[(f64, f64)]> {
        self.area.as_ref().map(|a| a.boundary.as_slice())
    }
}
