use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Pipeline progress of a lot, in strict forward order
///
/// A record is in stage `S` when the fields of `S` and every earlier stage
/// are populated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Detected,
    AreaComputed,
    Colored,
    Elevated,
    MetricConverted,
    CardinalPointsAdded,
    FrontageResolved,
    CsvExported,
    MeshExported,
    SlopeClassified,
}

/// Allowed transitions. Each stage only advances to its immediate successor.
pub const TRANSITIONS: [(Stage, Stage); 9] = [
    (Stage::Detected, Stage::AreaComputed),
    (Stage::AreaComputed, Stage::Colored),
    (Stage::Colored, Stage::Elevated),
    (Stage::Elevated, Stage::MetricConverted),
    (Stage::MetricConverted, Stage::CardinalPointsAdded),
    (Stage::CardinalPointsAdded, Stage::FrontageResolved),
    (Stage::FrontageResolved, Stage::CsvExported),
    (Stage::CsvExported, Stage::MeshExported),
    (Stage::MeshExported, Stage::SlopeClassified),
];

impl Stage {
    pub const ALL: [Stage; 10] = [
        Stage::Detected,
        Stage::AreaComputed,
        Stage::Colored,
        Stage::Elevated,
        Stage::MetricConverted,
        Stage::CardinalPointsAdded,
        Stage::FrontageResolved,
        Stage::CsvExported,
        Stage::MeshExported,
        Stage::SlopeClassified,
    ];

    pub fn next(self) -> Option<Stage> {
        TRANSITIONS
            .iter()
            .find(|(from, _)| *from == self)
            .map(|&(_, to)| to)
    }

    pub fn is_final(self) -> bool {
        self.next().is_none()
    }

    /// Record field that holds this stage's output
    pub fn field(self) -> &'static str {
        match self {
            Stage::Detected => "detection",
            Stage::AreaComputed => "area",
            Stage::Colored => "colors",
            Stage::Elevated => "elevation",
            Stage::MetricConverted => "metric",
            Stage::CardinalPointsAdded => "probes",
            Stage::FrontageResolved => "frontage",
            Stage::CsvExported => "csv",
            Stage::MeshExported => "mesh",
            Stage::SlopeClassified => "slope",
        }
    }
}

pub fn is_allowed(from: Stage, to: Stage) -> bool {
    TRANSITIONS.contains(&(from, to))
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Detected => "detected",
            Stage::AreaComputed => "area_computed",
            Stage::Colored => "colored",
            Stage::Elevated => "elevated",
            Stage::MetricConverted => "metric_converted",
            Stage::CardinalPointsAdded => "cardinal_points_added",
            Stage::FrontageResolved => "frontage_resolved",
            Stage::CsvExported => "csv_exported",
            Stage::MeshExported => "mesh_exported",
            Stage::SlopeClassified => "slope_classified",
        };
        f.write_str(name)
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .into_iter()
            .find(|stage| stage.to_string() == s)
            .ok_or_else(|| format!("unknown stage '{}'", s))
    }
}
