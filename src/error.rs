use thiserror::Error;

/// Invalid input to a core computation. These abort the stage without writing any state.
#[derive(Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum LotError {
    #[error("polygon needs at least 3 points, got {0}")]
    TooFewPoints(usize),

    #[error("point cloud is empty")]
    EmptyPointCloud,

    #[error("polygon has zero area")]
    ZeroArea,

    #[error("per-point attributes disagree in length: {0}")]
    LengthMismatch(String),

    #[error("stage input missing: {0}")]
    MissingStageInput(&'static str),
}

pub type LotResult<T> = Result<T, LotError>;

/// Storage requests that no retry can fix
#[derive(Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum StoreError {
    #[error("invalid object path: {0:?}")]
    InvalidKey(String),

    #[error("invalid record id: {0:?}")]
    InvalidId(String),

    #[error("invalid field path: {0:?}")]
    InvalidField(String),

    #[error("no object at {0}")]
    MissingObject(String),

    #[error("no record with id {0}")]
    MissingRecord(String),
}
