pub mod lot;
pub mod stage;

pub use lot::{AreaStage, Artifact, Detection, FrontageStage, LotRecord, StageFailure};
pub use stage::{Stage, TRANSITIONS, is_allowed};
