pub mod adjust;
pub mod area;
pub mod projection;
pub mod simplify;
pub mod utm;

pub use adjust::{
    Adjustment, AdjustmentMethod, AdjustmentParams, is_convex, min_area_rectangle,
    scale_about_centroid, select_adjustment,
};
pub use area::{geodesic_area, planar_area};
pub use projection::{ImageFrame, Projector, haversine_distance};
pub use simplify::{Simplified, simplify_to_range};
pub use utm::{MetricConversion, MetricPoint, UtmCoord, convert_point_list, to_metric};
