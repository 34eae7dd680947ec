pub mod cache;
pub mod detection;
pub mod elevation;
pub mod nominatim;
pub mod retry;
pub mod routing;

pub use cache::{ElevationCache, JsonFileCache, MemoryCache, QuantizedKey};
pub use detection::{Detector, HttpDetector};
pub use elevation::{CachedElevation, ElevationService, OpenElevation};
pub use nominatim::{Address, Geocoder, Nominatim};
pub use retry::{RetryPolicy, with_retry};
pub use routing::{OsrmSnapper, RoadSnapper, SnappedPoint};

pub(crate) const USER_AGENT: &str = concat!("lot3d/", env!("CARGO_PKG_VERSION"));
