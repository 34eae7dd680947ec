use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Web-Mercator tile edge in pixels
pub const TILE_SIZE: f64 = 256.0;

/// Mean Earth radius used for great-circle math, in meters
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Static map image geometry: where the image is centered and how it was rendered.
///
/// Pixel coordinates are measured from the top-left corner of the image,
/// x growing to the right and y growing downwards.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImageFrame {
    /// (lat, lon) of the image center in WGS84
    pub center: (f64, f64),
    pub zoom: u8,
    /// Device scale factor (1 or 2 for most static map providers)
    pub scale: f64,
    pub width: u32,
    pub height: u32,
}

impl ImageFrame {
    pub fn new(center: (f64, f64), zoom: u8, scale: f64, width: u32, height: u32) -> Self {
        Self {
            center,
            zoom,
            scale,
            width,
            height,
        }
    }

    /// World map edge in pixels: `tile * 2^zoom * scale`
    pub fn map_size(&self) -> f64 {
        TILE_SIZE * 2f64.powi(self.zoom as i32) * self.scale
    }

    /// World-pixel position of the image's top-left corner
    fn origin(&self) -> (f64, f64) {
        let (cx, cy) = to_world_pixel(self.center.0, self.center.1, self.map_size());
        (
            cx - self.width as f64 / 2.0,
            cy - self.height as f64 / 2.0,
        )
    }

    /// Convert an image pixel to (lat, lon)
    pub fn pixel_to_geo(&self, px: f64, py: f64) -> (f64, f64) {
        let (ox, oy) = self.origin();
        from_world_pixel(ox + px, oy + py, self.map_size())
    }

    /// Convert (lat, lon) to an image pixel. Exact inverse of [`ImageFrame::pixel_to_geo`].
    pub fn geo_to_pixel(&self, lat: f64, lon: f64) -> (f64, f64) {
        let (ox, oy) = self.origin();
        let (wx, wy) = to_world_pixel(lat, lon, self.map_size());
        (wx - ox, wy - oy)
    }

    /// Convert a normalized (0..1) annotation point to (lat, lon)
    pub fn normalized_to_geo(&self, nx: f64, ny: f64) -> (f64, f64) {
        self.pixel_to_geo(nx * self.width as f64, ny * self.height as f64)
    }

    /// Convert (lat, lon) back to a normalized (0..1) annotation point
    pub fn geo_to_normalized(&self, lat: f64, lon: f64) -> (f64, f64) {
        let (px, py) = self.geo_to_pixel(lat, lon);
        (px / self.width as f64, py / self.height as f64)
    }
}

/// Forward Web-Mercator: (lat, lon) in degrees to world pixels
fn to_world_pixel(lat: f64, lon: f64, map_size: f64) -> (f64, f64) {
    let x = (lon + 180.0) / 360.0 * map_size;
    // Clamp away from the poles where the projection diverges
    let sin_lat = lat.to_radians().sin().clamp(-0.9999, 0.9999);
    let y = (0.5 - ((1.0 + sin_lat) / (1.0 - sin_lat)).ln() / (4.0 * PI)) * map_size;
    (x, y)
}

/// Inverse Web-Mercator: world pixels to (lat, lon) in degrees
fn from_world_pixel(x: f64, y: f64, map_size: f64) -> (f64, f64) {
    let lon = x / map_size * 360.0 - 180.0;
    let n = PI - 2.0 * PI * y / map_size;
    let lat = n.sinh().atan().to_degrees();
    (lat, lon)
}

/// Great-circle distance in meters between two (lat, lon) points given in degrees
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();

    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_M * c
}

/// Simple equirectangular projection from WGS84 to local meters
///
/// Uses approximation suitable for parcel-scale geometry:
/// - x = (lon - center_lon) * cos(center_lat) * 111320
/// - y = (lat - center_lat) * 111320
#[derive(Debug, Clone)]
pub struct Projector {
    center_lat: f64,
    center_lon: f64,
    cos_lat: f64,
}

/// Meters per degree at equator
const METERS_PER_DEGREE: f64 = 111320.0;

impl Projector {
    /// Create a new projector centered at the given coordinates
    ///
    /// # Arguments
    /// * `center` - (lat, lon) center point in WGS84
    pub fn new(center: (f64, f64)) -> Self {
        let (lat, lon) = center;
        Self {
            center_lat: lat,
            center_lon: lon,
            cos_lat: lat.to_radians().cos(),
        }
    }

    /// Project a lat/lon point to local meters
    ///
    /// # Returns
    /// * (x, y) in meters, centered at the projection center
    pub fn project(&self, lat: f64, lon: f64) -> (f64, f64) {
        let x = (lon - self.center_lon) * self.cos_lat * METERS_PER_DEGREE;
        let y = (lat - self.center_lat) * METERS_PER_DEGREE;

        (x, y)
    }

    /// Map local meters back to (lat, lon)
    pub fn unproject(&self, x: f64, y: f64) -> (f64, f64) {
        let lat = self.center_lat + y / METERS_PER_DEGREE;
        let lon = self.center_lon + x / (self.cos_lat * METERS_PER_DEGREE);
        (lat, lon)
    }
}
