//! Forward map-projection collaborator boundary.

use glam::DVec3;

use crate::geodesy::Geodetic;

/// Forward projection from geodetic degrees to planar map units. The math
/// behind it belongs to the host mapping stack; the pipeline only ever calls
/// the forward direction.
pub trait Projection: Send + Sync {
    fn project(&self, lon_deg: f64, lat_deg: f64) -> [f64; 2];
}

/// A geodetic point in projected units, height carried through unchanged.
pub fn projected_point(projection: &dyn Projection, g: Geodetic) -> DVec3 {
    let [x, y] = projection.project(g.lon, g.lat);
    DVec3::new(x, y, g.height)
}

/// Spherical web-mercator forward projection, meters at the equator.
///
/// Shipped for tooling and tests; production hosts supply their own
/// projection through the trait.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebMercator;

impl WebMercator {
    pub const RADIUS: f64 = 6_378_137.0;
}

impl Projection for WebMercator {
    fn project(&self, lon_deg: f64, lat_deg: f64) -> [f64; 2] {
        let x = Self::RADIUS * lon_deg.to_radians();
        let lat = lat_deg.clamp(-85.051_128_78, 85.051_128_78).to_radians();
        let y = Self::RADIUS * (std::f64::consts::FRAC_PI_4 + lat * 0.5).tan().ln();
        [x, y]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mercator_origin_is_zero() {
        let [x, y] = WebMercator.project(0.0, 0.0);
        assert_eq!(x, 0.0);
        assert!(y.abs() < 1e-9);
    }

    #[test]
    fn mercator_x_is_linear_in_longitude() {
        let [x180, _] = WebMercator.project(180.0, 0.0);
        let [x90, _] = WebMercator.project(90.0, 0.0);
        assert!((x180 - 2.0 * x90).abs() < 1e-6);
    }
}
