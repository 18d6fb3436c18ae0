//! WGS-84 geodesy: ECEF ↔ geodetic conversion and local tangent frames.

use glam::{DMat3, DVec3};

pub mod wgs84 {
    /// Semi-major axis (equatorial radius) in meters.
    pub const A: f64 = 6_378_137.0;

    /// Flattening factor (1 / 298.257223563).
    pub const F: f64 = 1.0 / 298.257_223_563;

    /// First eccentricity squared.
    pub const E2: f64 = F * (2.0 - F);

    /// Semi-minor axis (polar radius) in meters.
    pub const B: f64 = A * (1.0 - F);

    /// Second eccentricity squared.
    pub const E2P: f64 = (A * A - B * B) / (B * B);
}

/// Geodetic coordinate: longitude/latitude in degrees, ellipsoidal height in
/// meters.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Geodetic {
    pub lon: f64,
    pub lat: f64,
    pub height: f64,
}

pub fn geodetic_to_ecef(lat_deg: f64, lon_deg: f64, h_m: f64) -> DVec3 {
    let lat_rad = lat_deg.to_radians();
    let lon_rad = lon_deg.to_radians();

    let (sin_lat, cos_lat) = lat_rad.sin_cos();
    let (sin_lon, cos_lon) = lon_rad.sin_cos();

    // Radius of curvature in the prime vertical.
    let n = wgs84::A / (1.0 - wgs84::E2 * sin_lat * sin_lat).sqrt();

    DVec3::new(
        (n + h_m) * cos_lat * cos_lon,
        (n + h_m) * cos_lat * sin_lon,
        (n * (1.0 - wgs84::E2) + h_m) * sin_lat,
    )
}

/// Convert an earth-fixed cartesian point to geodetic degrees (Bowring).
///
/// The zero vector has no direction to solve for; it maps to the
/// reference-radius point (lon 0, lat 0, height 0) rather than the origin so
/// downstream projection never sees a degenerate direction. A non-finite
/// height (possible exactly at the poles) resolves to 0.
pub fn ecef_to_geodetic(p: DVec3) -> Geodetic {
    if p == DVec3::ZERO {
        return Geodetic::default();
    }

    let DVec3 { x, y, z } = p;
    let rho = (x * x + y * y).sqrt();
    let lon = y.atan2(x);

    let theta = (z * wgs84::A).atan2(rho * wgs84::B);
    let (sin_theta, cos_theta) = theta.sin_cos();

    let lat_num = z + wgs84::E2P * wgs84::B * sin_theta * sin_theta * sin_theta;
    let lat_den = rho - wgs84::E2 * wgs84::A * cos_theta * cos_theta * cos_theta;
    let lat = lat_num.atan2(lat_den);

    let sin_lat = lat.sin();
    let n = wgs84::A / (1.0 - wgs84::E2 * sin_lat * sin_lat).sqrt();
    let mut height = rho / lat.cos() - n;
    if !height.is_finite() {
        height = 0.0;
    }

    Geodetic {
        lon: lon.to_degrees(),
        lat: lat.to_degrees(),
        height,
    }
}

/// Basis of the local east-north-up frame at a geodetic position, expressed
/// in ECEF components. Columns are ê, n̂, û.
pub fn enu_basis(lat_rad: f64, lon_rad: f64) -> DMat3 {
    let (sin_lat, cos_lat) = lat_rad.sin_cos();
    let (sin_lon, cos_lon) = lon_rad.sin_cos();

    DMat3::from_cols(
        DVec3::new(-sin_lon, cos_lon, 0.0),
        DVec3::new(-sin_lat * cos_lon, -sin_lat * sin_lon, cos_lat),
        DVec3::new(cos_lat * cos_lon, cos_lat * sin_lon, sin_lat),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geodetic_round_trip() {
        let p = geodetic_to_ecef(48.8566, 2.3522, 35.0);
        let g = ecef_to_geodetic(p);
        assert!((g.lat - 48.8566).abs() < 1e-9, "lat {}", g.lat);
        assert!((g.lon - 2.3522).abs() < 1e-9, "lon {}", g.lon);
        assert!((g.height - 35.0).abs() < 1e-6, "height {}", g.height);
    }

    #[test]
    fn zero_vector_maps_to_reference_point() {
        let g = ecef_to_geodetic(DVec3::ZERO);
        assert_eq!(g, Geodetic { lon: 0.0, lat: 0.0, height: 0.0 });
    }

    #[test]
    fn equator_prime_meridian() {
        let g = ecef_to_geodetic(DVec3::new(wgs84::A, 0.0, 0.0));
        assert!(g.lon.abs() < 1e-12);
        assert!(g.lat.abs() < 1e-12);
        assert!(g.height.abs() < 1e-6);
    }

    #[test]
    fn enu_up_points_away_from_earth() {
        let lat = 45f64.to_radians();
        let lon = 10f64.to_radians();
        let basis = enu_basis(lat, lon);
        let surface = geodetic_to_ecef(45.0, 10.0, 0.0).normalize();
        // û and the ellipsoid normal agree to well under a degree.
        assert!(basis.z_axis.dot(surface) > 0.999);
    }
}
