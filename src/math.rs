//! Mathy related things
//!
//! Angles on the celestial sphere, unit vectors and the gnomonic (tangent plane)
//! projection used to turn sky positions into flat "standard coordinates".

use glam::DVec3;

/// The base angle type used in the crate
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Degree(f64);
impl Default for Degree {
    fn default() -> Self {
        Self(0.0)
    }
}
impl Degree {
    pub fn new(deg: f64) -> Self {
        Self(deg)
    }
    pub fn degrees(&self) -> f64 {
        self.0
    }
    pub fn radians(&self) -> f64 {
        self.0.to_radians()
    }
}

/// Smallest angle between two right ascensions, in degrees.
///
/// Handles the 0/360 seam: `circular_difference(359.0, 1.0) == 2.0`.
pub fn circular_difference(a: f64, b: f64) -> f64 {
    (((a - b + 180.0).rem_euclid(360.0)) - 180.0).abs()
}

/// Unit vector for (ra, dec) in degrees.
pub fn unit_vector(ra: f64, dec: f64) -> DVec3 {
    let (sin_ra, cos_ra) = ra.to_radians().sin_cos();
    let (sin_dec, cos_dec) = dec.to_radians().sin_cos();
    DVec3::new(cos_ra * cos_dec, sin_ra * cos_dec, sin_dec)
}

/// (ra, dec) in degrees for a (not necessarily normalised) vector.
/// RA is wrapped into [0, 360).
pub fn ra_dec_of(v: DVec3) -> (f64, f64) {
    let v = v.normalize();
    let dec = v.z.clamp(-1.0, 1.0).asin().to_degrees();
    let ra = if v.x == 0.0 && v.y == 0.0 {
        0.0
    } else {
        v.y.atan2(v.x).to_degrees().rem_euclid(360.0)
    };
    // rem_euclid can round up to exactly 360.0 for tiny negative inputs
    (if ra >= 360.0 { 0.0 } else { ra }, dec)
}

/// Angle between two vectors in degrees.
///
/// atan2 of cross and dot stays accurate for both tiny and near-antipodal separations.
pub fn vector_separation(a: DVec3, b: DVec3) -> f64 {
    a.cross(b).length().atan2(a.dot(b)).to_degrees()
}

/// Great circle distance in degrees between two (ra, dec) positions in degrees.
pub fn angular_separation(ra1: f64, dec1: f64, ra2: f64, dec2: f64) -> f64 {
    // haversine
    let d_dec = (dec2 - dec1).to_radians();
    let d_ra = (ra2 - ra1).to_radians();
    let h = (d_dec / 2.0).sin().powi(2)
        + dec1.to_radians().cos() * dec2.to_radians().cos() * (d_ra / 2.0).sin().powi(2);
    2.0 * h.sqrt().min(1.0).asin().to_degrees()
}

/// Gnomonic projection of (ra, dec) onto the plane tangent at (ra0, dec0).
///
/// Returns standard coordinates (xi, eta) in degrees, xi increasing towards east,
/// or `None` when the point lies on the far hemisphere.
pub fn project(ra: f64, dec: f64, ra0: f64, dec0: f64) -> Option<(f64, f64)> {
    let d_ra = (ra - ra0).to_radians();
    let (sin_dec, cos_dec) = dec.to_radians().sin_cos();
    let (sin_dec0, cos_dec0) = dec0.to_radians().sin_cos();
    let cos_c = sin_dec0 * sin_dec + cos_dec0 * cos_dec * d_ra.cos();
    if cos_c <= 1e-9 {
        return None;
    }
    let xi = cos_dec * d_ra.sin() / cos_c;
    let eta = (cos_dec0 * sin_dec - sin_dec0 * cos_dec * d_ra.cos()) / cos_c;
    Some((xi.to_degrees(), eta.to_degrees()))
}

/// Inverse of [project]: standard coordinates in degrees back to (ra, dec) in degrees.
pub fn deproject(xi: f64, eta: f64, ra0: f64, dec0: f64) -> (f64, f64) {
    let xi = xi.to_radians();
    let eta = eta.to_radians();
    let (sin_dec0, cos_dec0) = dec0.to_radians().sin_cos();
    let denom = cos_dec0 - eta * sin_dec0;
    let ra = ra0.to_radians() + xi.atan2(denom);
    let dec = (sin_dec0 + eta * cos_dec0).atan2((xi * xi + denom * denom).sqrt());
    let ra = ra.to_degrees().rem_euclid(360.0);
    (if ra >= 360.0 { 0.0 } else { ra }, dec.to_degrees())
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_circular_difference_seam() {
        assert_relative_eq!(circular_difference(359.0, 1.0), 2.0, epsilon = 1e-12);
        assert_relative_eq!(circular_difference(1.0, 359.0), 2.0, epsilon = 1e-12);
        assert_relative_eq!(circular_difference(10.0, 350.0), 20.0, epsilon = 1e-12);
        assert_relative_eq!(circular_difference(0.0, 180.0), 180.0, epsilon = 1e-12);
    }

    #[test]
    fn test_separation_agrees() {
        let a = unit_vector(10.0, 20.0);
        let b = unit_vector(12.5, 18.0);
        assert_relative_eq!(
            vector_separation(a, b),
            angular_separation(10.0, 20.0, 12.5, 18.0),
            epsilon = 1e-10
        );
    }

    #[test]
    fn test_ra_dec_round_trip() {
        let (ra, dec) = ra_dec_of(unit_vector(359.5, -45.0));
        assert_relative_eq!(ra, 359.5, epsilon = 1e-10);
        assert_relative_eq!(dec, -45.0, epsilon = 1e-10);
    }

    #[test]
    fn test_projection_inverse() {
        let (xi, eta) = project(101.3, 62.1, 100.0, 61.0).unwrap();
        let (ra, dec) = deproject(xi, eta, 100.0, 61.0);
        assert_relative_eq!(ra, 101.3, epsilon = 1e-10);
        assert_relative_eq!(dec, 62.1, epsilon = 1e-10);
    }

    #[test]
    fn test_projection_far_side() {
        assert!(project(180.0, 0.0, 0.0, 0.0).is_none());
    }

    #[test]
    fn test_projection_across_seam() {
        let (xi, _) = project(0.5, 0.0, 359.5, 0.0).unwrap();
        assert_relative_eq!(xi, 1.0, epsilon = 1e-3);
    }
}
