use crate::error::InputError;
use crate::math::{deproject, project, Degree};

/// A position on the celestial sphere, degrees
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct EquatorialCoords {
    ra: Degree,
    dec: Degree,
}
impl EquatorialCoords {
    /// Validated constructor: ra in [0, 360), dec in [-90, 90]
    pub fn new(ra: f64, dec: f64) -> Result<Self, InputError> {
        if !ra.is_finite() || !(0.0..360.0).contains(&ra) {
            return Err(InputError::RaOutOfRange(ra));
        }
        if !dec.is_finite() || !(-90.0..=90.0).contains(&dec) {
            return Err(InputError::DecOutOfRange(dec));
        }
        Ok(Self {
            ra: Degree::new(ra),
            dec: Degree::new(dec),
        })
    }

    /// Wraps any finite ra into [0, 360). Dec is still validated.
    pub fn wrapped(ra: f64, dec: f64) -> Result<Self, InputError> {
        if !ra.is_finite() {
            return Err(InputError::RaOutOfRange(ra));
        }
        let ra = ra.rem_euclid(360.0);
        Self::new(if ra >= 360.0 { 0.0 } else { ra }, dec)
    }

    pub fn ra(&self) -> f64 {
        self.ra.degrees()
    }

    pub fn dec(&self) -> f64 {
        self.dec.degrees()
    }

    /// Great circle distance to `other` in degrees
    pub fn separation(&self, other: &EquatorialCoords) -> f64 {
        crate::math::angular_separation(self.ra(), self.dec(), other.ra(), other.dec())
    }
}

/// Stores affine transformation from pixel (x, y) to world (ra, dec)
///
/// Pixel offsets from `crpix` are mapped through the CD matrix (`scale_rot`,
/// row major, degrees per pixel) onto the tangent plane at `crval`.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct WorldTransform {
    scale_rot: [f64; 4],
    crpix: [f64; 2],
    crval: EquatorialCoords,
}
impl WorldTransform {
    pub fn new(scale_rot: [f64; 4], crpix: [f64; 2], crval: EquatorialCoords) -> Self {
        Self {
            scale_rot,
            crpix,
            crval,
        }
    }

    /// CD matrix as [CD1_1, CD1_2, CD2_1, CD2_2]
    pub fn cd(&self) -> [f64; 4] {
        self.scale_rot
    }

    pub fn crpix(&self) -> [f64; 2] {
        self.crpix
    }

    pub fn crval(&self) -> EquatorialCoords {
        self.crval
    }

    pub fn determinant(&self) -> f64 {
        let [a, b, c, d] = self.scale_rot;
        a * d - b * c
    }

    pub fn pixel_to_world(&self, coords: (f64, f64)) -> EquatorialCoords {
        let [a, b, c, d] = self.scale_rot;
        let u = coords.0 - self.crpix[0];
        let v = coords.1 - self.crpix[1];
        let xi = a * u + b * v;
        let eta = c * u + d * v;
        let (ra, dec) = deproject(xi, eta, self.crval.ra(), self.crval.dec());
        // deproject always yields ra in [0, 360) and dec in [-90, 90]
        EquatorialCoords {
            ra: Degree::new(ra),
            dec: Degree::new(dec),
        }
    }

    /// `None` when the position lies on the hemisphere facing away from `crval`
    /// or the CD matrix is singular.
    pub fn world_to_pixel(&self, coords: EquatorialCoords) -> Option<(f64, f64)> {
        let det = self.determinant();
        if det == 0.0 || !det.is_finite() {
            return None;
        }
        let (xi, eta) = project(coords.ra(), coords.dec(), self.crval.ra(), self.crval.dec())?;
        let [a, b, c, d] = self.scale_rot;
        let u = (d * xi - b * eta) / det;
        let v = (-c * xi + a * eta) / det;
        Some((u + self.crpix[0], v + self.crpix[1]))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_coords_validation() {
        assert!(EquatorialCoords::new(0.0, 0.0).is_ok());
        assert!(EquatorialCoords::new(359.999, 90.0).is_ok());
        assert_eq!(
            EquatorialCoords::new(360.0, 0.0),
            Err(InputError::RaOutOfRange(360.0))
        );
        assert_eq!(
            EquatorialCoords::new(10.0, -90.5),
            Err(InputError::DecOutOfRange(-90.5))
        );
        assert!(EquatorialCoords::new(f64::NAN, 0.0).is_err());
    }

    #[test]
    fn test_coords_wrapped() {
        let c = EquatorialCoords::wrapped(-10.0, 5.0).unwrap();
        assert_relative_eq!(c.ra(), 350.0);
        let c = EquatorialCoords::wrapped(725.0, 5.0).unwrap();
        assert_relative_eq!(c.ra(), 5.0, epsilon = 1e-12);
    }

    #[test]
    fn test_world_transform_round_trip() {
        let scale = 1.0 / 3600.0;
        let theta = 30f64.to_radians();
        let cd = [
            -scale * theta.cos(),
            scale * theta.sin(),
            scale * theta.sin(),
            scale * theta.cos(),
        ];
        let t = WorldTransform::new(cd, [512.0, 384.0], EquatorialCoords::new(83.8, -5.4).unwrap());

        let world = t.pixel_to_world((100.0, 700.0));
        let (x, y) = t.world_to_pixel(world).unwrap();
        assert_relative_eq!(x, 100.0, epsilon = 1e-6);
        assert_relative_eq!(y, 700.0, epsilon = 1e-6);

        let center = t.pixel_to_world((512.0, 384.0));
        assert_relative_eq!(center.ra(), 83.8, epsilon = 1e-12);
        assert_relative_eq!(center.dec(), -5.4, epsilon = 1e-12);
    }
}
