use crate::error::ElevationError;

/// A WGS84 coordinate. Immutable by convention; every constructor validates range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub lat: f64,
    pub lon: f64,
}

impl Point {
    pub fn new(lat: f64, lon: f64) -> Result<Self, ElevationError> {
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
            return Err(ElevationError::InvalidInput {
                reason: format!("lat/lon out of range: ({lat}, {lon})"),
            });
        }
        Ok(Self { lat, lon })
    }

    /// Rounded key used for selector and in-flight-sample cache lookups.
    pub fn rounded_key(&self, decimals: u32) -> (i64, i64) {
        let factor = 10f64.powi(decimals as i32);
        (
            (self.lat * factor).round() as i64,
            (self.lon * factor).round() as i64,
        )
    }

    /// Great-circle interpolation between two points, `t` in `[0, 1]`.
    /// Uses a spherical linear interpolation (slerp) over unit vectors,
    /// which is accurate enough for subdividing a line of elevation
    /// queries (no geodesy precision is claimed beyond that).
    pub fn slerp(&self, other: &Point, t: f64) -> Point {
        let (lat1, lon1) = (self.lat.to_radians(), self.lon.to_radians());
        let (lat2, lon2) = (other.lat.to_radians(), other.lon.to_radians());

        let (x1, y1, z1) = (lat1.cos() * lon1.cos(), lat1.cos() * lon1.sin(), lat1.sin());
        let (x2, y2, z2) = (lat2.cos() * lon2.cos(), lat2.cos() * lon2.sin(), lat2.sin());

        let dot = (x1 * x2 + y1 * y2 + z1 * z2).clamp(-1.0, 1.0);
        let omega = dot.acos();

        let (a, b) = if omega.abs() < 1e-12 {
            (1.0 - t, t)
        } else {
            let sin_omega = omega.sin();
            ((((1.0 - t) * omega).sin()) / sin_omega, ((t * omega).sin()) / sin_omega)
        };

        let x = a * x1 + b * x2;
        let y = a * y1 + b * y2;
        let z = a * z1 + b * z2;

        let lat = z.atan2((x * x + y * y).sqrt());
        let lon = y.atan2(x);

        Point {
            lat: lat.to_degrees(),
            lon: lon.to_degrees(),
        }
    }
}
