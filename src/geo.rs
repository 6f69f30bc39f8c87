//! Great-circle geometry on a spherical Earth.
//!
//! Distances use the haversine formula with a mean Earth radius of 6371 km.
//! Miles are derived from kilometres with a fixed factor so that radii in a
//! config file and distances in a rendered message agree to the digit.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Mean Earth radius (km).
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Kilometres → statute miles.
pub const KM_TO_MILES: f64 = 0.621_371;

#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum GeoError {
    #[error("invalid coordinate: lat={lat}, lon={lon}")]
    InvalidCoordinate { lat: f64, lon: f64 },
}

/// Unit used for radii and rendered distances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceUnit {
    Kilometers,
    #[default]
    Miles,
}

impl DistanceUnit {
    /// Convert a distance expressed in kilometres into this unit.
    pub fn from_km(self, km: f64) -> f64 {
        match self {
            Self::Kilometers => km,
            Self::Miles => km * KM_TO_MILES,
        }
    }

    pub fn suffix(self) -> &'static str {
        match self {
            Self::Kilometers => "km",
            Self::Miles => "mi",
        }
    }
}

/// A validated latitude/longitude pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    /// Build a point, rejecting NaN/infinite values and out-of-range degrees.
    pub fn new(lat: f64, lon: f64) -> Result<Self, GeoError> {
        let point = Self { lat, lon };
        point.validate()?;
        Ok(point)
    }

    /// `|lat| ≤ 90`, `|lon| ≤ 180`, both finite.
    pub fn validate(&self) -> Result<(), GeoError> {
        let ok = self.lat.is_finite()
            && self.lon.is_finite()
            && self.lat.abs() <= 90.0
            && self.lon.abs() <= 180.0;
        if ok {
            Ok(())
        } else {
            Err(GeoError::InvalidCoordinate {
                lat: self.lat,
                lon: self.lon,
            })
        }
    }
}

/// Haversine great-circle distance in kilometres.
pub fn distance_km(a: GeoPoint, b: GeoPoint) -> Result<f64, GeoError> {
    a.validate()?;
    b.validate()?;

    let d_lat = (b.lat - a.lat).to_radians();
    let d_lon = (b.lon - a.lon).to_radians();
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    // Rounding can push h a hair above 1.0 for antipodal points.
    let c = 2.0 * h.sqrt().min(1.0).asin();
    Ok(EARTH_RADIUS_KM * c)
}

/// Great-circle distance expressed in `unit`.
pub fn distance(a: GeoPoint, b: GeoPoint, unit: DistanceUnit) -> Result<f64, GeoError> {
    distance_km(a, b).map(|km| unit.from_km(km))
}

/// Initial bearing from `a` to `b`, degrees clockwise from true north in `[0, 360)`.
pub fn bearing(a: GeoPoint, b: GeoPoint) -> Result<f64, GeoError> {
    a.validate()?;
    b.validate()?;

    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let d_lon = (b.lon - a.lon).to_radians();

    let x = d_lon.sin() * lat2.cos();
    let y = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * d_lon.cos();
    Ok((x.atan2(y).to_degrees() + 360.0) % 360.0)
}

/// Eight-point compass label for a bearing in degrees.
pub fn compass_point(degrees: f64) -> &'static str {
    const POINTS: [&str; 8] = ["N", "NE", "E", "SE", "S", "SW", "W", "NW"];
    let normalized = degrees.rem_euclid(360.0);
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let idx = (normalized / 45.0).round() as usize % 8;
    POINTS[idx]
}

/// Sixteen-point compass label ("NNE") for a wind direction in degrees.
pub fn compass_point_16(degrees: f64) -> &'static str {
    const POINTS: [&str; 16] = [
        "N", "NNE", "NE", "ENE", "E", "ESE", "SE", "SSE", "S", "SSW", "SW", "WSW", "W", "WNW",
        "NW", "NNW",
    ];
    let normalized = degrees.rem_euclid(360.0);
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let idx = (normalized / 22.5).round() as usize % 16;
    POINTS[idx]
}

/// Arithmetic centroid of a polygon ring given as `(lat, lon)` pairs.
///
/// Good enough for county-sized alert polygons; not meaningful across the
/// antimeridian.
pub fn centroid(ring: &[(f64, f64)]) -> Option<GeoPoint> {
    if ring.is_empty() {
        return None;
    }
    #[allow(clippy::cast_precision_loss)]
    let n = ring.len() as f64;
    let lat = ring.iter().map(|(lat, _)| lat).sum::<f64>() / n;
    let lon = ring.iter().map(|(_, lon)| lon).sum::<f64>() / n;
    GeoPoint::new(lat, lon).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pt(lat: f64, lon: f64) -> GeoPoint {
        GeoPoint::new(lat, lon).unwrap()
    }

    #[test]
    fn one_degree_of_longitude_at_equator() {
        let d = distance_km(pt(0.0, 0.0), pt(0.0, 1.0)).unwrap();
        // 2πR/360 = 111.195 km
        assert!((d - 111.195).abs() < 0.01, "got {d}");
    }

    #[test]
    fn miles_conversion() {
        let km = distance_km(pt(0.0, 0.0), pt(0.0, 1.0)).unwrap();
        let mi = distance(pt(0.0, 0.0), pt(0.0, 1.0), DistanceUnit::Miles).unwrap();
        assert!((mi - km * KM_TO_MILES).abs() < 1e-9);
        assert!((mi - 69.09).abs() < 0.05, "got {mi}");
    }

    #[test]
    fn zero_distance_to_self() {
        let sjc = pt(37.3382, -121.8863);
        assert!(distance_km(sjc, sjc).unwrap().abs() < 1e-9);
    }

    #[test]
    fn san_jose_to_san_francisco() {
        let sjc = pt(37.3382, -121.8863);
        let sfo = pt(37.7749, -122.4194);
        let mi = distance(sjc, sfo, DistanceUnit::Miles).unwrap();
        assert!((mi - 42.0).abs() < 1.5, "got {mi}");
    }

    #[test]
    fn rejects_out_of_range_latitude() {
        assert!(matches!(
            GeoPoint::new(90.5, 0.0),
            Err(GeoError::InvalidCoordinate { .. })
        ));
        let bad = GeoPoint { lat: 0.0, lon: 181.0 };
        assert!(distance_km(pt(0.0, 0.0), bad).is_err());
    }

    #[test]
    fn rejects_nan() {
        assert!(GeoPoint::new(f64::NAN, 0.0).is_err());
        assert!(GeoPoint::new(0.0, f64::INFINITY).is_err());
    }

    #[test]
    fn poles_and_antimeridian_are_valid() {
        assert!(GeoPoint::new(90.0, 180.0).is_ok());
        assert!(GeoPoint::new(-90.0, -180.0).is_ok());
    }

    #[test]
    fn bearing_cardinal_directions() {
        let origin = pt(0.0, 0.0);
        assert!((bearing(origin, pt(1.0, 0.0)).unwrap() - 0.0).abs() < 1e-6);
        assert!((bearing(origin, pt(0.0, 1.0)).unwrap() - 90.0).abs() < 1e-6);
        assert!((bearing(origin, pt(-1.0, 0.0)).unwrap() - 180.0).abs() < 1e-6);
        assert!((bearing(origin, pt(0.0, -1.0)).unwrap() - 270.0).abs() < 1e-6);
    }

    #[test]
    fn compass_labels() {
        assert_eq!(compass_point(0.0), "N");
        assert_eq!(compass_point(44.0), "NE");
        assert_eq!(compass_point(180.0), "S");
        assert_eq!(compass_point(350.0), "N");
        assert_eq!(compass_point(-90.0), "W");
        assert_eq!(compass_point_16(22.5), "NNE");
        assert_eq!(compass_point_16(315.0), "NW");
        assert_eq!(compass_point_16(355.0), "N");
    }

    #[test]
    fn centroid_of_square() {
        let ring = [(0.0, 0.0), (0.0, 2.0), (2.0, 2.0), (2.0, 0.0)];
        let c = centroid(&ring).unwrap();
        assert!((c.lat - 1.0).abs() < 1e-9);
        assert!((c.lon - 1.0).abs() < 1e-9);
        assert!(centroid(&[]).is_none());
    }
}
