//! Ring (annulus) geographic filter.
//!
//! Each category gets its own `[min, max]` radius band around a center
//! point. A non-zero minimum carves out the near field ("donut" query), used
//! for HF spots whose local activity is already covered by the VHF band.
//!
//! Decision per record:
//! 1. Location present but fails validation → drop, counted as invalid
//! 2. Category has no band → pass through (not geographically constrained)
//! 3. No location → source policy decides (include / exclude)
//! 4. `min ≤ distance ≤ max` (both inclusive) → keep, distance/bearing annotated

use crate::geo::{self, DistanceUnit, GeoError, GeoPoint};
use crate::types::{Category, MissingLocationPolicy, Record, Source};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Inclusive radius band, in the filter's distance unit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RadiusBand {
    #[serde(default)]
    pub min: f64,
    pub max: f64,
}

impl RadiusBand {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Plain disc of radius `max`.
    pub fn within(max: f64) -> Self {
        Self { min: 0.0, max }
    }

    pub fn contains(&self, distance: f64) -> bool {
        self.min <= distance && distance <= self.max
    }

    /// Describe what is wrong with this band, if anything.
    pub fn problem(&self) -> Option<String> {
        if !self.min.is_finite() || !self.max.is_finite() {
            return Some(format!("radii must be finite (min={}, max={})", self.min, self.max));
        }
        if self.min < 0.0 {
            return Some(format!("min radius ({}) must be >= 0", self.min));
        }
        if self.min > self.max {
            return Some(format!(
                "min radius ({}) must be <= max radius ({})",
                self.min, self.max
            ));
        }
        None
    }
}

/// Per-category radius bands plus per-source missing-location overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeoFilterSpec {
    #[serde(default)]
    pub bands: HashMap<Category, RadiusBand>,
    /// Overrides [`Source::missing_location_policy`] for specific sources.
    #[serde(default)]
    pub missing_location: HashMap<Source, MissingLocationPolicy>,
}

impl GeoFilterSpec {
    #[must_use]
    pub fn with_band(mut self, category: Category, band: RadiusBand) -> Self {
        self.bands.insert(category, band);
        self
    }

    #[must_use]
    pub fn with_missing_location(mut self, source: Source, policy: MissingLocationPolicy) -> Self {
        self.missing_location.insert(source, policy);
        self
    }

    pub fn policy_for(&self, source: Source) -> MissingLocationPolicy {
        self.missing_location
            .get(&source)
            .copied()
            .unwrap_or_else(|| source.missing_location_policy())
    }

    /// One message per invalid band.
    pub fn problems(&self) -> Vec<String> {
        let mut out: Vec<String> = self
            .bands
            .iter()
            .filter_map(|(cat, band)| band.problem().map(|p| format!("{cat}: {p}")))
            .collect();
        out.sort();
        out
    }
}

/// Counters from one filter pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RingFilterStats {
    pub kept: usize,
    pub out_of_band: usize,
    pub invalid_coordinate: usize,
    pub missing_location_excluded: usize,
}

/// Apply `spec` around `center`, annotating survivors with distance and bearing.
///
/// Fails only if `center` itself is not a valid coordinate.
pub fn filter(
    records: Vec<Record>,
    center: GeoPoint,
    spec: &GeoFilterSpec,
    unit: DistanceUnit,
) -> Result<(Vec<Record>, RingFilterStats), GeoError> {
    center.validate()?;

    let mut stats = RingFilterStats::default();
    let mut kept = Vec::with_capacity(records.len());

    for mut record in records {
        if let Some(Err(e)) = record.location.map(|l| l.validate()) {
            warn!(
                identity = %record.identity,
                source = %record.source,
                error = %e,
                "Dropping record with invalid coordinate"
            );
            stats.invalid_coordinate += 1;
            continue;
        }

        let Some(band) = spec.bands.get(&record.category) else {
            stats.kept += 1;
            kept.push(record);
            continue;
        };

        let Some(location) = record.location else {
            match spec.policy_for(record.source) {
                MissingLocationPolicy::Include => {
                    stats.kept += 1;
                    kept.push(record);
                }
                MissingLocationPolicy::Exclude => {
                    debug!(
                        identity = %record.identity,
                        source = %record.source,
                        "No location, excluded by source policy"
                    );
                    stats.missing_location_excluded += 1;
                }
            }
            continue;
        };

        let distance = match geo::distance(center, location, unit) {
            Ok(d) => d,
            Err(e) => {
                warn!(
                    identity = %record.identity,
                    source = %record.source,
                    error = %e,
                    "Dropping record with invalid coordinate"
                );
                stats.invalid_coordinate += 1;
                continue;
            }
        };

        if band.contains(distance) {
            record.distance = Some(distance);
            record.bearing = geo::bearing(center, location).ok();
            stats.kept += 1;
            kept.push(record);
        } else {
            stats.out_of_band += 1;
        }
    }

    Ok((kept, stats))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn origin() -> GeoPoint {
        GeoPoint::new(0.0, 0.0).unwrap()
    }

    fn spot_at(id: &str, lon: f64) -> Record {
        Record::new(id, Source::Pota, Category::Hf, Utc::now()).with_location(0.0, lon)
    }

    fn km_to(lon: f64) -> f64 {
        geo::distance_km(origin(), GeoPoint::new(0.0, lon).unwrap()).unwrap()
    }

    #[test]
    fn boundaries_are_inclusive() {
        let min = km_to(1.0);
        let max = km_to(3.0);
        let spec = GeoFilterSpec::default().with_band(Category::Hf, RadiusBand::new(min, max));
        let records = vec![spot_at("min", 1.0), spot_at("max", 3.0)];
        let (kept, stats) = filter(records, origin(), &spec, DistanceUnit::Kilometers).unwrap();
        assert_eq!(kept.len(), 2);
        assert_eq!(stats.kept, 2);
    }

    #[test]
    fn one_unit_outside_either_edge_is_excluded() {
        let min = km_to(1.0);
        let max = km_to(3.0);
        let spec = GeoFilterSpec::default()
            .with_band(Category::Hf, RadiusBand::new(min + 1.0, max - 1.0));
        let records = vec![
            spot_at("inside-min", 1.0),
            spot_at("outside-max", 3.0),
            spot_at("mid", 2.0),
        ];
        let (kept, stats) = filter(records, origin(), &spec, DistanceUnit::Kilometers).unwrap();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].identity, "mid");
        assert_eq!(stats.out_of_band, 2);
    }

    #[test]
    fn donut_excludes_near_field() {
        let spec = GeoFilterSpec::default().with_band(Category::Hf, RadiusBand::new(300.0, 1000.0));
        let records = vec![spot_at("near", 0.5), spot_at("far", 5.0)];
        let (kept, _) = filter(records, origin(), &spec, DistanceUnit::Kilometers).unwrap();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].identity, "far");
    }

    #[test]
    fn annotates_distance_and_bearing() {
        let spec = GeoFilterSpec::default().with_band(Category::Hf, RadiusBand::within(500.0));
        let (kept, _) =
            filter(vec![spot_at("e", 1.0)], origin(), &spec, DistanceUnit::Kilometers).unwrap();
        let d = kept[0].distance.unwrap();
        assert!((d - 111.195).abs() < 0.01);
        assert!((kept[0].bearing.unwrap() - 90.0).abs() < 1e-6);
    }

    #[test]
    fn per_category_bands() {
        let spec = GeoFilterSpec::default()
            .with_band(Category::Hf, RadiusBand::new(0.0, 1000.0))
            .with_band(Category::Vhf, RadiusBand::new(0.0, 50.0));
        let mut vhf = spot_at("vhf", 2.0);
        vhf.category = Category::Vhf;
        let hf = spot_at("hf", 2.0);
        let (kept, _) = filter(vec![vhf, hf], origin(), &spec, DistanceUnit::Kilometers).unwrap();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].identity, "hf");
    }

    #[test]
    fn missing_location_follows_source_policy() {
        let spec = GeoFilterSpec::default()
            .with_band(Category::Alert, RadiusBand::within(50.0))
            .with_band(Category::Hf, RadiusBand::within(50.0));
        let point_alert = Record::new("a1", Source::NwsPoint, Category::Alert, Utc::now());
        let area_alert = Record::new("a2", Source::NwsArea, Category::Alert, Utc::now());
        let spot = Record::new("s1", Source::Sota, Category::Hf, Utc::now());
        let records = vec![point_alert, area_alert, spot];
        let (kept, stats) = filter(records, origin(), &spec, DistanceUnit::Miles).unwrap();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].identity, "a1");
        assert_eq!(stats.missing_location_excluded, 2);
    }

    #[test]
    fn policy_override() {
        let spec = GeoFilterSpec::default()
            .with_band(Category::Hf, RadiusBand::within(50.0))
            .with_missing_location(Source::Sota, MissingLocationPolicy::Include);
        let spot = Record::new("s1", Source::Sota, Category::Hf, Utc::now());
        let (kept, _) = filter(vec![spot], origin(), &spec, DistanceUnit::Miles).unwrap();
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn invalid_coordinate_is_dropped() {
        let spec = GeoFilterSpec::default().with_band(Category::Hf, RadiusBand::within(50_000.0));
        let bad =
            Record::new("bad", Source::Pota, Category::Hf, Utc::now()).with_location(123.0, 0.0);
        let (kept, stats) = filter(vec![bad], origin(), &spec, DistanceUnit::Miles).unwrap();
        assert!(kept.is_empty());
        assert_eq!(stats.invalid_coordinate, 1);
    }

    #[test]
    fn invalid_center_fails() {
        let spec = GeoFilterSpec::default();
        let center = GeoPoint { lat: 91.0, lon: 0.0 };
        assert!(filter(Vec::new(), center, &spec, DistanceUnit::Miles).is_err());
    }

    #[test]
    fn unconstrained_category_passes() {
        let spec = GeoFilterSpec::default().with_band(Category::Hf, RadiusBand::within(1.0));
        let event = Record::new("e", Source::Calendar, Category::Event, Utc::now());
        let (kept, _) = filter(vec![event], origin(), &spec, DistanceUnit::Miles).unwrap();
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn malformed_location_dropped_even_without_a_band() {
        let spec = GeoFilterSpec::default().with_band(Category::Hf, RadiusBand::within(1.0));
        let event = Record::new("e", Source::Calendar, Category::Event, Utc::now())
            .with_location(37.3, 200.0);
        let report = Record::new("wx", Source::Weather, Category::Weather, Utc::now())
            .with_location(f64::NAN, -121.9);
        let fine = Record::new("ok", Source::Weather, Category::Weather, Utc::now())
            .with_location(37.3, -121.9);
        let (kept, stats) =
            filter(vec![event, report, fine], origin(), &spec, DistanceUnit::Miles).unwrap();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].identity, "ok");
        assert_eq!(stats.invalid_coordinate, 2);
        assert_eq!(stats.kept, 1);
    }

    #[test]
    fn band_problems() {
        assert!(RadiusBand::new(10.0, 5.0).problem().is_some());
        assert!(RadiusBand::new(-1.0, 5.0).problem().is_some());
        assert!(RadiusBand::new(f64::NAN, 5.0).problem().is_some());
        assert!(RadiusBand::new(5.0, 5.0).problem().is_none());
        let spec = GeoFilterSpec::default().with_band(Category::Vhf, RadiusBand::new(9.0, 1.0));
        assert_eq!(spec.problems().len(), 1);
    }
}
