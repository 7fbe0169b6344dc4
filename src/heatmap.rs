//! Acoustic heatmap.
//!
//! Stores dB measurements keyed by position together with a parallel list of
//! heat points whose intensity is the measurement's position within the
//! global [min, max] dB range.
//!
//! ## Insertion
//!
//! - If a new measurement widens the range, every stored intensity is stale,
//!   so the whole heat point list is recomputed (O(n)).
//! - Otherwise a single heat point is appended (O(1)), the common case.
//!
//! The recompute on every widening is deliberate: intensities relative to an
//! outdated range would render wrong colors for the entire map.

use chrono::{DateTime, Utc};
use log::{debug, warn};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::error::ValidationError;
use crate::geo_utils::validate_coordinates;
use crate::{DbRange, HeatPoint, Measurement};

/// How an accepted measurement changed the heat point list.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Insertion {
    /// Range unchanged, one point appended
    Appended(HeatPoint),
    /// Range widened, all points recomputed
    Recomputed,
}

#[derive(Debug, Clone)]
pub struct HeatmapEngine {
    measurements: Vec<Measurement>,
    points: Vec<HeatPoint>,
    /// `None` until the first measurement
    range: Option<DbRange>,
    full_recomputes: u64,
    rejected: u64,
    #[cfg_attr(not(feature = "parallel"), allow(dead_code))]
    parallel_threshold: usize,
}

impl Default for HeatmapEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl HeatmapEngine {
    pub fn new() -> Self {
        Self {
            measurements: Vec::new(),
            points: Vec::new(),
            range: None,
            full_recomputes: 0,
            rejected: 0,
            parallel_threshold: usize::MAX,
        }
    }

    /// Measurement count from which recomputes use rayon (`parallel` feature).
    pub fn with_parallel_threshold(mut self, threshold: usize) -> Self {
        self.parallel_threshold = threshold;
        self
    }

    /// Add a measurement taken now.
    pub fn add_measurement(
        &mut self,
        latitude: f64,
        longitude: f64,
        db: f64,
    ) -> Result<Insertion, ValidationError> {
        self.add_measurement_at(latitude, longitude, db, Utc::now())
    }

    /// Add a measurement with an explicit timestamp.
    ///
    /// Rejected measurements leave the dataset and range untouched.
    pub fn add_measurement_at(
        &mut self,
        latitude: f64,
        longitude: f64,
        db: f64,
        timestamp: DateTime<Utc>,
    ) -> Result<Insertion, ValidationError> {
        if let Err(e) = validate_measurement(latitude, longitude, db) {
            self.rejected += 1;
            warn!("[Heatmap] Dropping measurement: {}", e);
            return Err(e);
        }

        self.measurements.push(Measurement {
            latitude,
            longitude,
            db,
            timestamp,
        });

        let widened = match self.range {
            None => {
                self.range = Some(DbRange::point(db));
                true
            }
            Some(range) if !range.contains(db) => {
                self.range = Some(DbRange {
                    min: range.min.min(db),
                    max: range.max.max(db),
                });
                true
            }
            Some(_) => false,
        };

        if widened {
            self.recompute_all();
            return Ok(Insertion::Recomputed);
        }

        let range = self.range.unwrap_or(DbRange::point(db));
        let point = HeatPoint {
            latitude,
            longitude,
            intensity: range.normalize(db),
        };
        self.points.push(point);
        Ok(Insertion::Appended(point))
    }

    /// Recompute every intensity against the current range.
    pub fn recompute_all(&mut self) {
        self.full_recomputes += 1;
        let Some(range) = self.range else {
            self.points.clear();
            return;
        };

        debug!(
            "[Heatmap] Recomputing {} points for range [{:.1}, {:.1}] dB",
            self.measurements.len(),
            range.min,
            range.max
        );

        #[cfg(feature = "parallel")]
        {
            if self.measurements.len() >= self.parallel_threshold {
                self.points = self
                    .measurements
                    .par_iter()
                    .map(|m| heat_point(m, &range))
                    .collect();
                return;
            }
        }

        self.points = self
            .measurements
            .iter()
            .map(|m| heat_point(m, &range))
            .collect();
    }

    /// Drop every measurement and unset the range.
    pub fn clear(&mut self) {
        self.measurements.clear();
        self.points.clear();
        self.range = None;
    }

    pub fn measurements(&self) -> &[Measurement] {
        &self.measurements
    }

    pub fn points(&self) -> &[HeatPoint] {
        &self.points
    }

    pub fn range(&self) -> Option<DbRange> {
        self.range
    }

    pub fn min_db(&self) -> Option<f64> {
        self.range.map(|r| r.min)
    }

    pub fn max_db(&self) -> Option<f64> {
        self.range.map(|r| r.max)
    }

    pub fn len(&self) -> usize {
        self.measurements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.measurements.is_empty()
    }

    /// Number of full recomputes so far.
    pub fn full_recompute_count(&self) -> u64 {
        self.full_recomputes
    }

    /// Number of measurements rejected by validation.
    pub fn rejected_count(&self) -> u64 {
        self.rejected
    }
}

fn validate_measurement(latitude: f64, longitude: f64, db: f64) -> Result<(), ValidationError> {
    validate_coordinates(latitude, longitude)?;
    if !db.is_finite() {
        return Err(ValidationError::InvalidLevel {
            value: db.to_string(),
        });
    }
    Ok(())
}

#[inline]
fn heat_point(m: &Measurement, range: &DbRange) -> HeatPoint {
    HeatPoint {
        latitude: m.latitude,
        longitude: m.longitude,
        intensity: range.normalize(m.db),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn intensities(engine: &HeatmapEngine) -> Vec<f64> {
        engine.points().iter().map(|p| p.intensity).collect()
    }

    #[test]
    fn test_two_measurements_span_range() {
        let mut engine = HeatmapEngine::new();
        engine.add_measurement(52.52, 13.40, 30.0).unwrap();
        engine.add_measurement(52.52, 13.41, 70.0).unwrap();

        assert_eq!(engine.min_db(), Some(30.0));
        assert_eq!(engine.max_db(), Some(70.0));
        engine.recompute_all();
        assert_eq!(intensities(&engine), vec![0.0, 1.0]);
    }

    #[test]
    fn test_inner_value_appends_without_recompute() {
        let mut engine = HeatmapEngine::new();
        engine.add_measurement(52.52, 13.40, 30.0).unwrap();
        engine.add_measurement(52.52, 13.41, 70.0).unwrap();
        let recomputes = engine.full_recompute_count();

        let insertion = engine.add_measurement(52.53, 13.42, 50.0).unwrap();
        match insertion {
            Insertion::Appended(p) => assert_eq!(p.intensity, 0.5),
            Insertion::Recomputed => panic!("range did not change"),
        }
        assert_eq!(engine.full_recompute_count(), recomputes);
        assert_eq!(engine.points().len(), 3);
    }

    #[test]
    fn test_new_extreme_recomputes_earlier_points() {
        let mut engine = HeatmapEngine::new();
        engine.add_measurement(52.52, 13.40, 40.0).unwrap();
        engine.add_measurement(52.52, 13.41, 60.0).unwrap();
        engine.add_measurement(52.52, 13.42, 50.0).unwrap();
        assert_eq!(intensities(&engine), vec![0.0, 1.0, 0.5]);

        let insertion = engine.add_measurement(52.52, 13.43, 80.0).unwrap();
        assert_eq!(insertion, Insertion::Recomputed);
        assert_eq!(intensities(&engine), vec![0.0, 0.5, 0.25, 1.0]);
    }

    #[test]
    fn test_all_equal_maps_to_mid_intensity() {
        let mut engine = HeatmapEngine::new();
        for i in 0..5 {
            engine.add_measurement(52.52, 13.40 + i as f64 * 0.001, 55.0).unwrap();
        }
        engine.recompute_all();
        assert!(intensities(&engine).iter().all(|&i| i == 0.5));
    }

    #[test]
    fn test_intensities_stay_in_unit_interval() {
        let mut engine = HeatmapEngine::new();
        let levels = [45.0, 12.5, 99.9, 12.5, 63.0, -10.0, 140.0, 77.7, 0.0];
        for (i, db) in levels.iter().enumerate() {
            engine.add_measurement(10.0, i as f64, *db).unwrap();
            assert_eq!(engine.points().len(), engine.len());
        }
        engine.recompute_all();
        for i in intensities(&engine) {
            assert!(i.is_finite() && (0.0..=1.0).contains(&i));
        }
        let range = engine.range().unwrap();
        assert!(engine.measurements().iter().all(|m| range.contains(m.db)));
    }

    #[test]
    fn test_invalid_measurement_rejected() {
        let mut engine = HeatmapEngine::new();
        engine.add_measurement(52.52, 13.40, 30.0).unwrap();

        assert!(engine.add_measurement(91.0, 13.40, 10.0).is_err());
        assert!(matches!(
            engine.add_measurement(52.52, 13.40, f64::NAN),
            Err(ValidationError::InvalidLevel { .. })
        ));

        assert_eq!(engine.len(), 1);
        assert_eq!(engine.min_db(), Some(30.0));
        assert_eq!(engine.rejected_count(), 2);
    }

    #[test]
    fn test_clear_unsets_range() {
        let mut engine = HeatmapEngine::new();
        engine.add_measurement(52.52, 13.40, 0.0).unwrap();
        engine.clear();

        assert!(engine.is_empty());
        assert!(engine.points().is_empty());
        assert_eq!(engine.range(), None);

        // A zero reading after clear must still establish a fresh range
        engine.add_measurement(52.52, 13.40, 20.0).unwrap();
        assert_eq!(engine.range(), Some(DbRange::point(20.0)));
    }

    #[test]
    fn test_first_measurement_is_mid_intensity() {
        let mut engine = HeatmapEngine::new();
        assert_eq!(
            engine.add_measurement(52.52, 13.40, 65.0).unwrap(),
            Insertion::Recomputed
        );
        assert_eq!(intensities(&engine), vec![0.5]);
    }
}
