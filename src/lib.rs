//! # Noisemap
//!
//! In-memory engine that turns a live stream of GPS fixes and sound-level
//! (dB) measurements into a renderable geospatial dataset.
//!
//! This library provides:
//! - Fix ingestion with debounced speed statistics
//! - Track recording with cumulative Haversine distance
//! - A heatmap whose intensities stay normalized to the global dB range
//! - Auto-start of track recording while an acoustic measurement runs
//! - Batch reconstruction of the dataset from archival CSV rows
//!
//! ## Features
//!
//! - **`parallel`** - Run large heatmap recomputes with rayon
//!
//! ## Quick Start
//!
//! ```rust
//! use noisemap::HeatmapEngine;
//!
//! let mut heatmap = HeatmapEngine::new();
//! heatmap.add_measurement(52.52, 13.40, 30.0).unwrap();
//! heatmap.add_measurement(52.52, 13.41, 70.0).unwrap();
//!
//! let intensities: Vec<f64> = heatmap.points().iter().map(|p| p.intensity).collect();
//! assert_eq!(intensities, vec![0.0, 1.0]);
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// Unified error handling
pub mod error;
pub use error::{NoiseMapError, Result, ValidationError};

// Session configuration
pub mod config;
pub use config::SessionConfig;

// Geographic utilities (distance, bounds, validation)
pub mod geo_utils;

// Generation-tokened debouncing
pub mod debounce;
pub use debounce::Debouncer;

// Live fix ingestion
pub mod location;
pub use location::{FixEvent, FixType, LocationStream, SpeedSample};

// Track recording
pub mod track;
pub use track::{Track, TrackRecorder};

// Acoustic heatmap
pub mod heatmap;
pub use heatmap::{HeatmapEngine, Insertion};

// Auto-start policy
pub mod auto_track;
pub use auto_track::{AutoTrackController, TrackingState};

// Archival CSV replay
pub mod csv_import;
pub use csv_import::{CsvImportAdapter, CsvRows, ImportReport};

// Session object and collaborator seams
pub mod session;
pub use session::{
    Clock, FixSource, MapSink, MeasurementSignal, NoSignal, NullSink, Session, StatusSnapshot,
    SystemClock,
};

// ============================================================================
// Core Types
// ============================================================================

/// A recorded position on the track.
///
/// # Example
/// ```
/// use noisemap::TrackPoint;
/// let point = TrackPoint::new(52.5200, 13.4050); // Berlin
/// assert!(point.is_valid());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl TrackPoint {
    /// Create a new track point.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Check if the point has valid coordinates.
    pub fn is_valid(&self) -> bool {
        geo_utils::validate_coordinates(self.latitude, self.longitude).is_ok()
    }

    /// `[lat, lon]` pair as handed to the map layer.
    pub fn to_array(&self) -> [f64; 2] {
        [self.latitude, self.longitude]
    }
}

/// Bounding box for a track.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl Bounds {
    /// Create bounds from track points.
    pub fn from_points(points: &[TrackPoint]) -> Option<Self> {
        geo_utils::compute_bounds(points)
    }

    /// Get the center point of the bounds.
    pub fn center(&self) -> TrackPoint {
        TrackPoint::new(
            (self.min_lat + self.max_lat) / 2.0,
            (self.min_lng + self.max_lng) / 2.0,
        )
    }
}

/// One sound-level sample tied to a position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub latitude: f64,
    pub longitude: f64,
    /// Sound level in dB
    pub db: f64,
    pub timestamp: DateTime<Utc>,
}

/// A heatmap point with its intensity normalized to the current dB range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HeatPoint {
    pub latitude: f64,
    pub longitude: f64,
    /// Always within [0, 1]
    pub intensity: f64,
}

impl HeatPoint {
    /// `[lat, lon, intensity]` triple as handed to the map layer.
    pub fn to_array(&self) -> [f64; 3] {
        [self.latitude, self.longitude, self.intensity]
    }
}

/// Observed dB range over all stored measurements.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DbRange {
    pub min: f64,
    pub max: f64,
}

impl DbRange {
    /// Range collapsed onto a single value.
    pub fn point(db: f64) -> Self {
        Self { min: db, max: db }
    }

    pub fn contains(&self, db: f64) -> bool {
        db >= self.min && db <= self.max
    }

    /// Normalized position of `db` within the range.
    ///
    /// A degenerate range maps to 0.5. The result is clamped to [0, 1] and
    /// never NaN.
    pub fn normalize(&self, db: f64) -> f64 {
        // Halved operands keep the span finite for ranges wider than f64::MAX
        let span = self.max / 2.0 - self.min / 2.0;
        if span == 0.0 || !span.is_finite() {
            return 0.5;
        }
        let intensity = (db / 2.0 - self.min / 2.0) / span;
        if intensity.is_nan() {
            0.5
        } else {
            intensity.clamp(0.0, 1.0)
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
