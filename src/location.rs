//! Live fix ingestion.
//!
//! Every valid fix updates the current location immediately. The heavier
//! statistics pass (Haversine distance to the previously processed fix,
//! instantaneous and maximum speed) is debounced: within one interval only
//! the last fix is processed.

use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::debounce::Debouncer;
use crate::error::ValidationError;
use crate::geo_utils::{haversine_distance, validate_coordinates};
use crate::TrackPoint;

/// GPS fix type reported by the receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FixType {
    #[serde(rename = "2D")]
    TwoD,
    #[serde(rename = "3D")]
    ThreeD,
    /// No fix, or any type string the receiver invents
    #[default]
    #[serde(other)]
    NoFix,
}

/// One inbound GPS reading.
///
/// Deserializes from the transport's event shape:
/// `{latitude, longitude, altitude?, satellites?, fix, timestamp}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixEvent {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub altitude: Option<f64>,
    #[serde(default)]
    pub satellites: Option<u32>,
    #[serde(default)]
    pub fix: FixType,
    pub timestamp: DateTime<Utc>,
}

impl FixEvent {
    pub fn new(latitude: f64, longitude: f64, fix: FixType, timestamp: DateTime<Utc>) -> Self {
        Self {
            latitude,
            longitude,
            altitude: None,
            satellites: None,
            fix,
            timestamp,
        }
    }

    pub fn with_satellites(mut self, satellites: u32) -> Self {
        self.satellites = Some(satellites);
        self
    }

    pub fn point(&self) -> TrackPoint {
        TrackPoint::new(self.latitude, self.longitude)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_coordinates(self.latitude, self.longitude)
    }

    /// A 2D/3D fix, or enough satellites in view.
    pub fn is_adequate(&self, min_satellites: u32) -> bool {
        matches!(self.fix, FixType::TwoD | FixType::ThreeD)
            || self.satellites.is_some_and(|n| n >= min_satellites)
    }
}

/// Result of one statistics pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeedSample {
    /// Distance to the previously processed fix in meters
    pub distance_m: f64,
    /// Time since the previously processed fix in seconds
    pub elapsed_s: f64,
    /// Instantaneous speed in km/h
    pub speed_kmh: f64,
}

/// Consumer of the live fix stream.
#[derive(Debug, Clone)]
pub struct LocationStream {
    current_location: Option<TrackPoint>,
    /// Last fix that went through the statistics pass
    previous: Option<FixEvent>,
    stats: Debouncer<FixEvent>,
    current_speed: f64,
    accepted: u64,
    dropped: u64,
}

impl LocationStream {
    pub fn new(stats_debounce: Duration) -> Self {
        Self {
            current_location: None,
            previous: None,
            stats: Debouncer::new(stats_debounce),
            current_speed: 0.0,
            accepted: 0,
            dropped: 0,
        }
    }

    /// Ingest a fix.
    ///
    /// Out-of-range fixes are rejected and leave all state untouched. A valid
    /// fix becomes the current location right away and is queued for the
    /// debounced statistics pass.
    pub fn consume(
        &mut self,
        fix: &FixEvent,
        now: DateTime<Utc>,
    ) -> Result<TrackPoint, ValidationError> {
        if let Err(e) = fix.validate() {
            self.dropped += 1;
            warn!("[Location] Dropping fix: {}", e);
            return Err(e);
        }

        let point = fix.point();
        self.current_location = Some(point);
        self.accepted += 1;
        self.stats.schedule(fix.clone(), now);
        Ok(point)
    }

    /// Run the statistics pass if the debounce interval has elapsed.
    pub fn poll_stats(&mut self, now: DateTime<Utc>) -> Option<SpeedSample> {
        let fix = self.stats.take_due(now)?;
        self.process(fix)
    }

    /// Run any pending statistics pass immediately.
    pub fn flush_stats(&mut self) -> Option<SpeedSample> {
        let fix = self.stats.flush()?;
        self.process(fix)
    }

    fn process(&mut self, fix: FixEvent) -> Option<SpeedSample> {
        let previous = self.previous.replace(fix.clone())?;

        let distance_m = haversine_distance(&previous.point(), &fix.point());
        let elapsed_s = (fix.timestamp - previous.timestamp).num_milliseconds() as f64 / 1000.0;
        if elapsed_s <= 0.0 {
            debug!(
                "[Location] Skipping speed update, non-increasing timestamp ({:.3}s)",
                elapsed_s
            );
            return None;
        }

        let speed_kmh = distance_m / elapsed_s * 3.6;
        if !speed_kmh.is_finite() {
            return None;
        }

        self.current_speed = speed_kmh;

        Some(SpeedSample {
            distance_m,
            elapsed_s,
            speed_kmh,
        })
    }

    /// Discard queued statistics work and the speed history.
    ///
    /// The current location stays, it is only ever replaced by a newer fix.
    pub fn reset_statistics(&mut self) {
        self.stats.invalidate();
        self.previous = None;
        self.current_speed = 0.0;
    }

    pub fn current_location(&self) -> Option<TrackPoint> {
        self.current_location
    }

    /// Last instantaneous speed in km/h.
    pub fn current_speed(&self) -> f64 {
        self.current_speed
    }

    pub fn has_pending_stats(&self) -> bool {
        self.stats.has_pending()
    }

    /// Number of fixes accepted.
    pub fn accepted_count(&self) -> u64 {
        self.accepted
    }

    /// Number of fixes rejected by validation.
    pub fn dropped_count(&self) -> u64 {
        self.dropped
    }
}
