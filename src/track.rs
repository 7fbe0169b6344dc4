//! Track recording.
//!
//! The recorder owns the track: the ordered points, the cumulative Haversine
//! distance and the maximum speed observed. Toggling recording never touches
//! points already collected.

use serde::Serialize;

use crate::geo_utils::{compute_bounds, haversine_distance, polyline_length};
use crate::{Bounds, TrackPoint};

/// An ordered path with derived statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Track {
    pub points: Vec<TrackPoint>,
    /// Cumulative distance in meters
    pub total_distance: f64,
    /// Maximum speed in km/h
    pub max_speed: f64,
}

#[derive(Debug, Clone, Default)]
pub struct TrackRecorder {
    track: Track,
    recording: bool,
}

impl TrackRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a point while recording.
    ///
    /// Returns the appended point, or `None` when recording is off. The first
    /// point and an exact repeat of the previous point add no distance.
    pub fn add_point(&mut self, point: TrackPoint) -> Option<TrackPoint> {
        if !self.recording {
            return None;
        }

        if let Some(last) = self.track.points.last() {
            self.track.total_distance += haversine_distance(last, &point);
        }
        self.track.points.push(point);
        Some(point)
    }

    /// Record an instantaneous speed sample in km/h. Ignored while recording
    /// is off, like points.
    pub fn record_speed(&mut self, speed_kmh: f64) {
        if self.recording && speed_kmh.is_finite() && speed_kmh > self.track.max_speed {
            self.track.max_speed = speed_kmh;
        }
    }

    /// Replace the whole track, e.g. from an archival import.
    ///
    /// The recording flag is unchanged.
    pub fn replace(&mut self, points: Vec<TrackPoint>) {
        self.track.total_distance = polyline_length(&points);
        self.track.points = points;
        self.track.max_speed = 0.0;
    }

    /// Empty the track and zero its statistics.
    pub fn clear(&mut self) {
        self.track = Track::default();
    }

    /// Flip the recording flag. Returns the new state.
    pub fn toggle(&mut self) -> bool {
        self.recording = !self.recording;
        self.recording
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    pub fn track(&self) -> &Track {
        &self.track
    }

    pub fn points(&self) -> &[TrackPoint] {
        &self.track.points
    }

    pub fn point_count(&self) -> usize {
        self.track.points.len()
    }

    pub fn total_distance(&self) -> f64 {
        self.track.total_distance
    }

    pub fn max_speed(&self) -> f64 {
        self.track.max_speed
    }

    pub fn start(&self) -> Option<TrackPoint> {
        self.track.points.first().copied()
    }

    pub fn end(&self) -> Option<TrackPoint> {
        self.track.points.last().copied()
    }

    pub fn bounds(&self) -> Option<Bounds> {
        compute_bounds(&self.track.points)
    }
}
