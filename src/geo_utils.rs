//! Geographic utilities: great-circle distance, path length, bounds and
//! coordinate validation.

use geo::{BoundingRect, Coord, Distance, Haversine, LineString, Point};

use crate::error::ValidationError;
use crate::{Bounds, TrackPoint};

/// Great-circle distance between two points in meters, on geo's mean-radius
/// sphere.
///
/// # Example
/// ```
/// use noisemap::TrackPoint;
/// use noisemap::geo_utils::haversine_distance;
///
/// let a = TrackPoint::new(52.5200, 13.4050);
/// let b = TrackPoint::new(52.5201, 13.4051);
/// let d = haversine_distance(&a, &b);
/// assert!(d > 12.0 && d < 14.0);
/// ```
pub fn haversine_distance(p1: &TrackPoint, p2: &TrackPoint) -> f64 {
    Haversine::distance(to_point(p1), to_point(p2))
}

fn to_point(p: &TrackPoint) -> Point<f64> {
    Point::new(p.longitude, p.latitude)
}

/// Total length of a path in meters.
pub fn polyline_length(points: &[TrackPoint]) -> f64 {
    points
        .windows(2)
        .map(|w| haversine_distance(&w[0], &w[1]))
        .sum()
}

/// Bounding box of a set of points, `None` when empty.
pub fn compute_bounds(points: &[TrackPoint]) -> Option<Bounds> {
    let line: LineString<f64> = points
        .iter()
        .map(|p| Coord {
            x: p.longitude,
            y: p.latitude,
        })
        .collect();

    line.bounding_rect().map(|rect| Bounds {
        min_lat: rect.min().y,
        max_lat: rect.max().y,
        min_lng: rect.min().x,
        max_lng: rect.max().x,
    })
}

/// Reject NaN/infinite or out-of-range coordinates.
pub fn validate_coordinates(latitude: f64, longitude: f64) -> Result<(), ValidationError> {
    let valid = latitude.is_finite()
        && longitude.is_finite()
        && (-90.0..=90.0).contains(&latitude)
        && (-180.0..=180.0).contains(&longitude);

    if valid {
        Ok(())
    } else {
        Err(ValidationError::CoordinatesOutOfRange {
            latitude,
            longitude,
        })
    }
}
