//! Archival CSV replay.
//!
//! Rows come from an external file loader either positionally or with named
//! columns. The column layout is resolved once per batch into a
//! [`ColumnMap`], after which every row goes through the same index-based
//! parser regardless of its original shape.
//!
//! Bad rows are skipped and counted; a batch is never aborted.

use chrono::{DateTime, Utc};
use log::{info, warn};
use serde_json::Value;

use crate::error::ValidationError;
use crate::geo_utils::validate_coordinates;
use crate::heatmap::HeatmapEngine;
use crate::track::TrackRecorder;
use crate::{Bounds, TrackPoint};

/// Positional layout: index of each field in an unlabelled row.
const POSITIONAL_TIMESTAMP: usize = 0;
const POSITIONAL_DB: usize = 2;
const POSITIONAL_LATITUDE: usize = 3;
const POSITIONAL_LONGITUDE: usize = 4;

/// Accepted column names, current name first, then historical ones.
const LATITUDE_ALIASES: &[&str] = &["latitude", "lat", "Latitude", "LAT", "gps_lat"];
const LONGITUDE_ALIASES: &[&str] = &["longitude", "lon", "lng", "Longitude", "LON", "gps_lon"];
const DB_ALIASES: &[&str] = &["db", "dB", "DB", "level", "level_db", "dba", "dBA", "LAeq"];
const TIMESTAMP_ALIASES: &[&str] = &["timestamp", "time", "datetime", "Timestamp"];

/// A batch of rows handed over by the file loader.
#[derive(Debug, Clone, PartialEq)]
pub enum CsvRows {
    /// Unlabelled rows: 0 = timestamp, 2 = dB, 3 = latitude, 4 = longitude
    Positional(Vec<Vec<String>>),
    /// Rows with a header line
    Keyed {
        headers: Vec<String>,
        records: Vec<Vec<String>>,
    },
}

impl CsvRows {
    /// Build a batch from the loader's JSON rows.
    ///
    /// The first row decides the shape: an object makes the batch keyed
    /// (headers are the union of all keys, row by row, each object's keys in
    /// sorted `serde_json::Map` order), anything else makes it positional.
    /// Rows of the other shape become empty records and are skipped on
    /// import.
    pub fn from_json_rows(rows: &[Value]) -> Self {
        match rows.first() {
            Some(Value::Object(_)) => {
                let mut headers: Vec<String> = Vec::new();
                for row in rows {
                    if let Value::Object(map) = row {
                        for key in map.keys() {
                            if !headers.iter().any(|h| h == key) {
                                headers.push(key.clone());
                            }
                        }
                    }
                }
                let records = rows
                    .iter()
                    .map(|row| match row {
                        Value::Object(map) => headers
                            .iter()
                            .map(|h| map.get(h).map(value_to_field).unwrap_or_default())
                            .collect(),
                        _ => Vec::new(),
                    })
                    .collect();
                CsvRows::Keyed { headers, records }
            }
            _ => CsvRows::Positional(
                rows.iter()
                    .map(|row| match row {
                        Value::Array(cells) => cells.iter().map(value_to_field).collect(),
                        _ => Vec::new(),
                    })
                    .collect(),
            ),
        }
    }

    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records().is_empty()
    }

    fn records(&self) -> &[Vec<String>] {
        match self {
            CsvRows::Positional(records) => records,
            CsvRows::Keyed { records, .. } => records,
        }
    }

    /// Resolve where each field lives, once for the whole batch.
    fn column_map(&self) -> Option<ColumnMap> {
        match self {
            CsvRows::Positional(_) => Some(ColumnMap {
                timestamp: Some(POSITIONAL_TIMESTAMP),
                db: POSITIONAL_DB,
                latitude: POSITIONAL_LATITUDE,
                longitude: POSITIONAL_LONGITUDE,
            }),
            CsvRows::Keyed { headers, .. } => Some(ColumnMap {
                timestamp: find_column(headers, TIMESTAMP_ALIASES),
                db: find_column(headers, DB_ALIASES)?,
                latitude: find_column(headers, LATITUDE_ALIASES)?,
                longitude: find_column(headers, LONGITUDE_ALIASES)?,
            }),
        }
    }
}

fn value_to_field(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    }
}

fn find_column(headers: &[String], aliases: &[&str]) -> Option<usize> {
    aliases
        .iter()
        .find_map(|alias| headers.iter().position(|h| h.trim() == *alias))
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct ColumnMap {
    timestamp: Option<usize>,
    db: usize,
    latitude: usize,
    longitude: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct ParsedRow {
    latitude: f64,
    longitude: f64,
    db: f64,
    timestamp: Option<DateTime<Utc>>,
}

impl ColumnMap {
    fn parse(&self, record: &[String]) -> Result<ParsedRow, ValidationError> {
        let latitude = parse_number(record, self.latitude, "latitude")?;
        let longitude = parse_number(record, self.longitude, "longitude")?;
        validate_coordinates(latitude, longitude)?;

        let db = parse_number(record, self.db, "dB")?;
        if !db.is_finite() {
            return Err(ValidationError::InvalidLevel {
                value: db.to_string(),
            });
        }

        let timestamp = self
            .timestamp
            .and_then(|idx| record.get(idx))
            .and_then(|s| DateTime::parse_from_rfc3339(s.trim()).ok())
            .map(|dt| dt.with_timezone(&Utc));

        Ok(ParsedRow {
            latitude,
            longitude,
            db,
            timestamp,
        })
    }
}

fn parse_number(record: &[String], idx: usize, field: &'static str) -> Result<f64, ValidationError> {
    let raw = record.get(idx).map(|s| s.trim()).unwrap_or_default();
    raw.parse::<f64>().map_err(|_| ValidationError::Unparsable {
        field,
        value: raw.to_string(),
    })
}

/// Outcome of one import.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportReport {
    pub processed_count: usize,
    pub skipped_count: usize,
    /// Bounding box to fit the view to, when the track is non-empty
    pub track_bounds: Option<Bounds>,
    pub track_start: Option<TrackPoint>,
    pub track_end: Option<TrackPoint>,
    /// Measurements added to the heatmap
    pub heatmap_added: usize,
    /// Heatmap gained data while hidden and should be shown
    pub reveal_heatmap: bool,
}

/// Replays archival rows into the track recorder and heatmap.
#[derive(Debug, Clone, Default)]
pub struct CsvImportAdapter {
    total_processed: usize,
    total_skipped: usize,
}

impl CsvImportAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Import one batch.
    ///
    /// Valid rows replace the track wholesale (in their original order) and
    /// are appended to the heatmap. A batch without a single valid row leaves
    /// the existing track alone. Rows without a parsable timestamp are
    /// stamped with `imported_at`.
    pub fn import(
        &mut self,
        rows: &CsvRows,
        recorder: &mut TrackRecorder,
        heatmap: &mut HeatmapEngine,
        heatmap_visible: bool,
        imported_at: DateTime<Utc>,
    ) -> ImportReport {
        let records = rows.records();
        let heatmap_before = heatmap.len();
        let mut points = Vec::with_capacity(records.len());
        let mut skipped = 0;

        match rows.column_map() {
            Some(columns) => {
                for (line, record) in records.iter().enumerate() {
                    let row = match columns.parse(record) {
                        Ok(row) => row,
                        Err(e) => {
                            skipped += 1;
                            warn!("[CsvImport] Skipping row {}: {}", line + 1, e);
                            continue;
                        }
                    };

                    let timestamp = row.timestamp.unwrap_or(imported_at);
                    if heatmap
                        .add_measurement_at(row.latitude, row.longitude, row.db, timestamp)
                        .is_err()
                    {
                        skipped += 1;
                        continue;
                    }
                    points.push(TrackPoint::new(row.latitude, row.longitude));
                }
            }
            None => {
                warn!(
                    "[CsvImport] No latitude/longitude/dB columns found, skipping {} rows",
                    records.len()
                );
                skipped = records.len();
            }
        }

        let processed = points.len();
        if processed > 0 {
            recorder.replace(points);
        }

        let heatmap_added = heatmap.len() - heatmap_before;
        let report = ImportReport {
            processed_count: processed,
            skipped_count: skipped,
            track_bounds: if processed > 0 { recorder.bounds() } else { None },
            track_start: if processed > 0 { recorder.start() } else { None },
            track_end: if processed > 0 { recorder.end() } else { None },
            heatmap_added,
            reveal_heatmap: heatmap_added > 0 && !heatmap_visible,
        };

        self.total_processed += processed;
        self.total_skipped += skipped;
        info!(
            "[CsvImport] Imported {} rows, skipped {}",
            report.processed_count, report.skipped_count
        );
        report
    }

    /// Rows processed over every import so far.
    pub fn total_processed(&self) -> usize {
        self.total_processed
    }

    /// Rows skipped over every import so far.
    pub fn total_skipped(&self) -> usize {
        self.total_skipped
    }
}
