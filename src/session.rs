//! # Session
//!
//! One tracking session: owns the track, the heatmap and the auto-start
//! policy, and talks to the outside world only through injected
//! collaborators.
//!
//! ## Collaborators
//!
//! - [`FixSource`] - pull-based GPS fix transport (optional, fixes may also be
//!   pushed with [`Session::handle_fix`])
//! - [`MeasurementSignal`] - whether an acoustic measurement is running
//! - [`MapSink`] - the rendering layer receiving track and heatmap data
//! - [`Clock`] - time source driving the debounced work
//!
//! Everything runs synchronously inside the handler for the inbound event.
//! Deferred work (speed statistics, incremental heatmap pushes) is picked up
//! by later handlers or by [`Session::tick`].

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde::Serialize;

use crate::auto_track::{AutoTrackController, TrackingState};
use crate::config::SessionConfig;
use crate::csv_import::{CsvImportAdapter, CsvRows, ImportReport};
use crate::debounce::Debouncer;
use crate::error::{NoiseMapError, Result};
use crate::heatmap::{HeatmapEngine, Insertion};
use crate::location::{FixEvent, LocationStream};
use crate::track::TrackRecorder;
use crate::{Bounds, DbRange, HeatPoint, TrackPoint};

// ============================================================================
// Collaborators
// ============================================================================

/// Time source.
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

impl<F> Clock for F
where
    F: Fn() -> DateTime<Utc>,
{
    fn now(&self) -> DateTime<Utc> {
        self()
    }
}

/// Pull-based fix transport.
pub trait FixSource {
    /// Next available fix, `None` when nothing is waiting. An `Err` means the
    /// transport failed and will deliver nothing more.
    fn next_fix(&mut self) -> Option<Result<FixEvent>>;
}

impl<I> FixSource for I
where
    I: Iterator<Item = Result<FixEvent>>,
{
    fn next_fix(&mut self) -> Option<Result<FixEvent>> {
        self.next()
    }
}

/// "Acoustic measurement running" signal.
pub trait MeasurementSignal {
    /// `None` when the signal source is unavailable.
    fn is_running(&self) -> Option<bool>;
}

impl<F> MeasurementSignal for F
where
    F: Fn() -> Option<bool>,
{
    fn is_running(&self) -> Option<bool> {
        self()
    }
}

/// Signal source for sessions without an acoustic subsystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSignal;

impl MeasurementSignal for NoSignal {
    fn is_running(&self) -> Option<bool> {
        None
    }
}

/// Rendering layer.
///
/// Track points arrive as `[lat, lon]`, heat points as
/// `[lat, lon, intensity]`. Any method may fail; the session then calls
/// [`MapSink::rebuild`] and feeds the full dataset again.
pub trait MapSink {
    fn replace_track(&mut self, points: &[[f64; 2]]) -> Result<()>;
    fn append_track_point(&mut self, point: [f64; 2]) -> Result<()>;
    fn replace_heatmap(&mut self, points: &[[f64; 3]]) -> Result<()>;
    fn append_heatmap_points(&mut self, points: &[[f64; 3]]) -> Result<()>;
    fn set_heatmap_visible(&mut self, visible: bool) -> Result<()>;

    /// Tear down and recreate the layers after a failure.
    fn rebuild(&mut self) -> Result<()>;

    fn set_current_location(&mut self, _point: TrackPoint) -> Result<()> {
        Ok(())
    }

    fn fit_bounds(&mut self, _bounds: &Bounds) -> Result<()> {
        Ok(())
    }

    fn mark_endpoints(&mut self, _start: TrackPoint, _end: TrackPoint) -> Result<()> {
        Ok(())
    }
}

/// Sink that renders nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl MapSink for NullSink {
    fn replace_track(&mut self, _points: &[[f64; 2]]) -> Result<()> {
        Ok(())
    }

    fn append_track_point(&mut self, _point: [f64; 2]) -> Result<()> {
        Ok(())
    }

    fn replace_heatmap(&mut self, _points: &[[f64; 3]]) -> Result<()> {
        Ok(())
    }

    fn append_heatmap_points(&mut self, _points: &[[f64; 3]]) -> Result<()> {
        Ok(())
    }

    fn set_heatmap_visible(&mut self, _visible: bool) -> Result<()> {
        Ok(())
    }

    fn rebuild(&mut self) -> Result<()> {
        Ok(())
    }
}

// ============================================================================
// Status
// ============================================================================

/// Snapshot for the UI layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub connected: bool,
    pub tracking: bool,
    pub tracking_state: TrackingState,
    pub current_location: Option<TrackPoint>,
    pub track_point_count: usize,
    /// Meters
    pub total_distance: f64,
    /// km/h
    pub max_speed: f64,
    pub heatmap_visible: bool,
    pub heatmap_point_count: usize,
    pub db_range: Option<DbRange>,
    pub fixes_accepted: u64,
    pub fixes_dropped: u64,
    /// CSV rows replayed over every import so far
    pub rows_imported: usize,
    pub rows_skipped: usize,
}

// ============================================================================
// Session
// ============================================================================

pub struct Session {
    config: SessionConfig,
    location: LocationStream,
    recorder: TrackRecorder,
    heatmap: HeatmapEngine,
    auto_track: AutoTrackController,
    importer: CsvImportAdapter,
    /// Heat points appended since the last push to the sink
    render: Debouncer<Vec<HeatPoint>>,
    heatmap_visible: bool,
    connected: bool,
    presentation_rebuilds: u64,

    sink: Box<dyn MapSink>,
    signal: Box<dyn MeasurementSignal>,
    source: Option<Box<dyn FixSource>>,
    clock: Box<dyn Clock>,
}

impl Session {
    /// Create a session rendering into `sink` and reading `signal`.
    pub fn new(
        config: SessionConfig,
        sink: Box<dyn MapSink>,
        signal: Box<dyn MeasurementSignal>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            location: LocationStream::new(config.stats_debounce()),
            recorder: TrackRecorder::new(),
            heatmap: HeatmapEngine::new()
                .with_parallel_threshold(config.parallel_recompute_threshold),
            auto_track: AutoTrackController::new(config.min_satellites),
            importer: CsvImportAdapter::new(),
            render: Debouncer::new(config.render_debounce()),
            heatmap_visible: false,
            connected: false,
            presentation_rebuilds: 0,
            sink,
            signal,
            source: None,
            clock: Box::new(SystemClock),
            config,
        })
    }

    /// Attach a pull-based fix transport.
    pub fn with_fix_source(mut self, source: Box<dyn FixSource>) -> Self {
        self.source = Some(source);
        self.connected = true;
        self
    }

    /// Replace the time source.
    pub fn with_clock(mut self, clock: Box<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    // ========================================================================
    // Inbound Events
    // ========================================================================

    /// Handle one fix.
    ///
    /// The display location updates immediately. Auto-start is evaluated,
    /// then the point is recorded if tracking. Invalid fixes are dropped and
    /// reported as a validation error; the session stays usable.
    pub fn handle_fix(&mut self, fix: FixEvent) -> Result<()> {
        let now = self.clock.now();
        let point = self.location.consume(&fix, now)?;
        self.connected = true;
        self.present(|sink| sink.set_current_location(point));

        let running = self.signal.is_running();
        if self.auto_track.on_fix(&fix, running, &mut self.recorder) {
            info!("[Session] Track recording started automatically");
        }

        if let Some(recorded) = self.recorder.add_point(point) {
            self.present(|sink| sink.append_track_point(recorded.to_array()));
        }

        self.run_due(now);
        Ok(())
    }

    /// Drain every fix currently available from the attached source.
    ///
    /// Returns the number of fixes accepted. A transport failure detaches the
    /// source and marks the session disconnected; collected data stays.
    pub fn pump(&mut self) -> usize {
        let Some(mut source) = self.source.take() else {
            return 0;
        };

        let mut accepted = 0;
        loop {
            match source.next_fix() {
                None => break,
                Some(Ok(fix)) => {
                    if self.handle_fix(fix).is_ok() {
                        accepted += 1;
                    }
                }
                Some(Err(e)) => {
                    self.transport_failed(&e);
                    return accepted;
                }
            }
        }

        self.source = Some(source);
        accepted
    }

    /// Record that the upstream transport failed. No further events are
    /// expected; state stays queryable.
    pub fn transport_failed(&mut self, error: &NoiseMapError) {
        warn!("[Session] Transport failed, freezing state: {}", error);
        self.connected = false;
        self.source = None;
    }

    /// Add one acoustic measurement at the given position.
    pub fn add_measurement(&mut self, latitude: f64, longitude: f64, db: f64) -> Result<Insertion> {
        let now = self.clock.now();
        let insertion = self
            .heatmap
            .add_measurement_at(latitude, longitude, db, now)?;

        match insertion {
            Insertion::Appended(point) => {
                self.render.schedule_with(now, Vec::new).push(point);
            }
            Insertion::Recomputed => {
                // The full replacement already contains any buffered points
                self.render.invalidate();
                self.push_full_heatmap();
            }
        }

        self.run_due(now);
        Ok(insertion)
    }

    /// Run deferred work whose debounce interval has elapsed.
    pub fn tick(&mut self) {
        let now = self.clock.now();
        self.run_due(now);
    }

    fn run_due(&mut self, now: DateTime<Utc>) {
        if let Some(sample) = self.location.poll_stats(now) {
            debug!(
                "[Session] Speed {:.1} km/h over {:.1} m",
                sample.speed_kmh, sample.distance_m
            );
            // Only counts toward the track while recording
            self.recorder.record_speed(sample.speed_kmh);
        }

        if let Some(batch) = self.render.take_due(now) {
            let arrays: Vec<[f64; 3]> = batch.iter().map(HeatPoint::to_array).collect();
            self.present(|sink| sink.append_heatmap_points(&arrays));
        }
    }

    // ========================================================================
    // User Actions
    // ========================================================================

    /// Manually start or stop recording. Returns the new recording flag.
    pub fn toggle_tracking(&mut self) -> bool {
        self.auto_track.manual_toggle(&mut self.recorder)
    }

    /// Empty the track. Pending speed statistics are discarded.
    pub fn clear_track(&mut self) {
        self.recorder.clear();
        self.location.reset_statistics();
        self.present(|sink| sink.replace_track(&[]));
        info!("[Session] Track cleared");
    }

    /// Empty the heatmap. Buffered heat points are discarded.
    pub fn clear_heatmap(&mut self) {
        self.heatmap.clear();
        self.render.invalidate();
        self.present(|sink| sink.replace_heatmap(&[]));
        info!("[Session] Heatmap cleared");
    }

    pub fn set_heatmap_visible(&mut self, visible: bool) {
        self.heatmap_visible = visible;
        self.present(|sink| sink.set_heatmap_visible(visible));
    }

    /// Rebuild the session's dataset from archival rows.
    ///
    /// Runs synchronously; call it from an explicit user action only.
    pub fn import_csv(&mut self, rows: &CsvRows) -> ImportReport {
        let now = self.clock.now();
        let report = self.importer.import(
            rows,
            &mut self.recorder,
            &mut self.heatmap,
            self.heatmap_visible,
            now,
        );

        if report.processed_count > 0 {
            self.push_full_track();
            if let Some(bounds) = report.track_bounds {
                self.present(|sink| sink.fit_bounds(&bounds));
            }
            if let (Some(start), Some(end)) = (report.track_start, report.track_end) {
                self.present(|sink| sink.mark_endpoints(start, end));
            }
        }

        if report.heatmap_added > 0 {
            self.render.invalidate();
            self.push_full_heatmap();
        }

        if report.reveal_heatmap {
            self.set_heatmap_visible(true);
        }

        report
    }

    // ========================================================================
    // Presentation
    // ========================================================================

    fn push_full_track(&mut self) {
        let points: Vec<[f64; 2]> = self.recorder.points().iter().map(TrackPoint::to_array).collect();
        self.present(|sink| sink.replace_track(&points));
    }

    fn push_full_heatmap(&mut self) {
        let points: Vec<[f64; 3]> = self.heatmap.points().iter().map(HeatPoint::to_array).collect();
        self.present(|sink| sink.replace_heatmap(&points));
    }

    /// Run a sink operation, rebuilding the presentation on failure.
    fn present<F>(&mut self, op: F)
    where
        F: FnOnce(&mut dyn MapSink) -> Result<()>,
    {
        if let Err(e) = op(self.sink.as_mut()) {
            warn!("[Session] Map sink rejected update: {}", e);
            self.rebuild_presentation();
        }
    }

    /// Recreate the sink's layers and feed them the full current dataset.
    ///
    /// The underlying track and measurements are never modified here.
    pub fn rebuild_presentation(&mut self) {
        self.presentation_rebuilds += 1;
        // Buffered heat points are part of the full feed below
        self.render.invalidate();

        let track: Vec<[f64; 2]> = self.recorder.points().iter().map(TrackPoint::to_array).collect();
        let heat: Vec<[f64; 3]> = self.heatmap.points().iter().map(HeatPoint::to_array).collect();
        let location = self.location.current_location();
        let visible = self.heatmap_visible;

        match feed_full(self.sink.as_mut(), &track, &heat, visible, location) {
            Ok(()) => info!(
                "[Session] Presentation rebuilt ({} track points, {} heat points)",
                track.len(),
                heat.len()
            ),
            Err(e) => error!("[Session] Presentation rebuild failed: {}", e),
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn status(&self) -> StatusSnapshot {
        StatusSnapshot {
            connected: self.connected,
            tracking: self.recorder.is_recording(),
            tracking_state: self.auto_track.state(),
            current_location: self.location.current_location(),
            track_point_count: self.recorder.point_count(),
            total_distance: self.recorder.total_distance(),
            max_speed: self.recorder.max_speed(),
            heatmap_visible: self.heatmap_visible,
            heatmap_point_count: self.heatmap.points().len(),
            db_range: self.heatmap.range(),
            fixes_accepted: self.location.accepted_count(),
            fixes_dropped: self.location.dropped_count(),
            rows_imported: self.importer.total_processed(),
            rows_skipped: self.importer.total_skipped(),
        }
    }

    /// Status snapshot as JSON (for the UI bridge).
    pub fn status_json(&self) -> String {
        serde_json::to_string(&self.status()).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn recorder(&self) -> &TrackRecorder {
        &self.recorder
    }

    pub fn heatmap(&self) -> &HeatmapEngine {
        &self.heatmap
    }

    pub fn location(&self) -> &LocationStream {
        &self.location
    }

    pub fn tracking_state(&self) -> TrackingState {
        self.auto_track.state()
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn has_pending_render(&self) -> bool {
        self.render.has_pending()
    }

    /// Number of times the presentation was rebuilt after a sink failure.
    pub fn presentation_rebuild_count(&self) -> u64 {
        self.presentation_rebuilds
    }
}

fn feed_full(
    sink: &mut dyn MapSink,
    track: &[[f64; 2]],
    heat: &[[f64; 3]],
    heatmap_visible: bool,
    location: Option<TrackPoint>,
) -> Result<()> {
    sink.rebuild()?;
    sink.replace_track(track)?;
    sink.replace_heatmap(heat)?;
    sink.set_heatmap_visible(heatmap_visible)?;
    if let Some(point) = location {
        sink.set_current_location(point)?;
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::FixType;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    #[derive(Default)]
    struct Recorded {
        track: Vec<[f64; 2]>,
        heat: Vec<[f64; 3]>,
        heat_appends: usize,
        fail_next: bool,
        rebuilds: usize,
    }

    struct FakeSink(Rc<RefCell<Recorded>>);

    impl FakeSink {
        fn check(&self) -> Result<()> {
            let mut state = self.0.borrow_mut();
            if state.fail_next {
                state.fail_next = false;
                return Err(NoiseMapError::presentation("layer gone"));
            }
            Ok(())
        }
    }

    impl MapSink for FakeSink {
        fn replace_track(&mut self, points: &[[f64; 2]]) -> Result<()> {
            self.check()?;
            self.0.borrow_mut().track = points.to_vec();
            Ok(())
        }

        fn append_track_point(&mut self, point: [f64; 2]) -> Result<()> {
            self.check()?;
            self.0.borrow_mut().track.push(point);
            Ok(())
        }

        fn replace_heatmap(&mut self, points: &[[f64; 3]]) -> Result<()> {
            self.check()?;
            self.0.borrow_mut().heat = points.to_vec();
            Ok(())
        }

        fn append_heatmap_points(&mut self, points: &[[f64; 3]]) -> Result<()> {
            self.check()?;
            let mut state = self.0.borrow_mut();
            state.heat.extend_from_slice(points);
            state.heat_appends += 1;
            Ok(())
        }

        fn set_heatmap_visible(&mut self, _visible: bool) -> Result<()> {
            self.check()
        }

        fn rebuild(&mut self) -> Result<()> {
            let mut state = self.0.borrow_mut();
            state.rebuilds += 1;
            state.track.clear();
            state.heat.clear();
            Ok(())
        }
    }

    struct Harness {
        session: Session,
        sink: Rc<RefCell<Recorded>>,
        millis: Rc<Cell<i64>>,
        running: Rc<Cell<bool>>,
    }

    impl Harness {
        fn new(config: SessionConfig) -> Self {
            let sink = Rc::new(RefCell::new(Recorded::default()));
            let millis = Rc::new(Cell::new(0));
            let running = Rc::new(Cell::new(false));

            let clock_millis = millis.clone();
            let signal_running = running.clone();
            let session = Session::new(
                config,
                Box::new(FakeSink(sink.clone())),
                Box::new(move || Some(signal_running.get())),
            )
            .unwrap()
            .with_clock(Box::new(move || {
                DateTime::from_timestamp_millis(1_700_000_000_000 + clock_millis.get()).unwrap()
            }));

            Self {
                session,
                sink,
                millis,
                running,
            }
        }

        fn advance(&self, millis: i64) {
            self.millis.set(self.millis.get() + millis);
        }

        fn fix(&self, lat: f64, lon: f64) -> FixEvent {
            let ts = DateTime::from_timestamp_millis(1_700_000_000_000 + self.millis.get()).unwrap();
            FixEvent::new(lat, lon, FixType::ThreeD, ts)
        }
    }

    #[test]
    fn test_fix_updates_location_without_recording() {
        let mut h = Harness::new(SessionConfig::default());
        h.session.handle_fix(h.fix(52.52, 13.405)).unwrap();

        let status = h.session.status();
        assert_eq!(status.current_location, Some(TrackPoint::new(52.52, 13.405)));
        assert_eq!(status.track_point_count, 0);
        assert!(!status.tracking);
    }

    #[test]
    fn test_auto_start_records_triggering_fix() {
        let mut h = Harness::new(SessionConfig::default());
        h.running.set(true);
        h.session.handle_fix(h.fix(52.52, 13.405)).unwrap();

        assert_eq!(h.session.tracking_state(), TrackingState::AutoTracking);
        assert_eq!(h.session.recorder().point_count(), 1);
        assert_eq!(h.sink.borrow().track, vec![[52.52, 13.405]]);
    }

    #[test]
    fn test_invalid_fix_is_reported_and_dropped() {
        let mut h = Harness::new(SessionConfig::default());
        let err = h.session.handle_fix(h.fix(120.0, 13.405)).unwrap_err();
        assert!(err.is_validation());
        let status = h.session.status();
        assert!(status.current_location.is_none());
        assert_eq!(status.fixes_dropped, 1);
        assert_eq!(status.fixes_accepted, 0);
    }

    #[test]
    fn test_incremental_heat_points_are_debounced() {
        let mut h = Harness::new(SessionConfig::default());
        h.session.add_measurement(52.52, 13.40, 30.0).unwrap();
        h.session.add_measurement(52.52, 13.41, 70.0).unwrap();
        assert_eq!(h.sink.borrow().heat.len(), 2);

        h.session.add_measurement(52.52, 13.42, 50.0).unwrap();
        h.session.add_measurement(52.52, 13.43, 40.0).unwrap();
        assert_eq!(h.sink.borrow().heat.len(), 2);
        assert!(h.session.has_pending_render());

        h.advance(100);
        h.session.tick();
        let sink = h.sink.borrow();
        assert_eq!(sink.heat.len(), 4);
        assert_eq!(sink.heat_appends, 1);
    }

    #[test]
    fn test_clear_heatmap_drops_buffered_points() {
        let mut h = Harness::new(SessionConfig::default());
        h.session.add_measurement(52.52, 13.40, 30.0).unwrap();
        h.session.add_measurement(52.52, 13.41, 70.0).unwrap();
        h.session.add_measurement(52.52, 13.42, 50.0).unwrap();
        assert!(h.session.has_pending_render());

        h.session.clear_heatmap();
        h.advance(1_000);
        h.session.tick();

        assert!(h.session.heatmap().is_empty());
        assert!(h.sink.borrow().heat.is_empty());
        assert_eq!(h.sink.borrow().heat_appends, 0);
        assert_eq!(h.session.status().db_range, None);
    }

    #[test]
    fn test_sink_failure_triggers_full_refeed() {
        let mut h = Harness::new(SessionConfig::default());
        h.session.toggle_tracking();
        h.session.handle_fix(h.fix(52.5200, 13.4050)).unwrap();
        h.session.add_measurement(52.52, 13.40, 30.0).unwrap();

        h.sink.borrow_mut().fail_next = true;
        h.advance(1_000);
        h.session.handle_fix(h.fix(52.5201, 13.4051)).unwrap();

        assert_eq!(h.session.presentation_rebuild_count(), 1);
        let sink = h.sink.borrow();
        assert_eq!(sink.rebuilds, 1);
        assert_eq!(sink.track.len(), 2);
        assert_eq!(sink.heat.len(), 1);
        assert_eq!(h.session.recorder().point_count(), 2);
    }

    #[test]
    fn test_status_json_is_camel_case() {
        let h = Harness::new(SessionConfig::default());
        let json = h.session.status_json();
        assert!(json.contains("\"trackPointCount\":0"));
        assert!(json.contains("\"dbRange\":null"));
        assert!(json.contains("\"heatmapVisible\":false"));
        assert!(json.contains("\"rowsImported\":0"));
    }

    #[test]
    fn test_transport_failure_freezes_state() {
        let fixes: Vec<Result<FixEvent>> = vec![
            Ok(FixEvent::new(
                52.52,
                13.405,
                FixType::ThreeD,
                DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
            )),
            Err(NoiseMapError::transport("socket closed")),
            Ok(FixEvent::new(
                10.0,
                10.0,
                FixType::ThreeD,
                DateTime::from_timestamp(1_700_000_001, 0).unwrap(),
            )),
        ];
        let mut session = Session::new(
            SessionConfig::default(),
            Box::new(NullSink),
            Box::new(NoSignal),
        )
        .unwrap()
        .with_fix_source(Box::new(fixes.into_iter()));

        assert!(session.is_connected());
        assert_eq!(session.pump(), 1);
        assert!(!session.is_connected());
        assert_eq!(session.pump(), 0);
        assert_eq!(
            session.status().current_location,
            Some(TrackPoint::new(52.52, 13.405))
        );
    }

    #[test]
    fn test_rejects_invalid_config() {
        let config = SessionConfig {
            min_satellites: 0,
            ..SessionConfig::default()
        };
        assert!(Session::new(config, Box::new(NullSink), Box::new(NoSignal)).is_err());
    }
}
