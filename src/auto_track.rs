//! Auto-start policy for track recording.
//!
//! While idle, the first adequate fix that arrives during a running acoustic
//! measurement starts recording. The controller only ever starts: leaving a
//! tracking state is a manual action, so an in-progress recording is never
//! truncated behind the operator's back.
//!
//! A manual stop disarms auto-start until the measurement signal drops, so
//! the operator's stop sticks for the rest of the running measurement.

use log::{debug, info};
use serde::Serialize;

use crate::location::FixEvent;
use crate::track::TrackRecorder;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum TrackingState {
    #[default]
    Idle,
    AutoTracking,
    ManualTracking,
}

impl TrackingState {
    pub fn is_tracking(&self) -> bool {
        !matches!(self, TrackingState::Idle)
    }
}

#[derive(Debug, Clone)]
pub struct AutoTrackController {
    state: TrackingState,
    min_satellites: u32,
    auto_starts: u64,
    /// Cleared by a manual stop, set again once no measurement is running
    armed: bool,
}

impl AutoTrackController {
    pub fn new(min_satellites: u32) -> Self {
        Self {
            state: TrackingState::Idle,
            min_satellites,
            auto_starts: 0,
            armed: true,
        }
    }

    pub fn state(&self) -> TrackingState {
        self.state
    }

    /// Number of times recording was started automatically.
    pub fn auto_start_count(&self) -> u64 {
        self.auto_starts
    }

    /// Whether an adequate fix during a measurement would start recording.
    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Evaluate a fix delivered to the session.
    ///
    /// `measurement_running` is `None` when the signal source is unavailable,
    /// which counts as not running. Returns true if recording was started.
    pub fn on_fix(
        &mut self,
        fix: &FixEvent,
        measurement_running: Option<bool>,
        recorder: &mut TrackRecorder,
    ) -> bool {
        if self.state.is_tracking() {
            return false;
        }
        let running = measurement_running.unwrap_or(false);
        if !self.armed {
            if !running {
                debug!("[AutoTrack] Measurement ended, auto-start re-armed");
                self.armed = true;
            }
            return false;
        }
        if !fix.is_adequate(self.min_satellites) || !running {
            return false;
        }

        if recorder.is_recording() {
            // Started behind our back; adopt it instead of toggling it off
            self.state = TrackingState::ManualTracking;
            return false;
        }

        recorder.toggle();
        self.state = TrackingState::AutoTracking;
        self.auto_starts += 1;
        info!(
            "[AutoTrack] Started recording ({:?} fix, {} satellites)",
            fix.fix,
            fix.satellites.unwrap_or(0)
        );
        true
    }

    /// Apply a manual start/stop. Returns the new recording flag.
    pub fn manual_toggle(&mut self, recorder: &mut TrackRecorder) -> bool {
        let recording = recorder.toggle();
        if recording {
            self.state = TrackingState::ManualTracking;
        } else {
            self.state = TrackingState::Idle;
            self.armed = false;
        }
        info!("[AutoTrack] Manual toggle, now {:?}", self.state);
        recording
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::FixType;
    use chrono::DateTime;

    fn fix(kind: FixType, satellites: Option<u32>) -> FixEvent {
        let mut fix = FixEvent::new(
            52.52,
            13.405,
            kind,
            DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
        );
        fix.satellites = satellites;
        fix
    }

    #[test]
    fn test_auto_start_requires_quality_and_signal() {
        let mut controller = AutoTrackController::new(4);
        let mut recorder = TrackRecorder::new();

        assert!(!controller.on_fix(&fix(FixType::NoFix, Some(3)), Some(true), &mut recorder));
        assert!(!controller.on_fix(&fix(FixType::ThreeD, None), Some(false), &mut recorder));
        assert!(!controller.on_fix(&fix(FixType::ThreeD, None), None, &mut recorder));
        assert_eq!(controller.state(), TrackingState::Idle);
        assert!(!recorder.is_recording());

        assert!(controller.on_fix(&fix(FixType::NoFix, Some(4)), Some(true), &mut recorder));
        assert_eq!(controller.state(), TrackingState::AutoTracking);
        assert!(recorder.is_recording());
    }

    #[test]
    fn test_never_toggles_twice_or_stops() {
        let mut controller = AutoTrackController::new(4);
        let mut recorder = TrackRecorder::new();
        controller.on_fix(&fix(FixType::TwoD, None), Some(true), &mut recorder);

        for running in [Some(true), Some(false), None] {
            assert!(!controller.on_fix(&fix(FixType::ThreeD, Some(9)), running, &mut recorder));
            assert!(!controller.on_fix(&fix(FixType::NoFix, None), running, &mut recorder));
        }
        assert_eq!(controller.state(), TrackingState::AutoTracking);
        assert!(recorder.is_recording());
        assert_eq!(controller.auto_start_count(), 1);
    }

    #[test]
    fn test_manual_tracking_skips_checks() {
        let mut controller = AutoTrackController::new(4);
        let mut recorder = TrackRecorder::new();

        assert!(controller.manual_toggle(&mut recorder));
        assert_eq!(controller.state(), TrackingState::ManualTracking);
        assert!(!controller.on_fix(&fix(FixType::ThreeD, None), Some(true), &mut recorder));
        assert!(recorder.is_recording());

        assert!(!controller.manual_toggle(&mut recorder));
        assert_eq!(controller.state(), TrackingState::Idle);
    }

    #[test]
    fn test_manual_stop_holds_until_measurement_ends() {
        let mut controller = AutoTrackController::new(4);
        let mut recorder = TrackRecorder::new();
        assert!(controller.on_fix(&fix(FixType::ThreeD, None), Some(true), &mut recorder));

        assert!(!controller.manual_toggle(&mut recorder));
        assert!(!controller.is_armed());
        for _ in 0..3 {
            assert!(!controller.on_fix(&fix(FixType::ThreeD, Some(9)), Some(true), &mut recorder));
        }
        assert!(!recorder.is_recording());
        assert_eq!(controller.state(), TrackingState::Idle);

        // Measurement over: the next measurement may auto-start again
        assert!(!controller.on_fix(&fix(FixType::ThreeD, None), Some(false), &mut recorder));
        assert!(controller.is_armed());
        assert!(controller.on_fix(&fix(FixType::ThreeD, None), Some(true), &mut recorder));
        assert_eq!(controller.auto_start_count(), 2);
    }

    #[test]
    fn test_unavailable_signal_rearms() {
        let mut controller = AutoTrackController::new(4);
        let mut recorder = TrackRecorder::new();
        controller.manual_toggle(&mut recorder);
        controller.manual_toggle(&mut recorder);

        assert!(!controller.on_fix(&fix(FixType::NoFix, None), None, &mut recorder));
        assert!(controller.is_armed());
    }

    #[test]
    fn test_adopts_recording_started_elsewhere() {
        let mut controller = AutoTrackController::new(4);
        let mut recorder = TrackRecorder::new();
        recorder.toggle();

        assert!(!controller.on_fix(&fix(FixType::ThreeD, None), Some(true), &mut recorder));
        assert!(recorder.is_recording());
        assert_eq!(controller.state(), TrackingState::ManualTracking);
    }
}
