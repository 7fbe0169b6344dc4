//! Trailing debouncer with a generation token.
//!
//! Work scheduled within one interval is coalesced into a single pending
//! value that comes due when the interval elapses. Nothing runs on its own:
//! the owner polls [`Debouncer::take_due`] from its event handlers or a tick.
//!
//! [`Debouncer::invalidate`] bumps the generation. A value scheduled under an
//! older generation is discarded when it comes due instead of being handed
//! back, so a clear racing with pending work cannot resurrect stale data.

use std::time::Duration;

use chrono::{DateTime, Utc};
use log::debug;

#[derive(Debug, Clone)]
struct Pending<T> {
    value: T,
    deadline: DateTime<Utc>,
    generation: u64,
}

/// Coalesces bursts of work into at most one deferred value per interval.
#[derive(Debug, Clone)]
pub struct Debouncer<T> {
    interval: chrono::Duration,
    pending: Option<Pending<T>>,
    generation: u64,
}

impl<T> Debouncer<T> {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval: chrono::Duration::from_std(interval).unwrap_or(chrono::Duration::MAX),
            pending: None,
            generation: 0,
        }
    }

    /// Current generation token.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Invalidate any pending work. It will be dropped when it comes due.
    pub fn invalidate(&mut self) {
        self.generation = self.generation.wrapping_add(1);
    }

    /// Whether live (current-generation) work is waiting.
    pub fn has_pending(&self) -> bool {
        matches!(&self.pending, Some(p) if p.generation == self.generation)
    }

    /// Schedule `value`, replacing any live pending value but keeping its
    /// deadline (last one wins within an interval).
    pub fn schedule(&mut self, value: T, now: DateTime<Utc>) {
        let generation = self.generation;
        let deadline = self.deadline_from(now);
        match self.pending.as_mut() {
            Some(pending) if pending.generation == generation => pending.value = value,
            _ => {
                self.pending = Some(Pending {
                    value,
                    deadline,
                    generation,
                })
            }
        }
    }

    /// Get the live pending value to merge into, creating it with `init` if
    /// nothing is scheduled in the current generation.
    pub fn schedule_with<F>(&mut self, now: DateTime<Utc>, init: F) -> &mut T
    where
        F: FnOnce() -> T,
    {
        let generation = self.generation;
        let deadline = self.deadline_from(now);
        if !self.has_pending() {
            self.pending = None;
        }
        &mut self
            .pending
            .get_or_insert_with(|| Pending {
                value: init(),
                deadline,
                generation,
            })
            .value
    }

    /// Take the pending value once its deadline has passed.
    ///
    /// Stale values from an earlier generation are dropped here.
    pub fn take_due(&mut self, now: DateTime<Utc>) -> Option<T> {
        match &self.pending {
            Some(pending) if pending.deadline <= now => self.take_live(),
            _ => None,
        }
    }

    /// Take the pending value regardless of its deadline.
    pub fn flush(&mut self) -> Option<T> {
        self.take_live()
    }

    fn take_live(&mut self) -> Option<T> {
        let pending = self.pending.take()?;
        if pending.generation != self.generation {
            debug!(
                "[Debounce] Dropping work from generation {} (now {})",
                pending.generation, self.generation
            );
            return None;
        }
        Some(pending.value)
    }

    fn deadline_from(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        // Past the representable range the work simply never comes due
        now.checked_add_signed(self.interval)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}
