//! State-bound timers.
//!
//! A machine holds at most one armed timer, bound to the state that armed
//! it. Every transition leg releases the binding before exit actions run,
//! so no state ever observes a timer it no longer owns. Expiry does not
//! reach the machine directly: the backend produces [`TimerFire`] tokens
//! stamped with the slot generation at arm time, and the owner feeds them
//! to [`Machine::deliver_timer`], which silently drops any token whose
//! stamp has gone stale. That check, not backend synchronization, is what
//! makes a late fire after disarm unobservable.

use crate::error::CoreError;
use crate::event::Event;
use crate::machine::{DispatchOutcome, Machine};
use std::time::Duration;

/// Repeat behavior of an armed timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerMode {
    /// Fire once; delivery releases the slot.
    OneShot,
    /// Fire every period until disarmed. Delivery does not re-arm; the
    /// backend keeps producing fires on its own.
    Periodic,
}

/// Backend-assigned token for one started timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(pub u64);

/// One timer expiry produced by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerFire {
    /// Event bound at arm time.
    pub event: Event,
    /// Slot generation at arm time; stale stamps are dropped on delivery.
    pub generation: u64,
}

/// Timer capability a machine can be built with.
///
/// `start` must produce [`TimerFire`] tokens carrying exactly the event and
/// generation it was given. `stop` must prevent further production for the
/// handle and must tolerate handles that already completed; it does not
/// have to flush tokens already produced, since delivery rejects those by
/// generation.
pub trait TimerBackend: Send {
    /// Starts a timer firing after each `period` (once for
    /// [`TimerMode::OneShot`]).
    fn start(
        &mut self,
        event: Event,
        generation: u64,
        period: Duration,
        mode: TimerMode,
    ) -> Result<TimerHandle, CoreError>;

    /// Stops production for `handle`.
    fn stop(&mut self, handle: TimerHandle);

    /// Monotonic time since the backend was created.
    fn now(&self) -> Duration;
}

#[derive(Debug, Clone, Copy)]
struct Armed {
    handle: TimerHandle,
    event: Event,
    mode: TimerMode,
}

/// Per-machine timer bookkeeping: the backend, the single armed slot, and
/// the generation counter that invalidates in-flight fires.
pub(crate) struct TimerSlot {
    backend: Box<dyn TimerBackend>,
    armed: Option<Armed>,
    generation: u64,
}

impl TimerSlot {
    pub(crate) fn new(backend: Box<dyn TimerBackend>) -> Self {
        Self {
            backend,
            armed: None,
            generation: 0,
        }
    }
}

impl<C> Machine<C> {
    /// Arms the machine's timer slot with `event`, replacing any timer that
    /// is already armed.
    ///
    /// Fails when the machine has no backend, when `event` is the null
    /// event, or when `period` is below one millisecond. A backend that
    /// refuses to start leaves the slot empty and the error is returned
    /// as [`CoreError::TimerBackendFailed`].
    pub fn arm_timer(
        &mut self,
        event: Event,
        period: Duration,
        mode: TimerMode,
    ) -> Result<(), CoreError> {
        if event.is_none() {
            return Err(CoreError::NullTimerEvent);
        }
        if period < Duration::from_millis(1) {
            return Err(CoreError::InvalidTimerPeriod {
                millis: period.as_millis(),
            });
        }
        let slot = match self.timer.as_mut() {
            Some(slot) => slot,
            None => return Err(CoreError::NoTimerBackend),
        };

        // At most one armed timer: replace, never stack.
        if let Some(prev) = slot.armed.take() {
            slot.backend.stop(prev.handle);
        }
        slot.generation += 1;
        let generation = slot.generation;
        let handle = slot.backend.start(event, generation, period, mode)?;
        slot.armed = Some(Armed {
            handle,
            event,
            mode,
        });

        tracing::debug!(
            "{}: timer armed {:?} every {:?} ({:?})",
            self.name(),
            event,
            period,
            mode
        );
        Ok(())
    }

    /// Disarms the timer if one is armed. Safe to call at any time, timer
    /// or no timer, backend or no backend.
    pub fn disarm_timer(&mut self) {
        self.release_timer();
    }

    /// Delivers one expiry token, routing its event through
    /// [`Machine::dispatch`].
    ///
    /// Returns `None` when the token is stale: its generation no longer
    /// matches the slot because the timer was disarmed, replaced, released
    /// by a transition, or the one-shot was already delivered. Stale tokens
    /// have no effect at all.
    pub fn deliver_timer(&mut self, fire: TimerFire) -> Option<DispatchOutcome> {
        let slot = self.timer.as_mut()?;
        let armed = match slot.armed {
            Some(armed) if slot.generation == fire.generation => armed,
            _ => {
                tracing::trace!("{}: stale timer fire dropped: {:?}", self.name(), fire);
                return None;
            }
        };
        if armed.mode == TimerMode::OneShot {
            slot.backend.stop(armed.handle);
            slot.armed = None;
            slot.generation += 1;
        }
        Some(self.dispatch(fire.event, None))
    }

    /// True while a timer is armed.
    pub fn timer_armed(&self) -> bool {
        self.timer
            .as_ref()
            .map(|slot| slot.armed.is_some())
            .unwrap_or(false)
    }

    /// Monotonic time from the backend, or `None` without one.
    pub fn timer_now(&self) -> Option<Duration> {
        self.timer.as_ref().map(|slot| slot.backend.now())
    }

    /// Stops and forgets any armed timer, bumping the generation so fires
    /// already in flight are rejected on delivery. Every transition leg
    /// calls this before its exit phase.
    pub(crate) fn release_timer(&mut self) {
        if let Some(slot) = self.timer.as_mut() {
            if let Some(armed) = slot.armed.take() {
                slot.backend.stop(armed.handle);
                slot.generation += 1;
                tracing::debug!("{}: timer disarmed ({:?})", self.name(), armed.event);
            }
        }
    }
}
