//! Deterministic manual-clock timer backend for tests.

use nestate_core::{CoreError, Event, TimerBackend, TimerFire, TimerHandle, TimerMode};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Manual-clock backend with shared handles.
///
/// Time only moves when [`MockTimers::advance`] is called; timers that come
/// due queue their expiry tokens for the test to drain with
/// [`MockTimers::take_fired`] and deliver by hand. Cloning yields another
/// handle to the same clock, so a test keeps one handle while the machine
/// owns a boxed clone.
#[derive(Clone, Default)]
pub struct MockTimers {
    inner: Arc<Mutex<MockInner>>,
}

#[derive(Default)]
struct MockInner {
    armed: Vec<MockTimer>,
    fired: VecDeque<TimerFire>,
    now: Duration,
    next_id: u64,
    fail_starts: bool,
}

struct MockTimer {
    id: u64,
    event: Event,
    generation: u64,
    period: Duration,
    mode: TimerMode,
    due: Duration,
}

impl MockTimers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent `start` fail, for exercising backend-failure
    /// paths.
    pub fn fail_starts(&self, fail: bool) {
        self.inner.lock().unwrap().fail_starts = fail;
    }

    /// Advances the clock by `delta`, queueing a token for every timer that
    /// comes due (in due order). Periodic timers reschedule themselves;
    /// one-shot timers are removed once queued.
    pub fn advance(&self, delta: Duration) {
        let mut inner = self.inner.lock().unwrap();
        inner.now += delta;
        let now = inner.now;
        loop {
            let mut next: Option<usize> = None;
            for (idx, timer) in inner.armed.iter().enumerate() {
                if timer.due <= now {
                    match next {
                        Some(best) if inner.armed[best].due <= timer.due => {}
                        _ => next = Some(idx),
                    }
                }
            }
            let idx = match next {
                Some(idx) => idx,
                None => break,
            };
            let fire = TimerFire {
                event: inner.armed[idx].event,
                generation: inner.armed[idx].generation,
            };
            inner.fired.push_back(fire);
            if inner.armed[idx].mode == TimerMode::Periodic {
                let period = inner.armed[idx].period;
                inner.armed[idx].due += period;
            } else {
                inner.armed.remove(idx);
            }
        }
    }

    /// Drains the tokens queued by [`MockTimers::advance`].
    pub fn take_fired(&self) -> Vec<TimerFire> {
        self.inner.lock().unwrap().fired.drain(..).collect()
    }

    /// Number of timers currently armed in the backend.
    pub fn active(&self) -> usize {
        self.inner.lock().unwrap().armed.len()
    }

    /// Current value of the manual clock.
    pub fn clock(&self) -> Duration {
        self.inner.lock().unwrap().now
    }
}

impl TimerBackend for MockTimers {
    fn start(
        &mut self,
        event: Event,
        generation: u64,
        period: Duration,
        mode: TimerMode,
    ) -> Result<TimerHandle, CoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_starts {
            return Err(CoreError::TimerBackendFailed {
                reason: "mock backend is failing starts".to_string(),
            });
        }
        inner.next_id += 1;
        let id = inner.next_id;
        let due = inner.now + period;
        inner.armed.push(MockTimer {
            id,
            event,
            generation,
            period,
            mode,
            due,
        });
        Ok(TimerHandle(id))
    }

    fn stop(&mut self, handle: TimerHandle) {
        self.inner.lock().unwrap().armed.retain(|timer| timer.id != handle.0);
    }

    fn now(&self) -> Duration {
        self.inner.lock().unwrap().now
    }
}
