//! Tokio-task timer backend.

use nestate_core::{CoreError, Event, TimerBackend, TimerFire, TimerHandle, TimerMode};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Timer backend that runs each armed timer as a tokio task.
///
/// Expiry tokens are sent over the channel handed to [`TokioTimers::new`];
/// whoever owns the machine receives them and forwards each one to
/// `Machine::deliver_timer`. Stopping a timer aborts its task, so nothing
/// new is produced after `stop` returns; a token already sitting in the
/// channel is rejected by the machine's generation check.
pub struct TokioTimers {
    tx: mpsc::Sender<TimerFire>,
    tasks: HashMap<u64, JoinHandle<()>>,
    next_id: u64,
    epoch: Instant,
}

impl TokioTimers {
    /// Creates a backend sending expiry tokens into `tx`.
    ///
    /// `start` spawns onto the runtime current at the time of the call, so
    /// the machine must be driven from inside a tokio runtime.
    pub fn new(tx: mpsc::Sender<TimerFire>) -> Self {
        Self {
            tx,
            tasks: HashMap::new(),
            next_id: 0,
            epoch: Instant::now(),
        }
    }

    /// Creates a backend together with a fire channel of the given capacity.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<TimerFire>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }

    /// Number of timer tasks started and not yet stopped.
    pub fn active(&self) -> usize {
        self.tasks.len()
    }
}

impl TimerBackend for TokioTimers {
    fn start(
        &mut self,
        event: Event,
        generation: u64,
        period: Duration,
        mode: TimerMode,
    ) -> Result<TimerHandle, CoreError> {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                return Err(CoreError::TimerBackendFailed {
                    reason: "no tokio runtime on this thread".to_string(),
                })
            }
        };

        let tx = self.tx.clone();
        let fire = TimerFire { event, generation };
        let task = runtime.spawn(async move {
            match mode {
                TimerMode::OneShot => {
                    tokio::time::sleep(period).await;
                    let _ = tx.send(fire).await;
                }
                TimerMode::Periodic => loop {
                    tokio::time::sleep(period).await;
                    if tx.send(fire).await.is_err() {
                        break;
                    }
                },
            }
        });

        self.next_id += 1;
        self.tasks.insert(self.next_id, task);
        tracing::trace!(
            "timer task {} started: {:?} every {:?} ({:?})",
            self.next_id,
            event,
            period,
            mode
        );
        Ok(TimerHandle(self.next_id))
    }

    fn stop(&mut self, handle: TimerHandle) {
        if let Some(task) = self.tasks.remove(&handle.0) {
            task.abort();
            tracing::trace!("timer task {} stopped", handle.0);
        }
    }

    fn now(&self) -> Duration {
        self.epoch.elapsed()
    }
}

impl Drop for TokioTimers {
    fn drop(&mut self) {
        for (_, task) in self.tasks.drain() {
            task.abort();
        }
    }
}
