//! A self-rescheduling, non-reentrant periodic timer.
//!
//! Modeled as an explicit state machine driven by a dedicated worker thread per timer, per the
//! redesign guidance: the source's `InfiniteTimer` spawned its own successor from inside its
//! own callback, which this crate deliberately avoids.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::error;

use crate::error::TimerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerState {
    Idle,
    Armed,
    Firing,
    Cancelled,
}

struct Shared {
    state: Mutex<TimerState>,
    condvar: Condvar,
}

/// Fires `target` every `period`, never overlapping a firing with itself.
pub struct PeriodicTimer {
    period: Duration,
    shared: Arc<Shared>,
    handle: Mutex<Option<JoinHandle<()>>>,
    target: Mutex<Option<Box<dyn FnMut() + Send>>>,
}

impl PeriodicTimer {
    pub fn new(period: Duration, target: impl FnMut() + Send + 'static) -> Self {
        Self {
            period,
            shared: Arc::new(Shared {
                state: Mutex::new(TimerState::Idle),
                condvar: Condvar::new(),
            }),
            handle: Mutex::new(None),
            target: Mutex::new(Some(Box::new(target))),
        }
    }

    /// Arms the first firing after `period`. Idempotent if already armed.
    pub fn start(&self) -> Result<(), TimerError> {
        let mut state = self.shared.state.lock().unwrap();
        match *state {
            TimerState::Armed => return Ok(()),
            TimerState::Firing => return Err(TimerError::AlreadyFiring),
            TimerState::Cancelled => return Err(TimerError::Cancelled),
            TimerState::Idle => {}
        }
        *state = TimerState::Armed;
        drop(state);

        let mut target = self
            .target
            .lock()
            .unwrap()
            .take()
            .expect("target is only taken once, by the single worker thread");
        let shared = Arc::clone(&self.shared);
        let period = self.period;

        let worker = std::thread::spawn(move || {
            loop {
                let mut state = shared.state.lock().unwrap();
                let (guard, timeout_result) =
                    shared.condvar.wait_timeout_while(state, period, |s| *s == TimerState::Armed).unwrap();
                state = guard;
                if *state == TimerState::Cancelled {
                    return;
                }
                if timeout_result.timed_out() {
                    *state = TimerState::Firing;
                    drop(state);

                    if let Err(panic) = catch_unwind(AssertUnwindSafe(|| target())) {
                        let message = panic
                            .downcast_ref::<&str>()
                            .copied()
                            .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
                            .unwrap_or("non-string panic payload");
                        error!(panic = %message, "periodic timer target panicked");
                    }

                    let mut state = shared.state.lock().unwrap();
                    if *state == TimerState::Firing {
                        *state = TimerState::Armed;
                    }
                    drop(state);
                    shared.condvar.notify_all();
                }
            }
        });

        *self.handle.lock().unwrap() = Some(worker);
        Ok(())
    }

    /// Requests no further firings. Lets an in-flight firing complete, then blocks until the
    /// worker thread has exited, so `cancel()` happens-before any later observation.
    pub fn cancel(&self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            if *state == TimerState::Idle {
                *state = TimerState::Cancelled;
                return;
            }
            *state = TimerState::Cancelled;
        }
        self.shared.condvar.notify_all();

        if let Some(handle) = self.handle.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn fires_at_the_configured_cadence() {
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);
        let timer = PeriodicTimer::new(Duration::from_millis(20), move || {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });
        timer.start().unwrap();
        std::thread::sleep(Duration::from_millis(110));
        timer.cancel();
        let fired = count.load(Ordering::SeqCst);
        assert!(fired >= 3, "expected several firings, got {fired}");
    }

    #[test]
    fn start_is_idempotent_while_armed() {
        let timer = PeriodicTimer::new(Duration::from_secs(60), || {});
        timer.start().unwrap();
        assert!(timer.start().is_ok());
        timer.cancel();
    }

    #[test]
    fn cancel_before_first_firing_prevents_it() {
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = Arc::clone(&fired);
        let timer = PeriodicTimer::new(Duration::from_millis(50), move || {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        });
        timer.start().unwrap();
        timer.cancel();
        std::thread::sleep(Duration::from_millis(80));
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn no_catch_up_after_a_slow_firing() {
        let timestamps = Arc::new(Mutex::new(Vec::new()));
        let timestamps_clone = Arc::clone(&timestamps);
        let timer = PeriodicTimer::new(Duration::from_millis(30), move || {
            timestamps_clone.lock().unwrap().push(std::time::Instant::now());
            std::thread::sleep(Duration::from_millis(60));
        });
        timer.start().unwrap();
        std::thread::sleep(Duration::from_millis(170));
        timer.cancel();

        let stamps = timestamps.lock().unwrap();
        assert!(stamps.len() >= 2, "expected at least two firings, got {}", stamps.len());
        for pair in stamps.windows(2) {
            let gap = pair[1].duration_since(pair[0]);
            assert!(gap >= Duration::from_millis(85), "firings piled up: gap was {gap:?}");
        }
    }
}
