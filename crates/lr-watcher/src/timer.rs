//! Debounce/throttle primitive.
//!
//! A [`CoalescingTimer`] holds at most one pending firing. Every call either
//! replaces that firing (debounce) or refreshes its payload while keeping the
//! window boundary (throttle). A dedicated worker thread sleeps until the
//! deadline and runs the action outside the state lock.

use std::io;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

type Action = Box<dyn FnOnce() + Send>;

/// Firing waiting for its deadline.
struct Pending {
    deadline: Instant,
    action: Action,
}

#[derive(Default)]
struct TimerState {
    pending: Option<Pending>,
    last_fire: Option<Instant>,
    disposed: bool,
}

struct Inner {
    state: Mutex<TimerState>,
    wake: Condvar,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, TimerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Thread-safe debounce/throttle timer.
///
/// Safe to call from any thread. Calls after [`dispose`](Self::dispose) are
/// ignored; dropping the timer disposes it.
pub struct CoalescingTimer {
    inner: Arc<Inner>,
    worker: Option<JoinHandle<()>>,
}

impl CoalescingTimer {
    /// Create an idle timer and its worker thread.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker thread cannot be spawned.
    pub fn new() -> io::Result<Self> {
        let inner = Arc::new(Inner {
            state: Mutex::new(TimerState::default()),
            wake: Condvar::new(),
        });
        let worker_inner = Arc::clone(&inner);
        let worker = thread::Builder::new()
            .name("lr-coalescing-timer".to_owned())
            .spawn(move || run_worker(&worker_inner))?;

        Ok(Self {
            inner,
            worker: Some(worker),
        })
    }

    /// Fire `action(payload)` once `interval` has passed without another call.
    ///
    /// Cancels whatever firing is pending and schedules this one from now.
    pub fn debounce<P, F>(&self, interval: Duration, payload: P, action: F)
    where
        P: Send + 'static,
        F: FnOnce(P) + Send + 'static,
    {
        let mut state = self.inner.lock();
        if state.disposed {
            return;
        }

        state.pending = Some(Pending {
            deadline: Instant::now() + interval,
            action: Box::new(move || action(payload)),
        });
        self.inner.wake.notify_one();
    }

    /// Fire at most once per `interval`, using the latest call's payload.
    ///
    /// A call while a firing is pending replaces its action and payload but
    /// keeps its deadline. Otherwise the firing lands on the end of the
    /// window opened by the previous firing, or a full interval from now if
    /// that window has already passed.
    pub fn throttle<P, F>(&self, interval: Duration, payload: P, action: F)
    where
        P: Send + 'static,
        F: FnOnce(P) + Send + 'static,
    {
        let mut state = self.inner.lock();
        if state.disposed {
            return;
        }

        let action: Action = Box::new(move || action(payload));
        if let Some(pending) = state.pending.as_mut() {
            pending.action = action;
            return;
        }

        let now = Instant::now();
        let deadline = match state.last_fire {
            Some(window_start) if now.duration_since(window_start) < interval => {
                window_start + interval
            }
            _ => now + interval,
        };
        state.pending = Some(Pending { deadline, action });
        self.inner.wake.notify_one();
    }

    /// Whether a firing is currently scheduled.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.inner.lock().pending.is_some()
    }

    /// Cancel the pending firing and refuse all future calls.
    pub fn dispose(&self) {
        let mut state = self.inner.lock();
        state.disposed = true;
        state.pending = None;
        self.inner.wake.notify_all();
    }
}

impl Drop for CoalescingTimer {
    fn drop(&mut self) {
        self.dispose();
        if let Some(worker) = self.worker.take()
            && worker.thread().id() != thread::current().id()
        {
            let _ = worker.join();
        }
    }
}

/// Worker loop: sleep until the pending deadline, then fire.
fn run_worker(inner: &Inner) {
    let mut state = inner.lock();
    loop {
        if state.disposed {
            return;
        }

        let Some(deadline) = state.pending.as_ref().map(|p| p.deadline) else {
            state = inner.wake.wait(state).unwrap_or_else(PoisonError::into_inner);
            continue;
        };

        let now = Instant::now();
        if deadline > now {
            state = inner
                .wake
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
            continue;
        }

        let Some(pending) = state.pending.take() else {
            continue;
        };
        state.last_fire = Some(now);
        drop(state);

        (pending.action)();

        state = inner.lock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Collects fired payloads.
    fn recorder() -> (Arc<Mutex<Vec<u32>>>, impl Fn() -> Vec<u32>) {
        let fired = Arc::new(Mutex::new(Vec::new()));
        let reader = Arc::clone(&fired);
        (fired, move || reader.lock().unwrap().clone())
    }

    #[test]
    fn test_debounce_fires_once_with_last_payload() {
        let timer = CoalescingTimer::new().unwrap();
        let (fired, read) = recorder();

        for i in 0..10 {
            let fired = Arc::clone(&fired);
            timer.debounce(Duration::from_millis(100), i, move |p| {
                fired.lock().unwrap().push(p);
            });
            thread::sleep(Duration::from_millis(5));
        }

        thread::sleep(Duration::from_millis(250));
        assert_eq!(read(), vec![9]);
        assert!(!timer.is_pending());
    }

    #[test]
    fn test_debounce_waits_for_quiet_period() {
        let timer = CoalescingTimer::new().unwrap();
        let (fired, read) = recorder();

        for i in 0..6 {
            let fired = Arc::clone(&fired);
            timer.debounce(Duration::from_millis(80), i, move |p| {
                fired.lock().unwrap().push(p);
            });
            thread::sleep(Duration::from_millis(40));
        }

        // 240 ms of calls, each resetting the 80 ms window
        assert!(read().is_empty());
        thread::sleep(Duration::from_millis(150));
        assert_eq!(read(), vec![5]);
    }

    #[test]
    fn test_debounce_separate_bursts_fire_separately() {
        let timer = CoalescingTimer::new().unwrap();
        let (fired, read) = recorder();

        for burst in 0..2 {
            for i in 0..3 {
                let fired = Arc::clone(&fired);
                timer.debounce(Duration::from_millis(30), burst * 10 + i, move |p| {
                    fired.lock().unwrap().push(p);
                });
            }
            thread::sleep(Duration::from_millis(100));
        }

        assert_eq!(read(), vec![2, 12]);
    }

    #[test]
    fn test_throttle_at_most_once_per_window() {
        let timer = CoalescingTimer::new().unwrap();
        let (fired, read) = recorder();
        let start = Instant::now();
        let mut i = 0;

        while start.elapsed() < Duration::from_secs(1) {
            let fired = Arc::clone(&fired);
            timer.throttle(Duration::from_millis(100), i, move |p| {
                fired.lock().unwrap().push(p);
            });
            i += 1;
            thread::sleep(Duration::from_millis(10));
        }

        let count_during = read().len();
        assert!(count_during <= 10, "fired {count_during} times in 1s");
        assert!(count_during >= 7, "fired only {count_during} times in 1s");

        // Payloads strictly increase: each firing used the latest call
        let payloads = read();
        assert!(payloads.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_throttle_keeps_deadline_and_replaces_payload() {
        let timer = CoalescingTimer::new().unwrap();
        let (fired, read) = recorder();

        let first = Arc::clone(&fired);
        timer.throttle(Duration::from_millis(100), 1, move |p| {
            first.lock().unwrap().push(p);
        });
        thread::sleep(Duration::from_millis(60));
        let second = Arc::clone(&fired);
        timer.throttle(Duration::from_millis(100), 2, move |p| {
            second.lock().unwrap().push(p);
        });

        // First window ends ~40 ms from here; a reset window would end at 100 ms
        thread::sleep(Duration::from_millis(75));
        assert_eq!(read(), vec![2]);
    }

    #[test]
    fn test_throttle_after_window_uses_full_interval() {
        let timer = CoalescingTimer::new().unwrap();
        let (fired, read) = recorder();

        let first = Arc::clone(&fired);
        timer.throttle(Duration::from_millis(30), 1, move |p| {
            first.lock().unwrap().push(p);
        });
        thread::sleep(Duration::from_millis(120));
        assert_eq!(read(), vec![1]);

        let second = Arc::clone(&fired);
        timer.throttle(Duration::from_millis(30), 2, move |p| {
            second.lock().unwrap().push(p);
        });
        assert!(timer.is_pending());
        thread::sleep(Duration::from_millis(100));
        assert_eq!(read(), vec![1, 2]);
    }

    #[test]
    fn test_concurrent_callers_arm_one_firing() {
        let timer = Arc::new(CoalescingTimer::new().unwrap());
        let count = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let timer = Arc::clone(&timer);
                let count = Arc::clone(&count);
                thread::spawn(move || {
                    for _ in 0..50 {
                        let count = Arc::clone(&count);
                        timer.debounce(Duration::from_millis(50), (), move |()| {
                            count.fetch_add(1, Ordering::SeqCst);
                        });
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        thread::sleep(Duration::from_millis(200));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dispose_cancels_pending_and_ignores_later_calls() {
        let timer = CoalescingTimer::new().unwrap();
        let count = Arc::new(AtomicUsize::new(0));

        let c = Arc::clone(&count);
        timer.debounce(Duration::from_millis(30), (), move |()| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        timer.dispose();

        let c = Arc::clone(&count);
        timer.throttle(Duration::from_millis(10), (), move |()| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        thread::sleep(Duration::from_millis(80));
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(!timer.is_pending());
    }

    #[test]
    fn test_drop_cancels_pending() {
        let count = Arc::new(AtomicUsize::new(0));
        {
            let timer = CoalescingTimer::new().unwrap();
            let c = Arc::clone(&count);
            timer.debounce(Duration::from_millis(30), (), move |()| {
                c.fetch_add(1, Ordering::SeqCst);
            });
        }
        thread::sleep(Duration::from_millis(80));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
