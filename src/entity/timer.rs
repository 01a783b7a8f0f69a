//! Cancellable one-shot task used for reply slots, and a long-lived
//! watchdog used for silence detection.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::{RadioLinkError, Result};

/// A single pending deferred task
///
/// Scheduling replaces (cancels) whatever was pending. Every schedule and
/// cancel bumps a generation number; the task receives the generation it was
/// scheduled under and must call [`ScheduledTask::complete`] with it while
/// holding the owner's lock. `complete` returns `false` for a task that was
/// cancelled or replaced after its timer already expired, so such a task
/// never acts.
#[derive(Debug, Default)]
pub struct ScheduledTask {
    handle: Option<JoinHandle<()>>,
    generation: u64,
}

impl ScheduledTask {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` once `delay` has elapsed from now, cancelling any pending
    /// task first
    ///
    /// # Errors
    ///
    /// Returns `Timer` if called outside a tokio runtime
    pub fn schedule<F>(&mut self, delay: Duration, task: F) -> Result<()>
    where
        F: FnOnce(u64) + Send + 'static,
    {
        self.cancel();

        let runtime = Handle::try_current()
            .map_err(|e| RadioLinkError::Timer(format!("No runtime to schedule on: {}", e)))?;

        // Deadline is fixed here, not when the spawned task is first polled
        let deadline = Instant::now() + delay;
        let generation = self.generation;
        self.handle = Some(runtime.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            task(generation);
        }));

        Ok(())
    }

    /// Cancel the pending task, if any
    ///
    /// Returns `true` if a task was pending.
    pub fn cancel(&mut self) -> bool {
        self.generation = self.generation.wrapping_add(1);
        match self.handle.take() {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Claim the right to act for a fired task
    ///
    /// Returns `false` if `generation` is stale.
    pub fn complete(&mut self, generation: u64) -> bool {
        if generation != self.generation || self.handle.is_none() {
            return false;
        }
        // The task is running this very call, so just detach it
        self.handle = None;
        true
    }

    /// Whether a task is scheduled and has not yet acted
    pub fn is_pending(&self) -> bool {
        self.handle.is_some()
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Re-armable deadline served by a single background task
///
/// [`Watchdog::feed`] only moves the deadline forward; the task started by
/// [`Watchdog::start`] sleeps until the current deadline and then calls
/// `on_expire`. The callback must take the owner's lock and call
/// [`Watchdog::expire`], which returns `true` only if no feed moved the
/// deadline in the meantime. `on_expire` returns `false` to end the task.
#[derive(Debug, Default)]
pub struct Watchdog {
    shared: Arc<WatchdogShared>,
    handle: Option<JoinHandle<()>>,
}

#[derive(Debug, Default)]
struct WatchdogShared {
    deadline: Mutex<Option<Instant>>,
    rearm: Notify,
}

impl WatchdogShared {
    fn lock_deadline(&self) -> MutexGuard<'_, Option<Instant>> {
        self.deadline.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Watchdog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn the watchdog task; does nothing if it is already running
    ///
    /// # Errors
    ///
    /// Returns `Timer` if called outside a tokio runtime
    pub fn start<F>(&mut self, on_expire: F) -> Result<()>
    where
        F: FnMut() -> bool + Send + 'static,
    {
        if self.is_running() {
            return Ok(());
        }

        let runtime = Handle::try_current()
            .map_err(|e| RadioLinkError::Timer(format!("No runtime to start watchdog on: {}", e)))?;
        self.handle = Some(runtime.spawn(watch(self.shared.clone(), on_expire)));
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Push the deadline to `timeout` from now
    pub fn feed(&self, timeout: Duration) {
        let next = Instant::now() + timeout;
        let mut deadline = self.shared.lock_deadline();
        let wake = deadline.map_or(true, |current| next < current);
        *deadline = Some(next);
        drop(deadline);

        // The task only needs waking if it would otherwise sleep past `next`
        if wake {
            self.shared.rearm.notify_one();
        }
    }

    /// Claim an expiry reported to `on_expire`
    ///
    /// Returns `false` if the deadline was fed past now, or was never set.
    pub fn expire(&self) -> bool {
        let mut deadline = self.shared.lock_deadline();
        match *deadline {
            Some(at) if at <= Instant::now() => {
                *deadline = None;
                true
            }
            _ => false,
        }
    }

    /// Current deadline, if armed
    pub fn deadline(&self) -> Option<Instant> {
        *self.shared.lock_deadline()
    }

    /// End the task and disarm
    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
        *self.shared.lock_deadline() = None;
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn watch<F>(shared: Arc<WatchdogShared>, mut on_expire: F)
where
    F: FnMut() -> bool,
{
    let sleep = tokio::time::sleep_until(Instant::now());
    tokio::pin!(sleep);

    loop {
        let deadline = *shared.lock_deadline();
        match deadline {
            Some(deadline) => {
                sleep.as_mut().reset(deadline);
                tokio::select! {
                    () = &mut sleep => {
                        if !on_expire() {
                            return;
                        }
                    }
                    () = shared.rearm.notified() => {}
                }
            }
            None => shared.rearm.notified().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    async fn settle() {
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_fires_after_delay() {
        let fired = Arc::new(Mutex::new(Vec::new()));
        let task = Arc::new(Mutex::new(ScheduledTask::new()));

        let (fired_cb, task_cb) = (fired.clone(), task.clone());
        task.lock()
            .unwrap()
            .schedule(Duration::from_millis(10), move |generation| {
                if task_cb.lock().unwrap().complete(generation) {
                    fired_cb.lock().unwrap().push(generation);
                }
            })
            .unwrap();
        assert!(task.lock().unwrap().is_pending());

        tokio::time::advance(Duration::from_millis(9)).await;
        settle().await;
        assert!(fired.lock().unwrap().is_empty());

        tokio::time::advance(Duration::from_millis(1)).await;
        settle().await;
        assert_eq!(fired.lock().unwrap().len(), 1);
        assert!(!task.lock().unwrap().is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_firing() {
        let fired = Arc::new(Mutex::new(false));
        let mut task = ScheduledTask::new();

        let fired_cb = fired.clone();
        task.schedule(Duration::from_millis(5), move |_| {
            *fired_cb.lock().unwrap() = true;
        })
        .unwrap();

        assert!(task.cancel());
        assert!(!task.cancel());

        tokio::time::advance(Duration::from_millis(20)).await;
        settle().await;
        assert!(!*fired.lock().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reschedule_replaces_pending() {
        let fired = Arc::new(Mutex::new(Vec::new()));
        let mut task = ScheduledTask::new();

        for label in ["first", "second"] {
            let fired_cb = fired.clone();
            task.schedule(Duration::from_millis(5), move |_| {
                fired_cb.lock().unwrap().push(label);
            })
            .unwrap();
        }

        tokio::time::advance(Duration::from_millis(10)).await;
        settle().await;
        assert_eq!(*fired.lock().unwrap(), vec!["second"]);
    }

    #[test]
    fn test_stale_generation_rejected() {
        let mut task = ScheduledTask::new();
        task.generation = 4;
        task.handle = None;
        assert!(!task.complete(4));
        assert!(!task.complete(3));
    }

    /// Watchdog whose expiries are counted the way an owner would claim them
    fn counting_watchdog() -> (Arc<Mutex<Watchdog>>, Arc<Mutex<u32>>) {
        let watchdog = Arc::new(Mutex::new(Watchdog::new()));
        let expired = Arc::new(Mutex::new(0));

        let (watchdog_cb, expired_cb) = (Arc::downgrade(&watchdog), expired.clone());
        watchdog
            .lock()
            .unwrap()
            .start(move || match watchdog_cb.upgrade() {
                Some(watchdog) => {
                    if watchdog.lock().unwrap().expire() {
                        *expired_cb.lock().unwrap() += 1;
                    }
                    true
                }
                None => false,
            })
            .unwrap();

        (watchdog, expired)
    }

    #[tokio::test(start_paused = true)]
    async fn test_watchdog_fires_once_after_last_feed() {
        let (watchdog, expired) = counting_watchdog();
        let timeout = Duration::from_millis(250);

        for _ in 0..10 {
            watchdog.lock().unwrap().feed(timeout);
            tokio::time::advance(Duration::from_millis(100)).await;
            settle().await;
        }
        assert_eq!(*expired.lock().unwrap(), 0);

        tokio::time::advance(Duration::from_millis(150)).await;
        settle().await;
        assert_eq!(*expired.lock().unwrap(), 1);
        assert!(watchdog.lock().unwrap().deadline().is_none());

        tokio::time::advance(Duration::from_secs(5)).await;
        settle().await;
        assert_eq!(*expired.lock().unwrap(), 1);
        assert!(watchdog.lock().unwrap().is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_watchdog_start_keeps_existing_task() {
        let (watchdog, expired) = counting_watchdog();

        // A second start must not replace the running task
        let replaced = Arc::new(Mutex::new(false));
        let replaced_cb = replaced.clone();
        watchdog
            .lock()
            .unwrap()
            .start(move || {
                *replaced_cb.lock().unwrap() = true;
                false
            })
            .unwrap();

        watchdog.lock().unwrap().feed(Duration::from_millis(10));
        tokio::time::advance(Duration::from_millis(10)).await;
        settle().await;

        assert_eq!(*expired.lock().unwrap(), 1);
        assert!(!*replaced.lock().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_watchdog_rearms_after_expiry() {
        let (watchdog, expired) = counting_watchdog();

        for round in 1..=3 {
            watchdog.lock().unwrap().feed(Duration::from_millis(20));
            tokio::time::advance(Duration::from_millis(20)).await;
            settle().await;
            assert_eq!(*expired.lock().unwrap(), round);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_watchdog_stop_disarms() {
        let (watchdog, expired) = counting_watchdog();

        watchdog.lock().unwrap().feed(Duration::from_millis(20));
        watchdog.lock().unwrap().stop();
        assert!(!watchdog.lock().unwrap().is_running());
        assert!(watchdog.lock().unwrap().deadline().is_none());

        tokio::time::advance(Duration::from_millis(50)).await;
        settle().await;
        assert_eq!(*expired.lock().unwrap(), 0);
    }

    #[test]
    fn test_watchdog_start_outside_runtime_fails() {
        let mut watchdog = Watchdog::new();
        let result = watchdog.start(|| true);
        assert!(matches!(result, Err(RadioLinkError::Timer(_))));
        assert!(!watchdog.is_running());
    }

    #[test]
    fn test_schedule_outside_runtime_fails() {
        let mut task = ScheduledTask::new();
        let result = task.schedule(Duration::from_millis(1), |_| {});
        assert!(matches!(result, Err(RadioLinkError::Timer(_))));
        assert!(!task.is_pending());
    }
}
