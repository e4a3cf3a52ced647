//! Continuous-update scheduling.
//!
//! `UpdateScheduler` is a two-state machine (idle / running) on top of a
//! `PeriodicTimer`. While running it owns exactly one timer handle; the handle
//! is released on `stop`. Each session carries its own running flag, so a
//! tick that is already in flight when the session stops sees the flag cleared
//! and asks the timer to drop it instead of calling back into the caller.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::error::SchedulerError;

/// What a timer should do with a task after running it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickControl {
    Continue,
    Deregister,
}

pub type TimerTask = Box<dyn FnMut() -> TickControl + Send + 'static>;

/// A primitive that runs a task every `every` until cancelled or until the
/// task returns `TickControl::Deregister`.
pub trait PeriodicTimer {
    type Handle;

    /// Fails with `InvalidInterval` for intervals under one millisecond.
    fn schedule(
        &mut self,
        every: Duration,
        task: TimerTask,
    ) -> Result<Self::Handle, SchedulerError>;
    fn cancel(&mut self, handle: Self::Handle);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
}

/// Counters for the current session, or the last one once stopped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionStats {
    pub ticks: u64,
    pub failures: u64,
    pub interval: Option<Duration>,
    pub started_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct Counters {
    ticks: AtomicU64,
    failures: AtomicU64,
}

struct ActiveSession<H> {
    handle: H,
    running: Arc<AtomicBool>,
    counters: Arc<Counters>,
    interval: Duration,
    started_at: DateTime<Utc>,
}

impl<H> ActiveSession<H> {
    fn stats(&self) -> SessionStats {
        SessionStats {
            ticks: self.counters.ticks.load(Ordering::Acquire),
            failures: self.counters.failures.load(Ordering::Relaxed),
            interval: Some(self.interval),
            started_at: Some(self.started_at),
        }
    }
}

pub struct UpdateScheduler<T: PeriodicTimer> {
    timer: T,
    session: Option<ActiveSession<T::Handle>>,
    finished: SessionStats,
}

impl<T: PeriodicTimer> UpdateScheduler<T> {
    pub fn new(timer: T) -> Self {
        Self {
            timer,
            session: None,
            finished: SessionStats::default(),
        }
    }

    pub fn state(&self) -> SchedulerState {
        if self.session.is_some() {
            SchedulerState::Running
        } else {
            SchedulerState::Idle
        }
    }

    pub fn is_running(&self) -> bool {
        self.state() == SchedulerState::Running
    }

    pub fn interval(&self) -> Option<Duration> {
        self.session.as_ref().map(|s| s.interval)
    }

    pub fn stats(&self) -> SessionStats {
        match &self.session {
            Some(session) => session.stats(),
            None => self.finished.clone(),
        }
    }

    pub fn timer(&self) -> &T {
        &self.timer
    }

    pub fn timer_mut(&mut self) -> &mut T {
        &mut self.timer
    }

    /// Starts invoking `tick` every `interval`. Tick errors are logged and
    /// counted; they never stop the session. Fails while already running.
    pub fn start<F>(&mut self, interval: Duration, tick: F) -> Result<(), SchedulerError>
    where
        F: FnMut() -> anyhow::Result<()> + Send + 'static,
    {
        if self.session.is_some() {
            return Err(SchedulerError::AlreadyRunning);
        }
        check_interval(interval)?;

        let running = Arc::new(AtomicBool::new(true));
        let counters = Arc::new(Counters::default());
        let task = session_task(running.clone(), counters.clone(), tick);
        let handle = self.timer.schedule(interval, task)?;
        self.session = Some(ActiveSession {
            handle,
            running,
            counters,
            interval,
            started_at: Utc::now(),
        });
        info!(interval_ms = interval.as_millis() as u64, "continuous update started");
        Ok(())
    }

    /// Returns to idle, releasing the timer handle. Returns false when there
    /// was nothing to stop.
    pub fn stop(&mut self) -> bool {
        let Some(session) = self.session.take() else {
            return false;
        };
        session.running.store(false, Ordering::Release);
        self.finished = session.stats();
        self.timer.cancel(session.handle);
        info!(
            ticks = self.finished.ticks,
            failures = self.finished.failures,
            "continuous update stopped"
        );
        true
    }
}

impl<T: PeriodicTimer> Drop for UpdateScheduler<T> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn check_interval(interval: Duration) -> Result<(), SchedulerError> {
    if interval < Duration::from_millis(1) {
        return Err(SchedulerError::InvalidInterval);
    }
    Ok(())
}

fn session_task<F>(running: Arc<AtomicBool>, counters: Arc<Counters>, mut tick: F) -> TimerTask
where
    F: FnMut() -> anyhow::Result<()> + Send + 'static,
{
    Box::new(move || run_tick(&running, &counters, &mut tick))
}

fn run_tick<F>(running: &AtomicBool, counters: &Counters, tick: &mut F) -> TickControl
where
    F: FnMut() -> anyhow::Result<()>,
{
    if !running.load(Ordering::Acquire) {
        debug!("session no longer running, dropping tick");
        return TickControl::Deregister;
    }
    if let Err(err) = tick() {
        counters.failures.fetch_add(1, Ordering::Relaxed);
        warn!(error = %err, "continuous update tick failed");
    }
    // counted once the tick has finished, so a reader seeing `ticks` also sees
    // everything that tick published
    counters.ticks.fetch_add(1, Ordering::Release);
    TickControl::Continue
}

/// Runs tasks on a tokio runtime with `tokio::time::interval`.
#[derive(Clone)]
pub struct TokioTimer {
    runtime: Handle,
}

impl TokioTimer {
    pub fn new(runtime: Handle) -> Self {
        Self { runtime }
    }

    pub fn current() -> Result<Self, SchedulerError> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|_| SchedulerError::NoRuntime)
    }
}

impl PeriodicTimer for TokioTimer {
    type Handle = JoinHandle<()>;

    fn schedule(
        &mut self,
        every: Duration,
        mut task: TimerTask,
    ) -> Result<Self::Handle, SchedulerError> {
        check_interval(every)?;
        Ok(self.runtime.spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // the first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if task() == TickControl::Deregister {
                    break;
                }
            }
        }))
    }

    fn cancel(&mut self, handle: Self::Handle) {
        handle.abort();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ManualHandle(u64);

struct ManualEntry {
    id: u64,
    every: Duration,
    next_due: Duration,
    task: TimerTask,
}

/// Timer driven by a virtual clock. Nothing runs until `advance` is called,
/// which makes it suitable for headless stepping and deterministic tests.
#[derive(Default)]
pub struct ManualTimer {
    next_id: u64,
    now: Duration,
    entries: Vec<ManualEntry>,
}

impl ManualTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> Duration {
        self.now
    }

    pub fn pending(&self) -> usize {
        self.entries.len()
    }

    /// Moves the clock forward by `by`, running every task that falls due in
    /// time order. Returns how many task invocations happened.
    pub fn advance(&mut self, by: Duration) -> usize {
        let target = self.now + by;
        let mut fired = 0;
        loop {
            let due = self
                .entries
                .iter()
                .enumerate()
                .filter(|(_, entry)| entry.next_due <= target)
                .min_by_key(|(_, entry)| (entry.next_due, entry.id))
                .map(|(index, _)| index);
            let Some(index) = due else {
                break;
            };
            let entry = &mut self.entries[index];
            self.now = entry.next_due;
            fired += 1;
            match (entry.task)() {
                TickControl::Continue => entry.next_due += entry.every,
                TickControl::Deregister => {
                    self.entries.remove(index);
                }
            }
        }
        self.now = target;
        fired
    }
}

impl PeriodicTimer for ManualTimer {
    type Handle = ManualHandle;

    fn schedule(
        &mut self,
        every: Duration,
        task: TimerTask,
    ) -> Result<Self::Handle, SchedulerError> {
        check_interval(every)?;
        let id = self.next_id;
        self.next_id += 1;
        self.entries.push(ManualEntry {
            id,
            every,
            next_due: self.now + every,
            task,
        });
        Ok(ManualHandle(id))
    }

    fn cancel(&mut self, handle: Self::Handle) {
        self.entries.retain(|entry| entry.id != handle.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use anyhow::anyhow;

    fn counting_tick(
        counter: &Arc<AtomicU64>,
    ) -> impl FnMut() -> anyhow::Result<()> + Send + 'static {
        let counter = counter.clone();
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_start_runs_ticks_at_interval() {
        let mut scheduler = UpdateScheduler::new(ManualTimer::new());
        let counter = Arc::new(AtomicU64::new(0));
        assert_eq!(scheduler.state(), SchedulerState::Idle);

        scheduler
            .start(Duration::from_millis(50), counting_tick(&counter))
            .unwrap();
        assert!(scheduler.is_running());
        assert_eq!(scheduler.interval(), Some(Duration::from_millis(50)));

        assert_eq!(scheduler.timer_mut().advance(Duration::from_millis(49)), 0);
        assert_eq!(scheduler.timer_mut().advance(Duration::from_millis(1)), 1);
        assert_eq!(scheduler.timer_mut().advance(Duration::from_millis(200)), 4);
        assert_eq!(counter.load(Ordering::SeqCst), 5);
        assert_eq!(scheduler.stats().ticks, 5);
    }

    #[test]
    fn test_start_while_running_is_rejected() {
        let mut scheduler = UpdateScheduler::new(ManualTimer::new());
        let counter = Arc::new(AtomicU64::new(0));
        scheduler
            .start(Duration::from_millis(10), counting_tick(&counter))
            .unwrap();

        let second = scheduler.start(Duration::from_millis(10), counting_tick(&counter));
        assert_eq!(second, Err(SchedulerError::AlreadyRunning));
        assert_eq!(scheduler.timer().pending(), 1);
    }

    #[test]
    fn test_zero_interval_rejected() {
        let mut scheduler = UpdateScheduler::new(ManualTimer::new());
        let result = scheduler.start(Duration::ZERO, || Ok(()));
        assert_eq!(result, Err(SchedulerError::InvalidInterval));
        assert!(!scheduler.is_running());
    }

    #[test]
    fn test_stop_releases_handle_and_is_idempotent() {
        let mut scheduler = UpdateScheduler::new(ManualTimer::new());
        let counter = Arc::new(AtomicU64::new(0));
        scheduler
            .start(Duration::from_millis(10), counting_tick(&counter))
            .unwrap();
        scheduler.timer_mut().advance(Duration::from_millis(30));

        assert!(scheduler.stop());
        assert_eq!(scheduler.state(), SchedulerState::Idle);
        assert_eq!(scheduler.timer().pending(), 0);
        assert!(!scheduler.stop());

        scheduler.timer_mut().advance(Duration::from_millis(100));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert_eq!(scheduler.stats().ticks, 3);
    }

    #[test]
    fn test_restart_after_stop() {
        let mut scheduler = UpdateScheduler::new(ManualTimer::new());
        let counter = Arc::new(AtomicU64::new(0));
        scheduler
            .start(Duration::from_millis(10), counting_tick(&counter))
            .unwrap();
        scheduler.stop();
        scheduler
            .start(Duration::from_millis(20), counting_tick(&counter))
            .unwrap();

        scheduler.timer_mut().advance(Duration::from_millis(40));
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert_eq!(scheduler.stats().interval, Some(Duration::from_millis(20)));
    }

    #[test]
    fn test_tick_errors_do_not_stop_session() {
        let mut scheduler = UpdateScheduler::new(ManualTimer::new());
        let mut calls = 0;
        scheduler
            .start(Duration::from_millis(10), move || {
                calls += 1;
                if calls % 2 == 1 {
                    Err(anyhow!("total active mass is zero"))
                } else {
                    Ok(())
                }
            })
            .unwrap();

        assert_eq!(scheduler.timer_mut().advance(Duration::from_millis(40)), 4);
        assert!(scheduler.is_running());
        let stats = scheduler.stats();
        assert_eq!(stats.ticks, 4);
        assert_eq!(stats.failures, 2);
    }

    #[test]
    fn test_cleared_flag_deregisters_without_ticking() {
        let running = AtomicBool::new(false);
        let counters = Counters::default();
        let mut called = false;
        let control = run_tick(&running, &counters, &mut || {
            called = true;
            Ok(())
        });

        assert_eq!(control, TickControl::Deregister);
        assert!(!called);
        assert_eq!(counters.ticks.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_manual_timer_drops_deregistered_tasks() {
        let mut timer = ManualTimer::new();
        let mut remaining = 2;
        timer
            .schedule(
                Duration::from_millis(5),
                Box::new(move || {
                    remaining -= 1;
                    if remaining == 0 {
                        TickControl::Deregister
                    } else {
                        TickControl::Continue
                    }
                }),
            )
            .unwrap();

        assert_eq!(timer.advance(Duration::from_millis(100)), 2);
        assert_eq!(timer.pending(), 0);
        assert_eq!(timer.now(), Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_timer_ticks_until_stopped() {
        let mut scheduler = UpdateScheduler::new(TokioTimer::current().unwrap());
        let counter = Arc::new(AtomicU64::new(0));
        scheduler
            .start(Duration::from_millis(10), counting_tick(&counter))
            .unwrap();

        tokio::time::sleep(Duration::from_millis(55)).await;
        let seen = counter.load(Ordering::SeqCst);
        assert!(seen >= 3, "expected several ticks, saw {seen}");

        scheduler.stop();
        tokio::task::yield_now().await;
        let after_stop = counter.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(counter.load(Ordering::SeqCst), after_stop);
    }

    #[test]
    fn test_tokio_timer_requires_runtime() {
        assert_eq!(TokioTimer::current().err(), Some(SchedulerError::NoRuntime));
    }

    #[test]
    fn test_manual_timer_rejects_zero_interval() {
        let mut timer = ManualTimer::new();
        let result = timer.schedule(Duration::ZERO, Box::new(|| TickControl::Continue));
        assert_eq!(result, Err(SchedulerError::InvalidInterval));
        assert_eq!(timer.pending(), 0);
        assert_eq!(timer.advance(Duration::from_millis(10)), 0);
    }

    #[test]
    fn test_failed_ticks_are_still_counted() {
        let running = AtomicBool::new(true);
        let counters = Counters::default();
        let control = run_tick(&running, &counters, &mut || Err(anyhow!("no mass")));

        assert_eq!(control, TickControl::Continue);
        assert_eq!(counters.ticks.load(Ordering::Acquire), 1);
        assert_eq!(counters.failures.load(Ordering::Relaxed), 1);
    }
}
