//! Rate-controlled scheduler.
//!
//! A target TPS is split across `⌈TPS/100⌉` dedicated pacing threads.
//! Each thread submits one task per interval, with a per-wall-clock-
//! second burst cap, sleeping at millisecond granularity in between.
//! All threads reach their loop before any of them starts timing: a
//! readiness latch completes, then a broadcast releases the whole group
//! at once.

use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info, warn};

use super::worker::{TxnTask, WorkerPool};
use crate::perf::PerfMonitor;

/// TPS one pacing thread is trusted with.
pub const SCHEDULER_TPS_CAPACITY: f64 = 100.0;

/// How long the control side waits for the readiness latch.
const READY_TIMEOUT: Duration = Duration::from_secs(10);

/// How long a pacing thread waits for the release broadcast. Longer
/// than the control-side timeout so an abort always arrives first.
const RELEASE_TIMEOUT: Duration = Duration::from_secs(15);

/// Number of pacing threads for a target rate.
pub fn workers_needed(tps: f64) -> usize {
    ((tps / SCHEDULER_TPS_CAPACITY).ceil() as usize).max(1)
}

/// Soft per-second burst allowance for one pacing thread.
pub fn burst_cap(worker_tps: f64) -> u64 {
    ((worker_tps * 1.5).ceil() as u64).max(1)
}

/// Scheduler lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Stopped,
    /// Threads spawning, latch incomplete.
    Starting,
    /// Latch complete, release pending.
    Ready,
    Running,
    Stopping,
}

impl SchedulerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Stopping => "stopping",
        }
    }
}

/// Readiness latch plus release broadcast for one start cycle.
struct StartLatch {
    state: Mutex<LatchState>,
    condvar: Condvar,
}

#[derive(Default)]
struct LatchState {
    ready: usize,
    released: bool,
    aborted: bool,
}

impl StartLatch {
    fn new() -> Self {
        Self {
            state: Mutex::new(LatchState::default()),
            condvar: Condvar::new(),
        }
    }

    /// Worker side: signal readiness, then block until release or abort.
    fn arrive_and_wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        state.ready += 1;
        self.condvar.notify_all();

        while !state.released && !state.aborted {
            if self.condvar.wait_until(&mut state, deadline).timed_out() {
                return false;
            }
        }
        state.released && !state.aborted
    }

    /// Control side: block until `expected` workers have arrived.
    fn wait_ready(&self, expected: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while state.ready < expected {
            if self.condvar.wait_until(&mut state, deadline).timed_out() {
                return state.ready >= expected;
            }
        }
        true
    }

    fn release(&self) {
        let mut state = self.state.lock();
        state.released = true;
        self.condvar.notify_all();
    }

    fn abort(&self) {
        let mut state = self.state.lock();
        state.aborted = true;
        self.condvar.notify_all();
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub state: &'static str,
    pub target_tps: f64,
    pub scheduler_workers: usize,
    pub worker_names: Vec<String>,
}

struct SchedulerInner {
    state: SchedulerState,
    target_tps: f64,
    threads: Vec<thread::JoinHandle<()>>,
    worker_names: Vec<String>,
    latch: Option<Arc<StartLatch>>,
}

/// Multi-threaded rate pacer feeding the worker pool.
pub struct Scheduler {
    pool: Arc<WorkerPool>,
    perf: Arc<PerfMonitor>,
    running: Arc<AtomicBool>,
    inner: Mutex<SchedulerInner>,
}

impl Scheduler {
    pub fn new(pool: Arc<WorkerPool>, perf: Arc<PerfMonitor>) -> Self {
        Self {
            pool,
            perf,
            running: Arc::new(AtomicBool::new(false)),
            inner: Mutex::new(SchedulerInner {
                state: SchedulerState::Stopped,
                target_tps: 0.0,
                threads: Vec::new(),
                worker_names: Vec::new(),
                latch: None,
            }),
        }
    }

    /// Start pacing at the target rate. A no-op returning false from
    /// any state other than `Stopped`, or when the readiness latch does
    /// not complete within its timeout.
    pub fn start(&self, tps: f64) -> bool {
        if !(tps.is_finite() && tps > 0.0) {
            warn!(tps, "Scheduler start rejected: non-positive rate");
            return false;
        }

        let latch;
        let workers;
        {
            let mut inner = self.inner.lock();
            if inner.state != SchedulerState::Stopped {
                warn!(state = inner.state.as_str(), "Scheduler start ignored");
                return false;
            }
            inner.state = SchedulerState::Starting;

            workers = workers_needed(tps);
            let worker_tps = tps / workers as f64;
            latch = Arc::new(StartLatch::new());
            self.running.store(true, Ordering::Release);

            info!(
                workers,
                target_tps = tps,
                worker_tps,
                "Starting scheduler workers"
            );

            for worker_id in 0..workers {
                let name = format!("scheduler_worker_{worker_id}");
                let running = Arc::clone(&self.running);
                let pool = Arc::clone(&self.pool);
                let perf = Arc::clone(&self.perf);
                let latch = Arc::clone(&latch);

                let handle = thread::Builder::new()
                    .name(name.clone())
                    .spawn(move || {
                        pacing_loop(worker_id, worker_tps, running, pool, perf, latch)
                    })
                    .expect("spawn scheduler worker");

                inner.threads.push(handle);
                inner.worker_names.push(name);
            }

            inner.target_tps = tps;
            inner.latch = Some(Arc::clone(&latch));
        }

        if latch.wait_ready(workers, READY_TIMEOUT) {
            let mut inner = self.inner.lock();
            inner.state = SchedulerState::Ready;
            latch.release();
            inner.state = SchedulerState::Running;
            self.perf.set_generation_state(true, tps, 0);
            info!(target_tps = tps, "Scheduler running with synchronized start");
            true
        } else {
            error!(
                timeout_secs = READY_TIMEOUT.as_secs(),
                "Timeout waiting for scheduler workers; aborting start"
            );
            self.teardown(latch);
            false
        }
    }

    /// Stop pacing. Idempotent: returns false unless currently running.
    pub fn stop(&self) -> bool {
        let latch = {
            let mut inner = self.inner.lock();
            if inner.state != SchedulerState::Running {
                warn!(state = inner.state.as_str(), "Scheduler stop ignored");
                return false;
            }
            inner.state = SchedulerState::Stopping;
            inner.latch.take()
        };

        if let Some(latch) = latch {
            self.teardown(latch);
        }
        self.perf
            .set_generation_state(false, 0.0, self.pool.queue_len());
        info!("Scheduler stopped");
        true
    }

    /// Signal the threads, unblock any latch waiters, join, reset.
    fn teardown(&self, latch: Arc<StartLatch>) {
        self.running.store(false, Ordering::Release);
        latch.abort();

        let threads = {
            let mut inner = self.inner.lock();
            inner.worker_names.clear();
            std::mem::take(&mut inner.threads)
        };
        for handle in threads {
            let _ = handle.join();
        }

        let mut inner = self.inner.lock();
        inner.state = SchedulerState::Stopped;
        inner.target_tps = 0.0;
        inner.latch = None;
    }

    pub fn state(&self) -> SchedulerState {
        self.inner.lock().state
    }

    pub fn is_running(&self) -> bool {
        self.state() == SchedulerState::Running
    }

    pub fn target_tps(&self) -> f64 {
        self.inner.lock().target_tps
    }

    pub fn status(&self) -> SchedulerStatus {
        let inner = self.inner.lock();
        SchedulerStatus {
            running: inner.state == SchedulerState::Running,
            state: inner.state.as_str(),
            target_tps: inner.target_tps,
            scheduler_workers: inner.threads.len(),
            worker_names: inner.worker_names.clone(),
        }
    }
}

/// Seconds since the epoch plus the time remaining to the next aligned
/// second boundary.
fn wall_clock_second() -> (u64, Duration) {
    let since_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let remainder = Duration::from_secs(1).saturating_sub(Duration::from_nanos(
        since_epoch.subsec_nanos() as u64,
    ));
    (since_epoch.as_secs(), remainder)
}

fn pacing_loop(
    worker_id: usize,
    worker_tps: f64,
    running: Arc<AtomicBool>,
    pool: Arc<WorkerPool>,
    perf: Arc<PerfMonitor>,
    latch: Arc<StartLatch>,
) {
    debug!(worker_id, "Scheduler worker ready, waiting for release");
    if !latch.arrive_and_wait(RELEASE_TIMEOUT) {
        debug!(worker_id, "Scheduler worker released without start; exiting");
        return;
    }

    debug!(worker_id, worker_tps, "Scheduler worker pacing");
    let interval = Duration::from_secs_f64(1.0 / worker_tps);
    let cap = burst_cap(worker_tps);
    let mut next_time = Instant::now();
    let (mut current_second, _) = wall_clock_second();
    let mut sent_this_second: u64 = 0;

    while running.load(Ordering::Acquire) {
        let now = Instant::now();
        let (second, to_boundary) = wall_clock_second();

        if second != current_second {
            current_second = second;
            sent_this_second = 0;
        }

        if sent_this_second >= cap {
            // Burst budget spent; park until the next aligned second.
            thread::sleep(to_boundary.min(Duration::from_millis(100)));
            continue;
        }

        if now >= next_time {
            match pool.try_submit(TxnTask { scheduled_at: now }) {
                Ok(()) => {
                    perf.record_transaction_scheduled();
                    sent_this_second += 1;
                }
                Err(_) => {
                    perf.record_submission_dropped();
                }
            }
            next_time += interval;
        } else {
            thread::sleep((next_time - now).min(Duration::from_millis(1)));
        }
    }

    debug!(worker_id, "Scheduler worker exiting");
}
