//! Performance monitor.
//!
//! Every `record_*` entrypoint pushes a sample onto an unbounded channel
//! and returns; a single aggregator thread drains the channel and owns
//! all mutation of the stats store. Readers snapshot through a short
//! read guard. The store is behind an RwLock only for that read seam:
//! the aggregator is the sole writer, and it drains in batches so the
//! write guard is held briefly.
//!
//! Overflow policy: a sample is dropped rather than ever slowing the
//! transaction hot path.

use chrono::{DateTime, Utc};
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Ring capacity for per-series sample history.
const MAX_HISTORY: usize = 1_000_000;

/// Ring capacity for each latency sub-channel.
const LATENCY_RING: usize = 1_000;

/// Completion timestamps kept for the rolling-TPS window.
const COMPLETION_RING: usize = 128;

/// Samples applied per write-guard acquisition.
const DRAIN_BATCH: usize = 256;

/// Metric series with rule-style samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricSeries {
    Rt1,
    Rt2,
    Rt3,
    /// End-to-end fraud evaluation latency, reported by the fraud
    /// service after all rules for an edge complete.
    FraudEval,
}

impl MetricSeries {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Rt1 => "RT1",
            Self::Rt2 => "RT2",
            Self::Rt3 => "RT3",
            Self::FraudEval => "FRAUD_EVAL",
        }
    }

    const ALL: [MetricSeries; 4] = [Self::Rt1, Self::Rt2, Self::Rt3, Self::FraudEval];
}

/// Latency decomposition of one completed transaction, milliseconds.
#[derive(Debug, Clone, Copy, Default)]
pub struct TxnLatency {
    pub total_ms: f64,
    pub exec_ms: f64,
    pub queue_wait_ms: f64,
    pub db_ms: f64,
    pub fraud_submit_ms: f64,
}

enum PerfEvent {
    RuleSample {
        series: MetricSeries,
        execution_ms: f64,
        success: bool,
        at: DateTime<Utc>,
    },
    TransactionScheduled,
    TransactionCompleted {
        latency: TxnLatency,
        at: Instant,
    },
    TransactionFailed,
    SubmissionDropped,
    FraudSubmissionDropped,
    SetGenerationState {
        running: bool,
        target_tps: f64,
        queue_size: usize,
    },
    ResetTransactionMetrics,
    ResetAll,
    /// Ack once every event sent before this one has been applied.
    Flush(Sender<()>),
}

#[derive(Debug, Clone)]
struct RuleSample {
    at: DateTime<Utc>,
    execution_ms: f64,
    success: bool,
}

#[derive(Default)]
struct SeriesStore {
    samples: VecDeque<RuleSample>,
    total: u64,
    success: u64,
    failure: u64,
}

impl SeriesStore {
    fn record(&mut self, sample: RuleSample) {
        if self.samples.len() >= MAX_HISTORY {
            self.samples.pop_front();
        }
        self.total += 1;
        if sample.success {
            self.success += 1;
        } else {
            self.failure += 1;
        }
        self.samples.push_back(sample);
    }

    fn clear(&mut self) {
        self.samples.clear();
        self.total = 0;
        self.success = 0;
        self.failure = 0;
    }
}

#[derive(Default)]
struct LatencyRingSet {
    total: VecDeque<f64>,
    exec: VecDeque<f64>,
    queue_wait: VecDeque<f64>,
    db: VecDeque<f64>,
    fraud_submit: VecDeque<f64>,
}

impl LatencyRingSet {
    fn push(&mut self, latency: &TxnLatency) {
        for (ring, value) in [
            (&mut self.total, latency.total_ms),
            (&mut self.exec, latency.exec_ms),
            (&mut self.queue_wait, latency.queue_wait_ms),
            (&mut self.db, latency.db_ms),
            (&mut self.fraud_submit, latency.fraud_submit_ms),
        ] {
            if ring.len() >= LATENCY_RING {
                ring.pop_front();
            }
            ring.push_back(value);
        }
    }

    fn clear(&mut self) {
        self.total.clear();
        self.exec.clear();
        self.queue_wait.clear();
        self.db.clear();
        self.fraud_submit.clear();
    }
}

#[derive(Default)]
struct TxnStore {
    total_scheduled: u64,
    total_completed: u64,
    total_failed: u64,
    dropped_submissions: u64,
    dropped_fraud_submissions: u64,
    latencies: LatencyRingSet,
    completion_times: VecDeque<Instant>,
    is_running: bool,
    target_tps: f64,
    current_tps: f64,
    queue_size: usize,
    started_at: Option<Instant>,
    elapsed: Duration,
}

impl TxnStore {
    fn record_completed(&mut self, latency: &TxnLatency, at: Instant) {
        self.total_completed += 1;
        self.latencies.push(latency);
        if self.completion_times.len() >= COMPLETION_RING {
            self.completion_times.pop_front();
        }
        self.completion_times.push_back(at);
        self.update_current_tps(at);
    }

    fn update_current_tps(&mut self, now: Instant) {
        let recent = self
            .completion_times
            .iter()
            .filter(|t| now.duration_since(**t) <= Duration::from_secs(1))
            .count();
        self.current_tps = recent as f64;
    }

    fn elapsed_secs(&self) -> f64 {
        match self.started_at {
            Some(start) if self.is_running => start.elapsed().as_secs_f64(),
            _ => self.elapsed.as_secs_f64(),
        }
    }

    fn clear(&mut self) {
        self.total_scheduled = 0;
        self.total_completed = 0;
        self.total_failed = 0;
        self.dropped_submissions = 0;
        self.dropped_fraud_submissions = 0;
        self.latencies.clear();
        self.completion_times.clear();
        self.current_tps = 0.0;
        self.started_at = None;
        self.elapsed = Duration::ZERO;
    }
}

#[derive(Default)]
struct PerfStore {
    rt1: SeriesStore,
    rt2: SeriesStore,
    rt3: SeriesStore,
    fraud_eval: SeriesStore,
    txn: TxnStore,
}

impl PerfStore {
    fn series_mut(&mut self, series: MetricSeries) -> &mut SeriesStore {
        match series {
            MetricSeries::Rt1 => &mut self.rt1,
            MetricSeries::Rt2 => &mut self.rt2,
            MetricSeries::Rt3 => &mut self.rt3,
            MetricSeries::FraudEval => &mut self.fraud_eval,
        }
    }

    fn series(&self, series: MetricSeries) -> &SeriesStore {
        match series {
            MetricSeries::Rt1 => &self.rt1,
            MetricSeries::Rt2 => &self.rt2,
            MetricSeries::Rt3 => &self.rt3,
            MetricSeries::FraudEval => &self.fraud_eval,
        }
    }

    fn apply(&mut self, event: PerfEvent) {
        match event {
            PerfEvent::RuleSample {
                series,
                execution_ms,
                success,
                at,
            } => {
                self.series_mut(series).record(RuleSample {
                    at,
                    execution_ms,
                    success,
                });
            }
            PerfEvent::TransactionScheduled => self.txn.total_scheduled += 1,
            PerfEvent::TransactionCompleted { latency, at } => {
                self.txn.record_completed(&latency, at)
            }
            PerfEvent::TransactionFailed => self.txn.total_failed += 1,
            PerfEvent::SubmissionDropped => self.txn.dropped_submissions += 1,
            PerfEvent::FraudSubmissionDropped => self.txn.dropped_fraud_submissions += 1,
            PerfEvent::SetGenerationState {
                running,
                target_tps,
                queue_size,
            } => {
                if running && !self.txn.is_running {
                    self.txn.started_at = Some(Instant::now());
                } else if !running {
                    if let Some(start) = self.txn.started_at.take() {
                        self.txn.elapsed = start.elapsed();
                    }
                }
                self.txn.is_running = running;
                self.txn.target_tps = target_tps;
                self.txn.queue_size = queue_size;
            }
            PerfEvent::ResetTransactionMetrics => self.txn.clear(),
            PerfEvent::ResetAll => {
                self.rt1.clear();
                self.rt2.clear();
                self.rt3.clear();
                self.fraud_eval.clear();
                self.txn.clear();
            }
            PerfEvent::Flush(ack) => {
                let _ = ack.send(());
            }
        }
    }
}

/// Windowed statistics for one series.
#[derive(Debug, Clone, Serialize)]
pub struct SeriesStats {
    pub series: &'static str,
    pub avg_execution_ms: f64,
    pub min_execution_ms: f64,
    pub max_execution_ms: f64,
    pub total_queries: usize,
    pub success_rate: f64,
    pub queries_per_second: f64,
}

/// One timeline point for charts.
#[derive(Debug, Clone, Serialize)]
pub struct TimelinePoint {
    pub timestamp: String,
    pub execution_ms: f64,
    pub success: bool,
}

/// Timeline data for every rule-style series.
#[derive(Debug, Clone, Serialize)]
pub struct Timeline {
    pub rt1: Vec<TimelinePoint>,
    pub rt2: Vec<TimelinePoint>,
    pub rt3: Vec<TimelinePoint>,
    pub fraud_eval: Vec<TimelinePoint>,
}

/// Aggregate latency figures for one sub-channel.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LatencyAggregate {
    pub avg_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
}

impl LatencyAggregate {
    fn from_ring(ring: &VecDeque<f64>) -> Self {
        if ring.is_empty() {
            return Self::default();
        }
        let sum: f64 = ring.iter().sum();
        Self {
            avg_ms: sum / ring.len() as f64,
            min_ms: ring.iter().copied().fold(f64::INFINITY, f64::min),
            max_ms: ring.iter().copied().fold(0.0, f64::max),
        }
    }
}

/// Composite transaction-pipeline statistics.
#[derive(Debug, Clone, Serialize)]
pub struct TransactionStats {
    pub is_running: bool,
    pub target_tps: f64,
    /// Completions within the last rolling second.
    pub current_tps: f64,
    /// Completions over the whole run.
    pub actual_tps: f64,
    pub elapsed_secs: f64,
    pub total_scheduled: u64,
    pub total_completed: u64,
    pub total_failed: u64,
    pub dropped_submissions: u64,
    pub dropped_fraud_submissions: u64,
    pub queue_size: usize,
    pub total_latency: LatencyAggregate,
    pub exec_latency: LatencyAggregate,
    pub queue_wait_latency: LatencyAggregate,
    pub db_latency: LatencyAggregate,
    pub fraud_submit_latency: LatencyAggregate,
    pub success_rate: f64,
}

/// Handle to the monitor; cheap to clone behind an `Arc`.
pub struct PerfMonitor {
    tx: Sender<PerfEvent>,
    store: Arc<RwLock<PerfStore>>,
}

impl PerfMonitor {
    /// Create the monitor and spawn its aggregator thread. The thread
    /// exits when the last handle is dropped.
    pub fn new() -> Arc<Self> {
        let (tx, rx) = channel::unbounded();
        let store = Arc::new(RwLock::new(PerfStore::default()));

        let aggregator_store = Arc::clone(&store);
        std::thread::Builder::new()
            .name("perf_aggregator".to_string())
            .spawn(move || aggregator_loop(rx, aggregator_store))
            .expect("spawn perf aggregator");

        info!("Performance monitor initialized");
        Arc::new(Self { tx, store })
    }

    fn send(&self, event: PerfEvent) {
        let _ = self.tx.send(event);
    }

    // Recording entrypoints: non-blocking, callable from any thread.

    pub fn record_rule_performance(&self, series: MetricSeries, execution_ms: f64, success: bool) {
        self.send(PerfEvent::RuleSample {
            series,
            execution_ms,
            success,
            at: Utc::now(),
        });
    }

    pub fn record_transaction_scheduled(&self) {
        self.send(PerfEvent::TransactionScheduled);
    }

    pub fn record_transaction_completed(&self, latency: TxnLatency) {
        self.send(PerfEvent::TransactionCompleted {
            latency,
            at: Instant::now(),
        });
    }

    pub fn record_transaction_failed(&self) {
        self.send(PerfEvent::TransactionFailed);
    }

    pub fn record_submission_dropped(&self) {
        self.send(PerfEvent::SubmissionDropped);
    }

    pub fn record_fraud_submission_dropped(&self) {
        self.send(PerfEvent::FraudSubmissionDropped);
    }

    pub fn set_generation_state(&self, running: bool, target_tps: f64, queue_size: usize) {
        self.send(PerfEvent::SetGenerationState {
            running,
            target_tps,
            queue_size,
        });
    }

    pub fn reset_transaction_metrics(&self) {
        self.send(PerfEvent::ResetTransactionMetrics);
    }

    pub fn reset_all(&self) {
        self.send(PerfEvent::ResetAll);
        debug!("Performance metrics reset requested");
    }

    /// Block until every previously submitted sample is visible to
    /// readers, or the timeout passes. Readers otherwise observe a
    /// slight lag behind the raw events.
    pub fn flush(&self, timeout: Duration) -> bool {
        let (ack_tx, ack_rx) = channel::bounded(1);
        self.send(PerfEvent::Flush(ack_tx));
        ack_rx.recv_timeout(timeout).is_ok()
    }

    // Read-side queries.

    pub fn stats_for(&self, series: MetricSeries, window_minutes: i64) -> SeriesStats {
        let store = self.store.read();
        let s = store.series(series);
        let cutoff = Utc::now() - chrono::Duration::minutes(window_minutes);

        let recent: Vec<&RuleSample> = s.samples.iter().filter(|m| m.at >= cutoff).collect();
        if recent.is_empty() {
            return SeriesStats {
                series: series.name(),
                avg_execution_ms: 0.0,
                min_execution_ms: 0.0,
                max_execution_ms: 0.0,
                total_queries: 0,
                success_rate: 0.0,
                queries_per_second: 0.0,
            };
        }

        let times: Vec<f64> = recent.iter().map(|m| m.execution_ms).collect();
        let successes = recent.iter().filter(|m| m.success).count();
        let window_secs = (window_minutes as f64) * 60.0;

        SeriesStats {
            series: series.name(),
            avg_execution_ms: times.iter().sum::<f64>() / times.len() as f64,
            min_execution_ms: times.iter().copied().fold(f64::INFINITY, f64::min),
            max_execution_ms: times.iter().copied().fold(0.0, f64::max),
            total_queries: recent.len(),
            success_rate: (successes as f64 / recent.len() as f64) * 100.0,
            queries_per_second: recent.len() as f64 / window_secs.max(0.001),
        }
    }

    pub fn all_stats(&self, window_minutes: i64) -> Vec<SeriesStats> {
        MetricSeries::ALL
            .iter()
            .map(|s| self.stats_for(*s, window_minutes))
            .collect()
    }

    pub fn timeline(&self, window_minutes: i64) -> Timeline {
        let store = self.store.read();
        let cutoff = Utc::now() - chrono::Duration::minutes(window_minutes);

        let points = |s: &SeriesStore| -> Vec<TimelinePoint> {
            s.samples
                .iter()
                .filter(|m| m.at >= cutoff)
                .map(|m| TimelinePoint {
                    timestamp: m.at.to_rfc3339(),
                    execution_ms: m.execution_ms,
                    success: m.success,
                })
                .collect()
        };

        Timeline {
            rt1: points(&store.rt1),
            rt2: points(&store.rt2),
            rt3: points(&store.rt3),
            fraud_eval: points(&store.fraud_eval),
        }
    }

    pub fn transaction_stats(&self) -> TransactionStats {
        let store = self.store.read();
        let txn = &store.txn;
        let elapsed = txn.elapsed_secs();
        let actual_tps = if elapsed > 0.0 {
            txn.total_completed as f64 / elapsed
        } else {
            0.0
        };

        TransactionStats {
            is_running: txn.is_running,
            target_tps: txn.target_tps,
            current_tps: txn.current_tps,
            actual_tps,
            elapsed_secs: elapsed,
            total_scheduled: txn.total_scheduled,
            total_completed: txn.total_completed,
            total_failed: txn.total_failed,
            dropped_submissions: txn.dropped_submissions,
            dropped_fraud_submissions: txn.dropped_fraud_submissions,
            queue_size: txn.queue_size,
            total_latency: LatencyAggregate::from_ring(&txn.latencies.total),
            exec_latency: LatencyAggregate::from_ring(&txn.latencies.exec),
            queue_wait_latency: LatencyAggregate::from_ring(&txn.latencies.queue_wait),
            db_latency: LatencyAggregate::from_ring(&txn.latencies.db),
            fraud_submit_latency: LatencyAggregate::from_ring(&txn.latencies.fraud_submit),
            success_rate: (txn.total_completed as f64 / txn.total_scheduled.max(1) as f64) * 100.0,
        }
    }
}

fn aggregator_loop(rx: Receiver<PerfEvent>, store: Arc<RwLock<PerfStore>>) {
    while let Ok(first) = rx.recv() {
        let mut guard = store.write();
        guard.apply(first);
        // Drain whatever queued up behind the first event so the guard
        // amortizes across a batch.
        for _ in 0..DRAIN_BATCH {
            match rx.try_recv() {
                Ok(event) => guard.apply(event),
                Err(_) => break,
            }
        }
    }
    debug!("Perf aggregator exiting");
}
