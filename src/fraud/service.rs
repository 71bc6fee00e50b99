//! Fraud service: per-edge rule orchestration.
//!
//! A dedicated bounded pool, distinct from the transaction workers, runs
//! all enabled rules for one edge inside a single task and writes the
//! merged annotation back. Submission never blocks the caller; a full
//! pool hands the task back as an error so the write path can count the
//! drop and continue.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::rules;
use super::types::{RuleId, RuleVerdict, RULE_ORDER};
use crate::graph::GraphOps;
use crate::models::{FraudAnnotation, FraudStatus};
use crate::perf::{MetricSeries, PerfMonitor};
use crate::pipeline::queue::{PushError, TaskQueue};

/// Why a fraud submission was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitError {
    /// Queue at capacity; the edge stays unannotated.
    PoolFull,
    /// Service is shutting down.
    NotRunning,
}

impl std::fmt::Display for SubmitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PoolFull => write!(f, "fraud pool full"),
            Self::NotRunning => write!(f, "fraud service not running"),
        }
    }
}

impl std::error::Error for SubmitError {}

/// Result of one evaluation pass, delivered on the completion handle.
#[derive(Debug)]
pub struct EvalOutcome {
    pub triggered: Vec<RuleId>,
    pub annotation: Option<FraudAnnotation>,
    /// Whether the annotation write succeeded. Always false when no
    /// rule triggered.
    pub annotated: bool,
    pub rule_failures: usize,
}

struct FraudTask {
    edge_id: String,
    txn_id: String,
    done: oneshot::Sender<EvalOutcome>,
}

/// Per-rule enable flags and the evaluation pool.
pub struct FraudService {
    graph: Arc<dyn GraphOps>,
    perf: Arc<PerfMonitor>,
    rt1_enabled: AtomicBool,
    rt2_enabled: AtomicBool,
    rt3_enabled: AtomicBool,
    queue: Arc<TaskQueue<FraudTask>>,
    workers: parking_lot::Mutex<Vec<JoinHandle<()>>>,
    annotation_failures: AtomicU64,
}

/// Snapshot of the enable flags.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct RuleStates {
    pub rt1: bool,
    pub rt2: bool,
    pub rt3: bool,
}

impl FraudService {
    /// Build the service and spawn its worker pool. Must be called from
    /// within a tokio runtime.
    pub fn new(
        graph: Arc<dyn GraphOps>,
        perf: Arc<PerfMonitor>,
        workers: usize,
        queue_capacity: usize,
    ) -> Arc<Self> {
        let service = Arc::new(Self {
            graph,
            perf,
            rt1_enabled: AtomicBool::new(true),
            rt2_enabled: AtomicBool::new(true),
            rt3_enabled: AtomicBool::new(true),
            queue: Arc::new(TaskQueue::new(queue_capacity)),
            workers: parking_lot::Mutex::new(Vec::new()),
            annotation_failures: AtomicU64::new(0),
        });

        let mut handles = service.workers.lock();
        for worker_id in 0..workers.max(1) {
            let svc = Arc::clone(&service);
            handles.push(tokio::spawn(async move {
                while let Some(task) = svc.queue.pop().await {
                    let outcome = svc.evaluate(&task.edge_id, &task.txn_id).await;
                    let _ = task.done.send(outcome);
                }
                debug!(worker_id, "Fraud worker exiting");
            }));
        }
        drop(handles);

        info!(workers = workers.max(1), "Fraud service workers ready");
        service
    }

    /// Toggle one rule. Affects subsequent evaluations only; stored
    /// annotations are never revisited.
    pub fn set_rule_enabled(&self, rule: RuleId, enabled: bool) {
        let flag = match rule {
            RuleId::Rt1 => &self.rt1_enabled,
            RuleId::Rt2 => &self.rt2_enabled,
            RuleId::Rt3 => &self.rt3_enabled,
        };
        flag.store(enabled, Ordering::Release);
        info!(rule = rule.short_name(), enabled, "Fraud rule toggled");
    }

    pub fn is_rule_enabled(&self, rule: RuleId) -> bool {
        match rule {
            RuleId::Rt1 => self.rt1_enabled.load(Ordering::Acquire),
            RuleId::Rt2 => self.rt2_enabled.load(Ordering::Acquire),
            RuleId::Rt3 => self.rt3_enabled.load(Ordering::Acquire),
        }
    }

    pub fn rule_states(&self) -> RuleStates {
        RuleStates {
            rt1: self.is_rule_enabled(RuleId::Rt1),
            rt2: self.is_rule_enabled(RuleId::Rt2),
            rt3: self.is_rule_enabled(RuleId::Rt3),
        }
    }

    pub fn annotation_failures(&self) -> u64 {
        self.annotation_failures.load(Ordering::Relaxed)
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Submit one edge for evaluation without blocking. The returned
    /// receiver resolves when all rules for the edge have run; the auto
    /// pipeline drops it, the manual path may await it.
    pub fn submit_async(
        &self,
        edge_id: &str,
        txn_id: &str,
    ) -> Result<oneshot::Receiver<EvalOutcome>, SubmitError> {
        let (done_tx, done_rx) = oneshot::channel();
        let task = FraudTask {
            edge_id: edge_id.to_string(),
            txn_id: txn_id.to_string(),
            done: done_tx,
        };
        match self.queue.try_push(task) {
            Ok(()) => Ok(done_rx),
            Err(PushError::Full(_)) => Err(SubmitError::PoolFull),
            Err(PushError::Closed(_)) => Err(SubmitError::NotRunning),
        }
    }

    /// Run every enabled rule for one edge, merge, annotate.
    async fn evaluate(&self, edge_id: &str, txn_id: &str) -> EvalOutcome {
        let eval_start = Instant::now();
        let mut verdicts: Vec<(RuleId, RuleVerdict)> = Vec::new();
        let mut rule_failures = 0usize;

        for rule in RULE_ORDER {
            if !self.is_rule_enabled(rule) {
                continue;
            }

            let rule_start = Instant::now();
            let result = rules::run_rule(rule, self.graph.as_ref(), edge_id, txn_id).await;
            let execution_ms = rule_start.elapsed().as_secs_f64() * 1000.0;

            match result {
                Ok(Some(verdict)) => {
                    self.perf
                        .record_rule_performance(rule.series(), execution_ms, true);
                    debug!(
                        txn_id,
                        rule = rule.id_str(),
                        score = verdict.score,
                        reason = %verdict.reason,
                        "Fraud rule triggered"
                    );
                    verdicts.push((rule, verdict));
                }
                Ok(None) => {
                    self.perf
                        .record_rule_performance(rule.series(), execution_ms, true);
                }
                Err(e) => {
                    // One failed rule never aborts the rest.
                    self.perf
                        .record_rule_performance(rule.series(), execution_ms, false);
                    rule_failures += 1;
                    error!(txn_id, rule = rule.id_str(), error = %e, "Fraud rule failed");
                }
            }
        }

        let triggered: Vec<RuleId> = verdicts.iter().map(|(rule, _)| *rule).collect();
        let annotation = merge_verdicts(&verdicts);

        let mut annotated = false;
        if let Some(ref ann) = annotation {
            match self.graph.annotate_edge(edge_id, ann).await {
                Ok(()) => {
                    annotated = true;
                    info!(
                        target: "transactions",
                        txn_id,
                        edge_id,
                        fraud_score = ann.fraud_score,
                        fraud_status = ann.fraud_status.as_str(),
                        "Transaction annotated as fraud"
                    );
                }
                Err(e) => {
                    // The edge is already durable; a lost annotation is
                    // repairable offline and never surfaces to the caller.
                    self.annotation_failures.fetch_add(1, Ordering::Relaxed);
                    error!(txn_id, edge_id, error = %e, "Failed to store fraud annotation");
                }
            }
        }

        let eval_ms = eval_start.elapsed().as_secs_f64() * 1000.0;
        let eval_success = rule_failures == 0 && (annotation.is_none() || annotated);
        self.perf
            .record_rule_performance(MetricSeries::FraudEval, eval_ms, eval_success);

        EvalOutcome {
            triggered,
            annotation,
            annotated,
            rule_failures,
        }
    }

    /// Stop accepting submissions and let workers drain. Pending tasks
    /// run to completion unless `force` aborts them.
    pub async fn shutdown(&self, force: bool) {
        self.queue.close();
        let handles: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        for handle in handles {
            if force {
                handle.abort();
            } else if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    warn!(error = %e, "Fraud worker ended abnormally");
                }
            }
        }
        info!("Fraud service shut down");
    }
}

/// Merge triggered verdicts into one annotation: the max score wins,
/// `blocked` dominates `review`, and each rule contributes its details
/// payload. No verdicts, no annotation.
pub fn merge_verdicts(verdicts: &[(RuleId, RuleVerdict)]) -> Option<FraudAnnotation> {
    if verdicts.is_empty() {
        return None;
    }

    let mut fraud_score = 0u32;
    let mut status = FraudStatus::Review;
    let mut details = Vec::with_capacity(verdicts.len());

    for (_, verdict) in verdicts {
        fraud_score = fraud_score.max(verdict.score);
        if verdict.status == FraudStatus::Blocked {
            status = FraudStatus::Blocked;
        }
        details.push(
            serde_json::to_string(&verdict.details).unwrap_or_else(|_| "{}".to_string()),
        );
    }

    Some(FraudAnnotation {
        is_fraud: true,
        fraud_score,
        fraud_status: status,
        eval_timestamp: chrono::Utc::now().to_rfc3339(),
        details,
    })
}
