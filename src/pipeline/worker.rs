//! Transaction pipeline and its bounded worker pool.
//!
//! Two stages per task: write the `TRANSACTS` edge, then hand the new
//! edge to the fraud pool. Latency is accounted end to end: queue wait
//! from the scheduler's stamp, the graph write, and the fraud submission
//! interval (the evaluation itself runs on the fraud pool and reports
//! its own series).

use arc_swap::{ArcSwap, ArcSwapOption};
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::queue::{PushError, TaskQueue};
use crate::fraud::{EvalOutcome, FraudService, SubmitError};
use crate::graph::{GraphError, GraphOps};
use crate::models::{
    GenType, TransactionSummary, TransactionType, TransactsProps, AUTO_TRANSACTION_TYPES,
    NORMAL_LOCATIONS,
};
use crate::perf::{PerfMonitor, TxnLatency};

/// Recent-transaction ring capacity.
const RECENT_CAP: usize = 100;

/// Why a transaction could not be created.
#[derive(Debug)]
pub enum TxnError {
    /// Fewer than two accounts available to transact between.
    NoAccounts,
    SameAccount,
    AccountNotFound(String),
    InvalidAmount(f64),
    Graph(GraphError),
}

impl std::fmt::Display for TxnError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoAccounts => write!(f, "fewer than two accounts available"),
            Self::SameAccount => {
                write!(f, "source and destination accounts cannot be the same")
            }
            Self::AccountNotFound(id) => write!(f, "account {id} not found"),
            Self::InvalidAmount(amount) => write!(f, "invalid amount {amount}"),
            Self::Graph(e) => write!(f, "graph error: {e}"),
        }
    }
}

impl std::error::Error for TxnError {}

impl From<GraphError> for TxnError {
    fn from(e: GraphError) -> Self {
        Self::Graph(e)
    }
}

/// A successfully written transaction.
#[derive(Debug)]
pub struct CreatedTransaction {
    pub edge_id: String,
    pub txn_id: String,
    pub from_account: String,
    pub to_account: String,
    pub amount: f64,
    pub txn_type: TransactionType,
    pub gen_type: GenType,
    pub db_ms: f64,
    pub fraud_submit_ms: f64,
    pub fraud_submitted: bool,
    /// Resolves when the fraud pool finishes this edge. The auto path
    /// drops it; the manual path may await it.
    pub eval: Option<oneshot::Receiver<EvalOutcome>>,
}

/// The write-then-submit path shared by the auto workers and the manual
/// surface.
pub struct TxnPipeline {
    graph: Arc<dyn GraphOps>,
    fraud: Arc<FraudService>,
    perf: Arc<PerfMonitor>,
    accounts: Arc<ArcSwap<Vec<String>>>,
    recent: Mutex<VecDeque<TransactionSummary>>,
    txn_counter: AtomicU64,
}

impl TxnPipeline {
    pub fn new(
        graph: Arc<dyn GraphOps>,
        fraud: Arc<FraudService>,
        perf: Arc<PerfMonitor>,
        accounts: Arc<ArcSwap<Vec<String>>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            graph,
            fraud,
            perf,
            accounts,
            recent: Mutex::new(VecDeque::with_capacity(RECENT_CAP)),
            txn_counter: AtomicU64::new(0),
        })
    }

    /// Create one transaction edge and submit it for fraud evaluation.
    ///
    /// With `force` unset both accounts are validated against the graph
    /// first; the auto path forces, trusting the account cache.
    pub async fn create_transaction(
        &self,
        from: &str,
        to: &str,
        amount: f64,
        txn_type: TransactionType,
        gen_type: GenType,
        force: bool,
    ) -> Result<CreatedTransaction, TxnError> {
        if !(amount.is_finite() && amount >= 0.0) {
            return Err(TxnError::InvalidAmount(amount));
        }
        if from == to {
            return Err(TxnError::SameAccount);
        }
        if !force {
            if !self.graph.account_exists(from).await? {
                return Err(TxnError::AccountNotFound(from.to_string()));
            }
            if !self.graph.account_exists(to).await? {
                return Err(TxnError::AccountNotFound(to.to_string()));
            }
        }

        let txn_id = Uuid::new_v4().to_string();
        let location = NORMAL_LOCATIONS
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or("New York, New York");
        let props = TransactsProps::new(
            txn_id.clone(),
            amount,
            txn_type,
            location.to_string(),
            gen_type,
        );

        let db_start = Instant::now();
        let edge_id = self.graph.add_transacts_edge(from, to, &props).await?;
        let db_ms = db_start.elapsed().as_secs_f64() * 1000.0;

        // The write is durable from here; fraud evaluation is
        // best-effort and decoupled from the caller.
        let submit_start = Instant::now();
        let (fraud_submitted, eval) = match self.fraud.submit_async(&edge_id, &txn_id) {
            Ok(rx) => (true, Some(rx)),
            Err(SubmitError::PoolFull) | Err(SubmitError::NotRunning) => {
                self.perf.record_fraud_submission_dropped();
                warn!(%txn_id, %edge_id, "Dropped fraud submission; edge stays unannotated");
                (false, None)
            }
        };
        let fraud_submit_ms = submit_start.elapsed().as_secs_f64() * 1000.0;

        self.txn_counter.fetch_add(1, Ordering::Relaxed);
        self.push_recent(TransactionSummary {
            txn_id: txn_id.clone(),
            edge_id: edge_id.clone(),
            from_account: from.to_string(),
            to_account: to.to_string(),
            amount: props.amount,
            txn_type,
            gen_type,
            timestamp: props.timestamp.clone(),
        });

        info!(
            target: "transactions",
            %txn_id,
            from,
            to,
            amount = props.amount,
            txn_type = txn_type.as_str(),
            gen_type = gen_type.as_str(),
            "Transaction created"
        );

        Ok(CreatedTransaction {
            edge_id,
            txn_id,
            from_account: from.to_string(),
            to_account: to.to_string(),
            amount: props.amount,
            txn_type,
            gen_type,
            db_ms,
            fraud_submit_ms,
            fraud_submitted,
            eval,
        })
    }

    /// One AUTO transaction between two distinct cached accounts.
    pub async fn generate_auto(&self) -> Result<CreatedTransaction, TxnError> {
        let accounts = self.accounts.load();
        if accounts.len() < 2 {
            return Err(TxnError::NoAccounts);
        }

        let (from, to, amount, txn_type) = {
            let mut rng = rand::thread_rng();
            let picked = rand::seq::index::sample(&mut rng, accounts.len(), 2);
            let amount = rng.gen_range(100.0..15000.0);
            let txn_type = *AUTO_TRANSACTION_TYPES
                .choose(&mut rng)
                .unwrap_or(&TransactionType::Transfer);
            (
                accounts[picked.index(0)].clone(),
                accounts[picked.index(1)].clone(),
                amount,
                txn_type,
            )
        };

        self.create_transaction(&from, &to, amount, txn_type, GenType::Auto, true)
            .await
    }

    fn push_recent(&self, summary: TransactionSummary) {
        let mut recent = self.recent.lock();
        if recent.len() >= RECENT_CAP {
            recent.pop_front();
        }
        recent.push_back(summary);
    }

    pub fn recent_transactions(&self, limit: usize) -> Vec<TransactionSummary> {
        let recent = self.recent.lock();
        recent.iter().rev().take(limit).cloned().collect()
    }

    pub fn transaction_count(&self) -> u64 {
        self.txn_counter.load(Ordering::Relaxed)
    }
}

/// One queued unit of work, stamped at scheduling time.
#[derive(Debug, Clone, Copy)]
pub struct TxnTask {
    pub scheduled_at: Instant,
}

/// Pool health snapshot for observability views.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PoolStatus {
    pub pool_size: usize,
    pub running: bool,
    pub queue_size: usize,
    pub queue_capacity: usize,
    pub dropped: u64,
}

/// Fixed-size pool consuming the bounded task queue. The queue is
/// recreated on every start so stop/start cycles begin clean.
pub struct WorkerPool {
    pipeline: Arc<TxnPipeline>,
    perf: Arc<PerfMonitor>,
    workers: usize,
    queue_capacity: usize,
    queue: ArcSwapOption<TaskQueue<TxnTask>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    dropped: AtomicU64,
}

impl WorkerPool {
    pub fn new(
        pipeline: Arc<TxnPipeline>,
        perf: Arc<PerfMonitor>,
        workers: usize,
        queue_capacity: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            pipeline,
            perf,
            workers: workers.max(1),
            queue_capacity: queue_capacity.max(1),
            queue: ArcSwapOption::empty(),
            handles: Mutex::new(Vec::new()),
            dropped: AtomicU64::new(0),
        })
    }

    /// Spawn the workers. Returns false when already running.
    pub fn start(&self) -> bool {
        let mut handles = self.handles.lock();
        if !handles.is_empty() {
            return false;
        }

        let queue = Arc::new(TaskQueue::new(self.queue_capacity));
        self.queue.store(Some(Arc::clone(&queue)));

        for worker_id in 0..self.workers {
            let queue = Arc::clone(&queue);
            let pipeline = Arc::clone(&self.pipeline);
            let perf = Arc::clone(&self.perf);
            handles.push(tokio::spawn(async move {
                while let Some(task) = queue.pop().await {
                    execute_task(&pipeline, &perf, task).await;
                }
                debug!(worker_id, "Transaction worker exiting");
            }));
        }

        info!(workers = self.workers, "Transaction workers ready");
        true
    }

    /// Non-blocking submit from the scheduler threads.
    pub fn try_submit(&self, task: TxnTask) -> Result<(), PushError<TxnTask>> {
        match self.queue.load_full() {
            Some(queue) => {
                let result = queue.try_push(task);
                if matches!(result, Err(PushError::Full(_))) {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                }
                result
            }
            None => Err(PushError::Closed(task)),
        }
    }

    /// Close the queue and wait for workers. With `drain` unset the
    /// workers are aborted instead of joined.
    pub async fn shutdown(&self, drain: bool) {
        if let Some(queue) = self.queue.swap(None) {
            queue.close();
        }

        let handles: Vec<JoinHandle<()>> = self.handles.lock().drain(..).collect();
        for handle in handles {
            if drain {
                if let Err(e) = handle.await {
                    if !e.is_cancelled() {
                        warn!(error = %e, "Transaction worker ended abnormally");
                    }
                }
            } else {
                handle.abort();
            }
        }

        info!(drained = drain, "Transaction worker pool shut down");
    }

    pub fn is_running(&self) -> bool {
        !self.handles.lock().is_empty()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.load_full().map(|q| q.len()).unwrap_or(0)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn status(&self) -> PoolStatus {
        PoolStatus {
            pool_size: self.workers,
            running: self.is_running(),
            queue_size: self.queue_len(),
            queue_capacity: self.queue_capacity,
            dropped: self.dropped(),
        }
    }
}

async fn execute_task(pipeline: &TxnPipeline, perf: &PerfMonitor, task: TxnTask) {
    let started = Instant::now();
    let queue_wait_ms = started.duration_since(task.scheduled_at).as_secs_f64() * 1000.0;

    match pipeline.generate_auto().await {
        Ok(txn) => {
            let finished = Instant::now();
            let total_ms = finished.duration_since(task.scheduled_at).as_secs_f64() * 1000.0;
            let exec_ms = finished.duration_since(started).as_secs_f64() * 1000.0;

            perf.record_transaction_completed(TxnLatency {
                total_ms,
                exec_ms,
                queue_wait_ms,
                db_ms: txn.db_ms,
                fraud_submit_ms: txn.fraud_submit_ms,
            });

            if total_ms > 1000.0 {
                info!(
                    txn_id = %txn.txn_id,
                    total_ms,
                    queue_wait_ms,
                    db_ms = txn.db_ms,
                    fraud_submit_ms = txn.fraud_submit_ms,
                    "High latency transaction"
                );
            } else if queue_wait_ms > 500.0 {
                info!(txn_id = %txn.txn_id, queue_wait_ms, total_ms, "High queue wait");
            }
        }
        Err(e) => {
            perf.record_transaction_failed();
            warn!(error = %e, "Transaction pipeline failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_txn_error_display() {
        assert_eq!(
            TxnError::AccountNotFound("acct-1".to_string()).to_string(),
            "account acct-1 not found"
        );
        assert_eq!(
            TxnError::SameAccount.to_string(),
            "source and destination accounts cannot be the same"
        );
    }

    #[test]
    fn test_pool_status_before_start() {
        // Status must be readable without a runtime or a started pool.
        let status = PoolStatus {
            pool_size: 128,
            running: false,
            queue_size: 0,
            queue_capacity: 1024,
            dropped: 0,
        };
        let json = serde_json::to_string(&status).unwrap();
        assert!(json.contains("\"pool_size\":128"));
    }
}
