//! Transaction generator facade.
//!
//! Binds the graph client, the fraud service, the worker pool and the
//! scheduler into one control surface: start/stop sustained generation,
//! manual and one-shot transactions, and composed observability views.

pub mod rate_store;

pub use rate_store::{MaxRateStore, DEFAULT_MAX_RATE};

use arc_swap::ArcSwap;
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::Settings;
use crate::fraud::{FraudService, RuleId, RuleStates};
use crate::graph::{GraphError, GraphOps};
use crate::models::{TransactionSummary, TransactionType};
use crate::perf::{PerfMonitor, TransactionStats};
use crate::pipeline::{
    CreatedTransaction, PoolStatus, Scheduler, SchedulerStatus, TxnError, TxnPipeline, WorkerPool,
};

/// Boolean success plus a diagnostic, the start/stop contract.
#[derive(Debug, Clone, Serialize)]
pub struct ControlReport {
    pub success: bool,
    pub message: String,
}

impl ControlReport {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// Generator status view.
#[derive(Debug, Clone, Serialize)]
pub struct GeneratorStatus {
    pub status: &'static str,
    pub generation_rate: f64,
    pub max_generation_rate: u32,
    pub transaction_count: u64,
    pub account_cache_size: usize,
    pub start_time: Option<String>,
    pub recent_transactions: Vec<TransactionSummary>,
    pub rules: RuleStates,
}

/// Composite view for diagnosing where throughput is lost.
#[derive(Debug, Clone, Serialize)]
pub struct BottleneckAnalysis {
    pub performance: TransactionStats,
    pub pool: PoolStatus,
    pub scheduler: SchedulerStatus,
    pub fraud_queue_size: usize,
    pub fraud_annotation_failures: u64,
}

pub struct TransactionGenerator {
    graph: Arc<dyn GraphOps>,
    fraud: Arc<FraudService>,
    perf: Arc<PerfMonitor>,
    accounts: Arc<ArcSwap<Vec<String>>>,
    pipeline: Arc<TxnPipeline>,
    pool: Arc<WorkerPool>,
    scheduler: Scheduler,
    rate_store: MaxRateStore,
    generation_rate: RwLock<f64>,
    start_time: RwLock<Option<String>>,
}

impl TransactionGenerator {
    /// Wire the facade. Must run inside a tokio runtime (the fraud pool
    /// is already spawned; the worker pool spawns on start).
    pub fn new(
        graph: Arc<dyn GraphOps>,
        fraud: Arc<FraudService>,
        perf: Arc<PerfMonitor>,
        settings: &Settings,
    ) -> Arc<Self> {
        let accounts: Arc<ArcSwap<Vec<String>>> = Arc::new(ArcSwap::from_pointee(Vec::new()));
        let pipeline = TxnPipeline::new(
            Arc::clone(&graph),
            Arc::clone(&fraud),
            Arc::clone(&perf),
            Arc::clone(&accounts),
        );
        let pool = WorkerPool::new(
            Arc::clone(&pipeline),
            Arc::clone(&perf),
            settings.pipeline.txn_workers,
            settings.pipeline.txn_queue_capacity,
        );
        let scheduler = Scheduler::new(Arc::clone(&pool), Arc::clone(&perf));

        Arc::new(Self {
            graph,
            fraud,
            perf,
            accounts,
            pipeline,
            pool,
            scheduler,
            rate_store: MaxRateStore::open(&settings.generator.max_rate_store_path),
            generation_rate: RwLock::new(0.0),
            start_time: RwLock::new(None),
        })
    }

    /// Start sustained generation at `rate` TPS.
    ///
    /// Validation failures leave all state untouched: the cap is checked
    /// first, then the account snapshot is fetched and must hold at
    /// least two ids before anything is mutated.
    pub async fn start(&self, rate: f64, timestamp: &str) -> ControlReport {
        if self.scheduler.is_running() {
            warn!("Transaction generation is already running");
            return ControlReport::fail("transaction generation is already running");
        }
        if !(rate.is_finite() && rate > 0.0) {
            return ControlReport::fail(format!("generation rate must be positive, got {rate}"));
        }
        let max_rate = self.rate_store.get();
        if rate > max_rate as f64 {
            return ControlReport::fail(format!(
                "generation rate {rate} exceeds the max generation rate cap of {max_rate}"
            ));
        }

        let account_ids = match self.graph.list_account_ids().await {
            Ok(ids) => ids,
            Err(e) => {
                error!(error = %e, "Unable to start transaction generator");
                return ControlReport::fail(format!("unable to load accounts: {e}"));
            }
        };
        if account_ids.len() < 2 {
            return ControlReport::fail(format!(
                "need at least two accounts to generate transactions, found {}",
                account_ids.len()
            ));
        }

        self.accounts.store(Arc::new(account_ids));
        self.perf.reset_transaction_metrics();
        self.pool.start();

        if !self.scheduler.start(rate) {
            self.pool.shutdown(true).await;
            return ControlReport::fail("scheduler failed to start");
        }

        *self.generation_rate.write() = rate;
        *self.start_time.write() = Some(timestamp.to_string());

        info!(rate, "Transaction generation started");
        info!(target: "stats", rate, "START: generation started");
        ControlReport::ok(format!("generation started at {rate} transactions/second"))
    }

    /// Stop generation: scheduler first, then drain the worker pool.
    /// Counters survive; a stopped generator stays queryable.
    pub async fn stop(&self) -> ControlReport {
        if !self.scheduler.stop() {
            warn!("Transaction generation is not running");
            return ControlReport::fail("transaction generation is not running");
        }

        self.pool.shutdown(true).await;

        let total = self.pipeline.transaction_count();
        *self.generation_rate.write() = 0.0;

        info!(total_transactions = total, "Transaction generation stopped");
        info!(target: "stats", total_transactions = total, "STOP: generation stopped");
        ControlReport::ok(format!("generation stopped after {total} transactions"))
    }

    /// Tear the pipeline down without draining: scheduler threads are
    /// signalled, queued tasks are discarded, in-flight workers aborted.
    pub async fn force_stop(&self) -> ControlReport {
        if !self.scheduler.stop() {
            return ControlReport::fail("transaction generation is not running");
        }
        self.pool.shutdown(false).await;
        *self.generation_rate.write() = 0.0;
        warn!("Transaction generation force-stopped; queued tasks discarded");
        ControlReport::ok("generation force-stopped")
    }

    /// Manual transaction on the calling task, same write-then-submit
    /// path as the auto pipeline. Without `force`, both accounts must
    /// exist.
    pub async fn create_manual(
        &self,
        from: &str,
        to: &str,
        amount: f64,
        txn_type: TransactionType,
        force: bool,
    ) -> Result<CreatedTransaction, TxnError> {
        info!(from, to, amount, "Creating manual transaction");
        self.pipeline
            .create_transaction(
                from,
                to,
                amount,
                txn_type,
                crate::models::GenType::Manual,
                force,
            )
            .await
    }

    /// One-shot AUTO transaction, used by the REST surface. Refreshes
    /// the account cache when it is too small to pick from.
    pub async fn generate_one(&self) -> Result<CreatedTransaction, TxnError> {
        if self.accounts.load().len() < 2 {
            self.refresh_accounts()
                .await
                .map_err(TxnError::Graph)?;
        }
        self.pipeline.generate_auto().await
    }

    /// Re-read the account-ID snapshot, replacing the cache atomically.
    pub async fn refresh_accounts(&self) -> Result<usize, GraphError> {
        let ids = self.graph.list_account_ids().await?;
        let count = ids.len();
        self.accounts.store(Arc::new(ids));
        info!(accounts = count, "Account cache refreshed");
        Ok(count)
    }

    pub fn account_cache_size(&self) -> usize {
        self.accounts.load().len()
    }

    pub fn is_running(&self) -> bool {
        self.scheduler.is_running()
    }

    pub fn max_rate(&self) -> u32 {
        self.rate_store.get()
    }

    pub fn set_max_rate(&self, rate: u32) -> anyhow::Result<()> {
        self.rate_store.set(rate)
    }

    pub fn set_rule_enabled(&self, rule: RuleId, enabled: bool) {
        self.fraud.set_rule_enabled(rule, enabled);
    }

    pub fn rule_states(&self) -> RuleStates {
        self.fraud.rule_states()
    }

    pub fn status(&self) -> GeneratorStatus {
        GeneratorStatus {
            status: if self.is_running() { "running" } else { "stopped" },
            generation_rate: *self.generation_rate.read(),
            max_generation_rate: self.rate_store.get(),
            transaction_count: self.pipeline.transaction_count(),
            account_cache_size: self.account_cache_size(),
            start_time: self.start_time.read().clone(),
            recent_transactions: self.pipeline.recent_transactions(10),
            rules: self.fraud.rule_states(),
        }
    }

    /// Transaction-pipeline statistics with the live queue depth folded
    /// in. Readers may lag the raw events by one aggregator batch.
    pub fn performance_stats(&self) -> TransactionStats {
        self.perf.set_generation_state(
            self.is_running(),
            self.scheduler.target_tps(),
            self.pool.queue_len(),
        );
        self.perf.transaction_stats()
    }

    pub fn bottleneck_analysis(&self) -> BottleneckAnalysis {
        BottleneckAnalysis {
            performance: self.performance_stats(),
            pool: self.pool.status(),
            scheduler: self.scheduler.status(),
            fraud_queue_size: self.fraud.queue_len(),
            fraud_annotation_failures: self.fraud.annotation_failures(),
        }
    }

    /// Full teardown: stop generation if running, then shut the fraud
    /// pool down.
    pub async fn shutdown(&self) {
        if self.is_running() {
            let _ = self.stop().await;
        } else {
            self.pool.shutdown(true).await;
        }
        self.fraud.shutdown(false).await;
        info!("Transaction generator shutdown complete");
    }
}
