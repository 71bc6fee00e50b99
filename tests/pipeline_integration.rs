//! End-to-end pipeline tests against an in-memory graph.
//!
//! The mock implements the same `GraphOps` seam the websocket client
//! does, interpreting rule projections over a small property graph, so
//! the whole write-then-evaluate path runs for real: worker pool, fraud
//! pool, scheduler threads and perf monitor included.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use fraudgraph_backend::config::{GeneratorSettings, GraphSettings, PipelineSettings, Settings};
use fraudgraph_backend::fraud::{FraudService, RuleId};
use fraudgraph_backend::generator::TransactionGenerator;
use fraudgraph_backend::graph::{
    BulkLoadHandle, BulkLoadStatus, GraphError, GraphOps, GraphSummary, Projection,
    ProjectionResult, ProjectionValue, Step,
};
use fraudgraph_backend::models::{
    EdgeRecord, ElementKind, FraudAnnotation, FraudStatus, GenType, TransactionType,
    TransactsProps,
};
use fraudgraph_backend::perf::{MetricSeries, PerfMonitor};

const FLUSH: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------------
// In-memory graph
// ---------------------------------------------------------------------

#[derive(Debug, Clone)]
struct MockEdge {
    from: String,
    to: String,
    props: TransactsProps,
    annotation: Option<FraudAnnotation>,
}

#[derive(Default)]
struct MockState {
    /// account id -> fraud_flag
    accounts: HashMap<String, bool>,
    /// device id -> fraud_flag
    devices: HashMap<String, bool>,
    /// (user, account) OWNS pairs
    owns: Vec<(String, String)>,
    /// (user, device) USES pairs
    uses: Vec<(String, String)>,
    edges: HashMap<String, MockEdge>,
    edge_seq: u64,
    fail_writes: bool,
    fail_projections: bool,
}

#[derive(Default)]
struct MockGraph {
    state: Mutex<MockState>,
    write_delay: Option<Duration>,
}

impl MockGraph {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn with_write_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(MockState::default()),
            write_delay: Some(delay),
        })
    }

    fn add_account(&self, id: &str, flagged: bool) {
        self.state.lock().accounts.insert(id.to_string(), flagged);
    }

    fn add_device(&self, id: &str, flagged: bool) {
        self.state.lock().devices.insert(id.to_string(), flagged);
    }

    fn add_owns(&self, user: &str, account: &str) {
        self.state
            .lock()
            .owns
            .push((user.to_string(), account.to_string()));
    }

    fn add_uses(&self, user: &str, device: &str) {
        self.state
            .lock()
            .uses
            .push((user.to_string(), device.to_string()));
    }

    /// Insert a pre-existing TRANSACTS edge outside the pipeline.
    fn seed_edge(&self, from: &str, to: &str) -> String {
        let mut state = self.state.lock();
        state.edge_seq += 1;
        let id = format!("edge-{}", state.edge_seq);
        state.edges.insert(
            id.clone(),
            MockEdge {
                from: from.to_string(),
                to: to.to_string(),
                props: TransactsProps::new(
                    format!("seed-{id}"),
                    10.0,
                    TransactionType::Transfer,
                    "Austin, Texas".to_string(),
                    GenType::Manual,
                ),
                annotation: None,
            },
        );
        id
    }

    fn set_fail_writes(&self, fail: bool) {
        self.state.lock().fail_writes = fail;
    }

    fn set_fail_projections(&self, fail: bool) {
        self.state.lock().fail_projections = fail;
    }

    fn edge(&self, edge_id: &str) -> Option<MockEdge> {
        self.state.lock().edges.get(edge_id).cloned()
    }

    fn edge_count(&self) -> usize {
        self.state.lock().edges.len()
    }
}

impl MockState {
    fn flag_of(&self, id: &str) -> bool {
        self.accounts
            .get(id)
            .or_else(|| self.devices.get(id))
            .copied()
            .unwrap_or(false)
    }

    fn transacts_partners(&self, vertex: &str) -> Vec<String> {
        let mut partners = Vec::new();
        for edge in self.edges.values() {
            if edge.from == vertex {
                partners.push(edge.to.clone());
            } else if edge.to == vertex {
                partners.push(edge.from.clone());
            }
        }
        partners
    }

    /// Interpret one projection bucket's step program rooted at an edge.
    fn run_bucket(&self, edge: &MockEdge, steps: &[Step]) -> Vec<String> {
        let mut current: Vec<String> = Vec::new();
        let mut started = false;

        for step in steps {
            match step {
                Step::OutV => {
                    current = vec![edge.from.clone()];
                    started = true;
                }
                Step::InV => {
                    current = vec![edge.to.clone()];
                    started = true;
                }
                Step::BothV => {
                    current = vec![edge.from.clone(), edge.to.clone()];
                    started = true;
                }
                Step::In(label) => {
                    assert!(started, "traversal must start at an edge endpoint");
                    let mut next = Vec::new();
                    for v in &current {
                        match *label {
                            "OWNS" => {
                                for (user, account) in &self.owns {
                                    if account == v {
                                        next.push(user.clone());
                                    }
                                }
                            }
                            other => panic!("unexpected In({other})"),
                        }
                    }
                    current = next;
                }
                Step::Out(label) => {
                    let mut next = Vec::new();
                    for v in &current {
                        match *label {
                            "OWNS" => {
                                for (user, account) in &self.owns {
                                    if user == v {
                                        next.push(account.clone());
                                    }
                                }
                            }
                            "USES" => {
                                for (user, device) in &self.uses {
                                    if user == v {
                                        next.push(device.clone());
                                    }
                                }
                            }
                            other => panic!("unexpected Out({other})"),
                        }
                    }
                    current = next;
                }
                Step::Both(label) => {
                    assert_eq!(*label, "TRANSACTS", "only TRANSACTS is traversed both ways");
                    let mut next = Vec::new();
                    for v in &current {
                        next.extend(self.transacts_partners(v));
                    }
                    current = next;
                }
                Step::HasBool(key, expected) => {
                    assert_eq!(*key, "fraud_flag");
                    current.retain(|id| self.flag_of(id) == *expected);
                }
                Step::Id => {}
                Step::Dedup => {
                    let mut seen = Vec::new();
                    current.retain(|id| {
                        if seen.contains(id) {
                            false
                        } else {
                            seen.push(id.clone());
                            true
                        }
                    });
                }
                Step::Fold => {}
            }
        }

        current
    }
}

#[async_trait]
impl GraphOps for MockGraph {
    async fn add_transacts_edge(
        &self,
        from: &str,
        to: &str,
        props: &TransactsProps,
    ) -> Result<String, GraphError> {
        if let Some(delay) = self.write_delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock();
        if state.fail_writes {
            return Err(GraphError::Transient("simulated write failure".into()));
        }
        if !state.accounts.contains_key(from) {
            return Err(GraphError::NotFound(format!("account {from} not found")));
        }
        if !state.accounts.contains_key(to) {
            return Err(GraphError::NotFound(format!("account {to} not found")));
        }

        state.edge_seq += 1;
        let id = format!("edge-{}", state.edge_seq);
        state.edges.insert(
            id.clone(),
            MockEdge {
                from: from.to_string(),
                to: to.to_string(),
                props: props.clone(),
                annotation: None,
            },
        );
        Ok(id)
    }

    async fn annotate_edge(
        &self,
        edge_id: &str,
        annotation: &FraudAnnotation,
    ) -> Result<(), GraphError> {
        let mut state = self.state.lock();
        match state.edges.get_mut(edge_id) {
            Some(edge) => {
                edge.annotation = Some(annotation.clone());
                Ok(())
            }
            None => Err(GraphError::NotFound(format!("edge {edge_id} not found"))),
        }
    }

    async fn project_edge(
        &self,
        edge_id: &str,
        projection: &Projection,
    ) -> Result<ProjectionResult, GraphError> {
        let state = self.state.lock();
        if state.fail_projections {
            return Err(GraphError::Transient("simulated projection failure".into()));
        }
        let edge = state
            .edges
            .get(edge_id)
            .ok_or_else(|| GraphError::NotFound(format!("edge {edge_id} not found")))?;

        let mut result = ProjectionResult::default();
        for bucket in &projection.buckets {
            let ids = state.run_bucket(edge, &bucket.steps);
            let value = if bucket.is_folded() {
                ProjectionValue::Many(ids)
            } else {
                match ids.into_iter().next() {
                    Some(id) => ProjectionValue::One(id),
                    None => ProjectionValue::Absent,
                }
            };
            result.insert(bucket.name, value);
        }
        Ok(result)
    }

    async fn edge_properties(&self, edge_id: &str) -> Result<EdgeRecord, GraphError> {
        let state = self.state.lock();
        let edge = state
            .edges
            .get(edge_id)
            .ok_or_else(|| GraphError::NotFound(format!("edge {edge_id} not found")))?;
        Ok(EdgeRecord {
            edge_id: edge_id.to_string(),
            from_account: edge.from.clone(),
            to_account: edge.to.clone(),
            props: edge.props.clone(),
            annotation: edge.annotation.clone(),
        })
    }

    async fn list_account_ids(&self) -> Result<Vec<String>, GraphError> {
        let state = self.state.lock();
        let mut ids: Vec<String> = state.accounts.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    async fn account_exists(&self, account_id: &str) -> Result<bool, GraphError> {
        Ok(self.state.lock().accounts.contains_key(account_id))
    }

    async fn count_by_label(&self, kind: ElementKind, label: &str) -> Result<u64, GraphError> {
        let state = self.state.lock();
        let count = match (kind, label) {
            (ElementKind::Vertex, "account") => state.accounts.len(),
            (ElementKind::Vertex, "device") => state.devices.len(),
            (ElementKind::Edge, "TRANSACTS") => state.edges.len(),
            (ElementKind::Edge, "OWNS") => state.owns.len(),
            (ElementKind::Edge, "USES") => state.uses.len(),
            _ => 0,
        };
        Ok(count as u64)
    }

    async fn summarize_graph(&self) -> Result<GraphSummary, GraphError> {
        let state = self.state.lock();
        Ok(GraphSummary {
            accounts: state.accounts.len() as u64,
            devices: state.devices.len() as u64,
            total_edges: (state.edges.len() + state.owns.len() + state.uses.len()) as u64,
            transacts_edges: state.edges.len() as u64,
            ..GraphSummary::default()
        })
    }

    async fn drop_all_edges_by_label(&self, label: &str) -> Result<u64, GraphError> {
        let mut state = self.state.lock();
        if label == "TRANSACTS" {
            let count = state.edges.len() as u64;
            state.edges.clear();
            Ok(count)
        } else {
            Ok(0)
        }
    }

    async fn set_account_flag(&self, account_id: &str, flagged: bool) -> Result<(), GraphError> {
        let mut state = self.state.lock();
        match state.accounts.get_mut(account_id) {
            Some(flag) => {
                *flag = flagged;
                Ok(())
            }
            None => Err(GraphError::NotFound(format!(
                "account {account_id} not found"
            ))),
        }
    }

    async fn flagged_account_ids(&self) -> Result<Vec<String>, GraphError> {
        let state = self.state.lock();
        let mut ids: Vec<String> = state
            .accounts
            .iter()
            .filter(|(_, flagged)| **flagged)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn bulk_load_start(
        &self,
        _vertices_dir: &str,
        _edges_dir: &str,
    ) -> Result<BulkLoadHandle, GraphError> {
        Ok(BulkLoadHandle {
            load_id: "mock-load".to_string(),
        })
    }

    async fn bulk_load_status(
        &self,
        _handle: &BulkLoadHandle,
    ) -> Result<BulkLoadStatus, GraphError> {
        Ok(BulkLoadStatus {
            step: "done".to_string(),
            complete: true,
            status: "completed".to_string(),
            ..BulkLoadStatus::default()
        })
    }
}

// ---------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------

fn test_settings(dir: &tempfile::TempDir) -> Settings {
    Settings {
        graph: GraphSettings::default(),
        pipeline: PipelineSettings {
            txn_workers: 4,
            txn_queue_capacity: 64,
            fraud_workers: 4,
            fraud_queue_capacity: 64,
        },
        generator: GeneratorSettings {
            max_rate_store_path: dir
                .path()
                .join("max_rate.json")
                .to_string_lossy()
                .into_owned(),
            auto_load_data: false,
            bulk_vertices_dir: String::new(),
            bulk_edges_dir: String::new(),
        },
    }
}

struct Stack {
    generator: Arc<TransactionGenerator>,
    perf: Arc<PerfMonitor>,
    _dir: tempfile::TempDir,
}

fn build_stack(graph: Arc<MockGraph>) -> Stack {
    let dir = tempfile::tempdir().expect("tempdir");
    build_stack_with(graph, test_settings(&dir), dir)
}

fn build_stack_with(graph: Arc<MockGraph>, settings: Settings, dir: tempfile::TempDir) -> Stack {
    let graph: Arc<dyn GraphOps> = graph;
    let perf = PerfMonitor::new();
    let fraud = FraudService::new(
        Arc::clone(&graph),
        Arc::clone(&perf),
        settings.pipeline.fraud_workers,
        settings.pipeline.fraud_queue_capacity,
    );
    let generator = TransactionGenerator::new(graph, fraud, Arc::clone(&perf), &settings);
    Stack {
        generator,
        perf,
        _dir: dir,
    }
}

/// Two clean accounts, nothing else.
fn two_clean_accounts(graph: &MockGraph) {
    graph.add_account("A1", false);
    graph.add_account("A2", false);
}

// ---------------------------------------------------------------------
// Scenario A: clean transaction
// ---------------------------------------------------------------------

#[tokio::test]
async fn clean_manual_transaction_gets_no_annotation() {
    let graph = MockGraph::new();
    two_clean_accounts(&graph);
    let stack = build_stack(Arc::clone(&graph));

    let txn = stack
        .generator
        .create_manual("A1", "A2", 123.45, TransactionType::Transfer, false)
        .await
        .expect("manual transaction");

    assert_eq!(txn.from_account, "A1");
    assert_eq!(txn.to_account, "A2");
    assert!(txn.fraud_submitted);

    let outcome = txn.eval.expect("eval handle").await.expect("evaluation ran");
    assert!(outcome.triggered.is_empty());
    assert!(outcome.annotation.is_none());
    assert_eq!(outcome.rule_failures, 0);

    // Round-trip: the edge carries exactly what was sent, no fraud props.
    let record = graph
        .edge_properties(&txn.edge_id)
        .await
        .expect("edge readback");
    assert_eq!(record.props.amount, 123.45);
    assert_eq!(record.props.txn_type, TransactionType::Transfer);
    assert_eq!(record.props.gen_type, GenType::Manual);
    assert_eq!(record.props.currency, "USD");
    assert_eq!(record.props.txn_id, txn.txn_id);
    assert!(record.annotation.is_none());

    // Each rule recorded one successful sample.
    assert!(stack.perf.flush(FLUSH));
    for series in [MetricSeries::Rt1, MetricSeries::Rt2, MetricSeries::Rt3] {
        let stats = stack.perf.stats_for(series, 5);
        assert_eq!(stats.total_queries, 1, "series {}", stats.series);
        assert_eq!(stats.success_rate, 100.0);
    }
}

// ---------------------------------------------------------------------
// Scenario B: RT1 direct fraud
// ---------------------------------------------------------------------

#[tokio::test]
async fn flagged_sender_blocks_via_rt1() {
    let graph = MockGraph::new();
    graph.add_account("A1", true);
    graph.add_account("A2", false);
    let stack = build_stack(Arc::clone(&graph));

    let txn = stack
        .generator
        .create_manual("A1", "A2", 500.0, TransactionType::Payment, false)
        .await
        .expect("manual transaction");
    let outcome = txn.eval.expect("eval handle").await.expect("evaluation ran");

    assert!(outcome.triggered.contains(&RuleId::Rt1));
    let annotation = graph
        .edge(&txn.edge_id)
        .expect("edge exists")
        .annotation
        .expect("annotated");

    assert!(annotation.is_fraud);
    assert_eq!(annotation.fraud_score, 100);
    assert_eq!(annotation.fraud_status, FraudStatus::Blocked);

    let rt1_detail = annotation
        .details
        .iter()
        .map(|d| serde_json::from_str::<serde_json::Value>(d).expect("valid detail json"))
        .find(|d| d["rule"] == "RT1_SingleLevelFlaggedAccountRule")
        .expect("rt1 detail present");
    assert_eq!(rt1_detail["flagged_connections"][0]["account_id"], "A1");
    assert_eq!(rt1_detail["flagged_connections"][0]["role"], "sender");
    assert_eq!(rt1_detail["flagged_connections"][0]["fraud_score"], 100);
}

// ---------------------------------------------------------------------
// Scenario C: RT2 partner fraud
// ---------------------------------------------------------------------

#[tokio::test]
async fn flagged_partners_score_through_rt2() {
    let graph = MockGraph::new();
    two_clean_accounts(&graph);
    // A1's prior partners: two flagged, one clean. A2's: one flagged.
    for (id, flagged) in [("F1", true), ("F2", true), ("C1", false), ("F3", true)] {
        graph.add_account(id, flagged);
    }
    graph.seed_edge("A1", "F1");
    graph.seed_edge("F2", "A1");
    graph.seed_edge("A1", "C1");
    graph.seed_edge("A2", "F3");

    let stack = build_stack(Arc::clone(&graph));
    let txn = stack
        .generator
        .create_manual("A1", "A2", 750.0, TransactionType::Transfer, false)
        .await
        .expect("manual transaction");
    let outcome = txn.eval.expect("eval handle").await.expect("evaluation ran");

    assert_eq!(outcome.triggered, vec![RuleId::Rt2]);
    let annotation = outcome.annotation.expect("rt2 annotation");
    // min(75 + 5 * 3, 95) = 90, which crosses the blocked threshold.
    assert_eq!(annotation.fraud_score, 90);
    assert_eq!(annotation.fraud_status, FraudStatus::Blocked);

    let detail: serde_json::Value =
        serde_json::from_str(&annotation.details[0]).expect("valid detail json");
    assert_eq!(detail["rule"], "RT2_MultiLevelFlaggedAccountRule");
    assert_eq!(detail["total_connections"], 3);

    let roles: Vec<&str> = detail["flagged_connections"]
        .as_array()
        .expect("connections array")
        .iter()
        .map(|c| c["role"].as_str().unwrap())
        .collect();
    assert_eq!(
        roles
            .iter()
            .filter(|r| **r == "sender_txn_partner")
            .count(),
        2
    );
    assert_eq!(
        roles
            .iter()
            .filter(|r| **r == "receiver_txn_partner")
            .count(),
        1
    );
}

// ---------------------------------------------------------------------
// Scenario D: RT3 device network
// ---------------------------------------------------------------------

#[tokio::test]
async fn flagged_device_in_network_reviews_via_rt3() {
    let graph = MockGraph::new();
    two_clean_accounts(&graph);
    graph.add_account("A3", false);
    graph.add_owns("U1", "A1");
    graph.add_owns("U2", "A2");
    graph.add_owns("U3", "A3");
    // A2 has transacted with A3; A3's owner uses a flagged device.
    graph.seed_edge("A2", "A3");
    graph.add_device("D1", true);
    graph.add_uses("U3", "D1");

    let stack = build_stack(Arc::clone(&graph));
    let txn = stack
        .generator
        .create_manual("A1", "A2", 900.0, TransactionType::Withdrawal, false)
        .await
        .expect("manual transaction");
    let outcome = txn.eval.expect("eval handle").await.expect("evaluation ran");

    assert_eq!(outcome.triggered, vec![RuleId::Rt3]);
    let annotation = outcome.annotation.expect("rt3 annotation");
    assert_eq!(annotation.fraud_score, 85);
    assert_eq!(annotation.fraud_status, FraudStatus::Review);

    let detail: serde_json::Value =
        serde_json::from_str(&annotation.details[0]).expect("valid detail json");
    assert_eq!(detail["rule"], "RT3_FlaggedDeviceConnection");
    assert_eq!(detail["flagged_devices"][0], "D1");
    assert_eq!(detail["sender_account"], "U1");
    assert_eq!(detail["receiver_account"], "U2");
    assert!(detail["connected_accounts_checked"].as_u64().unwrap() >= 1);
}

// ---------------------------------------------------------------------
// Rule toggles
// ---------------------------------------------------------------------

#[tokio::test]
async fn disabling_rules_skips_them_without_touching_old_annotations() {
    let graph = MockGraph::new();
    graph.add_account("A1", true);
    graph.add_account("A2", false);
    let stack = build_stack(Arc::clone(&graph));

    // First edge gets the full RT1 annotation.
    let first = stack
        .generator
        .create_manual("A1", "A2", 100.0, TransactionType::Payment, false)
        .await
        .expect("first transaction");
    first.eval.expect("eval handle").await.expect("evaluated");
    let first_annotation = graph.edge(&first.edge_id).unwrap().annotation.unwrap();
    assert_eq!(first_annotation.fraud_score, 100);

    // Toggle everything off: subsequent evaluations write nothing.
    for rule in [RuleId::Rt1, RuleId::Rt2, RuleId::Rt3] {
        stack.generator.set_rule_enabled(rule, false);
    }
    let states = stack.generator.rule_states();
    assert!(!states.rt1 && !states.rt2 && !states.rt3);

    let second = stack
        .generator
        .create_manual("A1", "A2", 100.0, TransactionType::Payment, false)
        .await
        .expect("second transaction");
    let outcome = second.eval.expect("eval handle").await.expect("evaluated");
    assert!(outcome.triggered.is_empty());
    assert!(graph.edge(&second.edge_id).unwrap().annotation.is_none());

    // The earlier annotation is untouched.
    let unchanged = graph.edge(&first.edge_id).unwrap().annotation.unwrap();
    assert_eq!(unchanged.fraud_score, first_annotation.fraud_score);
    assert_eq!(unchanged.eval_timestamp, first_annotation.eval_timestamp);
}

#[tokio::test]
async fn rule_failure_does_not_abort_other_rules() {
    let graph = MockGraph::new();
    graph.add_account("A1", true);
    graph.add_account("A2", false);
    let stack = build_stack(Arc::clone(&graph));

    // All projections fail: every rule errors, nothing is annotated,
    // and the evaluation still completes.
    graph.set_fail_projections(true);
    let txn = stack
        .generator
        .create_manual("A1", "A2", 100.0, TransactionType::Payment, true)
        .await
        .expect("write still succeeds");
    let outcome = txn.eval.expect("eval handle").await.expect("evaluated");

    assert_eq!(outcome.rule_failures, 3);
    assert!(outcome.annotation.is_none());
    assert!(graph.edge(&txn.edge_id).unwrap().annotation.is_none());

    assert!(stack.perf.flush(FLUSH));
    let stats = stack.perf.stats_for(MetricSeries::Rt1, 5);
    assert_eq!(stats.total_queries, 1);
    assert_eq!(stats.success_rate, 0.0);
}

// ---------------------------------------------------------------------
// Manual validation and error paths
// ---------------------------------------------------------------------

#[tokio::test]
async fn manual_transaction_validates_accounts_and_self_transfer() {
    let graph = MockGraph::new();
    two_clean_accounts(&graph);
    let stack = build_stack(Arc::clone(&graph));

    let same = stack
        .generator
        .create_manual("A1", "A1", 50.0, TransactionType::Transfer, false)
        .await;
    assert!(same.is_err());

    let missing = stack
        .generator
        .create_manual("A1", "ghost", 50.0, TransactionType::Transfer, false)
        .await;
    match missing {
        Err(e) => assert!(e.to_string().contains("ghost")),
        Ok(_) => panic!("missing destination must be rejected"),
    }
    assert_eq!(graph.edge_count(), 0);

    let negative = stack
        .generator
        .create_manual("A1", "A2", -5.0, TransactionType::Transfer, false)
        .await;
    assert!(negative.is_err());
}

#[tokio::test]
async fn failed_write_counts_failed_and_skips_fraud() {
    let graph = MockGraph::new();
    two_clean_accounts(&graph);
    let stack = build_stack(Arc::clone(&graph));

    graph.set_fail_writes(true);
    let result = stack.generator.generate_one().await;
    assert!(result.is_err());
    assert_eq!(graph.edge_count(), 0);

    // No rule ran for the failed write.
    assert!(stack.perf.flush(FLUSH));
    assert_eq!(stack.perf.stats_for(MetricSeries::Rt1, 5).total_queries, 0);
}

// ---------------------------------------------------------------------
// Start/stop lifecycle
// ---------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn start_validations_reject_bad_rates_and_small_caches() {
    let graph = MockGraph::new();
    let stack = build_stack(Arc::clone(&graph));

    let zero = stack.generator.start(0.0, "t0").await;
    assert!(!zero.success);

    let negative = stack.generator.start(-3.0, "t0").await;
    assert!(!negative.success);

    // Over the persisted cap: the message names the cap.
    let over = stack.generator.start(1_000.0, "t0").await;
    assert!(!over.success);
    assert!(over.message.contains("50"), "message: {}", over.message);

    // One account is not enough; no state is mutated.
    graph.add_account("A1", false);
    let too_few = stack.generator.start(5.0, "t0").await;
    assert!(!too_few.success);
    assert_eq!(stack.generator.account_cache_size(), 0);
    assert!(!stack.generator.is_running());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stop_is_idempotent() {
    let graph = MockGraph::new();
    two_clean_accounts(&graph);
    let stack = build_stack(Arc::clone(&graph));

    assert!(!stack.generator.stop().await.success);

    let started = stack.generator.start(5.0, "t0").await;
    assert!(started.success, "{}", started.message);
    assert!(stack.generator.is_running());

    assert!(stack.generator.stop().await.success);
    assert!(!stack.generator.is_running());
    assert!(!stack.generator.stop().await.success);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn force_stop_discards_queued_work() {
    let graph = MockGraph::with_write_delay(Duration::from_millis(50));
    for i in 0..10 {
        graph.add_account(&format!("acct-{i}"), false);
    }

    let dir = tempfile::tempdir().expect("tempdir");
    let mut settings = test_settings(&dir);
    settings.pipeline.txn_workers = 2;
    let stack = build_stack_with(Arc::clone(&graph), settings, dir);

    assert!(stack.generator.start(20.0, "t0").await.success);
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert!(stack.generator.force_stop().await.success);
    assert!(!stack.generator.is_running());
    // Second force-stop is a no-op, same as stop.
    assert!(!stack.generator.force_stop().await.success);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn double_start_is_refused() {
    let graph = MockGraph::new();
    two_clean_accounts(&graph);
    let stack = build_stack(Arc::clone(&graph));

    assert!(stack.generator.start(5.0, "t0").await.success);
    let again = stack.generator.start(5.0, "t0").await;
    assert!(!again.success);

    stack.generator.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn max_rate_survives_facade_restart() {
    let graph = MockGraph::new();
    two_clean_accounts(&graph);
    let dir = tempfile::tempdir().expect("tempdir");
    let settings = test_settings(&dir);

    {
        let stack = build_stack_with(Arc::clone(&graph), settings.clone(), dir);
        assert_eq!(stack.generator.max_rate(), 50);
        stack.generator.set_max_rate(200).expect("persist cap");
        assert_eq!(stack.generator.max_rate(), 200);

        // A rate above the old default now passes validation.
        let report = stack.generator.start(100.0, "t0").await;
        assert!(report.success, "{}", report.message);
        stack.generator.stop().await;

        // Rebuild on the same store path: the cap survives.
        let dir2 = tempfile::tempdir().expect("tempdir");
        let mut settings2 = test_settings(&dir2);
        settings2.generator.max_rate_store_path = settings.generator.max_rate_store_path.clone();
        let restarted = build_stack_with(Arc::clone(&graph), settings2, dir2);
        assert_eq!(restarted.generator.max_rate(), 200);
    }
}

// ---------------------------------------------------------------------
// Sustained pacing and accounting
// ---------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn sustained_generation_schedules_and_completes() {
    let graph = MockGraph::new();
    for i in 0..20 {
        graph.add_account(&format!("acct-{i}"), false);
    }
    let stack = build_stack(Arc::clone(&graph));

    let report = stack.generator.start(20.0, "t0").await;
    assert!(report.success, "{}", report.message);

    // One scheduler thread for 20 TPS.
    let analysis = stack.generator.bottleneck_analysis();
    assert_eq!(analysis.scheduler.scheduler_workers, 1);
    assert!(analysis.pool.running);

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(stack.generator.stop().await.success);

    assert!(stack.perf.flush(FLUSH));
    let stats = stack.generator.performance_stats();

    // Roughly 30 tasks in 1.5s at 20 TPS; stay loose against CI jitter.
    assert!(
        stats.total_scheduled >= 10,
        "scheduled {}",
        stats.total_scheduled
    );
    assert!(stats.total_completed > 0);
    // Accounting invariant: nothing completes or fails unscheduled.
    assert!(stats.total_scheduled >= stats.total_completed + stats.total_failed);
    assert!(stats.success_rate > 50.0);
    assert!(graph.edge_count() > 0);

    // Every pipeline edge connects two distinct accounts.
    for i in 1..=graph.edge_count() {
        if let Some(edge) = graph.edge(&format!("edge-{i}")) {
            assert_ne!(edge.from, edge.to);
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn slow_graph_with_tiny_pool_drops_submissions() {
    let graph = MockGraph::with_write_delay(Duration::from_millis(100));
    for i in 0..10 {
        graph.add_account(&format!("acct-{i}"), false);
    }

    let dir = tempfile::tempdir().expect("tempdir");
    let mut settings = test_settings(&dir);
    settings.pipeline.txn_workers = 2;
    settings.pipeline.txn_queue_capacity = 4;
    let stack = build_stack_with(Arc::clone(&graph), settings, dir);

    stack.generator.set_max_rate(500).expect("raise cap");
    let report = stack.generator.start(100.0, "t0").await;
    assert!(report.success, "{}", report.message);

    tokio::time::sleep(Duration::from_millis(1200)).await;
    assert!(stack.generator.stop().await.success);

    assert!(stack.perf.flush(FLUSH));
    let stats = stack.generator.performance_stats();

    // The queue saturates: scheduled stays bounded, drops accumulate,
    // and completions plateau far below the target.
    assert!(
        stats.dropped_submissions > 0,
        "expected drops, got {:?}",
        stats.dropped_submissions
    );
    assert!(stats.total_completed < 100);
    assert!(stats.total_scheduled >= stats.total_completed + stats.total_failed);
}

// ---------------------------------------------------------------------
// Admin passthroughs
// ---------------------------------------------------------------------

#[tokio::test]
async fn flag_round_trip_and_edge_drop() {
    let graph = MockGraph::new();
    two_clean_accounts(&graph);
    let ops: Arc<dyn GraphOps> = Arc::clone(&graph) as Arc<dyn GraphOps>;

    ops.set_account_flag("A1", true).await.expect("flag");
    assert_eq!(ops.flagged_account_ids().await.unwrap(), vec!["A1"]);
    ops.set_account_flag("A1", false).await.expect("unflag");
    assert!(ops.flagged_account_ids().await.unwrap().is_empty());

    graph.seed_edge("A1", "A2");
    graph.seed_edge("A2", "A1");
    assert_eq!(
        ops.count_by_label(ElementKind::Edge, "TRANSACTS")
            .await
            .unwrap(),
        2
    );
    assert_eq!(ops.drop_all_edges_by_label("TRANSACTS").await.unwrap(), 2);
    assert_eq!(graph.edge_count(), 0);
}
