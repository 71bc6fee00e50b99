//! Pooled websocket client for the remote graph.
//!
//! One call, one connection: callers acquire a pooled connection per
//! operation and give it back on success. A failed call drops its
//! connection; the next caller dials fresh. Long-running admin work
//! (bulk load, drop-all) runs on dedicated connections so it never
//! starves the pool.

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info};
use uuid::Uuid;

use super::admin::{BulkLoadHandle, BulkLoadStatus, GraphSummary};
use super::error::GraphError;
use super::projection::{Projection, ProjectionResult};
use super::protocol::{unwrap_prop, value_to_id, value_to_u64, GremlinRequest, ResponseFrame};
use super::GraphOps;
use crate::config::GraphSettings;
use crate::models::{
    EdgeRecord, ElementKind, FraudAnnotation, FraudStatus, GenType, TransactionType,
    TransactsProps,
};

/// Server-side evaluation budget for bulk load and drop-all, matching
/// the loader's own recommendation.
const UNBOUNDED_EVAL_TIMEOUT_MS: u64 = 2_000_000;

/// Client-side read cap for dedicated long calls.
const LONG_READ_TIMEOUT: Duration = Duration::from_millis(UNBOUNDED_EVAL_TIMEOUT_MS + 60_000);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// One live websocket connection, single in-flight request at a time.
struct WsConn {
    stream: WsStream,
}

impl WsConn {
    async fn dial(url: &str, connect_timeout: Duration) -> Result<Self, GraphError> {
        let connect = connect_async(url);
        let (stream, response) = tokio::time::timeout(connect_timeout, connect)
            .await
            .map_err(|_| {
                GraphError::Unavailable(format!("connect timeout after {connect_timeout:?}"))
            })?
            .map_err(|e| GraphError::Unavailable(format!("websocket handshake failed: {e}")))?;

        debug!(status = %response.status(), "Graph websocket connected");
        Ok(Self { stream })
    }

    /// Send one request and collect response frames until a terminal
    /// status. The read timeout applies per frame.
    async fn call(
        &mut self,
        request: &GremlinRequest,
        read_timeout: Duration,
    ) -> Result<Vec<Value>, GraphError> {
        let frame = request.to_frame().to_string();
        self.stream
            .send(Message::Text(frame))
            .await
            .map_err(|e| GraphError::Transient(format!("send failed: {e}")))?;

        let expected_id = request.request_id.to_string();
        let mut data = Vec::new();

        loop {
            let message = tokio::time::timeout(read_timeout, self.stream.next())
                .await
                .map_err(|_| {
                    GraphError::Transient(format!("read timeout after {read_timeout:?}"))
                })?
                .ok_or_else(|| GraphError::Transient("connection closed mid-call".to_string()))?
                .map_err(|e| GraphError::Transient(format!("read failed: {e}")))?;

            match message {
                Message::Text(text) => {
                    let frame = ResponseFrame::parse(&text)?;
                    if frame.request_id != expected_id {
                        // Stale frame from an abandoned call on this
                        // connection; skip it.
                        continue;
                    }
                    if !frame.is_success() {
                        return Err(GraphError::from_status(frame.code, &frame.message));
                    }
                    let terminal = frame.is_terminal();
                    data.extend(frame.data);
                    if terminal {
                        return Ok(data);
                    }
                }
                Message::Ping(payload) => {
                    let _ = self.stream.send(Message::Pong(payload)).await;
                }
                Message::Close(_) => {
                    return Err(GraphError::Transient("server closed connection".to_string()));
                }
                _ => {}
            }
        }
    }
}

/// Fixed-size pool of lazily dialled connections.
struct ConnectionPool {
    url: String,
    connect_timeout: Duration,
    permits: Semaphore,
    idle: Mutex<Vec<WsConn>>,
}

impl ConnectionPool {
    fn new(url: String, pool_size: usize, connect_timeout: Duration) -> Self {
        Self {
            url,
            connect_timeout,
            permits: Semaphore::new(pool_size.max(1)),
            idle: Mutex::new(Vec::new()),
        }
    }

    async fn call(
        &self,
        request: &GremlinRequest,
        read_timeout: Duration,
    ) -> Result<Vec<Value>, GraphError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| GraphError::Fatal("connection pool closed".to_string()))?;

        let pooled = self.idle.lock().pop();
        let mut conn = match pooled {
            Some(conn) => conn,
            None => WsConn::dial(&self.url, self.connect_timeout).await?,
        };

        match conn.call(request, read_timeout).await {
            Ok(data) => {
                self.idle.lock().push(conn);
                Ok(data)
            }
            // A failed connection is not reused.
            Err(e) => Err(e),
        }
    }
}

/// Production [`GraphOps`] implementation.
pub struct GraphClient {
    settings: GraphSettings,
    pool: Arc<ConnectionPool>,
}

impl GraphClient {
    pub fn new(settings: GraphSettings) -> Self {
        let pool = Arc::new(ConnectionPool::new(
            settings.url(),
            settings.pool_size,
            settings.connect_timeout,
        ));
        Self { settings, pool }
    }

    /// Build a client and verify the endpoint answers a trivial
    /// traversal before anything depends on it.
    pub async fn connect(settings: GraphSettings) -> Result<Self, GraphError> {
        let client = Self::new(settings);
        client.verify_connectivity().await?;
        info!(url = %client.settings.url(), "Connected to graph service");
        Ok(client)
    }

    /// Liveness probe: `g.inject(0)` must come back as `0`.
    pub async fn verify_connectivity(&self) -> Result<(), GraphError> {
        let data = self
            .eval(GremlinRequest::new("g.inject(0)"))
            .await
            .map_err(|e| GraphError::Unavailable(e.to_string()))?;

        match data.first().and_then(value_to_u64) {
            Some(0) => Ok(()),
            other => Err(GraphError::Unavailable(format!(
                "liveness probe returned {other:?}"
            ))),
        }
    }

    async fn eval(&self, request: GremlinRequest) -> Result<Vec<Value>, GraphError> {
        self.pool.call(&request, self.settings.read_timeout).await
    }

    /// Run one request on a dedicated connection, outside the pool.
    async fn dedicated_call(&self, request: GremlinRequest) -> Result<Vec<Value>, GraphError> {
        let mut conn = WsConn::dial(&self.settings.url(), self.settings.connect_timeout).await?;
        conn.call(&request, LONG_READ_TIMEOUT).await
    }
}

#[async_trait::async_trait]
impl GraphOps for GraphClient {
    async fn add_transacts_edge(
        &self,
        from: &str,
        to: &str,
        props: &TransactsProps,
    ) -> Result<String, GraphError> {
        let script = "g.V(fromId).addE('TRANSACTS').to(__.V(toId))\
                      .property('txn_id', pTxnId)\
                      .property('amount', pAmount)\
                      .property('currency', pCurrency)\
                      .property('type', pType)\
                      .property('method', pMethod)\
                      .property('location', pLocation)\
                      .property('timestamp', pTimestamp)\
                      .property('status', pStatus)\
                      .property('gen_type', pGenType)\
                      .id()";
        let request = GremlinRequest::new(script)
            .bind("fromId", json!(from))
            .bind("toId", json!(to))
            .bind("pTxnId", json!(props.txn_id))
            .bind("pAmount", json!(props.amount))
            .bind("pCurrency", json!(props.currency))
            .bind("pType", json!(props.txn_type.as_str()))
            .bind("pMethod", json!(props.method))
            .bind("pLocation", json!(props.location))
            .bind("pTimestamp", json!(props.timestamp))
            .bind("pStatus", json!(props.status))
            .bind("pGenType", json!(props.gen_type.as_str()));

        let data = self.eval(request).await?;
        data.first().and_then(value_to_id).ok_or_else(|| {
            GraphError::NotFound(format!("edge write produced no id ({from} -> {to})"))
        })
    }

    async fn annotate_edge(
        &self,
        edge_id: &str,
        annotation: &FraudAnnotation,
    ) -> Result<(), GraphError> {
        let script = "g.E(edgeId)\
                      .property('is_fraud', pIsFraud)\
                      .property('fraud_score', pScore)\
                      .property('fraud_status', pFraudStatus)\
                      .property('eval_timestamp', pEvalTimestamp)\
                      .property('details', pDetails)\
                      .id()";
        let request = GremlinRequest::new(script)
            .bind("edgeId", json!(edge_id))
            .bind("pIsFraud", json!(annotation.is_fraud))
            .bind("pScore", json!(annotation.fraud_score))
            .bind("pFraudStatus", json!(annotation.fraud_status.as_str()))
            .bind("pEvalTimestamp", json!(annotation.eval_timestamp))
            .bind("pDetails", json!(annotation.details));

        let data = self.eval(request).await?;
        if data.is_empty() {
            return Err(GraphError::NotFound(format!("edge {edge_id} not found")));
        }
        Ok(())
    }

    async fn project_edge(
        &self,
        edge_id: &str,
        projection: &Projection,
    ) -> Result<ProjectionResult, GraphError> {
        let script = format!("g.E(edgeId){}", projection.to_gremlin_tail());
        let request = GremlinRequest::new(script).bind("edgeId", json!(edge_id));

        let mut data = self.eval(request).await?;
        match data.pop() {
            Some(row) => Ok(ProjectionResult::from_row(projection, row)),
            None => Err(GraphError::NotFound(format!("edge {edge_id} not found"))),
        }
    }

    async fn edge_properties(&self, edge_id: &str) -> Result<EdgeRecord, GraphError> {
        let script = "g.E(edgeId)\
                      .project('edge_id', 'from_id', 'to_id', 'props')\
                      .by(__.id())\
                      .by(__.outV().id())\
                      .by(__.inV().id())\
                      .by(__.valueMap())";
        let request = GremlinRequest::new(script).bind("edgeId", json!(edge_id));

        let mut data = self.eval(request).await?;
        match data.pop() {
            Some(row) => parse_edge_record(&row),
            None => Err(GraphError::NotFound(format!("edge {edge_id} not found"))),
        }
    }

    async fn list_account_ids(&self) -> Result<Vec<String>, GraphError> {
        let request = GremlinRequest::new("g.V().hasLabel('account').id()");
        let data = self.eval(request).await?;
        Ok(data.iter().filter_map(value_to_id).collect())
    }

    async fn account_exists(&self, account_id: &str) -> Result<bool, GraphError> {
        let request =
            GremlinRequest::new("g.V(accountId).count()").bind("accountId", json!(account_id));
        let data = self.eval(request).await?;
        Ok(data.first().and_then(value_to_u64).unwrap_or(0) > 0)
    }

    async fn count_by_label(&self, kind: ElementKind, label: &str) -> Result<u64, GraphError> {
        let script = match kind {
            ElementKind::Vertex => "g.V().hasLabel(pLabel).count()",
            ElementKind::Edge => "g.E().hasLabel(pLabel).count()",
        };
        let request = GremlinRequest::new(script).bind("pLabel", json!(label));
        let data = self.eval(request).await?;
        data.first()
            .and_then(value_to_u64)
            .ok_or_else(|| GraphError::Fatal(format!("count for label {label} missing")))
    }

    async fn summarize_graph(&self) -> Result<GraphSummary, GraphError> {
        let request = GremlinRequest::new("g.call('aerospike.graph.admin.metadata.summary')");
        let data = self.eval(request).await?;
        let text = data
            .first()
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .ok_or_else(|| GraphError::Fatal("summary call returned no data".to_string()))?;
        Ok(GraphSummary::parse(&text))
    }

    async fn drop_all_edges_by_label(&self, label: &str) -> Result<u64, GraphError> {
        let count = self.count_by_label(ElementKind::Edge, label).await?;

        let request = GremlinRequest::new("g.E().hasLabel(pLabel).drop()")
            .bind("pLabel", json!(label))
            .with_evaluation_timeout_ms(UNBOUNDED_EVAL_TIMEOUT_MS);
        self.dedicated_call(request).await?;

        info!(label, dropped = count, "Dropped edges by label");
        Ok(count)
    }

    async fn set_account_flag(&self, account_id: &str, flagged: bool) -> Result<(), GraphError> {
        let request = GremlinRequest::new("g.V(accountId).property('fraud_flag', pFlag).id()")
            .bind("accountId", json!(account_id))
            .bind("pFlag", json!(flagged));
        let data = self.eval(request).await?;
        if data.is_empty() {
            return Err(GraphError::NotFound(format!(
                "account {account_id} not found"
            )));
        }
        Ok(())
    }

    async fn flagged_account_ids(&self) -> Result<Vec<String>, GraphError> {
        let request =
            GremlinRequest::new("g.V().hasLabel('account').has('fraud_flag', true).id()");
        let data = self.eval(request).await?;
        Ok(data.iter().filter_map(value_to_id).collect())
    }

    async fn bulk_load_start(
        &self,
        vertices_dir: &str,
        edges_dir: &str,
    ) -> Result<BulkLoadHandle, GraphError> {
        let load_id = Uuid::new_v4().to_string();
        let script = "g.with('evaluationTimeout', 2000000)\
                      .call('aerospike.graphloader.admin.bulk-load.load')\
                      .with('aerospike.graphloader.vertices', verticesPath)\
                      .with('aerospike.graphloader.edges', edgesPath)";
        let request = GremlinRequest::new(script)
            .bind("verticesPath", json!(vertices_dir))
            .bind("edgesPath", json!(edges_dir))
            .with_evaluation_timeout_ms(UNBOUNDED_EVAL_TIMEOUT_MS);

        info!(
            load_id = %load_id,
            vertices = vertices_dir,
            edges = edges_dir,
            "Starting bulk load"
        );

        // The load call blocks server-side until the loader finishes, so
        // it runs detached on its own connection; progress is observed
        // through the status op.
        let url = self.settings.url();
        let connect_timeout = self.settings.connect_timeout;
        let task_load_id = load_id.clone();
        tokio::spawn(async move {
            match WsConn::dial(&url, connect_timeout).await {
                Ok(mut conn) => match conn.call(&request, LONG_READ_TIMEOUT).await {
                    Ok(_) => info!(load_id = %task_load_id, "Bulk load call returned"),
                    Err(e) => error!(load_id = %task_load_id, error = %e, "Bulk load call failed"),
                },
                Err(e) => {
                    error!(load_id = %task_load_id, error = %e, "Bulk load connection failed")
                }
            }
        });

        Ok(BulkLoadHandle { load_id })
    }

    async fn bulk_load_status(
        &self,
        handle: &BulkLoadHandle,
    ) -> Result<BulkLoadStatus, GraphError> {
        let request = GremlinRequest::new("g.call('aerospike.graphloader.admin.bulk-load.status')");
        let data = self.eval(request).await?;
        let value = data.first().ok_or_else(|| {
            GraphError::Transient(format!("no status for bulk load {}", handle.load_id))
        })?;
        Ok(BulkLoadStatus::from_value(value))
    }
}

/// Parse the edge-readback projection row into a typed record.
fn parse_edge_record(row: &Value) -> Result<EdgeRecord, GraphError> {
    let map = row
        .as_object()
        .ok_or_else(|| GraphError::Fatal("edge readback row is not a map".to_string()))?;

    let id_field = |key: &str| -> Result<String, GraphError> {
        map.get(key)
            .and_then(value_to_id)
            .ok_or_else(|| GraphError::Fatal(format!("edge readback missing {key}")))
    };

    let props = map
        .get("props")
        .and_then(Value::as_object)
        .ok_or_else(|| GraphError::Fatal("edge readback missing props".to_string()))?;

    let prop = |key: &str| props.get(key).map(unwrap_prop);
    let str_prop = |key: &str| -> Result<String, GraphError> {
        prop(key)
            .and_then(|v| v.as_str().map(str::to_string))
            .ok_or_else(|| GraphError::Fatal(format!("edge property {key} missing")))
    };

    let txn_type_raw = str_prop("type")?;
    let txn_type = TransactionType::parse(&txn_type_raw)
        .ok_or_else(|| GraphError::Fatal(format!("unknown transaction type {txn_type_raw}")))?;
    let gen_type = match str_prop("gen_type")?.as_str() {
        "AUTO" => GenType::Auto,
        "MANUAL" => GenType::Manual,
        other => return Err(GraphError::Fatal(format!("unknown gen_type {other}"))),
    };

    let record_props = TransactsProps {
        txn_id: str_prop("txn_id")?,
        amount: prop("amount")
            .and_then(|v| v.as_f64())
            .ok_or_else(|| GraphError::Fatal("edge property amount missing".to_string()))?,
        currency: str_prop("currency")?,
        txn_type,
        method: str_prop("method")?,
        location: str_prop("location")?,
        timestamp: str_prop("timestamp")?,
        status: str_prop("status")?,
        gen_type,
    };

    // Annotation properties exist only after evaluation.
    let annotation = if props.contains_key("is_fraud") {
        let status_raw = str_prop("fraud_status")?;
        Some(FraudAnnotation {
            is_fraud: prop("is_fraud").and_then(|v| v.as_bool()).unwrap_or(false),
            fraud_score: prop("fraud_score").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
            fraud_status: FraudStatus::parse(&status_raw)
                .ok_or_else(|| GraphError::Fatal(format!("unknown fraud_status {status_raw}")))?,
            eval_timestamp: str_prop("eval_timestamp")?,
            details: prop("details")
                .and_then(|v| match v {
                    Value::Array(items) => Some(
                        items
                            .iter()
                            .filter_map(|d| d.as_str().map(str::to_string))
                            .collect(),
                    ),
                    Value::String(s) => Some(vec![s]),
                    _ => None,
                })
                .unwrap_or_default(),
        })
    } else {
        None
    };

    Ok(EdgeRecord {
        edge_id: id_field("edge_id")?,
        from_account: id_field("from_id")?,
        to_account: id_field("to_id")?,
        props: record_props,
        annotation,
    })
}
