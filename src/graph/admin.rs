//! Admin surfaces: graph summary and bulk-load control.
//!
//! The summary call returns a formatted multi-line string; the bulk-load
//! status call returns a loosely keyed map. Both are parsed here into
//! typed records.
//!
//! Bulk-load sources follow the loader's CSV layout: per-label files
//! under `vertices/{users,accounts,devices}/` with a `~id, ~label,
//! <typed-property>...` header and under `edges/{ownership,usage}/`
//! with `~from, ~to, ~label, <typed-property>...`. Supported property
//! types in headers: `:String`, `:Int`, `:Double`, `:Boolean`, `:Date`.

use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

use super::error::GraphError;
use super::GraphOps;

/// Parsed output of `aerospike.graph.admin.metadata.summary`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GraphSummary {
    pub total_vertices: u64,
    pub total_edges: u64,
    pub users: u64,
    pub accounts: u64,
    pub devices: u64,
    pub owns_edges: u64,
    pub uses_edges: u64,
    pub transacts_edges: u64,
    pub vertex_counts_by_label: HashMap<String, u64>,
    pub edge_counts_by_label: HashMap<String, u64>,
    pub supernode_count: u64,
    pub supernode_counts_by_label: HashMap<String, u64>,
}

impl GraphSummary {
    /// Parse the formatted summary string, e.g.
    /// `Vertex count by label={user=1000, account=2500, device=1800}`.
    pub fn parse(text: &str) -> Self {
        let mut summary = Self::default();

        for line in text.lines() {
            let line = line.trim();
            if let Some(value) = line.strip_prefix("Total vertex count=") {
                summary.total_vertices = value.trim().parse().unwrap_or(0);
            } else if let Some(value) = line.strip_prefix("Vertex count by label=") {
                summary.vertex_counts_by_label = parse_label_counts(value);
                summary.users = *summary.vertex_counts_by_label.get("user").unwrap_or(&0);
                summary.accounts = *summary.vertex_counts_by_label.get("account").unwrap_or(&0);
                summary.devices = *summary.vertex_counts_by_label.get("device").unwrap_or(&0);
            } else if let Some(value) = line.strip_prefix("Total edge count=") {
                summary.total_edges = value.trim().parse().unwrap_or(0);
            } else if let Some(value) = line.strip_prefix("Edge count by label=") {
                summary.edge_counts_by_label = parse_label_counts(value);
                summary.owns_edges = *summary.edge_counts_by_label.get("OWNS").unwrap_or(&0);
                summary.uses_edges = *summary.edge_counts_by_label.get("USES").unwrap_or(&0);
                summary.transacts_edges =
                    *summary.edge_counts_by_label.get("TRANSACTS").unwrap_or(&0);
            } else if let Some(value) = line.strip_prefix("Total supernode count=") {
                summary.supernode_count = value.trim().parse().unwrap_or(0);
            } else if let Some(value) = line.strip_prefix("Supernode count by label=") {
                summary.supernode_counts_by_label = parse_label_counts(value);
            }
        }

        summary
    }
}

/// Parse `{label=count, label=count}`.
fn parse_label_counts(value: &str) -> HashMap<String, u64> {
    let mut counts = HashMap::new();
    let inner = value.trim().trim_start_matches('{').trim_end_matches('}');
    for item in inner.split(',') {
        if let Some((label, count)) = item.split_once('=') {
            if let Ok(count) = count.trim().parse() {
                counts.insert(label.trim().to_string(), count);
            }
        }
    }
    counts
}

/// Opaque token for one bulk-load run.
#[derive(Debug, Clone)]
pub struct BulkLoadHandle {
    pub load_id: String,
}

/// Status of the engine-side bulk loader.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BulkLoadStatus {
    pub step: String,
    pub complete: bool,
    pub status: String,
    pub elements_written: Option<u64>,
    pub complete_partitions_percentage: Option<f64>,
    pub duplicate_vertex_ids: Option<u64>,
    pub bad_entries: Option<u64>,
    pub bad_edges: Option<u64>,
    pub message: Option<String>,
    pub stacktrace: Option<String>,
}

impl BulkLoadStatus {
    /// Parse the status map the loader returns. Absent keys stay `None`;
    /// the three headline fields get conservative defaults.
    pub fn from_value(value: &Value) -> Self {
        let get_str = |key: &str| value.get(key).and_then(Value::as_str).map(str::to_string);
        let get_u64 = |key: &str| value.get(key).and_then(Value::as_u64);

        Self {
            step: get_str("step").unwrap_or_else(|| "unknown".to_string()),
            complete: value.get("complete").and_then(Value::as_bool).unwrap_or(false),
            status: get_str("status").unwrap_or_else(|| "unknown".to_string()),
            elements_written: get_u64("elements-written"),
            complete_partitions_percentage: value
                .get("complete-partitions-percentage")
                .and_then(Value::as_f64),
            duplicate_vertex_ids: get_u64("duplicate-vertex-ids"),
            bad_entries: get_u64("bad-entries"),
            bad_edges: get_u64("bad-edges"),
            message: get_str("message"),
            stacktrace: get_str("stacktrace"),
        }
    }

    pub fn is_error(&self) -> bool {
        self.status.eq_ignore_ascii_case("error") || self.stacktrace.is_some()
    }
}

/// Poll the loader until it reports completion.
///
/// Loader-side errors surface as `Fatal`; transient status-call failures
/// propagate to the caller, who may resume polling.
pub async fn poll_bulk_load(
    graph: &dyn GraphOps,
    handle: &BulkLoadHandle,
    interval: Duration,
) -> Result<BulkLoadStatus, GraphError> {
    loop {
        let status = graph.bulk_load_status(handle).await?;

        if status.is_error() {
            return Err(GraphError::Fatal(format!(
                "bulk load {} failed at step {}: {}",
                handle.load_id,
                status.step,
                status.message.as_deref().unwrap_or("no message")
            )));
        }

        if status.complete {
            tracing::info!(
                load_id = %handle.load_id,
                elements_written = ?status.elements_written,
                "Bulk load complete"
            );
            return Ok(status);
        }

        tracing::debug!(
            load_id = %handle.load_id,
            step = %status.step,
            pct = ?status.complete_partitions_percentage,
            "Bulk load in progress"
        );
        tokio::time::sleep(interval).await;
    }
}
