//! Graph client: typed operations over the remote property graph.
//!
//! The pipeline depends on the [`GraphOps`] seam; the production
//! implementation ([`client::GraphClient`]) speaks Gremlin over pooled
//! websockets, tests substitute an in-memory graph.

pub mod admin;
pub mod client;
pub mod error;
pub mod projection;
pub mod protocol;

pub use admin::{poll_bulk_load, BulkLoadHandle, BulkLoadStatus, GraphSummary};
pub use client::GraphClient;
pub use error::GraphError;
pub use projection::{Projection, ProjectionBucket, ProjectionResult, ProjectionValue, Step};

use async_trait::async_trait;

use crate::models::{EdgeRecord, ElementKind, FraudAnnotation, TransactsProps};

/// Operations the pipeline issues against the graph.
///
/// All methods are safe to call concurrently; the production client
/// multiplexes over a connection pool. No method retries: failures carry
/// a [`GraphError`] classification and callers decide.
#[async_trait]
pub trait GraphOps: Send + Sync {
    /// Create one `TRANSACTS` edge and return the graph-assigned edge id.
    /// Idempotency is the caller's concern via the supplied `txn_id`.
    async fn add_transacts_edge(
        &self,
        from: &str,
        to: &str,
        props: &TransactsProps,
    ) -> Result<String, GraphError>;

    /// Write the merged fraud annotation onto an existing edge.
    async fn annotate_edge(
        &self,
        edge_id: &str,
        annotation: &FraudAnnotation,
    ) -> Result<(), GraphError>;

    /// Run a named multi-bucket projection rooted at an edge, one
    /// round-trip.
    async fn project_edge(
        &self,
        edge_id: &str,
        projection: &Projection,
    ) -> Result<ProjectionResult, GraphError>;

    /// Read an edge back with all properties and any annotation.
    async fn edge_properties(&self, edge_id: &str) -> Result<EdgeRecord, GraphError>;

    async fn list_account_ids(&self) -> Result<Vec<String>, GraphError>;

    async fn account_exists(&self, account_id: &str) -> Result<bool, GraphError>;

    async fn count_by_label(&self, kind: ElementKind, label: &str) -> Result<u64, GraphError>;

    async fn summarize_graph(&self) -> Result<GraphSummary, GraphError>;

    /// Drop every edge with the given label; returns how many were
    /// counted beforehand. Runs with an extended evaluation budget.
    async fn drop_all_edges_by_label(&self, label: &str) -> Result<u64, GraphError>;

    async fn set_account_flag(&self, account_id: &str, flagged: bool) -> Result<(), GraphError>;

    async fn flagged_account_ids(&self) -> Result<Vec<String>, GraphError>;

    /// Kick off a CSV bulk load; returns immediately with a handle to
    /// poll via [`GraphOps::bulk_load_status`].
    async fn bulk_load_start(
        &self,
        vertices_dir: &str,
        edges_dir: &str,
    ) -> Result<BulkLoadHandle, GraphError>;

    async fn bulk_load_status(&self, handle: &BulkLoadHandle)
        -> Result<BulkLoadStatus, GraphError>;
}
