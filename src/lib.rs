//! FraudGraph Backend Library
//!
//! Real-time fraud-detection pipeline over a remote property graph:
//! a rate-controlled scheduler feeds a bounded worker pool that writes
//! transaction edges and hands them to the fraud rules, with a
//! non-blocking performance monitor across every stage.

pub mod config;
pub mod fraud;
pub mod generator;
pub mod graph;
pub mod models;
pub mod perf;
pub mod pipeline;

// Re-export the main entry points for binaries and tests.
pub use config::Settings;
pub use fraud::FraudService;
pub use generator::TransactionGenerator;
pub use graph::{GraphClient, GraphOps};
pub use perf::PerfMonitor;
