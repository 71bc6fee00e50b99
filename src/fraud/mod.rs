//! Fraud evaluation: the RT1/RT2/RT3 rules and the service that runs
//! them per edge.

pub mod rules;
pub mod service;
pub mod types;

pub use service::{EvalOutcome, FraudService, RuleStates, SubmitError};
pub use types::{FlaggedConnection, RuleDetails, RuleId, RuleVerdict, RULE_ORDER};
