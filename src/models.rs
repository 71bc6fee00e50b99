//! Domain records for the fraud-detection pipeline.
//!
//! Typed vertex/edge shapes shared by the graph client, the fraud rules
//! and the transaction generator. Everything that crosses the graph
//! boundary is parsed into these once, at the client edge.

use serde::{Deserialize, Serialize};

/// Transaction types carried on `TRANSACTS` edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Transfer,
    Payment,
    Deposit,
    Withdrawal,
    Purchase,
}

/// Types drawn by the AUTO generator. `purchase` only enters the graph
/// via manual submission or bulk-loaded data.
pub const AUTO_TRANSACTION_TYPES: [TransactionType; 4] = [
    TransactionType::Transfer,
    TransactionType::Payment,
    TransactionType::Deposit,
    TransactionType::Withdrawal,
];

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transfer => "transfer",
            Self::Payment => "payment",
            Self::Deposit => "deposit",
            Self::Withdrawal => "withdrawal",
            Self::Purchase => "purchase",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "transfer" => Some(Self::Transfer),
            "payment" => Some(Self::Payment),
            "deposit" => Some(Self::Deposit),
            "withdrawal" => Some(Self::Withdrawal),
            "purchase" => Some(Self::Purchase),
            _ => None,
        }
    }
}

/// How a transaction entered the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GenType {
    #[serde(rename = "AUTO")]
    Auto,
    #[serde(rename = "MANUAL")]
    Manual,
}

impl GenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "AUTO",
            Self::Manual => "MANUAL",
        }
    }
}

/// Fraud verdict written back onto an evaluated edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FraudStatus {
    Clean,
    Review,
    Blocked,
}

impl FraudStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Clean => "clean",
            Self::Review => "review",
            Self::Blocked => "blocked",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "clean" => Some(Self::Clean),
            "review" => Some(Self::Review),
            "blocked" => Some(Self::Blocked),
            _ => None,
        }
    }
}

/// Properties written when a `TRANSACTS` edge is created.
///
/// `txn_id` is caller-supplied and globally unique; the graph assigns its
/// own edge id on write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactsProps {
    pub txn_id: String,
    /// Non-negative, rounded to cents before the write.
    pub amount: f64,
    pub currency: String,
    pub txn_type: TransactionType,
    pub method: String,
    pub location: String,
    /// ISO-8601.
    pub timestamp: String,
    pub status: String,
    pub gen_type: GenType,
}

impl TransactsProps {
    pub fn new(
        txn_id: String,
        amount: f64,
        txn_type: TransactionType,
        location: String,
        gen_type: GenType,
    ) -> Self {
        Self {
            txn_id,
            amount: (amount * 100.0).round() / 100.0,
            currency: "USD".to_string(),
            txn_type,
            method: "electronic_transfer".to_string(),
            location,
            timestamp: chrono::Utc::now().to_rfc3339(),
            status: "completed".to_string(),
            gen_type,
        }
    }
}

/// Fraud annotation merged from all triggering rules.
///
/// Presence of these properties on an edge is the sentinel for
/// "evaluated"; clean transactions carry none of them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FraudAnnotation {
    pub is_fraud: bool,
    /// Maximum score across triggering rules, 0..=100.
    pub fraud_score: u32,
    pub fraud_status: FraudStatus,
    pub eval_timestamp: String,
    /// One JSON string per triggering rule.
    pub details: Vec<String>,
}

/// A `TRANSACTS` edge read back from the graph, annotation included when
/// evaluation has completed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub edge_id: String,
    pub from_account: String,
    pub to_account: String,
    pub props: TransactsProps,
    pub annotation: Option<FraudAnnotation>,
}

/// Vertex or edge, for label-scoped counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    Vertex,
    Edge,
}

/// Summary of a recently produced transaction, kept in the generator's
/// bounded in-memory ring for status views.
#[derive(Debug, Clone, Serialize)]
pub struct TransactionSummary {
    pub txn_id: String,
    pub edge_id: String,
    pub from_account: String,
    pub to_account: String,
    pub amount: f64,
    pub txn_type: TransactionType,
    pub gen_type: GenType,
    pub timestamp: String,
}

/// Edge labels the pipeline touches.
pub const EDGE_LABEL_TRANSACTS: &str = "TRANSACTS";
pub const EDGE_LABEL_OWNS: &str = "OWNS";
pub const EDGE_LABEL_USES: &str = "USES";

/// Locations sampled for synthesized transactions.
pub const NORMAL_LOCATIONS: &[&str] = &[
    "New York, New York",
    "Los Angeles, California",
    "Chicago, Illinois",
    "Houston, Texas",
    "Phoenix, Arizona",
    "Philadelphia, Pennsylvania",
    "San Antonio, Texas",
    "San Diego, California",
    "Dallas, Texas",
    "San Jose, California",
    "Austin, Texas",
    "Jacksonville, Florida",
    "Fort Worth, Texas",
    "Columbus, Ohio",
    "Charlotte, North Carolina",
    "San Francisco, California",
    "Indianapolis, Indiana",
    "Seattle, Washington",
    "Denver, Colorado",
    "Washington, District of Columbia",
    "Boston, Massachusetts",
    "El Paso, Texas",
    "Nashville, Tennessee",
    "Detroit, Michigan",
    "Oklahoma City, Oklahoma",
    "Portland, Oregon",
    "Las Vegas, Nevada",
    "Memphis, Tennessee",
    "Louisville, Kentucky",
    "Baltimore, Maryland",
    "Milwaukee, Wisconsin",
    "Albuquerque, New Mexico",
    "Tucson, Arizona",
    "Fresno, California",
    "Sacramento, California",
    "Mesa, Arizona",
    "Kansas City, Missouri",
    "Atlanta, Georgia",
    "Long Beach, California",
    "Colorado Springs, Colorado",
    "Raleigh, North Carolina",
    "Miami, Florida",
    "Virginia Beach, Virginia",
    "Omaha, Nebraska",
    "Oakland, California",
    "Minneapolis, Minnesota",
    "Tulsa, Oklahoma",
    "Arlington, Texas",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_type_roundtrip() {
        for t in [
            TransactionType::Transfer,
            TransactionType::Payment,
            TransactionType::Deposit,
            TransactionType::Withdrawal,
            TransactionType::Purchase,
        ] {
            assert_eq!(TransactionType::parse(t.as_str()), Some(t));
        }
        assert_eq!(TransactionType::parse("refund"), None);
    }

    #[test]
    fn test_auto_types_exclude_purchase() {
        assert!(!AUTO_TRANSACTION_TYPES.contains(&TransactionType::Purchase));
        assert_eq!(AUTO_TRANSACTION_TYPES.len(), 4);
    }

    #[test]
    fn test_props_round_amount_to_cents() {
        let props = TransactsProps::new(
            "t-1".to_string(),
            123.456789,
            TransactionType::Transfer,
            "Austin, Texas".to_string(),
            GenType::Auto,
        );
        assert_eq!(props.amount, 123.46);
        assert_eq!(props.currency, "USD");
        assert_eq!(props.status, "completed");
    }

    #[test]
    fn test_gen_type_serde_uses_uppercase() {
        let json = serde_json::to_string(&GenType::Auto).unwrap();
        assert_eq!(json, "\"AUTO\"");
        let back: GenType = serde_json::from_str("\"MANUAL\"").unwrap();
        assert_eq!(back, GenType::Manual);
    }

    #[test]
    fn test_fraud_status_parse() {
        assert_eq!(FraudStatus::parse("blocked"), Some(FraudStatus::Blocked));
        assert_eq!(FraudStatus::parse("REVIEW"), None);
    }
}
