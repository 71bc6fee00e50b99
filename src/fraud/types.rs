//! Shared result shapes for the fraud rules.

use serde::{Deserialize, Serialize};

use crate::models::FraudStatus;
use crate::perf::MetricSeries;

/// The three real-time rules, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleId {
    Rt1,
    Rt2,
    Rt3,
}

/// Execution order for one evaluation pass. Rules run sequentially:
/// each is a single graph round-trip, and sequential execution keeps
/// back-pressure on the graph predictable.
pub const RULE_ORDER: [RuleId; 3] = [RuleId::Rt1, RuleId::Rt2, RuleId::Rt3];

impl RuleId {
    /// Stable rule identifier recorded in details payloads.
    pub fn id_str(&self) -> &'static str {
        match self {
            Self::Rt1 => "RT1_SingleLevelFlaggedAccountRule",
            Self::Rt2 => "RT2_MultiLevelFlaggedAccountRule",
            Self::Rt3 => "RT3_FlaggedDeviceConnection",
        }
    }

    pub fn short_name(&self) -> &'static str {
        match self {
            Self::Rt1 => "rt1",
            Self::Rt2 => "rt2",
            Self::Rt3 => "rt3",
        }
    }

    pub fn series(&self) -> MetricSeries {
        match self {
            Self::Rt1 => MetricSeries::Rt1,
            Self::Rt2 => MetricSeries::Rt2,
            Self::Rt3 => MetricSeries::Rt3,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "rt1" => Some(Self::Rt1),
            "rt2" => Some(Self::Rt2),
            "rt3" => Some(Self::Rt3),
            _ => None,
        }
    }
}

/// One flagged account surfaced by a rule.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FlaggedConnection {
    pub account_id: String,
    /// `sender` / `receiver` for direct hits, `sender_txn_partner` /
    /// `receiver_txn_partner` for one-hop partners.
    pub role: String,
    pub fraud_score: u32,
}

impl FlaggedConnection {
    pub fn new(account_id: impl Into<String>, role: &str, fraud_score: u32) -> Self {
        Self {
            account_id: account_id.into(),
            role: role.to_string(),
            fraud_score,
        }
    }
}

/// Rule-specific evidence, serialized to one JSON string per triggering
/// rule on the edge annotation. Field presence varies by rule; absent
/// fields are omitted from the payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleDetails {
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub flagged_connections: Vec<FlaggedConnection>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub total_connections: Option<usize>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub flagged_devices: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub sender_account: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub receiver_account: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub connected_accounts_checked: Option<usize>,
    pub detection_time: String,
    pub fraud_score: u32,
    pub reason: String,
    pub rule: String,
}

impl RuleDetails {
    pub fn base(rule: RuleId, fraud_score: u32, reason: String) -> Self {
        Self {
            flagged_connections: Vec::new(),
            total_connections: None,
            flagged_devices: Vec::new(),
            sender_account: None,
            receiver_account: None,
            connected_accounts_checked: None,
            detection_time: chrono::Utc::now().to_rfc3339(),
            fraud_score,
            reason,
            rule: rule.id_str().to_string(),
        }
    }
}

/// A triggered rule's verdict. Rules that do not trigger return no
/// verdict at all.
#[derive(Debug, Clone)]
pub struct RuleVerdict {
    /// 0..=100.
    pub score: u32,
    /// Only `Review` or `Blocked`; `Clean` edges carry no verdict.
    pub status: FraudStatus,
    pub reason: String,
    pub details: RuleDetails,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_ids_are_stable() {
        assert_eq!(RuleId::Rt1.id_str(), "RT1_SingleLevelFlaggedAccountRule");
        assert_eq!(RuleId::Rt2.id_str(), "RT2_MultiLevelFlaggedAccountRule");
        assert_eq!(RuleId::Rt3.id_str(), "RT3_FlaggedDeviceConnection");
    }

    #[test]
    fn test_rule_parse() {
        assert_eq!(RuleId::parse("rt2"), Some(RuleId::Rt2));
        assert_eq!(RuleId::parse("rt9"), None);
    }

    #[test]
    fn test_details_omit_absent_fields() {
        let details = RuleDetails::base(RuleId::Rt1, 100, "direct".to_string());
        let json = serde_json::to_string(&details).unwrap();
        assert!(!json.contains("total_connections"));
        assert!(!json.contains("flagged_devices"));
        assert!(json.contains("RT1_SingleLevelFlaggedAccountRule"));
    }

    #[test]
    fn test_details_roundtrip_with_connections() {
        let mut details = RuleDetails::base(RuleId::Rt2, 90, "partners".to_string());
        details.flagged_connections = vec![
            FlaggedConnection::new("acct-1", "sender_txn_partner", 75),
            FlaggedConnection::new("acct-2", "receiver_txn_partner", 75),
        ];
        details.total_connections = Some(2);

        let json = serde_json::to_string(&details).unwrap();
        let back: RuleDetails = serde_json::from_str(&json).unwrap();
        assert_eq!(back.flagged_connections, details.flagged_connections);
        assert_eq!(back.total_connections, Some(2));
    }
}
