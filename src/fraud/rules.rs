//! The real-time fraud rules.
//!
//! Each rule is one projection over the transaction edge: build the step
//! program, issue it, read the buckets. A rule that does not trigger
//! returns `Ok(None)`; a transport failure surfaces as the error so the
//! service can count it without aborting the other rules.

use tracing::debug;

use super::types::{FlaggedConnection, RuleDetails, RuleId, RuleVerdict};
use crate::graph::{GraphError, GraphOps, Projection, ProjectionBucket, Step};
use crate::models::{FraudStatus, EDGE_LABEL_OWNS, EDGE_LABEL_TRANSACTS, EDGE_LABEL_USES};

/// Dispatch by rule id, used by the service's evaluation pass.
pub async fn run_rule(
    rule: RuleId,
    graph: &dyn GraphOps,
    edge_id: &str,
    txn_id: &str,
) -> Result<Option<RuleVerdict>, GraphError> {
    match rule {
        RuleId::Rt1 => run_rt1(graph, edge_id, txn_id).await,
        RuleId::Rt2 => run_rt2(graph, edge_id, txn_id).await,
        RuleId::Rt3 => run_rt3(graph, edge_id, txn_id).await,
    }
}

/// RT1: either endpoint of the transaction is itself flagged.
pub async fn run_rt1(
    graph: &dyn GraphOps,
    edge_id: &str,
    txn_id: &str,
) -> Result<Option<RuleVerdict>, GraphError> {
    let projection = Projection::new(vec![
        ProjectionBucket::new(
            "sender",
            vec![Step::OutV, Step::HasBool("fraud_flag", true), Step::Id],
        ),
        ProjectionBucket::new(
            "receiver",
            vec![Step::InV, Step::HasBool("fraud_flag", true), Step::Id],
        ),
    ]);

    let result = graph.project_edge(edge_id, &projection).await?;
    let sender = result.get("sender");
    let receiver = result.get("receiver");

    if sender.is_empty() && receiver.is_empty() {
        debug!(txn_id, "RT1 check passed: no flagged account connections");
        return Ok(None);
    }

    let mut flagged_connections = Vec::new();
    if let Some(id) = sender.first() {
        flagged_connections.push(FlaggedConnection::new(id, "sender", 100));
    }
    if let Some(id) = receiver.first() {
        flagged_connections.push(FlaggedConnection::new(id, "receiver", 100));
    }

    let score = 100;
    let reason = format!(
        "Connected to {} flagged account(s) - 'direct fraud'",
        flagged_connections.len()
    );
    let mut details = RuleDetails::base(RuleId::Rt1, score, reason.clone());
    details.flagged_connections = flagged_connections;

    Ok(Some(RuleVerdict {
        score,
        status: FraudStatus::Blocked,
        reason,
        details,
    }))
}

/// RT2: an endpoint has transacted with flagged accounts before.
/// Score grows with the number of distinct flagged partners and is
/// capped below RT1's direct-hit score.
pub async fn run_rt2(
    graph: &dyn GraphOps,
    edge_id: &str,
    txn_id: &str,
) -> Result<Option<RuleVerdict>, GraphError> {
    let partner_steps = |endpoint: Step| {
        vec![
            endpoint,
            Step::Both(EDGE_LABEL_TRANSACTS),
            Step::HasBool("fraud_flag", true),
            Step::Id,
            Step::Dedup,
            Step::Fold,
        ]
    };
    let projection = Projection::new(vec![
        ProjectionBucket::new("sender", partner_steps(Step::OutV)),
        ProjectionBucket::new("receiver", partner_steps(Step::InV)),
    ]);

    let result = graph.project_edge(edge_id, &projection).await?;
    let sender_partners = result.get("sender").ids();
    let receiver_partners = result.get("receiver").ids();

    if sender_partners.is_empty() && receiver_partners.is_empty() {
        debug!(txn_id, "RT2 check passed: no flagged transaction partners");
        return Ok(None);
    }

    let mut flagged_connections = Vec::new();
    for id in &sender_partners {
        flagged_connections.push(FlaggedConnection::new(id, "sender_txn_partner", 75));
    }
    for id in &receiver_partners {
        flagged_connections.push(FlaggedConnection::new(id, "receiver_txn_partner", 75));
    }

    let total_connections = flagged_connections.len();
    let score = score_rt2(total_connections);
    let status = if score >= 90 {
        FraudStatus::Blocked
    } else {
        FraudStatus::Review
    };
    let reason = format!(
        "Connected to {total_connections} flagged account(s) - transaction partners"
    );
    let mut details = RuleDetails::base(RuleId::Rt2, score, reason.clone());
    details.flagged_connections = flagged_connections;
    details.total_connections = Some(total_connections);

    Ok(Some(RuleVerdict {
        score,
        status,
        reason,
        details,
    }))
}

/// RT2 scoring: 75 base plus 5 per distinct flagged partner, capped at 95.
pub fn score_rt2(total_connections: usize) -> u32 {
    (75 + total_connections as u32 * 5).min(95)
}

/// RT3: the wider transaction network reaches a flagged device.
/// Traversal: endpoint owners, their accounts, those accounts'
/// transaction partners, the partners' owners, and finally the devices
/// those owners use.
pub async fn run_rt3(
    graph: &dyn GraphOps,
    edge_id: &str,
    txn_id: &str,
) -> Result<Option<RuleVerdict>, GraphError> {
    let network = [
        Step::BothV,
        Step::In(EDGE_LABEL_OWNS),
        Step::Out(EDGE_LABEL_OWNS),
        Step::Both(EDGE_LABEL_TRANSACTS),
        Step::In(EDGE_LABEL_OWNS),
    ];

    let mut accounts_steps = network.to_vec();
    accounts_steps.extend([Step::Id, Step::Dedup, Step::Fold]);

    let mut devices_steps = network.to_vec();
    devices_steps.extend([
        Step::Out(EDGE_LABEL_USES),
        Step::HasBool("fraud_flag", true),
        Step::Id,
        Step::Dedup,
        Step::Fold,
    ]);

    let projection = Projection::new(vec![
        ProjectionBucket::new("sender", vec![Step::OutV, Step::In(EDGE_LABEL_OWNS), Step::Id]),
        ProjectionBucket::new("receiver", vec![Step::InV, Step::In(EDGE_LABEL_OWNS), Step::Id]),
        ProjectionBucket::new("accounts", accounts_steps),
        ProjectionBucket::new("devices", devices_steps),
    ]);

    let result = graph.project_edge(edge_id, &projection).await?;
    let devices = result.get("devices").ids();

    if devices.is_empty() {
        debug!(txn_id, "RT3 check passed: no flagged devices in transaction network");
        return Ok(None);
    }

    let accounts_checked = result.get("accounts").ids().len();
    let score = 85;
    let reason = format!(
        "Transaction involves accounts connected to flagged devices in transaction network: {}",
        devices.join(", ")
    );
    let mut details = RuleDetails::base(RuleId::Rt3, score, reason.clone());
    details.flagged_devices = devices;
    details.sender_account = result.get("sender").first().map(str::to_string);
    details.receiver_account = result.get("receiver").first().map(str::to_string);
    details.connected_accounts_checked = Some(accounts_checked);

    Ok(Some(RuleVerdict {
        score,
        status: FraudStatus::Review,
        reason,
        details,
    }))
}
