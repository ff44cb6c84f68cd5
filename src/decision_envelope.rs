// =============================================================================
// Decision Envelope — auditable record of every consensus/risk decision
// =============================================================================
//
// Every asset evaluation flows through ConsensusDetector then RiskGovernor.
// The envelope captures the outcome of that pipeline so every trade/skip can
// be audited after the fact, independent of how the caller renders it.
// =============================================================================

use serde::Serialize;

use crate::consensus::{ConsensusDecision, GateResult};
use crate::risk::RiskCheckResult;

/// Complete auditable record of a single asset's consensus/risk evaluation.
#[derive(Debug, Clone, Serialize)]
pub struct DecisionEnvelope {
    /// Unique identifier for this decision (UUID v4).
    pub id: String,

    pub asset: String,

    /// "trade" or "skip".
    pub final_decision: String,

    /// Which gate produced a skip, if any ("consensus:<gate>" or "risk:<gate>").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocking_layer: Option<String>,

    /// Human-readable reason — the first failing gate's detail, or "passed".
    pub reason: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub direction: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry_ref: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eff_k: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ev_r: Option<f64>,

    pub created_at: String,
}

impl DecisionEnvelope {
    /// A decision that cleared consensus and the risk governor.
    pub fn trade(asset: impl Into<String>, decision: &ConsensusDecision) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            asset: asset.into(),
            final_decision: "trade".to_string(),
            blocking_layer: None,
            reason: "passed".to_string(),
            direction: Some(decision.direction.to_string()),
            entry_ref: Some(decision.entry_ref),
            eff_k: Some(decision.eff_k),
            ev_r: Some(decision.ev_r),
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// A consensus gate failed before a decision was ever produced.
    pub fn consensus_skip(asset: impl Into<String>, gate: &GateResult) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            asset: asset.into(),
            final_decision: "skip".to_string(),
            blocking_layer: Some(format!("consensus:{}", gate.name)),
            reason: gate.detail.clone(),
            direction: None,
            entry_ref: None,
            eff_k: None,
            ev_r: None,
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Consensus passed but the risk governor blocked execution.
    pub fn risk_skip(asset: impl Into<String>, decision: &ConsensusDecision, risk: &RiskCheckResult) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            asset: asset.into(),
            final_decision: "skip".to_string(),
            blocking_layer: risk.blocked_by.as_ref().map(|g| format!("risk:{g}")),
            reason: risk.reason.clone(),
            direction: Some(decision.direction.to_string()),
            entry_ref: Some(decision.entry_ref),
            eff_k: Some(decision.eff_k),
            ev_r: Some(decision.ev_r),
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}
