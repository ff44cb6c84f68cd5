// =============================================================================
// SageError — the five error kinds the decision core can produce
// =============================================================================
//
// Providers never raise into consumers (ATR, funding, hold-time all degrade
// to a typed fallback with a `source` discriminator instead). This enum is
// for the paths that genuinely cannot continue: invariant violations in the
// episode state machine, risk blocks surfaced as structured skips, and
// startup failures that must abort the process.
// =============================================================================

use crate::consensus::GateResult;

#[derive(Debug, thiserror::Error)]
pub enum SageError {
    #[error("transient io error: {0}")]
    TransientIo(#[source] anyhow::Error),

    #[error("stale data: {detail}")]
    StaleData { detail: String },

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("risk blocked: {}", .0.detail)]
    RiskBlock(GateResult),

    #[error("fatal startup error: {0}")]
    FatalStartup(#[source] anyhow::Error),
}

pub type SageResult<T> = Result<T, SageError>;
