// =============================================================================
// RiskGovernor — multi-gate capital protection
// =============================================================================
//
// Gates run in a fixed order and short-circuit (§4.10): kill_switch always
// runs first and strictly dominates every other gate, even when other gates
// would also have failed. A tripped kill switch is only cleared by an
// explicit operator reset once its cooldown has elapsed.
// =============================================================================

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::RiskConfig;

/// Live account state refreshed from the executor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RiskState {
    pub account_value: f64,
    pub margin_used: f64,
    pub maintenance_margin: f64,
    pub total_exposure: f64,
    pub margin_ratio: f64,
    pub daily_pnl: f64,
    pub daily_starting_equity: f64,
    pub daily_drawdown_pct: f64,
}

/// Structured result of `run_all_checks`. A gate may pass while still
/// surfacing a warning (e.g. margin ratio approaching the liquidation
/// threshold, or drawdown approaching the kill-switch threshold) — `passed`
/// and `warnings` are independent, not a single three-way enum, so callers
/// that only care about blocking can ignore `warnings` entirely.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskCheckResult {
    pub passed: bool,
    pub blocked_by: Option<String>,
    pub reason: String,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl RiskCheckResult {
    fn pass() -> Self {
        RiskCheckResult { passed: true, blocked_by: None, reason: "passed".to_string(), warnings: Vec::new() }
    }

    fn block(gate: &str, reason: String) -> Self {
        RiskCheckResult { passed: false, blocked_by: Some(gate.to_string()), reason, warnings: Vec::new() }
    }

    fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings = warnings;
        self
    }
}

#[derive(Debug, Clone, Default)]
struct KillSwitch {
    tripped_at: Option<DateTime<Utc>>,
}

impl KillSwitch {
    fn active(&self, cooldown_s: i64, now: DateTime<Utc>) -> bool {
        match self.tripped_at {
            Some(ts) => now.signed_duration_since(ts).num_seconds() < cooldown_s,
            None => false,
        }
    }
}

/// Multi-gate risk governor. All mutable state lives behind `parking_lot`
/// locks so checks never block the shard-processing loop for long.
pub struct RiskGovernor {
    config: RwLock<RiskConfig>,
    state: RwLock<RiskState>,
    kill_switch: RwLock<KillSwitch>,
}

impl RiskGovernor {
    pub fn new(config: RiskConfig) -> Self {
        RiskGovernor {
            config: RwLock::new(config),
            state: RwLock::new(RiskState::default()),
            kill_switch: RwLock::new(KillSwitch::default()),
        }
    }

    pub fn update_state(&self, state: RiskState) {
        *self.state.write() = state;
    }

    pub fn state(&self) -> RiskState {
        self.state.read().clone()
    }

    pub fn is_kill_switch_active(&self, now: DateTime<Utc>) -> bool {
        let cooldown = self.config.read().kill_switch_cooldown_s;
        self.kill_switch.read().active(cooldown, now)
    }

    fn trip_kill_switch(&self, now: DateTime<Utc>) {
        self.kill_switch.write().tripped_at = Some(now);
        warn!("kill switch tripped");
    }

    /// Operator-initiated reset. No-op if the cooldown hasn't elapsed yet.
    pub fn reset_kill_switch(&self, now: DateTime<Utc>) -> bool {
        let cooldown = self.config.read().kill_switch_cooldown_s;
        let mut ks = self.kill_switch.write();
        if ks.active(cooldown, now) {
            return false;
        }
        ks.tripped_at = None;
        info!("kill switch reset by operator");
        true
    }

    /// Evaluate every gate against `proposed_size` (notional) for a new
    /// position, in strict order, short-circuiting on the first failure.
    pub fn run_all_checks(&self, proposed_size: f64, now: DateTime<Utc>) -> RiskCheckResult {
        let config = self.config.read().clone();
        let state = self.state.read().clone();

        if self.is_kill_switch_active(now) {
            return RiskCheckResult::block(
                "kill_switch",
                "KILL SWITCH active — trading halted until operator reset".to_string(),
            );
        }

        if state.account_value < config.min_equity_floor {
            return RiskCheckResult::block(
                "equity_floor",
                format!(
                    "account value {:.2} below equity floor {:.2}",
                    state.account_value, config.min_equity_floor
                ),
            );
        }

        if state.margin_ratio < config.liquidation_distance_min {
            return RiskCheckResult::block(
                "liquidation_distance",
                format!(
                    "liquidation distance {:.2} below minimum {:.2}",
                    state.margin_ratio, config.liquidation_distance_min
                ),
            );
        }

        let mut warnings = Vec::new();

        let liquidation_warn_threshold =
            config.liquidation_distance_min * config.liquidation_distance_warn_multiplier;
        if state.margin_ratio < liquidation_warn_threshold {
            warnings.push(format!(
                "liquidation distance {:.2} approaching minimum {:.2} (warn below {:.2})",
                state.margin_ratio, config.liquidation_distance_min, liquidation_warn_threshold
            ));
        }

        if state.daily_drawdown_pct > config.daily_drawdown_kill_pct {
            self.trip_kill_switch(now);
            return RiskCheckResult::block(
                "daily_drawdown",
                format!(
                    "daily drawdown {:.1}% exceeds {:.1}% — KILL SWITCH triggered",
                    state.daily_drawdown_pct * 100.0,
                    config.daily_drawdown_kill_pct * 100.0
                ),
            );
        }

        let daily_drawdown_warn_threshold =
            config.daily_drawdown_kill_pct * config.daily_drawdown_warn_fraction;
        if state.daily_drawdown_pct >= daily_drawdown_warn_threshold {
            warnings.push(format!(
                "daily drawdown {:.1}% at {:.0}% of kill threshold {:.1}%",
                state.daily_drawdown_pct * 100.0,
                config.daily_drawdown_warn_fraction * 100.0,
                config.daily_drawdown_kill_pct * 100.0
            ));
        }

        if state.account_value > 0.0 {
            let size_pct = proposed_size / state.account_value;
            if size_pct > config.max_position_size_pct {
                return RiskCheckResult::block(
                    "position_size",
                    format!(
                        "Position size {:.1}% exceeds cap {:.1}%",
                        size_pct * 100.0,
                        config.max_position_size_pct * 100.0
                    ),
                )
                .with_warnings(warnings);
            }

            let exposure_pct = (state.total_exposure + proposed_size) / state.account_value;
            if exposure_pct > config.max_total_exposure_pct {
                return RiskCheckResult::block(
                    "total_exposure",
                    format!(
                        "total exposure {:.1}% would exceed cap {:.1}%",
                        exposure_pct * 100.0,
                        config.max_total_exposure_pct * 100.0
                    ),
                )
                .with_warnings(warnings);
            }
        }

        RiskCheckResult::pass().with_warnings(warnings)
    }
}
