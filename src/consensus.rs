// =============================================================================
// ConsensusDetector — weighted supermajority + effective-K + EV gate
// =============================================================================
//
// Gates run in a fixed order (§4.9); the first one to fail produces the
// skip decision. Every gate, pass or fail, produces a `GateResult` so the
// caller can render uniform reasoning regardless of outcome.
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ConsensusConfig;
use crate::correlation::effective_k;
use crate::indicators::atr::AtrData;
use crate::types::{AtrSource, Direction};

/// Uniform pass/fail record for a single gate evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateResult {
    pub name: String,
    pub passed: bool,
    pub value: f64,
    pub threshold: f64,
    pub detail: String,
}

/// A live per-trader vote derived from that trader's currently open episode.
#[derive(Debug, Clone)]
pub struct LiveVote {
    pub address: String,
    pub direction: Direction,
    pub entry_vwap: f64,
    pub entry_ts: DateTime<Utc>,
    pub weight: f64,
}

/// Canonical consensus-vote weight (§9): notional-normalized, distinct from
/// the posterior-confidence trader weight used for scoring.
pub fn vote_weight(entry_notional: f64) -> f64 {
    (entry_notional / 100_000.0).min(1.0)
}

/// Venue-specific expected-value inputs for the final EV gate.
#[derive(Debug, Clone)]
pub struct EvInputs {
    pub expected_move_r: f64,
    pub fees_bps: f64,
    pub funding_bps: f64,
    pub slippage_bps: f64,
}

/// Output of a passing consensus evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusDecision {
    pub asset: String,
    pub direction: Direction,
    pub entry_ref: f64,
    pub stop_fraction: f64,
    pub eff_k: f64,
    pub ev_r: f64,
    pub contributing_addresses: Vec<String>,
}

/// Every gate evaluated, plus the decision if all passed.
pub struct ConsensusEvaluation {
    pub gates: Vec<GateResult>,
    pub decision: Result<ConsensusDecision, GateResult>,
}

fn majority_direction(votes: &[LiveVote]) -> (Direction, f64, f64) {
    let total: f64 = votes.iter().map(|v| v.weight).sum();
    let long_weight: f64 = votes.iter().filter(|v| v.direction == Direction::Long).map(|v| v.weight).sum();
    let short_weight = total - long_weight;
    if long_weight >= short_weight {
        (Direction::Long, long_weight, total)
    } else {
        (Direction::Short, short_weight, total)
    }
}

/// Evaluate consensus for `votes` on `asset`, returning every gate's result
/// and, if all passed, the emitted decision.
pub fn evaluate(
    asset: &str,
    votes: &[LiveVote],
    now: DateTime<Utc>,
    current_price: f64,
    atr: &AtrData,
    correlation: impl Fn(&str, &str) -> f64,
    ev: &EvInputs,
    config: &ConsensusConfig,
) -> ConsensusEvaluation {
    let mut gates = Vec::new();

    macro_rules! fail_here {
        ($gate:expr) => {{
            gates.push($gate.clone());
            return ConsensusEvaluation { gates, decision: Err($gate) };
        }};
    }

    // 1. min_traders
    let min_traders_gate = GateResult {
        name: "min_traders".into(),
        passed: votes.len() >= config.min_traders,
        value: votes.len() as f64,
        threshold: config.min_traders as f64,
        detail: format!("{} traders, need {}", votes.len(), config.min_traders),
    };
    if !min_traders_gate.passed {
        fail_here!(min_traders_gate);
    }
    gates.push(min_traders_gate);

    // 2. supermajority
    let (majority_dir, majority_weight, total_weight) = majority_direction(votes);
    let agreement = if total_weight > 0.0 { majority_weight / total_weight } else { 0.0 };
    let supermajority_gate = GateResult {
        name: "supermajority".into(),
        passed: agreement >= config.supermajority_threshold,
        value: agreement,
        threshold: config.supermajority_threshold,
        detail: format!(
            "{:.0}% agreement, need {:.0}%",
            agreement * 100.0,
            config.supermajority_threshold * 100.0
        ),
    };
    if !supermajority_gate.passed {
        fail_here!(supermajority_gate);
    }
    gates.push(supermajority_gate);

    let majority: Vec<&LiveVote> = votes.iter().filter(|v| v.direction == majority_dir).collect();
    let majority_addrs: Vec<String> = majority.iter().map(|v| v.address.clone()).collect();
    let majority_weights: Vec<f64> = majority.iter().map(|v| v.weight).collect();

    // 3. effective_K
    let eff_k = effective_k(&majority_weights, |i, j| correlation(&majority_addrs[i], &majority_addrs[j]));
    let eff_k_gate = GateResult {
        name: "effective_k".into(),
        passed: eff_k >= config.min_effective_k,
        value: eff_k,
        threshold: config.min_effective_k,
        detail: format!("effK {:.2}, need {:.2}", eff_k, config.min_effective_k),
    };
    if !eff_k_gate.passed {
        fail_here!(eff_k_gate);
    }
    gates.push(eff_k_gate);

    // 4. freshness
    let max_age_s = majority
        .iter()
        .map(|v| now.signed_duration_since(v.entry_ts).num_seconds())
        .max()
        .unwrap_or(0);
    let freshness_gate = GateResult {
        name: "freshness".into(),
        passed: max_age_s <= config.max_signal_age_s,
        value: max_age_s as f64,
        threshold: config.max_signal_age_s as f64,
        detail: format!("signal {max_age_s}s stale, max {}s", config.max_signal_age_s),
    };
    if !freshness_gate.passed {
        fail_here!(freshness_gate);
    }
    gates.push(freshness_gate);

    // weighted VWAP of majority entries
    let weight_sum: f64 = majority_weights.iter().sum();
    let w_vwap = if weight_sum > 0.0 {
        majority.iter().map(|v| v.entry_vwap * v.weight).sum::<f64>() / weight_sum
    } else {
        current_price
    };

    // 5. price_band
    let band_denom = atr.atr * atr.multiplier;
    let price_dev = if band_denom > 0.0 { (current_price - w_vwap).abs() / band_denom } else { f64::MAX };
    let price_band_gate = GateResult {
        name: "price_band".into(),
        passed: price_dev <= config.price_band_atr_fraction,
        value: price_dev,
        threshold: config.price_band_atr_fraction,
        detail: format!("price {price_dev:.2}x ATR band, need <= {:.2}x", config.price_band_atr_fraction),
    };
    if !price_band_gate.passed {
        fail_here!(price_band_gate);
    }
    gates.push(price_band_gate);

    // 6. atr_validity
    let atr_valid = !(config.strict_atr && atr.source == AtrSource::Fallback);
    let atr_validity_gate = GateResult {
        name: "atr_validity".into(),
        passed: atr_valid,
        value: if atr.source == AtrSource::Fallback { 0.0 } else { 1.0 },
        threshold: 1.0,
        detail: if atr_valid {
            format!("ATR source {:?}, strict={}", atr.source, config.strict_atr)
        } else {
            "ATR source is fallback while strict mode enabled".to_string()
        },
    };
    if !atr_validity_gate.passed {
        fail_here!(atr_validity_gate);
    }
    gates.push(atr_validity_gate);

    // 7. ev_gate
    let stop_fraction = atr.stop_fraction();
    let stop_bps = stop_fraction * 10_000.0;
    let cost_bps = ev.fees_bps + ev.funding_bps.abs() + ev.slippage_bps;
    let ev_r = ev.expected_move_r - (cost_bps / stop_bps);
    let ev_gate = GateResult {
        name: "ev_gate".into(),
        passed: ev_r >= config.min_ev_r,
        value: ev_r,
        threshold: config.min_ev_r,
        detail: format!("EV_R {ev_r:.2}, need >= {:.2}", config.min_ev_r),
    };
    if !ev_gate.passed {
        fail_here!(ev_gate);
    }
    gates.push(ev_gate);

    let decision = ConsensusDecision {
        asset: asset.to_string(),
        direction: majority_dir,
        entry_ref: w_vwap,
        stop_fraction,
        eff_k,
        ev_r,
        contributing_addresses: majority_addrs,
    };

    ConsensusEvaluation { gates, decision: Ok(decision) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AtrSource;
    use chrono::Duration;

    fn atr_data(atr: f64, multiplier: f64, source: AtrSource) -> AtrData {
        AtrData {
            asset: "BTC".into(),
            atr,
            atr_pct: 1.0,
            price: 50_000.0,
            multiplier,
            stop_distance_pct: 2.0,
            timestamp: Utc::now(),
            source,
        }
    }

    fn votes_for_scenario_3(now: DateTime<Utc>) -> Vec<LiveVote> {
        // 95% long agreement, weighted enough toward uniform that
        // effective_k clears the 2.0 gate at rho=0.3.
        let weights = [0.25, 0.25, 0.25, 0.20, 0.05];
        let directions = [
            Direction::Long,
            Direction::Long,
            Direction::Long,
            Direction::Long,
            Direction::Short,
        ];
        weights
            .iter()
            .zip(directions.iter())
            .enumerate()
            .map(|(i, (&w, &dir))| LiveVote {
                address: format!("0x{i}"),
                direction: dir,
                entry_vwap: 50_000.0,
                entry_ts: now,
                weight: w,
            })
            .collect()
    }

    #[test]
    fn scenario_3_consensus_pass() {
        let now = Utc::now();
        let votes = votes_for_scenario_3(now);
        let atr = atr_data(500.0, 2.0, AtrSource::Calculated);
        let ev = EvInputs {
            expected_move_r: 0.45,
            fees_bps: 5.0,
            funding_bps: 2.0,
            slippage_bps: 3.0,
        };
        let config = ConsensusConfig::default();
        let result = evaluate("BTC", &votes, now, 50_050.0, &atr, |_, _| 0.3, &ev, &config);
        assert!(result.decision.is_ok(), "expected pass, gates: {:?}", result.gates);
        let decision = result.decision.unwrap();
        assert_eq!(decision.direction, Direction::Long);
        assert!((decision.eff_k - 2.10).abs() < 0.1, "eff_k = {}", decision.eff_k);
    }

    #[test]
    fn scenario_4_consensus_skip_on_freshness() {
        let now = Utc::now();
        let mut votes = votes_for_scenario_3(now);
        votes[0].entry_ts = now - Duration::seconds(200);
        let atr = atr_data(500.0, 2.0, AtrSource::Calculated);
        let ev = EvInputs {
            expected_move_r: 0.45,
            fees_bps: 5.0,
            funding_bps: 2.0,
            slippage_bps: 3.0,
        };
        let config = ConsensusConfig::default();
        let result = evaluate("BTC", &votes, now, 50_050.0, &atr, |_, _| 0.3, &ev, &config);
        let err = result.decision.unwrap_err();
        assert_eq!(err.name, "freshness");
        assert!(err.detail.contains("200s stale"));
    }

    #[test]
    fn min_traders_gate_fails_first_when_too_few() {
        let now = Utc::now();
        let votes = vec![LiveVote {
            address: "0x0".into(),
            direction: Direction::Long,
            entry_vwap: 50_000.0,
            entry_ts: now,
            weight: 1.0,
        }];
        let atr = atr_data(500.0, 2.0, AtrSource::Calculated);
        let ev = EvInputs { expected_move_r: 1.0, fees_bps: 1.0, funding_bps: 1.0, slippage_bps: 1.0 };
        let config = ConsensusConfig::default();
        let result = evaluate("BTC", &votes, now, 50_000.0, &atr, |_, _| 0.0, &ev, &config);
        assert_eq!(result.decision.unwrap_err().name, "min_traders");
        assert_eq!(result.gates.len(), 1);
    }

    #[test]
    fn vote_weight_is_notional_normalized_and_capped() {
        assert_eq!(vote_weight(50_000.0), 0.5);
        assert_eq!(vote_weight(500_000.0), 1.0);
    }

    #[test]
    fn atr_validity_fails_with_fallback_detail_in_strict_mode() {
        let now = Utc::now();
        let votes = votes_for_scenario_3(now);
        let atr = atr_data(500.0, 2.0, AtrSource::Fallback);
        let ev = EvInputs { expected_move_r: 0.45, fees_bps: 5.0, funding_bps: 2.0, slippage_bps: 3.0 };
        let mut config = ConsensusConfig::default();
        config.strict_atr = true;
        let result = evaluate("BTC", &votes, now, 50_050.0, &atr, |_, _| 0.3, &ev, &config);
        let err = result.decision.unwrap_err();
        assert_eq!(err.name, "atr_validity");
        assert!(err.detail.contains("fallback"));
    }

    #[test]
    fn atr_validity_passes_with_accurate_detail_when_source_is_not_fallback() {
        let now = Utc::now();
        let votes = votes_for_scenario_3(now);
        let atr = atr_data(500.0, 2.0, AtrSource::Calculated);
        let ev = EvInputs { expected_move_r: 0.45, fees_bps: 5.0, funding_bps: 2.0, slippage_bps: 3.0 };
        let mut config = ConsensusConfig::default();
        config.strict_atr = true;
        let result = evaluate("BTC", &votes, now, 50_050.0, &atr, |_, _| 0.3, &ev, &config);
        assert!(result.decision.is_ok(), "expected pass, gates: {:?}", result.gates);
        let atr_gate = result.gates.iter().find(|g| g.name == "atr_validity").unwrap();
        assert!(atr_gate.passed);
        assert!(atr_gate.detail.contains("Calculated"));
        assert!(!atr_gate.detail.contains("fallback"));
    }
}
