// =============================================================================
// Snapshot engine — daily BH-FDR trader selection
// =============================================================================
//
// For each tracked address with enough closed-episode history, computes a
// one-sided skill p-value, a stored-seed Thompson draw, and gross/net
// average R. Selection runs Benjamini-Hochberg FDR control over the full
// sorted p-value sequence (§4.7) — not a first-failing-index shortcut.
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, StudentsT};

use crate::bandit::NigPosterior;
use crate::config::SnapshotConfig;
use crate::types::EventType;

/// Closed-episode history for one tracked address, as consumed by the
/// snapshot engine.
#[derive(Debug, Clone)]
pub struct TraderHistory {
    pub address: String,
    /// Winsorized R of each closed episode, in chronological order.
    pub episode_r: Vec<f64>,
    /// Entry price and ATR-at-entry for each episode, parallel to `episode_r`.
    pub entry_price_atr: Vec<(f64, f64)>,
    pub posterior: NigPosterior,
    pub running_peak_r_sum: f64,
    pub current_r_sum: f64,
    pub days_since_last_activity: i64,
}

/// One address's row in a daily snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraderSnapshot {
    pub snapshot_date: DateTime<Utc>,
    pub selection_version: u64,
    pub address: String,
    pub posterior: NigPosterior,
    pub thompson_draw: f64,
    pub thompson_seed: u64,
    pub episode_count: usize,
    pub avg_r_gross: f64,
    pub avg_r_net: f64,
    pub skill_p_value: Option<f64>,
    pub fdr_qualified: bool,
    pub is_leaderboard_scanned: bool,
    pub is_pool_selected: bool,
    pub event_type: EventType,
    pub death_type: Option<String>,
    pub censor_type: Option<String>,
}

fn mean(xs: &[f64]) -> f64 {
    xs.iter().sum::<f64>() / xs.len() as f64
}

fn std_dev(xs: &[f64], m: f64) -> f64 {
    let var = xs.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (xs.len() as f64 - 1.0);
    var.sqrt()
}

/// One-sided t-test that the mean of `xs` is greater than zero.
/// Returns `None` when there are fewer than `min_episodes` observations.
pub fn skill_p_value(xs: &[f64], min_episodes: usize) -> Option<f64> {
    if xs.len() < min_episodes || xs.len() < 2 {
        return None;
    }
    let m = mean(xs);
    let s = std_dev(xs, m);
    if s == 0.0 {
        return Some(if m > 0.0 { 0.0 } else { 1.0 });
    }
    let n = xs.len() as f64;
    let t = m / (s / n.sqrt());
    let dist = StudentsT::new(0.0, 1.0, n - 1.0).expect("n-1 > 0 checked above");
    Some(dist.sf(t))
}

/// Seed for an address's daily Thompson draw: `date_int*1e6 + hash(address) mod 1e6`.
pub fn thompson_seed(date_int: u64, address: &str) -> u64 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    let mut hasher = DefaultHasher::new();
    address.hash(&mut hasher);
    let h = hasher.finish() % 1_000_000;
    date_int * 1_000_000 + h
}

/// Per-episode round-trip cost in R-units: `price*(ROUND_TRIP_COST_BPS/10000)/atr`.
/// Zero when price or ATR is missing, zero, or negative.
pub fn cost_r(entry_price: f64, atr_at_entry: f64, round_trip_cost_bps: f64) -> f64 {
    if entry_price <= 0.0 || atr_at_entry <= 0.0 {
        return 0.0;
    }
    entry_price * (round_trip_cost_bps / 10_000.0) / atr_at_entry
}

/// Benjamini-Hochberg FDR selection. `p_values` need not be pre-sorted; the
/// returned indices (into the original slice) are the selected addresses.
///
/// `k* = max{i : p_(i) <= (i/n)*alpha}`, selecting the first k* in sorted
/// order — the full-sequence maximum, not the first index that fails.
pub fn benjamini_hochberg(p_values: &[f64], alpha: f64) -> Vec<usize> {
    let n = p_values.len();
    if n == 0 {
        return Vec::new();
    }

    let mut indexed: Vec<(usize, f64)> = p_values.iter().copied().enumerate().collect();
    indexed.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap());

    let mut k_star = 0usize;
    for (i, (_, p)) in indexed.iter().enumerate() {
        let rank = i + 1;
        if *p <= (rank as f64 / n as f64) * alpha {
            k_star = rank;
        }
    }

    indexed.into_iter().take(k_star).map(|(idx, _)| idx).collect()
}

fn classify_event(history: &TraderHistory, config: &SnapshotConfig) -> (EventType, Option<String>, Option<String>) {
    if history.days_since_last_activity >= config.censor_inactive_days {
        return (EventType::Censored, None, Some("inactive".to_string()));
    }
    if history.running_peak_r_sum > 0.0 {
        let drawdown = (history.running_peak_r_sum - history.current_r_sum) / history.running_peak_r_sum;
        if drawdown > config.death_drawdown_pct {
            return (EventType::Death, Some("drawdown".to_string()), None);
        }
    }
    (EventType::Active, None, None)
}

/// Build one snapshot row for a tracked address.
pub fn build_snapshot(
    history: &TraderHistory,
    snapshot_date: DateTime<Utc>,
    selection_version: u64,
    date_int: u64,
    config: &SnapshotConfig,
) -> TraderSnapshot {
    let avg_r_gross = if history.episode_r.is_empty() { 0.0 } else { mean(&history.episode_r) };

    let total_cost_r: f64 = history
        .entry_price_atr
        .iter()
        .map(|&(price, atr)| cost_r(price, atr, config.round_trip_cost_bps))
        .sum();
    let avg_cost_r = if history.entry_price_atr.is_empty() {
        0.0
    } else {
        total_cost_r / history.entry_price_atr.len() as f64
    };
    let avg_r_net = avg_r_gross - avg_cost_r;

    let seed = thompson_seed(date_int, &history.address);
    let thompson_draw = history.posterior.sample_seeded(seed);

    let skill_p = skill_p_value(&history.episode_r, config.min_episodes);
    let (event_type, death_type, censor_type) = classify_event(history, config);

    TraderSnapshot {
        snapshot_date,
        selection_version,
        address: history.address.clone(),
        posterior: history.posterior,
        thompson_draw,
        thompson_seed: seed,
        episode_count: history.episode_r.len(),
        avg_r_gross,
        avg_r_net,
        skill_p_value: skill_p,
        fdr_qualified: false,
        is_leaderboard_scanned: true,
        is_pool_selected: false,
        event_type,
        death_type,
        censor_type,
    }
}

/// Build the full daily snapshot and apply BH selection across every
/// address that has a skill p-value.
pub fn build_daily_snapshot(
    histories: &[TraderHistory],
    snapshot_date: DateTime<Utc>,
    selection_version: u64,
    date_int: u64,
    config: &SnapshotConfig,
) -> Vec<TraderSnapshot> {
    let mut rows: Vec<TraderSnapshot> = histories
        .iter()
        .map(|h| build_snapshot(h, snapshot_date, selection_version, date_int, config))
        .collect();

    let eligible: Vec<usize> = rows
        .iter()
        .enumerate()
        .filter_map(|(i, r)| r.skill_p_value.map(|_| i))
        .collect();
    let p_values: Vec<f64> = eligible.iter().map(|&i| rows[i].skill_p_value.unwrap()).collect();
    let selected_local = benjamini_hochberg(&p_values, config.bh_alpha);

    for local_idx in selected_local {
        let row_idx = eligible[local_idx];
        rows[row_idx].fdr_qualified = true;
        rows[row_idx].is_pool_selected = true;
    }

    rows
}
