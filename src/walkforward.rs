// =============================================================================
// WalkForwardReplay — re-evaluate past snapshot selections
// =============================================================================
//
// For each historical selection date, re-runs the same BH selection and
// measures the R realized by the selected addresses over the following
// REPLAY_EVALUATION_DAYS-day window. Deterministic: no wall-clock reads,
// every sampler call uses the stored seed (carried transitively through
// `TraderHistory.posterior` / the snapshot's stored `thompson_seed`).
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::SnapshotConfig;
use crate::snapshot::{build_daily_snapshot, cost_r, TraderHistory, TraderSnapshot};
use crate::types::EventType;

/// One realized episode inside a replay evaluation window.
#[derive(Debug, Clone)]
pub struct ReplayEpisodeOutcome {
    pub address: String,
    pub entry_ts: DateTime<Utc>,
    pub r_gross: f64,
    pub entry_price: f64,
    pub atr_at_entry: f64,
}

/// Metrics for a single historical selection date re-evaluated over its
/// forward window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayPeriod {
    pub selection_date: DateTime<Utc>,
    pub selected_count: usize,
    pub fdr_qualified_count: usize,
    pub total_r_gross: f64,
    pub total_r_net: f64,
    pub avg_r_gross: f64,
    pub avg_r_net: f64,
    pub deaths_during_period: usize,
    pub censored_during_period: usize,
}

/// Aggregate metrics across every replayed period.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplaySummary {
    pub periods: usize,
    pub cumulative_r_gross: f64,
    pub cumulative_r_net: f64,
    pub avg_period_r_gross: f64,
    pub avg_period_r_net: f64,
    pub r_gross_std: f64,
    pub r_net_std: f64,
    pub sharpe_gross: f64,
    pub sharpe_net: f64,
    pub winning_periods: usize,
    pub losing_periods: usize,
    pub win_rate: f64,
    pub total_deaths: usize,
    pub total_censored: usize,
}

fn population_std(xs: &[f64], m: f64) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }
    (xs.iter().map(|x| (x - m).powi(2)).sum::<f64>() / xs.len() as f64).sqrt()
}

/// Evaluate one historical selection date. `histories` is the trader
/// universe *as it stood at* `selection_date`; `outcomes` is every closed
/// episode whose `entry_ts` falls in `[selection_date, selection_date+7d]`.
pub fn evaluate_period(
    histories: &[TraderHistory],
    selection_date: DateTime<Utc>,
    selection_version: u64,
    date_int: u64,
    outcomes: &[ReplayEpisodeOutcome],
    config: &SnapshotConfig,
) -> ReplayPeriod {
    let snapshot: Vec<TraderSnapshot> =
        build_daily_snapshot(histories, selection_date, selection_version, date_int, config);

    let selected: Vec<&TraderSnapshot> = snapshot.iter().filter(|s| s.is_pool_selected).collect();
    let selected_addresses: std::collections::HashSet<&str> =
        selected.iter().map(|s| s.address.as_str()).collect();

    let period_end = selection_date + chrono::Duration::days(config.replay_evaluation_days);
    let relevant: Vec<&ReplayEpisodeOutcome> = outcomes
        .iter()
        .filter(|o| {
            selected_addresses.contains(o.address.as_str())
                && o.entry_ts >= selection_date
                && o.entry_ts <= period_end
        })
        .collect();

    let total_r_gross: f64 = relevant.iter().map(|o| o.r_gross).sum();
    let total_cost_r: f64 = relevant
        .iter()
        .map(|o| cost_r(o.entry_price, o.atr_at_entry, config.round_trip_cost_bps))
        .sum();
    let total_r_net = total_r_gross - total_cost_r;

    let n = relevant.len().max(1) as f64;
    let deaths = snapshot.iter().filter(|s| s.event_type == EventType::Death).count();
    let censored = snapshot.iter().filter(|s| s.event_type == EventType::Censored).count();

    ReplayPeriod {
        selection_date,
        selected_count: selected.len(),
        fdr_qualified_count: selected.iter().filter(|s| s.fdr_qualified).count(),
        total_r_gross,
        total_r_net,
        avg_r_gross: total_r_gross / n,
        avg_r_net: total_r_net / n,
        deaths_during_period: deaths,
        censored_during_period: censored,
    }
}

/// Summarize a sequence of evaluated periods.
pub fn summarize(periods: &[ReplayPeriod]) -> ReplaySummary {
    if periods.is_empty() {
        return ReplaySummary {
            periods: 0,
            cumulative_r_gross: 0.0,
            cumulative_r_net: 0.0,
            avg_period_r_gross: 0.0,
            avg_period_r_net: 0.0,
            r_gross_std: 0.0,
            r_net_std: 0.0,
            sharpe_gross: 0.0,
            sharpe_net: 0.0,
            winning_periods: 0,
            losing_periods: 0,
            win_rate: 0.0,
            total_deaths: 0,
            total_censored: 0,
        };
    }

    let n = periods.len() as f64;
    let gross: Vec<f64> = periods.iter().map(|p| p.total_r_gross).collect();
    let net: Vec<f64> = periods.iter().map(|p| p.total_r_net).collect();

    let cumulative_r_gross: f64 = gross.iter().sum();
    let cumulative_r_net: f64 = net.iter().sum();
    let avg_period_r_gross = cumulative_r_gross / n;
    let avg_period_r_net = cumulative_r_net / n;

    let r_gross_std = population_std(&gross, avg_period_r_gross);
    let r_net_std = population_std(&net, avg_period_r_net);

    let sharpe_gross = if r_gross_std > 0.0 { avg_period_r_gross / r_gross_std } else { 0.0 };
    let sharpe_net = if r_net_std > 0.0 { avg_period_r_net / r_net_std } else { 0.0 };

    let winning_periods = periods.iter().filter(|p| p.total_r_net > 0.0).count();
    let losing_periods = periods.iter().filter(|p| p.total_r_net <= 0.0).count();

    ReplaySummary {
        periods: periods.len(),
        cumulative_r_gross,
        cumulative_r_net,
        avg_period_r_gross,
        avg_period_r_net,
        r_gross_std,
        r_net_std,
        sharpe_gross,
        sharpe_net,
        winning_periods,
        losing_periods,
        win_rate: winning_periods as f64 / n,
        total_deaths: periods.iter().map(|p| p.deaths_during_period).sum(),
        total_censored: periods.iter().map(|p| p.censored_during_period).sum(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bandit::NigPosterior;

    fn history(address: &str, r_values: &[f64]) -> TraderHistory {
        TraderHistory {
            address: address.to_string(),
            episode_r: r_values.to_vec(),
            entry_price_atr: r_values.iter().map(|_| (100.0, 5.0)).collect(),
            posterior: NigPosterior::prior(),
            running_peak_r_sum: 5.0,
            current_r_sum: 5.0,
            days_since_last_activity: 1,
        }
    }

    #[test]
    fn evaluate_period_restricts_outcomes_to_selected_addresses_and_window() {
        let config = SnapshotConfig::default();
        let histories = vec![history("0xwinner", &vec![1.0; 25]), history("0xloser", &vec![-1.0; 25])];
        let selection_date = Utc::now();
        let outcomes = vec![
            ReplayEpisodeOutcome {
                address: "0xwinner".into(),
                entry_ts: selection_date + chrono::Duration::days(1),
                r_gross: 2.0,
                entry_price: 100.0,
                atr_at_entry: 5.0,
            },
            ReplayEpisodeOutcome {
                address: "0xnotselected".into(),
                entry_ts: selection_date + chrono::Duration::days(1),
                r_gross: 100.0,
                entry_price: 100.0,
                atr_at_entry: 5.0,
            },
            ReplayEpisodeOutcome {
                address: "0xwinner".into(),
                entry_ts: selection_date + chrono::Duration::days(10),
                r_gross: 100.0,
                entry_price: 100.0,
                atr_at_entry: 5.0,
            },
        ];

        let period = evaluate_period(&histories, selection_date, 1, 20260101, &outcomes, &config);
        assert_eq!(period.total_r_gross, 2.0);
    }

    #[test]
    fn summarize_empty_periods_returns_zeroed_summary() {
        let summary = summarize(&[]);
        assert_eq!(summary.periods, 0);
        assert_eq!(summary.sharpe_gross, 0.0);
    }

    #[test]
    fn summarize_computes_sharpe_as_mean_over_std() {
        let periods = vec![
            ReplayPeriod {
                selection_date: Utc::now(),
                selected_count: 1,
                fdr_qualified_count: 1,
                total_r_gross: 2.0,
                total_r_net: 1.5,
                avg_r_gross: 2.0,
                avg_r_net: 1.5,
                deaths_during_period: 0,
                censored_during_period: 0,
            },
            ReplayPeriod {
                selection_date: Utc::now(),
                selected_count: 1,
                fdr_qualified_count: 1,
                total_r_gross: -1.0,
                total_r_net: -1.5,
                avg_r_gross: -1.0,
                avg_r_net: -1.5,
                deaths_during_period: 1,
                censored_during_period: 0,
            },
        ];
        let summary = summarize(&periods);
        assert_eq!(summary.cumulative_r_gross, 1.0);
        assert_eq!(summary.winning_periods, 1);
        assert_eq!(summary.losing_periods, 1);
        assert_eq!(summary.win_rate, 0.5);
        assert_eq!(summary.total_deaths, 1);
        let expected_mean = 0.5;
        assert!((summary.avg_period_r_gross - expected_mean).abs() < 1e-9);
        assert_eq!(summary.sharpe_gross, summary.avg_period_r_gross / summary.r_gross_std);
    }
}
