// =============================================================================
// CorrelationProvider — Pairwise trader correlation with time-decay
// =============================================================================
//
// Pearson correlation of closed-episode R-series between two addresses,
// decayed toward a venue-specific prior as the underlying measurement ages.
// Feeds `effective_k`, the correlation-discounted independent-trader count
// consumed by `ConsensusDetector`.
// =============================================================================

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::config::CorrelationConfig;
use crate::types::Venue;

fn venue_prior(venue: Venue, config: &CorrelationConfig) -> f64 {
    match venue {
        Venue::Hyperliquid => config.prior_hyperliquid,
        Venue::Bybit | Venue::Aster => config.prior_other,
    }
}

/// Pearson correlation coefficient of two equal-length R-series.
pub fn pearson(xs: &[f64], ys: &[f64]) -> Option<f64> {
    if xs.len() != ys.len() || xs.len() < 2 {
        return None;
    }
    let n = xs.len() as f64;
    let mean_x = xs.iter().sum::<f64>() / n;
    let mean_y = ys.iter().sum::<f64>() / n;

    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (&x, &y) in xs.iter().zip(ys.iter()) {
        let dx = x - mean_x;
        let dy = y - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }
    if var_x == 0.0 || var_y == 0.0 {
        return None;
    }
    Some(cov / (var_x.sqrt() * var_y.sqrt()))
}

/// Correlation-discounted count of independent traders.
///
/// `effK = (Σwᵢ)² / (Σwᵢ² + 2·Σᵢ<ⱼ wᵢwⱼρᵢⱼ)`. With fewer than two traders,
/// effK degenerates to the trader count itself.
pub fn effective_k(weights: &[f64], rho: impl Fn(usize, usize) -> f64) -> f64 {
    let n = weights.len();
    if n < 2 {
        return n as f64;
    }

    let sum_w: f64 = weights.iter().sum();
    let sum_w_sq: f64 = weights.iter().map(|w| w * w).sum();

    let mut cross = 0.0;
    for i in 0..n {
        for j in (i + 1)..n {
            cross += weights[i] * weights[j] * rho(i, j);
        }
    }

    let denom = sum_w_sq + 2.0 * cross;
    if denom <= 0.0 {
        return n as f64;
    }
    (sum_w * sum_w) / denom
}

#[derive(Debug, Clone)]
struct StoredCorrelation {
    rho: f64,
    measured_at: DateTime<Utc>,
}

fn pair_key(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

/// Process-wide store of daily-loaded pairwise correlations, blended toward
/// a venue-specific prior as they age.
pub struct CorrelationProvider {
    config: CorrelationConfig,
    store: RwLock<HashMap<(String, String), StoredCorrelation>>,
}

impl CorrelationProvider {
    pub fn new(config: CorrelationConfig) -> Self {
        Self {
            config,
            store: RwLock::new(HashMap::new()),
        }
    }

    /// Load (or overwrite) today's measured correlation for a pair.
    pub fn set(&self, a: &str, b: &str, rho: f64, measured_at: DateTime<Utc>) {
        self.store
            .write()
            .insert(pair_key(a, b), StoredCorrelation { rho, measured_at });
    }

    /// Blend the stored correlation toward the venue-specific prior using
    /// half-life decay: `decayed = prior + (stored - prior) * 2^(-age_days/half_life)`.
    pub fn get_with_decay(&self, a: &str, b: &str, target_venue: Venue) -> f64 {
        let prior = venue_prior(target_venue, &self.config);
        let store = self.store.read();
        let Some(entry) = store.get(&pair_key(a, b)) else {
            return prior;
        };

        let age_days = Utc::now()
            .signed_duration_since(entry.measured_at)
            .num_seconds() as f64
            / 86_400.0;
        let decay = 2f64.powf(-age_days.max(0.0) / self.config.half_life_days);
        prior + (entry.rho - prior) * decay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pearson_perfectly_correlated_series() {
        let xs = [1.0, 2.0, 3.0, 4.0];
        let ys = [2.0, 4.0, 6.0, 8.0];
        assert!((pearson(&xs, &ys).unwrap() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn pearson_anticorrelated_series() {
        let xs = [1.0, 2.0, 3.0, 4.0];
        let ys = [4.0, 3.0, 2.0, 1.0];
        assert!((pearson(&xs, &ys).unwrap() + 1.0).abs() < 1e-9);
    }

    #[test]
    fn pearson_requires_at_least_two_points() {
        assert!(pearson(&[1.0], &[2.0]).is_none());
    }

    #[test]
    fn effective_k_single_trader_returns_one() {
        assert_eq!(effective_k(&[1.0], |_, _| 0.0), 1.0);
    }

    #[test]
    fn effective_k_zero_correlation_equals_trader_count_weighted() {
        let weights = [0.5, 0.5];
        let k = effective_k(&weights, |_, _| 0.0);
        assert!((k - 2.0).abs() < 1e-9);
    }

    #[test]
    fn effective_k_monotone_non_increasing_in_rho() {
        let weights = [0.4, 0.3, 0.2, 0.05, 0.05];
        let k_low = effective_k(&weights, |_, _| 0.0);
        let k_high = effective_k(&weights, |_, _| 0.8);
        assert!(k_high <= k_low);
    }

    #[test]
    fn spec_consensus_scenario_matches_effective_k() {
        // Scenario 3 from §8: weights {0.4,0.3,0.2,0.05,0.05}, rho=0.3.
        // (Σw)²/(Σw²+2Σ_{i<j}w_iw_jρ) = 1.0²/(0.295+2·0.3·0.3525) ≈ 1.97,
        // matching the original `eff_k_from_corr` formula verified against
        // hl-decide's own uniform-weight test cases.
        let weights = [0.4, 0.3, 0.2, 0.05, 0.05];
        let k = effective_k(&weights, |_, _| 0.3);
        assert!((k - 1.974).abs() < 0.01, "expected effK near 1.974, got {k}");
    }

    #[test]
    fn get_with_decay_returns_prior_when_no_measurement() {
        let provider = CorrelationProvider::new(CorrelationConfig::default());
        let rho = provider.get_with_decay("a", "b", Venue::Hyperliquid);
        assert_eq!(rho, 0.3);
    }

    #[test]
    fn get_with_decay_returns_measured_value_when_fresh() {
        let provider = CorrelationProvider::new(CorrelationConfig::default());
        provider.set("a", "b", 0.9, Utc::now());
        let rho = provider.get_with_decay("a", "b", Venue::Hyperliquid);
        assert!((rho - 0.9).abs() < 1e-6);
    }

    #[test]
    fn pair_key_is_order_independent() {
        let provider = CorrelationProvider::new(CorrelationConfig::default());
        provider.set("b", "a", 0.7, Utc::now());
        let rho = provider.get_with_decay("a", "b", Venue::Hyperliquid);
        assert!((rho - 0.7).abs() < 1e-6);
    }
}
