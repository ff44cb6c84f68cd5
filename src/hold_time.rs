// =============================================================================
// HoldTimeEstimator — Median historical episode hold-time per asset
// =============================================================================
//
// Returns the median hold time of closed episodes for an asset over a
// lookback window, adjusted multiplicatively by regime and target venue.
// Consumed by the consensus EV gate's hold-time parameter.
// =============================================================================

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::HoldTimeConfig;
use crate::types::{HoldTimeSource, Regime, Venue};

/// A single hold-time estimate, with the tier it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HoldTimeEstimate {
    pub asset: String,
    pub regime: Regime,
    pub hours: f64,
    pub source: HoldTimeSource,
}

fn regime_multiplier(regime: Regime) -> f64 {
    match regime {
        Regime::Trending => 1.25,
        Regime::Ranging => 1.0,
        Regime::Volatile => 0.75,
        Regime::Unknown => 1.0,
    }
}

fn venue_multiplier(venue: Venue) -> f64 {
    match venue {
        Venue::Hyperliquid => 1.0,
        Venue::Bybit | Venue::Aster => 0.85,
    }
}

struct CacheEntry {
    estimate: HoldTimeEstimate,
    cached_at: Instant,
}

/// A record of one closed episode's hold duration, as fed by the caller
/// (typically sourced from `position_signals` per §6).
#[derive(Debug, Clone)]
pub struct ClosedHoldSample {
    pub asset: String,
    pub hold_hours: f64,
}

/// Per-(asset,regime) hold-time estimator with a short-TTL cache.
pub struct HoldTimeEstimator {
    config: HoldTimeConfig,
    cache: RwLock<HashMap<(String, Regime), CacheEntry>>,
}

impl HoldTimeEstimator {
    pub fn new(config: HoldTimeConfig) -> Self {
        Self {
            config,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Median hold time for `asset` given `samples` restricted to the
    /// lookback window by the caller, adjusted for `regime` and `venue`.
    pub fn get(
        &self,
        asset: &str,
        samples: &[ClosedHoldSample],
        regime: Regime,
        venue: Venue,
    ) -> HoldTimeEstimate {
        {
            let cache = self.cache.read();
            if let Some(entry) = cache.get(&(asset.to_string(), regime)) {
                if entry.cached_at.elapsed() < Duration::from_secs(self.config.cache_ttl_s) {
                    debug!(asset, regime = %regime, "hold-time cache hit");
                    return self.apply_venue(entry.estimate.clone(), venue);
                }
            }
        }

        let estimate = self.compute(asset, samples, regime);

        let mut cache = self.cache.write();
        cache.insert(
            (asset.to_string(), regime),
            CacheEntry {
                estimate: estimate.clone(),
                cached_at: Instant::now(),
            },
        );
        self.apply_venue(estimate, venue)
    }

    fn compute(&self, asset: &str, samples: &[ClosedHoldSample], regime: Regime) -> HoldTimeEstimate {
        let relevant: Vec<f64> = samples
            .iter()
            .filter(|s| s.asset == asset)
            .map(|s| s.hold_hours)
            .collect();

        if relevant.len() < self.config.min_episodes {
            return HoldTimeEstimate {
                asset: asset.to_string(),
                regime,
                hours: self.config.default_hours,
                source: HoldTimeSource::Fallback,
            };
        }

        let base = median(&relevant);
        let mult = regime_multiplier(regime);
        let source = if mult == 1.0 {
            HoldTimeSource::Historical
        } else {
            HoldTimeSource::RegimeAdjusted
        };

        HoldTimeEstimate {
            asset: asset.to_string(),
            regime,
            hours: base * mult,
            source,
        }
    }

    fn apply_venue(&self, mut estimate: HoldTimeEstimate, venue: Venue) -> HoldTimeEstimate {
        estimate.hours *= venue_multiplier(venue);
        estimate
    }
}

fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let n = sorted.len();
    if n % 2 == 0 {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    } else {
        sorted[n / 2]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples(asset: &str, hours: &[f64]) -> Vec<ClosedHoldSample> {
        hours
            .iter()
            .map(|&h| ClosedHoldSample {
                asset: asset.to_string(),
                hold_hours: h,
            })
            .collect()
    }

    #[test]
    fn falls_back_when_fewer_than_min_episodes() {
        let est = HoldTimeEstimator::new(HoldTimeConfig::default());
        let samples = samples("BTC", &[10.0, 20.0, 30.0]);
        let result = est.get("BTC", &samples, Regime::Ranging, Venue::Hyperliquid);
        assert_eq!(result.source, HoldTimeSource::Fallback);
        assert_eq!(result.hours, 24.0);
    }

    #[test]
    fn historical_median_used_with_enough_episodes_and_no_regime_shift() {
        let est = HoldTimeEstimator::new(HoldTimeConfig::default());
        let hours: Vec<f64> = (1..=12).map(|i| i as f64 * 2.0).collect(); // median=13
        let samples = samples("BTC", &hours);
        let result = est.get("BTC", &samples, Regime::Ranging, Venue::Hyperliquid);
        assert_eq!(result.source, HoldTimeSource::Historical);
        assert_eq!(result.hours, 13.0);
    }

    #[test]
    fn regime_adjustment_applied_and_flagged() {
        let est = HoldTimeEstimator::new(HoldTimeConfig::default());
        let hours: Vec<f64> = (1..=12).map(|i| i as f64 * 2.0).collect();
        let samples = samples("BTC", &hours);
        let result = est.get("BTC", &samples, Regime::Trending, Venue::Hyperliquid);
        assert_eq!(result.source, HoldTimeSource::RegimeAdjusted);
        assert_eq!(result.hours, 13.0 * 1.25);
    }

    #[test]
    fn venue_multiplier_applied_on_top_of_regime() {
        let est = HoldTimeEstimator::new(HoldTimeConfig::default());
        let hours: Vec<f64> = (1..=12).map(|i| i as f64 * 2.0).collect();
        let samples = samples("BTC", &hours);
        let hl = est.get("BTC", &samples, Regime::Volatile, Venue::Hyperliquid);
        let bybit = est.get("BTC", &samples, Regime::Volatile, Venue::Bybit);
        assert_eq!(hl.hours, 13.0 * 0.75);
        assert_eq!(bybit.hours, 13.0 * 0.75 * 0.85);
    }
}
