// =============================================================================
// Regime Detector — ADX/BBW cascade feeding HoldTimeEstimator
// =============================================================================
//
// Classifies the current market into one of the four `Regime` variants
// consumed by `HoldTimeEstimator` (§4.3). Evaluated top-to-bottom, first
// match wins:
//
//   1. VOLATILE  — BBW > 5.0   (band expansion)
//   2. TRENDING  — ADX > 25.0  (persistent directional move)
//   3. RANGING   — ADX < 20.0  (mean-reverting chop)
//   4. UNKNOWN   — ambiguous ADX band, or insufficient candle history
// =============================================================================

use std::sync::Arc;

use parking_lot::RwLock;

use crate::indicators::adx::calculate_adx;
use crate::indicators::bollinger::calculate_bollinger;
use crate::market_data::Candle;
use crate::types::Regime;

/// Thread-safe regime detector that caches the latest classification.
pub struct RegimeDetector {
    state: RwLock<Option<Regime>>,
}

impl RegimeDetector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { state: RwLock::new(None) })
    }

    /// Classify `candles` (latest last) into a `Regime`. Returns `Unknown`
    /// when ADX/BBW cannot be computed from the given history.
    pub fn detect(&self, candles: &[Candle]) -> Regime {
        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let adx = calculate_adx(candles, 14);
        let bbw = calculate_bollinger(&closes, 20, 2.0).map(|b| b.width);

        let regime = classify(adx, bbw);
        *self.state.write() = Some(regime);
        regime
    }

    pub fn current(&self) -> Option<Regime> {
        *self.state.read()
    }
}

impl Default for RegimeDetector {
    fn default() -> Self {
        Self { state: RwLock::new(None) }
    }
}

fn classify(adx: Option<f64>, bbw: Option<f64>) -> Regime {
    if let Some(bbw) = bbw {
        if bbw > 5.0 {
            return Regime::Volatile;
        }
    }
    match adx {
        Some(adx) if adx > 25.0 => Regime::Trending,
        Some(adx) if adx < 20.0 => Regime::Ranging,
        _ => Regime::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volatile_dominates_trending() {
        assert_eq!(classify(Some(30.0), Some(7.0)), Regime::Volatile);
    }

    #[test]
    fn high_adx_is_trending() {
        assert_eq!(classify(Some(30.0), Some(2.0)), Regime::Trending);
    }

    #[test]
    fn low_adx_is_ranging() {
        assert_eq!(classify(Some(15.0), Some(2.0)), Regime::Ranging);
    }

    #[test]
    fn ambiguous_adx_band_is_unknown() {
        assert_eq!(classify(Some(22.0), Some(2.0)), Regime::Unknown);
    }

    #[test]
    fn missing_indicators_default_unknown() {
        assert_eq!(classify(None, None), Regime::Unknown);
    }

    #[test]
    fn detector_caches_last_classification() {
        let detector = RegimeDetector::default();
        assert!(detector.current().is_none());
        let candles: Vec<Candle> = (0..60)
            .map(|i| {
                let base = 100.0 + i as f64 * 2.0;
                Candle {
                    open_time: i,
                    close_time: i,
                    open: base,
                    high: base + 1.5,
                    low: base - 0.5,
                    close: base + 1.0,
                    volume: 1.0,
                    quote_volume: 0.0,
                    trades_count: 0,
                    taker_buy_volume: 0.0,
                    taker_buy_quote_volume: 0.0,
                    is_closed: true,
                }
            })
            .collect();
        let regime = detector.detect(&candles);
        assert_eq!(detector.current(), Some(regime));
    }
}
