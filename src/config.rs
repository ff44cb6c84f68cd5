// =============================================================================
// RuntimeConfig — Hot-reloadable decision-core settings with atomic save
// =============================================================================
//
// Every tunable parameter named in the component design lives here so the
// core can be reconfigured without a restart. Persistence uses an atomic
// tmp + rename pattern to prevent corruption on crash. All fields carry
// `#[serde(default)]` so that adding new fields never breaks loading an
// older config file.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

fn default_atr_period() -> usize {
    14
}
fn default_atr_multiplier_btc() -> f64 {
    2.0
}
fn default_atr_multiplier_eth() -> f64 {
    1.5
}
fn default_atr_fallback_pct() -> f64 {
    1.0
}
fn default_atr_cache_ttl_s() -> u64 {
    60
}
fn default_atr_max_staleness_s() -> u64 {
    300
}

fn default_funding_cache_ttl_s() -> u64 {
    300
}
fn default_funding_interval_hours() -> f64 {
    8.0
}
fn default_funding_fallback_bps() -> f64 {
    8.0
}

fn default_hold_time_default_hours() -> f64 {
    24.0
}
fn default_hold_time_min_episodes() -> usize {
    10
}
fn default_hold_time_lookback_days() -> i64 {
    30
}
fn default_hold_time_cache_ttl_s() -> u64 {
    300
}

fn default_snapshot_min_episodes() -> usize {
    20
}
fn default_bh_alpha() -> f64 {
    0.10
}
fn default_round_trip_cost_bps() -> f64 {
    30.0
}
fn default_death_drawdown_pct() -> f64 {
    0.80
}
fn default_censor_inactive_days() -> i64 {
    30
}

fn default_replay_evaluation_days() -> i64 {
    7
}

fn default_min_traders() -> usize {
    3
}
fn default_supermajority_threshold() -> f64 {
    0.70
}
fn default_min_effective_k() -> f64 {
    2.0
}
fn default_max_signal_age_s() -> i64 {
    150
}
fn default_price_band_atr_fraction() -> f64 {
    0.25
}
fn default_min_ev_r() -> f64 {
    0.20
}
fn default_correlation_half_life_days() -> f64 {
    7.0
}
fn default_correlation_prior_hl() -> f64 {
    0.3
}
fn default_correlation_prior_other() -> f64 {
    0.5
}

fn default_kill_switch_cooldown_s() -> i64 {
    3600
}
fn default_min_equity_floor() -> f64 {
    10_000.0
}
fn default_liquidation_distance_min() -> f64 {
    1.5
}
fn default_daily_drawdown_kill_pct() -> f64 {
    0.05
}
fn default_max_position_size_pct() -> f64 {
    0.10
}
fn default_max_total_exposure_pct() -> f64 {
    0.50
}
fn default_liquidation_distance_warn_multiplier() -> f64 {
    1.5
}
fn default_daily_drawdown_warn_fraction() -> f64 {
    0.5
}

fn default_max_tracked_addresses() -> usize {
    1000
}
fn default_max_scores() -> usize {
    500
}
fn default_stale_threshold_hours() -> f64 {
    24.0
}

fn default_max_recent_errors() -> usize {
    50
}
fn default_max_recent_decisions() -> usize {
    100
}

/// Tunables for `ATRProvider`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AtrConfig {
    #[serde(default = "default_atr_period")]
    pub period: usize,
    #[serde(default = "default_atr_multiplier_btc")]
    pub multiplier_btc: f64,
    #[serde(default = "default_atr_multiplier_eth")]
    pub multiplier_eth: f64,
    #[serde(default = "default_atr_fallback_pct")]
    pub fallback_pct_default: f64,
    #[serde(default = "default_atr_cache_ttl_s")]
    pub cache_ttl_s: u64,
    #[serde(default = "default_atr_max_staleness_s")]
    pub max_staleness_s: u64,
}

impl Default for AtrConfig {
    fn default() -> Self {
        Self {
            period: default_atr_period(),
            multiplier_btc: default_atr_multiplier_btc(),
            multiplier_eth: default_atr_multiplier_eth(),
            fallback_pct_default: default_atr_fallback_pct(),
            cache_ttl_s: default_atr_cache_ttl_s(),
            max_staleness_s: default_atr_max_staleness_s(),
        }
    }
}

/// Tunables for `FundingProvider`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundingConfig {
    #[serde(default = "default_funding_cache_ttl_s")]
    pub cache_ttl_s: u64,
    #[serde(default = "default_funding_interval_hours")]
    pub interval_hours: f64,
    #[serde(default = "default_funding_fallback_bps")]
    pub fallback_bps: f64,
}

impl Default for FundingConfig {
    fn default() -> Self {
        Self {
            cache_ttl_s: default_funding_cache_ttl_s(),
            interval_hours: default_funding_interval_hours(),
            fallback_bps: default_funding_fallback_bps(),
        }
    }
}

/// Tunables for `HoldTimeEstimator`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HoldTimeConfig {
    #[serde(default = "default_hold_time_default_hours")]
    pub default_hours: f64,
    #[serde(default = "default_hold_time_min_episodes")]
    pub min_episodes: usize,
    #[serde(default = "default_hold_time_lookback_days")]
    pub lookback_days: i64,
    #[serde(default = "default_hold_time_cache_ttl_s")]
    pub cache_ttl_s: u64,
}

impl Default for HoldTimeConfig {
    fn default() -> Self {
        Self {
            default_hours: default_hold_time_default_hours(),
            min_episodes: default_hold_time_min_episodes(),
            lookback_days: default_hold_time_lookback_days(),
            cache_ttl_s: default_hold_time_cache_ttl_s(),
        }
    }
}

/// Tunables for `CorrelationProvider`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationConfig {
    #[serde(default = "default_correlation_half_life_days")]
    pub half_life_days: f64,
    #[serde(default = "default_correlation_prior_hl")]
    pub prior_hyperliquid: f64,
    #[serde(default = "default_correlation_prior_other")]
    pub prior_other: f64,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            half_life_days: default_correlation_half_life_days(),
            prior_hyperliquid: default_correlation_prior_hl(),
            prior_other: default_correlation_prior_other(),
        }
    }
}

/// Tunables for the `Snapshot` engine and `WalkForwardReplay`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotConfig {
    #[serde(default = "default_snapshot_min_episodes")]
    pub min_episodes: usize,
    #[serde(default = "default_bh_alpha")]
    pub bh_alpha: f64,
    #[serde(default = "default_round_trip_cost_bps")]
    pub round_trip_cost_bps: f64,
    #[serde(default = "default_death_drawdown_pct")]
    pub death_drawdown_pct: f64,
    #[serde(default = "default_censor_inactive_days")]
    pub censor_inactive_days: i64,
    #[serde(default = "default_replay_evaluation_days")]
    pub replay_evaluation_days: i64,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            min_episodes: default_snapshot_min_episodes(),
            bh_alpha: default_bh_alpha(),
            round_trip_cost_bps: default_round_trip_cost_bps(),
            death_drawdown_pct: default_death_drawdown_pct(),
            censor_inactive_days: default_censor_inactive_days(),
            replay_evaluation_days: default_replay_evaluation_days(),
        }
    }
}

/// Tunables for `ConsensusDetector`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusConfig {
    #[serde(default = "default_min_traders")]
    pub min_traders: usize,
    #[serde(default = "default_supermajority_threshold")]
    pub supermajority_threshold: f64,
    #[serde(default = "default_min_effective_k")]
    pub min_effective_k: f64,
    #[serde(default = "default_max_signal_age_s")]
    pub max_signal_age_s: i64,
    #[serde(default = "default_price_band_atr_fraction")]
    pub price_band_atr_fraction: f64,
    #[serde(default = "default_min_ev_r")]
    pub min_ev_r: f64,
    #[serde(default)]
    pub strict_atr: bool,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            min_traders: default_min_traders(),
            supermajority_threshold: default_supermajority_threshold(),
            min_effective_k: default_min_effective_k(),
            max_signal_age_s: default_max_signal_age_s(),
            price_band_atr_fraction: default_price_band_atr_fraction(),
            min_ev_r: default_min_ev_r(),
            strict_atr: false,
        }
    }
}

/// Tunables for `RiskGovernor`. Each *_bounds pair is the configurable clamp
/// range named alongside the gate in the component design.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    #[serde(default = "default_kill_switch_cooldown_s")]
    pub kill_switch_cooldown_s: i64,
    #[serde(default = "default_min_equity_floor")]
    pub min_equity_floor: f64,
    #[serde(default = "default_liquidation_distance_min")]
    pub liquidation_distance_min: f64,
    #[serde(default = "default_daily_drawdown_kill_pct")]
    pub daily_drawdown_kill_pct: f64,
    #[serde(default = "default_max_position_size_pct")]
    pub max_position_size_pct: f64,
    #[serde(default = "default_max_total_exposure_pct")]
    pub max_total_exposure_pct: f64,
    /// Liquidation distance warns (but doesn't block) when `margin_ratio` is
    /// below `liquidation_distance_min * liquidation_distance_warn_multiplier`
    /// (e.g. 1.5 * 1.5 = 2.25).
    #[serde(default = "default_liquidation_distance_warn_multiplier")]
    pub liquidation_distance_warn_multiplier: f64,
    /// Daily drawdown warns (but doesn't block) once it reaches this fraction
    /// of `daily_drawdown_kill_pct` (e.g. 0.5 * 5% = 2.5%).
    #[serde(default = "default_daily_drawdown_warn_fraction")]
    pub daily_drawdown_warn_fraction: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            kill_switch_cooldown_s: default_kill_switch_cooldown_s(),
            min_equity_floor: default_min_equity_floor(),
            liquidation_distance_min: default_liquidation_distance_min(),
            daily_drawdown_kill_pct: default_daily_drawdown_kill_pct(),
            max_position_size_pct: default_max_position_size_pct(),
            max_total_exposure_pct: default_max_total_exposure_pct(),
            liquidation_distance_warn_multiplier: default_liquidation_distance_warn_multiplier(),
            daily_drawdown_warn_fraction: default_daily_drawdown_warn_fraction(),
        }
    }
}

impl RiskConfig {
    /// Clamp bounds per §4.10: (min, max) for each operator-configurable gate.
    pub const KILL_SWITCH_COOLDOWN_BOUNDS_S: (i64, i64) = (3600, 7 * 86_400);
    pub const EQUITY_FLOOR_BOUNDS: (f64, f64) = (1_000.0, 50_000.0);
    pub const LIQUIDATION_DISTANCE_BOUNDS: (f64, f64) = (1.2, 3.0);
    pub const DAILY_DRAWDOWN_BOUNDS: (f64, f64) = (0.02, 0.10);
    pub const POSITION_SIZE_BOUNDS: (f64, f64) = (0.02, 0.25);
    pub const TOTAL_EXPOSURE_BOUNDS: (f64, f64) = (0.25, 1.0);
}

/// Tunables for `StateStore`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateStoreConfig {
    #[serde(default = "default_max_tracked_addresses")]
    pub max_tracked_addresses: usize,
    #[serde(default = "default_max_scores")]
    pub max_scores: usize,
    #[serde(default = "default_stale_threshold_hours")]
    pub stale_threshold_hours: f64,
}

impl Default for StateStoreConfig {
    fn default() -> Self {
        Self {
            max_tracked_addresses: default_max_tracked_addresses(),
            max_scores: default_max_scores(),
            stale_threshold_hours: default_stale_threshold_hours(),
        }
    }
}

/// Tunables for `Orchestrator` ring buffers and periodic jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default = "default_max_recent_errors")]
    pub max_recent_errors: usize,
    #[serde(default = "default_max_recent_decisions")]
    pub max_recent_decisions: usize,
    #[serde(default = "default_fill_sync_interval_s")]
    pub fill_sync_interval_s: u64,
}

fn default_fill_sync_interval_s() -> u64 {
    300
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_recent_errors: default_max_recent_errors(),
            max_recent_decisions: default_max_recent_decisions(),
            fill_sync_interval_s: default_fill_sync_interval_s(),
        }
    }
}

/// Top-level runtime configuration for the decision core.
///
/// Every field has a serde default so that older JSON files missing new
/// fields will still deserialise correctly.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub atr: AtrConfig,
    #[serde(default)]
    pub funding: FundingConfig,
    #[serde(default)]
    pub hold_time: HoldTimeConfig,
    #[serde(default)]
    pub correlation: CorrelationConfig,
    #[serde(default)]
    pub snapshot: SnapshotConfig,
    #[serde(default)]
    pub consensus: ConsensusConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub state_store: StateStoreConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;

        info!(path = %path.display(), "runtime config loaded");
        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename) so a crash mid-write never corrupts
    /// the on-disk copy.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise runtime config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "runtime config saved (atomic)");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_spec_constants() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.atr.period, 14);
        assert_eq!(cfg.atr.multiplier_btc, 2.0);
        assert_eq!(cfg.atr.multiplier_eth, 1.5);
        assert_eq!(cfg.funding.fallback_bps, 8.0);
        assert_eq!(cfg.hold_time.default_hours, 24.0);
        assert_eq!(cfg.hold_time.min_episodes, 10);
        assert_eq!(cfg.snapshot.min_episodes, 20);
        assert_eq!(cfg.snapshot.bh_alpha, 0.10);
        assert_eq!(cfg.consensus.min_traders, 3);
        assert_eq!(cfg.consensus.supermajority_threshold, 0.70);
        assert_eq!(cfg.risk.min_equity_floor, 10_000.0);
        assert_eq!(cfg.risk.liquidation_distance_min, 1.5);
        assert_eq!(cfg.state_store.max_tracked_addresses, 1000);
        assert_eq!(cfg.state_store.max_scores, 500);
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: RuntimeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.atr.period, 14);
        assert_eq!(cfg.risk.daily_drawdown_kill_pct, 0.05);
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{ "risk": { "min_equity_floor": 20000.0 } }"#;
        let cfg: RuntimeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.risk.min_equity_floor, 20000.0);
        assert_eq!(cfg.risk.liquidation_distance_min, 1.5);
        assert_eq!(cfg.atr.period, 14);
    }

    #[test]
    fn roundtrip_serialisation() {
        let cfg = RuntimeConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let cfg2: RuntimeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.atr.period, cfg2.atr.period);
        assert_eq!(cfg.risk.min_equity_floor, cfg2.risk.min_equity_floor);
    }

    #[test]
    fn save_then_load_roundtrips_through_tmp_rename() {
        let dir = std::env::temp_dir().join(format!("sage-core-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("runtime_config.json");

        let mut cfg = RuntimeConfig::default();
        cfg.risk.min_equity_floor = 15_000.0;
        cfg.save(&path).unwrap();

        let tmp_path = path.with_extension("json.tmp");
        assert!(!tmp_path.exists());

        let loaded = RuntimeConfig::load(&path).unwrap();
        assert_eq!(loaded.risk.min_equity_floor, 15_000.0);

        std::fs::remove_dir_all(&dir).ok();
    }
}
