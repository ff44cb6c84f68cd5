// =============================================================================
// Orchestrator — binds components, owns shared state, publishes decisions
// =============================================================================
//
// The single source of truth for the decision core. Every provider/tracker
// is a process-wide singleton reached through an `Arc` handle here; the
// `Orchestrator` itself binds the bus-consumer semantics (§6) and periodic
// jobs (§5) to them and exposes `build_snapshot()` for the HTTP surface
// (§4.12).
//
// Thread safety:
//   - `AtomicU64` for lock-free state-version tracking.
//   - `parking_lot::RwLock` for mutable shared collections.
//   - `Arc` wrappers for subsystem engines that manage their own interior
//     mutability.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;

use crate::bandit::NigPosterior;
use crate::config::RuntimeConfig;
use crate::correlation::CorrelationProvider;
use crate::decision_envelope::DecisionEnvelope;
use crate::episode::EpisodeTracker;
use crate::fill::{CandidateEvent, Fill};
use crate::futures_intel::FundingProvider;
use crate::hold_time::HoldTimeEstimator;
use crate::indicators::atr::AtrProvider;
use crate::regime::RegimeDetector;
use crate::risk::{RiskGovernor, RiskState};
use crate::snapshot::{self, TraderHistory, TraderSnapshot};
use crate::state_store::StateStore;

/// A recorded error event for the `/healthz`/dashboard surface.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub message: String,
    pub at: String,
}

/// Central application state shared across all async tasks via `Arc<Orchestrator>`.
pub struct Orchestrator {
    /// Monotonically increasing version counter, bumped on every
    /// externally-visible mutation.
    pub state_version: AtomicU64,

    pub runtime_config: Arc<RwLock<RuntimeConfig>>,

    pub atr_provider: Arc<AtrProvider>,
    pub funding_provider: Arc<FundingProvider>,
    pub hold_time_estimator: Arc<HoldTimeEstimator>,
    pub correlation_provider: Arc<CorrelationProvider>,
    pub regime_detector: Arc<RegimeDetector>,
    pub episode_tracker: Arc<EpisodeTracker>,
    pub state_store: Arc<StateStore>,
    pub risk_governor: Arc<RiskGovernor>,

    pub recent_decisions: RwLock<Vec<DecisionEnvelope>>,
    pub recent_errors: RwLock<Vec<ErrorRecord>>,

    /// Closed-episode history per address, fed by `handle_fill` and consumed
    /// by the daily snapshot job (§4.7).
    trader_histories: RwLock<HashMap<String, TraderHistory>>,

    pub start_time: std::time::Instant,
}

impl Orchestrator {
    pub fn new(config: RuntimeConfig) -> Self {
        let atr_provider = Arc::new(AtrProvider::new(config.atr.clone(), 500));
        let funding_provider = Arc::new(FundingProvider::new(config.funding.clone()));
        let hold_time_estimator = Arc::new(HoldTimeEstimator::new(config.hold_time.clone()));
        let correlation_provider = Arc::new(CorrelationProvider::new(config.correlation.clone()));
        let regime_detector = RegimeDetector::new();
        let episode_tracker = Arc::new(EpisodeTracker::new());
        let state_store = Arc::new(StateStore::new(config.state_store.clone()));
        let risk_governor = Arc::new(RiskGovernor::new(config.risk.clone()));

        Self {
            state_version: AtomicU64::new(1),
            runtime_config: Arc::new(RwLock::new(config)),
            atr_provider,
            funding_provider,
            hold_time_estimator,
            correlation_provider,
            regime_detector,
            episode_tracker,
            state_store,
            risk_governor,
            recent_decisions: RwLock::new(Vec::new()),
            recent_errors: RwLock::new(Vec::new()),
            trader_histories: RwLock::new(HashMap::new()),
            start_time: std::time::Instant::now(),
        }
    }

    /// Atomically increment the state version. Call after every meaningful
    /// mutation so observers can detect fresh data.
    pub fn increment_version(&self) -> u64 {
        self.state_version.fetch_add(1, Ordering::SeqCst)
    }

    pub fn current_state_version(&self) -> u64 {
        self.state_version.load(Ordering::SeqCst)
    }

    fn max_recent_errors(&self) -> usize {
        self.runtime_config.read().orchestrator.max_recent_errors
    }

    fn max_recent_decisions(&self) -> usize {
        self.runtime_config.read().orchestrator.max_recent_decisions
    }

    pub fn push_error(&self, message: String) {
        let record = ErrorRecord { message, at: Utc::now().to_rfc3339() };
        let cap = self.max_recent_errors();
        let mut errors = self.recent_errors.write();
        errors.push(record);
        while errors.len() > cap {
            errors.remove(0);
        }
        self.increment_version();
    }

    pub fn push_decision(&self, envelope: DecisionEnvelope) {
        let cap = self.max_recent_decisions();
        let mut decisions = self.recent_decisions.write();
        decisions.push(envelope);
        while decisions.len() > cap {
            decisions.remove(0);
        }
        self.increment_version();
    }

    /// `handle_candidate` per §6: routes a leaderboard candidate into `StateStore`.
    pub fn handle_candidate(&self, candidate: &CandidateEvent) {
        self.state_store.handle_candidate(candidate, Utc::now());
        self.increment_version();
    }

    /// `handle_fill` per §6/§4.5: routes a fill into both `StateStore` (score
    /// path) and `EpisodeTracker` (episode lifecycle), returning any episode
    /// the fill closed.
    pub fn handle_fill(&self, fill: &Fill, window_s: u64) -> Option<crate::episode::Episode> {
        self.state_store.handle_fill(fill, window_s, Utc::now());

        let atr = self.atr_provider.get(&fill.asset, fill.price, None);
        let outcome = self.episode_tracker.process_fill(fill, atr.stop_fraction());
        self.increment_version();

        match outcome {
            crate::episode::ProcessOutcome::Closed(episode) => {
                self.record_closed_episode(&episode, atr.atr);
                Some(episode)
            }
            _ => None,
        }
    }

    /// Fold a closed episode into its address's running history for the
    /// next snapshot job run.
    fn record_closed_episode(&self, episode: &crate::episode::Episode, atr_at_entry: f64) {
        let mut histories = self.trader_histories.write();
        let history = histories.entry(episode.address.clone()).or_insert_with(|| TraderHistory {
            address: episode.address.clone(),
            episode_r: Vec::new(),
            entry_price_atr: Vec::new(),
            posterior: NigPosterior::prior(),
            running_peak_r_sum: 0.0,
            current_r_sum: 0.0,
            days_since_last_activity: 0,
        });

        history.episode_r.push(episode.result_r);
        history.entry_price_atr.push((episode.entry_vwap, atr_at_entry));
        history.posterior = history.posterior.update(episode.result_r);
        history.current_r_sum += episode.result_r;
        history.running_peak_r_sum = history.running_peak_r_sum.max(history.current_r_sum);
        history.days_since_last_activity = 0;
    }

    /// Run the daily snapshot job (§4.7, §5) over every address with
    /// closed-episode history, applying BH-FDR selection across the whole
    /// tracked population.
    pub fn run_snapshot_job(&self, snapshot_date: chrono::DateTime<Utc>, selection_version: u64) -> Vec<TraderSnapshot> {
        let histories: Vec<TraderHistory> = self.trader_histories.read().values().cloned().collect();
        let date_int = snapshot_date.format("%Y%m%d").to_string().parse().unwrap_or(0);
        let config = self.runtime_config.read().snapshot.clone();
        let rows = snapshot::build_daily_snapshot(&histories, snapshot_date, selection_version, date_int, &config);
        self.increment_version();
        rows
    }

    pub fn update_risk_state(&self, state: RiskState) {
        self.risk_governor.update_state(state);
        self.increment_version();
    }

    /// Build a serializable snapshot for the HTTP surface (§6 `/healthz`).
    pub fn build_snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            state_version: self.current_state_version(),
            server_time: Utc::now().timestamp_millis(),
            uptime_s: self.start_time.elapsed().as_secs(),
            scores: self.state_store.score_count(),
            tracked_addresses: self.state_store.tracked_address_count(),
            open_episodes: self.episode_tracker.all_open().len(),
            risk: self.risk_governor.state(),
            kill_switch_active: self.risk_governor.is_kill_switch_active(Utc::now()),
            recent_decisions: self.recent_decisions.read().clone(),
            recent_errors: self.recent_errors.read().clone(),
        }
    }
}

/// Full orchestrator snapshot sent to `/healthz` and the dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct StateSnapshot {
    pub state_version: u64,
    pub server_time: i64,
    pub uptime_s: u64,
    pub scores: usize,
    pub tracked_addresses: usize,
    pub open_episodes: usize,
    pub risk: RiskState,
    pub kill_switch_active: bool,
    pub recent_decisions: Vec<DecisionEnvelope>,
    pub recent_errors: Vec<ErrorRecord>,
}
