// =============================================================================
// EpisodeTracker — per-(address,asset) position lifecycle state machine
// =============================================================================
//
// Dispatch table (§4.5): each incoming fill nudges the shard's signed
// position from `prev` to `new`. Whether that opens, grows, partially
// closes, fully closes, or flips the episode is entirely a function of the
// sign and magnitude change — no other state is consulted. Replaying the
// same fill sequence through a fresh tracker must reproduce byte-identical
// episodes.
// =============================================================================

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::fill::Fill;
use crate::types::{ClosedReason, Direction};

const FLAT_EPS: f64 = 1e-9;
const TIMEOUT_HOURS: i64 = 168;
const SEEN_IDS_CAPACITY: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EpisodeStatus {
    Open,
    Closed,
}

/// A single `(address, asset)` position lifecycle record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Episode {
    pub address: String,
    pub asset: String,
    pub direction: Direction,
    pub entry_vwap: f64,
    pub entry_size: f64,
    pub entry_notional: f64,
    pub entry_ts: DateTime<Utc>,
    pub exit_vwap: f64,
    pub exit_size: f64,
    pub exit_ts: Option<DateTime<Utc>>,
    pub stop_fraction: f64,
    pub stop_price: f64,
    pub stop_bps: f64,
    pub risk_amount: f64,
    pub realized_pnl: f64,
    pub result_r: f64,
    pub result_r_unclamped: f64,
    pub status: EpisodeStatus,
    pub closed_reason: Option<ClosedReason>,

    // Running weighted-sum accumulators; not part of the public contract.
    #[serde(skip)]
    entry_price_size_sum: f64,
    #[serde(skip)]
    exit_price_size_sum: f64,
}

impl Episode {
    fn new(fill: &Fill, direction: Direction, size: f64, stop_fraction: f64) -> Self {
        let entry_vwap = fill.price;
        let entry_notional = entry_vwap * size;
        let (stop_price, _) = stop_for(direction, entry_vwap, stop_fraction);
        let stop_bps = stop_fraction * 10_000.0;
        Episode {
            address: fill.address.to_lowercase(),
            asset: fill.asset.to_uppercase(),
            direction,
            entry_vwap,
            entry_size: size,
            entry_notional,
            entry_ts: fill.ts,
            exit_vwap: 0.0,
            exit_size: 0.0,
            exit_ts: None,
            stop_fraction,
            stop_price,
            stop_bps,
            risk_amount: entry_notional * stop_fraction,
            realized_pnl: 0.0,
            result_r: 0.0,
            result_r_unclamped: 0.0,
            status: EpisodeStatus::Open,
            closed_reason: None,
            entry_price_size_sum: entry_vwap * size,
            exit_price_size_sum: 0.0,
        }
    }

    fn add_entry(&mut self, price: f64, size: f64) {
        self.entry_price_size_sum += price * size;
        self.entry_size += size;
        self.entry_vwap = self.entry_price_size_sum / self.entry_size;
        self.entry_notional = self.entry_vwap * self.entry_size;
        self.risk_amount = self.entry_notional * self.stop_fraction;
        let (stop_price, _) = stop_for(self.direction, self.entry_vwap, self.stop_fraction);
        self.stop_price = stop_price;
    }

    fn add_exit(&mut self, price: f64, size: f64) {
        self.exit_price_size_sum += price * size;
        self.exit_size += size;
        self.exit_vwap = self.exit_price_size_sum / self.exit_size;
    }

    fn close(&mut self, reason: ClosedReason, ts: DateTime<Utc>, fill_realized_pnl: Option<f64>) {
        self.exit_ts = Some(ts);
        self.status = EpisodeStatus::Closed;
        self.closed_reason = Some(reason);

        let pnl = fill_realized_pnl.unwrap_or_else(|| match self.direction {
            Direction::Long => (self.exit_vwap - self.entry_vwap) * self.exit_size,
            Direction::Short => (self.entry_vwap - self.exit_vwap) * self.exit_size,
        });
        self.realized_pnl = pnl;

        let r = if self.risk_amount.abs() > f64::EPSILON {
            pnl / self.risk_amount
        } else {
            0.0
        };
        self.result_r_unclamped = r;
        self.result_r = r.clamp(-2.0, 2.0);
    }

    /// R clamped to [-3,+3] for the posterior update (§4.6), distinct from
    /// the [-2,+2] clamp applied to `result_r` for audit purposes.
    pub fn winsorized_r(&self) -> f64 {
        self.result_r_unclamped.clamp(-3.0, 3.0)
    }
}

fn stop_for(direction: Direction, entry_vwap: f64, stop_fraction: f64) -> (f64, f64) {
    let stop_price = match direction {
        Direction::Long => entry_vwap * (1.0 - stop_fraction),
        Direction::Short => entry_vwap * (1.0 + stop_fraction),
    };
    (stop_price, stop_fraction * 10_000.0)
}

/// Outcome of processing a single fill.
#[derive(Debug, Clone)]
pub enum ProcessOutcome {
    /// `fill_id` already seen for this shard; state unchanged.
    Deduped,
    /// A new episode opened.
    Opened,
    /// The open episode's entry or exit was updated; still open.
    Updated,
    /// The open episode closed; the closed record is returned.
    Closed(Episode),
}

struct Shard {
    episode: Option<Episode>,
    position: f64,
    seen_ids: HashSet<String>,
    seen_order: VecDeque<String>,
}

impl Shard {
    fn new() -> Self {
        Shard {
            episode: None,
            position: 0.0,
            seen_ids: HashSet::new(),
            seen_order: VecDeque::new(),
        }
    }

    fn remember(&mut self, fill_id: &str) {
        if self.seen_ids.insert(fill_id.to_string()) {
            self.seen_order.push_back(fill_id.to_string());
            if self.seen_order.len() > SEEN_IDS_CAPACITY {
                if let Some(old) = self.seen_order.pop_front() {
                    self.seen_ids.remove(&old);
                }
            }
        }
    }
}

fn shard_key(address: &str, asset: &str) -> (String, String) {
    (address.to_lowercase(), asset.to_uppercase())
}

/// Per-(address,asset) episode lifecycle tracker.
pub struct EpisodeTracker {
    shards: RwLock<HashMap<(String, String), Shard>>,
}

impl EpisodeTracker {
    pub fn new() -> Self {
        EpisodeTracker {
            shards: RwLock::new(HashMap::new()),
        }
    }

    /// Process a single fill against its `(address,asset)` shard.
    ///
    /// `stop_fraction` is the ATR-driven fraction used only when this fill
    /// opens a brand-new episode; it has no effect on an already-open one.
    pub fn process_fill(&self, fill: &Fill, stop_fraction: f64) -> ProcessOutcome {
        let key = shard_key(&fill.address, &fill.asset);
        let mut shards = self.shards.write();
        let shard = shards.entry(key).or_insert_with(Shard::new);

        if shard.seen_ids.contains(&fill.fill_id) {
            return ProcessOutcome::Deduped;
        }
        shard.remember(&fill.fill_id);

        let prev = shard.position;
        let delta = fill.signed_size();
        let new = prev + delta;
        shard.position = new;

        if prev.abs() < FLAT_EPS {
            if new.abs() < FLAT_EPS {
                return ProcessOutcome::Deduped;
            }
            let direction = Direction::from_sign(new).expect("non-flat checked above");
            let episode = Episode::new(fill, direction, new.abs(), stop_fraction);
            info!(address = %episode.address, asset = %episode.asset, direction = %direction, "episode opened");
            shard.episode = Some(episode);
            return ProcessOutcome::Opened;
        }

        let episode = shard.episode.as_mut().expect("non-flat position implies open episode");

        if new.abs() < FLAT_EPS {
            episode.add_exit(fill.price, delta.abs());
            episode.close(ClosedReason::FullClose, fill.ts, fill.realized_pnl);
            info!(address = %episode.address, asset = %episode.asset, r = episode.result_r, "episode closed (full_close)");
            let closed = shard.episode.take().unwrap();
            return ProcessOutcome::Closed(closed);
        }

        let same_sign = prev.signum() == new.signum();

        if same_sign {
            if new.abs() > prev.abs() {
                episode.add_entry(fill.price, delta.abs());
            } else {
                episode.add_exit(fill.price, delta.abs());
            }
            return ProcessOutcome::Updated;
        }

        // Sign flip: the fill first closes the remainder of the current
        // episode, then the residual opens a new one in the new direction.
        let closing_size = prev.abs();
        let opening_size = new.abs();

        episode.add_exit(fill.price, closing_size);
        episode.close(ClosedReason::DirectionFlip, fill.ts, fill.realized_pnl);
        let closed = shard.episode.take().unwrap();
        info!(address = %closed.address, asset = %closed.asset, r = closed.result_r, "episode closed (direction_flip)");

        let new_direction = Direction::from_sign(new).expect("non-flat checked above");
        let new_episode = Episode::new(fill, new_direction, opening_size, stop_fraction);
        info!(address = %new_episode.address, asset = %new_episode.asset, direction = %new_direction, "episode opened (post-flip)");
        shard.episode = Some(new_episode);

        ProcessOutcome::Closed(closed)
    }

    /// The currently open episode for `(address,asset)`, if any.
    pub fn open_episode(&self, address: &str, asset: &str) -> Option<Episode> {
        let key = shard_key(address, asset);
        self.shards.read().get(&key).and_then(|s| s.episode.clone())
    }

    /// All currently open episodes across every shard.
    pub fn all_open(&self) -> Vec<Episode> {
        self.shards
            .read()
            .values()
            .filter_map(|s| s.episode.clone())
            .collect()
    }

    /// Close any open episode older than the timeout threshold (168h),
    /// relative to `now`. Returns the closed records.
    pub fn close_timeouts(&self, now: DateTime<Utc>) -> Vec<Episode> {
        let mut shards = self.shards.write();
        let mut closed = Vec::new();
        for shard in shards.values_mut() {
            if let Some(episode) = &mut shard.episode {
                if episode.status == EpisodeStatus::Open
                    && now.signed_duration_since(episode.entry_ts) >= Duration::hours(TIMEOUT_HOURS)
                {
                    episode.close(ClosedReason::Timeout, now, None);
                    shard.position = 0.0;
                    closed.push(shard.episode.take().unwrap());
                }
            }
        }
        closed
    }
}

impl Default for EpisodeTracker {
    fn default() -> Self {
        Self::new()
    }
}
