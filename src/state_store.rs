// =============================================================================
// StateStore — bounded LRU of tracked addresses and live scores
// =============================================================================
//
// Two independent LRU maps (§4.11): `tracked_addresses` (candidates seen from
// the leaderboard feed) and `scores` (the last score published per address).
// Both evict least-recently-used on overflow and are swept periodically for
// entries stale beyond `stale_threshold_hours`. Postgres mirroring is
// best-effort: a write-through failure never blocks the in-memory path.
// =============================================================================

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::StateStoreConfig;
use crate::fill::{CandidateEvent, Fill, ScoreEvent, ScoreEventMeta};

/// A candidate address tracked from the leaderboard feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedAddress {
    pub address: String,
    pub weight: f64,
    pub rank: u32,
    pub period_days: u32,
    pub position: f64,
    pub updated_ts: DateTime<Utc>,
}

/// Bounded, LRU-evicting, insertion-order-tracked map.
struct LruMap<V> {
    capacity: usize,
    entries: HashMap<String, V>,
    order: VecDeque<String>,
}

impl<V> LruMap<V> {
    fn new(capacity: usize) -> Self {
        LruMap { capacity, entries: HashMap::new(), order: VecDeque::new() }
    }

    fn touch(&mut self, key: &str) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            self.order.remove(pos);
        }
        self.order.push_back(key.to_string());
    }

    fn insert(&mut self, key: String, value: V) {
        self.touch(&key);
        self.entries.insert(key, value);
        while self.entries.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            } else {
                break;
            }
        }
    }

    fn get(&self, key: &str) -> Option<&V> {
        self.entries.get(key)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn retain_fresh(&mut self, is_fresh: impl Fn(&V) -> bool) {
        let stale: Vec<String> =
            self.entries.iter().filter(|(_, v)| !is_fresh(v)).map(|(k, _)| k.clone()).collect();
        for key in stale {
            self.entries.remove(&key);
            if let Some(pos) = self.order.iter().position(|k| k == &key) {
                self.order.remove(pos);
            }
        }
    }
}

/// In-memory state of tracked addresses and their last-published scores.
pub struct StateStore {
    config: StateStoreConfig,
    tracked_addresses: RwLock<LruMap<TrackedAddress>>,
    scores: RwLock<LruMap<ScoreEvent>>,
}

impl StateStore {
    pub fn new(config: StateStoreConfig) -> Self {
        StateStore {
            tracked_addresses: RwLock::new(LruMap::new(config.max_tracked_addresses)),
            scores: RwLock::new(LruMap::new(config.max_scores)),
            config,
        }
    }

    /// `handle_candidate` per §6: upserts the address into `tracked_addresses`.
    pub fn handle_candidate(&self, candidate: &CandidateEvent, now: DateTime<Utc>) -> TrackedAddress {
        let mut tracked = self.tracked_addresses.write();
        let position = tracked.get(&candidate.address).map(|t| t.position).unwrap_or(0.0);
        let entry = TrackedAddress {
            address: candidate.address.clone(),
            weight: candidate.weight(),
            rank: candidate.rank(),
            period_days: candidate.period_days(),
            position,
            updated_ts: now,
        };
        tracked.insert(candidate.address.clone(), entry.clone());
        entry
    }

    /// `handle_fill` per §6 (StateStore score path, distinct from `EpisodeTracker`):
    /// accumulates signed position and publishes a `ScoreEvent`.
    pub fn handle_fill(&self, fill: &Fill, window_s: u64, now: DateTime<Utc>) -> ScoreEvent {
        let side_multiplier = fill.side.signed(1.0);
        let delta = side_multiplier * fill.size;

        let (weight, rank, period, position) = {
            let mut tracked = self.tracked_addresses.write();
            let (weight, rank, period, prior_position) = match tracked.get(&fill.address) {
                Some(t) => (t.weight, t.rank, t.period_days, t.position),
                None => (0.1, 999, 30, 0.0),
            };
            let position = prior_position + delta;
            tracked.insert(
                fill.address.clone(),
                TrackedAddress {
                    address: fill.address.clone(),
                    weight,
                    rank,
                    period_days: period,
                    position,
                    updated_ts: now,
                },
            );
            (weight, rank, period, position)
        };

        let base_score = (weight * side_multiplier).clamp(-1.0, 1.0);
        let event = ScoreEvent {
            address: fill.address.clone(),
            score: base_score,
            weight,
            rank,
            window_s,
            ts: now,
            meta: ScoreEventMeta {
                source: "leaderboard".to_string(),
                period,
                position,
                fill: Some(fill.fill_id.clone()),
            },
        };

        self.scores.write().insert(fill.address.clone(), event.clone());
        event
    }

    pub fn tracked_address_count(&self) -> usize {
        self.tracked_addresses.read().len()
    }

    pub fn score_count(&self) -> usize {
        self.scores.read().len()
    }

    pub fn get_tracked_address(&self, address: &str) -> Option<TrackedAddress> {
        self.tracked_addresses.read().get(address).cloned()
    }

    pub fn get_score(&self, address: &str) -> Option<ScoreEvent> {
        self.scores.read().get(address).cloned()
    }

    /// Snapshot of every currently tracked address. Used by the fill-sync
    /// job to write through to Postgres.
    pub fn tracked_addresses(&self) -> Vec<TrackedAddress> {
        self.tracked_addresses.read().entries.values().cloned().collect()
    }

    /// Top `n` scores by value, descending. Used by `GET /ranks/top`.
    pub fn top_scores(&self, n: usize) -> Vec<ScoreEvent> {
        let scores = self.scores.read();
        let mut all: Vec<ScoreEvent> = scores.entries.values().cloned().collect();
        all.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        all.truncate(n);
        all
    }

    /// Periodic eviction pass: drops entries whose `updated_ts`/`ts` is older
    /// than `stale_threshold_hours`.
    pub fn evict_stale(&self, now: DateTime<Utc>) {
        let max_age_s = (self.config.stale_threshold_hours * 3600.0) as i64;
        self.tracked_addresses
            .write()
            .retain_fresh(|t| now.signed_duration_since(t.updated_ts).num_seconds() <= max_age_s);
        self.scores.write().retain_fresh(|s| now.signed_duration_since(s.ts).num_seconds() <= max_age_s);
    }

    /// Best-effort write-through to Postgres. Failures are logged, never
    /// propagated — the in-memory store remains authoritative for this process.
    pub async fn persist_tracked_address(&self, pool: &sqlx::PgPool, tracked: &TrackedAddress) {
        let result = sqlx::query(
            "INSERT INTO tracked_addresses (address, weight, rank, period_days, position, updated_ts) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (address) DO UPDATE SET \
             weight = EXCLUDED.weight, rank = EXCLUDED.rank, period_days = EXCLUDED.period_days, \
             position = EXCLUDED.position, updated_ts = EXCLUDED.updated_ts",
        )
        .bind(&tracked.address)
        .bind(tracked.weight)
        .bind(tracked.rank as i32)
        .bind(tracked.period_days as i32)
        .bind(tracked.position)
        .bind(tracked.updated_ts)
        .execute(pool)
        .await;

        if let Err(err) = result {
            warn!(address = %tracked.address, error = %err, "failed to persist tracked address");
        }
    }

    /// Restore tracked addresses newer than 24h from Postgres, capped at
    /// `max_tracked_addresses`, ordered oldest-first so the most recent end up
    /// most-recently-used.
    pub async fn restore_from_postgres(&self, pool: &sqlx::PgPool) -> Result<usize, sqlx::Error> {
        let cap = self.config.max_tracked_addresses as i64;
        let rows: Vec<(String, f64, i32, i32, f64, DateTime<Utc>)> = sqlx::query_as(
            "SELECT address, weight, rank, period_days, position, updated_ts FROM tracked_addresses \
             WHERE updated_ts > now() - interval '24 hours' ORDER BY updated_ts ASC LIMIT $1",
        )
        .bind(cap)
        .fetch_all(pool)
        .await?;

        let mut tracked = self.tracked_addresses.write();
        let count = rows.len();
        for (address, weight, rank, period_days, position, updated_ts) in rows {
            tracked.insert(
                address.clone(),
                TrackedAddress { address, weight, rank: rank as u32, period_days: period_days as u32, position, updated_ts },
            );
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fill::{CandidateMeta, LeaderboardMeta};
    use crate::types::Side;

    fn config(max_tracked: usize, max_scores: usize) -> StateStoreConfig {
        StateStoreConfig { max_tracked_addresses: max_tracked, max_scores, stale_threshold_hours: 24.0 }
    }

    fn candidate(address: &str, weight: f64) -> CandidateEvent {
        CandidateEvent {
            address: address.to_string(),
            score_hint: None,
            meta: CandidateMeta { leaderboard: LeaderboardMeta { weight: Some(weight), rank: Some(1), period_days: Some(30) } },
        }
    }

    fn fill(address: &str, side: Side, size: f64) -> Fill {
        Fill {
            fill_id: format!("{address}-f1"),
            source: "hyperliquid".into(),
            address: address.to_string(),
            asset: "BTC".into(),
            side,
            size,
            price: 100.0,
            ts: Utc::now(),
            start_position: 0.0,
            realized_pnl: None,
            fees: 0.0,
        }
    }

    #[test]
    fn handle_candidate_tracks_leaderboard_weight() {
        let store = StateStore::new(config(10, 10));
        let tracked = store.handle_candidate(&candidate("0xabc", 0.8), Utc::now());
        assert_eq!(tracked.weight, 0.8);
        assert_eq!(store.tracked_address_count(), 1);
    }

    #[test]
    fn handle_fill_publishes_clamped_score_and_accumulates_position() {
        let store = StateStore::new(config(10, 10));
        store.handle_candidate(&candidate("0xabc", 0.8), Utc::now());

        let event1 = store.handle_fill(&fill("0xabc", Side::Buy, 2.0), 3600, Utc::now());
        assert_eq!(event1.score, 0.8);
        assert_eq!(event1.meta.position, 2.0);

        let event2 = store.handle_fill(&fill("0xabc", Side::Sell, 3.0), 3600, Utc::now());
        assert_eq!(event2.score, -0.8);
        assert_eq!(event2.meta.position, -1.0);
    }

    #[test]
    fn unknown_address_fill_uses_default_weight() {
        let store = StateStore::new(config(10, 10));
        let event = store.handle_fill(&fill("0xnew", Side::Buy, 1.0), 3600, Utc::now());
        assert_eq!(event.weight, 0.1);
        assert_eq!(event.rank, 999);
    }

    #[test]
    fn overflow_evicts_least_recently_used_tracked_address() {
        let store = StateStore::new(config(2, 2));
        let now = Utc::now();
        store.handle_candidate(&candidate("0xa", 0.5), now);
        store.handle_candidate(&candidate("0xb", 0.5), now);
        store.handle_candidate(&candidate("0xc", 0.5), now);

        assert_eq!(store.tracked_address_count(), 2);
        assert!(store.get_tracked_address("0xa").is_none());
        assert!(store.get_tracked_address("0xb").is_some());
        assert!(store.get_tracked_address("0xc").is_some());
    }

    #[test]
    fn touching_an_address_protects_it_from_eviction() {
        let store = StateStore::new(config(2, 2));
        let now = Utc::now();
        store.handle_candidate(&candidate("0xa", 0.5), now);
        store.handle_candidate(&candidate("0xb", 0.5), now);
        store.handle_candidate(&candidate("0xa", 0.6), now); // touch 0xa
        store.handle_candidate(&candidate("0xc", 0.5), now); // evicts 0xb, not 0xa

        assert!(store.get_tracked_address("0xa").is_some());
        assert!(store.get_tracked_address("0xb").is_none());
        assert!(store.get_tracked_address("0xc").is_some());
    }

    #[test]
    fn top_scores_sorted_descending_and_capped() {
        let store = StateStore::new(config(10, 10));
        store.handle_candidate(&candidate("0xa", 0.2), Utc::now());
        store.handle_candidate(&candidate("0xb", 0.9), Utc::now());
        store.handle_candidate(&candidate("0xc", 0.5), Utc::now());
        store.handle_fill(&fill("0xa", Side::Buy, 1.0), 3600, Utc::now());
        store.handle_fill(&fill("0xb", Side::Buy, 1.0), 3600, Utc::now());
        store.handle_fill(&fill("0xc", Side::Buy, 1.0), 3600, Utc::now());

        let top = store.top_scores(2);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].address, "0xb");
        assert_eq!(top[1].address, "0xc");
    }

    #[test]
    fn evict_stale_drops_old_entries() {
        let store = StateStore::new(config(10, 10));
        let old = Utc::now() - chrono::Duration::hours(30);
        store.handle_candidate(&candidate("0xold", 0.5), old);
        store.handle_candidate(&candidate("0xfresh", 0.5), Utc::now());

        store.evict_stale(Utc::now());
        assert!(store.get_tracked_address("0xold").is_none());
        assert!(store.get_tracked_address("0xfresh").is_some());
    }
}
