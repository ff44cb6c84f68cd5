// =============================================================================
// Fill — immutable venue fill event, and the bus contracts around it
// =============================================================================
//
// `Fill` is the unit the EpisodeTracker consumes. `FillEvent`/`CandidateEvent`/
// `ScoreEvent` are the wire contracts for the message-bus subjects named in
// the external-interfaces section; no live bus client is wired here, these
// are just the typed shapes a real NATS/JetStream consumer would deserialize
// into and publish.
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::Side;

/// A single immutable fill.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fill {
    pub fill_id: String,
    pub source: String,
    pub address: String,
    pub asset: String,
    pub side: Side,
    pub size: f64,
    pub price: f64,
    pub ts: DateTime<Utc>,
    pub start_position: f64,
    #[serde(default)]
    pub realized_pnl: Option<f64>,
    #[serde(default)]
    pub fees: f64,
}

impl Fill {
    /// Fallback key when the venue doesn't supply a stable `fill_id`.
    pub fn fallback_id(address: &str, ts: DateTime<Utc>) -> String {
        format!("backfill-{address}-{}", ts.timestamp_millis())
    }

    /// Signed size per the global convention: `+size` for buy, `-size` for sell.
    pub fn signed_size(&self) -> f64 {
        self.side.signed(self.size)
    }

    /// Notional value of this fill.
    pub fn notional(&self) -> f64 {
        self.price * self.size
    }
}

/// Wire shape of the `c.fills.v1` subject.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FillEvent {
    pub fill_id: String,
    pub source: String,
    pub address: String,
    pub asset: String,
    pub side: Side,
    pub size: f64,
    pub price: f64,
    pub ts: DateTime<Utc>,
    pub start_position: f64,
    #[serde(default)]
    pub realized_pnl: Option<f64>,
    #[serde(default)]
    pub meta: serde_json::Value,
}

impl From<FillEvent> for Fill {
    fn from(e: FillEvent) -> Self {
        Fill {
            fill_id: e.fill_id,
            source: e.source,
            address: e.address,
            asset: e.asset,
            side: e.side,
            size: e.size,
            price: e.price,
            ts: e.ts,
            start_position: e.start_position,
            realized_pnl: e.realized_pnl,
            fees: 0.0,
        }
    }
}

/// Leaderboard metadata nested in `CandidateEvent.meta`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LeaderboardMeta {
    #[serde(default)]
    pub weight: Option<f64>,
    #[serde(default)]
    pub rank: Option<u32>,
    #[serde(default)]
    pub period_days: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CandidateMeta {
    #[serde(default)]
    pub leaderboard: LeaderboardMeta,
}

/// Wire shape of the `a.candidates.v1` subject.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateEvent {
    pub address: String,
    #[serde(default)]
    pub score_hint: Option<f64>,
    #[serde(default)]
    pub meta: CandidateMeta,
}

impl CandidateEvent {
    /// `weight = max(0.05, min(1.0, leaderboard.weight or score_hint or 0.1))`.
    pub fn weight(&self) -> f64 {
        let raw = self
            .meta
            .leaderboard
            .weight
            .or(self.score_hint)
            .unwrap_or(0.1);
        raw.clamp(0.05, 1.0)
    }

    pub fn rank(&self) -> u32 {
        self.meta.leaderboard.rank.unwrap_or(999)
    }

    pub fn period_days(&self) -> u32 {
        self.meta.leaderboard.period_days.unwrap_or(30)
    }
}

/// Meta payload attached to a published `ScoreEvent`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreEventMeta {
    pub source: String,
    pub period: u32,
    pub position: f64,
    pub fill: Option<String>,
}

/// Wire shape of the `b.scores.v1` subject.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreEvent {
    pub address: String,
    pub score: f64,
    pub weight: f64,
    pub rank: u32,
    pub window_s: u64,
    pub ts: DateTime<Utc>,
    pub meta: ScoreEventMeta,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fill(side: Side, size: f64) -> Fill {
        Fill {
            fill_id: "f1".into(),
            source: "hyperliquid".into(),
            address: "0xabc".into(),
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
    fn signed_size_matches_convention() {
        assert_eq!(fill(Side::Buy, 1.0).signed_size(), 1.0);
        assert_eq!(fill(Side::Sell, 1.0).signed_size(), -1.0);
    }

    #[test]
    fn candidate_weight_clamped_and_defaulted() {
        let c = CandidateEvent {
            address: "0xabc".into(),
            score_hint: None,
            meta: CandidateMeta::default(),
        };
        assert_eq!(c.weight(), 0.1);
        assert_eq!(c.rank(), 999);
        assert_eq!(c.period_days(), 30);

        let c2 = CandidateEvent {
            address: "0xabc".into(),
            score_hint: Some(0.02),
            meta: CandidateMeta::default(),
        };
        assert_eq!(c2.weight(), 0.05);

        let c3 = CandidateEvent {
            address: "0xabc".into(),
            score_hint: None,
            meta: CandidateMeta {
                leaderboard: LeaderboardMeta {
                    weight: Some(5.0),
                    rank: Some(1),
                    period_days: Some(7),
                },
            },
        };
        assert_eq!(c3.weight(), 1.0);
        assert_eq!(c3.rank(), 1);
        assert_eq!(c3.period_days(), 7);
    }

    #[test]
    fn fallback_id_is_deterministic_per_address_and_ts() {
        let ts = Utc::now();
        assert_eq!(Fill::fallback_id("0xabc", ts), Fill::fallback_id("0xabc", ts));
    }
}
