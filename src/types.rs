// =============================================================================
// Shared domain enums used across the decision core
// =============================================================================

use serde::{Deserialize, Serialize};

/// Fill side as reported by the venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// Signed size convention: `+size` for buy, `-size` for sell.
    pub fn signed(self, size: f64) -> f64 {
        match self {
            Side::Buy => size,
            Side::Sell => -size,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "buy"),
            Side::Sell => write!(f, "sell"),
        }
    }
}

/// Direction of an open episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn from_sign(position: f64) -> Option<Self> {
        if position > 1e-9 {
            Some(Direction::Long)
        } else if position < -1e-9 {
            Some(Direction::Short)
        } else {
            None
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Long => write!(f, "long"),
            Direction::Short => write!(f, "short"),
        }
    }
}

/// Why an episode closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClosedReason {
    FullClose,
    DirectionFlip,
    Timeout,
}

impl std::fmt::Display for ClosedReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClosedReason::FullClose => write!(f, "full_close"),
            ClosedReason::DirectionFlip => write!(f, "direction_flip"),
            ClosedReason::Timeout => write!(f, "timeout"),
        }
    }
}

/// Where an `ATRData` value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AtrSource {
    Db,
    Calculated,
    Fallback,
}

/// Where a `FundingData` value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FundingSource {
    Api,
    Static,
    Cached,
}

/// Where a `HoldTimeEstimate` value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HoldTimeSource {
    Historical,
    RegimeAdjusted,
    Fallback,
}

/// Market regime classification, consumed by `HoldTimeEstimator`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Regime {
    Trending,
    Ranging,
    Volatile,
    Unknown,
}

impl std::fmt::Display for Regime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Regime::Trending => write!(f, "trending"),
            Regime::Ranging => write!(f, "ranging"),
            Regime::Volatile => write!(f, "volatile"),
            Regime::Unknown => write!(f, "unknown"),
        }
    }
}

/// Snapshot event classification for a tracked address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Active,
    Death,
    Censored,
}

/// Target execution venue. Drives per-venue funding defaults, rate-limit
/// delays, and hold-time multipliers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Venue {
    Hyperliquid,
    Bybit,
    Aster,
}

impl std::fmt::Display for Venue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Venue::Hyperliquid => write!(f, "hyperliquid"),
            Venue::Bybit => write!(f, "bybit"),
            Venue::Aster => write!(f, "aster"),
        }
    }
}
