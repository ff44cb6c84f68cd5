// =============================================================================
// VenueClient — capability boundary for concrete exchange adapters
// =============================================================================
//
// Exchange REST/WS adapters are an external collaborator (out of scope here).
// This trait is the seam: a concrete venue implementation is a tagged
// variant selected at startup and handed to providers that need live data
// (FundingProvider's API tier). No concrete implementation lives in this
// crate.
// =============================================================================

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::Venue;

/// Per-venue rate-limit delay enforced before each outgoing request.
pub fn rate_limit_delay_ms(venue: Venue) -> u64 {
    match venue {
        Venue::Hyperliquid => 300,
        Venue::Bybit => 750,
        Venue::Aster => 500,
    }
}

/// Balance snapshot for a single asset from the exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceInfo {
    pub asset: String,
    #[serde(default)]
    pub free: f64,
    #[serde(default)]
    pub locked: f64,
}

#[async_trait]
pub trait VenueClient: Send + Sync {
    fn venue(&self) -> Venue;

    /// Fetch the current funding rate in basis points per `interval_hours`.
    async fn get_funding(&self, asset: &str) -> anyhow::Result<f64>;

    /// Fetch account balances keyed by asset.
    async fn get_balances(&self) -> anyhow::Result<Vec<BalanceInfo>>;

    /// Place an order; returns a venue order id.
    async fn place_order(&self, asset: &str, side: crate::types::Side, size: f64) -> anyhow::Result<String>;

    /// Stream fills for this venue. Out of scope to implement concretely;
    /// concrete venues wire this to their own WS/REST polling loop.
    async fn stream_fills(&self) -> anyhow::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_delays_match_venue_table() {
        assert_eq!(rate_limit_delay_ms(Venue::Hyperliquid), 300);
        assert_eq!(rate_limit_delay_ms(Venue::Bybit), 750);
        assert_eq!(rate_limit_delay_ms(Venue::Aster), 500);
    }
}
