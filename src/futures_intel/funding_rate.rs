// =============================================================================
// FundingProvider — Cached per-(venue,asset) funding cost
// =============================================================================
//
// Not a signal generator: this is a pure cost calculator consumed by the
// consensus EV gate and the walk-forward cost model. Funding rates are
// periodic payments between longs and shorts; longs pay positive rates,
// shorts receive them.
//
// Fetch order: venue API (via `VenueClient::get_funding`) -> static
// per-venue/asset default -> conservative fallback.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::FundingConfig;
use crate::types::{Direction, FundingSource, Venue};
use crate::venue::VenueClient;

/// A single funding read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundingData {
    pub asset: String,
    pub exchange: String,
    pub rate_bps: f64,
    pub interval_hours: f64,
    pub next_funding_time: Option<chrono::DateTime<Utc>>,
    pub source: FundingSource,
}

impl FundingData {
    /// Signed cost over `hours` of holding: positive for longs (they pay),
    /// negative for shorts (they receive), linear in the number of funding
    /// intervals elapsed.
    pub fn cost_for_hold_time(&self, hours: f64, direction: Direction) -> f64 {
        let periods = hours / self.interval_hours;
        let raw = self.rate_bps * periods;
        match direction {
            Direction::Long => raw,
            Direction::Short => -raw,
        }
    }
}

fn static_default_bps(exchange: &str, asset: &str) -> Option<f64> {
    match (exchange, asset) {
        ("hyperliquid", "BTC") | ("aster", "BTC") => Some(8.0),
        ("hyperliquid", "ETH") | ("aster", "ETH") => Some(10.0),
        ("bybit", "BTC") => Some(5.0),
        ("bybit", "ETH") => Some(7.0),
        _ => None,
    }
}

struct CacheEntry {
    data: FundingData,
    cached_at: Instant,
}

/// Per-(venue,asset) funding provider with a short-TTL cache.
pub struct FundingProvider {
    config: FundingConfig,
    cache: RwLock<HashMap<(String, String), CacheEntry>>,
    venue_client: Option<Arc<dyn VenueClient>>,
}

impl FundingProvider {
    pub fn new(config: FundingConfig) -> Self {
        Self {
            config,
            cache: RwLock::new(HashMap::new()),
            venue_client: None,
        }
    }

    pub fn with_venue_client(config: FundingConfig, client: Arc<dyn VenueClient>) -> Self {
        Self {
            config,
            cache: RwLock::new(HashMap::new()),
            venue_client: Some(client),
        }
    }

    /// Fetch the current funding read for `(exchange, asset)`, falling back
    /// through the API -> static -> conservative-default chain.
    pub async fn get(&self, exchange: &str, asset: &str) -> FundingData {
        let key = (exchange.to_string(), asset.to_string());
        {
            let cache = self.cache.read();
            if let Some(entry) = cache.get(&key) {
                if entry.cached_at.elapsed() < Duration::from_secs(self.config.cache_ttl_s) {
                    debug!(exchange, asset, "funding cache hit");
                    return entry.data.clone();
                }
            }
        }

        let data = self.fetch(exchange, asset).await;

        let mut cache = self.cache.write();
        cache.insert(
            key,
            CacheEntry {
                data: data.clone(),
                cached_at: Instant::now(),
            },
        );
        data
    }

    async fn fetch(&self, exchange: &str, asset: &str) -> FundingData {
        if let Some(client) = &self.venue_client {
            match client.get_funding(asset).await {
                Ok(rate_bps) => {
                    return FundingData {
                        asset: asset.to_string(),
                        exchange: exchange.to_string(),
                        rate_bps,
                        interval_hours: self.config.interval_hours,
                        next_funding_time: None,
                        source: FundingSource::Api,
                    };
                }
                Err(e) => {
                    warn!(exchange, asset, error = %e, "funding API fetch failed, falling back to static default");
                }
            }
        }

        let rate_bps = static_default_bps(exchange, asset).unwrap_or(self.config.fallback_bps);
        FundingData {
            asset: asset.to_string(),
            exchange: exchange.to_string(),
            rate_bps,
            interval_hours: self.config.interval_hours,
            next_funding_time: None,
            source: FundingSource::Static,
        }
    }

    /// Venues this provider recognizes a static default for.
    pub fn known_venues() -> &'static [Venue] {
        &[Venue::Hyperliquid, Venue::Bybit, Venue::Aster]
    }
}
