//! Quote engine - cached market data, quote estimation and locked quotes
//!
//! Markets come from the counterparty agent as loosely typed JSON and are
//! validated into `Market` before they are cached. Quotes are estimated
//! locally from the cache; a `LockedQuote` is the binding version the agent
//! returns when an order is created.

pub mod agent;
pub mod fees;

pub use agent::{AgentClient, OrderRequest, OrderService, OrderUpdate};
pub use fees::{estimate_fees, fee_price, FeeChoice, FeeClass, TxType};

use crate::assets::{currency_to_unit, AssetRegistry};
use crate::chain::Network;
use crate::error::{SwapError, SwapResult};

use bigdecimal::BigDecimal;
use chrono::{DateTime, TimeZone, Utc};
use dashmap::DashMap;
use serde::Deserialize;
use std::str::FromStr;
use tracing::debug;

/// A decimal that may arrive as a JSON string or number
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawDecimal {
    Text(String),
    Number(serde_json::Number),
}

impl RawDecimal {
    fn to_decimal(&self, field: &str) -> SwapResult<BigDecimal> {
        let text = match self {
            RawDecimal::Text(text) => text.clone(),
            RawDecimal::Number(n) => n.to_string(),
        };
        BigDecimal::from_str(&text)
            .map_err(|_| SwapError::OrderService(format!("Invalid {} {:?}", field, text)))
    }

    fn to_units(&self, field: &str) -> SwapResult<u128> {
        let value = self.to_decimal(field)?;
        if value < BigDecimal::from(0) {
            return Err(SwapError::OrderService(format!("Negative {} {}", field, value)));
        }
        currency_to_unit(&value, 0)
    }

    fn to_u64(&self, field: &str) -> SwapResult<u64> {
        let units = self.to_units(field)?;
        u64::try_from(units)
            .map_err(|_| SwapError::OrderService(format!("{} {} is out of range", field, units)))
    }
}

/// Market entry as served by `GET /api/swap/marketinfo`
#[derive(Debug, Clone, Deserialize)]
pub struct RawMarket {
    pub from: String,
    pub to: String,
    pub status: String,
    pub rate: RawDecimal,
    pub min: RawDecimal,
    pub max: RawDecimal,
}

/// A validated, active market
#[derive(Debug, Clone, PartialEq)]
pub struct Market {
    pub provider: String,
    pub from: String,
    pub to: String,
    pub rate: BigDecimal,
    /// Bounds in display units of `from`
    pub min: BigDecimal,
    pub max: BigDecimal,
}

impl Market {
    /// Validate a raw market; inactive markets yield `None`
    pub fn from_raw(provider: &str, raw: &RawMarket) -> SwapResult<Option<Self>> {
        if raw.status != "ACTIVE" {
            return Ok(None);
        }

        let market = Market {
            provider: provider.to_string(),
            from: raw.from.clone(),
            to: raw.to.clone(),
            rate: raw.rate.to_decimal("rate")?,
            min: raw.min.to_decimal("min")?,
            max: raw.max.to_decimal("max")?,
        };

        if market.min > market.max {
            return Err(SwapError::OrderService(format!(
                "Market {}-{} has min {} above max {}",
                market.from, market.to, market.min, market.max
            )));
        }

        Ok(Some(market))
    }

    fn accepts(&self, request: &QuoteRequest) -> bool {
        self.from == request.from
            && self.to == request.to
            && self.min <= request.amount
            && request.amount <= self.max
    }
}

/// Quote request; `amount` is in display units of `from`
#[derive(Debug, Clone, PartialEq)]
pub struct QuoteRequest {
    pub from: String,
    pub to: String,
    pub amount: BigDecimal,
}

/// Locally estimated quote
#[derive(Debug, Clone, PartialEq)]
pub struct Quote {
    pub provider: String,
    pub from: String,
    pub to: String,
    pub from_amount: u128,
    pub to_amount: u128,
    pub rate: BigDecimal,
}

/// Order as returned by `POST /api/swap/order`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawLockedQuote {
    pub id: String,
    pub from: String,
    pub to: String,
    pub from_amount: RawDecimal,
    pub to_amount: RawDecimal,
    pub from_counter_party_address: String,
    pub to_counter_party_address: String,
    /// Unix milliseconds
    pub expires_at: RawDecimal,
    /// Unix seconds
    pub swap_expiration: RawDecimal,
    /// Unix seconds
    pub node_swap_expiration: RawDecimal,
}

/// A binding quote reserved by the counterparty
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockedQuote {
    pub id: String,
    pub from: String,
    pub to: String,
    pub from_amount: u128,
    pub to_amount: u128,
    pub from_counter_party_address: String,
    pub to_counter_party_address: String,
    pub expires_at: DateTime<Utc>,
    pub swap_expiration: u64,
    pub node_swap_expiration: u64,
}

impl TryFrom<RawLockedQuote> for LockedQuote {
    type Error = SwapError;

    fn try_from(raw: RawLockedQuote) -> SwapResult<Self> {
        let expires_ms = raw.expires_at.to_u64("expiresAt")?;
        let expires_at = i64::try_from(expires_ms)
            .ok()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .ok_or_else(|| {
                SwapError::OrderService(format!("expiresAt {} is out of range", expires_ms))
            })?;

        Ok(LockedQuote {
            from_amount: raw.from_amount.to_units("fromAmount")?,
            to_amount: raw.to_amount.to_units("toAmount")?,
            swap_expiration: raw.swap_expiration.to_u64("swapExpiration")?,
            node_swap_expiration: raw.node_swap_expiration.to_u64("nodeSwapExpiration")?,
            expires_at,
            id: raw.id,
            from: raw.from,
            to: raw.to,
            from_counter_party_address: raw.from_counter_party_address,
            to_counter_party_address: raw.to_counter_party_address,
        })
    }
}

impl LockedQuote {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// Validated markets per network
#[derive(Default)]
pub struct MarketCache {
    markets: DashMap<Network, Vec<Market>>,
}

impl MarketCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace a network's markets with the active ones from `raw`
    pub fn replace(
        &self,
        network: Network,
        provider: &str,
        raw: &[RawMarket],
    ) -> SwapResult<usize> {
        let mut markets = Vec::with_capacity(raw.len());
        for entry in raw {
            if let Some(market) = Market::from_raw(provider, entry)? {
                markets.push(market);
            }
        }

        let count = markets.len();
        debug!(
            "Cached {} active markets of {} for {} on {}",
            count,
            raw.len(),
            provider,
            network
        );
        self.markets.insert(network, markets);
        Ok(count)
    }

    pub fn markets(&self, network: Network) -> Vec<Market> {
        self.markets
            .get(&network)
            .map(|m| m.value().clone())
            .unwrap_or_default()
    }

    /// Pairs a provider currently quotes on a network
    pub fn supported_pairs(&self, network: Network, provider: &str) -> Vec<(String, String)> {
        self.markets(network)
            .into_iter()
            .filter(|m| m.provider == provider)
            .map(|m| (m.from, m.to))
            .collect()
    }

    /// Estimate a quote from the first matching market
    pub fn quote(
        &self,
        network: Network,
        provider: &str,
        request: &QuoteRequest,
        assets: &AssetRegistry,
    ) -> SwapResult<Option<Quote>> {
        let markets = match self.markets.get(&network) {
            Some(markets) => markets,
            None => return Ok(None),
        };

        let market = match markets
            .iter()
            .find(|m| m.provider == provider && m.accepts(request))
        {
            Some(market) => market,
            None => return Ok(None),
        };

        let from_decimals = assets.require(&request.from)?.decimals;
        let to_decimals = assets.require(&request.to)?.decimals;
        let to_amount = &request.amount * &market.rate;

        Ok(Some(Quote {
            provider: provider.to_string(),
            from: request.from.clone(),
            to: request.to.clone(),
            from_amount: currency_to_unit(&request.amount, from_decimals)?,
            to_amount: currency_to_unit(&to_amount, to_decimals)?,
            rate: market.rate.clone(),
        }))
    }
}
