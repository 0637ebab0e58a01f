//! Asset registry: chain, token kind and decimals per asset symbol

use crate::chain::Chain;
use crate::config::AssetConfig;
use crate::error::{SwapError, SwapResult};

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Largest decimal count whose unit scale still fits in `u128`
pub const MAX_DECIMALS: u32 = 38;

/// Whether an asset is its chain's native coin or a token contract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    Native,
    Erc20,
}

/// Known assets keyed by symbol
#[derive(Debug, Clone)]
pub struct AssetRegistry {
    assets: HashMap<String, AssetConfig>,
}

impl Default for AssetRegistry {
    fn default() -> Self {
        let builtin = [
            ("BTC", Chain::Bitcoin, AssetKind::Native, 8),
            ("ETH", Chain::Ethereum, AssetKind::Native, 18),
            ("RBTC", Chain::Rsk, AssetKind::Native, 18),
            ("BNB", Chain::Bsc, AssetKind::Native, 18),
            ("MATIC", Chain::Polygon, AssetKind::Native, 18),
            ("ARBETH", Chain::Arbitrum, AssetKind::Native, 18),
            ("DAI", Chain::Ethereum, AssetKind::Erc20, 18),
            ("USDC", Chain::Ethereum, AssetKind::Erc20, 6),
            ("WBTC", Chain::Ethereum, AssetKind::Erc20, 8),
        ];

        let assets = builtin
            .into_iter()
            .map(|(symbol, chain, kind, decimals)| {
                (
                    symbol.to_string(),
                    AssetConfig {
                        chain,
                        kind,
                        decimals,
                    },
                )
            })
            .collect();

        Self { assets }
    }
}

impl AssetRegistry {
    pub fn insert(&mut self, symbol: &str, asset: AssetConfig) {
        self.assets.insert(symbol.to_string(), asset);
    }

    pub fn get(&self, symbol: &str) -> Option<&AssetConfig> {
        self.assets.get(symbol)
    }

    pub fn require(&self, symbol: &str) -> SwapResult<&AssetConfig> {
        self.get(symbol)
            .ok_or_else(|| SwapError::UnknownAsset(symbol.to_string()))
    }

    pub fn is_erc20(&self, symbol: &str) -> bool {
        self.get(symbol)
            .map(|a| a.kind == AssetKind::Erc20)
            .unwrap_or(false)
    }

    /// Human readable amount, truncated to at most six decimals
    pub fn pretty_amount(&self, symbol: &str, amount: u128) -> String {
        let decimals = self.get(symbol).map(|a| a.decimals).unwrap_or(0);
        format_units(amount, decimals, 6)
    }
}

/// Convert minor units to a display-unit decimal
pub fn unit_to_currency(amount: u128, decimals: u32) -> BigDecimal {
    BigDecimal::new(amount.into(), decimals as i64)
}

/// Convert a display-unit decimal to minor units, truncating sub-unit dust
pub fn currency_to_unit(value: &BigDecimal, decimals: u32) -> SwapResult<u128> {
    let scale = BigDecimal::new(1.into(), -(decimals as i64));
    let (digits, _) = (value * &scale).with_scale(0).into_bigint_and_exponent();
    digits
        .to_string()
        .parse::<u128>()
        .map_err(|_| SwapError::InvalidQuote(format!("Amount {} is out of range", value)))
}

fn format_units(amount: u128, decimals: u32, max_fraction_digits: u32) -> String {
    let base = 10u128.pow(decimals);
    let whole = amount / base;
    let fraction = amount % base;
    if decimals == 0 || fraction == 0 {
        return whole.to_string();
    }

    let mut fraction = format!("{:0width$}", fraction, width = decimals as usize);
    fraction.truncate(max_fraction_digits.min(decimals) as usize);
    let fraction = fraction.trim_end_matches('0');
    if fraction.is_empty() {
        whole.to_string()
    } else {
        format!("{}.{}", whole, fraction)
    }
}
