//! Fee units per transaction type and fee-price math

use crate::assets::{unit_to_currency, AssetKind, AssetRegistry};
use crate::chain::Chain;
use crate::error::SwapResult;

use bigdecimal::{BigDecimal, RoundingMode};
use std::collections::HashMap;

/// Swap transactions the user pays fees for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxType {
    SwapInitiation,
    SwapClaim,
}

/// Groups of assets that share a fee-unit table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeeClass {
    /// vbytes, priced in sat/vB
    Bitcoin,
    /// gas, priced in gwei
    EvmNative,
    /// gas including the token approval, priced in gwei
    Erc20,
    /// Arbitrum L2 gas, priced in gwei
    Arbitrum,
}

impl FeeClass {
    pub fn of(chain: Chain, kind: AssetKind) -> Self {
        match (chain, kind) {
            (Chain::Bitcoin, _) => FeeClass::Bitcoin,
            (Chain::Arbitrum, _) => FeeClass::Arbitrum,
            (_, AssetKind::Erc20) => FeeClass::Erc20,
            (_, AssetKind::Native) => FeeClass::EvmNative,
        }
    }

    /// Fee units consumed by one transaction of the given type
    pub fn units(&self, tx_type: TxType) -> u64 {
        match (self, tx_type) {
            (FeeClass::Bitcoin, TxType::SwapInitiation) => 370,
            (FeeClass::Bitcoin, TxType::SwapClaim) => 143,
            (FeeClass::EvmNative, TxType::SwapInitiation) => 165_000,
            (FeeClass::EvmNative, TxType::SwapClaim) => 45_000,
            // approve + initiate
            (FeeClass::Erc20, TxType::SwapInitiation) => 600_000 + 94_500,
            (FeeClass::Erc20, TxType::SwapClaim) => 100_000,
            (FeeClass::Arbitrum, TxType::SwapInitiation) => 2_400_000,
            (FeeClass::Arbitrum, TxType::SwapClaim) => 680_000,
        }
    }

    /// One price unit (sat or gwei) is 10^-price_decimals of the native coin
    fn price_decimals(&self) -> u32 {
        match self {
            FeeClass::Bitcoin => 8,
            _ => 9,
        }
    }
}

/// A fee given either as a unit price or as a total budget in price units
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeeChoice {
    Price(String),
    Total(u128),
}

impl FeeChoice {
    /// Fee price to hand to the chain client for a transaction of `units`
    pub fn resolve(&self, units: u64) -> String {
        match self {
            FeeChoice::Price(price) => price.clone(),
            FeeChoice::Total(total) => fee_price(*total, units),
        }
    }
}

/// Price per fee unit for a total budget, rounded half-up to two decimals
pub fn fee_price(amount: u128, units: u64) -> String {
    if units == 0 {
        return "0.00".to_string();
    }
    let price = BigDecimal::new(amount.into(), 0) / BigDecimal::from(units);
    price.with_scale_round(2, RoundingMode::HalfUp).to_string()
}

/// Fee units of `tx_type` for an asset
pub fn tx_units(assets: &AssetRegistry, asset: &str, tx_type: TxType) -> SwapResult<u64> {
    let config = assets.require(asset)?;
    Ok(FeeClass::of(config.chain, config.kind).units(tx_type))
}

/// Map fee prices (e.g. slow/average/fast) to total fees in the native coin
pub fn estimate_fees(
    assets: &AssetRegistry,
    asset: &str,
    tx_type: TxType,
    prices: &HashMap<String, BigDecimal>,
) -> SwapResult<HashMap<String, BigDecimal>> {
    let config = assets.require(asset)?;
    let class = FeeClass::of(config.chain, config.kind);
    let units = BigDecimal::from(class.units(tx_type));
    let scale = unit_to_currency(1, class.price_decimals());

    Ok(prices
        .iter()
        .map(|(speed, price)| {
            let total = price * &units * &scale;
            (speed.clone(), total.normalized())
        })
        .collect())
}
