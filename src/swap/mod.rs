//! Swap model and the HTLC swap state machine
//!
//! A swap is created by `SwapProvider::new_swap` and then advanced one
//! transition at a time by `SwapProvider::perform_next_swap_action`. Each step
//! returns a partial `SwapUpdate` that the caller merges with `Swap::apply`
//! and persists before the next step.

pub mod expiration;
pub mod machine;
pub mod status;

pub use expiration::ExpirationPolicy;
pub use machine::{HtlcSwapProvider, SwapProviderDeps};
pub use status::{FilterStatus, Notification, StatusDescriptor, SwapStatus, TOTAL_STEPS};

use crate::chain::{Network, SwapParams};
use crate::error::{SwapError, SwapResult};
use crate::quote::{FeeChoice, Quote, QuoteRequest};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A swap as persisted across restarts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Swap {
    pub id: String,
    pub provider: String,
    pub from_account_id: String,
    pub to_account_id: String,

    pub from: String,
    pub to: String,
    #[serde(with = "amount")]
    pub from_amount: u128,
    #[serde(with = "amount")]
    pub to_amount: u128,

    pub from_address: String,
    pub to_address: String,
    pub from_counter_party_address: String,
    pub to_counter_party_address: String,

    pub secret: String,
    pub secret_hash: String,

    /// Own-side timelock (unix seconds, chain time)
    pub swap_expiration: u64,
    /// Counterparty-side timelock (unix seconds, chain time)
    pub node_swap_expiration: u64,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub expires_at: DateTime<Utc>,

    pub from_fund_hash: Option<String>,
    pub fund_tx_hash: Option<String>,
    pub to_fund_hash: Option<String>,
    pub to_claim_hash: Option<String>,
    pub refund_hash: Option<String>,

    pub status: SwapStatus,
    pub fee: String,
    pub claim_fee: String,

    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub start_time: DateTime<Utc>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub end_time: Option<DateTime<Utc>>,
}

impl Swap {
    /// HTLC terms of the own (`from`) side
    pub fn from_swap_params(&self) -> SwapParams {
        SwapParams {
            value: self.from_amount,
            recipient_address: self.from_counter_party_address.clone(),
            refund_address: self.from_address.clone(),
            secret_hash: self.secret_hash.clone(),
            expiration: self.swap_expiration,
        }
    }

    /// HTLC terms of the counterparty (`to`) side
    pub fn to_swap_params(&self) -> SwapParams {
        SwapParams {
            value: self.to_amount,
            recipient_address: self.to_address.clone(),
            refund_address: self.to_counter_party_address.clone(),
            secret_hash: self.secret_hash.clone(),
            expiration: self.node_swap_expiration,
        }
    }

    /// Initiation hash of the own side; set at creation
    pub fn require_from_fund_hash(&self) -> SwapResult<&str> {
        self.from_fund_hash
            .as_deref()
            .ok_or_else(|| SwapError::Internal(format!("Swap {} has no fromFundHash", self.id)))
    }

    /// Counterparty initiation hash; set on entering CONFIRM_COUNTER_PARTY_INITIATION
    pub fn require_to_fund_hash(&self) -> SwapResult<&str> {
        self.to_fund_hash
            .as_deref()
            .ok_or_else(|| SwapError::Internal(format!("Swap {} has no toFundHash", self.id)))
    }

    /// Merge a step result, enforcing legal transitions and write-once hashes
    pub fn apply(&mut self, update: &SwapUpdate) -> SwapResult<()> {
        if update.status != self.status && !self.status.can_transition_to(update.status) {
            return Err(SwapError::InvalidStateTransition {
                from: self.status.to_string(),
                to: update.status.to_string(),
            });
        }

        set_once(&self.id, "toFundHash", &mut self.to_fund_hash, &update.to_fund_hash)?;
        set_once(&self.id, "fundTxHash", &mut self.fund_tx_hash, &update.fund_tx_hash)?;
        set_once(&self.id, "toClaimHash", &mut self.to_claim_hash, &update.to_claim_hash)?;
        set_once(&self.id, "refundHash", &mut self.refund_hash, &update.refund_hash)?;

        if let Some(end_time) = update.end_time {
            self.end_time = Some(end_time);
        }
        self.status = update.status;
        Ok(())
    }
}

fn set_once(
    swap_id: &str,
    field: &'static str,
    current: &mut Option<String>,
    update: &Option<String>,
) -> SwapResult<()> {
    match (current.as_deref(), update.as_deref()) {
        (_, None) => Ok(()),
        (Some(existing), Some(new)) if existing != new => Err(SwapError::FieldAlreadySet {
            swap_id: swap_id.to_string(),
            field,
        }),
        (_, Some(new)) => {
            *current = Some(new.to_string());
            Ok(())
        }
    }
}

/// Partial update returned by one state-machine step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapUpdate {
    pub status: SwapStatus,
    pub to_fund_hash: Option<String>,
    pub fund_tx_hash: Option<String>,
    pub to_claim_hash: Option<String>,
    pub refund_hash: Option<String>,
    pub end_time: Option<DateTime<Utc>>,
}

impl SwapUpdate {
    pub fn status(status: SwapStatus) -> Self {
        Self {
            status,
            to_fund_hash: None,
            fund_tx_hash: None,
            to_claim_hash: None,
            refund_hash: None,
            end_time: None,
        }
    }

    pub fn with_to_fund_hash(mut self, hash: impl Into<String>) -> Self {
        self.to_fund_hash = Some(hash.into());
        self
    }

    pub fn with_fund_tx_hash(mut self, hash: impl Into<String>) -> Self {
        self.fund_tx_hash = Some(hash.into());
        self
    }

    pub fn with_to_claim_hash(mut self, hash: impl Into<String>) -> Self {
        self.to_claim_hash = Some(hash.into());
        self
    }

    pub fn with_refund_hash(mut self, hash: impl Into<String>) -> Self {
        self.refund_hash = Some(hash.into());
        self
    }

    pub fn finished_at(mut self, end_time: DateTime<Utc>) -> Self {
        self.end_time = Some(end_time);
        self
    }
}

/// A swap together with the wallet context it runs in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapRecord {
    pub network: Network,
    pub wallet_id: String,
    pub swap: Swap,
}

/// Everything the user commits to when starting a swap
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSwapRequest {
    pub from: String,
    pub to: String,
    pub from_amount: u128,
    pub from_account_id: String,
    pub to_account_id: String,
    pub from_address: String,
    pub to_address: String,
    pub fee: FeeChoice,
    pub claim_fee: FeeChoice,
}

/// Capabilities every swap provider offers
#[async_trait]
pub trait SwapProvider: Send + Sync {
    fn id(&self) -> &str;

    /// Refresh cached market data for a network; returns the number of markets
    async fn update_market_data(&self, network: Network) -> SwapResult<usize>;

    /// Estimate a quote from cached market data
    fn get_quote(&self, network: Network, request: &QuoteRequest) -> SwapResult<Option<Quote>>;

    /// Lock a quote with the counterparty and broadcast the initiation
    async fn new_swap(
        &self,
        network: Network,
        wallet_id: &str,
        request: NewSwapRequest,
    ) -> SwapResult<Swap>;

    /// Perform at most one transition; `None` means try again later
    async fn perform_next_swap_action(
        &self,
        network: Network,
        wallet_id: &str,
        swap: &Swap,
    ) -> SwapResult<Option<SwapUpdate>>;
}

/// Minor-unit amounts travel as decimal strings; numbers are accepted on input
pub(crate) mod amount {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Text(String),
            Number(u64),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Text(text) => text
                .parse::<u128>()
                .map_err(|_| de::Error::custom(format!("invalid amount {:?}", text))),
            Repr::Number(n) => Ok(n as u128),
        }
    }
}
