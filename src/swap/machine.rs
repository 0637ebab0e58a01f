//! HTLC swap provider - one handler per swap status
//!
//! Every call to `perform_next_swap_action` runs the handler for the swap's
//! current status and returns at most one transition. Handlers that only
//! watch the chain are throttled per swap and status; handlers that broadcast
//! run under the exclusive lock of the account they spend from.

use super::{ExpirationPolicy, NewSwapRequest, Swap, SwapProvider, SwapStatus, SwapUpdate};
use crate::assets::AssetRegistry;
use crate::chain::{is_final, AssetClient, ClientFactory, Network, SwapParams};
use crate::config::SchedulerConfig;
use crate::error::{ChainError, SwapError, SwapResult};
use crate::notify::{signing_required, Notifier};
use crate::quote::fees::tx_units;
use crate::quote::{
    LockedQuote, MarketCache, OrderRequest, OrderService, OrderUpdate, Quote, QuoteRequest, TxType,
};
use crate::scheduler::{ActionLocks, IntervalThrottle, RetryPolicy};
use crate::wallet::AccountDirectory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Collaborators supplied by the hosting wallet
#[derive(Clone)]
pub struct SwapProviderDeps {
    pub clients: Arc<dyn ClientFactory>,
    pub orders: Arc<dyn OrderService>,
    pub accounts: Arc<dyn AccountDirectory>,
    pub notifier: Arc<dyn Notifier>,
    /// Shared by every provider so broadcasts from one account never overlap
    pub locks: Arc<ActionLocks>,
}

/// Swap provider for an HTLC counterparty agent
pub struct HtlcSwapProvider {
    id: String,
    assets: AssetRegistry,
    deps: SwapProviderDeps,
    throttle: IntervalThrottle,
    expiration: ExpirationPolicy,
    markets: MarketCache,
}

impl HtlcSwapProvider {
    pub fn new(
        id: impl Into<String>,
        assets: AssetRegistry,
        deps: SwapProviderDeps,
        config: &SchedulerConfig,
    ) -> Self {
        let retry = RetryPolicy::new(
            config.chain_query_attempts,
            Duration::from_millis(config.chain_query_retry_delay_ms),
        );

        Self {
            id: id.into(),
            assets,
            deps,
            throttle: IntervalThrottle::new(config.min_action_interval()),
            expiration: ExpirationPolicy::new(retry),
            markets: MarketCache::new(),
        }
    }

    pub fn markets(&self) -> &MarketCache {
        &self.markets
    }

    fn from_client(&self, network: Network, wallet_id: &str, swap: &Swap) -> SwapResult<AssetClient> {
        self.deps
            .clients
            .client(network, wallet_id, &swap.from, &swap.from_account_id)
    }

    fn to_client(&self, network: Network, wallet_id: &str, swap: &Swap) -> SwapResult<AssetClient> {
        self.deps
            .clients
            .client(network, wallet_id, &swap.to, &swap.to_account_id)
    }

    /// Prompt the user when the signing account lives on a hardware device
    async fn notify_if_hardware(
        &self,
        network: Network,
        wallet_id: &str,
        account_id: &str,
        action: &str,
    ) -> SwapResult<()> {
        let account = self
            .deps
            .accounts
            .account(network, wallet_id, account_id)
            .await?;

        if account.map(|a| a.is_hardware()).unwrap_or(false) {
            self.deps.notifier.notify(signing_required(action));
        }
        Ok(())
    }

    async fn handle_expirations(
        &self,
        network: Network,
        wallet_id: &str,
        swap: &Swap,
    ) -> SwapResult<Option<SwapUpdate>> {
        let from = self.from_client(network, wallet_id, swap)?;
        let to = self.to_client(network, wallet_id, swap)?;
        self.expiration
            .handle_expirations(from.chain.as_ref(), to.chain.as_ref(), swap)
            .await
    }

    /// INITIATED: tell the agent about our initiation
    async fn report_initiation(&self, network: Network, swap: &Swap) -> SwapResult<Option<SwapUpdate>> {
        if Utc::now() > swap.expires_at {
            warn!("Swap {} quote expired before the initiation was reported", swap.id);
            return Ok(Some(SwapUpdate::status(SwapStatus::WaitingForRefund)));
        }

        let update = OrderUpdate {
            from_address: swap.from_address.clone(),
            to_address: swap.to_address.clone(),
            from_fund_hash: swap.require_from_fund_hash()?.to_string(),
            secret_hash: swap.secret_hash.clone(),
        };
        self.deps.orders.update_order(network, &swap.id, &update).await?;

        info!("Swap {} initiation reported to {}", swap.id, self.id);
        Ok(Some(SwapUpdate::status(SwapStatus::InitiationReported)))
    }

    /// INITIATION_REPORTED: wait for our initiation to confirm
    async fn confirm_initiation(
        &self,
        network: Network,
        wallet_id: &str,
        swap: &Swap,
    ) -> SwapResult<Option<SwapUpdate>> {
        // the counterparty may already have locked funds
        if let Some(update) = self.find_counter_party_initiation(network, wallet_id, swap).await? {
            return Ok(Some(update));
        }

        let from = self.from_client(network, wallet_id, swap)?;
        match from
            .chain
            .transaction_by_hash(swap.require_from_fund_hash()?)
            .await
        {
            Ok(tx) if tx.confirmations > 0 => {
                Ok(Some(SwapUpdate::status(SwapStatus::InitiationConfirmed)))
            }
            Ok(_) => Ok(None),
            Err(e) if e.is_transient() => {
                warn!("Swap {}: {}", swap.id, e);
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// INITIATION_CONFIRMED: fund the contract (ERC20 only)
    async fn fund_swap(
        &self,
        network: Network,
        wallet_id: &str,
        swap: &Swap,
    ) -> SwapResult<Option<SwapUpdate>> {
        if !self.assets.is_erc20(&swap.from) {
            return Ok(Some(SwapUpdate::status(SwapStatus::Funded)));
        }

        // the contract is still empty, so an expired quote can be dropped safely
        if Utc::now() > swap.expires_at {
            warn!("Swap {} quote expired before funding", swap.id);
            return Ok(Some(SwapUpdate::status(SwapStatus::QuoteExpired)));
        }

        let from = self.from_client(network, wallet_id, swap)?;
        let params = swap.from_swap_params();
        let initiation_hash = swap.require_from_fund_hash()?;
        let (from, params) = (&from, &params);

        let tx = self
            .deps
            .locks
            .with_lock(network, wallet_id, &swap.from, move || async move {
                if let Some(existing) = from
                    .swap
                    .find_fund_swap_transaction(params, initiation_hash)
                    .await?
                {
                    info!("Swap {} already funded by {}", swap.id, existing.hash);
                    return Ok::<_, SwapError>(existing);
                }

                self.notify_if_hardware(network, wallet_id, &swap.from_account_id, "fund")
                    .await?;
                Ok(from.swap.fund_swap(params, initiation_hash, &swap.fee).await?)
            })
            .await?;

        info!("Swap {} funded with {}", swap.id, tx.hash);
        Ok(Some(
            SwapUpdate::status(SwapStatus::Funded).with_fund_tx_hash(tx.hash),
        ))
    }

    /// FUNDED (and early INITIATION_REPORTED): look for the counterparty's HTLC
    async fn find_counter_party_initiation(
        &self,
        network: Network,
        wallet_id: &str,
        swap: &Swap,
    ) -> SwapResult<Option<SwapUpdate>> {
        let to = self.to_client(network, wallet_id, swap)?;
        let params = swap.to_swap_params();

        match self.verified_counter_party_initiation(&to, &params, swap).await {
            Ok(Some(hash)) => {
                info!("Swap {} counterparty initiation found: {}", swap.id, hash);
                return Ok(Some(
                    SwapUpdate::status(SwapStatus::ConfirmCounterPartyInitiation)
                        .with_to_fund_hash(hash),
                ));
            }
            Ok(None) => {}
            Err(SwapError::Chain(e)) if e.is_transient() => {
                warn!("Swap {}: {}", swap.id, e);
            }
            Err(e) => return Err(e),
        }

        self.handle_expirations(network, wallet_id, swap).await
    }

    /// Hash of a counterparty initiation that matches our terms and is funded
    async fn verified_counter_party_initiation(
        &self,
        to: &AssetClient,
        params: &SwapParams,
        swap: &Swap,
    ) -> SwapResult<Option<String>> {
        let initiation = match to.swap.find_initiate_swap_transaction(params).await? {
            Some(tx) => tx,
            None => return Ok(None),
        };

        if !to
            .swap
            .verify_initiate_swap_transaction(params, &initiation.hash)
            .await?
        {
            warn!(
                "Swap {} counterparty initiation {} does not match the agreed terms",
                swap.id, initiation.hash
            );
            return Ok(None);
        }

        let chain = self.assets.require(&swap.to)?.chain;
        let funded = match to
            .swap
            .find_fund_swap_transaction(params, &initiation.hash)
            .await?
        {
            // native HTLCs are funded by the initiation itself
            None => true,
            Some(fund) => is_final(chain, &fund),
        };

        if !funded {
            debug!("Swap {} counterparty funding not yet safe", swap.id);
            return Ok(None);
        }
        Ok(Some(initiation.hash))
    }

    /// CONFIRM_COUNTER_PARTY_INITIATION: wait for safe confirmations
    async fn confirm_counter_party_initiation(
        &self,
        network: Network,
        wallet_id: &str,
        swap: &Swap,
    ) -> SwapResult<Option<SwapUpdate>> {
        let to = self.to_client(network, wallet_id, swap)?;
        let chain = self.assets.require(&swap.to)?.chain;

        match to.chain.transaction_by_hash(swap.require_to_fund_hash()?).await {
            Ok(tx) if is_final(chain, &tx) => {
                return Ok(Some(SwapUpdate::status(SwapStatus::ReadyToClaim)));
            }
            Ok(_) => {}
            Err(e) if e.is_transient() => warn!("Swap {}: {}", swap.id, e),
            Err(e) => return Err(e.into()),
        }

        self.handle_expirations(network, wallet_id, swap).await
    }

    /// READY_TO_CLAIM: reveal the secret on the `to` chain
    async fn claim_swap(
        &self,
        network: Network,
        wallet_id: &str,
        swap: &Swap,
    ) -> SwapResult<Option<SwapUpdate>> {
        if let Some(update) = self.handle_expirations(network, wallet_id, swap).await? {
            return Ok(Some(update));
        }

        let to = self.to_client(network, wallet_id, swap)?;
        let params = swap.to_swap_params();
        let initiation_hash = swap.require_to_fund_hash()?;
        let (to, params) = (&to, &params);

        let tx = self
            .deps
            .locks
            .with_lock(network, wallet_id, &swap.to, move || async move {
                self.notify_if_hardware(network, wallet_id, &swap.to_account_id, "claim")
                    .await?;
                Ok::<_, SwapError>(
                    to.swap
                        .claim_swap(params, initiation_hash, &swap.secret, &swap.claim_fee)
                        .await?,
                )
            })
            .await?;

        info!("Swap {} claim broadcast: {}", swap.id, tx.hash);
        Ok(Some(
            SwapUpdate::status(SwapStatus::WaitingForClaimConfirmations)
                .with_to_claim_hash(tx.hash),
        ))
    }

    /// WAITING_FOR_CLAIM_CONFIRMATIONS
    async fn wait_for_claim_confirmations(
        &self,
        network: Network,
        wallet_id: &str,
        swap: &Swap,
    ) -> SwapResult<Option<SwapUpdate>> {
        let to = self.to_client(network, wallet_id, swap)?;
        let claim_hash = swap
            .to_claim_hash
            .as_deref()
            .ok_or_else(|| SwapError::Internal(format!("Swap {} has no toClaimHash", swap.id)))?;

        match to.chain.transaction_by_hash(claim_hash).await {
            Ok(tx) if tx.confirmations > 0 => {
                // refresh failures never block completion
                if let Err(e) = self
                    .deps
                    .accounts
                    .refresh_balances(network, wallet_id, vec![swap.to.clone(), swap.from.clone()])
                    .await
                {
                    warn!("Swap {} balance refresh failed: {}", swap.id, e);
                }
                info!("Swap {} completed", swap.id);
                Ok(Some(
                    SwapUpdate::status(SwapStatus::Success).finished_at(Utc::now()),
                ))
            }
            // a seen claim is never abandoned for a refund
            Ok(_) => Ok(None),
            Err(e @ ChainError::TxNotFound(_)) => {
                warn!("Swap {}: {}", swap.id, e);
                self.handle_expirations(network, wallet_id, swap).await
            }
            Err(e) if e.is_transient() => {
                warn!("Swap {}: {}", swap.id, e);
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// WAITING_FOR_REFUND
    async fn wait_for_refund(
        &self,
        network: Network,
        wallet_id: &str,
        swap: &Swap,
    ) -> SwapResult<Option<SwapUpdate>> {
        let from = self.from_client(network, wallet_id, swap)?;
        if self.expiration.can_refund(from.chain.as_ref(), swap).await? {
            return Ok(Some(SwapUpdate::status(SwapStatus::GetRefund)));
        }
        Ok(None)
    }

    /// GET_REFUND: take our funds back on the `from` chain
    async fn refund_swap(
        &self,
        network: Network,
        wallet_id: &str,
        swap: &Swap,
    ) -> SwapResult<Option<SwapUpdate>> {
        let from = self.from_client(network, wallet_id, swap)?;
        let params = swap.from_swap_params();
        let initiation_hash = swap.require_from_fund_hash()?;
        let (from, params) = (&from, &params);

        let tx = self
            .deps
            .locks
            .with_lock(network, wallet_id, &swap.from, move || async move {
                self.notify_if_hardware(network, wallet_id, &swap.from_account_id, "refund")
                    .await?;
                Ok::<_, SwapError>(
                    from.swap
                        .refund_swap(params, initiation_hash, &swap.fee)
                        .await?,
                )
            })
            .await?;

        info!("Swap {} refund broadcast: {}", swap.id, tx.hash);
        Ok(Some(
            SwapUpdate::status(SwapStatus::WaitingForRefundConfirmations)
                .with_refund_hash(tx.hash),
        ))
    }

    /// WAITING_FOR_REFUND_CONFIRMATIONS
    async fn wait_for_refund_confirmations(
        &self,
        network: Network,
        wallet_id: &str,
        swap: &Swap,
    ) -> SwapResult<Option<SwapUpdate>> {
        let from = self.from_client(network, wallet_id, swap)?;
        let refund_hash = swap
            .refund_hash
            .as_deref()
            .ok_or_else(|| SwapError::Internal(format!("Swap {} has no refundHash", swap.id)))?;

        match from.chain.transaction_by_hash(refund_hash).await {
            Ok(tx) if tx.confirmations > 0 => {
                info!("Swap {} refunded", swap.id);
                Ok(Some(
                    SwapUpdate::status(SwapStatus::Refunded).finished_at(Utc::now()),
                ))
            }
            Ok(_) => Ok(None),
            Err(e) if e.is_transient() => {
                warn!("Swap {}: {}", swap.id, e);
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Reject a locked quote that no longer matches what the user agreed to
pub fn validate_locked_quote(
    quote: &LockedQuote,
    request: &NewSwapRequest,
    now: DateTime<Utc>,
) -> SwapResult<()> {
    if quote.is_expired_at(now) {
        return Err(SwapError::QuoteExpired {
            expires_at: quote.expires_at.to_rfc3339(),
        });
    }

    if quote.from != request.from || quote.to != request.to {
        return Err(SwapError::InvalidQuote(format!(
            "Locked pair {}-{} differs from requested {}-{}",
            quote.from, quote.to, request.from, request.to
        )));
    }

    if quote.from_amount != request.from_amount {
        return Err(SwapError::InvalidQuote(format!(
            "Locked amount {} differs from requested {}",
            quote.from_amount, request.from_amount
        )));
    }

    if quote.node_swap_expiration >= quote.swap_expiration {
        return Err(SwapError::InvalidTimelocks {
            swap_expiration: quote.swap_expiration,
            node_swap_expiration: quote.node_swap_expiration,
        });
    }

    Ok(())
}

/// Human readable terms the secret is derived from
fn swap_terms_message(quote: &LockedQuote, request: &NewSwapRequest) -> String {
    [
        "Creating a swap with following terms:".to_string(),
        format!("Send: {} ({})", quote.from_amount, quote.from),
        format!("Receive: {} ({})", quote.to_amount, quote.to),
        format!("My {} Address: {}", quote.from, request.from_address),
        format!("My {} Address: {}", quote.to, request.to_address),
        format!("Counterparty Sending Address: {}", quote.to_counter_party_address),
        format!("Counterparty Receiving Address: {}", quote.from_counter_party_address),
        format!("Timestamp: {}", quote.swap_expiration),
    ]
    .join("\n")
}

/// Hex SHA-256 of the secret's bytes
pub fn secret_hash(secret: &str) -> SwapResult<String> {
    let bytes = hex::decode(secret.trim_start_matches("0x"))
        .map_err(|e| SwapError::Internal(format!("Secret is not hex: {}", e)))?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

#[async_trait]
impl SwapProvider for HtlcSwapProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn update_market_data(&self, network: Network) -> SwapResult<usize> {
        let raw = self.deps.orders.market_info(network).await?;
        self.markets.replace(network, &self.id, &raw)
    }

    fn get_quote(&self, network: Network, request: &QuoteRequest) -> SwapResult<Option<Quote>> {
        self.markets.quote(network, &self.id, request, &self.assets)
    }

    async fn new_swap(
        &self,
        network: Network,
        wallet_id: &str,
        request: NewSwapRequest,
    ) -> SwapResult<Swap> {
        let order = OrderRequest {
            from: request.from.clone(),
            to: request.to.clone(),
            from_amount: request.from_amount,
        };
        let quote = self.deps.orders.create_order(network, &order).await?;
        validate_locked_quote(&quote, &request, Utc::now())?;

        let fee = request
            .fee
            .resolve(tx_units(&self.assets, &request.from, TxType::SwapInitiation)?);
        let claim_fee = request
            .claim_fee
            .resolve(tx_units(&self.assets, &request.to, TxType::SwapClaim)?);

        let from = self.deps.clients.client(
            network,
            wallet_id,
            &request.from,
            &request.from_account_id,
        )?;

        let message = swap_terms_message(&quote, &request);
        let secret = from.swap.generate_secret(&hex::encode(message)).await?;
        let secret_hash = secret_hash(&secret)?;

        let mut swap = Swap {
            id: quote.id,
            provider: self.id.clone(),
            from_account_id: request.from_account_id,
            to_account_id: request.to_account_id,
            from: quote.from,
            to: quote.to,
            from_amount: quote.from_amount,
            to_amount: quote.to_amount,
            from_address: request.from_address,
            to_address: request.to_address,
            from_counter_party_address: quote.from_counter_party_address,
            to_counter_party_address: quote.to_counter_party_address,
            secret,
            secret_hash,
            swap_expiration: quote.swap_expiration,
            node_swap_expiration: quote.node_swap_expiration,
            expires_at: quote.expires_at,
            from_fund_hash: None,
            fund_tx_hash: None,
            to_fund_hash: None,
            to_claim_hash: None,
            refund_hash: None,
            status: SwapStatus::Initiated,
            fee,
            claim_fee,
            start_time: Utc::now(),
            end_time: None,
        };

        let params = swap.from_swap_params();
        let (from, params, swap_ref) = (&from, &params, &swap);
        let tx = self
            .deps
            .locks
            .with_lock(network, wallet_id, &swap.from, move || async move {
                self.notify_if_hardware(network, wallet_id, &swap_ref.from_account_id, "fund")
                    .await?;
                Ok::<_, SwapError>(from.swap.initiate_swap(params, &swap_ref.fee).await?)
            })
            .await?;

        info!(
            "Swap {} initiated: {} {} -> {} {} ({})",
            swap.id, swap.from_amount, swap.from, swap.to_amount, swap.to, tx.hash
        );
        swap.from_fund_hash = Some(tx.hash);
        Ok(swap)
    }

    async fn perform_next_swap_action(
        &self,
        network: Network,
        wallet_id: &str,
        swap: &Swap,
    ) -> SwapResult<Option<SwapUpdate>> {
        if swap.status.is_terminal() {
            return Ok(None);
        }

        if swap.status.is_polling() && !self.throttle.ready(&swap.id, swap.status) {
            debug!("Swap {} in {} throttled", swap.id, swap.status);
            return Ok(None);
        }

        let update = match swap.status {
            SwapStatus::Initiated => self.report_initiation(network, swap).await?,
            SwapStatus::InitiationReported => {
                self.confirm_initiation(network, wallet_id, swap).await?
            }
            SwapStatus::InitiationConfirmed => self.fund_swap(network, wallet_id, swap).await?,
            SwapStatus::Funded => {
                self.find_counter_party_initiation(network, wallet_id, swap)
                    .await?
            }
            SwapStatus::ConfirmCounterPartyInitiation => {
                self.confirm_counter_party_initiation(network, wallet_id, swap)
                    .await?
            }
            SwapStatus::ReadyToClaim => self.claim_swap(network, wallet_id, swap).await?,
            SwapStatus::WaitingForClaimConfirmations => {
                self.wait_for_claim_confirmations(network, wallet_id, swap)
                    .await?
            }
            SwapStatus::WaitingForRefund => self.wait_for_refund(network, wallet_id, swap).await?,
            SwapStatus::GetRefund => self.refund_swap(network, wallet_id, swap).await?,
            SwapStatus::WaitingForRefundConfirmations => {
                self.wait_for_refund_confirmations(network, wallet_id, swap)
                    .await?
            }
            SwapStatus::Refunded | SwapStatus::Success | SwapStatus::QuoteExpired => None,
        };

        if let Some(update) = &update {
            debug!("Swap {}: {} -> {}", swap.id, swap.status, update.status);
            if update.status.is_terminal() {
                self.throttle.forget(&swap.id);
            }
        }
        Ok(update)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{ChainResult, ClientRegistry, MockChainApi, MockSwapApi, SwapApi, TxInfo};
    use crate::notify::MockNotifier;
    use crate::quote::agent::MockOrderService;
    use crate::quote::FeeChoice;
    use crate::swap::expiration::tests::chain_at;
    use crate::swap::tests::sample_swap;
    use crate::wallet::{Account, AccountKind, MockAccountDirectory};
    use mockall::predicate::eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const WALLET: &str = "wallet-1";
    const NETWORK: Network = Network::Testnet;

    /// Chain time before either timelock
    const EARLY: u64 = 1_700_000_000;

    fn scheduler_config(min_action_interval_ms: u64) -> SchedulerConfig {
        SchedulerConfig {
            provider_id: "htlc-agent".to_string(),
            poll_interval_ms: 1000,
            min_action_interval_ms,
            chain_query_attempts: 3,
            chain_query_retry_delay_ms: 1,
            market_refresh_secs: 300,
        }
    }

    struct Harness {
        from_chain: MockChainApi,
        from_swap: MockSwapApi,
        to_chain: MockChainApi,
        to_swap: MockSwapApi,
        orders: MockOrderService,
        notifier: MockNotifier,
        hardware: bool,
        refreshes: bool,
        refresh_fails: bool,
        min_action_interval_ms: u64,
        /// Replaces `from_swap` when set
        from_swap_impl: Option<Arc<dyn SwapApi>>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                from_chain: MockChainApi::new(),
                from_swap: MockSwapApi::new(),
                to_chain: MockChainApi::new(),
                to_swap: MockSwapApi::new(),
                orders: MockOrderService::new(),
                notifier: MockNotifier::new(),
                hardware: false,
                refreshes: false,
                refresh_fails: false,
                min_action_interval_ms: 0,
                from_swap_impl: None,
            }
        }

        fn chain_times(mut self, from: u64, to: u64) -> Self {
            self.from_chain = chain_at(from);
            self.to_chain = chain_at(to);
            self
        }

        fn build(self, swap: &Swap) -> HtlcSwapProvider {
            let registry = ClientRegistry::new();
            registry.register(
                NETWORK,
                WALLET,
                &swap.from,
                &swap.from_account_id,
                AssetClient {
                    chain: Arc::new(self.from_chain),
                    swap: self
                        .from_swap_impl
                        .unwrap_or_else(|| Arc::new(self.from_swap) as Arc<dyn SwapApi>),
                },
            );
            registry.register(
                NETWORK,
                WALLET,
                &swap.to,
                &swap.to_account_id,
                AssetClient {
                    chain: Arc::new(self.to_chain),
                    swap: Arc::new(self.to_swap),
                },
            );

            let mut accounts = MockAccountDirectory::new();
            let kind = if self.hardware {
                AccountKind::Hardware
            } else {
                AccountKind::Software
            };
            accounts.expect_account().returning(move |_, _, id| {
                Ok(Some(Account {
                    id: id.to_string(),
                    kind,
                }))
            });
            if self.refreshes {
                let fails = self.refresh_fails;
                accounts
                    .expect_refresh_balances()
                    .withf(|_, _, assets| assets == &vec!["DAI".to_string(), "BTC".to_string()])
                    .times(1)
                    .returning(move |_, _, _| {
                        if fails {
                            Err(SwapError::Internal("balance service down".to_string()))
                        } else {
                            Ok(())
                        }
                    });
            }

            let deps = SwapProviderDeps {
                clients: Arc::new(registry),
                orders: Arc::new(self.orders),
                accounts: Arc::new(accounts),
                notifier: Arc::new(self.notifier),
                locks: Arc::new(ActionLocks::new()),
            };

            HtlcSwapProvider::new(
                "htlc-agent",
                AssetRegistry::default(),
                deps,
                &scheduler_config(self.min_action_interval_ms),
            )
        }
    }

    async fn step(provider: &HtlcSwapProvider, swap: &Swap) -> SwapResult<Option<SwapUpdate>> {
        provider.perform_next_swap_action(NETWORK, WALLET, swap).await
    }

    fn erc20_from_swap(status: SwapStatus) -> Swap {
        let mut swap = sample_swap(status);
        swap.from = "DAI".to_string();
        swap.from_account_id = "acc-eth".to_string();
        swap.to = "BTC".to_string();
        swap.to_account_id = "acc-btc".to_string();
        swap
    }

    fn request() -> NewSwapRequest {
        NewSwapRequest {
            from: "BTC".to_string(),
            to: "DAI".to_string(),
            from_amount: 1_500_000,
            from_account_id: "acc-btc".to_string(),
            to_account_id: "acc-eth".to_string(),
            from_address: "bc1qown".to_string(),
            to_address: "0xown".to_string(),
            fee: FeeChoice::Total(3_700_000),
            claim_fee: FeeChoice::Price("40".to_string()),
        }
    }

    fn locked_quote(expires_in: chrono::Duration) -> LockedQuote {
        LockedQuote {
            id: "order-1".to_string(),
            from: "BTC".to_string(),
            to: "DAI".to_string(),
            from_amount: 1_500_000,
            to_amount: 250_000_000_000_000_000_000,
            from_counter_party_address: "bc1qagent".to_string(),
            to_counter_party_address: "0xagent".to_string(),
            expires_at: Utc::now() + expires_in,
            swap_expiration: 1_700_010_800,
            node_swap_expiration: 1_700_005_400,
        }
    }

    #[tokio::test]
    async fn new_swap_initiates_with_locked_terms() {
        let mut h = Harness::new();
        h.orders
            .expect_create_order()
            .times(1)
            .returning(|_, _| Ok(locked_quote(chrono::Duration::minutes(5))));
        h.from_swap
            .expect_generate_secret()
            .withf(|message| {
                let text = String::from_utf8(hex::decode(message).unwrap()).unwrap();
                text.starts_with("Creating a swap with following terms:")
                    && text.contains("Send: 1500000 (BTC)")
            })
            .returning(|_| Ok("11".repeat(32)));
        h.from_swap
            .expect_initiate_swap()
            .withf(|params, fee| {
                params.value == 1_500_000
                    && params.recipient_address == "bc1qagent"
                    && params.refund_address == "bc1qown"
                    && params.expiration == 1_700_010_800
                    // 3700000 / 370 vB
                    && fee == "10000.00"
            })
            .times(1)
            .returning(|_, _| Ok(TxInfo::new("fromfund", 0)));

        let provider = h.build(&sample_swap(SwapStatus::Initiated));
        let swap = provider.new_swap(NETWORK, WALLET, request()).await.unwrap();

        assert_eq!(swap.status, SwapStatus::Initiated);
        assert_eq!(swap.from_fund_hash.as_deref(), Some("fromfund"));
        assert_eq!(swap.secret_hash, secret_hash(&"11".repeat(32)).unwrap());
        assert_eq!(swap.claim_fee, "40");
        assert!(swap.node_swap_expiration < swap.swap_expiration);
    }

    #[tokio::test]
    async fn new_swap_rejects_expired_locked_quote() {
        let mut h = Harness::new();
        h.orders
            .expect_create_order()
            .returning(|_, _| Ok(locked_quote(chrono::Duration::seconds(-1))));
        h.from_swap.expect_initiate_swap().never();

        let provider = h.build(&sample_swap(SwapStatus::Initiated));
        let err = provider.new_swap(NETWORK, WALLET, request()).await.unwrap_err();
        assert!(matches!(err, SwapError::QuoteExpired { .. }));
    }

    #[test]
    fn locked_quote_validation() {
        let now = Utc::now();
        let mut quote = locked_quote(chrono::Duration::minutes(5));
        quote.node_swap_expiration = quote.swap_expiration;
        assert!(matches!(
            validate_locked_quote(&quote, &request(), now),
            Err(SwapError::InvalidTimelocks { .. })
        ));

        let mut quote = locked_quote(chrono::Duration::minutes(5));
        quote.to = "USDC".to_string();
        assert!(matches!(
            validate_locked_quote(&quote, &request(), now),
            Err(SwapError::InvalidQuote(_))
        ));

        let quote = locked_quote(chrono::Duration::minutes(5));
        assert!(validate_locked_quote(&quote, &request(), now).is_ok());
    }

    #[test]
    fn secret_hash_is_sha256_of_secret_bytes() {
        // sha256 of a single zero byte
        assert_eq!(
            secret_hash("00").unwrap(),
            "6e340b9cffb37a989ca544e6bb780a2c78901d3fb33738768511a30617afa01d"
        );
        assert!(secret_hash("not hex").is_err());
    }

    #[tokio::test]
    async fn initiated_reports_to_agent() {
        let mut h = Harness::new();
        h.orders
            .expect_update_order()
            .withf(|_, id, update| id == "order-1" && update.from_fund_hash == "fromfund")
            .times(1)
            .returning(|_, _, _| Ok(()));

        let swap = sample_swap(SwapStatus::Initiated);
        let provider = h.build(&swap);
        let update = step(&provider, &swap).await.unwrap().unwrap();
        assert_eq!(update.status, SwapStatus::InitiationReported);
    }

    #[tokio::test]
    async fn initiated_with_expired_quote_waits_for_refund() {
        let mut h = Harness::new();
        h.orders.expect_update_order().never();

        let mut swap = sample_swap(SwapStatus::Initiated);
        swap.expires_at = Utc::now() - chrono::Duration::seconds(1);
        let provider = h.build(&swap);
        let update = step(&provider, &swap).await.unwrap().unwrap();
        assert_eq!(update.status, SwapStatus::WaitingForRefund);
    }

    #[tokio::test]
    async fn initiation_reported_confirms_own_tx() {
        let mut h = Harness::new().chain_times(EARLY, EARLY);
        h.to_swap
            .expect_find_initiate_swap_transaction()
            .returning(|_| Ok(None));
        h.from_chain
            .expect_transaction_by_hash()
            .with(eq("fromfund"))
            .returning(|hash| Ok(TxInfo::new(hash, 1)));

        let swap = sample_swap(SwapStatus::InitiationReported);
        let provider = h.build(&swap);
        let update = step(&provider, &swap).await.unwrap().unwrap();
        assert_eq!(update.status, SwapStatus::InitiationConfirmed);
    }

    #[tokio::test]
    async fn initiation_reported_swallows_missing_tx() {
        let mut h = Harness::new().chain_times(EARLY, EARLY);
        h.to_swap
            .expect_find_initiate_swap_transaction()
            .returning(|_| Ok(None));
        h.from_chain
            .expect_transaction_by_hash()
            .returning(|hash| Err(ChainError::TxNotFound(hash.to_string())));

        let swap = sample_swap(SwapStatus::InitiationReported);
        let provider = h.build(&swap);
        assert!(step(&provider, &swap).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn native_initiation_confirmed_is_funded() {
        let h = Harness::new();
        let mut swap = sample_swap(SwapStatus::InitiationConfirmed);
        // native funds are already locked; quote expiry no longer matters
        swap.expires_at = Utc::now() - chrono::Duration::minutes(1);

        let provider = h.build(&swap);
        let update = step(&provider, &swap).await.unwrap().unwrap();
        assert_eq!(update.status, SwapStatus::Funded);
        assert!(update.fund_tx_hash.is_none());
    }

    #[tokio::test]
    async fn erc20_funding_broadcasts_once() {
        let mut h = Harness::new();
        h.from_swap
            .expect_find_fund_swap_transaction()
            .returning(|_, _| Ok(None));
        h.from_swap
            .expect_fund_swap()
            .withf(|params, hash, fee| {
                params.value == 1_500_000 && hash == "fromfund" && fee == "20.00"
            })
            .times(1)
            .returning(|_, _, _| Ok(TxInfo::new("0xfund", 0)));

        let swap = erc20_from_swap(SwapStatus::InitiationConfirmed);
        let provider = h.build(&swap);
        let update = step(&provider, &swap).await.unwrap().unwrap();
        assert_eq!(update.status, SwapStatus::Funded);
        assert_eq!(update.fund_tx_hash.as_deref(), Some("0xfund"));
    }

    #[tokio::test]
    async fn erc20_funding_reuses_existing_tx() {
        let mut h = Harness::new();
        h.from_swap
            .expect_find_fund_swap_transaction()
            .returning(|_, _| Ok(Some(TxInfo::new("0xearlier", 2))));
        h.from_swap.expect_fund_swap().never();

        let swap = erc20_from_swap(SwapStatus::InitiationConfirmed);
        let provider = h.build(&swap);
        let update = step(&provider, &swap).await.unwrap().unwrap();
        assert_eq!(update.fund_tx_hash.as_deref(), Some("0xearlier"));
    }

    #[tokio::test]
    async fn erc20_expired_quote_is_dropped_unfunded() {
        let mut h = Harness::new();
        h.from_swap.expect_fund_swap().never();

        let mut swap = erc20_from_swap(SwapStatus::InitiationConfirmed);
        swap.expires_at = Utc::now() - chrono::Duration::seconds(1);
        let provider = h.build(&swap);
        let update = step(&provider, &swap).await.unwrap().unwrap();
        assert_eq!(update.status, SwapStatus::QuoteExpired);
    }

    #[tokio::test]
    async fn hardware_account_is_prompted_before_funding() {
        let mut h = Harness::new();
        h.hardware = true;
        h.notifier
            .expect_notify()
            .withf(|n| n.message == "Signing required to fund the swap.")
            .times(1)
            .return_const(());
        h.from_swap
            .expect_find_fund_swap_transaction()
            .returning(|_, _| Ok(None));
        h.from_swap
            .expect_fund_swap()
            .returning(|_, _, _| Ok(TxInfo::new("0xfund", 0)));

        let swap = erc20_from_swap(SwapStatus::InitiationConfirmed);
        let provider = h.build(&swap);
        assert!(step(&provider, &swap).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn funded_finds_verified_counter_party_initiation() {
        let mut h = Harness::new();
        h.to_swap
            .expect_find_initiate_swap_transaction()
            .withf(|params| params.recipient_address == "0xown" && params.refund_address == "0xagent")
            .returning(|_| Ok(Some(TxInfo::new("0xtofund", 1))));
        h.to_swap
            .expect_verify_initiate_swap_transaction()
            .returning(|_, _| Ok(true));
        // DAI lives on ethereum: 3 safe confirmations
        h.to_swap
            .expect_find_fund_swap_transaction()
            .returning(|_, _| Ok(Some(TxInfo::new("0xtokenfund", 3))));

        let swap = sample_swap(SwapStatus::Funded);
        let provider = h.build(&swap);
        let update = step(&provider, &swap).await.unwrap().unwrap();
        assert_eq!(update.status, SwapStatus::ConfirmCounterPartyInitiation);
        assert_eq!(update.to_fund_hash.as_deref(), Some("0xtofund"));
    }

    #[tokio::test]
    async fn funded_waits_for_safe_counter_party_funding() {
        let mut h = Harness::new().chain_times(EARLY, EARLY);
        h.to_swap
            .expect_find_initiate_swap_transaction()
            .returning(|_| Ok(Some(TxInfo::new("0xtofund", 1))));
        h.to_swap
            .expect_verify_initiate_swap_transaction()
            .returning(|_, _| Ok(true));
        h.to_swap
            .expect_find_fund_swap_transaction()
            .returning(|_, _| Ok(Some(TxInfo::new("0xtokenfund", 2))));

        let swap = sample_swap(SwapStatus::Funded);
        let provider = h.build(&swap);
        assert!(step(&provider, &swap).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn funded_ignores_mismatched_terms_and_checks_expiry() {
        let mut h = Harness::new().chain_times(1_700_020_000, 1_700_020_000);
        h.to_swap
            .expect_find_initiate_swap_transaction()
            .returning(|_| Ok(Some(TxInfo::new("0xbogus", 1))));
        h.to_swap
            .expect_verify_initiate_swap_transaction()
            .returning(|_, _| Ok(false));
        h.to_swap.expect_find_fund_swap_transaction().never();

        let swap = sample_swap(SwapStatus::Funded);
        let provider = h.build(&swap);
        let update = step(&provider, &swap).await.unwrap().unwrap();
        assert_eq!(update.status, SwapStatus::GetRefund);
    }

    #[tokio::test]
    async fn funded_swallows_pending_tx() {
        let mut h = Harness::new().chain_times(EARLY, EARLY);
        h.to_swap
            .expect_find_initiate_swap_transaction()
            .returning(|_| Err(ChainError::PendingTx("0xtofund".to_string())));

        let swap = sample_swap(SwapStatus::Funded);
        let provider = h.build(&swap);
        assert!(step(&provider, &swap).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn funded_propagates_rpc_errors() {
        let mut h = Harness::new();
        h.to_swap
            .expect_find_initiate_swap_transaction()
            .returning(|_| Err(ChainError::Rpc("503".to_string())));

        let swap = sample_swap(SwapStatus::Funded);
        let provider = h.build(&swap);
        let err = step(&provider, &swap).await.unwrap_err();
        assert!(matches!(err, SwapError::Chain(ChainError::Rpc(_))));
    }

    #[tokio::test]
    async fn counter_party_initiation_reaches_safe_confirmations() {
        let mut h = Harness::new();
        h.to_chain
            .expect_transaction_by_hash()
            .with(eq("0xtofund"))
            .returning(|hash| Ok(TxInfo::new(hash, 3)));

        let mut swap = sample_swap(SwapStatus::ConfirmCounterPartyInitiation);
        swap.to_fund_hash = Some("0xtofund".to_string());
        let provider = h.build(&swap);
        let update = step(&provider, &swap).await.unwrap().unwrap();
        assert_eq!(update.status, SwapStatus::ReadyToClaim);
    }

    #[tokio::test]
    async fn refund_wins_before_counter_party_confirms() {
        let mut h = Harness::new().chain_times(1_700_020_000, 1_700_020_000);
        h.to_chain = {
            let mut chain = chain_at(1_700_020_000);
            chain
                .expect_transaction_by_hash()
                .returning(|hash| Ok(TxInfo::new(hash, 1)));
            chain
        };
        h.to_swap.expect_claim_swap().never();

        let mut swap = sample_swap(SwapStatus::ConfirmCounterPartyInitiation);
        swap.to_fund_hash = Some("0xtofund".to_string());
        let provider = h.build(&swap);
        let update = step(&provider, &swap).await.unwrap().unwrap();
        assert_eq!(update.status, SwapStatus::GetRefund);
    }

    #[tokio::test]
    async fn ready_to_claim_reveals_secret() {
        let mut h = Harness::new().chain_times(EARLY, EARLY);
        h.to_swap
            .expect_claim_swap()
            .withf(|params, hash, secret, fee| {
                params.value == 250_000_000_000_000_000_000
                    && hash == "0xtofund"
                    && secret == "11".repeat(32)
                    && fee == "40.00"
            })
            .times(1)
            .returning(|_, _, _, _| Ok(TxInfo::new("0xclaim", 0)));

        let mut swap = sample_swap(SwapStatus::ReadyToClaim);
        swap.to_fund_hash = Some("0xtofund".to_string());
        let provider = h.build(&swap);
        let update = step(&provider, &swap).await.unwrap().unwrap();
        assert_eq!(update.status, SwapStatus::WaitingForClaimConfirmations);
        assert_eq!(update.to_claim_hash.as_deref(), Some("0xclaim"));
    }

    #[tokio::test]
    async fn ready_to_claim_checks_expiry_first() {
        let mut h = Harness::new().chain_times(EARLY, 1_700_006_000);
        h.to_swap.expect_claim_swap().never();

        let mut swap = sample_swap(SwapStatus::ReadyToClaim);
        swap.to_fund_hash = Some("0xtofund".to_string());
        let provider = h.build(&swap);
        let update = step(&provider, &swap).await.unwrap().unwrap();
        assert_eq!(update.status, SwapStatus::WaitingForRefund);
    }

    #[tokio::test]
    async fn confirmed_claim_succeeds_and_refreshes_balances() {
        let mut h = Harness::new();
        h.refreshes = true;
        h.to_chain
            .expect_transaction_by_hash()
            .with(eq("0xclaim"))
            .returning(|hash| Ok(TxInfo::new(hash, 1)));

        let mut swap = sample_swap(SwapStatus::WaitingForClaimConfirmations);
        swap.to_fund_hash = Some("0xtofund".to_string());
        swap.to_claim_hash = Some("0xclaim".to_string());
        let provider = h.build(&swap);
        let update = step(&provider, &swap).await.unwrap().unwrap();
        assert_eq!(update.status, SwapStatus::Success);
        assert!(update.end_time.is_some());
    }

    #[tokio::test]
    async fn seen_claim_is_never_abandoned() {
        // both timelocks have passed, but the claim is already in the mempool
        let mut h = Harness::new().chain_times(1_700_020_000, 1_700_020_000);
        h.to_chain = {
            let mut chain = chain_at(1_700_020_000);
            chain
                .expect_transaction_by_hash()
                .returning(|hash| Ok(TxInfo::new(hash, 0)));
            chain
        };

        let mut swap = sample_swap(SwapStatus::WaitingForClaimConfirmations);
        swap.to_claim_hash = Some("0xclaim".to_string());
        let provider = h.build(&swap);
        assert!(step(&provider, &swap).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn refund_path() {
        let mut h = Harness::new().chain_times(1_700_020_000, EARLY);
        h.from_swap
            .expect_refund_swap()
            .withf(|params, hash, fee| {
                params.refund_address == "bc1qown" && hash == "fromfund" && fee == "20.00"
            })
            .times(1)
            .returning(|_, _, _| Ok(TxInfo::new("0xrefund", 0)));

        let swap = sample_swap(SwapStatus::WaitingForRefund);
        let provider = h.build(&swap);
        let update = step(&provider, &swap).await.unwrap().unwrap();
        assert_eq!(update.status, SwapStatus::GetRefund);

        let swap = sample_swap(SwapStatus::GetRefund);
        let update = step(&provider, &swap).await.unwrap().unwrap();
        assert_eq!(update.status, SwapStatus::WaitingForRefundConfirmations);
        assert_eq!(update.refund_hash.as_deref(), Some("0xrefund"));
    }

    #[tokio::test]
    async fn refund_confirmation() {
        let mut h = Harness::new();
        h.from_chain
            .expect_transaction_by_hash()
            .with(eq("0xrefund"))
            .returning(|hash| Ok(TxInfo::new(hash, 2)));

        let mut swap = sample_swap(SwapStatus::WaitingForRefundConfirmations);
        swap.refund_hash = Some("0xrefund".to_string());
        let provider = h.build(&swap);
        let update = step(&provider, &swap).await.unwrap().unwrap();
        assert_eq!(update.status, SwapStatus::Refunded);
        assert!(update.end_time.is_some());
    }

    #[tokio::test]
    async fn terminal_swaps_do_nothing() {
        let h = Harness::new();
        let swap = sample_swap(SwapStatus::Success);
        let provider = h.build(&swap);
        for status in [SwapStatus::Success, SwapStatus::Refunded, SwapStatus::QuoteExpired] {
            let swap = sample_swap(status);
            assert!(step(&provider, &swap).await.unwrap().is_none());
        }
    }

    #[tokio::test]
    async fn polling_is_throttled_per_status() {
        let mut h = Harness::new().chain_times(EARLY, EARLY);
        h.min_action_interval_ms = 60_000;
        h.from_chain = {
            let mut chain = chain_at(EARLY);
            chain
                .expect_transaction_by_hash()
                .times(1)
                .returning(|hash| Ok(TxInfo::new(hash, 1)));
            chain
        };

        let mut swap = sample_swap(SwapStatus::WaitingForRefundConfirmations);
        swap.refund_hash = Some("0xrefund".to_string());
        let provider = h.build(&swap);
        assert!(step(&provider, &swap).await.unwrap().is_some());
        // a second poll inside the interval never reaches the chain
        assert!(step(&provider, &swap).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_client_is_an_error() {
        let h = Harness::new();
        let swap = sample_swap(SwapStatus::Funded);
        let provider = h.build(&swap);

        let mut other = swap.clone();
        other.to_account_id = "acc-unknown".to_string();
        let err = step(&provider, &other).await.unwrap_err();
        assert!(matches!(err, SwapError::ClientNotFound { .. }));
    }

    #[tokio::test]
    async fn market_data_feeds_quotes() {
        let mut h = Harness::new();
        h.orders.expect_market_info().returning(|_| {
            Ok(serde_json::from_value(serde_json::json!([
                { "from": "BTC", "to": "DAI", "status": "ACTIVE", "rate": "16000", "min": "0.001", "max": "1" }
            ]))
            .unwrap())
        });

        let provider = h.build(&sample_swap(SwapStatus::Initiated));
        assert_eq!(provider.update_market_data(NETWORK).await.unwrap(), 1);

        let request = QuoteRequest {
            from: "BTC".to_string(),
            to: "DAI".to_string(),
            amount: "0.01".parse().unwrap(),
        };
        let quote = provider.get_quote(NETWORK, &request).unwrap().unwrap();
        assert_eq!(quote.to_amount, 160_000_000_000_000_000_000);

        let below = QuoteRequest {
            amount: "0.0001".parse().unwrap(),
            ..request
        };
        assert!(provider.get_quote(NETWORK, &below).unwrap().is_none());
    }

    #[tokio::test]
    async fn initiation_reported_jumps_when_counter_party_funded() {
        let mut h = Harness::new();
        h.to_swap
            .expect_find_initiate_swap_transaction()
            .returning(|_| Ok(Some(TxInfo::new("0xtofund", 1))));
        h.to_swap
            .expect_verify_initiate_swap_transaction()
            .returning(|_, _| Ok(true));
        h.to_swap
            .expect_find_fund_swap_transaction()
            .returning(|_, _| Ok(Some(TxInfo::new("0xtokenfund", 3))));
        h.from_chain.expect_transaction_by_hash().never();

        let swap = sample_swap(SwapStatus::InitiationReported);
        let provider = h.build(&swap);
        let update = step(&provider, &swap).await.unwrap().unwrap();
        assert_eq!(update.status, SwapStatus::ConfirmCounterPartyInitiation);
        assert_eq!(update.to_fund_hash.as_deref(), Some("0xtofund"));
    }

    fn transient_errors() -> Vec<ChainError> {
        vec![
            ChainError::PendingTx("0xpending".to_string()),
            ChainError::BlockNotFound(100),
        ]
    }

    #[tokio::test]
    async fn own_initiation_poll_swallows_transient_errors() {
        for error in transient_errors() {
            let mut h = Harness::new().chain_times(EARLY, EARLY);
            h.to_swap
                .expect_find_initiate_swap_transaction()
                .returning(|_| Ok(None));
            h.from_chain
                .expect_transaction_by_hash()
                .return_once(move |_| Err(error));

            let swap = sample_swap(SwapStatus::InitiationReported);
            let provider = h.build(&swap);
            assert!(step(&provider, &swap).await.unwrap().is_none());
        }
    }

    #[tokio::test]
    async fn pending_claim_is_not_abandoned_after_timelocks() {
        for error in transient_errors() {
            // both timelocks have passed; only a missing claim may fall back to refund
            let mut h = Harness::new().chain_times(1_700_020_000, 1_700_020_000);
            h.to_chain = {
                let mut chain = chain_at(1_700_020_000);
                chain
                    .expect_transaction_by_hash()
                    .return_once(move |_| Err(error));
                chain
            };

            let mut swap = sample_swap(SwapStatus::WaitingForClaimConfirmations);
            swap.to_claim_hash = Some("0xclaim".to_string());
            let provider = h.build(&swap);
            assert!(step(&provider, &swap).await.unwrap().is_none());
        }
    }

    #[tokio::test]
    async fn refund_poll_swallows_transient_errors() {
        for error in transient_errors() {
            let mut h = Harness::new();
            h.from_chain
                .expect_transaction_by_hash()
                .return_once(move |_| Err(error));

            let mut swap = sample_swap(SwapStatus::WaitingForRefundConfirmations);
            swap.refund_hash = Some("0xrefund".to_string());
            let provider = h.build(&swap);
            assert!(step(&provider, &swap).await.unwrap().is_none());
        }
    }

    #[tokio::test]
    async fn balance_refresh_failure_still_completes() {
        let mut h = Harness::new();
        h.refreshes = true;
        h.refresh_fails = true;
        h.to_chain
            .expect_transaction_by_hash()
            .returning(|hash| Ok(TxInfo::new(hash, 1)));

        let mut swap = sample_swap(SwapStatus::WaitingForClaimConfirmations);
        swap.to_claim_hash = Some("0xclaim".to_string());
        let provider = h.build(&swap);
        let update = step(&provider, &swap).await.unwrap().unwrap();
        assert_eq!(update.status, SwapStatus::Success);
        assert!(update.end_time.is_some());
    }

    /// Refund client that yields mid-broadcast and records overlapping calls
    #[derive(Default)]
    struct SlowRefund {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SwapApi for SlowRefund {
        async fn generate_secret(&self, _: &str) -> ChainResult<String> {
            unimplemented!()
        }

        async fn initiate_swap(&self, _: &SwapParams, _: &str) -> ChainResult<TxInfo> {
            unimplemented!()
        }

        async fn fund_swap(&self, _: &SwapParams, _: &str, _: &str) -> ChainResult<TxInfo> {
            unimplemented!()
        }

        async fn find_initiate_swap_transaction(
            &self,
            _: &SwapParams,
        ) -> ChainResult<Option<TxInfo>> {
            unimplemented!()
        }

        async fn verify_initiate_swap_transaction(
            &self,
            _: &SwapParams,
            _: &str,
        ) -> ChainResult<bool> {
            unimplemented!()
        }

        async fn find_fund_swap_transaction(
            &self,
            _: &SwapParams,
            _: &str,
        ) -> ChainResult<Option<TxInfo>> {
            unimplemented!()
        }

        async fn claim_swap(
            &self,
            _: &SwapParams,
            _: &str,
            _: &str,
            _: &str,
        ) -> ChainResult<TxInfo> {
            unimplemented!()
        }

        async fn refund_swap(&self, _: &SwapParams, _: &str, _: &str) -> ChainResult<TxInfo> {
            let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(running, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(TxInfo::new(format!("0xrefund{}", n), 0))
        }
    }

    #[tokio::test]
    async fn concurrent_refunds_from_one_account_serialize() {
        let refunds = Arc::new(SlowRefund::default());
        let mut h = Harness::new();
        h.from_swap_impl = Some(refunds.clone() as Arc<dyn SwapApi>);

        let swap = sample_swap(SwapStatus::GetRefund);
        let provider = h.build(&swap);
        let (first, second) = futures::join!(step(&provider, &swap), step(&provider, &swap));

        for update in [first, second] {
            assert_eq!(
                update.unwrap().unwrap().status,
                SwapStatus::WaitingForRefundConfirmations
            );
        }
        assert_eq!(refunds.calls.load(Ordering::SeqCst), 2);
        assert_eq!(refunds.peak.load(Ordering::SeqCst), 1);
    }
}
