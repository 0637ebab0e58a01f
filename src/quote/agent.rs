//! Counterparty agent (order service) client

use super::{LockedQuote, RawLockedQuote, RawMarket};
use crate::chain::Network;
use crate::config::AgentConfig;
use crate::error::{SwapError, SwapResult};

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

/// Body of `POST /api/swap/order`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRequest {
    pub from: String,
    pub to: String,
    #[serde(with = "crate::swap::amount")]
    pub from_amount: u128,
}

/// Body of `POST /api/swap/order/{id}`, reporting our initiation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderUpdate {
    pub from_address: String,
    pub to_address: String,
    pub from_fund_hash: String,
    pub secret_hash: String,
}

/// The counterparty's order API
#[cfg_attr(test, automock)]
#[async_trait]
pub trait OrderService: Send + Sync {
    async fn market_info(&self, network: Network) -> SwapResult<Vec<RawMarket>>;

    /// Reserve a binding quote
    async fn create_order(&self, network: Network, request: &OrderRequest)
        -> SwapResult<LockedQuote>;

    async fn update_order(
        &self,
        network: Network,
        order_id: &str,
        update: &OrderUpdate,
    ) -> SwapResult<()>;
}

struct Endpoint {
    base_url: String,
    client: Client,
}

/// reqwest-backed `OrderService` talking to one agent per network
pub struct AgentClient {
    endpoints: HashMap<Network, Endpoint>,
}

impl AgentClient {
    /// Build clients for the configured agents, keyed by network name
    pub fn new(agents: &HashMap<String, AgentConfig>) -> SwapResult<Self> {
        let mut endpoints = HashMap::new();
        for (name, agent) in agents {
            let network: Network = name.parse()?;
            let client = Client::builder()
                .timeout(Duration::from_secs(agent.timeout_secs))
                .build()?;
            endpoints.insert(
                network,
                Endpoint {
                    base_url: agent.url.trim_end_matches('/').to_string(),
                    client,
                },
            );
        }

        Ok(Self { endpoints })
    }

    fn endpoint(&self, network: Network) -> SwapResult<&Endpoint> {
        self.endpoints
            .get(&network)
            .ok_or_else(|| SwapError::Config(format!("No agent configured for {}", network)))
    }

    fn url(&self, network: Network, path: &str) -> SwapResult<String> {
        Ok(format!("{}{}", self.endpoint(network)?.base_url, path))
    }

    async fn send<T: DeserializeOwned>(request: RequestBuilder, what: &str) -> SwapResult<T> {
        let response = request.header("x-requested-with", "wallet").send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SwapError::OrderService(format!(
                "{} failed with {}: {}",
                what, status, body
            )));
        }

        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl OrderService for AgentClient {
    async fn market_info(&self, network: Network) -> SwapResult<Vec<RawMarket>> {
        let url = self.url(network, "/api/swap/marketinfo")?;
        let client = &self.endpoint(network)?.client;
        debug!("Fetching market info from {}", url);

        Self::send(client.get(&url), "Market info").await
    }

    async fn create_order(
        &self,
        network: Network,
        request: &OrderRequest,
    ) -> SwapResult<LockedQuote> {
        let url = self.url(network, "/api/swap/order")?;
        let client = &self.endpoint(network)?.client;
        debug!("Creating {}-{} order at {}", request.from, request.to, url);

        let raw: RawLockedQuote = Self::send(client.post(&url).json(request), "Create order").await?;
        LockedQuote::try_from(raw)
    }

    async fn update_order(
        &self,
        network: Network,
        order_id: &str,
        update: &OrderUpdate,
    ) -> SwapResult<()> {
        let url = self.url(network, &format!("/api/swap/order/{}", order_id))?;
        let client = &self.endpoint(network)?.client;
        debug!("Reporting initiation of order {}", order_id);

        let _: serde_json::Value = Self::send(client.post(&url).json(update), "Update order").await?;
        Ok(())
    }
}
