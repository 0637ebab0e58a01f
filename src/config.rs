//! Configuration management for the swap orchestrator
//!
//! Loads configuration from TOML files with environment variable substitution.

use crate::assets::{AssetKind, AssetRegistry, MAX_DECIMALS};
use crate::chain::{Chain, Network};

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub scheduler: SchedulerConfig,
    /// Counterparty agents keyed by network name
    pub agents: HashMap<String, AgentConfig>,
    /// Extra or overriding asset definitions keyed by symbol
    #[serde(default)]
    pub assets: HashMap<String, AssetConfig>,
    /// EVM RPC endpoints keyed by a free-form name
    #[serde(default)]
    pub chains: HashMap<String, ChainRpcConfig>,
    pub database: Option<DatabaseConfig>,
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    pub provider_id: String,
    pub poll_interval_ms: u64,
    /// Minimum spacing between two polls of the same swap in the same status
    pub min_action_interval_ms: u64,
    #[serde(default = "default_chain_query_attempts")]
    pub chain_query_attempts: u32,
    #[serde(default = "default_chain_query_retry_delay_ms")]
    pub chain_query_retry_delay_ms: u64,
    /// How often cached market data is reloaded from the agents
    #[serde(default = "default_market_refresh_secs")]
    pub market_refresh_secs: u64,
}

fn default_chain_query_attempts() -> u32 {
    3
}

fn default_chain_query_retry_delay_ms() -> u64 {
    2000
}

fn default_market_refresh_secs() -> u64 {
    300
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn min_action_interval(&self) -> Duration {
        Duration::from_millis(self.min_action_interval_ms)
    }

    pub fn market_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.market_refresh_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    pub url: String,
    #[serde(default = "default_agent_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_agent_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct AssetConfig {
    pub chain: Chain,
    pub kind: AssetKind,
    pub decimals: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainRpcConfig {
    pub chain: Chain,
    pub rpc_urls: Vec<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

impl Settings {
    /// Load settings from the file named by `SWAP_ORCHESTRATOR_CONFIG`
    pub fn load() -> Result<Self> {
        let config_path = env::var("SWAP_ORCHESTRATOR_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        Self::load_from(&config_path)
    }

    /// Load settings from a specific file
    pub fn load_from(path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        Self::from_toml_str(&config_str)
    }

    /// Parse and validate settings from TOML text
    pub fn from_toml_str(input: &str) -> Result<Self> {
        // Substitute environment variables
        let config_str = substitute_env_vars(input);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.scheduler.poll_interval_ms == 0 {
            anyhow::bail!("scheduler.poll_interval_ms must be positive");
        }
        if self.scheduler.chain_query_attempts == 0 {
            anyhow::bail!("scheduler.chain_query_attempts must be at least 1");
        }
        if self.scheduler.market_refresh_secs == 0 {
            anyhow::bail!("scheduler.market_refresh_secs must be positive");
        }

        if self.agents.is_empty() {
            anyhow::bail!("At least one agent must be configured");
        }
        for (name, agent) in &self.agents {
            name.parse::<Network>()
                .map_err(|e| anyhow::anyhow!("agents.{}: {}", name, e))?;
            if agent.url.is_empty() {
                anyhow::bail!("Agent for {} has no URL configured", name);
            }
        }

        for (symbol, asset) in &self.assets {
            if asset.kind == AssetKind::Erc20 && !asset.chain.is_evm() {
                anyhow::bail!("Asset {} is an ERC20 token on non-EVM chain {}", symbol, asset.chain);
            }
            if asset.decimals > MAX_DECIMALS {
                anyhow::bail!(
                    "Asset {} has {} decimals, at most {} are supported",
                    symbol,
                    asset.decimals,
                    MAX_DECIMALS
                );
            }
        }

        for (name, chain) in &self.chains {
            if chain.enabled {
                if chain.rpc_urls.is_empty() {
                    anyhow::bail!("Chain {} has no RPC URLs configured", name);
                }
                if !chain.chain.is_evm() {
                    tracing::warn!("Chain {} is not an EVM chain - will skip", name);
                }
            }
        }

        Ok(())
    }

    /// Agent configured for a network
    pub fn agent(&self, network: Network) -> Option<&AgentConfig> {
        self.agents.get(network.as_str())
    }

    /// Built-in assets merged with configured overrides
    pub fn asset_registry(&self) -> AssetRegistry {
        let mut registry = AssetRegistry::default();
        for (symbol, asset) in &self.assets {
            registry.insert(symbol, asset.clone());
        }
        registry
    }

    /// Enabled EVM RPC configurations
    pub fn enabled_chains(&self) -> Vec<(&String, &ChainRpcConfig)> {
        self.chains
            .iter()
            .filter(|(_, c)| c.enabled && c.chain.is_evm())
            .collect()
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    let mut result = input.to_string();
    let re = match regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}") {
        Ok(re) => re,
        Err(_) => return result,
    };

    for cap in re.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}
