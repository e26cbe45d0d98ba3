//! Per-network deployment configuration.
//!
//! The configuration is authored outside the orchestrator and never mutated by
//! it. A file holds one table per network:
//!
//! ```toml
//! [development]
//! totalWeight = 100
//! founderPoolWeight = 10
//! stakePoolWeight = 60
//! presalePoolWeight = 30
//! tokenPriceOracle = "0x..."
//! WETHToken = "0x..."
//! founders = [{ address = "0x...", weight = 1 }]
//! ```
//!
//! JSON files with the same shape are accepted as well.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use alloy_core::primitives::{Address, U256};
use serde::{Deserialize, Serialize};

use crate::{
    AbiValue, Network,
    error::{DeployError, DeployResult},
};

/// A founder beneficiary of the founder pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Founder {
    pub address: Address,
    pub weight: u64,
}

/// Immutable configuration of one network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentConfig {
    pub total_weight: u64,
    pub founder_pool_weight: u64,
    #[serde(alias = "stakePookWeight")]
    pub stake_pool_weight: u64,
    pub presale_pool_weight: u64,
    pub token_price_oracle: Address,
    #[serde(rename = "WETHToken")]
    pub weth_token: Address,
    #[serde(default)]
    pub founders: Vec<Founder>,
}

/// Keys a descriptor argument may read from the [`DeploymentConfig`].
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[strum(serialize_all = "camelCase")]
pub enum ConfigKey {
    TotalWeight,
    FounderPoolWeight,
    StakePoolWeight,
    PresalePoolWeight,
    TokenPriceOracle,
    #[strum(serialize = "WETHToken")]
    WethToken,
}

impl ConfigKey {
    /// Solidity type family of the value behind the key.
    pub fn sol_type(&self) -> &'static str {
        match self {
            ConfigKey::TotalWeight
            | ConfigKey::FounderPoolWeight
            | ConfigKey::StakePoolWeight
            | ConfigKey::PresalePoolWeight => "uint256",
            ConfigKey::TokenPriceOracle | ConfigKey::WethToken => "address",
        }
    }
}

impl DeploymentConfig {
    pub fn get(&self, key: ConfigKey) -> AbiValue {
        match key {
            ConfigKey::TotalWeight => AbiValue::Uint(U256::from(self.total_weight)),
            ConfigKey::FounderPoolWeight => AbiValue::Uint(U256::from(self.founder_pool_weight)),
            ConfigKey::StakePoolWeight => AbiValue::Uint(U256::from(self.stake_pool_weight)),
            ConfigKey::PresalePoolWeight => AbiValue::Uint(U256::from(self.presale_pool_weight)),
            ConfigKey::TokenPriceOracle => AbiValue::Address(self.token_price_oracle),
            ConfigKey::WethToken => AbiValue::Address(self.weth_token),
        }
    }
}

/// Source of per-network configuration.
pub trait ConfigProvider {
    /// Load the configuration of `network`.
    ///
    /// Fails with [`DeployError::ConfigMissing`] when the network has none.
    fn load(&self, network: &Network) -> DeployResult<DeploymentConfig>;
}

/// Configuration held in memory.
#[derive(Debug, Clone, Default)]
pub struct StaticConfigProvider {
    configs: BTreeMap<Network, DeploymentConfig>,
}

impl StaticConfigProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, network: impl Into<Network>, config: DeploymentConfig) -> Self {
        self.configs.insert(network.into(), config);
        self
    }
}

impl ConfigProvider for StaticConfigProvider {
    fn load(&self, network: &Network) -> DeployResult<DeploymentConfig> {
        self.configs
            .get(network)
            .cloned()
            .ok_or_else(|| DeployError::ConfigMissing {
                network: network.clone(),
            })
    }
}

/// Configuration read from a TOML or JSON file keyed by network.
#[derive(Debug, Clone)]
pub struct FileConfigProvider {
    path: PathBuf,
}

impl FileConfigProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn invalid(network: &Network, reason: impl std::fmt::Display) -> DeployError {
        DeployError::ConfigInvalid {
            network: network.clone(),
            reason: reason.to_string(),
        }
    }
}

impl ConfigProvider for FileConfigProvider {
    fn load(&self, network: &Network) -> DeployResult<DeploymentConfig> {
        if !self.path.exists() {
            tracing::warn!(path = %self.path.display(), "Deployment config file not found");
            return Err(DeployError::ConfigMissing {
                network: network.clone(),
            });
        }

        let content = std::fs::read_to_string(&self.path).map_err(|e| {
            Self::invalid(network, format!("failed to read {}: {e}", self.path.display()))
        })?;

        let is_json = self
            .path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        // Parse loosely first so a broken table of another network does not
        // prevent loading this one.
        let mut tables: BTreeMap<String, serde_json::Value> = if is_json {
            serde_json::from_str(&content).map_err(|e| Self::invalid(network, e))?
        } else {
            let tables: BTreeMap<String, toml::Value> =
                toml::from_str(&content).map_err(|e| Self::invalid(network, e))?;
            tables
                .into_iter()
                .map(|(name, table)| serde_json::to_value(table).map(|value| (name, value)))
                .collect::<Result<_, _>>()
                .map_err(|e| Self::invalid(network, e))?
        };

        let table = tables
            .remove(network.as_str())
            .ok_or_else(|| DeployError::ConfigMissing {
                network: network.clone(),
            })?;

        let config: DeploymentConfig =
            serde_json::from_value(table).map_err(|e| Self::invalid(network, e))?;

        tracing::debug!(
            network = %network,
            path = %self.path.display(),
            founders = config.founders.len(),
            "Deployment config loaded"
        );

        Ok(config)
    }
}
