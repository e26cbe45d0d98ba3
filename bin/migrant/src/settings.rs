//! Settings of the `migrant` binary.
//!
//! Layered with figment: built-in defaults, then `Migrant.toml`, then
//! `MIGRANT_*` environment variables (nested keys split on `__`, e.g.
//! `MIGRANT_NETWORKS__DEVELOPMENT__RPC_URL`).

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    time::Duration,
};

use alloy_core::primitives::Address;
use anyhow::Context;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use migrant_deploy::{Network, chain::JsonRpcConfig};
use serde::{Deserialize, Serialize};
use url::Url;

/// Connection settings of one network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSettings {
    pub rpc_url: Url,
    /// Sender account, unlocked on the node. Defaults to the node's first account.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas: Option<u64>,
    /// Gas price in wei.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_price: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_interval_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_attempts: Option<usize>,
}

impl NetworkSettings {
    fn local(rpc_url: Url) -> Self {
        Self {
            rpc_url,
            from: None,
            gas: None,
            gas_price: None,
            poll_interval_secs: None,
            poll_attempts: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Address registry file.
    pub registry: PathBuf,
    /// Directory of compiled contract artifacts.
    pub artifacts: PathBuf,
    /// Per-network deployment config (TOML or JSON).
    pub deploy_config: PathBuf,
    #[serde(default)]
    pub networks: BTreeMap<String, NetworkSettings>,
}

impl Default for Settings {
    fn default() -> Self {
        let mut networks = BTreeMap::new();
        if let Ok(url) = Url::parse("http://127.0.0.1:7545") {
            networks.insert("development".to_string(), NetworkSettings::local(url));
        }

        Self {
            registry: PathBuf::from("deployments/addresses.json"),
            artifacts: PathBuf::from("build/contracts"),
            deploy_config: PathBuf::from("deploy-config.toml"),
            networks,
        }
    }
}

impl Settings {
    /// Load settings, reading `path` if it exists.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let settings: Settings = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("MIGRANT_").split("__"))
            .extract()
            .with_context(|| format!("Failed to load settings from {}", path.display()))?;

        tracing::debug!(
            path = %path.display(),
            registry = %settings.registry.display(),
            networks = settings.networks.len(),
            "Settings loaded"
        );

        Ok(settings)
    }

    /// JSON-RPC client settings of `network`.
    pub fn rpc_config(&self, network: &Network) -> anyhow::Result<JsonRpcConfig> {
        let network_settings = self
            .networks
            .get(network.as_str())
            .with_context(|| format!("No RPC settings for network '{network}'"))?;

        let mut config = JsonRpcConfig::new(network_settings.rpc_url.clone());
        config.from = network_settings.from;
        config.gas = network_settings.gas;
        config.gas_price = network_settings.gas_price.map(u128::from);
        if let Some(secs) = network_settings.poll_interval_secs {
            config.receipt_poll_interval = Duration::from_secs(secs);
        }
        if let Some(attempts) = network_settings.poll_attempts {
            config.receipt_poll_attempts = attempts;
        }

        Ok(config)
    }
}
