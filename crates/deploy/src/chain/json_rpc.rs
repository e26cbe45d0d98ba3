//! Chain client speaking Ethereum JSON-RPC to a node that manages the
//! deployer account (`eth_sendTransaction`).

use std::time::Duration;

use alloy_core::primitives::{Address, B256, Bytes};
use anyhow::Context;
use backon::{ConstantBuilder, Retryable};
use serde::Deserialize;
use serde_json::{Value, json};
use url::Url;

use super::{ArtifactStore, ChainClient, DeployedContract, rpc};
use crate::ArtifactRef;

/// Default timeout of a single RPC request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default interval between receipt polls.
pub const DEFAULT_RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Default number of receipt polls before a transaction is considered stuck.
pub const DEFAULT_RECEIPT_POLL_ATTEMPTS: usize = 150;

/// Connection settings of a [`JsonRpcChainClient`].
#[derive(Debug, Clone)]
pub struct JsonRpcConfig {
    pub rpc_url: Url,
    /// Sender of every transaction. Defaults to the node's first account.
    pub from: Option<Address>,
    pub gas: Option<u64>,
    pub gas_price: Option<u128>,
    pub request_timeout: Duration,
    pub receipt_poll_interval: Duration,
    pub receipt_poll_attempts: usize,
}

impl JsonRpcConfig {
    pub fn new(rpc_url: Url) -> Self {
        Self {
            rpc_url,
            from: None,
            gas: None,
            gas_price: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            receipt_poll_interval: DEFAULT_RECEIPT_POLL_INTERVAL,
            receipt_poll_attempts: DEFAULT_RECEIPT_POLL_ATTEMPTS,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TxReceipt {
    transaction_hash: B256,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    contract_address: Option<Address>,
}

impl TxReceipt {
    /// Pre-Byzantium receipts carry no status; treat them as successful.
    fn succeeded(&self) -> bool {
        self.status
            .as_deref()
            .is_none_or(|status| status == "0x1" || status == "0x01")
    }
}

/// [`ChainClient`] backed by a JSON-RPC endpoint.
#[derive(Debug, Clone)]
pub struct JsonRpcChainClient {
    client: reqwest::Client,
    url: String,
    from: Address,
    gas: Option<u64>,
    gas_price: Option<u128>,
    receipt_poll_interval: Duration,
    receipt_poll_attempts: usize,
    artifacts: ArtifactStore,
}

impl JsonRpcChainClient {
    /// Connect to the endpoint and resolve the sender account.
    pub async fn connect(config: JsonRpcConfig, artifacts: ArtifactStore) -> anyhow::Result<Self> {
        let client = rpc::create_client(config.request_timeout)?;
        let url = config.rpc_url.to_string();

        let from = match config.from {
            Some(from) => from,
            None => {
                let accounts: Vec<Address> =
                    rpc::json_rpc_call(&client, &url, "eth_accounts", vec![])
                        .await
                        .context("Failed to list node accounts")?;
                *accounts
                    .first()
                    .context("The node manages no account to deploy from")?
            }
        };

        let chain_id: String = rpc::json_rpc_call(&client, &url, "eth_chainId", vec![])
            .await
            .context(format!("Failed to reach RPC endpoint {url}"))?;

        tracing::info!(rpc_url = %url, chain_id = %chain_id, from = %from, "Connected to chain");

        Ok(Self {
            client,
            url,
            from,
            gas: config.gas,
            gas_price: config.gas_price,
            receipt_poll_interval: config.receipt_poll_interval,
            receipt_poll_attempts: config.receipt_poll_attempts,
            artifacts,
        })
    }

    pub fn from_address(&self) -> Address {
        self.from
    }

    fn transaction(&self, to: Option<Address>, data: &Bytes) -> Value {
        let mut tx = json!({
            "from": self.from,
            "data": data,
        });
        if let Some(to) = to {
            tx["to"] = json!(to);
        }
        if let Some(gas) = self.gas {
            tx["gas"] = json!(format!("0x{gas:x}"));
        }
        if let Some(gas_price) = self.gas_price {
            tx["gasPrice"] = json!(format!("0x{gas_price:x}"));
        }
        tx
    }

    /// Send a transaction and wait for its successful receipt.
    async fn send_transaction(&self, to: Option<Address>, data: Bytes) -> anyhow::Result<TxReceipt> {
        let tx_hash: B256 = rpc::json_rpc_call(
            &self.client,
            &self.url,
            "eth_sendTransaction",
            vec![self.transaction(to, &data)],
        )
        .await
        .context("Failed to send transaction")?;

        tracing::debug!(tx_hash = %tx_hash, to = ?to, "Transaction sent, waiting for receipt");

        let receipt = self.wait_for_receipt(tx_hash).await?;

        if !receipt.succeeded() {
            anyhow::bail!("Transaction {} reverted", receipt.transaction_hash);
        }

        Ok(receipt)
    }

    async fn wait_for_receipt(&self, tx_hash: B256) -> anyhow::Result<TxReceipt> {
        let fetch = || async move {
            let receipt: Option<TxReceipt> = rpc::json_rpc_call(
                &self.client,
                &self.url,
                "eth_getTransactionReceipt",
                vec![json!(tx_hash)],
            )
            .await?;
            receipt.ok_or_else(|| anyhow::anyhow!("Transaction {tx_hash} is still pending"))
        };

        fetch
            .retry(
                ConstantBuilder::default()
                    .with_delay(self.receipt_poll_interval)
                    .with_max_times(self.receipt_poll_attempts),
            )
            .sleep(tokio::time::sleep)
            .notify(|err: &anyhow::Error, after: Duration| {
                tracing::trace!(error = %err, retry_in = ?after, "Receipt not available yet");
            })
            .await
            .context(format!("Timeout waiting for transaction {tx_hash} to be mined"))
    }
}

impl ChainClient for JsonRpcChainClient {
    async fn deploy_contract(
        &self,
        artifact: &ArtifactRef,
        constructor_args: Bytes,
    ) -> anyhow::Result<DeployedContract> {
        let compiled = self.artifacts.load(artifact)?;
        let code_hash = compiled.code_hash();

        let mut data = compiled.bytecode.to_vec();
        data.extend_from_slice(&constructor_args);

        let receipt = self
            .send_transaction(None, Bytes::from(data))
            .await
            .context(format!("Failed to deploy {artifact}"))?;

        let address = receipt.contract_address.context(format!(
            "Receipt of {} carries no contract address",
            receipt.transaction_hash
        ))?;

        tracing::debug!(artifact = %artifact, address = %address, "Contract deployed");

        Ok(DeployedContract {
            address,
            code_hash: Some(code_hash),
        })
    }

    async fn call(&self, target: Address, calldata: Bytes) -> anyhow::Result<B256> {
        let receipt = self
            .send_transaction(Some(target), calldata)
            .await
            .context(format!("Call to {target} failed"))?;
        Ok(receipt.transaction_hash)
    }
}
