//! Capability the core uses to act on a chain.
//!
//! The core only needs two primitives: put a contract on-chain and send a
//! transaction to one. Everything above that (proxies, initializers,
//! upgrades) is composed by the executors. Both primitives resolve once the
//! transaction is confirmed; a revert or a stuck transaction is an error.

use std::future::Future;

use alloy_core::primitives::{Address, B256, Bytes};

use crate::ArtifactRef;

mod artifacts;
mod json_rpc;
mod rpc;

pub use artifacts::{Artifact, ArtifactStore};
pub use json_rpc::{JsonRpcChainClient, JsonRpcConfig};

/// A contract confirmed on-chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployedContract {
    pub address: Address,
    /// SHA-256 of the deployed bytecode, when known.
    pub code_hash: Option<String>,
}

/// Confirmed-transaction capability of a chain.
pub trait ChainClient: Send + Sync {
    /// Deploy `artifact`, appending `constructor_args` (ABI-encoded, without
    /// selector) to its bytecode.
    fn deploy_contract(
        &self,
        artifact: &ArtifactRef,
        constructor_args: Bytes,
    ) -> impl Future<Output = anyhow::Result<DeployedContract>> + Send;

    /// Send `calldata` to `target`, returning the transaction hash.
    fn call(
        &self,
        target: Address,
        calldata: Bytes,
    ) -> impl Future<Output = anyhow::Result<B256>> + Send;
}
