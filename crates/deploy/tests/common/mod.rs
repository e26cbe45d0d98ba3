//! In-process chain used by the integration tests.

#![allow(dead_code)]

use std::{collections::HashSet, sync::Mutex};

use alloy_core::{
    json_abi::Function,
    primitives::{Address, B256, Bytes},
};
use anyhow::bail;
use migrant_deploy::{
    ArgSpec, ArtifactRef, ChainClient, DeployedContract, DeploymentConfig, DescriptorSet,
    ModuleDescriptor,
};

/// One confirmed transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainAction {
    Deploy {
        artifact: String,
        address: Address,
        constructor_args: Bytes,
    },
    Call {
        target: Address,
        calldata: Bytes,
    },
}

impl ChainAction {
    pub fn selector(&self) -> Option<[u8; 4]> {
        match self {
            ChainAction::Call { calldata, .. } if calldata.len() >= 4 => {
                let mut selector = [0u8; 4];
                selector.copy_from_slice(&calldata[..4]);
                Some(selector)
            }
            _ => None,
        }
    }
}

#[derive(Default)]
struct MockState {
    next_address: u8,
    next_tx: u8,
    actions: Vec<ChainAction>,
    failing_artifacts: HashSet<String>,
    failing_selectors: HashSet<[u8; 4]>,
}

/// Chain that confirms every transaction instantly, handing out sequential
/// addresses, unless told to revert.
#[derive(Default)]
pub struct MockChain {
    state: Mutex<MockState>,
}

impl MockChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make deployments of `artifact` revert.
    pub fn fail_deploys_of(&self, artifact: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_artifacts
            .insert(artifact.to_string());
    }

    /// Make calls of `signature` revert.
    pub fn fail_calls_of(&self, signature: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_selectors
            .insert(selector(signature));
    }

    pub fn heal(&self) {
        let mut state = self.state.lock().unwrap();
        state.failing_artifacts.clear();
        state.failing_selectors.clear();
    }

    pub fn actions(&self) -> Vec<ChainAction> {
        self.state.lock().unwrap().actions.clone()
    }

    pub fn deploys_of(&self, artifact: &str) -> Vec<(Address, Bytes)> {
        self.actions()
            .into_iter()
            .filter_map(|action| match action {
                ChainAction::Deploy {
                    artifact: name,
                    address,
                    constructor_args,
                } if name == artifact => Some((address, constructor_args)),
                _ => None,
            })
            .collect()
    }

    pub fn calls_of(&self, signature: &str) -> Vec<(Address, Bytes)> {
        let wanted = selector(signature);
        self.actions()
            .into_iter()
            .filter(|action| action.selector() == Some(wanted))
            .filter_map(|action| match action {
                ChainAction::Call { target, calldata } => Some((target, calldata)),
                _ => None,
            })
            .collect()
    }
}

impl ChainClient for MockChain {
    async fn deploy_contract(
        &self,
        artifact: &ArtifactRef,
        constructor_args: Bytes,
    ) -> anyhow::Result<DeployedContract> {
        let mut state = self.state.lock().unwrap();
        if state.failing_artifacts.contains(artifact.as_str()) {
            bail!("Deployment of {artifact} reverted");
        }

        state.next_address += 1;
        let address = Address::with_last_byte(state.next_address);
        state.actions.push(ChainAction::Deploy {
            artifact: artifact.to_string(),
            address,
            constructor_args,
        });

        Ok(DeployedContract {
            address,
            code_hash: Some(format!("hash-of-{artifact}")),
        })
    }

    async fn call(&self, target: Address, calldata: Bytes) -> anyhow::Result<B256> {
        let mut state = self.state.lock().unwrap();
        if calldata.len() >= 4 {
            let mut wanted = [0u8; 4];
            wanted.copy_from_slice(&calldata[..4]);
            if state.failing_selectors.contains(&wanted) {
                bail!("Call to {target} reverted");
            }
        }

        state.next_tx += 1;
        state.actions.push(ChainAction::Call { target, calldata });
        Ok(B256::with_last_byte(state.next_tx))
    }
}

/// Route run logs to the test output (idempotent).
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init()
        .ok();
}

pub fn selector(signature: &str) -> [u8; 4] {
    Function::parse(signature)
        .expect("test signature should parse")
        .selector()
        .0
}

pub fn config() -> DeploymentConfig {
    DeploymentConfig {
        total_weight: 100,
        founder_pool_weight: 10,
        stake_pool_weight: 60,
        presale_pool_weight: 30,
        token_price_oracle: Address::repeat_byte(0xaa),
        weth_token: Address::repeat_byte(0xbb),
        founders: vec![],
    }
}

/// `TokenA` and `PoolB`, whose initializer takes `TokenA`'s address.
pub fn token_and_pool() -> DescriptorSet {
    DescriptorSet::new()
        .with(ModuleDescriptor::new("TokenA", "TokenA").proxied())
        .unwrap()
        .with(
            ModuleDescriptor::new("PoolB", "PoolB")
                .proxied()
                .initializer("initialize(address)", vec![ArgSpec::module("TokenA")])
                .unwrap(),
        )
        .unwrap()
}
