//! Step executors.
//!
//! An [`Executor`] runs one step against the chain and records the result.
//! Every executor follows the same two phases: perform the on-chain action
//! and wait for its confirmation, then commit the registry write. Nothing is
//! written when the first phase fails.

use alloy_core::primitives::{Address, B256};

use crate::{
    DeploymentConfig, DescriptorSet, ModuleName, Network,
    chain::ChainClient,
    error::{DeployError, DeployResult},
    plan::{Reapply, Step},
    registry::AddressRegistry,
    resolve::ArgResolver,
};

mod deploy;
mod wire;

/// Why a step did not need to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum SkipReason {
    AlreadyDeployed,
    AlreadyUpgraded,
    AlreadyWired,
}

/// Result of a step that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Deployed {
        address: Address,
    },
    Upgraded {
        address: Address,
        implementation: Address,
        version: u32,
    },
    Wired {
        tx_hash: B256,
    },
    Skipped(SkipReason),
}

/// Everything a step needs, borrowed for the duration of one step.
pub struct Executor<'a, C, R: ?Sized> {
    network: &'a Network,
    chain: &'a C,
    registry: &'a mut R,
    descriptors: &'a DescriptorSet,
    config: &'a DeploymentConfig,
}

impl<'a, C, R> Executor<'a, C, R>
where
    C: ChainClient,
    R: AddressRegistry + ?Sized,
{
    pub fn new(
        network: &'a Network,
        chain: &'a C,
        registry: &'a mut R,
        descriptors: &'a DescriptorSet,
        config: &'a DeploymentConfig,
    ) -> Self {
        Self {
            network,
            chain,
            registry,
            descriptors,
            config,
        }
    }

    /// Run `step`, or skip it when the registry shows it already took effect.
    pub async fn execute(&mut self, step: &Step) -> DeployResult<StepOutcome> {
        match step {
            Step::Deploy(module) => {
                if let Some(entry) = self.registry.get(self.network, module) {
                    tracing::info!(
                        network = %self.network,
                        module = %module,
                        address = %entry.address,
                        "Module already deployed, skipping"
                    );
                    return Ok(StepOutcome::Skipped(SkipReason::AlreadyDeployed));
                }

                let address = self.deploy_fresh(module).await?;
                Ok(StepOutcome::Deployed { address })
            }
            Step::Upgrade(upgrade) => {
                let current = self.registry.get(self.network, &upgrade.module);
                if let Some(entry) = current.filter(|entry| entry.version >= upgrade.version) {
                    tracing::info!(
                        network = %self.network,
                        module = %upgrade.module,
                        version = entry.version,
                        "Module already upgraded, skipping"
                    );
                    return Ok(StepOutcome::Skipped(SkipReason::AlreadyUpgraded));
                }

                self.upgrade(upgrade).await
            }
            Step::Wire(action) => {
                if action.reapply == Reapply::Once
                    && self.registry.is_wired(self.network, &action.key())
                {
                    tracing::info!(
                        network = %self.network,
                        action = %action.key(),
                        "Wiring already applied, skipping"
                    );
                    return Ok(StepOutcome::Skipped(SkipReason::AlreadyWired));
                }

                let tx_hash = self.wire(action).await?;
                Ok(StepOutcome::Wired { tx_hash })
            }
        }
    }

    fn resolver(&self) -> ArgResolver<'_, R> {
        ArgResolver::new(self.network, self.config, &*self.registry)
    }

    fn registered_address(&self, module: &ModuleName) -> DeployResult<Address> {
        self.registry
            .get(self.network, module)
            .map(|entry| entry.address)
            .ok_or_else(|| DeployError::UnknownModule {
                network: self.network.clone(),
                module: module.clone(),
            })
    }
}
