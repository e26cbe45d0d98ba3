use alloy_core::{
    dyn_abi::{DynSolValue, JsonAbiExt},
    json_abi::Function,
    primitives::{Address, Bytes},
};

use crate::{
    CallSpec, ModuleName,
    chain::ChainClient,
    descriptor::PROXY_ADMIN_MODULE,
    error::{DeployError, DeployResult},
    plan::UpgradeStep,
    registry::{AddressRegistry, ModuleRecord, ProxyKind, WriteMode},
};

use super::{Executor, StepOutcome};

const UPGRADE_SIGNATURE: &str = "upgrade(address,address)";
const UPGRADE_AND_CALL_SIGNATURE: &str = "upgradeAndCall(address,address,bytes)";

impl<C, R> Executor<'_, C, R>
where
    C: ChainClient,
    R: AddressRegistry + ?Sized,
{
    /// First deployment of `module`. Returns the address it is reachable at.
    pub(super) async fn deploy_fresh(&mut self, module: &ModuleName) -> DeployResult<Address> {
        let descriptors = self.descriptors;
        let descriptor = descriptors.get(module).ok_or_else(|| DeployError::InvalidPlan {
            reason: format!("no descriptor for module '{module}'"),
        })?;

        if self.registry.contains(self.network, module) {
            return Err(DeployError::DuplicateModule {
                network: self.network.clone(),
                module: module.clone(),
            });
        }

        // Resolve before touching the chain so a missing dependency costs nothing.
        let init = descriptor
            .initializer
            .as_ref()
            .map(|call| self.encode_call(module, call))
            .transpose()?;

        tracing::info!(
            network = %self.network,
            module = %module,
            artifact = %descriptor.artifact,
            proxied = descriptor.proxied,
            "Deploying module"
        );

        let record = if descriptor.proxied {
            let admin = self.ensure_proxy_admin().await?;

            let implementation = self
                .chain
                .deploy_contract(&descriptor.artifact, Bytes::new())
                .await
                .map_err(|e| DeployError::chain_call(module, e))?;

            tracing::debug!(
                module = %module,
                implementation = %implementation.address,
                "Implementation deployed"
            );

            // The proxy runs the initializer in its constructor, so storage is
            // never observable uninitialized.
            let constructor_args = DynSolValue::Tuple(vec![
                DynSolValue::Address(implementation.address),
                DynSolValue::Address(admin),
                DynSolValue::Bytes(init.map(|data| data.to_vec()).unwrap_or_default()),
            ])
            .abi_encode_params();

            let proxy = self
                .chain
                .deploy_contract(&descriptors.proxy_artifacts().proxy, constructor_args.into())
                .await
                .map_err(|e| DeployError::chain_call(module, e))?;

            ModuleRecord {
                address: proxy.address,
                proxy_kind: ProxyKind::Upgradeable,
                implementation: Some(implementation.address),
                code_hash: implementation.code_hash,
            }
        } else {
            let deployed = self
                .chain
                .deploy_contract(&descriptor.artifact, Bytes::new())
                .await
                .map_err(|e| DeployError::chain_call(module, e))?;

            if let Some(calldata) = init {
                self.chain
                    .call(deployed.address, calldata)
                    .await
                    .map_err(|e| DeployError::chain_call(module, e))?;
            }

            ModuleRecord {
                address: deployed.address,
                proxy_kind: ProxyKind::None,
                implementation: None,
                code_hash: deployed.code_hash,
            }
        };

        let entry = self
            .registry
            .put(self.network, module, record, WriteMode::FreshDeploy)?;

        tracing::info!(
            network = %self.network,
            module = %module,
            address = %entry.address,
            proxy_kind = %entry.proxy_kind,
            "Module deployed"
        );

        Ok(entry.address)
    }

    /// Swap the implementation behind an existing proxy.
    pub(super) async fn upgrade(&mut self, step: &UpgradeStep) -> DeployResult<StepOutcome> {
        let module = &step.module;

        let current = self
            .registry
            .get(self.network, module)
            .cloned()
            .ok_or_else(|| DeployError::UnknownModule {
                network: self.network.clone(),
                module: module.clone(),
            })?;

        if current.proxy_kind != ProxyKind::Upgradeable {
            return Err(DeployError::NotUpgradeable {
                module: module.clone(),
            });
        }
        if current.version + 1 != step.version {
            return Err(DeployError::InvalidPlan {
                reason: format!(
                    "upgrade of '{module}' targets v{} but the module is at v{}",
                    step.version, current.version
                ),
            });
        }

        let descriptors = self.descriptors;
        let descriptor = descriptors.get(module).ok_or_else(|| DeployError::InvalidPlan {
            reason: format!("no descriptor for module '{module}'"),
        })?;

        let admin = self.registered_address(&ModuleName::from(PROXY_ADMIN_MODULE))?;

        let reinit = descriptor
            .reinitializer
            .as_ref()
            .map(|call| self.encode_call(module, call))
            .transpose()?;

        let artifact = step.artifact.as_ref().unwrap_or(&descriptor.artifact);

        tracing::info!(
            network = %self.network,
            module = %module,
            artifact = %artifact,
            from_version = current.version,
            "Upgrading module"
        );

        let implementation = self
            .chain
            .deploy_contract(artifact, Bytes::new())
            .await
            .map_err(|e| DeployError::chain_call(module, e))?;

        let calldata = match reinit {
            Some(data) => admin_calldata(
                UPGRADE_AND_CALL_SIGNATURE,
                &[
                    DynSolValue::Address(current.address),
                    DynSolValue::Address(implementation.address),
                    DynSolValue::Bytes(data.to_vec()),
                ],
            ),
            None => admin_calldata(
                UPGRADE_SIGNATURE,
                &[
                    DynSolValue::Address(current.address),
                    DynSolValue::Address(implementation.address),
                ],
            ),
        }
        .map_err(|e| DeployError::chain_call(module, e))?;

        self.chain
            .call(admin, calldata)
            .await
            .map_err(|e| DeployError::chain_call(module, e))?;

        let entry = self.registry.put(
            self.network,
            module,
            ModuleRecord {
                address: current.address,
                proxy_kind: ProxyKind::Upgradeable,
                implementation: Some(implementation.address),
                code_hash: implementation.code_hash,
            },
            WriteMode::Upgrade,
        )?;

        tracing::info!(
            network = %self.network,
            module = %module,
            address = %entry.address,
            implementation = %implementation.address,
            version = entry.version,
            "Module upgraded"
        );

        Ok(StepOutcome::Upgraded {
            address: entry.address,
            implementation: implementation.address,
            version: entry.version,
        })
    }

    /// Address of the network's proxy admin, deploying it on first use.
    async fn ensure_proxy_admin(&mut self) -> DeployResult<Address> {
        let name = ModuleName::from(PROXY_ADMIN_MODULE);
        if let Some(entry) = self.registry.get(self.network, &name) {
            return Ok(entry.address);
        }

        tracing::info!(network = %self.network, "Deploying proxy admin");

        let deployed = self
            .chain
            .deploy_contract(&self.descriptors.proxy_artifacts().admin, Bytes::new())
            .await
            .map_err(|e| DeployError::chain_call(&name, e))?;

        let entry = self.registry.put(
            self.network,
            &name,
            ModuleRecord {
                address: deployed.address,
                proxy_kind: ProxyKind::None,
                implementation: None,
                code_hash: deployed.code_hash,
            },
            WriteMode::FreshDeploy,
        )?;

        Ok(entry.address)
    }

    /// Resolve and encode a call declared by or on `module`.
    pub(super) fn encode_call(&self, module: &ModuleName, call: &CallSpec) -> DeployResult<Bytes> {
        let values = self.resolver().resolve_call(module, call)?;
        call.encode(&values)
            .map_err(|e| DeployError::InvalidDescriptor {
                module: module.clone(),
                reason: format!("{e:#}"),
            })
    }
}

fn admin_calldata(signature: &str, values: &[DynSolValue]) -> anyhow::Result<Bytes> {
    let function = Function::parse(signature)
        .map_err(|e| anyhow::anyhow!("Failed to parse '{signature}': {e}"))?;
    let calldata = function
        .abi_encode_input(values)
        .map_err(|e| anyhow::anyhow!("Failed to encode '{signature}': {e}"))?;
    Ok(Bytes::from(calldata))
}
