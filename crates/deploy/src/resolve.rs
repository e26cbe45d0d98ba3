//! Turns argument specs into concrete values.

use crate::{
    AbiValue, ArgSpec, CallSpec, DeploymentConfig, ModuleName, Network,
    error::{DeployError, DeployResult},
    registry::AddressRegistry,
};

/// Resolves [`ArgSpec`]s against a network's config and registry.
///
/// Registry references only ever resolve to what is recorded right now: a
/// module that has not been deployed yet is an error, never a default.
pub struct ArgResolver<'a, R: ?Sized> {
    network: &'a Network,
    config: &'a DeploymentConfig,
    registry: &'a R,
}

impl<'a, R: AddressRegistry + ?Sized> ArgResolver<'a, R> {
    pub fn new(network: &'a Network, config: &'a DeploymentConfig, registry: &'a R) -> Self {
        Self {
            network,
            config,
            registry,
        }
    }

    /// Resolve one argument of a call made by or on `owner`.
    pub fn resolve(&self, owner: &ModuleName, arg: &ArgSpec) -> DeployResult<AbiValue> {
        match arg {
            ArgSpec::Literal(value) => Ok(value.clone()),
            ArgSpec::Config(key) => Ok(self.config.get(*key)),
            ArgSpec::Registry(dependency) => self
                .registry
                .get(self.network, dependency)
                .map(|entry| AbiValue::Address(entry.address))
                .ok_or_else(|| DeployError::UnresolvedDependency {
                    module: owner.clone(),
                    dependency: dependency.clone(),
                }),
        }
    }

    pub fn resolve_call(&self, owner: &ModuleName, call: &CallSpec) -> DeployResult<Vec<AbiValue>> {
        call.args()
            .iter()
            .map(|arg| self.resolve(owner, arg))
            .collect()
    }
}
