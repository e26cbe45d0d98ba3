//! Error taxonomy for deployment runs.

use crate::{ModuleName, Network};

/// Discriminant of a [`DeployError`], used when reporting a failed step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::AsRefStr)]
pub enum ErrorKind {
    ConfigMissing,
    ConfigInvalid,
    DuplicateModule,
    UnresolvedDependency,
    UnknownModule,
    NotUpgradeable,
    ProxyAddressChanged,
    InvalidDescriptor,
    InvalidPlan,
    ChainCall,
    Registry,
}

/// Everything that can abort a deployment step.
///
/// No variant is recovered from locally: every error aborts the current step
/// and is surfaced unchanged to the sequencer.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error("no deployment configuration for network '{network}'")]
    ConfigMissing { network: Network },

    #[error("deployment configuration for network '{network}' is invalid: {reason}")]
    ConfigInvalid { network: Network, reason: String },

    #[error("module '{module}' is already registered on network '{network}'")]
    DuplicateModule { network: Network, module: ModuleName },

    /// A registry-lookup argument of `module` points at a module that has no
    /// registry entry yet.
    #[error("'{module}' depends on '{dependency}', which is not deployed yet")]
    UnresolvedDependency {
        module: ModuleName,
        dependency: ModuleName,
    },

    #[error("module '{module}' is not deployed on network '{network}'")]
    UnknownModule { network: Network, module: ModuleName },

    #[error("module '{module}' is not deployed behind an upgradeable proxy")]
    NotUpgradeable { module: ModuleName },

    #[error("upgrade of '{module}' would move it from {recorded} to {proposed}")]
    ProxyAddressChanged {
        module: ModuleName,
        recorded: alloy_core::primitives::Address,
        proposed: alloy_core::primitives::Address,
    },

    #[error("invalid descriptor for '{module}': {reason}")]
    InvalidDescriptor { module: ModuleName, reason: String },

    #[error("invalid step list: {reason}")]
    InvalidPlan { reason: String },

    #[error("on-chain action for '{module}' failed: {reason}")]
    ChainCall { module: ModuleName, reason: String },

    #[error("registry error: {reason}")]
    Registry { reason: String },
}

impl DeployError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DeployError::ConfigMissing { .. } => ErrorKind::ConfigMissing,
            DeployError::ConfigInvalid { .. } => ErrorKind::ConfigInvalid,
            DeployError::DuplicateModule { .. } => ErrorKind::DuplicateModule,
            DeployError::UnresolvedDependency { .. } => ErrorKind::UnresolvedDependency,
            DeployError::UnknownModule { .. } => ErrorKind::UnknownModule,
            DeployError::NotUpgradeable { .. } => ErrorKind::NotUpgradeable,
            DeployError::ProxyAddressChanged { .. } => ErrorKind::ProxyAddressChanged,
            DeployError::InvalidDescriptor { .. } => ErrorKind::InvalidDescriptor,
            DeployError::InvalidPlan { .. } => ErrorKind::InvalidPlan,
            DeployError::ChainCall { .. } => ErrorKind::ChainCall,
            DeployError::Registry { .. } => ErrorKind::Registry,
        }
    }

    /// Wrap a chain-client failure, keeping the whole context chain.
    pub fn chain_call(module: &ModuleName, err: anyhow::Error) -> Self {
        DeployError::ChainCall {
            module: module.clone(),
            reason: format!("{err:#}"),
        }
    }

    pub(crate) fn registry(err: impl std::fmt::Display) -> Self {
        DeployError::Registry {
            reason: err.to_string(),
        }
    }
}

pub type DeployResult<T> = Result<T, DeployError>;
