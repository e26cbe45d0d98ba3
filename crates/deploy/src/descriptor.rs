//! Module descriptors: what a module is, how it is initialized and whether it
//! lives behind an upgradeable proxy.
//!
//! Initializer and method signatures are parsed once, when the descriptor is
//! built, and every argument is checked against the declared parameter type.
//! A descriptor that does not match its signature never reaches the chain.

use std::{collections::BTreeMap, fmt};

use alloy_core::{
    dyn_abi::{DynSolValue, JsonAbiExt},
    json_abi::Function,
    primitives::{Address, Bytes, U256},
};
use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::{
    ModuleName,
    config::ConfigKey,
    error::{DeployError, DeployResult},
};

/// Registry name of the per-network proxy admin.
pub const PROXY_ADMIN_MODULE: &str = "ProxyAdmin";

/// Default artifact of the proxy admin contract.
pub const PROXY_ADMIN_ARTIFACT: &str = "ProxyAdmin";

/// Default artifact of the upgradeable proxy contract.
pub const PROXY_ARTIFACT: &str = "TransparentUpgradeableProxy";

/// Name of a compiled contract artifact.
///
/// May differ from the registry name of the module built from it.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    derive_more::Deref,
    derive_more::From,
)]
#[serde(transparent)]
pub struct ArtifactRef(String);

impl ArtifactRef {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ArtifactRef {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A concrete argument value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbiValue {
    Address(Address),
    Uint(U256),
    Bool(bool),
}

impl AbiValue {
    pub fn uint(value: u64) -> Self {
        AbiValue::Uint(U256::from(value))
    }

    fn sol_type(&self) -> &'static str {
        match self {
            AbiValue::Address(_) => "address",
            AbiValue::Uint(_) => "uint256",
            AbiValue::Bool(_) => "bool",
        }
    }

    /// Convert to a dynamic Solidity value of the declared parameter type.
    ///
    /// Fails when an unsigned value does not fit the declared width.
    pub fn to_sol(&self, ty: &str) -> anyhow::Result<DynSolValue> {
        Ok(match self {
            AbiValue::Address(address) => DynSolValue::Address(*address),
            AbiValue::Uint(value) => {
                let bits = uint_bits(ty);
                if value.bit_len() > bits {
                    anyhow::bail!("{value} does not fit in {ty}");
                }
                DynSolValue::Uint(*value, bits)
            }
            AbiValue::Bool(value) => DynSolValue::Bool(*value),
        })
    }
}

impl fmt::Display for AbiValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbiValue::Address(address) => write!(f, "{address}"),
            AbiValue::Uint(value) => write!(f, "{value}"),
            AbiValue::Bool(value) => write!(f, "{value}"),
        }
    }
}

/// How an argument is obtained when a step runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgSpec {
    /// Used as-is.
    Literal(AbiValue),
    /// Read from the network's deployment config.
    Config(ConfigKey),
    /// Address of a module deployed by an earlier step.
    Registry(ModuleName),
}

impl ArgSpec {
    pub fn module(name: impl Into<ModuleName>) -> Self {
        ArgSpec::Registry(name.into())
    }

    pub fn uint(value: u64) -> Self {
        ArgSpec::Literal(AbiValue::uint(value))
    }

    pub fn address(address: Address) -> Self {
        ArgSpec::Literal(AbiValue::Address(address))
    }

    pub fn bool(value: bool) -> Self {
        ArgSpec::Literal(AbiValue::Bool(value))
    }

    fn sol_type(&self) -> &'static str {
        match self {
            ArgSpec::Literal(value) => value.sol_type(),
            ArgSpec::Config(key) => key.sol_type(),
            ArgSpec::Registry(_) => "address",
        }
    }

    /// The module this argument depends on, if any.
    pub fn dependency(&self) -> Option<&ModuleName> {
        match self {
            ArgSpec::Registry(module) => Some(module),
            _ => None,
        }
    }
}

impl fmt::Display for ArgSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgSpec::Literal(value) => write!(f, "{value}"),
            ArgSpec::Config(key) => write!(f, "config.{key}"),
            ArgSpec::Registry(module) => write!(f, "@{module}"),
        }
    }
}

/// A parsed method signature together with its argument specs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSpec {
    function: Function,
    args: Vec<ArgSpec>,
}

impl CallSpec {
    /// Parse `signature` (e.g. `initialize(address,uint256)`) and check `args`
    /// against it. `owner` names the module in errors.
    pub fn parse(owner: &ModuleName, signature: &str, args: Vec<ArgSpec>) -> DeployResult<Self> {
        let invalid = |reason: String| DeployError::InvalidDescriptor {
            module: owner.clone(),
            reason,
        };

        let function = Function::parse(signature)
            .map_err(|e| invalid(format!("cannot parse signature '{signature}': {e}")))?;

        if function.inputs.len() != args.len() {
            return Err(invalid(format!(
                "'{}' takes {} arguments, {} given",
                function.signature(),
                function.inputs.len(),
                args.len()
            )));
        }

        for (position, (param, arg)) in function.inputs.iter().zip(&args).enumerate() {
            if !type_fits(arg.sol_type(), &param.ty) {
                return Err(invalid(format!(
                    "argument {position} of '{}' is {}, got {arg} ({})",
                    function.signature(),
                    param.ty,
                    arg.sol_type()
                )));
            }
            if let ArgSpec::Literal(value) = arg
                && let Err(e) = value.to_sol(&param.ty)
            {
                return Err(invalid(format!(
                    "argument {position} of '{}': {e}",
                    function.signature()
                )));
            }
        }

        Ok(Self { function, args })
    }

    pub fn signature(&self) -> String {
        self.function.signature()
    }

    pub fn name(&self) -> &str {
        &self.function.name
    }

    pub fn args(&self) -> &[ArgSpec] {
        &self.args
    }

    pub fn dependencies(&self) -> impl Iterator<Item = &ModuleName> {
        self.args.iter().filter_map(ArgSpec::dependency)
    }

    /// ABI-encode the call (selector included) with resolved values.
    pub fn encode(&self, values: &[AbiValue]) -> anyhow::Result<Bytes> {
        let sol_values = self
            .function
            .inputs
            .iter()
            .zip(values)
            .map(|(param, value)| value.to_sol(&param.ty))
            .collect::<anyhow::Result<Vec<_>>>()
            .with_context(|| format!("Failed to encode '{}'", self.signature()))?;

        let calldata = self
            .function
            .abi_encode_input(&sol_values)
            .map_err(|e| anyhow::anyhow!("Failed to encode '{}': {e}", self.signature()))?;

        Ok(Bytes::from(calldata))
    }
}

impl fmt::Display for CallSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let args: Vec<String> = self.args.iter().map(ToString::to_string).collect();
        write!(f, "{}({})", self.function.name, args.join(","))
    }
}

/// Width of `uint<N>`; a bare `uint` is 256 bits.
fn uint_bits(ty: &str) -> usize {
    ty.strip_prefix("uint")
        .and_then(|bits| bits.parse().ok())
        .unwrap_or(256)
}

fn type_fits(given: &str, declared: &str) -> bool {
    match given {
        "uint256" => declared.starts_with("uint"),
        other => other == declared,
    }
}

/// Static description of a deployable module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleDescriptor {
    pub name: ModuleName,
    pub artifact: ArtifactRef,
    /// Run once, on fresh deploy.
    pub initializer: Option<CallSpec>,
    /// Run on every upgrade, if declared.
    pub reinitializer: Option<CallSpec>,
    pub proxied: bool,
}

impl ModuleDescriptor {
    /// A plain (unproxied) module without initializer.
    pub fn new(name: impl Into<ModuleName>, artifact: impl Into<ArtifactRef>) -> Self {
        Self {
            name: name.into(),
            artifact: artifact.into(),
            initializer: None,
            reinitializer: None,
            proxied: false,
        }
    }

    /// Deploy behind an upgradeable proxy.
    pub fn proxied(mut self) -> Self {
        self.proxied = true;
        self
    }

    pub fn initializer(mut self, signature: &str, args: Vec<ArgSpec>) -> DeployResult<Self> {
        self.initializer = Some(CallSpec::parse(&self.name, signature, args)?);
        Ok(self)
    }

    pub fn reinitializer(mut self, signature: &str, args: Vec<ArgSpec>) -> DeployResult<Self> {
        self.reinitializer = Some(CallSpec::parse(&self.name, signature, args)?);
        Ok(self)
    }

    /// Modules whose addresses the fresh deploy needs.
    pub fn dependencies(&self) -> impl Iterator<Item = &ModuleName> {
        self.initializer.iter().flat_map(CallSpec::dependencies)
    }

    /// Modules whose addresses an upgrade needs.
    pub fn upgrade_dependencies(&self) -> impl Iterator<Item = &ModuleName> {
        self.reinitializer.iter().flat_map(CallSpec::dependencies)
    }
}

/// Artifacts of the proxy pattern used for proxied modules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyArtifacts {
    pub admin: ArtifactRef,
    pub proxy: ArtifactRef,
}

impl Default for ProxyArtifacts {
    fn default() -> Self {
        Self {
            admin: ArtifactRef::from(PROXY_ADMIN_ARTIFACT),
            proxy: ArtifactRef::from(PROXY_ARTIFACT),
        }
    }
}

/// The table of every module a step list may deploy.
#[derive(Debug, Clone, Default)]
pub struct DescriptorSet {
    modules: BTreeMap<ModuleName, ModuleDescriptor>,
    proxy: ProxyArtifacts,
}

impl DescriptorSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_proxy_artifacts(mut self, proxy: ProxyArtifacts) -> Self {
        self.proxy = proxy;
        self
    }

    pub fn insert(&mut self, descriptor: ModuleDescriptor) -> DeployResult<()> {
        if descriptor.name.as_str() == PROXY_ADMIN_MODULE {
            return Err(DeployError::InvalidDescriptor {
                module: descriptor.name,
                reason: format!("'{PROXY_ADMIN_MODULE}' is reserved for the proxy admin"),
            });
        }
        if self.modules.contains_key(&descriptor.name) {
            return Err(DeployError::InvalidDescriptor {
                module: descriptor.name,
                reason: "declared twice".to_string(),
            });
        }
        self.modules.insert(descriptor.name.clone(), descriptor);
        Ok(())
    }

    /// Insert, builder style.
    pub fn with(mut self, descriptor: ModuleDescriptor) -> DeployResult<Self> {
        self.insert(descriptor)?;
        Ok(self)
    }

    pub fn get(&self, name: &ModuleName) -> Option<&ModuleDescriptor> {
        self.modules.get(name)
    }

    pub fn proxy_artifacts(&self) -> &ProxyArtifacts {
        &self.proxy
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModuleDescriptor> {
        self.modules.values()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}
