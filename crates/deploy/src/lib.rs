//! migrant-deploy - Dependency-ordered deployment of on-chain modules.
//!
//! This crate runs declared step lists (deploys, proxy upgrades and wiring
//! calls) against a chain, recording every module it puts on-chain in a
//! durable address registry so an interrupted run can be resumed.

mod network;
pub use network::{ModuleName, Network};

pub mod error;
pub use error::{DeployError, DeployResult, ErrorKind};

mod config;
pub use config::{
    ConfigKey, ConfigProvider, DeploymentConfig, FileConfigProvider, Founder, StaticConfigProvider,
};

mod descriptor;
pub use descriptor::{
    AbiValue, ArgSpec, ArtifactRef, CallSpec, DescriptorSet, ModuleDescriptor, PROXY_ADMIN_MODULE,
    ProxyArtifacts,
};

pub mod registry;
pub use registry::{
    AddressRegistry, FileRegistry, InMemoryRegistry, ModuleRecord, ProxyKind, RegistryEntry,
    WriteMode,
};

pub mod chain;
pub use chain::{ChainClient, DeployedContract};

mod resolve;
pub use resolve::ArgResolver;

pub mod plan;
pub use plan::{Plan, PlanViolation, Reapply, Step, StepList, UpgradeStep, WiringAction};

mod executor;
pub use executor::{SkipReason, StepOutcome};

mod sequencer;
pub use sequencer::{RunReport, RunState, Sequencer, StepFailure, StepRecord};

pub mod releases;
pub use releases::Release;
