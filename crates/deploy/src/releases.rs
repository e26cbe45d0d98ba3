//! The KGR protocol releases.
//!
//! Every module of the protocol lives behind an upgradeable proxy. The
//! releases below are the step lists shipped so far, in the order they were
//! rolled out; [`Release::All`] replays the whole history and is what a fresh
//! network runs.

use alloy_core::primitives::U256;

use crate::{
    AbiValue, ArgSpec, ConfigKey, DeploymentConfig, DescriptorSet, ModuleDescriptor,
    error::DeployResult,
    plan::{Plan, Step, StepList, WiringAction},
};

pub const BUYBACK_POOL: &str = "BuyBackPool";
pub const STAKE_POOL: &str = "StakePool";
pub const FOUNDER_POOL: &str = "FounderPool";
pub const REBASE_SALE_POOL: &str = "RebaseSalePool";
pub const KGR_TOKEN: &str = "KGRToken";
pub const MONETARY_POLICY: &str = "MonetaryPolicy";
pub const ORCHESTRATOR: &str = "Orchestrator";
pub const AIRDROP_LP_POOL: &str = "AirdropLiquidityProviderPool";
pub const AIRDROP_HOLDER_POOL: &str = "AirdropTokenHolderPool";
pub const OMK_TOKEN: &str = "OMKToken";

/// Supply the orchestrator may sell through the rebase sale pool, in wei.
fn rebase_sale_amount() -> U256 {
    U256::from(100_000u64) * U256::from(10u64).pow(U256::from(18u64))
}

/// Descriptors of every protocol module.
pub fn descriptors() -> DeployResult<DescriptorSet> {
    let pool = |name: &str| ModuleDescriptor::new(name, name).proxied();

    DescriptorSet::new()
        .with(
            ModuleDescriptor::new(BUYBACK_POOL, "BuybackPool")
                .proxied()
                .initializer("initialize()", vec![])?,
        )?
        .with(pool(STAKE_POOL).initializer("initialize()", vec![])?)?
        .with(pool(FOUNDER_POOL).initializer("initialize()", vec![])?)?
        .with(pool(REBASE_SALE_POOL).initializer("initialize()", vec![])?)?
        .with(pool(KGR_TOKEN).initializer(
            "initialize(uint256,address,uint256,address,uint256,uint256)",
            vec![
                ArgSpec::Config(ConfigKey::TotalWeight),
                ArgSpec::module(FOUNDER_POOL),
                ArgSpec::Config(ConfigKey::FounderPoolWeight),
                ArgSpec::module(STAKE_POOL),
                ArgSpec::Config(ConfigKey::StakePoolWeight),
                ArgSpec::Config(ConfigKey::PresalePoolWeight),
            ],
        )?)?
        .with(pool(MONETARY_POLICY).initializer(
            "initialize(address)",
            vec![ArgSpec::module(KGR_TOKEN)],
        )?)?
        .with(pool(ORCHESTRATOR).initializer(
            "initialize(address)",
            vec![ArgSpec::module(MONETARY_POLICY)],
        )?)?
        .with(pool(AIRDROP_LP_POOL).initializer(
            "initialize(address,address)",
            vec![ArgSpec::module(KGR_TOKEN), ArgSpec::Config(ConfigKey::WethToken)],
        )?)?
        .with(pool(AIRDROP_HOLDER_POOL).initializer(
            "initialize(address)",
            vec![ArgSpec::module(KGR_TOKEN)],
        )?)?
        .with(pool(OMK_TOKEN).initializer(
            "initialize(uint256,address,uint256,address,uint256,uint256)",
            vec![
                ArgSpec::uint(100),
                ArgSpec::module(AIRDROP_HOLDER_POOL),
                ArgSpec::uint(50),
                ArgSpec::module(AIRDROP_LP_POOL),
                ArgSpec::uint(30),
                ArgSpec::uint(20),
            ],
        )?)
}

/// A shipped step list.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString, strum::EnumIter,
)]
#[strum(serialize_all = "kebab-case")]
pub enum Release {
    /// Token, pools, policy and orchestrator, wired together.
    Core,
    /// Airdrop pools and the governance token.
    Airdrop,
    /// Second generation of the holder, sale, buyback and orchestrator modules.
    Upgrades,
    All,
}

impl Release {
    fn core(config: &DeploymentConfig) -> DeployResult<StepList> {
        let mut steps: StepList = [
            BUYBACK_POOL,
            STAKE_POOL,
            FOUNDER_POOL,
            REBASE_SALE_POOL,
            KGR_TOKEN,
            MONETARY_POLICY,
            ORCHESTRATOR,
        ]
        .into_iter()
        .map(Step::deploy)
        .collect();

        for pool in [BUYBACK_POOL, FOUNDER_POOL, STAKE_POOL, REBASE_SALE_POOL] {
            steps.push(Step::wire(WiringAction::new(
                pool,
                "setToken(address)",
                vec![ArgSpec::module(KGR_TOKEN)],
            )?));
        }

        steps.push(Step::wire(WiringAction::new(
            MONETARY_POLICY,
            "setOrchestrator(address)",
            vec![ArgSpec::module(ORCHESTRATOR)],
        )?));
        steps.push(Step::wire(WiringAction::new(
            MONETARY_POLICY,
            "setTokenPriceOracle(address)",
            vec![ArgSpec::Config(ConfigKey::TokenPriceOracle)],
        )?));
        steps.push(Step::wire(WiringAction::new(
            KGR_TOKEN,
            "setMonetaryPolicy(address)",
            vec![ArgSpec::module(MONETARY_POLICY)],
        )?));
        steps.push(Step::wire(WiringAction::new(
            ORCHESTRATOR,
            "setRebaseSalePool(address,uint256)",
            vec![
                ArgSpec::module(REBASE_SALE_POOL),
                ArgSpec::Literal(AbiValue::Uint(rebase_sale_amount())),
            ],
        )?));

        for founder in &config.founders {
            steps.push(Step::wire(WiringAction::new(
                FOUNDER_POOL,
                "addFounder(address,uint256)",
                vec![ArgSpec::address(founder.address), ArgSpec::uint(founder.weight)],
            )?));
        }

        Ok(steps)
    }

    fn airdrop() -> DeployResult<StepList> {
        Ok(StepList::new()
            .then(Step::deploy(AIRDROP_LP_POOL))
            .then(Step::deploy(AIRDROP_HOLDER_POOL))
            .then(Step::deploy(OMK_TOKEN))
            .then(Step::wire(WiringAction::new(
                AIRDROP_HOLDER_POOL,
                "setGovToken(address)",
                vec![ArgSpec::module(OMK_TOKEN)],
            )?))
            .then(Step::wire(WiringAction::new(
                AIRDROP_LP_POOL,
                "setGovToken(address)",
                vec![ArgSpec::module(OMK_TOKEN)],
            )?))
            .then(Step::wire(
                WiringAction::new(
                    AIRDROP_HOLDER_POOL,
                    "setAirdropPaused(bool)",
                    vec![ArgSpec::bool(false)],
                )?
                .idempotent(),
            ))
            .then(Step::wire(
                WiringAction::new(AIRDROP_LP_POOL, "setAirdropPaused(bool)", vec![ArgSpec::bool(false)])?
                    .idempotent(),
            ))
            .then(Step::wire(WiringAction::new(
                AIRDROP_HOLDER_POOL,
                "updateLatestSupply()",
                vec![],
            )?)))
    }

    fn upgrades() -> StepList {
        StepList::new()
            .then(Step::upgrade(AIRDROP_HOLDER_POOL, 2))
            .then(Step::upgrade(REBASE_SALE_POOL, 2))
            .then(Step::upgrade(BUYBACK_POOL, 2))
            .then(Step::upgrade(ORCHESTRATOR, 2))
    }
}

impl Plan for Release {
    fn steps(&self, config: &DeploymentConfig) -> DeployResult<StepList> {
        match self {
            Release::Core => Release::core(config),
            Release::Airdrop => Release::airdrop(),
            Release::Upgrades => Ok(Release::upgrades()),
            Release::All => {
                let mut steps = Release::core(config)?;
                steps.append(Release::airdrop()?);
                steps.append(Release::upgrades());
                Ok(steps)
            }
        }
    }
}
