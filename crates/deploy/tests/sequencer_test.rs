//! Integration tests for migrant-deploy runs.
//!
//! Every test drives a [`Sequencer`] against an in-process mock chain, so no
//! node is needed. Run with: cargo test --test sequencer_test

mod common;

use alloy_core::primitives::Address;
use common::{MockChain, config, token_and_pool};
use migrant_deploy::{
    AddressRegistry, ArgSpec, DeployError, DescriptorSet, ErrorKind, FileRegistry,
    InMemoryRegistry, ModuleDescriptor, ModuleName, ModuleRecord, Network, PROXY_ADMIN_MODULE,
    ProxyKind, Release, RunState, Sequencer, SkipReason, StaticConfigProvider, Step, StepList,
    StepOutcome, WiringAction, WriteMode, releases,
};
use tempdir::TempDir;

fn dev() -> Network {
    Network::from("development")
}

fn provider() -> StaticConfigProvider {
    StaticConfigProvider::new().with("development", config())
}

fn token_then_pool() -> StepList {
    StepList::new()
        .then(Step::deploy("TokenA"))
        .then(Step::deploy("PoolB"))
}

fn address_of(registry: &impl AddressRegistry, module: &str) -> Address {
    registry
        .get(&dev(), &ModuleName::from(module))
        .unwrap_or_else(|| panic!("{module} should be registered"))
        .address
}

#[tokio::test]
async fn test_fresh_run_feeds_new_addresses_forward() {
    common::init_tracing();
    let chain = MockChain::new();
    let mut registry = InMemoryRegistry::new();
    let descriptors = token_and_pool();

    let mut sequencer = Sequencer::new("development", &chain, &mut registry, &descriptors);
    let report = sequencer
        .run(&provider(), &token_then_pool())
        .await
        .expect("run should start");

    assert!(report.is_completed());
    assert_eq!(sequencer.state(), RunState::Completed);
    assert_eq!(report.records.len(), 2);

    let token = address_of(&registry, "TokenA");
    let pool = address_of(&registry, "PoolB");
    assert_ne!(token, pool);

    // The proxy of PoolB carries the initializer call, which must embed the
    // address TokenA was just given.
    let proxies = chain.deploys_of("TransparentUpgradeableProxy");
    assert_eq!(proxies.len(), 2);
    let (pool_proxy, constructor_args) = &proxies[1];
    assert_eq!(*pool_proxy, pool);
    assert!(
        constructor_args
            .windows(20)
            .any(|window| window == token.as_slice())
    );

    // One admin for the whole network.
    assert_eq!(chain.deploys_of("ProxyAdmin").len(), 1);
    assert!(registry.contains(&dev(), &ModuleName::from(PROXY_ADMIN_MODULE)));
}

#[tokio::test]
async fn test_rerun_skips_registered_modules() {
    common::init_tracing();
    let chain = MockChain::new();
    let mut registry = InMemoryRegistry::new();
    let descriptors = token_and_pool();

    Sequencer::new("development", &chain, &mut registry, &descriptors)
        .run(&provider(), &StepList::new().then(Step::deploy("TokenA")))
        .await
        .unwrap();
    let token_before = registry
        .get(&dev(), &ModuleName::from("TokenA"))
        .cloned()
        .unwrap();

    let report = Sequencer::new("development", &chain, &mut registry, &descriptors)
        .run(&provider(), &token_then_pool())
        .await
        .unwrap();

    assert!(report.is_completed());
    assert_eq!(
        report.records[0].outcome,
        StepOutcome::Skipped(SkipReason::AlreadyDeployed)
    );
    assert!(matches!(report.records[1].outcome, StepOutcome::Deployed { .. }));
    assert_eq!(
        registry.get(&dev(), &ModuleName::from("TokenA")),
        Some(&token_before)
    );

    // Recording TokenA as freshly deployed again is refused.
    let err = registry
        .put(
            &dev(),
            &ModuleName::from("TokenA"),
            ModuleRecord {
                address: Address::repeat_byte(0x77),
                proxy_kind: ProxyKind::Upgradeable,
                implementation: None,
                code_hash: None,
            },
            WriteMode::FreshDeploy,
        )
        .unwrap_err();
    assert!(matches!(err, DeployError::DuplicateModule { .. }));
}

#[tokio::test]
async fn test_forward_reference_fails_before_submitting() {
    common::init_tracing();
    let chain = MockChain::new();
    let mut registry = InMemoryRegistry::new();
    let descriptors = token_and_pool();

    let steps = StepList::new()
        .then(Step::deploy("PoolB"))
        .then(Step::deploy("TokenA"));

    let mut sequencer = Sequencer::new("development", &chain, &mut registry, &descriptors);
    let report = sequencer.run(&provider(), &steps).await.unwrap();

    let failure = report.failure.expect("run should fail");
    assert_eq!(failure.index, 0);
    assert_eq!(failure.module.as_str(), "PoolB");
    match failure.error {
        DeployError::UnresolvedDependency { dependency, .. } => {
            assert_eq!(dependency.as_str(), "TokenA")
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(
        sequencer.state(),
        RunState::Failed {
            step: 0,
            kind: ErrorKind::UnresolvedDependency
        }
    );
    assert!(chain.actions().is_empty());
}

#[tokio::test]
async fn test_upgrade_of_undeployed_module() {
    common::init_tracing();
    let chain = MockChain::new();
    let mut registry = InMemoryRegistry::new();
    let descriptors = token_and_pool();

    let report = Sequencer::new("development", &chain, &mut registry, &descriptors)
        .run(&provider(), &StepList::new().then(Step::upgrade("TokenA", 2)))
        .await
        .unwrap();

    let failure = report.failure.expect("run should fail");
    assert_eq!(failure.error.kind(), ErrorKind::UnknownModule);
    assert!(chain.actions().is_empty());
}

#[tokio::test]
async fn test_failed_deploy_leaves_no_entry_and_resumes() {
    common::init_tracing();
    let chain = MockChain::new();
    let mut registry = InMemoryRegistry::new();
    let descriptors = token_and_pool();
    chain.fail_deploys_of("PoolB");

    let mut sequencer = Sequencer::new("development", &chain, &mut registry, &descriptors);
    let report = sequencer.run(&provider(), &token_then_pool()).await.unwrap();

    let failure = report.failure.expect("run should fail");
    assert_eq!(failure.index, 1);
    assert_eq!(failure.error.kind(), ErrorKind::ChainCall);
    assert!(registry.contains(&dev(), &ModuleName::from("TokenA")));
    assert!(!registry.contains(&dev(), &ModuleName::from("PoolB")));

    chain.heal();
    let report = Sequencer::new("development", &chain, &mut registry, &descriptors)
        .run(&provider(), &token_then_pool())
        .await
        .unwrap();

    assert!(report.is_completed());
    assert_eq!(
        report.records[0].outcome,
        StepOutcome::Skipped(SkipReason::AlreadyDeployed)
    );
    assert!(registry.contains(&dev(), &ModuleName::from("PoolB")));
    assert_eq!(chain.deploys_of("TokenA").len(), 1);
}

#[tokio::test]
async fn test_failed_initializer_call_leaves_no_entry() {
    common::init_tracing();
    let chain = MockChain::new();
    let mut registry = InMemoryRegistry::new();
    let descriptors = DescriptorSet::new()
        .with(ModuleDescriptor::new("TokenA", "TokenA"))
        .unwrap()
        .with(
            ModuleDescriptor::new("Plain", "Plain")
                .initializer("initialize(address)", vec![ArgSpec::module("TokenA")])
                .unwrap(),
        )
        .unwrap();
    chain.fail_calls_of("initialize(address)");

    let steps = StepList::new()
        .then(Step::deploy("TokenA"))
        .then(Step::deploy("Plain"));
    let report = Sequencer::new("development", &chain, &mut registry, &descriptors)
        .run(&provider(), &steps)
        .await
        .unwrap();

    assert_eq!(report.failure.map(|f| f.index), Some(1));
    assert!(!registry.contains(&dev(), &ModuleName::from("Plain")));

    let token = registry.get(&dev(), &ModuleName::from("TokenA")).unwrap();
    assert_eq!(token.proxy_kind, ProxyKind::None);
    assert!(chain.deploys_of("ProxyAdmin").is_empty());
}

#[tokio::test]
async fn test_upgrade_preserves_address() {
    common::init_tracing();
    let chain = MockChain::new();
    let mut registry = InMemoryRegistry::new();
    let descriptors = token_and_pool();

    let steps = StepList::new()
        .then(Step::deploy("TokenA"))
        .then(Step::upgrade_to("TokenA", 2, "TokenAV2"));

    let report = Sequencer::new("development", &chain, &mut registry, &descriptors)
        .run(&provider(), &StepList::new().then(Step::deploy("TokenA")))
        .await
        .unwrap();
    assert!(report.is_completed());
    let before = registry
        .get(&dev(), &ModuleName::from("TokenA"))
        .cloned()
        .unwrap();

    let report = Sequencer::new("development", &chain, &mut registry, &descriptors)
        .run(&provider(), &steps)
        .await
        .unwrap();
    assert!(report.is_completed());

    let after = registry
        .get(&dev(), &ModuleName::from("TokenA"))
        .cloned()
        .unwrap();
    assert_eq!(after.address, before.address);
    assert_eq!(after.version, 2);
    assert_ne!(after.implementation, before.implementation);

    let new_implementation = chain.deploys_of("TokenAV2");
    assert_eq!(new_implementation.len(), 1);
    assert_eq!(after.implementation, Some(new_implementation[0].0));

    let upgrades = chain.calls_of("upgrade(address,address)");
    assert_eq!(upgrades.len(), 1);
    assert_eq!(upgrades[0].0, address_of(&registry, PROXY_ADMIN_MODULE));

    // Reaching the target version makes the step a no-op.
    let report = Sequencer::new("development", &chain, &mut registry, &descriptors)
        .run(&provider(), &steps)
        .await
        .unwrap();
    assert_eq!(
        report.records[1].outcome,
        StepOutcome::Skipped(SkipReason::AlreadyUpgraded)
    );
    assert_eq!(chain.calls_of("upgrade(address,address)").len(), 1);
}

#[tokio::test]
async fn test_upgrade_past_next_version_is_refused_on_every_run() {
    common::init_tracing();
    let chain = MockChain::new();
    let mut registry = InMemoryRegistry::new();
    let descriptors = token_and_pool();

    let skipping = StepList::new()
        .then(Step::deploy("TokenA"))
        .then(Step::upgrade("TokenA", 3));

    for _ in 0..3 {
        let mut sequencer = Sequencer::new("development", &chain, &mut registry, &descriptors);
        let report = sequencer.run(&provider(), &skipping).await.unwrap();

        let failure = report.failure.expect("a two-version jump must be refused");
        assert_eq!(failure.index, 1);
        assert_eq!(failure.error.kind(), ErrorKind::InvalidPlan);
        assert_eq!(
            sequencer.state(),
            RunState::Failed {
                step: 1,
                kind: ErrorKind::InvalidPlan
            }
        );
    }
    assert!(chain.actions().is_empty());
    assert!(registry.entries(&dev()).is_empty());

    // Stepping through every version completes, and a second run is a no-op.
    let chained = StepList::new()
        .then(Step::deploy("TokenA"))
        .then(Step::upgrade("TokenA", 2))
        .then(Step::upgrade("TokenA", 3));

    let report = Sequencer::new("development", &chain, &mut registry, &descriptors)
        .run(&provider(), &chained)
        .await
        .unwrap();
    assert!(report.is_completed());
    assert_eq!(
        registry.get(&dev(), &ModuleName::from("TokenA")).unwrap().version,
        3
    );
    assert_eq!(chain.calls_of("upgrade(address,address)").len(), 2);
    let entry = registry.get(&dev(), &ModuleName::from("TokenA")).cloned();

    let report = Sequencer::new("development", &chain, &mut registry, &descriptors)
        .run(&provider(), &chained)
        .await
        .unwrap();
    assert!(report.is_completed());
    assert_eq!(report.applied().count(), 0);
    assert_eq!(chain.calls_of("upgrade(address,address)").len(), 2);
    assert_eq!(registry.get(&dev(), &ModuleName::from("TokenA")).cloned(), entry);
}

#[tokio::test]
async fn test_upgrade_runs_reinitializer_through_admin() {
    common::init_tracing();
    let chain = MockChain::new();
    let mut registry = InMemoryRegistry::new();
    let descriptors = DescriptorSet::new()
        .with(ModuleDescriptor::new("TokenA", "TokenA").proxied())
        .unwrap()
        .with(
            ModuleDescriptor::new("PoolB", "PoolB")
                .proxied()
                .reinitializer("initializeV2(address)", vec![ArgSpec::module("TokenA")])
                .unwrap(),
        )
        .unwrap();

    let steps = token_then_pool().then(Step::upgrade("PoolB", 2));
    let report = Sequencer::new("development", &chain, &mut registry, &descriptors)
        .run(&provider(), &steps)
        .await
        .unwrap();

    assert!(report.is_completed());
    assert!(chain.calls_of("upgrade(address,address)").is_empty());

    let calls = chain.calls_of("upgradeAndCall(address,address,bytes)");
    assert_eq!(calls.len(), 1);
    let token = address_of(&registry, "TokenA");
    assert!(calls[0].1.windows(20).any(|window| window == token.as_slice()));
}

#[tokio::test]
async fn test_upgrade_of_plain_module_is_refused() {
    common::init_tracing();
    let chain = MockChain::new();
    let mut registry = InMemoryRegistry::new();
    registry
        .put(
            &dev(),
            &ModuleName::from("TokenA"),
            ModuleRecord {
                address: Address::repeat_byte(0x11),
                proxy_kind: ProxyKind::None,
                implementation: None,
                code_hash: None,
            },
            WriteMode::FreshDeploy,
        )
        .unwrap();
    let descriptors = token_and_pool();

    let report = Sequencer::new("development", &chain, &mut registry, &descriptors)
        .run(&provider(), &StepList::new().then(Step::upgrade("TokenA", 2)))
        .await
        .unwrap();

    assert_eq!(
        report.failure.map(|f| f.error.kind()),
        Some(ErrorKind::NotUpgradeable)
    );
    assert!(chain.actions().is_empty());
}

#[tokio::test]
async fn test_once_wiring_is_journaled() {
    common::init_tracing();
    let chain = MockChain::new();
    let mut registry = InMemoryRegistry::new();
    let descriptors = token_and_pool();

    let steps = token_then_pool()
        .then(Step::wire(
            WiringAction::new("TokenA", "addPool(address)", vec![ArgSpec::module("PoolB")])
                .unwrap(),
        ))
        .then(Step::wire(
            WiringAction::new("PoolB", "setPaused(bool)", vec![ArgSpec::bool(false)])
                .unwrap()
                .idempotent(),
        ));

    for _ in 0..2 {
        let report = Sequencer::new("development", &chain, &mut registry, &descriptors)
            .run(&provider(), &steps)
            .await
            .unwrap();
        assert!(report.is_completed());
    }

    let once = chain.calls_of("addPool(address)");
    assert_eq!(once.len(), 1);
    assert_eq!(once[0].0, address_of(&registry, "TokenA"));
    assert_eq!(chain.calls_of("setPaused(bool)").len(), 2);
}

#[tokio::test]
async fn test_failed_wiring_is_not_journaled() {
    common::init_tracing();
    let chain = MockChain::new();
    let mut registry = InMemoryRegistry::new();
    let descriptors = token_and_pool();
    chain.fail_calls_of("addPool(address)");

    let action =
        WiringAction::new("TokenA", "addPool(address)", vec![ArgSpec::module("PoolB")]).unwrap();
    let steps = token_then_pool().then(Step::wire(action.clone()));

    let report = Sequencer::new("development", &chain, &mut registry, &descriptors)
        .run(&provider(), &steps)
        .await
        .unwrap();
    assert_eq!(report.failure.map(|f| f.index), Some(2));
    assert!(!registry.is_wired(&dev(), &action.key()));

    chain.heal();
    let report = Sequencer::new("development", &chain, &mut registry, &descriptors)
        .run(&provider(), &steps)
        .await
        .unwrap();
    assert!(report.is_completed());
    assert!(registry.is_wired(&dev(), &action.key()));
}

#[tokio::test]
async fn test_missing_config_aborts_before_any_step() {
    common::init_tracing();
    let chain = MockChain::new();
    let mut registry = InMemoryRegistry::new();
    let descriptors = token_and_pool();

    let mut sequencer = Sequencer::new("live", &chain, &mut registry, &descriptors);
    let err = sequencer
        .run(&provider(), &token_then_pool())
        .await
        .unwrap_err();

    assert!(matches!(err, DeployError::ConfigMissing { .. }));
    assert_eq!(sequencer.state(), RunState::Pending);
    assert!(chain.actions().is_empty());
}

#[tokio::test]
async fn test_full_release_then_idempotent_rerun() {
    common::init_tracing();
    let chain = MockChain::new();
    let mut registry = InMemoryRegistry::new();
    let descriptors = releases::descriptors().unwrap();

    let report = Sequencer::new("development", &chain, &mut registry, &descriptors)
        .run(&provider(), &Release::All)
        .await
        .unwrap();
    assert!(report.is_completed(), "{:?}", report.failure);

    let entries = registry.entries(&dev());
    assert_eq!(entries.len(), 11);
    assert_eq!(chain.deploys_of("ProxyAdmin").len(), 1);
    for upgraded in [
        releases::AIRDROP_HOLDER_POOL,
        releases::REBASE_SALE_POOL,
        releases::BUYBACK_POOL,
        releases::ORCHESTRATOR,
    ] {
        assert_eq!(entries[&ModuleName::from(upgraded)].version, 2);
    }
    assert_eq!(entries[&ModuleName::from(releases::KGR_TOKEN)].version, 1);

    let actions = chain.actions().len();
    let report = Sequencer::new("development", &chain, &mut registry, &descriptors)
        .run(&provider(), &Release::All)
        .await
        .unwrap();
    assert!(report.is_completed());
    assert_eq!(registry.entries(&dev()), entries);

    // Only the airdrop switches are sent again.
    let resent: Vec<_> = report.applied().map(|record| record.label.clone()).collect();
    assert_eq!(resent.len(), 2, "{resent:?}");
    assert!(resent.iter().all(|label| label.contains("setAirdropPaused")));
    assert_eq!(chain.actions().len(), actions + 2);
}

#[tokio::test]
async fn test_file_registry_resumes_across_processes() {
    common::init_tracing();
    let temp_dir = TempDir::new("migrant-test").expect("Failed to create temp dir");
    let path = temp_dir.path().join("registry.json");
    let chain = MockChain::new();
    let descriptors = token_and_pool();
    chain.fail_deploys_of("PoolB");

    {
        let mut registry = FileRegistry::open(&path).unwrap();
        let report = Sequencer::new("development", &chain, &mut registry, &descriptors)
            .run(&provider(), &token_then_pool())
            .await
            .unwrap();
        assert_eq!(report.failure.map(|f| f.index), Some(1));
    }

    chain.heal();
    let mut registry = FileRegistry::open(&path).unwrap();
    assert!(registry.contains(&dev(), &ModuleName::from("TokenA")));

    let report = Sequencer::new("development", &chain, &mut registry, &descriptors)
        .run(&provider(), &token_then_pool())
        .await
        .unwrap();

    assert!(report.is_completed());
    assert_eq!(chain.deploys_of("TokenA").len(), 1);
    assert_eq!(chain.deploys_of("ProxyAdmin").len(), 1);
}
