//! Step lists: the ordered program a run executes.
//!
//! The order of a step list is declared by its author, the orchestrator never
//! reorders it. [`StepList::validate`] walks the list once before anything is
//! submitted and reports the first step that refers to a module which is
//! neither registered already nor deployed by an earlier step, or that
//! upgrades a module past the next version.

use std::collections::{BTreeMap, BTreeSet};

use crate::{
    ArgSpec, ArtifactRef, CallSpec, DeploymentConfig, DescriptorSet, ModuleName, Network,
    error::{DeployError, DeployResult},
};

/// Whether a wiring action may be sent again on a later run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Reapply {
    /// Idempotent on the target, sent on every run.
    Always,
    /// Sent once per network; journaled in the registry once confirmed.
    Once,
}

/// A post-deployment call on a deployed module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WiringAction {
    pub target: ModuleName,
    pub call: CallSpec,
    pub reapply: Reapply,
}

impl WiringAction {
    /// A once-only call of `signature` on `target`.
    pub fn new(
        target: impl Into<ModuleName>,
        signature: &str,
        args: Vec<ArgSpec>,
    ) -> DeployResult<Self> {
        let target = target.into();
        let call = CallSpec::parse(&target, signature, args)?;
        Ok(Self {
            target,
            call,
            reapply: Reapply::Once,
        })
    }

    /// Mark the call as safe to repeat.
    pub fn idempotent(mut self) -> Self {
        self.reapply = Reapply::Always;
        self
    }

    /// Journal key of the action, stable across runs.
    pub fn key(&self) -> String {
        format!("{}.{}", self.target, self.call)
    }
}

/// Upgrade of a proxied module to a new implementation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeStep {
    pub module: ModuleName,
    /// Registry version after the upgrade; the step is skipped once reached.
    pub version: u32,
    /// Artifact of the new implementation, defaults to the descriptor's.
    pub artifact: Option<ArtifactRef>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Deploy(ModuleName),
    Upgrade(UpgradeStep),
    Wire(WiringAction),
}

impl Step {
    pub fn deploy(module: impl Into<ModuleName>) -> Self {
        Step::Deploy(module.into())
    }

    pub fn upgrade(module: impl Into<ModuleName>, version: u32) -> Self {
        Step::Upgrade(UpgradeStep {
            module: module.into(),
            version,
            artifact: None,
        })
    }

    pub fn upgrade_to(
        module: impl Into<ModuleName>,
        version: u32,
        artifact: impl Into<ArtifactRef>,
    ) -> Self {
        Step::Upgrade(UpgradeStep {
            module: module.into(),
            version,
            artifact: Some(artifact.into()),
        })
    }

    pub fn wire(action: WiringAction) -> Self {
        Step::Wire(action)
    }

    /// The module the step acts on.
    pub fn module(&self) -> &ModuleName {
        match self {
            Step::Deploy(module) => module,
            Step::Upgrade(upgrade) => &upgrade.module,
            Step::Wire(action) => &action.target,
        }
    }

    pub fn label(&self) -> String {
        match self {
            Step::Deploy(module) => format!("deploy {module}"),
            Step::Upgrade(upgrade) => format!("upgrade {} to v{}", upgrade.module, upgrade.version),
            Step::Wire(action) => format!("wire {}", action.key()),
        }
    }
}

/// The first step that breaks the ordering of a step list.
#[derive(Debug)]
pub struct PlanViolation {
    pub index: usize,
    pub error: DeployError,
}

/// Ordered steps of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepList {
    steps: Vec<Step>,
}

impl StepList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, step: Step) {
        self.steps.push(step);
    }

    pub fn then(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    pub fn append(&mut self, other: StepList) {
        self.steps.extend(other.steps);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Step> {
        self.steps.iter()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Check that every reference points backwards.
    ///
    /// `registered` returns the registry version of a module already
    /// deployed on the target network; such modules are available from the
    /// first step. Upgrades move one version at a time: a step may target a
    /// version already reached (it will be skipped) or the next one.
    pub fn validate(
        &self,
        network: &Network,
        descriptors: &DescriptorSet,
        registered: impl Fn(&ModuleName) -> Option<u32>,
    ) -> Result<(), PlanViolation> {
        let mut deployed_here = BTreeSet::new();
        let mut reached: BTreeMap<ModuleName, u32> = BTreeMap::new();

        for (index, step) in self.steps.iter().enumerate() {
            let violation = |error| PlanViolation { index, error };
            let available = |module: &ModuleName| {
                deployed_here.contains(module) || registered(module).is_some()
            };

            match step {
                Step::Deploy(module) => {
                    let descriptor = descriptors
                        .get(module)
                        .ok_or_else(|| violation(missing_descriptor(module)))?;

                    if deployed_here.contains(module) {
                        return Err(violation(DeployError::InvalidPlan {
                            reason: format!("'{module}' is deployed twice"),
                        }));
                    }

                    if let Some(dependency) = descriptor.dependencies().find(|&d| !available(d)) {
                        return Err(violation(DeployError::UnresolvedDependency {
                            module: module.clone(),
                            dependency: dependency.clone(),
                        }));
                    }

                    reached.insert(module.clone(), registered(module).unwrap_or(1));
                    deployed_here.insert(module.clone());
                }
                Step::Upgrade(upgrade) => {
                    let descriptor = descriptors
                        .get(&upgrade.module)
                        .ok_or_else(|| violation(missing_descriptor(&upgrade.module)))?;

                    if !descriptor.proxied {
                        return Err(violation(DeployError::NotUpgradeable {
                            module: upgrade.module.clone(),
                        }));
                    }
                    if upgrade.version < 2 {
                        return Err(violation(DeployError::InvalidPlan {
                            reason: format!(
                                "upgrade of '{}' targets v{}, upgrades start at v2",
                                upgrade.module, upgrade.version
                            ),
                        }));
                    }
                    if !available(&upgrade.module) {
                        return Err(violation(unknown_module(network, &upgrade.module)));
                    }

                    let current = reached
                        .get(&upgrade.module)
                        .copied()
                        .or_else(|| registered(&upgrade.module))
                        .unwrap_or(1);
                    if upgrade.version > current + 1 {
                        return Err(violation(DeployError::InvalidPlan {
                            reason: format!(
                                "upgrade of '{}' targets v{} but the module is at v{current}",
                                upgrade.module, upgrade.version
                            ),
                        }));
                    }
                    if let Some(dependency) =
                        descriptor.upgrade_dependencies().find(|&d| !available(d))
                    {
                        return Err(violation(DeployError::UnresolvedDependency {
                            module: upgrade.module.clone(),
                            dependency: dependency.clone(),
                        }));
                    }

                    reached.insert(upgrade.module.clone(), current.max(upgrade.version));
                }
                Step::Wire(action) => {
                    if !available(&action.target) {
                        return Err(violation(unknown_module(network, &action.target)));
                    }
                    if let Some(dependency) = action.call.dependencies().find(|&d| !available(d)) {
                        return Err(violation(DeployError::UnresolvedDependency {
                            module: action.target.clone(),
                            dependency: dependency.clone(),
                        }));
                    }
                }
            }
        }

        Ok(())
    }
}

impl FromIterator<Step> for StepList {
    fn from_iter<I: IntoIterator<Item = Step>>(iter: I) -> Self {
        Self {
            steps: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a StepList {
    type Item = &'a Step;
    type IntoIter = std::slice::Iter<'a, Step>;

    fn into_iter(self) -> Self::IntoIter {
        self.steps.iter()
    }
}

/// Something that produces a step list once the network config is known.
pub trait Plan {
    fn steps(&self, config: &DeploymentConfig) -> DeployResult<StepList>;
}

impl Plan for StepList {
    fn steps(&self, _config: &DeploymentConfig) -> DeployResult<StepList> {
        Ok(self.clone())
    }
}

fn missing_descriptor(module: &ModuleName) -> DeployError {
    DeployError::InvalidPlan {
        reason: format!("no descriptor for module '{module}'"),
    }
}

fn unknown_module(network: &Network, module: &ModuleName) -> DeployError {
    DeployError::UnknownModule {
        network: network.clone(),
        module: module.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ModuleDescriptor;

    fn dev() -> Network {
        Network::from("development")
    }

    fn descriptors() -> DescriptorSet {
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
            .with(ModuleDescriptor::new("Plain", "Plain"))
            .unwrap()
    }

    #[test]
    fn test_backward_references_validate() {
        let steps = StepList::new()
            .then(Step::deploy("TokenA"))
            .then(Step::deploy("PoolB"))
            .then(Step::wire(
                WiringAction::new("TokenA", "setPool(address)", vec![ArgSpec::module("PoolB")])
                    .unwrap(),
            ))
            .then(Step::upgrade("PoolB", 2));

        assert!(steps.validate(&dev(), &descriptors(), |_| None).is_ok());
    }

    #[test]
    fn test_forward_reference_is_reported_at_its_step() {
        let steps = StepList::new()
            .then(Step::deploy("PoolB"))
            .then(Step::deploy("TokenA"));

        let violation = steps.validate(&dev(), &descriptors(), |_| None).unwrap_err();

        assert_eq!(violation.index, 0);
        match violation.error {
            DeployError::UnresolvedDependency { module, dependency } => {
                assert_eq!(module.as_str(), "PoolB");
                assert_eq!(dependency.as_str(), "TokenA");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_registered_modules_are_available() {
        let steps = StepList::new().then(Step::deploy("PoolB"));

        assert!(
            steps
                .validate(&dev(), &descriptors(), |m| (m.as_str() == "TokenA").then_some(1))
                .is_ok()
        );
    }

    #[test]
    fn test_wiring_target_must_exist() {
        let steps = StepList::new().then(Step::wire(
            WiringAction::new("PoolB", "setAirdropPaused(bool)", vec![ArgSpec::bool(false)])
                .unwrap(),
        ));

        let violation = steps.validate(&dev(), &descriptors(), |_| None).unwrap_err();
        assert_eq!(violation.index, 0);
        assert!(matches!(violation.error, DeployError::UnknownModule { .. }));
    }

    #[test]
    fn test_upgrade_rules() {
        let never_deployed = StepList::new().then(Step::upgrade("TokenA", 2));
        let violation = never_deployed.validate(&dev(), &descriptors(), |_| None).unwrap_err();
        assert!(matches!(violation.error, DeployError::UnknownModule { .. }));

        let plain = StepList::new()
            .then(Step::deploy("Plain"))
            .then(Step::upgrade("Plain", 2));
        let violation = plain.validate(&dev(), &descriptors(), |_| None).unwrap_err();
        assert_eq!(violation.index, 1);
        assert!(matches!(violation.error, DeployError::NotUpgradeable { .. }));

        let version_one = StepList::new()
            .then(Step::deploy("TokenA"))
            .then(Step::upgrade("TokenA", 1));
        let violation = version_one.validate(&dev(), &descriptors(), |_| None).unwrap_err();
        assert!(matches!(violation.error, DeployError::InvalidPlan { .. }));
    }

    #[test]
    fn test_upgrades_move_one_version_at_a_time() {
        let skipping = StepList::new()
            .then(Step::deploy("TokenA"))
            .then(Step::upgrade("TokenA", 3));
        let violation = skipping.validate(&dev(), &descriptors(), |_| None).unwrap_err();
        assert_eq!(violation.index, 1);
        assert!(matches!(violation.error, DeployError::InvalidPlan { .. }));

        let chained = StepList::new()
            .then(Step::deploy("TokenA"))
            .then(Step::upgrade("TokenA", 2))
            .then(Step::upgrade("TokenA", 3));
        assert!(chained.validate(&dev(), &descriptors(), |_| None).is_ok());

        // Resuming over a registry that already reached v3.
        let at_three = |m: &ModuleName| (m.as_str() == "TokenA").then_some(3u32);
        assert!(chained.validate(&dev(), &descriptors(), at_three).is_ok());

        let from_registry = StepList::new().then(Step::upgrade("TokenA", 4));
        assert!(from_registry.validate(&dev(), &descriptors(), at_three).is_ok());
        let past_next = StepList::new().then(Step::upgrade("TokenA", 5));
        let violation = past_next.validate(&dev(), &descriptors(), at_three).unwrap_err();
        assert!(matches!(violation.error, DeployError::InvalidPlan { .. }));
    }

    #[test]
    fn test_duplicate_and_unknown_deploys() {
        let twice = StepList::new()
            .then(Step::deploy("TokenA"))
            .then(Step::deploy("TokenA"));
        let violation = twice.validate(&dev(), &descriptors(), |_| None).unwrap_err();
        assert_eq!(violation.index, 1);

        let unknown = StepList::new().then(Step::deploy("Nope"));
        let violation = unknown.validate(&dev(), &descriptors(), |_| None).unwrap_err();
        assert!(matches!(violation.error, DeployError::InvalidPlan { .. }));
    }

    #[test]
    fn test_wiring_keys_are_stable() {
        let action = WiringAction::new(
            "FounderPool",
            "addFounder(address,uint256)",
            vec![
                ArgSpec::address(alloy_core::primitives::Address::with_last_byte(1)),
                ArgSpec::uint(3),
            ],
        )
        .unwrap();

        assert_eq!(
            action.key(),
            "FounderPool.addFounder(0x0000000000000000000000000000000000000001,3)"
        );
        assert_eq!(action.reapply, Reapply::Once);
        assert_eq!(action.idempotent().reapply, Reapply::Always);
    }
}
