//! The run driver.
//!
//! A [`Sequencer`] loads the network's config, builds the step list, checks
//! its ordering and then runs the steps one at a time, halting on the first
//! failure. Steps that already took effect stay in place; a later run over
//! the same registry resumes where this one stopped.

use crate::{
    DescriptorSet, ModuleName, Network,
    chain::ChainClient,
    config::ConfigProvider,
    error::{DeployError, DeployResult, ErrorKind},
    executor::{Executor, StepOutcome},
    plan::{Plan, StepList},
    registry::AddressRegistry,
};

/// Where a run stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Pending,
    Running { step: usize },
    Completed,
    Failed { step: usize, kind: ErrorKind },
}

/// A step that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepRecord {
    pub index: usize,
    pub label: String,
    pub outcome: StepOutcome,
}

/// The step a run halted at.
#[derive(Debug)]
pub struct StepFailure {
    pub index: usize,
    pub label: String,
    pub module: ModuleName,
    pub error: DeployError,
}

/// What a run did, step by step.
#[derive(Debug)]
pub struct RunReport {
    pub network: Network,
    pub records: Vec<StepRecord>,
    pub failure: Option<StepFailure>,
}

impl RunReport {
    fn new(network: Network) -> Self {
        Self {
            network,
            records: Vec::new(),
            failure: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.failure.is_none()
    }

    /// Steps that acted on the chain, as opposed to being skipped.
    pub fn applied(&self) -> impl Iterator<Item = &StepRecord> {
        self.records
            .iter()
            .filter(|record| !matches!(record.outcome, StepOutcome::Skipped(_)))
    }
}

pub struct Sequencer<'a, C, R: ?Sized> {
    network: Network,
    chain: &'a C,
    registry: &'a mut R,
    descriptors: &'a DescriptorSet,
    state: RunState,
}

impl<'a, C, R> Sequencer<'a, C, R>
where
    C: ChainClient,
    R: AddressRegistry + ?Sized,
{
    pub fn new(
        network: impl Into<Network>,
        chain: &'a C,
        registry: &'a mut R,
        descriptors: &'a DescriptorSet,
    ) -> Self {
        Self {
            network: network.into(),
            chain,
            registry,
            descriptors,
            state: RunState::Pending,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Run `plan` on the sequencer's network.
    ///
    /// Returns `Err` only when the run could not start (no config, no step
    /// list); nothing was submitted in that case. Once steps run, the outcome
    /// is in the report, including a failure.
    pub async fn run(
        &mut self,
        provider: &impl ConfigProvider,
        plan: &impl Plan,
    ) -> DeployResult<RunReport> {
        let config = provider.load(&self.network)?;
        let steps = plan.steps(&config)?;

        tracing::info!(network = %self.network, steps = steps.len(), "Starting run");

        let mut report = RunReport::new(self.network.clone());

        let checked = steps.validate(&self.network, self.descriptors, |module| {
            self.registry
                .get(&self.network, module)
                .map(|entry| entry.version)
        });
        if let Err(violation) = checked {
            self.fail(&mut report, &steps, violation.index, violation.error);
            return Ok(report);
        }

        for (index, step) in steps.iter().enumerate() {
            self.state = RunState::Running { step: index };
            tracing::debug!(step = index, label = %step.label(), "Running step");

            let mut executor = Executor::new(
                &self.network,
                self.chain,
                &mut *self.registry,
                self.descriptors,
                &config,
            );

            let result = executor.execute(step).await;
            match result {
                Ok(outcome) => report.records.push(StepRecord {
                    index,
                    label: step.label(),
                    outcome,
                }),
                Err(error) => {
                    self.fail(&mut report, &steps, index, error);
                    return Ok(report);
                }
            }
        }

        self.state = RunState::Completed;
        tracing::info!(
            network = %self.network,
            applied = report.applied().count(),
            skipped = report.records.len() - report.applied().count(),
            "Run completed"
        );

        Ok(report)
    }

    fn fail(&mut self, report: &mut RunReport, steps: &StepList, index: usize, error: DeployError) {
        let step = steps.iter().nth(index);
        let label = step.map(|s| s.label()).unwrap_or_default();
        let module = step
            .map(|s| s.module().clone())
            .unwrap_or_else(|| ModuleName::from(""));

        tracing::error!(
            network = %self.network,
            step = index,
            module = %module,
            kind = %error.kind(),
            error = %error,
            "Step failed"
        );

        if index > 0 {
            tracing::warn!(
                "Steps before {index} already took effect on-chain and are recorded in the \
                 registry; re-run the same step list to resume from step {index}"
            );
        }

        self.state = RunState::Failed {
            step: index,
            kind: error.kind(),
        };
        report.failure = Some(StepFailure {
            index,
            label,
            module,
            error,
        });
    }
}
