//! migrant runs the KGR protocol releases against a chain, recording every
//! deployed module so an interrupted run can simply be started again.

mod cli;
mod settings;

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use comfy_table::{Table, presets::UTF8_FULL};

use cli::{Cli, Command};
use migrant_deploy::{
    AddressRegistry, ConfigProvider, FileConfigProvider, FileRegistry, Network, Plan, Release,
    Sequencer, Step,
    chain::{ArtifactStore, JsonRpcChainClient},
    releases,
};
use settings::Settings;

/// A run that started and stopped at a failed step.
const EXIT_STEP_FAILED: u8 = 1;
/// A run that could not start.
const EXIT_ABORTED: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize the logger.
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .init();

    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            tracing::error!(error = %format!("{err:#}"), "Aborted before running any step");
            ExitCode::from(EXIT_ABORTED)
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let settings = Settings::load(&cli.settings)?;

    match cli.command {
        Command::Migrate { network, release } => {
            migrate(&settings, Network::new(network), release).await
        }
        Command::Plan { network, release } => {
            print_plan(&settings, Network::new(network), release)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Registry { network } => {
            print_registry(&settings, Network::new(network))?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn migrate(settings: &Settings, network: Network, release: Release) -> Result<ExitCode> {
    let mut registry = FileRegistry::open(&settings.registry)?;
    let descriptors = releases::descriptors()?;
    let provider = FileConfigProvider::new(&settings.deploy_config);

    // Fail on a missing config before connecting to anything.
    provider.load(&network)?;

    let chain = JsonRpcChainClient::connect(
        settings.rpc_config(&network)?,
        ArtifactStore::new(&settings.artifacts),
    )
    .await?;

    tracing::info!(
        network = %network,
        release = %release,
        registry = %settings.registry.display(),
        "Running release"
    );

    let report = Sequencer::new(network.clone(), &chain, &mut registry, &descriptors)
        .run(&provider, &release)
        .await?;

    if let Some(failure) = &report.failure {
        tracing::error!(
            network = %network,
            step = failure.index,
            label = %failure.label,
            module = %failure.module,
            kind = %failure.error.kind(),
            "Release stopped"
        );
        return Ok(ExitCode::from(EXIT_STEP_FAILED));
    }

    tracing::info!(
        network = %network,
        release = %release,
        applied = report.applied().count(),
        steps = report.records.len(),
        "Release completed"
    );

    Ok(ExitCode::SUCCESS)
}

fn print_plan(settings: &Settings, network: Network, release: Release) -> Result<()> {
    let config = FileConfigProvider::new(&settings.deploy_config).load(&network)?;
    let steps = release.steps(&config)?;
    let registry = FileRegistry::snapshot(&settings.registry)?;

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_header(vec!["#", "Step", "Status"]);

    for (index, step) in steps.iter().enumerate() {
        let status = match step {
            Step::Deploy(module) if registry.contains(&network, module) => "deployed".to_string(),
            Step::Upgrade(upgrade) => match registry.get(&network, &upgrade.module) {
                Some(entry) if entry.version >= upgrade.version => {
                    format!("at v{}", entry.version)
                }
                _ => "pending".to_string(),
            },
            Step::Wire(action) if registry.is_wired(&network, &action.key()) => {
                "applied".to_string()
            }
            _ => "pending".to_string(),
        };
        table.add_row(vec![index.to_string(), step.label(), status]);
    }

    println!("{table}");
    Ok(())
}

fn print_registry(settings: &Settings, network: Network) -> Result<()> {
    let registry = FileRegistry::snapshot(&settings.registry)?;
    let entries = registry.entries(&network);

    if entries.is_empty() {
        tracing::info!(network = %network, "No module registered");
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec![
        "Module",
        "Address",
        "Proxy",
        "Implementation",
        "Version",
    ]);

    for (module, entry) in entries {
        table.add_row(vec![
            module.to_string(),
            entry.address.to_string(),
            entry.proxy_kind.to_string(),
            entry
                .implementation
                .map(|address| address.to_string())
                .unwrap_or_default(),
            entry.version.to_string(),
        ]);
    }

    println!("{table}");
    Ok(())
}
