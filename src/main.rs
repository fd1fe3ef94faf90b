mod board;
mod bridge;
mod cli;
mod config;
mod controller;
mod error;
mod estimator;
mod generator;
mod layout;
mod logging;
mod queue;
mod results;
mod scheduler;
mod simulate;
mod state_machine;
mod tracker;
mod ui;

#[cfg(test)]
mod testing;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use bridge::{Computation, ScriptBridge};
use cli::{Cli, Command};
use config::SearchConfig;
use controller::{RunController, RunSummary};
use error::SearchError;
use estimator::{Estimator, RemoteEstimator, TcpLearningClient};
use generator::{ChainGrammar, StructureConverter};
use layout::RunLayout;
use results::{ResultSummary, read_log};
use scheduler::{CommandSubmitter, Submitter};
use simulate::{SimulatedComputation, SimulatedEstimator, SimulatedFacility};
use ui::RunProgress;

const DEMO_POLL_INTERVAL_MS: u64 = 50;
const DEMO_MAX_EPOCHS: u32 = 3;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::setup_logging(cli.verbose, cli.quiet, cli.log_file.as_deref())?;

    let mut config = SearchConfig::load(cli.config.as_deref()).context("loading configuration")?;
    cli.apply_overrides(&mut config);

    match &cli.command {
        Command::Run { run_dir } => {
            if let Some(dir) = run_dir {
                config.run_dir = dir.clone();
            }
            run(config, cli.quiet).await?;
        }
        Command::Demo { run_dir } => {
            config.run_dir = run_dir.clone();
            demo(config, cli.quiet).await?;
        }
        Command::Status {
            run_dir,
            mode,
            json,
        } => {
            if let Some(dir) = run_dir {
                config.run_dir = dir.clone();
            }
            let mode = mode.clone().unwrap_or_else(|| config.mode());
            status(&layout_for(&config).result_log(&mode), *json)?;
        }
    }
    Ok(())
}

fn layout_for(config: &SearchConfig) -> RunLayout {
    RunLayout::new(
        &config.run_dir,
        &config.computation.feature,
        &config.computation.property,
    )
}

async fn run(config: SearchConfig, quiet: bool) -> Result<RunSummary, SearchError> {
    config.validate()?;
    let layout = layout_for(&config);
    let computation = Arc::new(ScriptBridge::new(&config.computation, layout.clone())?);
    let submitter = Arc::new(CommandSubmitter::new(&config.submit_command, &config.run_dir)?);
    let estimator = config.learning.address.as_ref().map(|addr| {
        let timeout = Duration::from_millis(config.learning.reply_timeout_ms);
        Arc::new(RemoteEstimator::new(TcpLearningClient::with_timeout(addr.clone(), timeout)))
    });

    execute(
        &config,
        layout,
        Arc::new(ChainGrammar::with_max_units(config.search.rule_max)),
        computation,
        estimator,
        submitter,
        quiet,
    )
    .await
}

/// Full pipeline against in-process backends, with a shortened schedule.
async fn demo(mut config: SearchConfig, quiet: bool) -> Result<RunSummary, SearchError> {
    config.poll_interval_ms = DEMO_POLL_INTERVAL_MS;
    config.search.epochs = config.search.epochs.min(DEMO_MAX_EPOCHS);
    config.validate_search()?;

    let layout = layout_for(&config);
    let facility = SimulatedFacility::new(
        layout.clone(),
        Duration::from_millis(100),
        Duration::from_millis(400),
    );
    execute(
        &config,
        layout.clone(),
        Arc::new(ChainGrammar::new()),
        Arc::new(SimulatedComputation::new(layout)),
        Some(Arc::new(SimulatedEstimator::default())),
        Arc::new(facility),
        quiet,
    )
    .await
}

async fn execute<E, C, S, T>(
    config: &SearchConfig,
    layout: RunLayout,
    engine: Arc<E>,
    computation: Arc<C>,
    estimator: Option<Arc<S>>,
    submitter: Arc<T>,
    quiet: bool,
) -> Result<RunSummary, SearchError>
where
    E: StructureConverter,
    C: Computation,
    S: Estimator,
    T: Submitter,
{
    let mut controller =
        RunController::new(config, layout, engine, computation, estimator, submitter)?;
    info!(run_id = %controller.run_id(), run_dir = %config.run_dir.display(), "starting search");
    if !quiet {
        controller = controller.with_progress(RunProgress::start(&config.mode(), config.capacity));
    }
    controller.run().await
}

fn status(path: &Path, json: bool) -> Result<(), SearchError> {
    let entries = read_log(path)?;
    let summary = ResultSummary::from_entries(&entries);
    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        ui::print_status(path, &summary);
    }
    Ok(())
}
