//! Command dispatch for the `churnflow` binary.

use crate::cli::{CliArgs, Command, ConfigArgs, RunArgs};
use crate::config::{self, PipelineConfig};
use crate::controller::{PipelineController, PipelineOutcome};
use crate::events::LoggingEventSink;
use crate::pipeline::TaskGraph;
use anyhow::{Context, Result};
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::debug;

/// Runs the selected command. Returns `false` when the pipeline failed.
pub async fn run(args: CliArgs) -> Result<bool> {
    match args.command {
        Command::Run(run_args) => run_pipeline(run_args).await,
        Command::Check(config_args) => check(&config_args).map(|()| true),
    }
}

fn load_config(args: &ConfigArgs) -> Result<PipelineConfig> {
    config::load_or_default(args.config.as_deref()).context("loading configuration")
}

async fn run_pipeline(args: RunArgs) -> Result<bool> {
    let mut config = load_config(&args.config)?;
    if let Some(source) = args.data_source {
        config.data_source = source;
    }
    debug!(?config, "resolved configuration");

    let controller = PipelineController::from_config(&config)
        .context("building pipeline")?
        .with_event_sink(Arc::new(LoggingEventSink::debug()));
    let outcome = controller.run().await.context("running pipeline")?;

    print!("{}", render_outcome(&outcome));
    Ok(outcome.is_success())
}

fn check(args: &ConfigArgs) -> Result<()> {
    let config = load_config(args)?;
    let controller = PipelineController::from_config(&config).context("building pipeline")?;
    let graph = controller.graph().context("validating task graph")?;
    print!("{}", render_graph(&config, &graph));
    Ok(())
}

fn render_graph(config: &PipelineConfig, graph: &TaskGraph) -> String {
    let mut out = format!(
        "pipeline '{}' ({} tasks, data source: {})\n",
        graph.name(),
        graph.len(),
        config.data_source
    );
    for (position, id) in graph.execution_order().iter().enumerate() {
        let deps = graph
            .task(id)
            .map(|task| task.dependencies.iter().cloned().collect::<Vec<_>>())
            .unwrap_or_default();
        let _ = if deps.is_empty() {
            writeln!(out, "{:>2}. {id}", position + 1)
        } else {
            writeln!(out, "{:>2}. {id} <- {}", position + 1, deps.join(", "))
        };
    }
    out
}

fn render_outcome(outcome: &PipelineOutcome) -> String {
    let run = &outcome.run;
    let mut out = format!(
        "run {} of '{}': {} in {:.1}s\n",
        run.run_id,
        run.pipeline,
        run.final_state,
        run.duration()
            .to_std()
            .map(|elapsed| elapsed.as_secs_f64())
            .unwrap_or_default()
    );
    for id in &run.submission_order {
        if let Some(record) = run.tasks.get(id) {
            let _ = write!(out, "  {id:<12} {:<18} attempts={}", record.status, record.attempts);
            let _ = match &record.error {
                Some(error) => writeln!(out, "  {error}"),
                None => writeln!(out),
            };
        }
    }
    let service = &outcome.service;
    let _ = write!(out, "service: {}", service.final_state);
    if let Some(stop) = service.stop_outcome {
        let _ = write!(out, " ({stop:?})");
    }
    if let Some(error) = &service.stop_error {
        let _ = write!(out, ", stop error: {error}");
    }
    out.push('\n');
    out
}
