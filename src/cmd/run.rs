//! Workflow execution — `maestro run`.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::mpsc;

use maestro::agents::AgentLibrary;
use maestro::config::Config;
use maestro::events::RunEvent;
use maestro::executor::ProcessExecutor;
use maestro::graph::WorkflowGraph;
use maestro::orchestrator::{Orchestrator, RunResult};
use maestro::planner::BlockPlanner;
use maestro::template::TemplateLoader;

use super::{EXIT_INVALID_WORKFLOW, EXIT_RUN_FAILED, EXIT_SUCCESS};

/// Run a workflow end to end. Returns the process exit code.
pub async fn cmd_run(
    config: Config,
    workflow: Option<String>,
    agent_command: String,
    agent_args: Vec<String>,
) -> Result<i32> {
    let loader = TemplateLoader::new(&config.templates_dir);
    let names = loader.discover()?;
    if names.is_empty() {
        anyhow::bail!(
            "No workflow templates found in {}",
            config.templates_dir.display()
        );
    }

    let name = match workflow {
        Some(name) => name,
        None => select_workflow(&names)?,
    };
    let template = loader.load(&name)?;

    println!(
        "{} {} — {}",
        console::style("Workflow:").bold(),
        template.name,
        template.description
    );

    let agents = AgentLibrary::load_dir(&config.agents_dir)
        .with_context(|| format!("Failed to load agents from {}", config.agents_dir.display()))?;
    for role in agents.missing_for(&template) {
        println!(
            "  {} no definition for agent '{}', running without role instructions",
            console::style("⚠").yellow(),
            role
        );
    }

    let graph = match WorkflowGraph::build(template.workflow.phases.clone()) {
        Ok(graph) => graph,
        Err(e) => {
            println!(
                "  {} {}",
                console::style("Invalid workflow:").red().bold(),
                e
            );
            return Ok(EXIT_INVALID_WORKFLOW);
        }
    };

    if config.verbose {
        let plan = BlockPlanner::plan(&graph);
        println!("{}", console::style("Execution plan:").bold());
        for line in plan.describe(&graph) {
            println!("  {line}");
        }
    }

    let executor = Arc::new(ProcessExecutor::new(
        agent_command,
        agent_args,
        config.project_dir.clone(),
        Arc::new(agents),
    ));

    let (event_tx, event_rx) = mpsc::channel(256);
    let renderer = tokio::spawn(render_events(event_rx));

    let orchestrator = Orchestrator::new(config, executor).with_event_channel(event_tx);
    let result = orchestrator.run(graph).await?;

    // Drop the last event sender so the renderer's channel closes and it exits.
    drop(orchestrator);
    renderer.await.ok();
    print_summary(&result);

    Ok(if result.success {
        EXIT_SUCCESS
    } else {
        EXIT_RUN_FAILED
    })
}

fn select_workflow(names: &[String]) -> Result<String> {
    use dialoguer::Select;

    let index = Select::new()
        .with_prompt("Select a workflow")
        .items(names)
        .default(0)
        .interact()
        .context("Workflow selection cancelled")?;
    Ok(names[index].clone())
}

async fn render_events(mut rx: mpsc::Receiver<RunEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            RunEvent::BlockStarted { block, phases } => {
                println!(
                    "{} block {} [{}]",
                    console::style("▶").cyan(),
                    block + 1,
                    phases.join(", ")
                );
            }
            RunEvent::PhaseStarted {
                phase, attempt, ..
            } => {
                if attempt > 1 {
                    println!("    {phase} (attempt {attempt})");
                } else {
                    println!("    {phase}");
                }
            }
            RunEvent::PhaseCompleted { phase, outcome } => {
                if outcome.success {
                    println!(
                        "    {} {} ({:.1}s)",
                        console::style("✓").green(),
                        phase,
                        outcome.duration.as_secs_f64()
                    );
                } else if let Some(ref failure) = outcome.failure {
                    println!(
                        "    {} {} {}: {}",
                        console::style("✗").red(),
                        phase,
                        console::style(format!("[{}]", failure.code())).dim(),
                        failure
                    );
                }
            }
            RunEvent::ArtifactShared {
                producer,
                consumer,
                artifact,
            } => {
                println!(
                    "      {} {artifact}: {producer} → {consumer}",
                    console::style("↳").dim()
                );
            }
            RunEvent::BlockRetry {
                block,
                attempt,
                delay_ms,
                failed_phases,
            } => {
                println!(
                    "  {} block {} attempt {} failed ({}), retrying in {:.1}s",
                    console::style("⟳").yellow(),
                    block + 1,
                    attempt,
                    failed_phases.join(", "),
                    delay_ms as f64 / 1000.0
                );
            }
            RunEvent::BlockCompleted { .. } | RunEvent::RunCompleted { .. } => {}
        }
    }
}

fn print_summary(result: &RunResult) {
    let summary = &result.summary;
    println!();
    if result.success {
        println!(
            "{} {} phases in {} blocks ({:.1}s)",
            console::style("Workflow succeeded:").green().bold(),
            summary.succeeded,
            summary.blocks_completed,
            summary.duration.as_secs_f64()
        );
    } else {
        println!(
            "{} {} succeeded, {} failed",
            console::style("Workflow failed:").red().bold(),
            summary.succeeded,
            summary.failed
        );
        if let Some(error) = result.run_error() {
            println!("  {error}");
        }
        let pending = result.pending_phases();
        if !pending.is_empty() {
            println!("  never started: {}", pending.join(", "));
        }
    }

    if !result.artifacts.is_empty() {
        println!("{}", console::style("Artifacts:").bold());
        for artifact in &result.artifacts {
            println!("  {} (from {})", artifact.name, artifact.phase);
        }
    }
}
