//! Template inspection — `maestro list` and `maestro validate`.

use anyhow::Result;

use maestro::agents::AgentLibrary;
use maestro::config::Config;
use maestro::graph::WorkflowGraph;
use maestro::planner::BlockPlanner;
use maestro::template::TemplateLoader;

use super::{EXIT_INVALID_WORKFLOW, EXIT_SUCCESS};

/// List available workflow templates and their phases.
pub fn cmd_list(config: &Config) -> Result<()> {
    let loader = TemplateLoader::new(&config.templates_dir);
    let names = loader.discover()?;

    if names.is_empty() {
        println!(
            "No workflow templates in {}",
            config.templates_dir.display()
        );
        return Ok(());
    }

    for name in names {
        match loader.load(&name) {
            Ok(template) => {
                println!(
                    "{} {} — {}",
                    console::style(&name).bold(),
                    format!("({} phases)", template.workflow.phases.len()),
                    template.description
                );
                for phase in &template.workflow.phases {
                    let deps = if phase.dependencies.is_empty() {
                        String::new()
                    } else {
                        format!(" ← {}", phase.dependencies.join(", "))
                    };
                    println!("    {} [{}]{}", phase.id, phase.agent, deps);
                }
            }
            Err(e) => {
                println!(
                    "{} {} — {}",
                    console::style(&name).bold(),
                    console::style("unreadable").red(),
                    e
                );
            }
        }
    }

    let agents = AgentLibrary::load_dir(&config.agents_dir)?;
    if !agents.is_empty() {
        println!();
        println!("{}", console::style("Agents:").bold());
        for role in agents.roles() {
            if let Some(def) = agents.get(role) {
                println!("    {} ({})", role, def.expertise_summary());
            }
        }
    }
    Ok(())
}

/// Validate a workflow template without executing it. Returns the process
/// exit code.
pub fn cmd_validate(config: &Config, workflow: &str) -> Result<i32> {
    let loader = TemplateLoader::new(&config.templates_dir);
    let template = loader.load(workflow)?;

    let graph = match WorkflowGraph::build(template.workflow.phases.clone()) {
        Ok(graph) => graph,
        Err(e) => {
            println!("{} {}", console::style("✗").red().bold(), e);
            return Ok(EXIT_INVALID_WORKFLOW);
        }
    };

    let plan = BlockPlanner::plan(&graph);
    println!(
        "{} {} phases, {} blocks",
        console::style("✓").green().bold(),
        graph.len(),
        plan.len()
    );
    for line in plan.describe(&graph) {
        println!("  {line}");
    }

    let agents = AgentLibrary::load_dir(&config.agents_dir)?;
    for role in agents.missing_for(&template) {
        println!(
            "  {} no agent definition for '{}'",
            console::style("⚠").yellow(),
            role
        );
    }

    Ok(EXIT_SUCCESS)
}
