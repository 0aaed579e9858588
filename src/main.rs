use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use maestro::config::{
    Config, DEFAULT_MAX_PARALLEL, DEFAULT_MAX_RETRIES, DEFAULT_PHASE_TIMEOUT_SECS,
};

mod cmd;

#[derive(Parser)]
#[command(name = "maestro")]
#[command(version, about = "Multi-agent workflow orchestrator")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Directory the agent commands run in (defaults to the current directory)
    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Directory holding workflow template YAML files
    #[arg(long, default_value = "templates", global = true)]
    pub templates_dir: PathBuf,

    /// Directory holding agent definition YAML files
    #[arg(long, default_value = "agents", global = true)]
    pub agents_dir: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Execute a workflow template
    Run {
        /// Template name. Prompts for a selection when omitted.
        workflow: Option<String>,

        /// Retry attempts per block
        #[arg(long, default_value_t = DEFAULT_MAX_RETRIES)]
        max_retries: u32,

        /// Per-phase timeout in seconds
        #[arg(long, default_value_t = DEFAULT_PHASE_TIMEOUT_SECS)]
        phase_timeout: u64,

        /// Maximum concurrently running phases within a block
        #[arg(long, default_value_t = DEFAULT_MAX_PARALLEL)]
        max_parallel: usize,

        /// Agent command invoked per phase (prompt on stdin, artifacts on stdout)
        #[arg(long, default_value = "claude")]
        agent_command: String,

        /// Extra argument for the agent command (repeatable)
        #[arg(long = "agent-arg", allow_hyphen_values = true)]
        agent_args: Vec<String>,
    },
    /// Validate a workflow template and show its execution plan
    Validate { workflow: String },
    /// List available workflow templates
    List,
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("maestro=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("maestro=warn"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();
}

fn base_config(cli: &Cli) -> Result<Config> {
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    Ok(Config {
        project_dir,
        templates_dir: cli.templates_dir.clone(),
        agents_dir: cli.agents_dir.clone(),
        verbose: cli.verbose,
        ..Config::default()
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let code = match &cli.command {
        Commands::Run {
            workflow,
            max_retries,
            phase_timeout,
            max_parallel,
            agent_command,
            agent_args,
        } => {
            let config = base_config(&cli)?
                .with_max_retries(*max_retries)
                .with_phase_timeout(Duration::from_secs(*phase_timeout))
                .with_max_parallel(*max_parallel);
            cmd::cmd_run(
                config,
                workflow.clone(),
                agent_command.clone(),
                agent_args.clone(),
            )
            .await?
        }
        Commands::Validate { workflow } => {
            let config = base_config(&cli)?;
            cmd::cmd_validate(&config, workflow)?
        }
        Commands::List => {
            let config = base_config(&cli)?;
            cmd::cmd_list(&config)?;
            cmd::EXIT_SUCCESS
        }
    };

    std::process::exit(code);
}
