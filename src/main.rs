//! Conveyor CLI - CI/CD pipeline engine

use std::collections::HashMap;
use std::fs;

use clap::{Parser, Subcommand};
use colored::Colorize;

use conveyor::actions::ActionRegistry;
use conveyor::error::{EngineError, FixSuggestion};
use conveyor::event_log::EventLog;
use conveyor::executor::JobExecutor;
use conveyor::job_graph::JobGraph;
use conveyor::scheduler::{JobState, RunStatus, Scheduler};
use conveyor::workflow::{parse_duration, Workflow};

#[derive(Parser)]
#[command(name = "conveyor")]
#[command(about = "Conveyor - dependency-driven CI/CD pipeline engine")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a pipeline file
    Run {
        /// Path to the pipeline YAML file
        file: String,

        /// Force every job onto this runner backend (local, mock)
        #[arg(short, long)]
        runner: Option<String>,

        /// Maximum jobs running at once (overrides concurrency: in the file)
        #[arg(short, long)]
        concurrency: Option<usize>,

        /// Wall-clock budget for the whole run, e.g. 10m
        #[arg(short, long)]
        timeout: Option<String>,

        /// Extra environment for all jobs, KEY=VALUE (repeatable)
        #[arg(short, long = "env", value_name = "KEY=VALUE")]
        env: Vec<String>,

        /// Write the run's event log as JSON to this path
        #[arg(long, value_name = "PATH")]
        events_out: Option<String>,
    },

    /// Validate a pipeline file (parse and graph checks only)
    Validate {
        /// Path to the pipeline YAML file
        file: String,
    },

    /// Print the job dependency graph in execution order
    Graph {
        /// Path to the pipeline YAML file
        file: String,
    },
}

#[tokio::main]
async fn main() {
    // Load .env file (ignore if not present)
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run {
            file,
            runner,
            concurrency,
            timeout,
            env,
            events_out,
        } => run_pipeline(&file, runner, concurrency, timeout, env, events_out).await,
        Commands::Validate { file } => validate_pipeline(&file),
        Commands::Graph { file } => print_graph(&file),
    };

    match result {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e);
            if let Some(suggestion) = e.fix_suggestion() {
                eprintln!("  {} {}", "Fix:".yellow(), suggestion);
            }
            std::process::exit(1);
        }
    }
}

/// Returns Ok(false) when the run itself failed or was cancelled
async fn run_pipeline(
    file: &str,
    runner_override: Option<String>,
    concurrency: Option<usize>,
    timeout: Option<String>,
    env_pairs: Vec<String>,
    events_out: Option<String>,
) -> Result<bool, EngineError> {
    let yaml = tokio::fs::read_to_string(file).await?;
    let workflow = Workflow::parse(&yaml)?;

    let run_timeout = match timeout {
        Some(ref value) => Some(parse_duration(value).ok_or_else(|| {
            EngineError::InvalidDuration {
                job_id: "(run)".to_string(),
                value: value.clone(),
            }
        })?),
        None => None,
    };

    let mut base_env = workflow.env.clone();
    base_env.extend(parse_env_pairs(&env_pairs));

    println!(
        "{} Running pipeline: {} ({} jobs)",
        "→".cyan(),
        workflow.name.cyan().bold(),
        workflow.jobs.len()
    );

    let events = EventLog::new();
    let executor = JobExecutor::new(ActionRegistry::noop(), events.clone(), base_env.clone())
        .with_runner_override(runner_override);
    let scheduler = Scheduler::new(workflow, executor, events.clone(), base_env)?
        .with_concurrency(concurrency)?
        .with_timeout(run_timeout);

    // Ctrl-C cancels the run; running jobs drain before the report prints
    let cancel = scheduler.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let report = scheduler.run().await?;

    println!();
    for job in &report.jobs {
        let state = match job.state {
            JobState::Succeeded => "✓ succeeded".green(),
            JobState::Failed => "✗ failed".red(),
            JobState::Skipped => "- skipped".yellow(),
            JobState::Cancelled => "! cancelled".red(),
            other => format!("? {:?}", other).normal(),
        };
        print!("  {:<24} {}", job.job_id, state);
        if job.attempts > 1 {
            print!(" ({} attempts)", job.attempts);
        }
        if let Some(ref error) = job.error {
            print!("  {}", error.dimmed());
        }
        println!();
    }

    match report.status {
        RunStatus::Success => println!(
            "\n{} Run completed in {}ms",
            "✓".green().bold(),
            report.duration_ms
        ),
        RunStatus::Failed => println!(
            "\n{} Run failed after {}ms",
            "✗".red().bold(),
            report.duration_ms
        ),
        RunStatus::Cancelled => println!(
            "\n{} Run cancelled after {}ms",
            "!".red().bold(),
            report.duration_ms
        ),
    }

    if let Some(path) = events_out {
        let json = serde_json::to_string_pretty(&events.to_json())
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        fs::write(&path, json)?;
        println!("  Events written to {}", path);
    }

    Ok(report.status == RunStatus::Success)
}

fn validate_pipeline(file: &str) -> Result<bool, EngineError> {
    let yaml = fs::read_to_string(file)?;
    let workflow = Workflow::parse(&yaml)?;

    let graph = JobGraph::from_workflow(&workflow);
    graph.detect_cycles()?;

    let edges: usize = workflow.jobs.iter().map(|j| j.needs_ids().len()).sum();
    println!("{} Pipeline '{}' is valid", "✓".green(), file);
    println!("  Name: {}", workflow.name);
    println!("  Jobs: {}", workflow.jobs.len());
    println!("  Dependencies: {}", edges);
    println!("  Triggers: {:?}", workflow.on.as_vec());
    if let Some(limit) = workflow.concurrency {
        println!("  Concurrency: {}", limit);
    }

    Ok(true)
}

fn print_graph(file: &str) -> Result<bool, EngineError> {
    let yaml = fs::read_to_string(file)?;
    let workflow = Workflow::parse(&yaml)?;

    let graph = JobGraph::from_workflow(&workflow);
    let order = graph.topo_order()?;

    println!("{} Execution order for '{}':", "→".cyan(), workflow.name);
    for (position, job_id) in order.iter().enumerate() {
        let deps = graph.dependencies(job_id);
        if deps.is_empty() {
            println!("  {}. {}", position + 1, job_id.bold());
        } else {
            let needs: Vec<&str> = deps.iter().map(|d| d.as_ref()).collect();
            println!(
                "  {}. {} (needs: {})",
                position + 1,
                job_id.bold(),
                needs.join(", ")
            );
        }
    }

    Ok(true)
}

/// Parse repeated KEY=VALUE flags; malformed entries are ignored
fn parse_env_pairs(pairs: &[String]) -> HashMap<String, String> {
    pairs
        .iter()
        .filter_map(|pair| {
            pair.split_once('=')
                .map(|(k, v)| (k.to_string(), v.to_string()))
        })
        .collect()
}
