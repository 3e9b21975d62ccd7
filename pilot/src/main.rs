//! `pilot`: drive a desktop chat client from a natural-language instruction.
//!
//! The task starts from an initial plan and grows as the vision model suggests
//! follow-up steps; the first failing step stops the run.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::Utc;
use clap::{Parser, Subcommand};

use pilot::bootstrap::{BuildOptions, build_orchestrator, build_planner, load_prompts};
use pilot::core::types::{TaskRecord, TaskStatus};
use pilot::exit_codes;
use pilot::io::config::{PilotConfig, load_config, write_config};
use pilot::io::planning::{Planner, plan_to_json};
use pilot::io::report::{RunReport, write_report};
use pilot::logging;
use pilot::orchestrator::{StepEvent, StepEventStatus};

const DEFAULT_CONFIG: &str = "pilot.toml";

#[derive(Parser)]
#[command(
    name = "pilot",
    version,
    about = "Vision-guided automation for a desktop chat client"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Plan and execute a task.
    Run {
        /// What to do, in plain language.
        instruction: String,
        #[arg(short, long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,
        /// Log actions instead of moving the pointer or typing.
        #[arg(long)]
        dry_run: bool,
        /// Write the final task record as JSON to this path.
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Print the initial plan for an instruction without executing it.
    Plan {
        instruction: String,
        #[arg(short, long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,
    },
    /// Write a config file with default settings.
    InitConfig {
        #[arg(short, long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
    /// Load the config and check that a task could start.
    CheckConfig {
        #[arg(short, long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    logging::init();
    match run(Cli::parse()).await {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

async fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Command::Run {
            instruction,
            config,
            dry_run,
            report,
        } => cmd_run(&instruction, &config, dry_run, report.as_deref()).await,
        Command::Plan {
            instruction,
            config,
        } => cmd_plan(&instruction, &config).await,
        Command::InitConfig { config, force } => cmd_init_config(&config, force),
        Command::CheckConfig { config } => cmd_check_config(&config),
    }
}

async fn cmd_run(
    instruction: &str,
    config_path: &Path,
    dry_run: bool,
    report: Option<&Path>,
) -> Result<i32> {
    let config = load_config(config_path)?;
    let orchestrator = build_orchestrator(&config, BuildOptions { dry_run })?;
    let task = orchestrator
        .start_with(instruction, print_event)
        .await
        .context("start task")?;

    if let Some(path) = report {
        write_report(path, &RunReport::new(task.clone(), Utc::now()))?;
    }
    print_summary(&task);
    Ok(match task.status {
        TaskStatus::Completed => exit_codes::OK,
        _ => exit_codes::FAILED,
    })
}

async fn cmd_plan(instruction: &str, config_path: &Path) -> Result<i32> {
    let config = load_config(config_path)?;
    let prompts = load_prompts(&config)?;
    let planner = build_planner(&config, &prompts)?;
    let steps = planner.plan(instruction).await.context("plan task")?;
    println!(
        "{}",
        serde_json::to_string_pretty(&plan_to_json(&steps)).context("serialize plan")?
    );
    Ok(exit_codes::OK)
}

fn cmd_init_config(path: &Path, force: bool) -> Result<i32> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    write_config(path, &PilotConfig::default())
        .with_context(|| format!("write {}", path.display()))?;
    println!("wrote {}", path.display());
    Ok(exit_codes::OK)
}

fn cmd_check_config(path: &Path) -> Result<i32> {
    let config = load_config(path)?;
    config.api_key()?;
    load_prompts(&config)?;
    println!("{}: ok", path.display());
    Ok(exit_codes::OK)
}

fn print_event(event: &StepEvent) {
    match &event.status {
        StepEventStatus::Completed { inserted: 0 } => {
            println!("[{}/{}] {} ok", event.position, event.total, event.kind);
        }
        StepEventStatus::Completed { inserted } => println!(
            "[{}/{}] {} ok (+{} suggested)",
            event.position, event.total, event.kind, inserted
        ),
        StepEventStatus::Failed { error } => println!(
            "[{}/{}] {} failed: {}",
            event.position, event.total, event.kind, error
        ),
    }
}

fn print_summary(task: &TaskRecord) {
    println!(
        "task {} {} after {} of {} steps",
        task.id,
        task.status.as_str(),
        task.completed_steps().count(),
        task.steps.len()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_run_with_flags() {
        let cli = Cli::parse_from([
            "pilot",
            "run",
            "reply to Li",
            "--dry-run",
            "--report",
            "out.json",
        ]);
        match cli.command {
            Command::Run {
                instruction,
                config,
                dry_run,
                report,
            } => {
                assert_eq!(instruction, "reply to Li");
                assert_eq!(config, PathBuf::from(DEFAULT_CONFIG));
                assert!(dry_run);
                assert_eq!(report, Some(PathBuf::from("out.json")));
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn parse_check_config_with_path() {
        let cli = Cli::parse_from(["pilot", "check-config", "-c", "other.toml"]);
        assert!(
            matches!(cli.command, Command::CheckConfig { config } if config == Path::new("other.toml"))
        );
    }

    #[test]
    fn parse_init_config_force() {
        let cli = Cli::parse_from(["pilot", "init-config", "--force"]);
        assert!(matches!(cli.command, Command::InitConfig { force: true, .. }));
    }
}
