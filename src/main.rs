//! Opflow CLI - workflow automation engine

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use colored::Colorize;

use opflow::ast::{find_template, templates};
use opflow::event::{ActivityFilter, Severity};
use opflow::util::SETTLE_POLL_INTERVAL;
use opflow::{
    Engine, FixSuggestion, MockProvider, MockReply, OpflowConfig, OpflowError, StepStatus,
    Target, Workflow, WorkflowSpec, WorkflowStatus,
};

#[derive(Parser)]
#[command(name = "opflow")]
#[command(about = "Opflow - workflow automation engine for post-exploitation playbooks")]
#[command(version)]
struct Cli {
    /// Config file (default: ~/.config/opflow/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a workflow file (parse + step checks)
    Validate {
        /// Path to a YAML workflow
        file: PathBuf,
    },

    /// List built-in templates, or show one
    Templates {
        /// Template id
        id: Option<String>,
    },

    /// Run a workflow file against the mock target provider
    Rehearse {
        /// Path to a YAML workflow
        file: PathBuf,

        /// Target session id
        #[arg(long)]
        session: Option<u32>,

        /// Target host
        #[arg(long)]
        host: Option<String>,

        /// Make this command (or module path) fail; repeatable
        #[arg(long = "fail-command")]
        fail_command: Vec<String>,

        /// Give up waiting after this many seconds
        #[arg(long, default_value_t = 600)]
        timeout: u64,
    },

    /// List stored workflows
    List {
        /// Only workflows with this status
        #[arg(long)]
        status: Option<WorkflowStatus>,
    },

    /// Show one stored workflow
    Show {
        id: String,
    },

    /// Park runs left `running` by a crashed process as `paused`
    ///
    /// Only run this while no other opflow process uses the same data dir.
    Recover,

    /// Tail the activity log
    Activity {
        #[arg(short, long, default_value_t = 20)]
        limit: usize,

        /// Only entries for this workflow
        #[arg(long)]
        workflow: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    // Load .env file (ignore if not present)
    let _ = dotenvy::dotenv();

    // Initialize tracing (stderr keeps stdout for command output)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Validate { file } => validate_workflow(&file),
        Commands::Templates { id } => show_templates(id.as_deref()),
        Commands::Rehearse {
            file,
            session,
            host,
            fail_command,
            timeout,
        } => {
            let target = Target { session, host };
            rehearse(
                cli.config.as_deref(),
                &file,
                target,
                fail_command,
                Duration::from_secs(timeout),
            )
            .await
        }
        Commands::List { status } => list_workflows(cli.config.as_deref(), status).await,
        Commands::Show { id } => show_workflow(cli.config.as_deref(), &id).await,
        Commands::Recover => recover_runs(cli.config.as_deref()).await,
        Commands::Activity { limit, workflow } => {
            show_activity(cli.config.as_deref(), limit, workflow).await
        }
    };

    if let Err(e) = result {
        eprintln!("{} {}", "Error:".red().bold(), e);
        if let Some(suggestion) = e.fix_suggestion() {
            eprintln!("  {} {}", "Fix:".yellow(), suggestion);
        }
        std::process::exit(1);
    }
}

fn load_config(path: Option<&Path>) -> Result<OpflowConfig, OpflowError> {
    match path {
        Some(path) => OpflowConfig::load_from(path)?.with_env()?.validated(),
        None => OpflowConfig::load(),
    }
}

async fn open_engine(config_path: Option<&Path>, mock: MockProvider) -> Result<Engine, OpflowError> {
    let config = load_config(config_path)?;
    Engine::open(&config, Arc::new(mock)).await
}

fn read_spec(file: &Path) -> Result<WorkflowSpec, OpflowError> {
    let yaml = std::fs::read_to_string(file)?;
    WorkflowSpec::from_yaml(&yaml)
}

fn validate_workflow(file: &Path) -> Result<(), OpflowError> {
    let workflow = Workflow::from_spec(read_spec(file)?)?;

    println!("{} Workflow '{}' is valid", "✓".green(), file.display());
    println!("  Name: {}", workflow.name);
    println!("  Target: {}", workflow.target);
    println!("  Steps: {}", workflow.steps.len());
    for (i, step) in workflow.steps.iter().enumerate() {
        println!(
            "    {}. {} {}{}",
            i + 1,
            format!("[{}]", step.kind()).cyan(),
            step.name,
            if step.continue_on_fail {
                " (continue on fail)".dimmed().to_string()
            } else {
                String::new()
            }
        );
    }
    Ok(())
}

fn show_templates(id: Option<&str>) -> Result<(), OpflowError> {
    match id {
        None => {
            for template in templates() {
                println!(
                    "{:<24} {} ({} steps)",
                    template.id.cyan().bold(),
                    template.name,
                    template.steps.len()
                );
            }
        }
        Some(id) => {
            let template = find_template(id)?;
            println!("{} {}", template.name.bold(), format!("({})", template.id).dimmed());
            println!("  {}", template.description);
            let yaml = serde_yaml::to_string(&template.steps)?;
            println!("{}", yaml);
        }
    }
    Ok(())
}

async fn rehearse(
    config_path: Option<&Path>,
    file: &Path,
    target: Target,
    failing: Vec<String>,
    timeout: Duration,
) -> Result<(), OpflowError> {
    let mut spec = read_spec(file)?;
    if !target.is_empty() {
        spec.target = target;
    }

    let mock = MockProvider::new();
    for subject in failing {
        mock.set_reply(subject.clone(), MockReply::Error(format!("{} failed (rehearsal)", subject)));
    }

    let engine = open_engine(config_path, mock).await?;
    let workflow = engine.create_workflow(spec).await?;
    println!(
        "{} Rehearsing '{}' ({} steps) against {}",
        "→".cyan(),
        workflow.name.bold(),
        workflow.steps.len(),
        workflow.target
    );
    engine.run(&workflow.id).await?;

    let deadline = tokio::time::Instant::now() + timeout;
    let mut printed = 0;
    let settled = loop {
        let current = engine.get_workflow(&workflow.id).await?;
        for result in current.results.iter().skip(printed) {
            if result.status == StepStatus::Running {
                break;
            }
            print_result(result, current.steps.len());
            printed += 1;
        }
        if !current.is_running() {
            break current;
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(OpflowError::Timeout {
                operation: format!("rehearsal of '{}'", current.name),
                duration_ms: timeout.as_millis() as u64,
            });
        }
        tokio::time::sleep(SETTLE_POLL_INTERVAL).await;
    };

    match settled.status {
        WorkflowStatus::Completed => {
            println!("{} Workflow completed", "✓".green().bold());
            Ok(())
        }
        status => Err(OpflowError::Execution {
            reason: format!(
                "workflow {} at step {}: {}",
                status,
                settled.current_step + 1,
                settled.error.as_deref().unwrap_or("-")
            ),
        }),
    }
}

fn print_result(result: &opflow::StepResult, total: usize) {
    let marker = match result.status {
        StepStatus::Success => "✓".green(),
        StepStatus::Failed => "✗".red(),
        StepStatus::Running => "…".yellow(),
    };
    let detail = match &result.error {
        Some(error) => error.red().to_string(),
        None => result.output.dimmed().to_string(),
    };
    println!(
        "  {} [{}/{}] {} ({}) {}",
        marker,
        result.step_index + 1,
        total,
        result.step_name,
        result.kind,
        detail
    );
}

async fn list_workflows(
    config_path: Option<&Path>,
    status: Option<WorkflowStatus>,
) -> Result<(), OpflowError> {
    let engine = open_engine(config_path, MockProvider::new()).await?;
    let workflows = engine.list_workflows(status).await?;
    if workflows.is_empty() {
        println!("No workflows");
        return Ok(());
    }
    for wf in workflows {
        println!(
            "{}  {:<10} {:>3} steps  {}",
            wf.id.dimmed(),
            wf.status.to_string().cyan(),
            wf.steps.len(),
            wf.name
        );
    }
    Ok(())
}

async fn show_workflow(config_path: Option<&Path>, id: &str) -> Result<(), OpflowError> {
    let engine = open_engine(config_path, MockProvider::new()).await?;
    let workflow = engine.get_workflow(id).await?;
    println!("{}", serde_json::to_string_pretty(&workflow)?);
    Ok(())
}

async fn recover_runs(config_path: Option<&Path>) -> Result<(), OpflowError> {
    let engine = open_engine(config_path, MockProvider::new()).await?;
    let recovered = engine.recover().await?;
    if recovered == 0 {
        println!("No interrupted runs");
    } else {
        println!("{} Parked {} interrupted run(s) as paused", "✓".green(), recovered);
    }
    Ok(())
}

async fn show_activity(
    config_path: Option<&Path>,
    limit: usize,
    workflow: Option<String>,
) -> Result<(), OpflowError> {
    let engine = open_engine(config_path, MockProvider::new()).await?;
    let filter = ActivityFilter {
        workflow_id: workflow,
        ..Default::default()
    };
    for event in engine.list_activity(limit, Some(&filter)) {
        let severity = match event.severity {
            Severity::Success => event.severity.as_str().green(),
            Severity::Warning => event.severity.as_str().yellow(),
            Severity::Error => event.severity.as_str().red(),
            Severity::Info => event.severity.as_str().normal(),
        };
        println!(
            "{} {:<8} {}",
            event.timestamp.format("%Y-%m-%d %H:%M:%S").to_string().dimmed(),
            severity,
            event.message
        );
    }
    Ok(())
}
