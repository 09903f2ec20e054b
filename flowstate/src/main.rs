//! Task and workflow state engine CLI.
//!
//! Every command opens the `.flow/` workspace under `--root`, performs one
//! operation and prints the result as JSON on stdout. Diagnostics go to
//! stderr (see `RUST_LOG`).

use std::io::Read;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use serde_json::{Map, Value, json};

use flowstate::core::batch::BatchOp;
use flowstate::core::breaker::Gate;
use flowstate::core::phase::{NewError, Phase};
use flowstate::core::query::{ListQuery, SortKey, TaskFilter};
use flowstate::core::task::{NewTask, TaskStatus, TestRequirement};
use flowstate::error::FlowError;
use flowstate::exit_codes;
use flowstate::heal::DEFAULT_BREAKER;
use flowstate::io::init::InitOptions;
use flowstate::state::ArchiveOutcome;
use flowstate::workspace::{Workspace, WorkspaceInit};

#[derive(Parser)]
#[command(
    name = "flowstate",
    version,
    about = "Task and workflow state engine for agent-driven development"
)]
struct Cli {
    /// Project root containing `.flow/`.
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.flow/` with default config and an empty index.
    Init {
        /// Rewrite config and `.gitignore` of an existing workspace.
        #[arg(short, long)]
        force: bool,
        /// Also start a session in this phase.
        #[arg(long, value_parser = parse_phase)]
        phase: Option<Phase>,
    },
    /// Create, inspect and move tasks.
    Task {
        #[command(subcommand)]
        command: TaskCommand,
    },
    /// Maintain the task index and workspace metadata.
    Index {
        #[command(subcommand)]
        command: IndexCommand,
    },
    /// Inspect and change the session's phase state.
    State {
        #[command(subcommand)]
        command: StateCommand,
    },
    /// Gate automatic repair attempts with a circuit breaker.
    Heal {
        #[command(subcommand)]
        command: HealCommand,
        /// Breaker name.
        #[arg(long, global = true, default_value = DEFAULT_BREAKER)]
        name: String,
    },
}

#[derive(Subcommand)]
enum TaskCommand {
    /// Create a pending task.
    Create(CreateArgs),
    /// List tasks, lowest priority first.
    List(ListArgs),
    /// Print one task.
    Show { id: String },
    /// pending|failed -> in_progress.
    Start { id: String },
    /// in_progress -> completed.
    Done {
        id: String,
        /// Minutes spent, noted on the task.
        #[arg(long)]
        minutes: Option<u32>,
    },
    /// in_progress -> failed.
    Fail {
        id: String,
        #[arg(long)]
        reason: String,
    },
    /// Append a note.
    Note { id: String, text: String },
    /// Remove a task and its index entry.
    Delete { id: String },
    /// Print the next ready task (exit 2 when there is none).
    Next,
    /// Apply a JSON array of `{kind, taskId, ...}` operations.
    Batch {
        /// File with the operations; `-` reads stdin.
        file: String,
        /// Roll everything back if any operation fails.
        #[arg(long)]
        atomic: bool,
    },
    /// Counts per status.
    Progress,
}

#[derive(Args)]
struct CreateArgs {
    #[arg(long)]
    id: String,
    #[arg(long)]
    description: String,
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    priority: i64,
    /// Estimated minutes.
    #[arg(long)]
    minutes: Option<u32>,
    /// Must equal the id prefix when given.
    #[arg(long)]
    module: Option<String>,
    #[arg(long = "criterion")]
    criteria: Vec<String>,
    #[arg(long = "depends")]
    dependencies: Vec<String>,
    /// Test file pattern the driver should check.
    #[arg(long)]
    test_pattern: Option<String>,
    #[arg(long, requires = "test_pattern")]
    test_required: bool,
}

#[derive(Args)]
struct ListArgs {
    #[arg(long, value_parser = parse_status)]
    status: Option<TaskStatus>,
    #[arg(long)]
    module: Option<String>,
    #[arg(long, allow_negative_numbers = true)]
    priority: Option<i64>,
    /// Only pending tasks whose dependencies are completed.
    #[arg(long)]
    ready: bool,
    #[arg(long, conflicts_with = "no_deps")]
    has_deps: bool,
    #[arg(long)]
    no_deps: bool,
    #[arg(long, default_value = "priority", value_parser = parse_sort)]
    sort: SortKey,
    #[arg(long)]
    limit: Option<usize>,
    #[arg(long, default_value_t = 0)]
    offset: usize,
}

#[derive(Subcommand)]
enum IndexCommand {
    /// Rebuild the index from the task records.
    Rebuild,
    /// Compare the index with the task records (exit 1 on issues).
    Check,
    /// Print or update workspace metadata.
    Meta {
        #[arg(long)]
        goal: Option<String>,
        /// JSON object describing build/test commands.
        #[arg(long)]
        language_config: Option<String>,
    },
}

#[derive(Subcommand)]
enum StateCommand {
    /// Print the phase state.
    Show,
    /// Start a session, or set the phase of the current one.
    Init {
        #[arg(value_parser = parse_phase)]
        phase: Phase,
    },
    /// Move to another phase.
    Phase {
        #[arg(value_parser = parse_phase)]
        phase: Phase,
    },
    /// Print, set or clear the current task.
    Current {
        id: Option<String>,
        #[arg(long, conflicts_with = "id")]
        clear: bool,
    },
    /// Record an error against the current phase.
    Error {
        message: String,
        #[arg(long)]
        task: Option<String>,
        /// JSON details.
        #[arg(long)]
        details: Option<String>,
    },
    /// Remove the phase state.
    Clear,
    /// Move the session into `archive/` (exit 3 when blocked).
    Archive {
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand)]
enum HealCommand {
    /// May a repair be attempted now? (exit 4 when the breaker is open)
    Check,
    /// Report a successful repair.
    Success,
    /// Report a failed repair.
    Failure,
    /// Close the breaker and clear its counters.
    Reset,
    /// Print the breaker.
    Status,
}

fn main() {
    flowstate::logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            if let Some(flow) = err.downcast_ref::<FlowError>() {
                let body = json!({ "error": { "code": flow.code(), "message": flow.to_string() } });
                println!("{body}");
            }
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::ERROR);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Init { force, phase } => {
            let options = WorkspaceInit {
                layout: InitOptions { force },
                phase,
            };
            let ws = Workspace::init(&cli.root, &options).context("initialize workspace")?;
            print_json(&json!({ "initialized": ws.paths().flow_dir }))?;
            Ok(exit_codes::OK)
        }
        Command::Task { command } => cmd_task(&open(&cli.root)?, command),
        Command::Index { command } => cmd_index(&open(&cli.root)?, command),
        Command::State { command } => cmd_state(&open(&cli.root)?, command),
        Command::Heal { command, name } => cmd_heal(&open(&cli.root)?, command, &name),
    }
}

fn open(root: &std::path::Path) -> Result<Workspace> {
    Workspace::open(root).with_context(|| format!("open workspace at {}", root.display()))
}

fn cmd_task(ws: &Workspace, command: TaskCommand) -> Result<i32> {
    let tasks = ws.tasks();
    match command {
        TaskCommand::Create(args) => {
            let spec = NewTask {
                id: args.id,
                module: args.module,
                priority: args.priority,
                estimated_minutes: args.minutes,
                description: args.description,
                acceptance_criteria: args.criteria,
                dependencies: args.dependencies,
                test_requirements: args.test_pattern.map(|pattern| TestRequirement {
                    pattern,
                    required: args.test_required,
                }),
            };
            print_json(&tasks.create_task(spec)?)?;
        }
        TaskCommand::List(args) => {
            let has_dependencies = match (args.has_deps, args.no_deps) {
                (true, _) => Some(true),
                (_, true) => Some(false),
                _ => None,
            };
            let query = ListQuery {
                filter: TaskFilter {
                    status: args.status,
                    module: args.module,
                    priority: args.priority,
                    has_dependencies,
                    ready: args.ready,
                },
                sort: args.sort,
                limit: args.limit,
                offset: args.offset,
            };
            print_json(&tasks.list_tasks(&query)?)?;
        }
        TaskCommand::Show { id } => print_json(&tasks.get_task(&id)?)?,
        TaskCommand::Start { id } => print_json(&tasks.start_task(&id)?)?,
        TaskCommand::Done { id, minutes } => print_json(&tasks.complete_task(&id, minutes)?)?,
        TaskCommand::Fail { id, reason } => print_json(&tasks.fail_task(&id, &reason)?)?,
        TaskCommand::Note { id, text } => print_json(&tasks.add_note(&id, &text)?)?,
        TaskCommand::Delete { id } => {
            tasks.delete_task(&id)?;
            print_json(&json!({ "deleted": id }))?;
        }
        TaskCommand::Next => {
            let next = tasks.next_task()?;
            print_json(&next)?;
            if next.is_none() {
                return Ok(exit_codes::NO_TASK);
            }
        }
        TaskCommand::Batch { file, atomic } => {
            let ops = read_batch(&file)?;
            let outcome = tasks.batch(&ops, atomic)?;
            print_json(&outcome)?;
            if outcome.failed > 0 {
                return Ok(exit_codes::ERROR);
            }
        }
        TaskCommand::Progress => print_json(&tasks.progress()?)?,
    }
    Ok(exit_codes::OK)
}

fn cmd_index(ws: &Workspace, command: IndexCommand) -> Result<i32> {
    let tasks = ws.tasks();
    match command {
        IndexCommand::Rebuild => print_json(&tasks.rebuild_index()?)?,
        IndexCommand::Check => {
            let report = tasks.check_integrity()?;
            print_json(&report)?;
            if !report.ok {
                return Ok(exit_codes::ERROR);
            }
        }
        IndexCommand::Meta {
            goal,
            language_config,
        } => {
            let mut patch = Map::new();
            if let Some(goal) = goal {
                patch.insert("projectGoal".to_string(), Value::String(goal));
            }
            if let Some(raw) = language_config {
                let config: Value =
                    serde_json::from_str(&raw).context("parse --language-config as JSON")?;
                patch.insert("languageConfig".to_string(), config);
            }
            let metadata = if patch.is_empty() {
                tasks.metadata()?
            } else {
                tasks.update_metadata(&patch)?
            };
            print_json(&metadata)?;
        }
    }
    Ok(exit_codes::OK)
}

fn cmd_state(ws: &Workspace, command: StateCommand) -> Result<i32> {
    let state = ws.state();
    match command {
        StateCommand::Show => print_json(&state.get_state()?)?,
        StateCommand::Init { phase } => print_json(&state.initialize_state(phase)?)?,
        StateCommand::Phase { phase } => print_json(&state.transition_phase(phase)?)?,
        StateCommand::Current { id, clear } => {
            let updated = match (id, clear) {
                (Some(id), _) => state.set_current_task(Some(id.as_str()))?,
                (None, true) => state.set_current_task(None)?,
                (None, false) => state.get_state()?,
            };
            print_json(&json!({ "currentTask": updated.current_task }))?;
        }
        StateCommand::Error {
            message,
            task,
            details,
        } => {
            let details = details
                .map(|raw| serde_json::from_str::<Value>(&raw))
                .transpose()
                .context("parse --details as JSON")?;
            let record = state.record_error(NewError {
                message,
                task_id: task,
                details,
            })?;
            print_json(&record)?;
        }
        StateCommand::Clear => print_json(&json!({ "cleared": state.clear_state()? }))?,
        StateCommand::Archive { force } => {
            let outcome = state.archive_session(force)?;
            print_json(&outcome)?;
            if matches!(outcome, ArchiveOutcome::Blocked { .. }) {
                return Ok(exit_codes::ARCHIVE_BLOCKED);
            }
        }
    }
    Ok(exit_codes::OK)
}

fn cmd_heal(ws: &Workspace, command: HealCommand, name: &str) -> Result<i32> {
    let heal = ws.heal();
    match command {
        HealCommand::Check => {
            let gate = heal.check(name)?;
            print_json(&gate)?;
            if matches!(gate, Gate::Rejected { .. }) {
                return Ok(exit_codes::BREAKER_OPEN);
            }
        }
        HealCommand::Success => print_json(&heal.record_success(name)?)?,
        HealCommand::Failure => print_json(&heal.record_failure(name)?)?,
        HealCommand::Reset => print_json(&heal.reset(name)?)?,
        HealCommand::Status => print_json(&heal.status(name)?)?,
    }
    Ok(exit_codes::OK)
}

fn read_batch(file: &str) -> Result<Vec<BatchOp>> {
    let raw = if file == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("read batch from stdin")?;
        buf
    } else {
        std::fs::read_to_string(file).with_context(|| format!("read batch file {file}"))?
    };
    serde_json::from_str(&raw).context("parse batch: expected a JSON array of operations")
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let payload = serde_json::to_string_pretty(value).context("serialize output")?;
    println!("{payload}");
    Ok(())
}

fn parse_phase(raw: &str) -> std::result::Result<Phase, String> {
    Phase::parse(raw).map_err(|err| err.to_string())
}

fn parse_status(raw: &str) -> std::result::Result<TaskStatus, String> {
    TaskStatus::parse(raw).map_err(|err| err.to_string())
}

fn parse_sort(raw: &str) -> std::result::Result<SortKey, String> {
    SortKey::parse(raw).map_err(|err| err.to_string())
}
