//! Workflow governance CLI.
//!
//! Hosts pipe action requests to `conductor decide` and outcome reports to
//! `conductor outcome`; operators drive Ralph, Maestro, plan approval and
//! crash recovery through the remaining subcommands.

use std::io::Read;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use serde::de::DeserializeOwned;

use conductor::core::types::{ActionRequest, OutcomeFeedback, SessionKey, TaskSize};
use conductor::io::learning::sink_from_config;
use conductor::workspace::Workspace;
use conductor::{
    controller, enforce, exit_codes, feedback, logging, orchestrator, recovery, status, sweep,
};

#[derive(Parser)]
#[command(
    name = "conductor",
    version,
    about = "Phase gating, iteration limits and crash recovery for multi-agent workflows"
)]
struct Cli {
    /// Project directory holding `.conductor/`.
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug, Clone, Default)]
struct SessionArgs {
    /// Session identifier; omitted means the shared legacy partition.
    #[arg(long, env = "CONDUCTOR_SESSION_ID")]
    session: Option<String>,
}

impl SessionArgs {
    fn key(&self) -> SessionKey {
        SessionKey::from_optional(self.session.as_deref())
    }
}

#[derive(Subcommand)]
enum Command {
    /// Read an action request (JSON) on stdin and print the verdict.
    Decide,
    /// Read an outcome report (JSON) on stdin and print retry guidance.
    Outcome,
    /// Ralph implementation loop.
    Ralph {
        #[command(subcommand)]
        command: RalphCommand,
    },
    /// Maestro phase pipeline.
    Maestro {
        #[command(subcommand)]
        command: MaestroCommand,
    },
    /// Plan approval marker.
    Plan {
        #[command(subcommand)]
        command: PlanCommand,
    },
    /// Session lifecycle (crash snapshot on end, resume offers on start).
    Session {
        #[command(subcommand)]
        command: SessionCommand,
    },
    /// Decide on a crash-recovery offer.
    Resume {
        #[command(subcommand)]
        command: ResumeCommand,
    },
    /// Inspect or reset retry ledgers.
    Retry {
        #[command(subcommand)]
        command: RetryCommand,
    },
    /// Print a JSON summary of one session.
    Status(SessionArgs),
    /// Delete expired Ralph/Maestro records across all sessions.
    Sweep {
        /// Report what would be removed without deleting anything.
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Subcommand)]
enum RalphCommand {
    Activate {
        #[command(flatten)]
        session: SessionArgs,
        #[arg(long)]
        story: String,
        /// small, medium or large.
        #[arg(long, default_value = "medium")]
        size: TaskSize,
    },
    Heartbeat(SessionArgs),
    /// Count one iteration.
    Tick(SessionArgs),
    /// Grant a continuation past the iteration limit.
    Continue(SessionArgs),
    Complete(SessionArgs),
    Cancel(SessionArgs),
    Status(SessionArgs),
}

#[derive(Subcommand)]
enum MaestroCommand {
    /// Feed one user utterance through the phase machine.
    Utter {
        #[command(flatten)]
        session: SessionArgs,
        #[arg(required = true, trailing_var_arg = true)]
        text: Vec<String>,
    },
    Status(SessionArgs),
    Cancel(SessionArgs),
}

#[derive(Subcommand)]
enum PlanCommand {
    /// Write the marker that gates direct edits outside Ralph.
    Approve {
        #[command(flatten)]
        session: SessionArgs,
        /// Glob of files covered by the plan; repeatable. None covers everything.
        #[arg(long)]
        scope: Vec<String>,
    },
}

#[derive(Subcommand)]
enum SessionCommand {
    End(SessionArgs),
    Start(SessionArgs),
}

#[derive(Subcommand)]
enum ResumeCommand {
    Accept {
        snapshot_id: String,
        #[command(flatten)]
        session: SessionArgs,
    },
    Discard {
        snapshot_id: String,
        #[command(flatten)]
        session: SessionArgs,
    },
}

#[derive(Subcommand)]
enum RetryCommand {
    List {
        #[command(flatten)]
        session: SessionArgs,
        #[arg(long)]
        task: Option<String>,
    },
    Clear {
        #[command(flatten)]
        session: SessionArgs,
        #[arg(long)]
        task: Option<String>,
    },
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let root = cli.root;
    match cli.command {
        Command::Decide => cmd_decide(root),
        Command::Outcome => cmd_outcome(root),
        Command::Ralph { command } => cmd_ralph(&Workspace::open(root)?, command),
        Command::Maestro { command } => cmd_maestro(&Workspace::open(root)?, command),
        Command::Plan {
            command: PlanCommand::Approve { session, scope },
        } => {
            let ws = Workspace::open(root)?;
            print_json(&enforce::approve_plan(&ws, &session.key(), scope, Utc::now())?)
        }
        Command::Session { command } => cmd_session(&Workspace::open(root)?, command),
        Command::Resume { command } => cmd_resume(&Workspace::open(root)?, command),
        Command::Retry { command } => cmd_retry(&Workspace::open(root)?, command),
        Command::Status(session) => {
            let ws = Workspace::open(root)?;
            print_json(&status::session_summary(&ws, &session.key(), Utc::now()))
        }
        Command::Sweep { dry_run } => {
            let ws = Workspace::open(root)?;
            print_json(&sweep::sweep(&ws, Utc::now(), dry_run)?)
        }
    }
}

fn cmd_decide(root: PathBuf) -> Result<i32> {
    let request: ActionRequest = read_stdin_json("action request")?;
    let now = request.timestamp.unwrap_or_else(Utc::now);
    let ws = Workspace::open_lenient(root);
    let verdict = enforce::decide_request(&ws, &request, now);
    print_json(&verdict)?;
    Ok(if verdict.is_allow() {
        exit_codes::OK
    } else {
        exit_codes::DENY
    })
}

fn cmd_outcome(root: PathBuf) -> Result<i32> {
    let report: OutcomeFeedback = read_stdin_json("outcome report")?;
    let ws = Workspace::open_lenient(root);
    let sink = sink_from_config(&ws.paths, &ws.config.learning);
    let outcome = feedback::record_outcome(&ws, &report, sink.as_ref(), Utc::now())?;
    print_json(&outcome)?;
    Ok(if outcome.is_blocked() {
        exit_codes::BLOCKED
    } else {
        exit_codes::OK
    })
}

fn cmd_ralph(ws: &Workspace, command: RalphCommand) -> Result<i32> {
    let now = Utc::now();
    match command {
        RalphCommand::Activate {
            session,
            story,
            size,
        } => print_json(&controller::activate(ws, &session.key(), &story, size, now)?),
        RalphCommand::Heartbeat(session) => {
            print_flag("alive", controller::heartbeat(ws, &session.key(), now)?)
        }
        RalphCommand::Tick(session) => print_json(&controller::tick(ws, &session.key(), now)?),
        RalphCommand::Continue(session) => print_flag(
            "granted",
            controller::grant_continuation(ws, &session.key(), now)?,
        ),
        RalphCommand::Complete(session) => {
            print_flag("existed", controller::complete(ws, &session.key())?)
        }
        RalphCommand::Cancel(session) => {
            print_flag("existed", controller::cancel(ws, &session.key())?)
        }
        RalphCommand::Status(session) => {
            print_json(&controller::status(ws, &session.key(), now))
        }
    }
}

fn cmd_maestro(ws: &Workspace, command: MaestroCommand) -> Result<i32> {
    let now = Utc::now();
    match command {
        MaestroCommand::Utter { session, text } => print_json(&orchestrator::utter(
            ws,
            &session.key(),
            &text.join(" "),
            now,
        )?),
        MaestroCommand::Status(session) => {
            print_json(&orchestrator::status(ws, &session.key(), now))
        }
        MaestroCommand::Cancel(session) => {
            print_flag("existed", orchestrator::cancel(ws, &session.key())?)
        }
    }
}

fn cmd_session(ws: &Workspace, command: SessionCommand) -> Result<i32> {
    let now = Utc::now();
    match command {
        SessionCommand::End(session) => {
            print_json(&recovery::end_session(ws, &session.key(), now)?)
        }
        SessionCommand::Start(session) => {
            print_json(&recovery::start_session(ws, &session.key())?)
        }
    }
}

fn cmd_resume(ws: &Workspace, command: ResumeCommand) -> Result<i32> {
    let now = Utc::now();
    match command {
        ResumeCommand::Accept {
            snapshot_id,
            session,
        } => print_json(&recovery::resume(ws, &snapshot_id, &session.key(), now)?),
        ResumeCommand::Discard {
            snapshot_id,
            session,
        } => {
            recovery::discard(ws, &snapshot_id, &session.key(), now)?;
            print_flag("discarded", true)
        }
    }
}

fn cmd_retry(ws: &Workspace, command: RetryCommand) -> Result<i32> {
    match command {
        RetryCommand::List { session, task } => print_json(&feedback::list_retries(
            ws,
            &session.key(),
            task.as_deref(),
        )),
        RetryCommand::Clear { session, task } => {
            let cleared = feedback::clear_retries(ws, &session.key(), task.as_deref())?;
            print_json(&serde_json::json!({ "cleared": cleared }))
        }
    }
}

fn read_stdin_json<T: DeserializeOwned>(label: &str) -> Result<T> {
    let mut raw = String::new();
    std::io::stdin()
        .read_to_string(&mut raw)
        .with_context(|| format!("read {label} from stdin"))?;
    serde_json::from_str(&raw).with_context(|| format!("parse {label}"))
}

/// Print `value` as pretty JSON on stdout.
fn print_json<T: Serialize>(value: &T) -> Result<i32> {
    let payload = serde_json::to_string_pretty(value).context("serialize json")?;
    println!("{payload}");
    Ok(exit_codes::OK)
}

fn print_flag(name: &str, value: bool) -> Result<i32> {
    print_json(&serde_json::json!({ name: value }))
}
