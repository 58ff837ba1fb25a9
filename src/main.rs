// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Berth main entry point - CLI and command dispatch.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;
use tracing::warn;

use berth::config::{self, CliOptions, Paths};
use berth::container::DevcontainerCli;
use berth::error::{exit_code_for, BerthError, EXIT_GENERAL, EXIT_SUCCESS};
use berth::inventory::{EntryKind, WorkspaceDescriptor};
use berth::jobs::JobStatus;
use berth::telemetry::{init_telemetry, TelemetryConfig, TelemetryGuard, Verbosity, GLOBAL_METRICS};
use berth::{git, hook, Berth, StartMode, StartRequest, WorkspaceKind};

/// Environment variable holding the agent session id.
const ENV_SESSION_ID: &str = "BERTH_SESSION_ID";

/// Berth - branch-scoped workspaces for coding agent sessions.
#[derive(Parser)]
#[command(name = "berth")]
#[command(author, version, about = "Branch-scoped workspaces for coding agent sessions", long_about = None)]
struct Cli {
    /// Print machine-readable JSON on stdout
    #[arg(long, global = true)]
    json: bool,

    /// Show debug logs and a metrics report on exit
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Show trace output
    #[arg(long, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create (or reuse) a workspace for a branch
    Start {
        /// Branch to work on
        #[arg(required_unless_present = "job_worker")]
        branch: Option<String>,

        /// Repository path (defaults to the current repository)
        #[arg(long)]
        repo: Option<PathBuf>,

        /// Use a host worktree instead of a container clone
        #[arg(long)]
        worktree: bool,

        /// Recreate an existing clone
        #[arg(long)]
        force: bool,

        /// Bind this session to the new workspace
        #[arg(long, env = ENV_SESSION_ID)]
        session: Option<String>,

        /// Return immediately and start the container in the background
        #[arg(long)]
        detach: bool,

        /// Finish a detached container start (internal)
        #[arg(long, hide = true, conflicts_with_all = ["worktree", "force", "detach"])]
        job_worker: Option<PathBuf>,
    },

    /// Stop a workspace's container and release its port
    Stop {
        target: String,
        #[arg(long)]
        repo: Option<String>,
    },

    /// List workspaces
    List {
        /// Only workspaces unused for the configured number of days
        #[arg(long)]
        stale: bool,
    },

    /// Show git and job status for a workspace
    Status {
        target: String,
        #[arg(long)]
        repo: Option<String>,
    },

    /// Run a command in a workspace
    Exec {
        target: String,
        #[arg(long)]
        repo: Option<String>,
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },

    /// Print a workspace path
    Cd {
        target: String,
        #[arg(long)]
        repo: Option<String>,
    },

    /// Bind a session to an existing workspace
    Target {
        branch: String,
        #[arg(long)]
        repo: Option<String>,
        #[arg(long, env = ENV_SESSION_ID)]
        session: String,
    },

    /// Unbind a session
    Off {
        #[arg(long, env = ENV_SESSION_ID)]
        session: String,
    },

    /// Release ports of dead containers and drop old jobs and orphaned sessions
    Prune,

    /// Delete a workspace
    Rm {
        target: String,
        #[arg(long)]
        repo: Option<String>,
        /// Delete even with uncommitted or unpushed work
        #[arg(long)]
        force: bool,
    },

    /// List container start jobs
    Jobs,

    /// Pre-command hook: reads a tool call on stdin, prints a rewrite on stdout
    Hook,

    /// Show configuration
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show resolved configuration and state paths
    Show,
}

#[tokio::main]
async fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => exit_on_parse_error(e, std::env::args().any(|a| a == "--json")),
    };
    let _guard = init_logging(&cli);
    let json = cli.json;
    let verbose = cli.verbose;

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            report_error(&e, json);
            exit_code_for(&e)
        }
    };

    if verbose {
        eprintln!("{}", GLOBAL_METRICS.snapshot().format_report());
    }
    std::process::exit(code);
}

/// Usage errors honor `--json`: the same error object as any other failure.
fn exit_on_parse_error(err: clap::Error, json: bool) -> ! {
    use clap::error::ErrorKind;
    let informational = matches!(
        err.kind(),
        ErrorKind::DisplayHelp
            | ErrorKind::DisplayVersion
            | ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
    );
    if !json || informational {
        err.exit();
    }
    let berth_err = parse_error(&err);
    println!("{}", berth_err.to_json());
    std::process::exit(berth_err.exit_code());
}

fn parse_error(err: &clap::Error) -> BerthError {
    let rendered = err.to_string();
    let message = rendered
        .lines()
        .next()
        .unwrap_or_default()
        .trim_start_matches("error: ")
        .to_string();
    BerthError::validation(message)
}

fn init_logging(cli: &Cli) -> Option<TelemetryGuard> {
    let verbosity = if cli.trace {
        Verbosity::Trace
    } else if cli.verbose {
        Verbosity::Verbose
    } else {
        Verbosity::Quiet
    };
    let plain = cli.json || matches!(cli.command, Commands::Hook);
    let config = TelemetryConfig::new(verbosity).with_ansi(!plain);
    init_telemetry(&config).ok()
}

fn report_error(err: &anyhow::Error, json: bool) {
    let berth_err = err.downcast_ref::<BerthError>();
    if json {
        let value = match berth_err {
            Some(e) => e.to_json(),
            None => serde_json::json!({
                "success": false,
                "error": {
                    "code": "error",
                    "message": format!("{err:#}"),
                    "exitCode": EXIT_GENERAL,
                }
            }),
        };
        println!("{value}");
        return;
    }

    eprintln!("{} {:#}", "error:".red().bold(), err);
    if let Some(BerthError::Ambiguous { matches, .. }) = berth_err {
        for path in matches {
            eprintln!("  {}", path.display());
        }
    }
    if let Some(hint) = berth_err.and_then(BerthError::hint) {
        eprintln!("{}", hint.dimmed());
    }
}

/// Print `{"success": true, ...value}`.
fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let mut out = serde_json::json!({ "success": true });
    match serde_json::to_value(value)? {
        Value::Object(fields) => {
            if let Some(obj) = out.as_object_mut() {
                obj.extend(fields);
            }
        }
        other => out["data"] = other,
    }
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

/// Repository root for the current directory, falling back to the directory itself.
async fn current_root() -> anyhow::Result<PathBuf> {
    let cwd = std::env::current_dir()?;
    Ok(git::repo_root(&cwd).await.unwrap_or(cwd))
}

async fn open_berth() -> anyhow::Result<Berth> {
    let root = current_root().await?;
    let config = config::load_config(&root, CliOptions::default())?;
    let runtime = Arc::new(DevcontainerCli::from_config(&config));
    Ok(Berth::open(config, Paths::from_env(), runtime).await)
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    let json = cli.json;
    match cli.command {
        Commands::Start {
            branch,
            repo,
            worktree,
            force,
            session,
            detach,
            job_worker,
        } => {
            let berth = open_berth().await?;
            if let Some(workspace) = job_worker {
                let job = berth.complete_job(&workspace).await?;
                if json {
                    print_json(&job)?;
                }
                return Ok(EXIT_SUCCESS);
            }
            let Some(branch) = branch else {
                return Err(BerthError::validation("a branch is required").into());
            };
            let repo_root = match repo {
                Some(path) => git::repo_root(&path).await?,
                None => git::repo_root(&std::env::current_dir()?).await?,
            };
            let mode = if detach {
                StartMode::Detach
            } else {
                StartMode::Wait(Duration::from_secs(
                    berth.config().interactive_budget_seconds,
                ))
            };
            let kind = if worktree {
                WorkspaceKind::Worktree
            } else {
                WorkspaceKind::ContainerClone
            };
            start(
                &berth,
                StartRequest {
                    repo_root,
                    branch,
                    kind,
                    force,
                    session,
                    mode,
                },
                json,
            )
            .await
        }

        Commands::Stop { target, repo } => {
            let berth = open_berth().await?;
            let report = berth.stop(&target, repo.as_deref()).await?;
            if json {
                print_json(&report)?;
            } else {
                println!("{} {}", "Stopped".green(), report.workspace.display());
                if let Some(port) = report.port {
                    println!("  released port {port}");
                }
            }
            Ok(EXIT_SUCCESS)
        }

        Commands::List { stale } => {
            let berth = open_berth().await?;
            let workspaces = if stale {
                berth.inventory().find_stale(berth.config().stale_days).await?
            } else {
                berth.inventory().list_all().await?
            };
            if json {
                print_json(&serde_json::json!({ "workspaces": workspaces }))?;
            } else if workspaces.is_empty() {
                println!("{}", "No workspaces".dimmed());
            } else {
                for ws in &workspaces {
                    print_descriptor(ws);
                }
            }
            Ok(EXIT_SUCCESS)
        }

        Commands::Status { target, repo } => {
            let berth = open_berth().await?;
            let ws = berth.resolve_target(&target, repo.as_deref()).await?;
            let status = berth.inventory().status(&ws.path).await;
            let job = berth.jobs().get(&ws.path).await?;
            let port = berth.ports().table().get(&ws.path).await?;
            if json {
                print_json(&serde_json::json!({
                    "workspace": ws,
                    "status": status,
                    "job": job,
                    "port": port,
                }))?;
            } else {
                print_descriptor(&ws);
                if status.is_git {
                    let clean = if status.clean {
                        "clean".green()
                    } else {
                        "uncommitted changes".yellow()
                    };
                    println!("  git: {clean}, {} commit(s) not pushed", status.ahead);
                }
                if let Some(port) = port {
                    println!("  port: {port}");
                }
                if let Some(job) = job {
                    println!("  job: {}", colored_status(job.status));
                    if let Some(err) = &job.error {
                        println!("  error: {}", err.red());
                    }
                }
            }
            Ok(EXIT_SUCCESS)
        }

        Commands::Exec {
            target,
            repo,
            command,
        } => {
            let berth = open_berth().await?;
            let command = match command.as_slice() {
                [single] => single.clone(),
                words => shell_words::join(words),
            };
            let (tx, rx) = watch::channel(false);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    let _ = tx.send(true);
                }
            });
            let output = berth.exec(&target, repo.as_deref(), &command, rx).await?;
            if json {
                print_json(&output)?;
            } else {
                print!("{}", output.stdout);
                eprint!("{}", output.stderr);
            }
            Ok(output.exit_code)
        }

        Commands::Cd { target, repo } => {
            let berth = open_berth().await?;
            let path = berth.cd(&target, repo.as_deref()).await?;
            if json {
                print_json(&serde_json::json!({ "path": path }))?;
            } else {
                println!("{}", path.display());
            }
            Ok(EXIT_SUCCESS)
        }

        Commands::Target {
            branch,
            repo,
            session,
        } => {
            let berth = open_berth().await?;
            let binding = berth.target(&session, &branch, repo.as_deref()).await?;
            if json {
                print_json(&binding)?;
            } else {
                let ws = binding
                    .workspace
                    .as_deref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default();
                println!("{} {} -> {}", "Targeted".green(), session.bold(), ws);
                if binding.starting {
                    println!("  {}", "container still starting".yellow());
                }
            }
            Ok(EXIT_SUCCESS)
        }

        Commands::Off { session } => {
            let berth = open_berth().await?;
            berth.off(&session).await?;
            if json {
                print_json(&serde_json::json!({ "session": session }))?;
            } else {
                println!("{} {}", "Unbound".green(), session.bold());
            }
            Ok(EXIT_SUCCESS)
        }

        Commands::Prune => {
            let berth = open_berth().await?;
            let report = berth.prune().await?;
            if json {
                print_json(&report)?;
            } else {
                for a in &report.ports {
                    println!("released port {} ({})", a.port, a.workspace.display());
                }
                for job in &report.abandoned {
                    println!(
                        "failed abandoned start ({}): {}",
                        job.workspace.display(),
                        job.error.as_deref().unwrap_or("unknown")
                    );
                }
                println!(
                    "{} {} port(s), {} job(s), {} session(s)",
                    "Pruned".green(),
                    report.ports.len(),
                    report.jobs.len(),
                    report.sessions.len()
                );
            }
            Ok(EXIT_SUCCESS)
        }

        Commands::Rm {
            target,
            repo,
            force,
        } => {
            let berth = open_berth().await?;
            let report = berth.remove(&target, repo.as_deref(), force).await?;
            if json {
                print_json(&report)?;
            } else {
                println!("{} {}", "Removed".green(), report.workspace.display());
                for session in &report.unbound_sessions {
                    println!("  unbound session {session}");
                }
            }
            Ok(EXIT_SUCCESS)
        }

        Commands::Jobs => {
            let berth = open_berth().await?;
            let jobs = berth.jobs().list().await?;
            if json {
                print_json(&serde_json::json!({ "jobs": jobs }))?;
            } else if jobs.is_empty() {
                println!("{}", "No jobs".dimmed());
            } else {
                for job in &jobs {
                    let port = job.port.map(|p| format!(" :{p}")).unwrap_or_default();
                    println!(
                        "{:<10} {}{} ({})",
                        colored_status(job.status),
                        job.workspace.display(),
                        port,
                        job.updated_at.format("%Y-%m-%d %H:%M:%S")
                    );
                }
            }
            Ok(EXIT_SUCCESS)
        }

        Commands::Hook => {
            // Never block the agent: any failure lets the command through.
            let berth = match open_berth().await {
                Ok(berth) => berth,
                Err(e) => {
                    warn!(error = %e, "Hook setup failed");
                    return Ok(EXIT_SUCCESS);
                }
            };
            if let Err(e) = hook::run_hook(berth.router(), std::io::stdin(), std::io::stdout()).await {
                warn!(error = %e, "Hook failed");
            }
            Ok(EXIT_SUCCESS)
        }

        Commands::Config { action } => match action {
            Some(ConfigAction::Show) | None => {
                let root = current_root().await?;
                let config = config::load_config(&root, CliOptions::default())?;
                print_json(&serde_json::json!({
                    "config": config,
                    "paths": Paths::from_env(),
                }))?;
                Ok(EXIT_SUCCESS)
            }
        },
    }
}

async fn start(berth: &Berth, request: StartRequest, json: bool) -> anyhow::Result<i32> {
    let outcome = berth.start(request).await?;
    let mut report = outcome.report;

    if outcome.needs_worker {
        let pid = berth.spawn_job_worker(&report.workspace)?;
        tracing::debug!(pid, "Detached job worker started");
    }

    if let Some(background) = outcome.background {
        if !json {
            print_start(&report);
        }
        // The process must outlive the container start; keep the user informed.
        let spinner = (!json).then(|| spinner("Waiting for container..."));
        let result = background.await;
        if let Some(spinner) = spinner {
            spinner.finish_and_clear();
        }
        match result {
            Ok(Ok(())) => report.status = Some(JobStatus::Completed),
            Ok(Err(e)) => return Err(e.into()),
            Err(e) => return Err(BerthError::provisioning("task", e.to_string()).into()),
        }
        if !json {
            println!("{} container ready", "✓".green());
            return Ok(EXIT_SUCCESS);
        }
    }

    if json {
        print_json(&report)?;
    } else {
        print_start(&report);
    }
    Ok(EXIT_SUCCESS)
}

fn spinner(message: &str) -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg} {elapsed}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    bar.set_message(message.to_string());
    bar.enable_steady_tick(Duration::from_millis(120));
    bar
}

fn print_start(report: &berth::StartReport) {
    let verb = if report.created { "Created" } else { "Reusing" };
    println!(
        "{} {} {} ({}/{})",
        verb.green(),
        report.kind,
        report.workspace.display().to_string().bold(),
        report.repo,
        report.branch
    );
    if report.copied > 0 {
        println!("  copied {} gitignored file(s)", report.copied);
    }
    if let Some(port) = report.port {
        println!("  port: {port}");
    }
    if let Some(status) = report.status {
        println!("  container: {}", colored_status(status));
    }
    if let Some(session) = &report.session {
        println!("  session: {session}");
    }
    if let Some(main) = &report.main_repo {
        println!("  main repo: {}", main.display());
    }
}

fn print_descriptor(ws: &WorkspaceDescriptor) {
    let kind = match ws.kind {
        EntryKind::Clone => "clone".cyan(),
        EntryKind::Worktree => "worktree".blue(),
        EntryKind::OrphanSession => "orphan".red(),
    };
    let name = format!("{}/{}", ws.repo, ws.branch);
    print!("{:<9} {:<32} {}", kind, name.bold(), display_path(&ws.path));
    if let Some(port) = ws.port {
        print!("  :{port}");
    }
    if !ws.sessions.is_empty() {
        print!("  [{}]", ws.sessions.join(", "));
    }
    if ws.has_uncommitted == Some(true) {
        print!("  {}", "uncommitted".yellow());
    }
    println!();
}

fn display_path(path: &Path) -> String {
    match dirs::home_dir().and_then(|home| path.strip_prefix(home).ok().map(Path::to_path_buf)) {
        Some(rel) => format!("~/{}", rel.display()),
        None => path.display().to_string(),
    }
}

fn colored_status(status: JobStatus) -> colored::ColoredString {
    match status {
        JobStatus::Pending => status.as_str().dimmed(),
        JobStatus::Running => status.as_str().yellow(),
        JobStatus::Completed => status.as_str().green(),
        JobStatus::Failed => status.as_str().red(),
    }
}
