#![forbid(unsafe_code)]

//! `debug-bridge`: drive a Node.js or Python debuggee from short-lived
//! commands.
//!
//! `start` spawns a background daemon that owns the debuggee; the other
//! session commands talk to it over a loopback socket and print its reply.
//! `probe` runs a self-contained session in-process.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use tracing_subscriber::{fmt, EnvFilter};

use debug_bridge::daemon::remote::RemoteSession;
use debug_bridge::daemon::server::run_daemon;
use debug_bridge::daemon::spawner::DaemonLauncher;
use debug_bridge::models::stack::StepMode;
use debug_bridge::orchestrator::debug_session::{absolutize, DebugSession};
use debug_bridge::orchestrator::probe::parse_location;
use debug_bridge::report;
use debug_bridge::runtime::RuntimeKind;
use debug_bridge::{AppError, DebugConfig, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    fn as_arg(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Json => "json",
        }
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "debug-bridge",
    about = "Drive Node.js and Python debuggees from the command line",
    version,
    long_about = None
)]
struct Cli {
    /// Path to an optional TOML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Session record location (overrides `session_file` from the config).
    #[arg(long, global = true)]
    session_file: Option<PathBuf>,

    /// Log output format (text or json). Logs always go to stderr.
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Launch a program under the debugger and pause at entry.
    Start {
        /// Program to debug.
        program: PathBuf,
        /// Runtime that executes the program.
        #[arg(long, value_enum)]
        runtime: RuntimeKind,
    },

    /// Set a breakpoint.
    Breakpoint {
        /// Source file.
        file: PathBuf,
        /// 1-based line number.
        line: u32,
    },

    /// Resume until the next breakpoint or program exit.
    Continue,

    /// Execute one step.
    Step {
        /// Step into calls instead of over them.
        #[arg(long)]
        into: bool,
    },

    /// Evaluate an expression in a paused frame.
    Evaluate {
        /// Expression to evaluate.
        expression: String,
        /// Frame index; 0 is the innermost frame.
        #[arg(long)]
        frame: Option<usize>,
    },

    /// Show the call stack.
    Stack,

    /// Show local variables, or the children of a compound variable.
    Variables {
        /// Nested-reference handle from a previous listing.
        #[arg(long)]
        reference: Option<i64>,
    },

    /// Show the session state.
    Status,

    /// Run a program to one line, print stack and locals, then stop.
    Probe {
        /// Location to break at, as `<file>:<line>`.
        target: String,
        /// Program to run; defaults to the probed file.
        #[arg(long)]
        program: Option<PathBuf>,
        /// Runtime that executes the program.
        #[arg(long, value_enum)]
        runtime: RuntimeKind,
    },

    /// End the session and shut the daemon down.
    Stop,

    /// Host a session behind a loopback socket (used internally by `start`).
    #[command(hide = true)]
    Daemon {
        /// Program to debug.
        program: PathBuf,
        /// Runtime that executes the program.
        #[arg(long, value_enum)]
        runtime: RuntimeKind,
    },
}

fn main() -> ExitCode {
    let args = Cli::parse();
    let default_level = if matches!(args.command, Command::Daemon { .. }) {
        "info"
    } else {
        "warn"
    };

    let outcome = init_tracing(args.log_format, default_level).and_then(|()| {
        tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
            .block_on(run(args))
    });

    match outcome {
        Ok(text) => {
            if !text.is_empty() {
                println!("{text}");
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("Error: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Cli) -> Result<String> {
    // ── Load configuration ──────────────────────────────
    let mut config = match &args.config {
        Some(path) => DebugConfig::load_from_path(path)?,
        None => DebugConfig::default(),
    };
    if let Some(path) = &args.session_file {
        config.session_file.clone_from(path);
    }
    debug!(session_file = %config.session_file.display(), "configuration loaded");

    match args.command {
        Command::Daemon { program, runtime } => {
            let shutdown = CancellationToken::new();
            let signal_token = shutdown.clone();
            tokio::spawn(async move {
                shutdown_signal().await;
                info!("shutdown signal received");
                signal_token.cancel();
            });
            run_daemon(config, &program, runtime, shutdown).await?;
            Ok(String::new())
        }
        Command::Probe {
            target,
            program,
            runtime,
        } => {
            let (file, line) = parse_location(&target)?;
            let program = program.unwrap_or_else(|| file.clone());
            let mut session = DebugSession::new(config);
            let probe = session.probe(&program, runtime, &file, line).await?;
            Ok(report::probe(&probe))
        }
        command => {
            let launcher = DaemonLauncher::current_exe(daemon_args(
                args.config.as_deref(),
                &config,
                args.log_format,
            ))?;
            let remote = RemoteSession::new(config, launcher);
            run_remote(&remote, command).await
        }
    }
}

async fn run_remote(remote: &RemoteSession, command: Command) -> Result<String> {
    match command {
        Command::Start { program, runtime } => remote.start(&program, runtime).await,
        Command::Breakpoint { file, line } => remote.add_breakpoint(&file, line).await,
        Command::Continue => remote.resume().await,
        Command::Step { into } => {
            let mode = if into { StepMode::Into } else { StepMode::Over };
            remote.step(mode).await
        }
        Command::Evaluate { expression, frame } => remote.evaluate(&expression, frame).await,
        Command::Stack => remote.stack().await,
        Command::Variables { reference: None } => remote.variables().await,
        Command::Variables {
            reference: Some(reference),
        } => remote.expand(reference).await,
        Command::Status => remote.status().await,
        Command::Stop => remote.stop().await,
        Command::Probe { .. } | Command::Daemon { .. } => Err(AppError::InvalidArgument(
            "command does not use the session daemon".into(),
        )),
    }
}

/// Global options the daemon needs to share this invocation's settings.
fn daemon_args(
    config_path: Option<&Path>,
    config: &DebugConfig,
    log_format: LogFormat,
) -> Vec<OsString> {
    let mut args: Vec<OsString> = Vec::new();
    if let Some(path) = config_path {
        args.push("--config".into());
        args.push(absolutize(path).into());
    }
    args.push("--session-file".into());
    args.push(absolutize(&config.session_file).into());
    args.push("--log-format".into());
    args.push(log_format.as_arg().into());
    args
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                if let Err(err) = ctrl_c.await {
                    tracing::warn!(%err, "ctrl-c signal handler failed");
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat, default_level: &str) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
