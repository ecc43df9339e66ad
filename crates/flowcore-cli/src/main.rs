// crates/flowcore-cli/src/main.rs
// ============================================================================
// Module: Flowcore CLI Entry Point
// Description: Host binary wiring Storage Ports, Scheduler, Runner, Trigger
//              Manager, and the RPC surface into one running process.
// Purpose: The only binary in the workspace that binds a `SystemClock` and
//          touches the filesystem/network directly; everything else stays
//          port-mediated and clock-injected (spec.md "(added) Clock
//          discipline").
// Dependencies: clap, flowcore-config, flowcore-model, flowcore-rpc,
//               flowcore-runner, flowcore-scheduler, flowcore-store-sqlite,
//               flowcore-triggers, toml, tokio, tracing, tracing-subscriber.
// ============================================================================

//! ## Overview
//! `flowcore serve` is the only subcommand that starts the engine; `config
//! show`/`config docs` expose [`flowcore_config`]'s introspection helpers for
//! operators writing a `flowcore.toml`. `command_serve` follows the
//! teacher's pattern: load and validate config, resolve the bind policy,
//! construct the engine on a blocking task, then run the selected RPC
//! transport to completion.

// ============================================================================
// SECTION: Modules
// ============================================================================

mod serve_policy;

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::ArgAction;
use clap::Args;
use clap::Parser;
use clap::Subcommand;
use flowcore_config::FlowcoreConfig;
use flowcore_config::RpcTransport;
use flowcore_model::core::identifiers::OwnerId;
use flowcore_model::core::run::TriggerKind;
use flowcore_model::core::time::Clock;
use flowcore_model::core::time::SystemClock;
use flowcore_model::interfaces::EventStore;
use flowcore_model::interfaces::FlowStore;
use flowcore_model::interfaces::QueueStore;
use flowcore_model::interfaces::RunStore;
use flowcore_model::interfaces::TriggerStore;
use flowcore_model::interfaces::VarStore;
use flowcore_rpc::EventBus;
use flowcore_rpc::HttpState;
use flowcore_rpc::PublishingEventStore;
use flowcore_rpc::RpcDispatcher;
use flowcore_runner::NodePluginRegistry;
use flowcore_runner::RunRunner;
use flowcore_scheduler::RecoveryCoordinator;
use flowcore_scheduler::Scheduler;
use flowcore_scheduler::SchedulerConfig;
use flowcore_store_sqlite::SqliteEngine;
use flowcore_store_sqlite::SqliteStoreConfig;
use flowcore_triggers::TriggerManager;
use flowcore_triggers::handlers::CronHandler;
use flowcore_triggers::handlers::HostEventHandler;
use flowcore_triggers::handlers::IntervalHandler;
use flowcore_triggers::handlers::OneShotHandler;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use crate::serve_policy::BindOutcome;
use crate::serve_policy::enforce_local_only;
use crate::serve_policy::resolve_allow_non_loopback;

// ============================================================================
// SECTION: CLI Types
// ============================================================================

/// Top-level CLI definition.
#[derive(Parser, Debug)]
#[command(name = "flowcore", disable_help_subcommand = true)]
struct Cli {
    /// Selected subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Supported CLI subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Starts the Flowcore engine and its RPC surface.
    Serve(ServeCommand),
    /// Configuration introspection utilities.
    Config {
        /// Selected config subcommand.
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

/// Configuration for the `serve` command.
#[derive(Args, Debug)]
struct ServeCommand {
    /// Optional config file path (defaults to `flowcore.toml` in the
    /// working directory, or built-in defaults if that file is absent).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Allow binding the HTTP transport to a non-loopback address.
    #[arg(long, action = ArgAction::SetTrue)]
    allow_non_loopback: bool,
}

/// Config subcommands.
#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Prints the effective (or default) config as annotated TOML.
    Show {
        /// Optional config file path; prints built-in defaults when absent.
        #[arg(long, value_name = "PATH")]
        config: Option<PathBuf>,
    },
    /// Prints human-readable documentation for every config option.
    Docs,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// CLI error wrapper.
#[derive(Debug, Error)]
#[error("{message}")]
struct CliError {
    /// Human-readable error message.
    message: String,
}

impl CliError {
    /// Constructs a new [`CliError`] from a message.
    fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

/// CLI result alias for fallible operations.
type CliResult<T> = Result<T, CliError>;

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// CLI entry point returning an exit code.
#[tokio::main(flavor = "multi_thread")]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(err) => emit_error(&err.to_string()),
    }
}

/// Executes the CLI command dispatcher.
async fn run() -> CliResult<ExitCode> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Serve(command) => command_serve(command).await,
        Commands::Config { command } => command_config(command),
    }
}

// ============================================================================
// SECTION: Config Command
// ============================================================================

/// Executes the `config` command.
fn command_config(command: ConfigCommand) -> CliResult<ExitCode> {
    match command {
        ConfigCommand::Show { config } => {
            let loaded = FlowcoreConfig::load(config.as_deref())
                .map_err(|err| CliError::new(format!("failed to load config: {err}")))?;
            let rendered = toml::to_string_pretty(&loaded)
                .map_err(|err| CliError::new(format!("failed to render config: {err}")))?;
            write_stdout_line(&rendered)?;
            Ok(ExitCode::SUCCESS)
        }
        ConfigCommand::Docs => {
            let docs = flowcore_config::config_docs_markdown()
                .map_err(|err| CliError::new(format!("failed to render docs: {err}")))?;
            write_stdout_line(&docs)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

// ============================================================================
// SECTION: Serve Command
// ============================================================================

/// Executes the `serve` command: loads config, wires every subsystem, and
/// runs the configured RPC transport until it stops.
async fn command_serve(command: ServeCommand) -> CliResult<ExitCode> {
    let config = FlowcoreConfig::load(command.config.as_deref())
        .map_err(|err| CliError::new(format!("failed to load config: {err}")))?;

    init_logging(&config);

    let allow_non_loopback = resolve_allow_non_loopback(command.allow_non_loopback)
        .map_err(|err| CliError::new(err.to_string()))?;
    let bind_outcome =
        enforce_local_only(&config, allow_non_loopback).map_err(|err| CliError::new(err.to_string()))?;
    warn_if_network_exposed(&bind_outcome);

    let dispatcher =
        build_dispatcher(&config).await.map_err(|err| CliError::new(format!("failed to start engine: {err}")))?;

    match bind_outcome.transport {
        RpcTransport::Stdio => {
            tracing::info!("serving RPC over stdio");
            flowcore_rpc::serve_stdio(dispatcher)
                .await
                .map_err(|err| CliError::new(format!("stdio transport failed: {err}")))?;
        }
        RpcTransport::Http => {
            let addr =
                bind_outcome.bind_addr.ok_or_else(|| CliError::new("http transport requires a bind address"))?;
            tracing::info!(%addr, "serving RPC over http");
            let state = HttpState::new(dispatcher, config.rpc.auth_token.clone());
            flowcore_rpc::http::serve(addr, state)
                .await
                .map_err(|err| CliError::new(format!("http transport failed: {err}")))?;
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// Logs a warning when the `serve` command is about to expose the RPC
/// surface to a non-loopback address.
fn warn_if_network_exposed(bind_outcome: &BindOutcome) {
    if bind_outcome.network_exposed {
        tracing::warn!(
            bind = ?bind_outcome.bind_addr,
            "RPC surface bound to a non-loopback address; ensure the network path is trusted"
        );
    }
}

/// Initializes the global `tracing` subscriber from `config.logging`.
fn init_logging(config: &FlowcoreConfig) {
    let filter = EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if config.logging.json {
        let _ = subscriber.json().try_init();
    } else {
        let _ = subscriber.try_init();
    }
}

// ============================================================================
// SECTION: Engine Wiring
// ============================================================================

/// Builds the SQLite-backed storage ports, runs startup recovery, and wires
/// the Scheduler, Runner, Trigger Manager, and RPC dispatcher over them.
///
/// Returns the shared [`RpcDispatcher`] handed to whichever transport
/// `command_serve` selects.
async fn build_dispatcher(config: &FlowcoreConfig) -> Result<Arc<RpcDispatcher>, String> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let owner = OwnerId::new(format!("flowcore-{}", std::process::id()));

    let sqlite_config = SqliteStoreConfig::new(PathBuf::from(&config.storage.sqlite_path));
    let engine = tokio::task::spawn_blocking(move || SqliteEngine::open(&sqlite_config))
        .await
        .map_err(|err| format!("engine init task panicked: {err}"))?
        .map_err(|err| format!("failed to open storage: {err}"))?;
    let engine = Arc::new(engine);

    let flows: Arc<dyn FlowStore> = engine.clone();
    let runs: Arc<dyn RunStore> = engine.clone();
    let raw_events: Arc<dyn EventStore> = engine.clone();
    let queue: Arc<dyn QueueStore> = engine.clone();
    let vars: Arc<dyn VarStore> = engine.clone();
    let triggers: Arc<dyn TriggerStore> = engine.clone();

    let lease_ttl_ms = i64::try_from(config.queue.lease_ttl_ms).unwrap_or(i64::MAX);
    let recovery = RecoveryCoordinator::new(queue.clone(), runs.clone(), raw_events.clone());
    let report = recovery
        .run(&owner, clock.now(), lease_ttl_ms)
        .map_err(|err| format!("startup recovery failed: {err}"))?;
    tracing::info!(
        cleaned = report.cleaned.len(),
        requeued = report.requeued.len(),
        adopted = report.adopted.len(),
        "startup recovery complete"
    );

    let bus = Arc::new(EventBus::new());
    let events: Arc<dyn EventStore> = Arc::new(PublishingEventStore::new(raw_events, bus.clone()));

    let registry = Arc::new(NodePluginRegistry::new());
    let runner =
        Arc::new(RunRunner::new(flows.clone(), runs.clone(), events.clone(), vars, registry, clock.clone()));

    let scheduler_config = SchedulerConfig {
        max_parallel_runs: config.queue.max_parallel_runs as usize,
        lease_ttl_ms,
        heartbeat_interval_ms: config.queue.heartbeat_interval_ms,
        reclaim_interval_ms: config.queue.heartbeat_interval_ms,
    };
    let scheduler = Scheduler::new(queue.clone(), clock.clone(), owner, runner.clone(), scheduler_config);
    let scheduler_handle = Arc::new(Arc::new(scheduler).spawn());

    let trigger_manager = TriggerManager::builder()
        .handler(Arc::new(CronHandler::new()))
        .handler(Arc::new(IntervalHandler::new()))
        .handler(Arc::new(OneShotHandler::new()))
        .handler(Arc::new(HostEventHandler::new(TriggerKind::UrlMatch)))
        .handler(Arc::new(HostEventHandler::new(TriggerKind::Hotkey)))
        .handler(Arc::new(HostEventHandler::new(TriggerKind::ContextMenu)))
        .handler(Arc::new(HostEventHandler::new(TriggerKind::DomAppearance)))
        .build(
            triggers.clone(),
            runs.clone(),
            queue.clone(),
            events.clone(),
            clock.clone(),
            Some(scheduler_handle.clone()),
        );
    trigger_manager.start().map_err(|err| format!("failed to install triggers: {err}"))?;

    Ok(Arc::new(RpcDispatcher::new(
        flows,
        runs,
        events,
        queue,
        triggers,
        clock,
        scheduler_handle,
        runner,
        trigger_manager,
        bus,
    )))
}

// ============================================================================
// SECTION: Output Helpers
// ============================================================================

/// Writes a single line to stdout.
fn write_stdout_line(message: &str) -> CliResult<()> {
    writeln!(std::io::stdout(), "{message}")
        .map_err(|err| CliError::new(format!("failed to write stdout: {err}")))
}

/// Writes a single line to stderr.
fn write_stderr_line(message: &str) {
    let _ = writeln!(std::io::stderr(), "{message}");
}

/// Emits an error message to stderr and returns a failure exit code.
fn emit_error(message: &str) -> ExitCode {
    write_stderr_line(message);
    ExitCode::FAILURE
}
