//! Top-level CLI definition and dispatch.

use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use colored::{Colorize, control};
use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;

use iothrottle::cli::signals::StopSignal;
use iothrottle::cli::simulate::{SimulationConfig, SimulationReport, run_simulation};
use iothrottle::core::config::ThrottleConfig;
use iothrottle::core::errors::{self, ThrottleError};
use iothrottle::facade::probe::{ExistenceProbe, MemoryProbe};
use iothrottle::facade::throttle::IoThrottle;
use iothrottle::idle::context::IdleContext;
use iothrottle::idle::escape::ThreadStateEscapeHatch;

/// iothrottle: adaptive idle-I/O throttle with a file-existence hint cache.
#[derive(Debug, Parser)]
#[command(
    name = "iothrottle",
    author,
    version,
    about = "Adaptive idle-I/O throttle and file-existence hint cache",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Override config file path.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Force JSON output mode.
    #[arg(long, global = true)]
    json: bool,
    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Run a synthetic idle-vs-priority workload and report throttle behavior.
    Simulate(SimulateArgs),
    /// Probe paths, cache the result, and reconcile an existence belief.
    Probe(ProbeArgs),
    /// View configuration state.
    Config(ConfigArgs),
}

#[derive(Debug, Clone, Args, Serialize)]
struct SimulateArgs {
    /// Number of idle (background) workers.
    #[arg(long, default_value_t = 4, value_name = "N")]
    idle_workers: usize,
    /// Number of priority (foreground) workers.
    #[arg(long, default_value_t = 1, value_name = "N")]
    priority_workers: usize,
    /// Run time in milliseconds.
    #[arg(long, default_value_t = 2_000, value_name = "MS")]
    duration_ms: u64,
    /// Load ceiling for the idle region.
    #[arg(long, default_value_t = 8, value_name = "LOAD")]
    ceiling: u64,
    /// Accesses per priority section.
    #[arg(long, default_value_t = 16, value_name = "N")]
    burst: u64,
    /// Size of the virtual file set.
    #[arg(long, default_value_t = 64, value_name = "N")]
    files: usize,
    /// Upper bound on the pause between priority sections, in milliseconds.
    #[arg(long, default_value_t = 50, value_name = "MS")]
    jitter_ms: u64,
    /// Seed for reproducible workloads.
    #[arg(long, value_name = "SEED")]
    seed: Option<u64>,
}

#[derive(Debug, Clone, Args, Serialize)]
struct ProbeArgs {
    /// Paths to probe.
    #[arg(value_name = "PATH", required = true)]
    paths: Vec<PathBuf>,
    /// Existence belief to reconcile against after probing.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set, value_name = "BOOL")]
    expect: bool,
}

#[derive(Debug, Clone, Args, Serialize, Default)]
struct ConfigArgs {
    /// Config operation to run.
    #[command(subcommand)]
    command: Option<ConfigCommand>,
}

#[derive(Debug, Clone, Subcommand, Serialize)]
enum ConfigCommand {
    /// Print resolved config file path.
    Path,
    /// Print effective merged configuration.
    Show,
    /// Validate configuration and exit.
    Validate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

/// CLI error type with explicit exit-code mapping.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid user input at runtime.
    #[error("{0}")]
    User(String),
    /// Environment/runtime failure.
    #[error("{0}")]
    Runtime(String),
    /// JSON serialization failed.
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    /// Output write failed.
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    /// Process exit code contract for the CLI.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::User(_) => 1,
            Self::Runtime(_) | Self::Io(_) => 2,
            Self::Json(_) => 3,
        }
    }
}

impl From<ThrottleError> for CliError {
    fn from(err: ThrottleError) -> Self {
        match err {
            ThrottleError::InvalidConfig { .. }
            | ThrottleError::MissingConfig { .. }
            | ThrottleError::ConfigParse { .. } => Self::User(err.to_string()),
            other => Self::Runtime(other.to_string()),
        }
    }
}

/// Dispatch CLI commands.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color {
        control::set_override(false);
    }

    match &cli.command {
        Command::Simulate(args) => run_simulate(cli, args),
        Command::Probe(args) => run_probe(cli, args),
        Command::Config(args) => run_config(cli, args),
    }
}

// ──────────────────── simulate ────────────────────

fn run_simulate(cli: &Cli, args: &SimulateArgs) -> Result<(), CliError> {
    let config = ThrottleConfig::load(cli.config.as_deref())?;
    let probe = Arc::new(MemoryProbe::new());
    let throttle = Arc::new(
        IoThrottle::builder()
            .config(config)
            .probe(Arc::clone(&probe) as Arc<dyn ExistenceProbe>)
            .escape_hatch(Arc::new(ThreadStateEscapeHatch))
            .build()?,
    );

    let sim = SimulationConfig {
        idle_workers: args.idle_workers,
        priority_workers: args.priority_workers,
        duration: Duration::from_millis(args.duration_ms),
        ceiling: args.ceiling,
        burst: args.burst,
        files: args.files,
        max_jitter: Duration::from_millis(args.jitter_ms),
        seed: args.seed,
    };
    let stop = StopSignal::register();
    let report = run_simulation(&throttle, &probe, &sim, &stop);
    throttle.shutdown("simulation finished")?;
    let report = report?;

    match output_mode(cli) {
        OutputMode::Human => print_simulation_human(&report),
        OutputMode::Json => {
            let payload = json!({
                "command": "simulate",
                "args": serde_json::to_value(args)?,
                "report": serde_json::to_value(&report)?,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn print_simulation_human(report: &SimulationReport) {
    let stats = &report.stats;
    println!("{}", "Simulation complete".bold());
    if report.stopped_by_signal {
        println!("  {}", "stopped early by signal".yellow());
    }
    println!("  Elapsed:            {} ms", report.elapsed_ms);
    println!("  Idle ops:           {}", report.idle_ops);
    println!("  Priority ops:       {}", report.priority_ops);
    println!("  Priority sections:  {}", report.priority_sections);
    println!("  Idle cancelled:     {}", report.idle_workers_cancelled);
    println!("  Impeached beliefs:  {}", report.impeached);
    println!("  Final load:         {}", stats.load);
    println!(
        "  Idle waits/sleeps:  {}/{}",
        stats.idle_waits, stats.idle_sleeps
    );
    println!("  Escapes:            {}", stats.escapes);
    println!(
        "  Hints:              {} recorded, {} ambiguous, {} cached",
        stats.hints_recorded, stats.ambiguous_merges, stats.cached_hints
    );
    println!(
        "  Evictions:          {} hard, {} soft",
        stats.hard_evictions, stats.soft_evictions
    );
}

// ──────────────────── probe ────────────────────

#[derive(Debug, Serialize)]
struct ProbeResult {
    path: String,
    file_id: String,
    exists: bool,
    impeached: bool,
}

fn run_probe(cli: &Cli, args: &ProbeArgs) -> Result<(), CliError> {
    let config = ThrottleConfig::load(cli.config.as_deref())?;
    let throttle = IoThrottle::new(config)?;

    let root = IdleContext::root();
    let results = args
        .paths
        .iter()
        .map(|path| {
            let exists = throttle.check_exists_and_cache(&root, path)?;
            Ok(ProbeResult {
                path: path.display().to_string(),
                file_id: throttle.identity_of(path).to_string(),
                exists,
                impeached: throttle.impeach_existence(path, args.expect),
            })
        })
        .collect::<errors::Result<Vec<_>>>()?;
    let stats = throttle.stats();
    throttle.shutdown("probe finished")?;

    match output_mode(cli) {
        OutputMode::Human => {
            for r in &results {
                let state = if r.exists {
                    "exists".green()
                } else {
                    "absent".red()
                };
                let verdict = if r.impeached {
                    "impeached".yellow()
                } else {
                    "consistent".normal()
                };
                println!("{}  {state}  {verdict}  [{}]", r.path, r.file_id);
            }
            if stats.slow_probes > 0 {
                println!("  {} slow probe(s)", stats.slow_probes);
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "probe",
                "expect": args.expect,
                "results": serde_json::to_value(&results)?,
                "slow_probes": stats.slow_probes,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

// ──────────────────── config ────────────────────

fn run_config(cli: &Cli, args: &ConfigArgs) -> Result<(), CliError> {
    match &args.command {
        None | Some(ConfigCommand::Path) => {
            let path = cli
                .config
                .clone()
                .unwrap_or_else(ThrottleConfig::default_path);
            let exists = path.exists();

            match output_mode(cli) {
                OutputMode::Human => {
                    println!("{}", path.display());
                    if !exists {
                        println!("  (file does not exist; defaults will be used)");
                    }
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "config path",
                        "path": path.to_string_lossy(),
                        "exists": exists,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Show) => {
            let config = ThrottleConfig::load(cli.config.as_deref())?;

            match output_mode(cli) {
                OutputMode::Human => {
                    let toml_str = toml::to_string_pretty(&config)
                        .map_err(|e| CliError::Runtime(format!("serialize config: {e}")))?;
                    println!("{toml_str}");
                }
                OutputMode::Json => {
                    let value = serde_json::to_value(&config)?;
                    let payload = json!({
                        "command": "config show",
                        "config": value,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Validate) => match ThrottleConfig::load(cli.config.as_deref()) {
            Ok(config) => {
                let hash = config.stable_hash()?;

                match output_mode(cli) {
                    OutputMode::Human => {
                        println!("Configuration is valid.");
                        println!("  Source: {}", config.paths.config_file.display());
                        println!("  Hash: {hash}");
                    }
                    OutputMode::Json => {
                        let payload = json!({
                            "command": "config validate",
                            "valid": true,
                            "path": config.paths.config_file.to_string_lossy(),
                            "hash": hash,
                        });
                        write_json_line(&payload)?;
                    }
                }
                Ok(())
            }
            Err(e) => {
                match output_mode(cli) {
                    OutputMode::Human => {
                        eprintln!("Configuration is INVALID: {e}");
                    }
                    OutputMode::Json => {
                        let payload = json!({
                            "command": "config validate",
                            "valid": false,
                            "code": e.code(),
                            "error": e.to_string(),
                        });
                        write_json_line(&payload)?;
                    }
                }
                Err(CliError::User(format!("invalid config: {e}")))
            }
        },
    }
}

// ──────────────────── output ────────────────────

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("IOT_OUTPUT_FORMAT").ok();
    resolve_output_mode(cli.json, env_mode.as_deref(), io::stdout().is_terminal())
}

fn resolve_output_mode(json_flag: bool, env_mode: Option<&str>, stdout_is_tty: bool) -> OutputMode {
    if json_flag {
        return OutputMode::Json;
    }

    let fallback = if stdout_is_tty {
        OutputMode::Human
    } else {
        OutputMode::Json
    };

    match env_mode
        .map(str::trim)
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("json") => OutputMode::Json,
        Some("human") => OutputMode::Human,
        _ => fallback,
    }
}
