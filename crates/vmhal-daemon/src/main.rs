//! VM HAL demo daemon entry point.
//!
//! Loads the HAL configuration, brings up the HAL, and runs a toy
//! round-robin scheduler over it, reporting timeslice expiries through
//! the byte sink until a tick limit or a stop signal.

mod demo;
mod signals;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};
use vmhal_common::config::{HalConfig, TickMode};
use vmhal_common::error::HalError;
use vmhal_common::metrics::TickMetricsSnapshot;
use vmhal_runtime::{Hal, TickPort};

use crate::demo::RoundRobin;
use crate::signals::SignalHandler;

/// Demo daemon command-line arguments.
#[derive(Parser, Debug)]
#[command(
    name = "vmhal-daemon",
    about = "VM HAL demo - round-robin scheduling over the tick-driven HAL",
    version,
    long_about = None
)]
struct Args {
    /// Path to a HAL configuration file (TOML).
    #[arg(long, short = 'c', value_name = "FILE")]
    config: Option<PathBuf>,

    /// Tick source: interrupt, external, or cooperative (overrides config file).
    #[arg(long, short = 'm')]
    mode: Option<TickMode>,

    /// Tick period, e.g. "4ms" (overrides config file).
    #[arg(long, value_parser = humantime::parse_duration)]
    tick_unit: Option<Duration>,

    /// Ticks per timeslice (overrides config file).
    #[arg(long)]
    timeslice: Option<u32>,

    /// Stop once the clock reaches this many ticks (0 = until signaled).
    #[arg(long, default_value = "0")]
    ticks: u64,

    /// Number of pseudo-tasks in the run queue.
    #[arg(long, default_value = "3")]
    tasks: usize,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, short = 'l', default_value = "info")]
    log_level: String,
}

fn main() -> Result<ExitCode> {
    let args = Args::parse();

    init_logging(&args.log_level);

    info!(version = env!("CARGO_PKG_VERSION"), "Starting VM HAL demo");

    let mut config = load_config(&args)?;
    apply_overrides(&mut config, &args);

    info!(
        mode = %config.mode,
        tick_unit_us = config.tick_unit.as_micros(),
        timeslice_tick_count = config.timeslice_tick_count,
        "Configuration loaded"
    );

    let signal_handler = SignalHandler::new().context("Failed to set up signal handlers")?;

    let mut hal = Hal::new(config).context("Invalid HAL configuration")?;
    if initialize_or_report(&mut hal).is_err() {
        return Ok(ExitCode::from(INIT_FAILURE_STATUS));
    }

    run_demo(&mut hal, &signal_handler, &args)?;
    Ok(ExitCode::SUCCESS)
}

/// Process exit status when the HAL cannot be brought up.
const INIT_FAILURE_STATUS: u8 = 1;

/// Bring up the HAL, reporting a failure on its own byte sink.
fn initialize_or_report(hal: &mut Hal) -> Result<(), HalError> {
    hal.initialize().inspect_err(|e| {
        error!("HAL initialization failed: {e}");
        let line = format!("HAL INIT ERROR: {e}\n");
        // Nowhere left to report a sink failure
        let _ = hal.write_all(line.as_bytes());
        let _ = hal.flush();
    })
}

/// Initialize logging with the specified log level.
///
/// Logs go to stderr; stdout is the HAL byte sink.
fn init_logging(level: &str) {
    let filter = format!("vmhal_daemon={level},vmhal_runtime={level},vmhal_common={level}");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&filter)),
        )
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(true)
        .init();
}

/// Load configuration from file or use defaults.
///
/// Resolution priority (first existing file wins):
/// 1. Command-line `--config` argument
/// 2. `VMHAL_CONFIG_PATH` environment variable
/// 3. `/etc/vmhal/config.toml` (system path)
/// 4. `config/default.toml` (local development)
/// 5. Built-in defaults
fn load_config(args: &Args) -> Result<HalConfig> {
    if let Some(config_path) = &args.config {
        info!(?config_path, "Loading config from command-line argument");
        return HalConfig::from_file(config_path)
            .with_context(|| format!("Failed to load config from {config_path:?}"));
    }

    if let Ok(env_path) = std::env::var("VMHAL_CONFIG_PATH") {
        let config_path = PathBuf::from(&env_path);
        if config_path.exists() {
            info!(?config_path, "Loading config from VMHAL_CONFIG_PATH");
            return HalConfig::from_file(&config_path).with_context(|| {
                format!("Failed to load config from VMHAL_CONFIG_PATH={env_path:?}")
            });
        }
        warn!(
            path = %env_path,
            "VMHAL_CONFIG_PATH set but file does not exist, checking other locations"
        );
    }

    for path in ["/etc/vmhal/config.toml", "config/default.toml"] {
        let config_path = PathBuf::from(path);
        if config_path.exists() {
            info!(?config_path, "Loading config");
            return HalConfig::from_file(&config_path)
                .with_context(|| format!("Failed to load config from {config_path:?}"));
        }
    }

    info!("No config file found, using built-in defaults");
    Ok(HalConfig::default())
}

fn apply_overrides(config: &mut HalConfig, args: &Args) {
    if let Some(mode) = args.mode {
        config.mode = mode;
    }
    if let Some(tick_unit) = args.tick_unit {
        config.tick_unit = tick_unit;
    }
    if let Some(count) = args.timeslice {
        config.timeslice_tick_count = count;
    }
}

/// Simulated board interrupt for external mode: one tick per period
/// until `stop` is set.
fn spawn_external_ticker(
    port: TickPort,
    period: Duration,
    stop: SignalHandler,
) -> std::io::Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name("vmhal-ext-tick".into())
        .spawn(move || {
            while !stop.stop_requested() {
                thread::sleep(period);
                port.deliver_tick();
            }
        })
}

fn run_demo(hal: &mut Hal, signal_handler: &SignalHandler, args: &Args) -> Result<()> {
    let ticker = if hal.mode() == TickMode::External {
        info!("External mode: simulating the board interrupt from a helper thread");
        Some(
            spawn_external_ticker(
                hal.tick_port(),
                hal.config().tick_unit,
                signal_handler.clone(),
            )
            .context("Failed to start external ticker")?,
        )
    } else {
        None
    };

    hal.enable_preemption()
        .context("Failed to enable preemption")?;

    let mut scheduler = RoundRobin::new(args.tasks, hal.config());
    info!(tasks = args.tasks, max_ticks = args.ticks, "Entering scheduler loop");

    let result = scheduler.run(hal, args.ticks, || signal_handler.stop_requested());

    // Stop the helper ticker whichever way the loop ended
    signal_handler.state().request_stop();
    if let Some(handle) = ticker {
        if handle.join().is_err() {
            warn!("External ticker thread panicked");
        }
    }
    let summary = result.context("Scheduler loop failed")?;

    let stats = hal.stats();
    info!(
        ticks = summary.ticks,
        expiries = summary.expiries,
        switches = summary.switches,
        steps = summary.steps,
        idle_waits = summary.idle_waits,
        batched = stats.batched_events,
        coalesced = stats.coalesced_notifications,
        lock_failures = stats.lock_failures,
        signals = signal_handler.state().signal_count(),
        "Scheduler loop finished"
    );
    if let Some(metrics) = hal.tick_metrics() {
        report_tick_metrics(&metrics);
    }

    hal.shutdown().context("Failed to shut down HAL")?;
    info!("Demo shutdown complete");
    Ok(())
}

fn report_tick_metrics(metrics: &TickMetricsSnapshot) {
    if metrics.total_intervals == 0 {
        return;
    }
    info!(
        intervals = metrics.total_intervals,
        mean_us = ?metrics.mean_ns.map(|ns| ns / 1_000),
        jitter_us = ?metrics.jitter_ns().map(|ns| ns / 1_000),
        late = metrics.late_count,
        "Tick interval statistics"
    );
}
