//! Echo ranger daemon entry point.
//!
//! Wires the sensor backend, the measurement thread, the operator console,
//! and signal handling together. Each task runs on its own thread and talks
//! to the main loop over channels.

mod clock;
mod console;
mod sensor;
mod signals;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use crossbeam_channel::{select, Sender};
use embedded_hal::digital::OutputPin;
use ranger_common::config::{OutputFormat, RangerConfig, SensorBackend};
use ranger_common::metrics::MetricsSnapshot;
use ranger_core::{ActiveFlag, CycleReport};
use std::io::Read;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::clock::SoftwareClock;
use crate::console::{Command, Console, LineBuffer, ResultLine};
use crate::sensor::SensorRig;
use crate::signals::SignalHandler;

/// Longest the measurement thread sleeps between polls.
const POLL_INTERVAL: Duration = Duration::from_millis(20);
/// Period of the main loop's signal check.
const HOUSEKEEPING_INTERVAL: Duration = Duration::from_millis(100);

/// Output format selectable on the command line.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum FormatArg {
    Text,
    Json,
}

impl From<FormatArg> for OutputFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Text => OutputFormat::Text,
            FormatArg::Json => OutputFormat::Json,
        }
    }
}

/// Echo ranger command-line arguments.
#[derive(Parser, Debug)]
#[command(
    name = "echo-ranger",
    about = "Ultrasonic time-of-flight range finder",
    version,
    long_about = None
)]
struct Args {
    /// Path to a configuration file (TOML).
    #[arg(long, short = 'c', value_name = "FILE")]
    config: Option<PathBuf>,

    /// Use the simulated sensor regardless of the configured backend.
    #[arg(long, short = 's')]
    simulated: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, short = 'l', default_value = "info")]
    log_level: String,

    /// Exit after this many results (0 = run until signalled).
    #[arg(long, default_value = "0")]
    max_readings: u64,

    /// Start measuring immediately instead of waiting for `start`.
    #[arg(long)]
    start: bool,

    /// Result output format (overrides config file).
    #[arg(long, value_enum)]
    format: Option<FormatArg>,
}

/// Messages from the worker threads to the main loop.
enum Event {
    Report(CycleReport),
    Failed(String),
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level);

    info!(version = env!("CARGO_PKG_VERSION"), "Starting echo ranger");

    let mut config = load_config(&args)?;

    if args.simulated {
        config.sensor.backend = SensorBackend::Simulated;
    }
    if args.start {
        config.console.start_active = true;
    }
    if let Some(format) = args.format {
        config.console.format = format.into();
    }
    config.validate().context("Invalid configuration")?;

    info!(
        backend = ?config.sensor.backend,
        cadence_ms = config.timing.cadence.as_millis(),
        timeout_us = config.timing.echo_timeout.as_micros(),
        settle_ms = config.timing.settle_delay.as_millis(),
        "Configuration loaded"
    );

    let signal_handler = SignalHandler::new().context("Failed to set up signal handlers")?;
    let active = ActiveFlag::new(config.console.start_active);

    match config.sensor.backend {
        SensorBackend::Simulated => {
            let rig = sensor::simulated(&config, active.clone())?;
            run_daemon(rig, &config, &active, &signal_handler, args.max_readings)
        }
        #[cfg(feature = "gpio")]
        SensorBackend::Gpio => {
            let rig = sensor::gpio::rig(&config, active.clone())?;
            run_daemon(rig, &config, &active, &signal_handler, args.max_readings)
        }
        #[cfg(not(feature = "gpio"))]
        SensorBackend::Gpio => {
            anyhow::bail!("GPIO backend requested but the daemon was built without the `gpio` feature")
        }
    }
}

/// Initialize logging with the specified log level.
///
/// Logs go to stderr; stdout carries only console output.
fn init_logging(level: &str) {
    let filter = format!("ranger_daemon={level},ranger_core={level},ranger_common={level}");

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
/// 2. `RANGER_CONFIG_PATH` environment variable
/// 3. `/etc/echo-ranger/config.toml` (system path)
/// 4. `config/default.toml` (local development)
/// 5. Built-in defaults
fn load_config(args: &Args) -> Result<RangerConfig> {
    if let Some(config_path) = &args.config {
        info!(?config_path, "Loading config from command-line argument");
        return RangerConfig::from_file(config_path)
            .with_context(|| format!("Failed to load config from {}", config_path.display()));
    }

    if let Ok(env_path) = std::env::var("RANGER_CONFIG_PATH") {
        let config_path = PathBuf::from(&env_path);
        if config_path.exists() {
            info!(?config_path, "Loading config from RANGER_CONFIG_PATH");
            return RangerConfig::from_file(&config_path).with_context(|| {
                format!("Failed to load config from RANGER_CONFIG_PATH={env_path}")
            });
        }
        warn!(
            path = %env_path,
            "RANGER_CONFIG_PATH set but file does not exist, checking other locations"
        );
    }

    for candidate in ["/etc/echo-ranger/config.toml", "config/default.toml"] {
        let config_path = PathBuf::from(candidate);
        if config_path.exists() {
            info!(?config_path, "Loading config file");
            return RangerConfig::from_file(&config_path)
                .with_context(|| format!("Failed to load config from {candidate}"));
        }
    }

    info!("No config file found, using built-in defaults");
    Ok(RangerConfig::default())
}

/// Run the console loop until shutdown, then stop the measurement thread.
fn run_daemon<P>(
    rig: SensorRig<P>,
    config: &RangerConfig,
    active: &ActiveFlag,
    signal_handler: &SignalHandler,
    max_readings: u64,
) -> Result<()>
where
    P: OutputPin + Send + 'static,
{
    let mut console = Console::new(std::io::stdout(), config.console.format);
    console.prompt()?;

    let (command_tx, command_rx) = crossbeam_channel::unbounded();
    let closed_commands = crossbeam_channel::never();
    let mut commands_open = true;
    spawn_command_reader(command_tx, config.console.max_command_len)?;

    let (event_tx, event_rx) = crossbeam_channel::unbounded();
    let measurement = spawn_measurement(
        rig,
        event_tx,
        signal_handler.clone(),
        config.metrics.status_interval,
    )?;

    let clock = SoftwareClock::new(config.clock.start);
    let housekeeping = crossbeam_channel::tick(HOUSEKEEPING_INTERVAL);

    let mut results = 0u64;
    info!(active = active.is_active(), "Entering main loop");

    loop {
        let commands = if commands_open { &command_rx } else { &closed_commands };
        select! {
            recv(commands) -> msg => match msg {
                Ok(command) => {
                    match &command {
                        Command::Start => active.set_active(true),
                        Command::Stop => active.set_active(false),
                        Command::Unknown(cmd) => debug!(command = %cmd, "Unknown command"),
                    }
                    console.reply(&command)?;
                }
                Err(_) => {
                    info!("Command input closed");
                    commands_open = false;
                }
            },
            recv(event_rx) -> msg => match msg {
                Ok(Event::Report(report)) => {
                    console.result(&result_line(&clock, report))?;
                    results += 1;
                    if max_readings > 0 && results >= max_readings {
                        info!(results, "Maximum readings reached, shutting down");
                        signal_handler.request_shutdown();
                        break;
                    }
                }
                Ok(Event::Failed(reason)) => {
                    error!(%reason, "Measurement thread failed");
                    signal_handler.request_shutdown();
                    break;
                }
                Err(_) => {
                    warn!("Measurement thread exited");
                    break;
                }
            },
            recv(housekeeping) -> _ => {
                if signal_handler.shutdown_requested() {
                    info!("Shutdown signal received");
                    break;
                }
                if signal_handler.take_reload_request() {
                    info!("Reload requested; configuration is only read at startup");
                }
            },
        }
    }

    // Make sure the measurement thread sees the request even when the loop
    // ended on a channel condition.
    signal_handler.request_shutdown();
    let summary = measurement
        .join()
        .map_err(|_| anyhow::anyhow!("Measurement thread panicked"))?;

    log_summary(&summary);
    info!(
        results,
        signals = signal_handler.state().signal_count(),
        "Echo ranger stopped"
    );
    Ok(())
}

/// Label a finished cycle with the clock as it reads when the line is printed.
fn result_line(clock: &SoftwareClock, report: CycleReport) -> ResultLine {
    ResultLine {
        time: clock.now(),
        result: report.result,
    }
}

/// Read stdin byte by byte and forward complete commands.
///
/// The thread is detached: a blocking read cannot be interrupted, so it
/// simply ends with the process.
fn spawn_command_reader(tx: Sender<Command>, max_len: usize) -> Result<()> {
    thread::Builder::new()
        .name("ranger-stdin".into())
        .spawn(move || {
            let mut buffer = LineBuffer::new(max_len);
            let mut warned = false;

            for byte in std::io::stdin().lock().bytes() {
                let byte = match byte {
                    Ok(byte) => byte,
                    Err(e) => {
                        warn!(error = %e, "Failed to read command input");
                        break;
                    }
                };

                let line = buffer.push(char::from(byte));
                if buffer.truncated() && !warned {
                    warn!(max_len, "Command too long, extra characters dropped");
                    warned = true;
                }
                if let Some(line) = line {
                    warned = false;
                    if tx.send(Command::parse(&line)).is_err() {
                        break;
                    }
                }
            }
            debug!("Command reader finished");
        })
        .context("Failed to spawn command reader")?;
    Ok(())
}

/// Run the controller on its own thread.
///
/// The thread returns the final metrics once shutdown is requested.
fn spawn_measurement<P>(
    mut rig: SensorRig<P>,
    tx: Sender<Event>,
    signal_handler: SignalHandler,
    status_interval: Duration,
) -> Result<thread::JoinHandle<MetricsSnapshot>>
where
    P: OutputPin + Send + 'static,
{
    thread::Builder::new()
        .name("ranger-measure".into())
        .spawn(move || {
            let mut last_status = Instant::now();

            while !signal_handler.shutdown_requested() {
                match rig.controller.poll() {
                    Ok(Some(report)) => {
                        if tx.send(Event::Report(report)).is_err() {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        let _ = tx.send(Event::Failed(e.to_string()));
                        break;
                    }
                }

                if last_status.elapsed() >= status_interval {
                    log_status(&rig);
                    last_status = Instant::now();
                }

                let nap = rig
                    .controller
                    .until_next_cycle()
                    .map_or(POLL_INTERVAL, |wait| wait.min(POLL_INTERVAL));
                if !nap.is_zero() {
                    thread::sleep(nap);
                }
            }

            rig.shutdown();
            rig.controller.metrics().snapshot()
        })
        .context("Failed to spawn measurement thread")
}

fn log_status<P: OutputPin>(rig: &SensorRig<P>) {
    let metrics = rig.controller.metrics().snapshot();
    let capture = rig.controller.capture().stats();
    info!(
        cycles = metrics.total_cycles,
        readings = metrics.readings,
        timeouts = metrics.timeouts,
        stale_reads = metrics.stale_reads,
        last_cm = ?metrics.last_distance_cm,
        p50_echo_us = ?metrics.p50_echo_us,
        p99_echo_us = ?metrics.p99_echo_us,
        spurious_edges = capture.spurious_edges,
        pending_alarms = rig.controller.capture().pending_alarms(),
        "Status"
    );
}

fn log_summary(summary: &MetricsSnapshot) {
    info!(
        cycles = summary.total_cycles,
        readings = summary.readings,
        timeouts = summary.timeouts,
        stale_reads = summary.stale_reads,
        invalid_durations = summary.invalid_durations,
        min_echo_us = ?summary.min_echo_us,
        max_echo_us = ?summary.max_echo_us,
        mean_echo_us = ?summary.mean_echo_us,
        p50_echo_us = ?summary.p50_echo_us,
        p99_echo_us = ?summary.p99_echo_us,
        success_ratio = ?summary.success_ratio(),
        "Measurement summary"
    );
}
