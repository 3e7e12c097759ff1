//! Breath CLI - Command-line interface for Synheart Breath
//!
//! Commands:
//! - run: Run a guided session in the terminal (stdin amplitudes or synthetic)
//! - summary: Summarize the most recent recorded session
//! - filter: Print a filtered trace of the most recent session
//! - config: Show or validate the effective configuration

use clap::{Parser, Subcommand, ValueEnum};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::mpsc::{self, Receiver};
use std::time::Duration;

use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{info, warn};

use synheart_breath::analyzer::downsample_for_display;
use synheart_breath::config::BreathConfig;
use synheart_breath::phase::SessionStatus;
use synheart_breath::types::{FilterKind, FilterSpec, NavigationSignal};
use synheart_breath::{
    BreathError, BreathingSession, ConfigError, Navigator, SampleSource, SyntheticSource,
    BREATH_VERSION, PRODUCER_NAME,
};

/// Breath - Guided breathing sessions and breath signal analysis
#[derive(Parser)]
#[command(name = "breath")]
#[command(author = "Synheart AI Inc")]
#[command(version = BREATH_VERSION)]
#[command(about = "Run guided breathing sessions and analyze recorded breath signals", long_about = None)]
struct Cli {
    /// Config file (defaults to $BREATH_CONFIG, then ./breath.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory session files are written to and read from
    #[arg(long, global = true, env = "BREATH_DATA_DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a guided session; amplitudes are read from stdin, one per line
    Run {
        /// Number of cycles (overrides config)
        #[arg(long)]
        cycles: Option<u32>,

        /// Tick interval in milliseconds
        #[arg(long, default_value = "33")]
        tick_ms: u64,

        /// Time multiplier, e.g. 10 runs the session ten times faster
        #[arg(long, default_value = "1.0")]
        speed: f64,

        /// Generate a synthetic breath trace instead of reading stdin
        #[arg(long)]
        synthetic: bool,
    },

    /// Summarize the most recent session
    Summary {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print a filtered trace of the most recent session as JSON
    Filter {
        /// Filter to apply
        #[arg(long, default_value = "moving-average")]
        filter: FilterArg,

        /// Moving average window (odd, 3..=21)
        #[arg(long, default_value = "5")]
        window_size: usize,

        /// Try the remote filter service first (overrides config)
        #[arg(long)]
        remote: bool,

        /// Decimate the trace to about this many points
        #[arg(long)]
        max_points: Option<usize>,
    },

    /// Print the effective configuration as TOML
    Config {
        /// Only validate, print nothing on success
        #[arg(long)]
        check: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum FilterArg {
    None,
    MovingAverage,
    Lowpass,
    Adaptive,
}

impl From<FilterArg> for FilterKind {
    fn from(arg: FilterArg) -> Self {
        match arg {
            FilterArg::None => FilterKind::None,
            FilterArg::MovingAverage => FilterKind::MovingAverage,
            FilterArg::Lowpass => FilterKind::LowPass,
            FilterArg::Adaptive => FilterKind::Adaptive,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), BreathCliError> {
    let mut config = match &cli.config {
        Some(path) => BreathConfig::load_from_file(path)?,
        None => BreathConfig::load(),
    };
    if let Some(dir) = cli.data_dir {
        config.storage.data_dir = dir;
    }

    match cli.command {
        Commands::Run {
            cycles,
            tick_ms,
            speed,
            synthetic,
        } => {
            if let Some(cycles) = cycles {
                config.session.total_cycles = cycles;
            }
            cmd_run(&config, tick_ms, speed, synthetic).await
        }

        Commands::Summary { json } => cmd_summary(&config, json),

        Commands::Filter {
            filter,
            window_size,
            remote,
            max_points,
        } => {
            if remote {
                config.remote_filter.enabled = true;
            }
            let spec = FilterSpec::new(filter.into(), window_size)?;
            cmd_filter(&config, &spec, max_points).await
        }

        Commands::Config { check } => cmd_config(&config, check),
    }
}

async fn cmd_run(
    config: &BreathConfig,
    tick_ms: u64,
    speed: f64,
    synthetic: bool,
) -> Result<(), BreathCliError> {
    if !(speed.is_finite() && speed > 0.0) {
        return Err(BreathCliError::InvalidArgument(format!(
            "speed must be positive, got {speed}"
        )));
    }

    let source = if synthetic {
        CliSource::Synthetic(SyntheticSource::default())
    } else {
        CliSource::Stdin(StdinSource::spawn())
    };

    let data_dir = config.storage.data_dir.clone();
    let mut session = BreathingSession::new(&data_dir, source, ConsoleNavigator::default());
    session.start(config.session_config())?;

    let mut interval = time::interval(Duration::from_millis(tick_ms.max(1)));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last = Instant::now();

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let now = Instant::now();
                let delta = now.duration_since(last).as_secs_f64() * speed;
                last = now;

                if session.tick(delta) == SessionStatus::Complete {
                    break;
                }
            }
            // A handler that failed to install disables this branch.
            Ok(()) = &mut ctrl_c => {
                info!("Interrupted; saving what was recorded");
                session.reset();
                return Ok(());
            }
        }
    }

    if let Some(outcome) = session.outcome() {
        println!("{}", serde_json::to_string(&outcome)?);
        if !outcome.persisted {
            return Err(BreathCliError::NotPersisted(outcome.path));
        }
    }
    Ok(())
}

fn cmd_summary(config: &BreathConfig, json: bool) -> Result<(), BreathCliError> {
    let data_dir = &config.storage.data_dir;
    let report = config.analyzer().report(data_dir);

    if json {
        let payload = serde_json::json!({
            "producer": PRODUCER_NAME,
            "version": BREATH_VERSION,
            "date": report.stamp.display(),
            "report": report,
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        let s = &report.summary;
        println!("Breathing Session Summary");
        println!("=========================");
        println!("Date:              {}", report.stamp.display());
        println!("Completed cycles:  {}", s.completed_cycles);
        println!("Average amplitude: {:.5}", s.average_amplitude);
        println!("Max amplitude:     {:.5}", s.max_amplitude);
        println!("Duration:          {:.1}s", s.duration_secs);
        if let Some(path) = &report.path {
            println!("File:              {}", path.display());
        }
        if let Some(error) = &report.error {
            println!("\n[WARN] {error}");
        }
    }

    Ok(())
}

async fn cmd_filter(
    config: &BreathConfig,
    spec: &FilterSpec,
    max_points: Option<usize>,
) -> Result<(), BreathCliError> {
    let analyzer = config.analyzer();
    let session = analyzer.load_most_recent(&config.storage.data_dir)?;
    let filtered = analyzer.filtered_trace(&session, spec).await?;
    let filtered = match max_points {
        Some(max) => downsample_for_display(&filtered, max),
        None => filtered,
    };

    let mut stdout = io::stdout();
    writeln!(stdout, "{}", serde_json::to_string(&filtered)?)?;
    stdout.flush()?;
    Ok(())
}

fn cmd_config(config: &BreathConfig, check: bool) -> Result<(), BreathCliError> {
    config.validate()?;
    if !check {
        print!("{}", config.to_toml()?);
    }
    Ok(())
}

// Sources and navigation

/// Latest amplitude read from stdin by a background thread
struct StdinSource {
    rx: Receiver<f64>,
    last: f64,
}

impl StdinSource {
    fn spawn() -> Self {
        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            for line in io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                match line.trim().parse::<f64>() {
                    Ok(value) if value.is_finite() => {
                        if tx.send(value).is_err() {
                            break;
                        }
                    }
                    _ => warn!(line = %line.trim(), "Ignoring non-numeric amplitude"),
                }
            }
        });
        Self { rx, last: 0.0 }
    }
}

impl SampleSource for StdinSource {
    fn read_rms(&mut self) -> f64 {
        if let Some(latest) = self.rx.try_iter().last() {
            self.last = latest;
        }
        self.last
    }
}

enum CliSource {
    Synthetic(SyntheticSource),
    Stdin(StdinSource),
}

impl SampleSource for CliSource {
    fn read_rms(&mut self) -> f64 {
        match self {
            CliSource::Synthetic(s) => s.read_rms(),
            CliSource::Stdin(s) => s.read_rms(),
        }
    }
}

/// Prints one JSON line per navigation signal
#[derive(Default)]
struct ConsoleNavigator;

impl Navigator for ConsoleNavigator {
    fn navigate(&mut self, signal: NavigationSignal) {
        match serde_json::to_string(&signal) {
            Ok(line) => println!("{line}"),
            Err(e) => warn!(error = %e, "Cannot encode navigation signal"),
        }
    }
}

// Error types

#[derive(Debug)]
enum BreathCliError {
    Io(io::Error),
    Breath(BreathError),
    Config(ConfigError),
    Json(serde_json::Error),
    InvalidArgument(String),
    NotPersisted(PathBuf),
}

impl From<io::Error> for BreathCliError {
    fn from(e: io::Error) -> Self {
        BreathCliError::Io(e)
    }
}

impl From<BreathError> for BreathCliError {
    fn from(e: BreathError) -> Self {
        BreathCliError::Breath(e)
    }
}

impl From<ConfigError> for BreathCliError {
    fn from(e: ConfigError) -> Self {
        BreathCliError::Config(e)
    }
}

impl From<serde_json::Error> for BreathCliError {
    fn from(e: serde_json::Error) -> Self {
        BreathCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

fn hint_for_dir(path: &Path) -> String {
    format!("Check that {} exists and contains breathing_data_*.csv files", path.display())
}

impl From<BreathCliError> for CliError {
    fn from(e: BreathCliError) -> Self {
        match e {
            BreathCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            BreathCliError::Breath(BreathError::NoSessionFound(dir)) => CliError {
                code: "NO_SESSION".to_string(),
                message: format!("No session found in {}", dir.display()),
                hint: Some(hint_for_dir(&dir)),
            },
            BreathCliError::Breath(e @ BreathError::InvalidConfig(_)) => CliError {
                code: "INVALID_CONFIG".to_string(),
                message: e.to_string(),
                hint: Some("Cycles must be at least 1 and every phase duration positive".to_string()),
            },
            BreathCliError::Breath(e @ BreathError::InvalidArgument(_)) => CliError {
                code: "INVALID_ARGUMENT".to_string(),
                message: e.to_string(),
                hint: Some("Moving average windows are odd numbers from 3 to 21".to_string()),
            },
            BreathCliError::Breath(e) => CliError {
                code: "SESSION_ERROR".to_string(),
                message: e.to_string(),
                hint: None,
            },
            BreathCliError::Config(e) => CliError {
                code: "CONFIG_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Run 'breath config' to see the effective configuration".to_string()),
            },
            BreathCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: None,
            },
            BreathCliError::InvalidArgument(msg) => CliError {
                code: "INVALID_ARGUMENT".to_string(),
                message: msg,
                hint: None,
            },
            BreathCliError::NotPersisted(path) => CliError {
                code: "NOT_PERSISTED".to_string(),
                message: format!("Session finished but {} could not be written", path.display()),
                hint: Some("Check that the data directory is writable".to_string()),
            },
        }
    }
}
