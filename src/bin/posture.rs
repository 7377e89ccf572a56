//! Posture CLI - Command-line interface for Posture Flux
//!
//! Commands:
//! - interpret: Classify raw sensor readings into samples
//! - replay: Aggregate recorded samples into one session and report stats
//! - simulate: Run the monitoring loop on a simulated sensor rig
//! - config: Print the effective engine configuration
//! - doctor: Diagnose installation and configuration

use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use chrono::Utc;
use log::{info, LevelFilter};
use serde::Serialize;

use posture_flux::device::{
    ConsoleEffector, Effector, NullEffector, ReplaySource, SampleSource, SimulatedSource,
};
use posture_flux::store::MemoryStore;
use posture_flux::{
    classify_readings, Clock, EngineConfig, EngineError, ManualClock, MonitorPipeline, OwnerId,
    Sample, SessionAggregator, SessionStats, SessionStore, ENGINE_VERSION, PRODUCER_NAME,
};

/// Posture - On-device posture and stress monitoring
#[derive(Parser)]
#[command(name = "posture")]
#[command(version = ENGINE_VERSION)]
#[command(
    about = "Score posture and stress readings and aggregate them into sessions",
    long_about = None
)]
struct Cli {
    /// Engine configuration file (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify raw readings (NDJSON) into samples
    Interpret {
        /// Input file path (use - for stdin)
        #[arg(short, long, default_value = "-")]
        input: PathBuf,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,

        /// Output format
        #[arg(long, default_value = "ndjson")]
        output_format: OutputFormat,
    },

    /// Aggregate recorded samples (NDJSON) into a single session
    Replay {
        /// Input file path (use - for stdin)
        #[arg(short, long, default_value = "-")]
        input: PathBuf,

        /// Session owner
        #[arg(long, default_value = "local")]
        owner: String,

        /// Include the recorded readings in the report
        #[arg(long)]
        detail: bool,

        /// Persist into a SQLite database instead of memory
        #[arg(long)]
        db: Option<PathBuf>,

        /// Output format
        #[arg(long, default_value = "json-pretty")]
        output_format: OutputFormat,
    },

    /// Run the monitoring loop against a simulated sensor rig
    Simulate {
        /// Number of ticks to run
        #[arg(long, default_value = "60")]
        ticks: u64,

        /// Random seed for sensor jitter
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Session owner
        #[arg(long, default_value = "local")]
        owner: String,

        /// Sleep one tick interval between readings
        #[arg(long)]
        realtime: bool,

        /// Show display lines and buzzer pulses on stderr
        #[arg(long)]
        console: bool,

        /// Emit simulated RR intervals
        #[arg(long)]
        heartbeat: bool,

        /// Persist into a SQLite database instead of memory
        #[arg(long)]
        db: Option<PathBuf>,

        /// Output format
        #[arg(long, default_value = "json-pretty")]
        output_format: OutputFormat,
    },

    /// Print the effective configuration
    Config {
        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,
    },

    /// Diagnose installation and configuration
    Doctor {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Newline-delimited JSON (one record per line)
    Ndjson,
    /// JSON array of records
    Json,
    /// Pretty-printed JSON
    JsonPretty,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.quiet);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e))
                    .unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn init_logging(quiet: bool) {
    let level = if quiet {
        LevelFilter::Warn
    } else {
        LevelFilter::Info
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();
}

fn run(cli: Cli) -> Result<(), PostureCliError> {
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Interpret {
            input,
            output,
            output_format,
        } => cmd_interpret(&load_config(config_path)?, &input, &output, output_format),

        Commands::Replay {
            input,
            owner,
            detail,
            db,
            output_format,
        } => cmd_replay(
            load_config(config_path)?,
            &input,
            &OwnerId::new(owner),
            detail,
            db.as_deref(),
            output_format,
        ),

        Commands::Simulate {
            ticks,
            seed,
            owner,
            realtime,
            console,
            heartbeat,
            db,
            output_format,
        } => {
            let options = SimulateOptions {
                ticks,
                seed,
                realtime,
                console,
                heartbeat,
            };
            cmd_simulate(
                load_config(config_path)?,
                &OwnerId::new(owner),
                &options,
                db.as_deref(),
                output_format,
            )
        }

        Commands::Config { output } => cmd_config(&load_config(config_path)?, &output),

        Commands::Doctor { json } => cmd_doctor(config_path, json),
    }
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig, PostureCliError> {
    match path {
        Some(path) => {
            let config = EngineConfig::load(path)?;
            info!("Loaded configuration from {}", path.display());
            Ok(config)
        }
        None => Ok(EngineConfig::default()),
    }
}

fn cmd_interpret(
    config: &EngineConfig,
    input: &Path,
    output: &Path,
    output_format: OutputFormat,
) -> Result<(), PostureCliError> {
    let mut source = ReplaySource::from_ndjson(open_input(input)?)?;
    if source.remaining() == 0 {
        return Err(PostureCliError::NoReadings);
    }

    let samples = classify_readings(std::iter::from_fn(|| source.next_reading()), config);
    info!("Classified {} readings", samples.len());

    write_output(output, &format_output(&samples, &output_format)?)
}

fn cmd_replay(
    config: EngineConfig,
    input: &Path,
    owner: &OwnerId,
    detail: bool,
    db: Option<&Path>,
    output_format: OutputFormat,
) -> Result<(), PostureCliError> {
    let samples = read_samples(open_input(input)?)?;
    if samples.is_empty() {
        return Err(PostureCliError::NoReadings);
    }

    let report = match db {
        None => replay_session(MemoryStore::new(), config, owner, &samples, detail)?.0,
        Some(path) => replay_into_database(path, config, owner, &samples, detail)?,
    };

    print!("{}", format_output(&[report], &output_format)?);
    Ok(())
}

#[cfg(feature = "sqlite")]
fn replay_into_database(
    path: &Path,
    config: EngineConfig,
    owner: &OwnerId,
    samples: &[Sample],
    detail: bool,
) -> Result<serde_json::Value, PostureCliError> {
    let store = posture_flux::store::SqliteStore::open(path).map_err(EngineError::from)?;
    let (report, store) = replay_session(store, config, owner, samples, detail)?;
    store.close().map_err(EngineError::from)?;
    Ok(report)
}

#[cfg(not(feature = "sqlite"))]
fn replay_into_database(
    _path: &Path,
    _config: EngineConfig,
    _owner: &OwnerId,
    _samples: &[Sample],
    _detail: bool,
) -> Result<serde_json::Value, PostureCliError> {
    Err(PostureCliError::SqliteUnavailable)
}

/// Aggregate samples into one session, with time taken from the samples
fn replay_session<S: SessionStore>(
    store: S,
    config: EngineConfig,
    owner: &OwnerId,
    samples: &[Sample],
    detail: bool,
) -> Result<(serde_json::Value, S), PostureCliError> {
    let clock = ManualClock::new(samples[0].timestamp);
    let mut aggregator = SessionAggregator::new(store, clock.clone(), config)?;
    let session = aggregator.open(owner)?;

    let mut rejected = 0usize;
    for sample in samples {
        if sample.timestamp > clock.now() {
            clock.set(sample.timestamp);
        }
        match aggregator.record(owner, session.id(), sample) {
            Ok(_) => {}
            Err(EngineError::InvalidSample(_)) => rejected += 1,
            Err(e) => return Err(e.into()),
        }
    }
    aggregator.close(owner, session.id())?;
    info!(
        "Replayed {} samples into session {} ({} rejected)",
        samples.len() - rejected,
        session.id(),
        rejected
    );

    let report = if detail {
        serde_json::to_value(aggregator.detail(owner, session.id())?)?
    } else {
        serde_json::to_value(aggregator.stats(owner, session.id())?)?
    };
    Ok((report, aggregator.into_store()))
}

struct SimulateOptions {
    ticks: u64,
    seed: u64,
    realtime: bool,
    console: bool,
    heartbeat: bool,
}

fn cmd_simulate(
    config: EngineConfig,
    owner: &OwnerId,
    options: &SimulateOptions,
    db: Option<&Path>,
    output_format: OutputFormat,
) -> Result<(), PostureCliError> {
    let stats = match db {
        None => simulate_session(MemoryStore::new(), config, owner, options)?.0,
        Some(path) => simulate_into_database(path, config, owner, options)?,
    };

    print!("{}", format_output(&[stats], &output_format)?);
    Ok(())
}

#[cfg(feature = "sqlite")]
fn simulate_into_database(
    path: &Path,
    config: EngineConfig,
    owner: &OwnerId,
    options: &SimulateOptions,
) -> Result<SessionStats, PostureCliError> {
    let store = posture_flux::store::SqliteStore::open(path).map_err(EngineError::from)?;
    let (stats, store) = simulate_session(store, config, owner, options)?;
    store.close().map_err(EngineError::from)?;
    Ok(stats)
}

#[cfg(not(feature = "sqlite"))]
fn simulate_into_database(
    _path: &Path,
    _config: EngineConfig,
    _owner: &OwnerId,
    _options: &SimulateOptions,
) -> Result<SessionStats, PostureCliError> {
    Err(PostureCliError::SqliteUnavailable)
}

fn simulate_session<S: SessionStore>(
    store: S,
    config: EngineConfig,
    owner: &OwnerId,
    options: &SimulateOptions,
) -> Result<(SessionStats, S), PostureCliError> {
    let interval = config.tick_interval();
    let pause = std::time::Duration::from_millis(config.tick_interval_ms);
    let start = Utc::now();
    let clock = ManualClock::new(start);

    let mut source = SimulatedSource::new(options.seed, start, interval).with_limit(options.ticks);
    if options.heartbeat {
        source = source.with_heartbeat();
    }
    let effector: Box<dyn Effector> = if options.console {
        Box::new(ConsoleEffector::new(io::stderr()))
    } else {
        Box::new(NullEffector)
    };

    let aggregator = SessionAggregator::new(store, clock.clone(), config)?;
    let mut pipeline = MonitorPipeline::new(source, effector, aggregator, owner.clone());
    let session_id = pipeline.start()?;

    let mut processed = 0u64;
    while pipeline.tick()?.is_some() {
        processed += 1;
        clock.advance(interval);
        if options.realtime {
            std::thread::sleep(pause);
        }
    }

    let stats = pipeline.finish()?;
    info!("Simulated {} ticks into session {}", processed, session_id);

    let (_, _, aggregator) = pipeline.into_parts();
    Ok((stats, aggregator.into_store()))
}

fn cmd_config(config: &EngineConfig, output: &Path) -> Result<(), PostureCliError> {
    write_output(output, &(config.to_json()? + "\n"))
}

fn cmd_doctor(config_path: Option<&Path>, json: bool) -> Result<(), PostureCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "engine_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("Posture Flux version {}", ENGINE_VERSION),
    });

    match config_path {
        Some(path) if !path.exists() => checks.push(DoctorCheck {
            name: "config".to_string(),
            status: CheckStatus::Error,
            message: format!("Configuration file {} does not exist", path.display()),
        }),
        Some(path) => match EngineConfig::load(path) {
            Ok(_) => checks.push(DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Ok,
                message: format!("Configuration file {} is valid", path.display()),
            }),
            Err(e) => checks.push(DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Error,
                message: format!("Invalid configuration: {}", e),
            }),
        },
        None => checks.push(DoctorCheck {
            name: "config".to_string(),
            status: CheckStatus::Ok,
            message: "Using built-in defaults".to_string(),
        }),
    }

    checks.push(if cfg!(feature = "sqlite") {
        DoctorCheck {
            name: "sqlite".to_string(),
            status: CheckStatus::Ok,
            message: "SQLite session store available".to_string(),
        }
    } else {
        DoctorCheck {
            name: "sqlite".to_string(),
            status: CheckStatus::Warning,
            message: "Built without the sqlite feature; sessions are kept in memory".to_string(),
        }
    });

    let stdin_check = if atty::is(atty::Stream::Stdin) {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a TTY (interactive mode)".to_string(),
        }
    } else {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a pipe (replay ready)".to_string(),
        }
    };
    checks.push(stdin_check);

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: ENGINE_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Posture Doctor Report");
        println!("=====================");
        println!("Producer: {}", report.producer);
        println!("Version:  {}", report.version);
        println!("\nChecks:");

        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    let has_errors = report
        .checks
        .iter()
        .any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(PostureCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

// Helper functions

fn open_input(input: &Path) -> Result<Box<dyn BufRead>, PostureCliError> {
    if input.to_string_lossy() == "-" {
        let mut buffer = Vec::new();
        io::stdin().read_to_end(&mut buffer)?;
        Ok(Box::new(io::Cursor::new(buffer)))
    } else {
        Ok(Box::new(BufReader::new(fs::File::open(input)?)))
    }
}

fn read_samples<R: BufRead>(reader: R) -> Result<Vec<Sample>, PostureCliError> {
    let mut samples = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let sample = Sample::from_json(trimmed)
            .map_err(|e| PostureCliError::ParseError(format!("line {}: {}", index + 1, e)))?;
        samples.push(sample);
    }
    Ok(samples)
}

fn write_output(output: &Path, data: &str) -> Result<(), PostureCliError> {
    if output.to_string_lossy() == "-" {
        let mut stdout = io::stdout();
        stdout.write_all(data.as_bytes())?;
        stdout.flush()?;
    } else {
        fs::write(output, data)?;
    }
    Ok(())
}

fn format_output<T: Serialize>(
    records: &[T],
    format: &OutputFormat,
) -> Result<String, PostureCliError> {
    match format {
        OutputFormat::Ndjson => {
            let mut lines: Vec<String> = Vec::new();
            for record in records {
                lines.push(serde_json::to_string(record)?);
            }
            Ok(lines.join("\n") + "\n")
        }
        OutputFormat::Json => Ok(serde_json::to_string(records)? + "\n"),
        OutputFormat::JsonPretty => Ok(serde_json::to_string_pretty(records)? + "\n"),
    }
}

// Error types

#[derive(Debug)]
enum PostureCliError {
    Io(io::Error),
    Engine(EngineError),
    Json(serde_json::Error),
    ParseError(String),
    NoReadings,
    SqliteUnavailable,
    DoctorFailed,
}

impl From<io::Error> for PostureCliError {
    fn from(e: io::Error) -> Self {
        PostureCliError::Io(e)
    }
}

impl From<EngineError> for PostureCliError {
    fn from(e: EngineError) -> Self {
        PostureCliError::Engine(e)
    }
}

impl From<serde_json::Error> for PostureCliError {
    fn from(e: serde_json::Error) -> Self {
        PostureCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<PostureCliError> for CliError {
    fn from(e: PostureCliError) -> Self {
        match e {
            PostureCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            PostureCliError::Engine(e) => {
                let hint = match &e {
                    EngineError::InvalidConfig(_) => Some("Run 'posture doctor --config <path>'"),
                    EngineError::InvalidSample(_) => {
                        Some("Angles and scores must be finite; scores within [0, 1]")
                    }
                    EngineError::Json(_) => Some("Check JSON syntax"),
                    EngineError::Store(_) => Some("Check the database path and permissions"),
                    _ => None,
                };
                CliError {
                    code: e.kind().to_uppercase(),
                    message: e.to_string(),
                    hint: hint.map(str::to_string),
                }
            }
            PostureCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            PostureCliError::ParseError(msg) => CliError {
                code: "PARSE_ERROR".to_string(),
                message: msg,
                hint: Some("Each line must be one JSON sample".to_string()),
            },
            PostureCliError::NoReadings => CliError {
                code: "NO_READINGS".to_string(),
                message: "No readings found in input".to_string(),
                hint: Some("Ensure input is not empty".to_string()),
            },
            PostureCliError::SqliteUnavailable => CliError {
                code: "SQLITE_UNAVAILABLE".to_string(),
                message: "This build has no SQLite support".to_string(),
                hint: Some("Rebuild with --features sqlite".to_string()),
            },
            PostureCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(serde::Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(serde::Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
