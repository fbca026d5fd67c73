//! Workout CLI - Command-line interface for Synheart Session
//!
//! Commands:
//! - simulate: Drive a scripted session against the simulated provider
//! - dispatch: Print the sample routes and capabilities of a workout option
//! - doctor: Diagnose coordinator configuration

use clap::{Parser, Subcommand};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::EnvFilter;

use synheart_session::dispatch::{Capabilities, MetricField, QuantityDispatchTable};
use synheart_session::presence::{PresenceEvent, PresenceNotifier};
use synheart_session::provider::SimulatedProvider;
use synheart_session::{
    ActivityType, CompletedWorkout, ConfigError, CoordinatorConfig, MetricSample, MetricsSnapshot,
    SessionError, SessionState, Venue, WorkoutConfiguration, WorkoutSessionCoordinator,
    PRODUCER_NAME, SESSION_VERSION,
};

/// Workout - Live workout session coordinator
#[derive(Parser)]
#[command(name = "workout")]
#[command(author = "Synheart AI Inc")]
#[command(version = SESSION_VERSION)]
#[command(about = "Drive and inspect live workout sessions", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scripted session against the simulated provider
    Simulate {
        /// Activity type (e.g. running, cycling, rowing)
        #[arg(short, long, value_parser = parse_activity)]
        activity: ActivityType,

        /// Venue (indoor, outdoor, unspecified)
        #[arg(long, default_value = "outdoor", value_parser = parse_venue)]
        venue: Venue,

        /// Active seconds to simulate
        #[arg(short, long, default_value = "10")]
        seconds: u64,

        /// Coordinator configuration file (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Print dispatch routes and capabilities for a workout option
    Dispatch {
        /// Activity type
        #[arg(short, long, value_parser = parse_activity)]
        activity: ActivityType,

        /// Venue
        #[arg(long, default_value = "outdoor", value_parser = parse_venue)]
        venue: Venue,
    },

    /// Diagnose configuration and environment
    Doctor {
        /// Coordinator configuration file (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn parse_activity(s: &str) -> Result<ActivityType, String> {
    ActivityType::ALL
        .into_iter()
        .find(|a| a.as_str() == s)
        .ok_or_else(|| {
            let known: Vec<&str> = ActivityType::ALL.iter().map(|a| a.as_str()).collect();
            format!("unknown activity '{}' (expected one of: {})", s, known.join(", "))
        })
}

fn parse_venue(s: &str) -> Result<Venue, String> {
    [Venue::Indoor, Venue::Outdoor, Venue::Unspecified]
        .into_iter()
        .find(|v| v.as_str() == s)
        .ok_or_else(|| format!("unknown venue '{}' (expected indoor, outdoor or unspecified)", s))
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
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

async fn run(cli: Cli) -> Result<(), WorkoutCliError> {
    match cli.command {
        Commands::Simulate {
            activity,
            venue,
            seconds,
            config,
        } => cmd_simulate(WorkoutConfiguration::new(activity, venue), seconds, config.as_deref()).await,

        Commands::Dispatch { activity, venue } => {
            cmd_dispatch(WorkoutConfiguration::new(activity, venue))
        }

        Commands::Doctor { config, json } => cmd_doctor(config.as_deref(), json),
    }
}

fn load_config(path: Option<&Path>) -> Result<CoordinatorConfig, WorkoutCliError> {
    let config = match path {
        Some(path) => CoordinatorConfig::load(path)?,
        None => CoordinatorConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

/// Prints every presence notification as one NDJSON line on stdout
struct NdjsonPresence;

impl NdjsonPresence {
    fn emit(&self, event: PresenceEvent) {
        if let Ok(line) = serde_json::to_string(&event) {
            let mut stdout = io::stdout().lock();
            let _ = writeln!(stdout, "{}", line);
            let _ = stdout.flush();
        }
    }
}

impl PresenceNotifier for NdjsonPresence {
    fn started(&self, activity_symbol: &str) {
        self.emit(PresenceEvent::Started {
            activity_symbol: activity_symbol.to_string(),
        });
    }

    fn updated(&self, snapshot: MetricsSnapshot) {
        self.emit(PresenceEvent::Updated { snapshot });
    }

    fn ended(&self) {
        self.emit(PresenceEvent::Ended);
    }
}

/// Synthetic sample batch for one simulated second
fn synthetic_samples(
    table: &QuantityDispatchTable,
    configuration: &WorkoutConfiguration,
    capabilities: Capabilities,
    second: u64,
) -> Vec<MetricSample> {
    let wave = (second % 20) as f64;

    table
        .routes_for(configuration.activity_type)
        .into_iter()
        .filter_map(|route| {
            let value = match route.field {
                MetricField::HeartRate => 118.0 + wave,
                MetricField::ActiveEnergy => 0.18,
                MetricField::Distance if capabilities.supports_distance => 2.7,
                MetricField::Speed if capabilities.supports_speed => 2.5 + wave / 10.0,
                MetricField::Distance | MetricField::Speed => return None,
            };
            Some(MetricSample::new(route.kind, value))
        })
        .collect()
}

async fn cmd_simulate(
    configuration: WorkoutConfiguration,
    seconds: u64,
    config_path: Option<&Path>,
) -> Result<(), WorkoutCliError> {
    let config = load_config(config_path)?;
    let provider = Arc::new(SimulatedProvider::new());
    let coordinator =
        WorkoutSessionCoordinator::new(provider.clone(), Arc::new(NdjsonPresence), config);

    coordinator.set_configuration(configuration).await?;
    coordinator.start().await?;

    let table = coordinator.dispatch_table().clone();
    let capabilities = coordinator.snapshot().capabilities();
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    for second in 0..seconds {
        ticker.tick().await;
        provider.emit_samples(&synthetic_samples(&table, &configuration, capabilities, second));
    }

    coordinator.end().await?;

    let mut states = coordinator.subscribe_state();
    let ended = matches!(
        tokio::time::timeout(
            Duration::from_secs(30),
            states.wait_for(|s| *s == SessionState::Ended),
        )
        .await,
        Ok(Ok(_))
    );
    if !ended {
        return Err(WorkoutCliError::NotFinalized(
            coordinator
                .finalization_error()
                .unwrap_or_else(|| format!("session stuck in {}", coordinator.state())),
        ));
    }

    let workout = coordinator
        .completed_workout()
        .ok_or_else(|| WorkoutCliError::NotFinalized("no workout record".to_string()))?;
    println!("{}", serde_json::to_string(&WorkoutSummary::from(&workout))?);

    coordinator.shutdown();
    Ok(())
}

fn cmd_dispatch(configuration: WorkoutConfiguration) -> Result<(), WorkoutCliError> {
    let table = QuantityDispatchTable::standard();

    let report = DispatchReport {
        configuration,
        capabilities: table.capabilities(&configuration),
        routes: table
            .routes_for(configuration.activity_type)
            .into_iter()
            .map(|route| DispatchRoute {
                sample: route.kind,
                field: route.field,
                aggregation: route.field.aggregation(),
            })
            .collect(),
    };

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn cmd_doctor(config_path: Option<&Path>, json: bool) -> Result<(), WorkoutCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "session_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("Synheart Session version {}", SESSION_VERSION),
    });

    match config_path {
        Some(path) if !path.exists() => checks.push(DoctorCheck {
            name: "config".to_string(),
            status: CheckStatus::Warning,
            message: format!("Config file {} does not exist; defaults apply", path.display()),
        }),
        _ => match load_config(config_path) {
            Ok(config) => checks.push(DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Ok,
                message: format!(
                    "refresh every {} ms, diagnostics every {} ms, finalize up to {} attempt(s)",
                    config.refresh_interval_ms,
                    config.diagnostic_interval_ms,
                    config.finalize.max_attempts
                ),
            }),
            Err(e) => checks.push(DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Error,
                message: CliError::from(e).message,
            }),
        },
    }

    let table = QuantityDispatchTable::standard();
    checks.push(DoctorCheck {
        name: "dispatch_table".to_string(),
        status: CheckStatus::Ok,
        message: format!("{} routes", table.routes().len()),
    });

    let stdout_check = if atty::is(atty::Stream::Stdout) {
        DoctorCheck {
            name: "stdout".to_string(),
            status: CheckStatus::Ok,
            message: "stdout is a TTY (interactive mode)".to_string(),
        }
    } else {
        DoctorCheck {
            name: "stdout".to_string(),
            status: CheckStatus::Ok,
            message: "stdout is a pipe (NDJSON presence stream ready)".to_string(),
        }
    };
    checks.push(stdout_check);

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: SESSION_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Workout Doctor Report");
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
        Err(WorkoutCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

// Error types

#[derive(Debug)]
enum WorkoutCliError {
    Config(ConfigError),
    Session(SessionError),
    Json(serde_json::Error),
    NotFinalized(String),
    DoctorFailed,
}

impl From<ConfigError> for WorkoutCliError {
    fn from(e: ConfigError) -> Self {
        WorkoutCliError::Config(e)
    }
}

impl From<SessionError> for WorkoutCliError {
    fn from(e: SessionError) -> Self {
        WorkoutCliError::Session(e)
    }
}

impl From<serde_json::Error> for WorkoutCliError {
    fn from(e: serde_json::Error) -> Self {
        WorkoutCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        let hint = match &e {
            ConfigError::FileRead { .. } => "Check file paths and permissions",
            ConfigError::Parse(_) => "Check TOML syntax",
            ConfigError::Invalid { .. } => "Intervals and attempt counts must be positive",
        };
        CliError {
            code: "CONFIG_ERROR".to_string(),
            message: e.to_string(),
            hint: Some(hint.to_string()),
        }
    }
}

impl From<WorkoutCliError> for CliError {
    fn from(e: WorkoutCliError) -> Self {
        match e {
            WorkoutCliError::Config(e) => CliError::from(e),
            WorkoutCliError::Session(SessionError::Preparation(e)) => CliError {
                code: "PREPARATION_FAILED".to_string(),
                message: e.to_string(),
                hint: Some("Check provider authorization and workout support".to_string()),
            },
            WorkoutCliError::Session(e) => CliError {
                code: "SESSION_ERROR".to_string(),
                message: e.to_string(),
                hint: None,
            },
            WorkoutCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: None,
            },
            WorkoutCliError::NotFinalized(msg) => CliError {
                code: "NOT_FINALIZED".to_string(),
                message: msg,
                hint: Some("Workout data may not have been saved".to_string()),
            },
            WorkoutCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct WorkoutSummary {
    event: &'static str,
    #[serde(flatten)]
    workout: CompletedWorkout,
}

impl From<&CompletedWorkout> for WorkoutSummary {
    fn from(workout: &CompletedWorkout) -> Self {
        Self {
            event: "completed",
            workout: workout.clone(),
        }
    }
}

#[derive(serde::Serialize)]
struct DispatchReport {
    configuration: WorkoutConfiguration,
    capabilities: Capabilities,
    routes: Vec<DispatchRoute>,
}

#[derive(serde::Serialize)]
struct DispatchRoute {
    sample: synheart_session::SampleKind,
    field: MetricField,
    aggregation: synheart_session::dispatch::Aggregation,
}

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
