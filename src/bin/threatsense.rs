//! threatsense CLI - Command-line interface for the threat estimation core
//!
//! Commands:
//! - simulate: Run a monitor on synthetic capture and print snapshots
//! - analyze: Score raw 16-bit PCM audio window by window
//! - keywords: Score a text for threat keywords
//! - doctor: Diagnose configuration and classifier selection

use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::thread;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

use threatsense::buffer::AudioWindow;
use threatsense::classifier::LinearEmotionModel;
use threatsense::types::{SpeechAssessment, ThreatSnapshot};
use threatsense::{
    keyword_score, AudioSourceKind, MonitorConfig, SpeechScorer, SyntheticFrameSource, ThreatError,
    ThreatMonitor, VERSION,
};

/// threatsense - On-device multimodal threat estimation
#[derive(Parser)]
#[command(name = "threatsense")]
#[command(version = VERSION)]
#[command(about = "Fuse speech, motion and context into a threat score", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a monitor on synthetic audio and print a snapshot per tick
    Simulate {
        /// How long to run, in seconds
        #[arg(short, long, default_value = "10")]
        seconds: f64,

        /// Monitor configuration (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Also drive the motion path with a synthetic camera
        #[arg(long)]
        camera: bool,

        /// Output format
        #[arg(long, default_value = "ndjson")]
        output_format: OutputFormat,
    },

    /// Score raw 16-bit little-endian mono PCM window by window
    Analyze {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Sample rate of the input
        #[arg(long, default_value = "16000")]
        sample_rate: u32,

        /// Analysis window length in seconds
        #[arg(long, default_value = "1.0")]
        window_seconds: f64,

        /// Monitor configuration (JSON), used for speech settings and the model path
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output format
        #[arg(long, default_value = "ndjson")]
        output_format: OutputFormat,
    },

    /// Print the keyword threat score of a text
    Keywords {
        /// Text to score
        text: String,
    },

    /// Diagnose configuration and classifier selection
    Doctor {
        /// Monitor configuration (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Newline-delimited JSON
    Ndjson,
    /// Pretty-printed JSON
    JsonPretty,
}

fn main() -> ExitCode {
    // Library diagnostics go through `log`; the subscriber bridges them
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string()));
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), ThreatCliError> {
    match cli.command {
        Commands::Simulate {
            seconds,
            config,
            camera,
            output_format,
        } => cmd_simulate(seconds, config.as_deref(), camera, output_format),

        Commands::Analyze {
            input,
            sample_rate,
            window_seconds,
            config,
            output_format,
        } => cmd_analyze(&input, sample_rate, window_seconds, config.as_deref(), output_format),

        Commands::Keywords { text } => cmd_keywords(&text),

        Commands::Doctor { config, json } => cmd_doctor(config.as_deref(), json),
    }
}

fn load_config(path: Option<&Path>) -> Result<MonitorConfig, ThreatCliError> {
    let config = match path {
        Some(path) => MonitorConfig::from_file(path)?,
        None => MonitorConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

fn cmd_simulate(
    seconds: f64,
    config: Option<&Path>,
    camera: bool,
    output_format: OutputFormat,
) -> Result<(), ThreatCliError> {
    if !seconds.is_finite() || seconds <= 0.0 {
        return Err(ThreatCliError::InvalidArgument(format!("seconds must be positive, got {seconds}")));
    }

    let mut config = load_config(config)?;
    config.audio_source = AudioSourceKind::Synthetic;
    let tick = config.tick_interval();

    let mut builder = ThreatMonitor::builder().config(config);
    if camera {
        builder = builder.frame_capture(Box::new(SyntheticFrameSource::new(160, 120, 10.0)));
    }
    let monitor = builder.build()?;

    let started = monitor.start()?;
    log::info!("Simulation session {} {}", started.session_id(), started.as_str());

    let deadline = Instant::now() + Duration::from_secs_f64(seconds);
    let mut snapshots: Vec<ThreatSnapshot> = Vec::new();
    let stdout = io::stdout();
    let mut out = stdout.lock();

    while Instant::now() < deadline {
        thread::sleep(tick);
        let snapshot = monitor.snapshot();
        match output_format {
            OutputFormat::Ndjson => {
                writeln!(out, "{}", serde_json::to_string(&snapshot)?)?;
                out.flush()?;
            }
            OutputFormat::JsonPretty => snapshots.push(snapshot),
        }
    }

    let stopped = monitor.stop();
    log::info!("Simulation {}", stopped.as_str());

    if let OutputFormat::JsonPretty = output_format {
        writeln!(out, "{}", serde_json::to_string_pretty(&snapshots)?)?;
    }

    Ok(())
}

#[derive(serde::Serialize)]
struct WindowReport {
    index: usize,
    start_seconds: f64,
    samples: usize,
    #[serde(flatten)]
    assessment: SpeechAssessment,
}

fn read_input(input: &Path) -> Result<Vec<u8>, ThreatCliError> {
    let mut bytes = Vec::new();
    if input.as_os_str() == "-" {
        if atty::is(atty::Stream::Stdin) {
            return Err(ThreatCliError::InteractiveStdin);
        }
        io::stdin().read_to_end(&mut bytes)?;
    } else {
        bytes = fs::read(input)?;
    }
    Ok(bytes)
}

/// Decode little-endian signed 16-bit PCM into normalized samples; a trailing
/// odd byte is dropped
fn decode_pcm16(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32_768.0)
        .collect()
}

fn cmd_analyze(
    input: &Path,
    sample_rate: u32,
    window_seconds: f64,
    config: Option<&Path>,
    output_format: OutputFormat,
) -> Result<(), ThreatCliError> {
    if sample_rate == 0 {
        return Err(ThreatCliError::InvalidArgument("sample rate must be positive".to_string()));
    }
    if !window_seconds.is_finite() || window_seconds <= 0.0 {
        return Err(ThreatCliError::InvalidArgument(format!(
            "window length must be positive, got {window_seconds}"
        )));
    }

    let config = load_config(config)?;
    let samples = decode_pcm16(&read_input(input)?);
    if samples.is_empty() {
        return Err(ThreatCliError::NoAudio);
    }

    let window_len = ((window_seconds * sample_rate as f64).round() as usize).max(1);
    let mut scorer = SpeechScorer::from_config(&config);
    log::info!("Scoring {} samples with {}", samples.len(), scorer.classifier_name());

    let reports: Vec<WindowReport> = samples
        .chunks(window_len)
        .enumerate()
        .map(|(index, chunk)| WindowReport {
            index,
            start_seconds: (index * window_len) as f64 / sample_rate as f64,
            samples: chunk.len(),
            assessment: scorer.score(&AudioWindow::from_samples(chunk.to_vec(), sample_rate)),
        })
        .collect();

    let stdout = io::stdout();
    let mut out = stdout.lock();
    match output_format {
        OutputFormat::Ndjson => {
            for report in &reports {
                writeln!(out, "{}", serde_json::to_string(report)?)?;
            }
        }
        OutputFormat::JsonPretty => writeln!(out, "{}", serde_json::to_string_pretty(&reports)?)?,
    }

    Ok(())
}

fn cmd_keywords(text: &str) -> Result<(), ThreatCliError> {
    let report = serde_json::json!({
        "text": text,
        "keyword_score": keyword_score(text),
    });
    println!("{}", serde_json::to_string(&report)?);
    Ok(())
}

fn cmd_doctor(config: Option<&Path>, json: bool) -> Result<(), ThreatCliError> {
    let report = DoctorReport {
        version: VERSION.to_string(),
        checks: doctor_checks(config),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("threatsense Doctor Report");
        println!("=========================");
        println!("Version: {}", report.version);
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

    let has_errors = report.checks.iter().any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(ThreatCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

fn doctor_checks(config: Option<&Path>) -> Vec<DoctorCheck> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "version".to_string(),
        status: CheckStatus::Ok,
        message: format!("threatsense version {}", VERSION),
    });

    let loaded = match config {
        Some(path) => MonitorConfig::from_file(path),
        None => Ok(MonitorConfig::default()),
    };
    let config = match loaded.and_then(|c| c.validate().map(|()| c)) {
        Ok(c) => {
            checks.push(DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Ok,
                message: match config {
                    Some(path) => format!("Configuration {} is valid", path.display()),
                    None => "Using default configuration".to_string(),
                },
            });
            Some(c)
        }
        Err(e) => {
            checks.push(DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Error,
                message: e.to_string(),
            });
            None
        }
    };

    if let Some(config) = &config {
        let classifier = match &config.model_path {
            None => DoctorCheck {
                name: "classifier".to_string(),
                status: CheckStatus::Ok,
                message: "No model configured; spectral heuristic selected".to_string(),
            },
            Some(path) => match LinearEmotionModel::load(path, config.speech.confidence_gate) {
                Ok(_) => DoctorCheck {
                    name: "classifier".to_string(),
                    status: CheckStatus::Ok,
                    message: format!("Model {} loads; trained classifier selected", path.display()),
                },
                Err(e) => DoctorCheck {
                    name: "classifier".to_string(),
                    status: CheckStatus::Warning,
                    message: format!("{e}; spectral heuristic will be used"),
                },
            },
        };
        checks.push(classifier);

        checks.push(DoctorCheck {
            name: "audio_source".to_string(),
            status: CheckStatus::Ok,
            message: match config.audio_source {
                AudioSourceKind::Synthetic => "Synthetic audio source".to_string(),
                AudioSourceKind::External => "External audio (host pushes samples)".to_string(),
            },
        });
    }

    checks
}

// Error handling

#[derive(Debug)]
enum ThreatCliError {
    Io(io::Error),
    Core(ThreatError),
    Json(serde_json::Error),
    InvalidArgument(String),
    InteractiveStdin,
    NoAudio,
    DoctorFailed,
}

impl From<io::Error> for ThreatCliError {
    fn from(e: io::Error) -> Self {
        ThreatCliError::Io(e)
    }
}

impl From<ThreatError> for ThreatCliError {
    fn from(e: ThreatError) -> Self {
        ThreatCliError::Core(e)
    }
}

impl From<serde_json::Error> for ThreatCliError {
    fn from(e: serde_json::Error) -> Self {
        ThreatCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<ThreatCliError> for CliError {
    fn from(e: ThreatCliError) -> Self {
        match e {
            ThreatCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            ThreatCliError::Core(e) => {
                let (code, hint) = match &e {
                    ThreatError::InvalidConfig(_) | ThreatError::Json(_) => {
                        ("CONFIG_ERROR", "Run 'threatsense doctor --config <file>' for details")
                    }
                    ThreatError::Io(_) => ("IO_ERROR", "Check file paths and permissions"),
                    ThreatError::ModelLoad(_) => ("MODEL_ERROR", "Check the model_path weights file"),
                    ThreatError::Capture(_) => ("CAPTURE_ERROR", "Check capture device availability"),
                    ThreatError::Worker(_) => ("WORKER_ERROR", "Retry; the monitor could not start its threads"),
                };
                CliError {
                    code: code.to_string(),
                    message: e.to_string(),
                    hint: Some(hint.to_string()),
                }
            }
            ThreatCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: None,
            },
            ThreatCliError::InvalidArgument(msg) => CliError {
                code: "INVALID_ARGUMENT".to_string(),
                message: msg,
                hint: Some("See 'threatsense help'".to_string()),
            },
            ThreatCliError::InteractiveStdin => CliError {
                code: "INTERACTIVE_STDIN".to_string(),
                message: "Refusing to read PCM audio from a terminal".to_string(),
                hint: Some("Pipe audio into stdin or pass --input <file>".to_string()),
            },
            ThreatCliError::NoAudio => CliError {
                code: "NO_AUDIO".to_string(),
                message: "Input contains no complete 16-bit samples".to_string(),
                hint: Some("Ensure input is raw s16le mono PCM".to_string()),
            },
            ThreatCliError::DoctorFailed => CliError {
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
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(serde::Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(Debug, PartialEq, serde::Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_pcm16() {
        let bytes = [0x00, 0x00, 0x00, 0x40, 0x00, 0x80, 0x7f];
        let samples = decode_pcm16(&bytes);
        assert_eq!(samples, vec![0.0, 0.5, -1.0]);
    }

    #[test]
    fn test_cli_parses_simulate() {
        let cli = Cli::try_parse_from(["threatsense", "simulate", "--seconds", "3", "--camera"]).unwrap();
        match cli.command {
            Commands::Simulate { seconds, camera, .. } => {
                assert_eq!(seconds, 3.0);
                assert!(camera);
            }
            _ => panic!("expected simulate"),
        }
    }

    #[test]
    fn test_doctor_checks_default_config() {
        let checks = doctor_checks(None);
        let names: Vec<&str> = checks.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["version", "config", "classifier", "audio_source"]);
        assert!(checks.iter().all(|c| c.status == CheckStatus::Ok));
    }

    #[test]
    fn test_doctor_flags_missing_config() {
        let checks = doctor_checks(Some(Path::new("/nonexistent/threatsense.json")));
        let config = checks.iter().find(|c| c.name == "config").unwrap();
        assert_eq!(config.status, CheckStatus::Error);
        assert!(checks.iter().all(|c| c.name != "classifier"));
    }

    #[test]
    fn test_config_error_maps_to_code() {
        let err = CliError::from(ThreatCliError::from(ThreatError::InvalidConfig("bad".to_string())));
        assert_eq!(err.code, "CONFIG_ERROR");
    }
}
