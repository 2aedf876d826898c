//! Gravity BCI command-line front end
//!
//! Train, evaluate and run the motor-imagery control pipeline.
//!
//! # Usage
//!
//! ```bash
//! # Record-like synthetic session, then train and evaluate on it
//! gravity-bci simulate --output session.csv
//! gravity-bci train --input session.csv --output model.json
//! gravity-bci evaluate --model model.json --input held_out.csv
//!
//! # Live session from the synthetic generator or an LSL stream
//! gravity-bci run --model model.json --source synthetic --duration-s 60
//! gravity-bci run --model model.json --source lsl
//!
//! # Publish synthetic EEG as the "EEG_BCI" LSL stream
//! gravity-bci stream
//! ```

mod recording;

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use gravity_bci_core::{BciConfig, ClassifierKind, Model};
use gravity_bci_native::bridge::lsl::{LslOutlet, StreamInfo, StreamType, DEFAULT_RESOLVE_TIMEOUT, DEFAULT_STREAM_NAME};
use gravity_bci_native::bridge::{LslSource, SampleSource, SourceRead, SyntheticSource};
use gravity_bci_native::{
    artifact, evaluate, PipelineSettings, Session, SessionEvent, SyntheticEeg, SyntheticEegConfig, Trainer,
    TrialProtocol,
};
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// Gravity BCI
#[derive(Parser, Debug)]
#[command(name = "gravity-bci")]
#[command(author, version, about = "Motor-imagery EEG to game control", long_about = None)]
struct Cli {
    /// Logging verbosity level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// JSON configuration file (defaults are used when omitted)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the analysis window length (ms)
    #[arg(long, global = true)]
    window_ms: Option<u32>,

    /// Override the stride between windows (ms)
    #[arg(long, global = true)]
    stride_ms: Option<u32>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum SourceKind {
    /// Built-in synthetic generator alternating MI and REST
    Synthetic,
    /// Lab Streaming Layer stream `EEG_BCI` (or any EEG stream)
    Lsl,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum ClassifierArg {
    /// Shrinkage linear discriminant
    Lda,
    /// Standardized nearest class mean
    NearestMean,
}

impl From<ClassifierArg> for ClassifierKind {
    fn from(arg: ClassifierArg) -> Self {
        match arg {
            ClassifierArg::Lda => Self::Lda,
            ClassifierArg::NearestMean => Self::NearestMean,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Fit a model on a labelled CSV recording
    Train {
        /// Recording (Ch1..ChN, Label, Timestamp)
        #[arg(short, long)]
        input: PathBuf,

        /// Model artifact to write
        #[arg(short, long, default_value = "model.json")]
        output: PathBuf,

        /// Classifier family (overrides the configuration)
        #[arg(long, value_enum)]
        classifier: Option<ClassifierArg>,
    },

    /// Replay a labelled CSV recording through a model
    Evaluate {
        /// Model artifact
        #[arg(short, long)]
        model: PathBuf,

        /// Recording (Ch1..ChN, Label, Timestamp)
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Run a live session and log control flips
    Run {
        /// Model artifact
        #[arg(short, long)]
        model: PathBuf,

        /// Where samples come from
        #[arg(short, long, value_enum, default_value = "synthetic")]
        source: SourceKind,

        /// Stop after this many seconds (runs until the source ends otherwise)
        #[arg(long)]
        duration_s: Option<u64>,

        /// Synthetic source: length of each REST / MI block (ms)
        #[arg(long, default_value = "4000")]
        block_ms: u32,

        /// Synthetic source: random seed
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Write a synthetic labelled recording
    Simulate {
        /// CSV file to write
        #[arg(short, long)]
        output: PathBuf,

        /// Trials of each class
        #[arg(long, default_value = "10")]
        trials_per_class: usize,

        /// Recorded length of one trial (ms)
        #[arg(long, default_value = "3000")]
        trial_ms: u32,

        /// Random seed
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Publish synthetic EEG on an LSL outlet
    Stream {
        /// Stream name
        #[arg(long, default_value = DEFAULT_STREAM_NAME)]
        name: String,

        /// Stop after this many seconds
        #[arg(long)]
        duration_s: Option<u64>,

        /// Length of each REST / MI block (ms)
        #[arg(long, default_value = "4000")]
        block_ms: u32,

        /// Random seed
        #[arg(long)]
        seed: Option<u64>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Gravity BCI v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&cli)?;

    match cli.command {
        Commands::Train { input, output, classifier } => train(config, &input, &output, classifier),
        Commands::Evaluate { model, input } => run_evaluation(&config, &model, &input),
        Commands::Run { model, source, duration_s, block_ms, seed } => {
            run_live(config, &model, source, duration_s.map(Duration::from_secs), block_ms, seed)
        }
        Commands::Simulate { output, trials_per_class, trial_ms, seed } => {
            simulate(&config, &output, trials_per_class, trial_ms, seed)
        }
        Commands::Stream { name, duration_s, block_ms, seed } => {
            stream(&config, &name, duration_s.map(Duration::from_secs), block_ms, seed)
        }
    }
}

/// Configuration file (or defaults) plus command-line overrides
fn load_config(cli: &Cli) -> anyhow::Result<BciConfig> {
    let mut config = match &cli.config {
        Some(path) => artifact::load_config(path)?,
        None => BciConfig::default(),
    };
    if let Some(window_ms) = cli.window_ms {
        config.window_length_ms = window_ms;
    }
    if let Some(stride_ms) = cli.stride_ms {
        config.stride_ms = stride_ms;
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn seed_or_random(seed: Option<u64>) -> u64 {
    let seed = seed.unwrap_or_else(rand::random);
    debug!("Synthetic seed {}", seed);
    seed
}

fn synthetic_config(config: &BciConfig) -> SyntheticEegConfig {
    SyntheticEegConfig {
        sample_rate_hz: config.sample_rate_hz,
        channel_labels: config.channel_labels.clone(),
        ..SyntheticEegConfig::default()
    }
}

/// The configuration with the model's montage and rate
fn config_for_model(config: &BciConfig, model: &Model) -> BciConfig {
    BciConfig {
        channel_labels: model.signal.channel_labels.clone(),
        sample_rate_hz: model.signal.sample_rate_hz,
        ..config.clone()
    }
}

// ============================================================================
// Offline commands
// ============================================================================

fn train(
    mut config: BciConfig,
    input: &Path,
    output: &Path,
    classifier: Option<ClassifierArg>,
) -> anyhow::Result<()> {
    if let Some(classifier) = classifier {
        config.classifier = classifier.into();
    }
    let recording = recording::read_recording(input, &config)?;
    let model = Trainer::new(config)?.fit(&recording)?;

    let summary = &model.summary;
    info!(
        "Trained on {} REST / {} MI windows ({} discarded): training accuracy {:.3}",
        summary.rest_windows, summary.mi_windows, summary.discarded_windows, summary.training_accuracy
    );
    match summary.cross_validation_accuracy {
        Some(accuracy) => info!("Cross-validated accuracy {:.3}", accuracy),
        None => warn!("Too few windows for cross-validation"),
    }

    artifact::save_model(output, &model)?;
    Ok(())
}

fn run_evaluation(config: &BciConfig, model_path: &Path, input: &Path) -> anyhow::Result<()> {
    let model = artifact::load_model(model_path)?;
    let config = config_for_model(config, &model);
    let recording = recording::read_recording(input, &config)?;

    let report = evaluate(&model, &recording, PipelineSettings::from(&config))?;
    info!(
        "{} ticks, {} scored windows: raw accuracy {:.3}, smoothed accuracy {:.3}, {} flips, {} skipped",
        report.ticks,
        report.scored_windows,
        report.raw_accuracy,
        report.smoothed_accuracy,
        report.flips,
        report.skipped_ticks
    );
    Ok(())
}

fn simulate(
    config: &BciConfig,
    output: &Path,
    trials_per_class: usize,
    trial_ms: u32,
    seed: Option<u64>,
) -> anyhow::Result<()> {
    let protocol = TrialProtocol { trials_per_class, trial_duration_ms: trial_ms, ..TrialProtocol::default() };
    let mut eeg = SyntheticEeg::new(synthetic_config(config), seed_or_random(seed));
    let recording = eeg.record(&protocol);
    info!(
        "Simulated {} trials ({:.0} s session, {:.1} s recorded)",
        protocol.trial_count(),
        protocol.session_duration_s(),
        recording.duration_s()
    );
    recording::write_recording(output, &recording)
}

// ============================================================================
// Live commands
// ============================================================================

fn run_live(
    config: BciConfig,
    model_path: &Path,
    source_kind: SourceKind,
    duration: Option<Duration>,
    block_ms: u32,
    seed: Option<u64>,
) -> anyhow::Result<()> {
    let model = artifact::load_model(model_path)?;
    let session = Session::new(model, config)?;

    let source: Box<dyn SampleSource> = match source_kind {
        SourceKind::Synthetic => {
            let signal = &session.model().signal;
            let synthetic = SyntheticEegConfig {
                sample_rate_hz: signal.sample_rate_hz,
                channel_labels: signal.channel_labels.clone(),
                ..SyntheticEegConfig::default()
            };
            Box::new(SyntheticSource::new(SyntheticEeg::new(synthetic, seed_or_random(seed)), block_ms))
        }
        SourceKind::Lsl => {
            info!("Resolving LSL stream '{}'...", DEFAULT_STREAM_NAME);
            Box::new(LslSource::resolve_default(DEFAULT_RESOLVE_TIMEOUT)?)
        }
    };

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run_session(session, source, duration))
}

async fn run_session(session: Session, source: Box<dyn SampleSource>, duration: Option<Duration>) -> anyhow::Result<()> {
    let mut handle = session.start(source)?;
    let mut events = handle.take_events().context("session events already taken")?;

    let deadline = async {
        match duration {
            Some(duration) => tokio::time::sleep(duration).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            () = &mut deadline => {
                info!("Run time elapsed");
                break;
            }
            event = events.recv() => match event {
                Some(event) => log_event(&event),
                None => break,
            },
        }
    }

    let summary = handle.shutdown().await?;
    info!(
        "{} ticks ({} decided, {} skipped), {} flips, {} quality warnings",
        summary.ticks, summary.decided, summary.skipped, summary.flips, summary.warnings
    );
    Ok(())
}

fn log_event(event: &SessionEvent) {
    match event {
        SessionEvent::Flipped { tick, control } => info!(
            "tick {}: {} ({}), confidence {:.2}",
            tick,
            control.state,
            if control.is_airborne() { "thrust" } else { "fall" },
            control.confidence
        ),
        SessionEvent::Skipped { tick, reason, consecutive } => {
            debug!("tick {} skipped ({}), {} in a row", tick, reason, consecutive);
        }
        SessionEvent::QualityWarning(warning) => warn!("{}", warning),
        SessionEvent::SourceStalled { silent_ms } => warn!("Source silent for {} ms", silent_ms),
        SessionEvent::SourceEnded => info!("Source ended"),
        SessionEvent::SourceDisconnected { reason } => error!("Source disconnected: {}", reason),
    }
}

fn stream(
    config: &BciConfig,
    name: &str,
    duration: Option<Duration>,
    block_ms: u32,
    seed: Option<u64>,
) -> anyhow::Result<()> {
    let synthetic = synthetic_config(config);
    let info = StreamInfo::new(name, StreamType::Eeg, synthetic.channel_labels.clone(), synthetic.sample_rate_hz);
    let mut outlet = LslOutlet::new(&info)?;
    let mut source = SyntheticSource::new(SyntheticEeg::new(synthetic, seed_or_random(seed)), block_ms);

    let start = Instant::now();
    let mut clients = 0;
    while duration.map_or(true, |d| start.elapsed() < d) {
        if let SourceRead::Samples(chunk) = source.read_chunk(Duration::from_millis(100))? {
            for sample in &chunk {
                outlet.push_sample(&sample.values)?;
            }
        }
        if outlet.client_count() != clients {
            clients = outlet.client_count();
            info!("{} consumer(s) connected, now sending {}", clients, source.current_state());
        }
    }

    info!("Streamed {} samples", outlet.sample_count());
    Ok(())
}
