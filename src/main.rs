//! # Smart-Meter Logger Entry Point
//!
//! Acquires readings from a (simulated) smart meter at a fixed interval and appends them to
//! one CSV file per calendar day.
//!
//! ## Pipeline
//! - **Producer:** meter driver on its own thread → bounded reading channel.
//! - **Consumer:** main thread; acquisition-set check → type coercion → CSV sink.
//! - **Signals:** SIGTERM/SIGINT stop the run, SIGUSR1 toggles verbose logging.
//!
//! ## Exit codes
//! - `0` after a signal-driven stop.
//! - `1` on a startup failure or when acquisition ended by itself.

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info};
use std::{path::PathBuf, process::ExitCode, sync::Arc};

use smartmeter_logger::{
    acquisition::{channel::reading_channel, producer::ProducerAdapter, simulated::SimulatedMeter},
    lifecycle::{shutdown::ShutdownCoordinator, signals},
    persistence::{
        consumer::{LoopExit, ReadingConsumer},
        sink::CsvRecordSink,
    },
    utils::{
        config::Settings,
        logging::{self, Verbosity},
        metrics::PipelineStats,
    },
};

#[derive(Debug, Parser)]
#[command(name = "smartmeter_logger", version, about = "Smart-meter telemetry logger")]
struct Cli {
    /// YAML settings file; built-in defaults when omitted.
    #[arg(short, long, env = "SMARTMETER_CONFIG")]
    config: Option<PathBuf>,

    /// Start at the verbose log level (SIGUSR1 toggles it at runtime).
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let settings = match Settings::load(cli.config.as_deref()) {
        Ok(s) => s,
        Err(e) => {
            // No logger yet.
            eprintln!("smartmeter_logger: configuration error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let verbosity = Verbosity::new(cli.verbose);
    if let Err(e) = logging::init(&settings.logging_options(), verbosity.clone()) {
        eprintln!("smartmeter_logger: logging setup failed: {e}");
        return ExitCode::FAILURE;
    }

    info!("=== SMARTMETER LOGGER START ===");
    match run(settings, verbosity) {
        Ok(LoopExit::StopRequested) => {
            info!("=== SMARTMETER LOGGER FINISHED ===");
            ExitCode::SUCCESS
        }
        Ok(exit) => {
            error!("=== SMARTMETER LOGGER ABORTED ({:?}) ===", exit);
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("startup failed: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(settings: Settings, verbosity: Verbosity) -> Result<LoopExit> {
    info!(
        "[Main] unit={} interval={}s properties={:?} output_dir={}",
        settings.unit_id,
        settings.acquisition.interval_seconds,
        settings
            .acquisition
            .properties
            .iter()
            .map(|p| p.as_str())
            .collect::<Vec<_>>(),
        settings.csv.output_dir.display()
    );

    let coordinator = Arc::new(ShutdownCoordinator::new(verbosity));
    // Detached: the listener lives until process exit.
    let _signals = signals::install(coordinator.clone()).context("installing signal handlers")?;

    let naming = settings.destination_naming()?;
    let sink = CsvRecordSink::open(naming).context("opening CSV destination")?;

    let (publisher, receiver) = reading_channel(
        settings.channel.capacity,
        settings.channel.overflow,
        settings.block_timeout(),
    )
    .context("creating reading channel")?;

    let stats = Arc::new(PipelineStats::default());
    let mut consumer = ReadingConsumer::new(
        receiver,
        settings.acquisition.properties.iter().cloned(),
        settings.coercion_table(),
        sink,
        settings.consumer_config(),
        stats,
    );

    let mut producer = ProducerAdapter::new(
        SimulatedMeter::new(settings.simulator.failure_rate),
        publisher,
        settings.producer_config(),
    );
    producer.start().context("starting acquisition")?;

    Ok(consumer.run(&mut producer, &coordinator))
}
