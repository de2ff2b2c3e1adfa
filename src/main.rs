use std::error::Error;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use bpaf::Bpaf;
use chrono::Local;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use vantage_console::decode::Decoder;
use vantage_console::transport::SerialConnection;
use vantage_console::VantageConsole;
use vantage_sync_core::units::RainCollectorSize;
use vantage_sync_core::NamedEnum;

use crate::alarm::{AlarmHistory, AlarmManager};
use crate::archive::ArchiveManager;
use crate::commands::data::DataCommandHandler;
use crate::commands::{command_queue, CommandDispatcher};
use crate::config::Config;
use crate::current::{CurrentWeatherPublisher, TracingSink};
use crate::driver::Driver;
use crate::storm::{StormArchive, StormTracker};
use crate::wind::DominantWindTracker;

mod alarm;
mod archive;
mod commands;
mod config;
mod current;
mod driver;
mod network;
mod server;
mod storm;
mod wind;

#[derive(Clone, Debug, Bpaf)]
enum Command {
    /// Verify an archive file and report ordering and interval problems
    #[bpaf(command)]
    Verify {
        /// Path to the archive file to verify
        #[bpaf(positional("FILE"), guard(|p| p.exists(), "file not found"))]
        file: PathBuf,
    },
    /// Print the records of an archive file as JSON lines
    #[bpaf(command)]
    Dump {
        /// Path to the archive file to dump
        #[bpaf(positional("FILE"), guard(|p| p.exists(), "file not found"))]
        file: PathBuf,
    },
}

#[derive(Clone, Debug, Bpaf)]
#[bpaf(options, version)]
struct Options {
    /// Serial device of the console, overrides the config file
    #[bpaf(short, long)]
    device: Option<String>,
    /// Data directory, overrides the config file
    #[bpaf(long)]
    data_dir: Option<PathBuf>,
    /// Listen address for the JSON command ingress
    #[bpaf(long)]
    listen: Option<String>,
    /// One-shot archive tooling; the daemon runs when no command is given
    #[bpaf(external(command), optional)]
    command: Option<Command>,
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let options = options().run();
    let mut config = Config::load_or_create()?;
    if let Some(device) = options.device {
        config.console.device = device;
    }
    if let Some(data_dir) = options.data_dir {
        config.data.directory = data_dir;
    }
    if let Some(listen) = options.listen {
        config.server.listen = listen;
    }

    match options.command {
        None => run_daemon(config),
        Some(Command::Verify { file }) => {
            let report = ArchiveManager::verify_file(&file)?;
            println!(
                "{}: {} records, {} errors, {} warnings",
                file.display(),
                report.records,
                report.errors,
                report.warnings
            );
            if report.is_clean() {
                Ok(())
            } else {
                Err("archive verification found problems".into())
            }
        }
        Some(Command::Dump { file }) => dump_archive(&file, &config),
    }
}

fn dump_archive(file: &PathBuf, config: &Config) -> Result<(), Box<dyn Error>> {
    let decoder = data_plane_decoder(config);
    let bytes = std::fs::read(file)?;
    for chunk in bytes.chunks_exact(vantage_console::packets::archive::BYTES_PER_RECORD) {
        match vantage_console::packets::ArchiveRecord::decode(chunk, 0) {
            Ok(record) => println!("{}", record.to_json(&decoder)),
            Err(e) => warn!(error = %e, "skipping undecodable record"),
        }
    }
    Ok(())
}

fn data_plane_decoder(config: &Config) -> Decoder {
    match RainCollectorSize::from_name(&config.console.rain_collector) {
        Some(collector) => Decoder::with_rain_collector(collector),
        None => {
            warn!(
                collector = %config.console.rain_collector,
                "unknown rain collector in config, assuming 0.01 inch"
            );
            Decoder::with_rain_collector(RainCollectorSize::PointZeroOneInch)
        }
    }
}

fn run_daemon(config: Config) -> Result<(), Box<dyn Error>> {
    let data_dir = config.data.directory.clone();
    info!(data_dir = %data_dir.display(), "starting vantage-sync");

    let shutdown = Arc::new(AtomicBool::new(false));
    let archive = Arc::new(ArchiveManager::open(&data_dir)?);
    let storms = Arc::new(StormArchive::new(&data_dir.join("storm-archive.txt")));
    let alarm_history = Arc::new(AlarmHistory::new(&data_dir.join("alarm-history.log")));

    // Console side: serial connection, protocol engine, subscribers
    let connection = SerialConnection::open(&config.console.device, config.console.baud)?;
    let console = VantageConsole::new(Box::new(connection));
    let wind = DominantWindTracker::open(
        &data_dir.join("dominant-wind.chk"),
        Local::now().timestamp(),
    );
    let publisher = CurrentWeatherPublisher::new(wind, Box::new(TracingSink));
    let alarms = AlarmManager::new(alarm_history.clone());
    let storm_tracker = StormTracker::new(storms.clone());

    // Command plumbing: one queue per worker, dispatcher in front
    let (console_queue, console_rx) = command_queue();
    let (data_queue, data_rx) = command_queue();
    let dispatcher = Arc::new(CommandDispatcher::new(console_queue.clone(), data_queue));

    let data_handler = DataCommandHandler::new(
        archive.clone(),
        storms,
        alarm_history,
        data_plane_decoder(&config),
        data_rx,
        shutdown.clone(),
    );
    let data_thread = data_handler.spawn()?;

    let driver = Driver::new(
        console,
        archive,
        publisher,
        alarms,
        storm_tracker,
        console_rx,
        console_queue,
        shutdown.clone(),
    );
    let driver_thread = thread::Builder::new()
        .name("console-driver".into())
        .spawn(move || driver.run())?;

    // The async edge: command ingress plus signal handling
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        if config.server.enabled {
            tokio::select! {
                result = server::serve(&config.server.listen, dispatcher) => {
                    if let Err(e) = result {
                        error!(error = %e, "command ingress failed");
                    }
                }
                _ = tokio::signal::ctrl_c() => info!("termination signal received"),
            }
        } else {
            let _ = tokio::signal::ctrl_c().await;
            info!("termination signal received");
        }
    });

    shutdown.store(true, Ordering::SeqCst);
    if driver_thread.join().is_err() {
        error!("console driver thread panicked");
    }
    if data_thread.join().is_err() {
        error!("data command thread panicked");
    }
    info!("vantage-sync stopped");
    Ok(())
}
