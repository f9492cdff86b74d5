//! nightcam: touch-driven night-vision camera.
//!
//! CLI entry point.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Mutex;
use std::sync::atomic::Ordering;

use chrono::Local;
use clap::Parser;
use log::{LevelFilter, Log, Metadata, Record};

use nightcam::manager::{NightcamManager, list_touch_devices};

#[derive(Parser)]
#[command(name = "nightcam", about = "Touch-driven night-vision camera")]
struct Cli {
    /// Path to configuration file
    #[arg(default_value = "/etc/nightcam/nightcam.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// List available touch panels and exit
    #[arg(short, long)]
    list_devices: bool,

    /// Calibrate the touch panel and print a [calibration] section
    #[arg(short, long)]
    calibrate: bool,
}

/// Log sink for the camera: one line per record on stderr (the journal
/// under systemd), mirrored to the configured log file.
struct NightcamLogger {
    level: LevelFilter,
    file: Option<Mutex<File>>,
}

impl NightcamLogger {
    fn format(record: &Record) -> String {
        let stamp = Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
        // "nightcam::capture" -> "capture"
        let module = record
            .target()
            .strip_prefix("nightcam::")
            .unwrap_or(record.target());
        format!("{stamp} {:<5} [{module}] {}\n", record.level(), record.args())
    }

    fn with_file<F: FnOnce(&mut File)>(&self, f: F) {
        if let Some(file) = &self.file {
            if let Ok(mut guard) = file.lock() {
                f(&mut guard);
            }
        }
    }
}

impl Log for NightcamLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level && metadata.target().starts_with("nightcam")
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = Self::format(record);
        eprint!("{line}");
        self.with_file(|f| {
            let _ = f.write_all(line.as_bytes());
        });
    }

    fn flush(&self) {
        self.with_file(|f| {
            let _ = f.flush();
        });
    }
}

/// `--verbose` wins over `log_level` from the config file.
fn init_logging(manager: &NightcamManager, verbose: bool) {
    let level = match (verbose, manager.config_log_level().parse()) {
        (true, _) => LevelFilter::Debug,
        (false, Ok(level)) => level,
        (false, Err(_)) => {
            eprintln!(
                "Warning: unknown log_level '{}', using info",
                manager.config_log_level()
            );
            LevelFilter::Info
        }
    };

    let file = manager.config_log_file().and_then(|path| {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map(Mutex::new)
            .map_err(|e| eprintln!("Warning: cannot open log file '{path}': {e}"))
            .ok()
    });

    log::set_boxed_logger(Box::new(NightcamLogger { level, file })).expect("Failed to set logger");
    log::set_max_level(level);
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.list_devices {
        return list_touch_devices();
    }

    // Config comes before the logger so the configured level applies.
    let mut manager = match NightcamManager::new(&cli.config) {
        Ok(m) => m,
        Err(e) => {
            eprintln!(
                "Error: {e}\n\n\
                 To find the touch panel, run:\n\
                 \x20 nightcam --list-devices"
            );
            return ExitCode::FAILURE;
        }
    };
    init_logging(&manager, cli.verbose);

    let running = manager.running_flag();
    ctrlc::set_handler(move || {
        running.store(false, Ordering::Relaxed);
    })
    .expect("Error setting Ctrl-C handler");

    log::info!("Loading configuration from: {}", cli.config.display());

    if cli.calibrate {
        return match manager.run_calibration() {
            Ok(calibration) => {
                println!("{}", calibration.to_toml());
                ExitCode::SUCCESS
            }
            Err(e) => {
                log::error!("{e}");
                ExitCode::FAILURE
            }
        };
    }

    match manager.start() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}
