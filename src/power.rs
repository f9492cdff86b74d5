//! Power gestures (reboot / shutdown) and the privileged commands behind them.

use std::fs;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use log::{info, warn};
use strum::Display;

use crate::capture::Mode;
use crate::config::{PowerConfig, PowerPolicy, StorageConfig, Thresholds};
use crate::error::NightcamError;
use crate::event::FingerState;
use crate::storage::is_mount_point;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum PowerAction {
    #[strum(serialize = "reboot")]
    Reboot,
    #[strum(serialize = "shutdown")]
    Shutdown,
}

/// Decides when a held or released very long press becomes a power action.
#[derive(Debug)]
pub struct PowerWatchdog {
    policy: PowerPolicy,
    very_long_press: Duration,
    shutdown_hold: Duration,
    fired_for: Option<Instant>,
}

impl PowerWatchdog {
    pub fn new(thresholds: &Thresholds, power: &PowerConfig) -> Self {
        Self {
            policy: power.policy,
            very_long_press: thresholds.very_long_press,
            shutdown_hold: power.shutdown_hold,
            fired_for: None,
        }
    }

    pub fn policy(&self) -> PowerPolicy {
        self.policy
    }

    /// Evaluated every iteration while the finger may still be down, so
    /// shutdown does not wait for the release. Fires at most once per press.
    pub fn check_hold(&mut self, finger: FingerState, mode: Mode, now: Instant) -> Option<PowerAction> {
        let down_since = finger.down_since?;
        if self.fired_for == Some(down_since) {
            return None;
        }
        let held = finger.held_for(now)?;
        let fire = match self.policy {
            PowerPolicy::IdleShutdown => mode == Mode::Idle && held >= self.very_long_press,
            PowerPolicy::Staged => held >= self.shutdown_hold,
        };
        if !fire {
            return None;
        }
        self.fired_for = Some(down_since);
        info!("Held {:.1}s in {mode} -> shutdown", held.as_secs_f64());
        Some(PowerAction::Shutdown)
    }

    /// Action for a released very long press. A press whose hold already
    /// fired produces nothing on release.
    pub fn on_release(&mut self, press: Duration, mode: Mode) -> Option<PowerAction> {
        if self.fired_for.take().is_some() {
            return None;
        }
        match self.policy {
            PowerPolicy::IdleShutdown if mode == Mode::Idle => Some(PowerAction::Shutdown),
            PowerPolicy::IdleShutdown => {
                info!("Very long press ignored in {mode}");
                None
            }
            PowerPolicy::Staged if press >= self.shutdown_hold => Some(PowerAction::Shutdown),
            PowerPolicy::Staged => Some(PowerAction::Reboot),
        }
    }
}

// -- Privileged commands --------------------------------------

/// Run `argv` to completion; non-zero exit is an error.
pub fn run_command(argv: &[String]) -> Result<(), NightcamError> {
    let Some((program, args)) = argv.split_first() else {
        return Err(NightcamError::CommandError {
            command: String::new(),
            message: "empty command".into(),
        });
    };
    let command = argv.join(" ");
    let status = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .status()
        .map_err(|e| NightcamError::CommandError {
            command: command.clone(),
            message: e.to_string(),
        })?;
    if !status.success() {
        return Err(NightcamError::CommandError {
            command,
            message: status.to_string(),
        });
    }
    Ok(())
}

pub fn sync_filesystems() {
    // SAFETY: sync(2) takes no arguments and cannot fail.
    unsafe { libc::sync() };
}

/// Lazily unmount every mounted `usb*` directory under `roots`, running
/// `unmount_command -l <path>` for each.
pub fn unmount_media(roots: &[PathBuf], unmount_command: &[String]) {
    for root in roots {
        let Ok(entries) = fs::read_dir(root) else {
            continue;
        };
        for entry in entries.filter_map(Result::ok) {
            let path = entry.path();
            if !entry.file_name().to_string_lossy().starts_with("usb") || !is_mount_point(&path) {
                continue;
            }
            info!("Unmounting {}", path.display());
            let mut argv = unmount_command.to_vec();
            argv.extend(["-l".to_string(), path.display().to_string()]);
            if let Err(e) = run_command(&argv) {
                warn!("{e}");
            }
        }
    }
}

/// Flush and hand over to the system. The caller must already have
/// stopped any recording.
pub fn execute(action: PowerAction, config: &PowerConfig, storage: &StorageConfig) -> Result<(), NightcamError> {
    info!("{action}: syncing filesystems");
    sync_filesystems();
    let argv = match action {
        PowerAction::Shutdown => {
            unmount_media(&storage.media_roots, &storage.unmount_command);
            sync_filesystems();
            &config.poweroff_command
        }
        PowerAction::Reboot => &config.reboot_command,
    };
    info!("{action}: running {}", argv.join(" "));
    run_command(argv)
}
