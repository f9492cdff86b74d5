//! Configuration data structures and TOML parsing.
//!
//! The config file uses TOML format. Every section and key is optional;
//! missing values fall back to the defaults of the reference hardware
//! (3.5" 480x320 SPI display with an ADS7846 resistive panel). Example:
//!
//! ```toml
//! [global]
//! log_level = "info"
//!
//! [devices]
//! framebuffer = "/dev/fb1"
//! touch = "/dev/input/event0"
//!
//! [thresholds]
//! long_press = 0.8
//! very_long_press = 2.5
//! double_tap_window = 0.35
//!
//! [power]
//! policy = "staged"
//! shutdown_hold = 5.0
//!
//! [calibration]
//! swap_axes = true
//! flip_x = true
//! scale_x = 1.05
//! offset_y = -12.0
//!
//! [controls.terminal]
//! x = 10
//! y = -40
//! width = 70
//! height = 30
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::debug;
use serde::Deserialize;
use strum::{Display, EnumString};

use crate::calibration::Calibration;
use crate::display::Rect;
use crate::error::NightcamError;

const DEFAULT_FRAMEBUFFER: &str = "/dev/fb1";
const DEFAULT_TOUCH: &str = "/dev/input/event0";
const DEFAULT_WIDTH: u32 = 480;
const DEFAULT_HEIGHT: u32 = 320;
const DEFAULT_LONG_PRESS: f64 = 0.8;
const DEFAULT_VERY_LONG_PRESS: f64 = 2.5;
const DEFAULT_DOUBLE_TAP_WINDOW: f64 = 0.35;
const DEFAULT_SHUTDOWN_HOLD: f64 = 5.0;

// -- Raw (deserialized) layer ---------------------------------

/// Root of the TOML config file.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawConfig {
    global: RawGlobal,
    devices: RawDevices,
    display: RawDisplay,
    thresholds: RawThresholds,
    power: RawPower,
    calibration: RawCalibration,
    controls: RawControls,
    storage: RawStorage,
    camera: RawCamera,
    terminal: RawTerminal,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawGlobal {
    log_level: Option<String>,
    log_file: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawDevices {
    framebuffer: Option<PathBuf>,
    touch: Option<PathBuf>,
    touch_name: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawDisplay {
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawThresholds {
    long_press: Option<f64>,
    very_long_press: Option<f64>,
    double_tap_window: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawPower {
    policy: Option<String>,
    shutdown_hold: Option<f64>,
    poweroff_command: Option<Vec<String>>,
    reboot_command: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawCalibration {
    raw_min_x: Option<i32>,
    raw_max_x: Option<i32>,
    raw_min_y: Option<i32>,
    raw_max_y: Option<i32>,
    swap_axes: Option<bool>,
    flip_x: Option<bool>,
    flip_y: Option<bool>,
    scale_x: Option<f64>,
    scale_y: Option<f64>,
    offset_x: Option<f64>,
    offset_y: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawControls {
    terminal: RawRegion,
    usb: RawRegion,
}

#[derive(Debug, Deserialize, Default, Clone, Copy)]
#[serde(default)]
struct RawRegion {
    x: Option<i32>,
    y: Option<i32>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawStorage {
    fallback_dir: Option<PathBuf>,
    media_roots: Option<Vec<PathBuf>>,
    usb_device: Option<PathBuf>,
    mount_point: Option<PathBuf>,
    auto_mount: Option<bool>,
    mount_command: Option<Vec<String>>,
    unmount_command: Option<Vec<String>>,
    cache_secs: Option<f64>,
    recheck_secs: Option<f64>,
    photo_bytes: Option<u64>,
    video_mbytes_per_sec: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawCamera {
    width: Option<u32>,
    height: Option<u32>,
    framerate: Option<u32>,
    bitrate: Option<u32>,
    preview_program: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawTerminal {
    command: Option<Vec<String>>,
}

// -- Resolved layer -------------------------------------------

/// Gesture timing thresholds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    /// Presses at least this long start a recording.
    pub long_press: Duration,
    /// Presses at least this long are power gestures.
    pub very_long_press: Duration,
    /// Maximum gap between two tap releases forming a double tap.
    pub double_tap_window: Duration,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            long_press: Duration::from_secs_f64(DEFAULT_LONG_PRESS),
            very_long_press: Duration::from_secs_f64(DEFAULT_VERY_LONG_PRESS),
            double_tap_window: Duration::from_secs_f64(DEFAULT_DOUBLE_TAP_WINDOW),
        }
    }
}

/// How very long presses map to power operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
pub enum PowerPolicy {
    /// A very long press shuts down, but only while idle.
    #[strum(serialize = "idle_shutdown")]
    IdleShutdown,
    /// In any mode: a very long press reboots, holding past
    /// `shutdown_hold` shuts down.
    #[strum(serialize = "staged")]
    Staged,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PowerConfig {
    pub policy: PowerPolicy,
    pub shutdown_hold: Duration,
    pub poweroff_command: Vec<String>,
    pub reboot_command: Vec<String>,
}

/// Control button placement. Negative `x`/`y` are measured from the
/// right/bottom display edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionSpec {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl RegionSpec {
    /// Resolve against the actual display size.
    pub fn resolve(&self, display_width: u32, display_height: u32) -> Rect {
        let anchor = |pos: i32, extent: u32| -> u32 {
            if pos < 0 {
                (extent as i64 + pos as i64).max(0) as u32
            } else {
                pos as u32
            }
        };
        Rect::new(
            anchor(self.x, display_width),
            anchor(self.y, display_height),
            self.width,
            self.height,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlsConfig {
    pub terminal: RegionSpec,
    pub usb: RegionSpec,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StorageConfig {
    pub fallback_dir: PathBuf,
    pub media_roots: Vec<PathBuf>,
    pub usb_device: PathBuf,
    pub mount_point: PathBuf,
    pub auto_mount: bool,
    /// Mount program; `-o <options> <device> <mount_point>` is appended.
    pub mount_command: Vec<String>,
    /// Unmount program; the mount path is appended.
    pub unmount_command: Vec<String>,
    pub cache_ttl: Duration,
    pub recheck_interval: Duration,
    pub photo_bytes: u64,
    pub video_mbytes_per_sec: f64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraConfig {
    pub width: u32,
    pub height: u32,
    pub framerate: u32,
    pub bitrate: u32,
    pub preview_program: String,
}

/// Top-level parsed configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_file: Option<String>,
    pub framebuffer: PathBuf,
    pub touch_device: PathBuf,
    pub touch_name: Option<String>,
    /// Display size used when the framebuffer cannot report its own.
    pub display_width: u32,
    pub display_height: u32,
    pub thresholds: Thresholds,
    pub power: PowerConfig,
    pub calibration: Calibration,
    pub controls: ControlsConfig,
    pub storage: StorageConfig,
    pub camera: CameraConfig,
    pub terminal_command: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        // The all-default raw config always validates.
        RawConfig::default()
            .resolve()
            .unwrap_or_else(|e| unreachable!("default config is invalid: {e}"))
    }
}

fn secs(value: Option<f64>, default: f64, name: &str) -> Result<Duration, NightcamError> {
    let v = value.unwrap_or(default);
    if !v.is_finite() || v < 0.0 {
        return Err(NightcamError::InvalidConfig(format!(
            "{name} must be a non-negative number of seconds, got {v}"
        )));
    }
    Duration::try_from_secs_f64(v)
        .map_err(|e| NightcamError::InvalidConfig(format!("{name} is out of range, got {v}: {e}")))
}

fn region(
    raw: RawRegion,
    default: RegionSpec,
    display: (u32, u32),
    name: &str,
) -> Result<RegionSpec, NightcamError> {
    let spec = RegionSpec {
        x: raw.x.unwrap_or(default.x),
        y: raw.y.unwrap_or(default.y),
        width: raw.width.unwrap_or(default.width),
        height: raw.height.unwrap_or(default.height),
    };
    if spec.width > display.0 || spec.height > display.1 {
        return Err(NightcamError::InvalidConfig(format!(
            "{name} must fit the {}x{} display",
            display.0, display.1
        )));
    }
    Ok(spec)
}

fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/root"))
}

fn non_empty_command(
    value: Option<Vec<String>>,
    default: &[&str],
    name: &str,
) -> Result<Vec<String>, NightcamError> {
    let cmd = value.unwrap_or_else(|| default.iter().map(|s| s.to_string()).collect());
    if cmd.is_empty() || cmd[0].is_empty() {
        return Err(NightcamError::InvalidConfig(format!("{name} must not be empty")));
    }
    Ok(cmd)
}

impl RawCalibration {
    fn resolve(&self) -> Result<Calibration, NightcamError> {
        let d = Calibration::default();
        let cal = Calibration {
            raw_min_x: self.raw_min_x.unwrap_or(d.raw_min_x),
            raw_max_x: self.raw_max_x.unwrap_or(d.raw_max_x),
            raw_min_y: self.raw_min_y.unwrap_or(d.raw_min_y),
            raw_max_y: self.raw_max_y.unwrap_or(d.raw_max_y),
            swap_axes: self.swap_axes.unwrap_or(d.swap_axes),
            flip_x: self.flip_x.unwrap_or(d.flip_x),
            flip_y: self.flip_y.unwrap_or(d.flip_y),
            scale_x: self.scale_x.unwrap_or(d.scale_x),
            scale_y: self.scale_y.unwrap_or(d.scale_y),
            offset_x: self.offset_x.unwrap_or(d.offset_x),
            offset_y: self.offset_y.unwrap_or(d.offset_y),
        };
        if cal.raw_max_x <= cal.raw_min_x || cal.raw_max_y <= cal.raw_min_y {
            return Err(NightcamError::InvalidConfig(
                "calibration raw_max must be greater than raw_min on both axes".into(),
            ));
        }
        if ![cal.scale_x, cal.scale_y, cal.offset_x, cal.offset_y]
            .iter()
            .all(|v| v.is_finite())
            || cal.scale_x == 0.0
            || cal.scale_y == 0.0
        {
            return Err(NightcamError::InvalidConfig(
                "calibration scale must be non-zero and all factors finite".into(),
            ));
        }
        Ok(cal)
    }
}

impl RawConfig {
    fn resolve(self) -> Result<AppConfig, NightcamError> {
        let display_width = self.display.width.unwrap_or(DEFAULT_WIDTH);
        let display_height = self.display.height.unwrap_or(DEFAULT_HEIGHT);
        if display_width == 0 || display_height == 0 {
            return Err(NightcamError::InvalidConfig(
                "display width and height must be non-zero".into(),
            ));
        }

        let thresholds = Thresholds {
            long_press: secs(
                self.thresholds.long_press,
                DEFAULT_LONG_PRESS,
                "thresholds.long_press",
            )?,
            very_long_press: secs(
                self.thresholds.very_long_press,
                DEFAULT_VERY_LONG_PRESS,
                "thresholds.very_long_press",
            )?,
            double_tap_window: secs(
                self.thresholds.double_tap_window,
                DEFAULT_DOUBLE_TAP_WINDOW,
                "thresholds.double_tap_window",
            )?,
        };
        if thresholds.long_press >= thresholds.very_long_press {
            return Err(NightcamError::InvalidConfig(format!(
                "thresholds.long_press ({:?}) must be shorter than very_long_press ({:?})",
                thresholds.long_press, thresholds.very_long_press
            )));
        }

        let policy_name = self.power.policy.as_deref().unwrap_or("idle_shutdown");
        let policy: PowerPolicy = policy_name.parse().map_err(|_| {
            NightcamError::InvalidConfig(format!(
                "unknown power.policy '{policy_name}' (expected idle_shutdown or staged)"
            ))
        })?;
        let shutdown_hold = secs(
            self.power.shutdown_hold,
            DEFAULT_SHUTDOWN_HOLD,
            "power.shutdown_hold",
        )?;
        if policy == PowerPolicy::Staged && shutdown_hold <= thresholds.very_long_press {
            return Err(NightcamError::InvalidConfig(format!(
                "power.shutdown_hold ({shutdown_hold:?}) must exceed \
                 thresholds.very_long_press ({:?}) under the staged policy",
                thresholds.very_long_press
            )));
        }
        let power = PowerConfig {
            policy,
            shutdown_hold,
            poweroff_command: non_empty_command(
                self.power.poweroff_command,
                &["sudo", "poweroff"],
                "power.poweroff_command",
            )?,
            reboot_command: non_empty_command(
                self.power.reboot_command,
                &["sudo", "reboot"],
                "power.reboot_command",
            )?,
        };

        let controls = ControlsConfig {
            terminal: region(
                self.controls.terminal,
                RegionSpec { x: 10, y: -40, width: 70, height: 30 },
                (display_width, display_height),
                "controls.terminal",
            )?,
            usb: region(
                self.controls.usb,
                RegionSpec { x: 90, y: -40, width: 70, height: 30 },
                (display_width, display_height),
                "controls.usb",
            )?,
        };

        let storage = StorageConfig {
            fallback_dir: self
                .storage
                .fallback_dir
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(home_dir),
            media_roots: self
                .storage
                .media_roots
                .unwrap_or_else(|| vec![PathBuf::from("/media/pi"), PathBuf::from("/media")]),
            usb_device: self
                .storage
                .usb_device
                .unwrap_or_else(|| PathBuf::from("/dev/sda1")),
            mount_point: self
                .storage
                .mount_point
                .unwrap_or_else(|| PathBuf::from("/media/usb")),
            auto_mount: self.storage.auto_mount.unwrap_or(true),
            mount_command: non_empty_command(
                self.storage.mount_command,
                &["sudo", "mount"],
                "storage.mount_command",
            )?,
            unmount_command: non_empty_command(
                self.storage.unmount_command,
                &["sudo", "umount"],
                "storage.unmount_command",
            )?,
            cache_ttl: secs(self.storage.cache_secs, 5.0, "storage.cache_secs")?,
            recheck_interval: secs(self.storage.recheck_secs, 2.0, "storage.recheck_secs")?,
            photo_bytes: self.storage.photo_bytes.unwrap_or(500_000).max(1),
            video_mbytes_per_sec: self.storage.video_mbytes_per_sec.unwrap_or(0.5),
        };
        if storage.video_mbytes_per_sec.is_nan() || storage.video_mbytes_per_sec <= 0.0 {
            return Err(NightcamError::InvalidConfig(
                "storage.video_mbytes_per_sec must be positive".into(),
            ));
        }

        let camera = CameraConfig {
            width: self.camera.width.unwrap_or(640),
            height: self.camera.height.unwrap_or(480),
            framerate: self.camera.framerate.unwrap_or(10).max(1),
            bitrate: self.camera.bitrate.unwrap_or(4_000_000),
            preview_program: self
                .camera
                .preview_program
                .unwrap_or_else(|| "rpicam-vid".to_string()),
        };
        if camera.width == 0 || camera.height == 0 {
            return Err(NightcamError::InvalidConfig(
                "camera width and height must be non-zero".into(),
            ));
        }

        let touch_name = self.devices.touch_name.filter(|s| !s.is_empty());
        if let Some(name) = &touch_name {
            debug!("Touch device will be looked up by name '{name}'");
        }

        Ok(AppConfig {
            log_level: self.global.log_level.unwrap_or_else(|| "info".to_string()),
            log_file: self.global.log_file,
            framebuffer: self
                .devices
                .framebuffer
                .unwrap_or_else(|| PathBuf::from(DEFAULT_FRAMEBUFFER)),
            touch_device: self
                .devices
                .touch
                .unwrap_or_else(|| PathBuf::from(DEFAULT_TOUCH)),
            touch_name,
            display_width,
            display_height,
            thresholds,
            power,
            calibration: self.calibration.resolve()?,
            controls,
            storage,
            camera,
            terminal_command: non_empty_command(
                self.terminal.command,
                &["journalctl", "--follow", "--lines", "40"],
                "terminal.command",
            )?,
        })
    }
}

/// Parse TOML text into the fully resolved `AppConfig`.
pub fn parse_config_str(text: &str, origin: &Path) -> Result<AppConfig, NightcamError> {
    let raw: RawConfig = toml::from_str(text).map_err(|e| NightcamError::ConfigParseError {
        path: origin.to_path_buf(),
        message: e.to_string(),
    })?;
    raw.resolve()
}

/// Parse a TOML config file and return the fully resolved `AppConfig`.
pub fn parse_config_file(path: &Path) -> Result<AppConfig, NightcamError> {
    let text = fs::read_to_string(path).map_err(|e| NightcamError::ConfigReadError {
        path: path.to_path_buf(),
        source: e,
    })?;
    parse_config_str(&text, path)
}
