//! Top-level orchestrator and device discovery (I/O layer).
//!
//! Pure decision logic lives in [`crate::dispatcher`] and below; this
//! module opens the devices, runs the poll loop and cleans up.
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use embedded_graphics::pixelcolor::Rgb565;
use embedded_graphics::prelude::*;
use embedded_graphics::primitives::{Circle, Line, PrimitiveStyle};
use evdev::{AbsoluteAxisType, Device, Key};
use log::{debug, error, info, warn};

use crate::calibration::{Calibration, CalibrationSample, CoordinateMapper, calibration_targets, fit};
use crate::camera::{Camera, CameraError, RpicamCamera};
use crate::capture::{CaptureMachine, Mode};
use crate::config::{AppConfig, parse_config_file};
use crate::dispatcher::{ModeDispatcher, Overlays};
use crate::display::{Canvas, Framebuffer};
use crate::error::NightcamError;
use crate::event::{TouchDevice, TouchReader};
use crate::hud::{HudInfo, SummaryCache, WHITE, YELLOW, draw_hud, draw_text};
use crate::imaging::equalize_histogram;
use crate::overlay::{TerminalOverlay, UsbManagerOverlay};
use crate::power::{self, PowerAction};
use crate::storage::Storage;

const LOOP_INTERVAL: Duration = Duration::from_millis(10);
const CAMERA_BACKOFF: Duration = Duration::from_millis(100);
/// Pause between calibration targets so one tap is not counted twice.
const TARGET_SETTLE: Duration = Duration::from_millis(400);

// -- NightcamManager (top-level orchestrator) -----------------

pub struct NightcamManager {
    config: AppConfig,
    running: Arc<AtomicBool>,
}

impl NightcamManager {
    pub fn new(config_path: impl AsRef<Path>) -> Result<Self, NightcamError> {
        Ok(Self {
            config: parse_config_file(config_path.as_ref())?,
            running: Arc::new(AtomicBool::new(true)),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Open the devices and run until interrupted or powered off.
    ///
    /// Only device-open failures are returned; everything that goes wrong
    /// inside the loop is logged and survived.
    pub fn start(&mut self) -> Result<(), NightcamError> {
        info!("Starting nightcam");

        let config = &self.config;
        let touch_path = resolve_touch_path(config)?;
        let mut fb = Framebuffer::open(&config.framebuffer, (config.display_width, config.display_height))?;
        let (width, height) = (fb.width(), fb.height());

        let mut camera = RpicamCamera::new(config.camera.clone());
        camera.start()?;

        let capture = CaptureMachine::new(camera, Storage::new(config.storage.clone()));
        let overlays = Overlays {
            terminal: Box::new(TerminalOverlay::new(config.terminal_command.clone(), width, height)),
            usb: Box::new(UsbManagerOverlay::new(config.storage.clone(), width, height)),
        };
        let mut dispatcher = ModeDispatcher::new(config, width, height, capture, overlays);
        let mapper = CoordinateMapper::new(config.calibration.clone(), width, height);
        let mut device = TouchDevice::open(&touch_path);

        let power_action = self.event_loop(&mut device, &mapper, &mut dispatcher, &mut fb);

        info!("Cleaning up");
        dispatcher.close_overlay();
        dispatcher.capture_mut().shutdown();
        let mut canvas = Canvas::new(width, height);
        if let Some(action) = power_action {
            draw_text(&mut canvas, &format!("{action}..."), 10, 20, YELLOW);
        }
        fb.present(&canvas);

        if let Some(action) = power_action {
            if let Err(e) = power::execute(action, &config.power, &config.storage) {
                error!("{action} failed: {e}");
            }
        }
        info!("nightcam stopped");
        Ok(())
    }

    fn event_loop(
        &self,
        device: &mut TouchDevice,
        mapper: &CoordinateMapper,
        dispatcher: &mut ModeDispatcher<RpicamCamera>,
        fb: &mut Framebuffer,
    ) -> Option<PowerAction> {
        let mut reader = TouchReader::new();
        let mut canvas = Canvas::new(fb.width(), fb.height());
        let mut summary = SummaryCache::default();

        while self.running.load(Ordering::Relaxed) {
            let now = Instant::now();
            let events = device.poll(&mut reader, mapper, now);
            if let Some(action) = dispatcher.step(&events, reader.finger(), now) {
                info!("Power action requested: {action}");
                return Some(action);
            }

            let camera_ok = render_frame(dispatcher, &mut canvas, &mut summary, now);
            fb.present(&canvas);
            thread::sleep(if camera_ok { LOOP_INTERVAL } else { CAMERA_BACKOFF });
        }
        None
    }

    /// Interactive touch calibration. Returns the fitted constants.
    pub fn run_calibration(&self) -> Result<Calibration, NightcamError> {
        let config = &self.config;
        let touch_path = resolve_touch_path(config)?;
        let mut fb = Framebuffer::open(&config.framebuffer, (config.display_width, config.display_height))?;
        let (width, height) = (fb.width(), fb.height());

        let mut base = config.calibration.clone();
        if let Some((x, y)) = device_axis_ranges(&touch_path) {
            debug!("Raw axis ranges: X {}..{}, Y {}..{}", x.0, x.1, y.0, y.1);
            (base.raw_min_x, base.raw_max_x) = x;
            (base.raw_min_y, base.raw_max_y) = y;
        }
        let mapper = CoordinateMapper::new(base.clone(), width, height);

        let mut device = TouchDevice::open(&touch_path);
        if !device.is_open() {
            return Err(NightcamError::TouchDeviceNotFound(touch_path.display().to_string()));
        }
        let mut reader = TouchReader::new();
        let mut canvas = Canvas::new(width, height);
        let targets = calibration_targets(width, height);
        let mut samples = Vec::with_capacity(targets.len());

        for (i, &target) in targets.iter().enumerate() {
            draw_target(&mut canvas, target, &format!("Tap the cross ({}/{})", i + 1, targets.len()));
            fb.present(&canvas);

            let raw = loop {
                if !self.running.load(Ordering::Relaxed) {
                    return Err(NightcamError::CalibrationError("interrupted".into()));
                }
                let events = device.poll(&mut reader, &mapper, Instant::now());
                if let Some(event) = events.last() {
                    break (event.raw_x, event.raw_y);
                }
                thread::sleep(LOOP_INTERVAL);
            };
            info!("Target {} at {:?}: raw {:?}", i + 1, target, raw);
            samples.push(CalibrationSample { raw, target });

            thread::sleep(TARGET_SETTLE);
            // Discard anything that arrived during the pause.
            let _ = device.poll(&mut reader, &mapper, Instant::now());
        }

        let _ = canvas.clear(Rgb565::BLACK);
        fb.present(&canvas);
        fit(&samples, base, width, height)
    }

    /// Set from construction on. Clearing it, even before `start`, makes
    /// the loops return.
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn config_log_level(&self) -> &str {
        &self.config.log_level
    }

    pub fn config_log_file(&self) -> Option<&str> {
        self.config.log_file.as_deref()
    }
}

/// Camera image (or black while idle) plus HUD. Returns `false` when the
/// camera failed and the loop should back off.
fn render_frame<C: Camera>(
    dispatcher: &mut ModeDispatcher<C>,
    canvas: &mut Canvas,
    summary: &mut SummaryCache,
    now: Instant,
) -> bool {
    if dispatcher.render_overlay(canvas) {
        return true;
    }

    let mut camera_ok = true;
    match dispatcher.mode() {
        Mode::Idle => canvas.fill_black(),
        Mode::Live | Mode::Recording => match dispatcher.capture_mut().camera_mut().capture_frame() {
            Ok(frame) => canvas.blit_gray(&equalize_histogram(&frame)),
            // No preview stream while the encoder owns the sensor.
            Err(CameraError::Busy) => canvas.fill_black(),
            Err(e) => {
                warn!("Camera frame failed: {e}");
                canvas.fill_black();
                camera_ok = false;
            }
        },
    }

    let storage = summary.get(dispatcher.capture_mut().storage_mut(), now);
    let capture = dispatcher.capture();
    let info = HudInfo {
        mode: capture.mode(),
        storage,
        stopping: capture.is_stopping(),
        status: capture.status(now),
    };
    draw_hud(canvas, &info, dispatcher.controls());
    camera_ok
}

fn draw_target(canvas: &mut Canvas, (tx, ty): (u32, u32), prompt: &str) {
    let _ = canvas.clear(Rgb565::BLACK);
    let center = Point::new(tx as i32, ty as i32);
    let style = PrimitiveStyle::with_stroke(WHITE, 1);
    let _ = Line::new(center - Point::new(12, 0), center + Point::new(12, 0))
        .into_styled(style)
        .draw(canvas);
    let _ = Line::new(center - Point::new(0, 12), center + Point::new(0, 12))
        .into_styled(style)
        .draw(canvas);
    let _ = Circle::with_center(center, 12).into_styled(style).draw(canvas);

    let y = canvas.height() as i32 / 2 - 30;
    draw_text(canvas, prompt, 10, y, YELLOW);
}

// -- Device discovery -----------------------------------------

/// Single-touch panel: absolute X/Y and a touch button.
fn is_touch_device(device: &Device) -> bool {
    let Some(abs_axes) = device.supported_absolute_axes() else {
        return false;
    };
    let Some(keys) = device.supported_keys() else {
        return false;
    };
    abs_axes.contains(AbsoluteAxisType::ABS_X)
        && abs_axes.contains(AbsoluteAxisType::ABS_Y)
        && keys.contains(Key::BTN_TOUCH)
}

/// Find a touch panel by its evdev name.
pub fn find_touch_by_name(name: &str) -> Option<PathBuf> {
    for (path, device) in evdev::enumerate() {
        if is_touch_device(&device) && device.name() == Some(name) {
            info!("Found touch device '{name}' at {}", path.display());
            return Some(path);
        }
    }
    warn!("No touch device named '{name}' found");
    None
}

fn resolve_touch_path(config: &AppConfig) -> Result<PathBuf, NightcamError> {
    match &config.touch_name {
        Some(name) => {
            find_touch_by_name(name).ok_or_else(|| NightcamError::TouchDeviceNotFound(name.clone()))
        }
        None => Ok(config.touch_device.clone()),
    }
}

type AxisRange = (i32, i32);

fn device_axis_ranges(path: &Path) -> Option<(AxisRange, AxisRange)> {
    let device = Device::open(path).ok()?;
    let abs = device.get_abs_state().ok()?;
    let x = &abs[AbsoluteAxisType::ABS_X.0 as usize];
    let y = &abs[AbsoluteAxisType::ABS_Y.0 as usize];
    if x.maximum <= x.minimum || y.maximum <= y.minimum {
        return None;
    }
    Some(((x.minimum, x.maximum), (y.minimum, y.maximum)))
}

/// List all single-touch capable devices.
pub fn list_touch_devices() -> ExitCode {
    println!("\n=== nightcam: Available Touchscreen Devices ===\n");
    let mut touch_count = 0;

    for (path, device) in evdev::enumerate() {
        if !is_touch_device(&device) {
            continue;
        }

        touch_count += 1;
        let ranges = device_axis_ranges(&path)
            .map(|(x, y)| format!("X {}..{}, Y {}..{}", x.0, x.1, y.0, y.1))
            .unwrap_or_else(|| "unknown".into());
        println!(
            "Device {touch_count}:\n\
             \x20 Path:      {}\n\
             \x20 Name:      {}\n\
             \x20 Axes:      {ranges}\n\
             \x20 Phys:      {}\n",
            path.display(),
            device.name().unwrap_or("unknown"),
            device.physical_path().unwrap_or("N/A"),
        );
    }

    if touch_count == 0 {
        println!(
            "No touch panels found.\n\n\
             Troubleshooting:\n\
             \x20 - Check that the display overlay is enabled in config.txt\n\
             \x20 - Run 'evtest' to see all input devices\n\
             \x20 - Run as root if devices are not visible"
        );
        return ExitCode::FAILURE;
    }

    println!(
        "Found {touch_count} touch device(s).\n\n\
         Add the path or name to your nightcam.toml:\n\
         \x20 [devices]\n\
         \x20 touch = \"<Path>\"        # or touch_name = \"<Name>\"\n\n\
         Then run 'nightcam --calibrate' to fit the panel to the display."
    );
    ExitCode::SUCCESS
}
