//! Shared fakes for the integration tests: camera, recordings, overlays
//! and a ready-made dispatcher rig.
#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use image::{GrayImage, Luma};
use tempfile::TempDir;

use nightcam::NightcamError;
use nightcam::camera::{Camera, CameraError, Recording};
use nightcam::capture::CaptureMachine;
use nightcam::config::{AppConfig, StorageConfig};
use nightcam::dispatcher::{ModeDispatcher, Overlays};
use nightcam::display::Canvas;
use nightcam::event::TouchEvent;
use nightcam::overlay::{Overlay, OverlayAction};
use nightcam::storage::Storage;

pub const WIDTH: u32 = 480;
pub const HEIGHT: u32 = 320;

// -- Camera ---------------------------------------------------

/// What the fake camera has been asked to do.
#[derive(Debug, Default)]
pub struct CameraLog {
    pub started: bool,
    pub frames: u32,
    pub recordings: Vec<PathBuf>,
    pub stopped: Vec<PathBuf>,
}

pub struct FakeCamera {
    pub log: Arc<Mutex<CameraLog>>,
    /// Recordings only finish stopping once this is `true`.
    pub gate: Arc<AtomicBool>,
    pub fail_frames: bool,
}

impl FakeCamera {
    pub fn new() -> Self {
        Self {
            log: Arc::new(Mutex::new(CameraLog::default())),
            gate: Arc::new(AtomicBool::new(true)),
            fail_frames: false,
        }
    }

    /// A camera whose recordings block in `stop` until the gate opens.
    pub fn gated() -> Self {
        let camera = Self::new();
        camera.gate.store(false, Ordering::SeqCst);
        camera
    }
}

/// Low-contrast gradient, so equalization has something to stretch.
pub fn test_frame() -> GrayImage {
    GrayImage::from_fn(64, 48, |x, y| Luma([(100 + (x + y) % 40) as u8]))
}

impl Camera for FakeCamera {
    fn start(&mut self) -> Result<(), CameraError> {
        self.log.lock().unwrap().started = true;
        Ok(())
    }

    fn stop(&mut self) {
        self.log.lock().unwrap().started = false;
    }

    fn capture_frame(&mut self) -> Result<GrayImage, CameraError> {
        if self.fail_frames {
            return Err(CameraError::NotRunning);
        }
        self.log.lock().unwrap().frames += 1;
        Ok(test_frame())
    }

    fn start_recording(&mut self, output: &Path) -> Result<Box<dyn Recording>, CameraError> {
        fs::write(output, b"")?;
        self.log.lock().unwrap().recordings.push(output.to_path_buf());
        Ok(Box::new(FakeRecording {
            path: output.to_path_buf(),
            gate: Arc::clone(&self.gate),
            log: Arc::clone(&self.log),
        }))
    }
}

struct FakeRecording {
    path: PathBuf,
    gate: Arc<AtomicBool>,
    log: Arc<Mutex<CameraLog>>,
}

impl Recording for FakeRecording {
    fn path(&self) -> &Path {
        &self.path
    }

    fn stop(self: Box<Self>) -> Result<(), CameraError> {
        while !self.gate.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(2));
        }
        self.log.lock().unwrap().stopped.push(self.path.clone());
        Ok(())
    }
}

/// Poll `cond` for up to two seconds.
pub fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

// -- Storage --------------------------------------------------

/// Storage rooted in `dir` with no USB stick and no auto-mount.
pub fn storage_config(dir: &Path) -> StorageConfig {
    StorageConfig {
        fallback_dir: dir.join("home"),
        media_roots: vec![dir.join("media")],
        usb_device: dir.join("sda1"),
        mount_point: dir.join("media").join("usb"),
        auto_mount: false,
        mount_command: vec!["false".into()],
        unmount_command: vec!["true".into()],
        cache_ttl: Duration::from_secs(5),
        recheck_interval: Duration::from_secs(2),
        photo_bytes: 1,
        video_mbytes_per_sec: 0.5,
    }
}

pub fn capture_machine(dir: &Path, camera: FakeCamera) -> CaptureMachine<FakeCamera> {
    CaptureMachine::new(camera, Storage::new(storage_config(dir)))
}

// -- Overlays -------------------------------------------------

#[derive(Debug)]
pub struct OverlayScript {
    pub calls: Vec<String>,
    pub touch_action: OverlayAction,
    pub update_action: OverlayAction,
    pub fail_activate: bool,
}

pub type OverlayHandle = Arc<Mutex<OverlayScript>>;

pub struct FakeOverlay {
    script: OverlayHandle,
}

impl FakeOverlay {
    pub fn new() -> (Self, OverlayHandle) {
        let script = Arc::new(Mutex::new(OverlayScript {
            calls: Vec::new(),
            touch_action: OverlayAction::Stay,
            update_action: OverlayAction::Stay,
            fail_activate: false,
        }));
        (
            Self {
                script: Arc::clone(&script),
            },
            script,
        )
    }
}

impl Overlay for FakeOverlay {
    fn activate(&mut self, _now: Instant) -> Result<(), NightcamError> {
        let mut s = self.script.lock().unwrap();
        s.calls.push("activate".into());
        if s.fail_activate {
            return Err(NightcamError::CommandError {
                command: "fake".into(),
                message: "refused".into(),
            });
        }
        Ok(())
    }

    fn deactivate(&mut self) {
        self.script.lock().unwrap().calls.push("deactivate".into());
    }

    fn handle_touch(&mut self, x: u32, y: u32, _now: Instant) -> OverlayAction {
        let mut s = self.script.lock().unwrap();
        s.calls.push(format!("touch {x},{y}"));
        s.touch_action
    }

    fn update(&mut self, _now: Instant) -> OverlayAction {
        let mut s = self.script.lock().unwrap();
        s.calls.push("update".into());
        s.update_action
    }

    fn render(&self, _canvas: &mut Canvas) {}
}

// -- Events ---------------------------------------------------

pub fn release(x: u32, y: u32, press: f64, released_at: Instant) -> TouchEvent {
    TouchEvent {
        mapped_x: x,
        mapped_y: y,
        raw_x: x as i32,
        raw_y: y as i32,
        press_duration: Duration::from_secs_f64(press),
        released_at,
    }
}

pub fn secs(s: f64) -> Duration {
    Duration::from_secs_f64(s)
}

// -- Dispatcher rig -------------------------------------------

pub struct Rig {
    pub dispatcher: ModeDispatcher<FakeCamera>,
    pub camera: Arc<Mutex<CameraLog>>,
    pub gate: Arc<AtomicBool>,
    pub terminal: OverlayHandle,
    pub usb: OverlayHandle,
    pub dir: TempDir,
    pub t0: Instant,
}

pub fn rig_with(config: AppConfig, camera: FakeCamera) -> Rig {
    let dir = TempDir::new().unwrap();
    let log = Arc::clone(&camera.log);
    let gate = Arc::clone(&camera.gate);
    let (terminal, terminal_handle) = FakeOverlay::new();
    let (usb, usb_handle) = FakeOverlay::new();
    let overlays = Overlays {
        terminal: Box::new(terminal),
        usb: Box::new(usb),
    };
    let capture = capture_machine(dir.path(), camera);
    Rig {
        dispatcher: ModeDispatcher::new(&config, WIDTH, HEIGHT, capture, overlays),
        camera: log,
        gate,
        terminal: terminal_handle,
        usb: usb_handle,
        dir,
        t0: Instant::now(),
    }
}

pub fn rig() -> Rig {
    rig_with(AppConfig::default(), FakeCamera::new())
}

impl Rig {
    pub fn at(&self, s: f64) -> Instant {
        self.t0 + secs(s)
    }

    pub fn photos(&self) -> Vec<String> {
        list_names(&self.dir.path().join("home").join("Nachtsicht_Fotos"))
    }
}

pub fn list_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}
