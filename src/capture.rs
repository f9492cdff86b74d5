//! Capture state machine: idle, live preview, recording.
//!
//! Stopping a recording is split in two. The state flips back to
//! [`Mode::Live`] immediately, while the blocking encoder stop runs on a
//! [`StopWorker`] thread. Until that thread finishes, no new recording can
//! start.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use strum::Display;

use crate::camera::{Camera, Recording};
use crate::error::NightcamError;
use crate::imaging::{equalize_histogram, save_jpeg};
use crate::recognizer::GestureType;
use crate::storage::Storage;

/// How long a status message stays on the HUD.
pub const STATUS_DURATION: Duration = Duration::from_secs(4);
const STOP_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Mode {
    #[strum(serialize = "IDLE")]
    Idle,
    #[strum(serialize = "LIVE")]
    Live,
    #[strum(serialize = "RECORDING")]
    Recording,
}

// -- StopWorker -----------------------------------------------

type Slot = Arc<Mutex<Option<Box<dyn Recording>>>>;

/// Single-slot background stopper for recordings.
pub struct StopWorker {
    slot: Slot,
    in_flight: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Default for StopWorker {
    fn default() -> Self {
        Self::new()
    }
}

fn finish_stop(recording: Box<dyn Recording>) {
    let path = recording.path().to_path_buf();
    match recording.stop() {
        Ok(()) => info!("Video saved -> {}", path.display()),
        Err(e) => error!("Stopping video {} failed: {e}", path.display()),
    }
}

impl StopWorker {
    pub fn new() -> Self {
        Self {
            slot: Arc::new(Mutex::new(None)),
            in_flight: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    /// True while a stop is in progress.
    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Stop `recording` on a background thread. Hands the recording back
    /// if a previous stop has not finished yet.
    pub fn submit(&mut self, recording: Box<dyn Recording>) -> Result<(), Box<dyn Recording>> {
        if self.is_busy() {
            return Err(recording);
        }
        if let Some(done) = self.handle.take() {
            let _ = done.join();
        }

        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(recording);
        self.in_flight.store(true, Ordering::Release);

        let slot = Arc::clone(&self.slot);
        let in_flight = Arc::clone(&self.in_flight);
        let spawned = thread::Builder::new()
            .name("video-stop".into())
            .spawn(move || {
                let recording = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
                if let Some(recording) = recording {
                    finish_stop(recording);
                }
                in_flight.store(false, Ordering::Release);
            });

        match spawned {
            Ok(handle) => self.handle = Some(handle),
            Err(e) => {
                warn!("Cannot spawn stop worker ({e}), stopping inline");
                let recording = self.slot.lock().unwrap_or_else(PoisonError::into_inner).take();
                if let Some(recording) = recording {
                    finish_stop(recording);
                }
                self.in_flight.store(false, Ordering::Release);
            }
        }
        Ok(())
    }

    /// Block until no stop is in flight.
    pub fn wait_idle(&mut self) {
        while self.is_busy() {
            info!("Waiting for video stop...");
            thread::sleep(STOP_POLL);
        }
        if let Some(done) = self.handle.take() {
            let _ = done.join();
        }
    }
}

// -- CaptureMachine -------------------------------------------

#[derive(Debug, Clone)]
struct StatusMessage {
    text: String,
    until: Instant,
}

/// Owns the camera, the storage resolver and the current recording.
pub struct CaptureMachine<C: Camera> {
    mode: Mode,
    camera: C,
    storage: Storage,
    recording: Option<Box<dyn Recording>>,
    stopper: StopWorker,
    status: Option<StatusMessage>,
}

impl<C: Camera> CaptureMachine<C> {
    pub fn new(camera: C, storage: Storage) -> Self {
        Self {
            mode: Mode::Idle,
            camera,
            storage,
            recording: None,
            stopper: StopWorker::new(),
            status: None,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// A recording stop is still running in the background.
    pub fn is_stopping(&self) -> bool {
        self.stopper.is_busy()
    }

    pub fn recording_path(&self) -> Option<PathBuf> {
        self.recording.as_ref().map(|r| r.path().to_path_buf())
    }

    pub fn camera_mut(&mut self) -> &mut C {
        &mut self.camera
    }

    pub fn storage_mut(&mut self) -> &mut Storage {
        &mut self.storage
    }

    /// Current HUD status line, if one is still showing.
    pub fn status(&self, now: Instant) -> Option<&str> {
        self.status
            .as_ref()
            .filter(|s| now < s.until)
            .map(|s| s.text.as_str())
    }

    pub fn set_status(&mut self, text: impl Into<String>, now: Instant) {
        self.status = Some(StatusMessage {
            text: text.into(),
            until: now + STATUS_DURATION,
        });
    }

    /// Apply a capture gesture in the current mode.
    pub fn on_gesture(&mut self, gesture: GestureType, now: Instant) {
        match (self.mode, gesture) {
            (Mode::Idle, GestureType::DoubleTap) => {
                info!("Double tap -> LIVE");
                self.go_live();
            }
            (Mode::Idle, GestureType::Tap) => info!("Single tap in IDLE (no-op)"),
            (Mode::Live, GestureType::Tap) => {
                info!("Single tap in LIVE -> photo");
                if let Err(e) = self.take_photo(now) {
                    error!("Photo failed: {e}");
                    self.set_status(format!("Photo failed: {}", short_reason(&e)), now);
                }
            }
            (Mode::Live, GestureType::LongPress) => {
                info!("Long press in LIVE -> start video");
                if let Err(e) = self.start_video(now) {
                    error!("Video start failed: {e}");
                    self.set_status(format!("Video failed: {}", short_reason(&e)), now);
                }
            }
            (Mode::Recording, GestureType::Tap) => {
                info!("Single tap in RECORDING -> stop video");
                self.stop_video();
            }
            (mode, GestureType::DoubleTap) => info!("Double tap ignored in {mode}"),
            (mode, kind) => debug!("{kind} ignored in {mode}"),
        }
    }

    pub fn go_live(&mut self) {
        if self.mode == Mode::Idle {
            self.mode = Mode::Live;
        }
    }

    /// Capture, enhance and store one photo.
    pub fn take_photo(&mut self, now: Instant) -> Result<PathBuf, NightcamError> {
        let path = self.storage.next_photo_path(now)?;
        let frame = self.camera.capture_frame()?;
        save_jpeg(&path, &equalize_histogram(&frame))?;

        self.storage.invalidate();
        match self.storage.capacity(now) {
            Ok(cap) => info!(
                "Photo {} | ~{} photos / ~{} min video left",
                path.display(),
                cap.photos,
                cap.video_minutes
            ),
            Err(e) => info!("Photo {} (capacity unknown: {e})", path.display()),
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.set_status(format!("Saved {name}"), now);
        Ok(path)
    }

    /// Start recording. A no-op (returning `false`) while already
    /// recording or while the previous stop is still in flight.
    pub fn start_video(&mut self, now: Instant) -> Result<bool, NightcamError> {
        if self.mode == Mode::Recording || self.recording.is_some() {
            debug!("Already recording");
            return Ok(false);
        }
        if self.stopper.is_busy() {
            debug!("Previous video still stopping, start rejected");
            return Ok(false);
        }
        let path = self.storage.next_video_path(now)?;
        info!("Video start -> {}", path.display());
        let recording = self.camera.start_recording(&path)?;
        self.recording = Some(recording);
        self.mode = Mode::Recording;
        Ok(true)
    }

    /// Begin stopping the recording. Returns `false` (no-op) if not
    /// recording.
    pub fn stop_video(&mut self) -> bool {
        if self.mode != Mode::Recording {
            return false;
        }
        self.mode = Mode::Live;
        let Some(recording) = self.recording.take() else {
            return false;
        };
        info!("Video stop requested");
        if let Err(recording) = self.stopper.submit(recording) {
            // start_video refuses while busy, so this is a leftover.
            warn!("Stop worker busy, stopping inline");
            finish_stop(recording);
        }
        true
    }

    /// Stop any recording and wait until its file is closed.
    pub fn flush(&mut self) {
        self.stop_video();
        self.stopper.wait_idle();
    }

    /// Flush and release the camera.
    pub fn shutdown(&mut self) {
        self.flush();
        self.camera.stop();
    }
}

fn short_reason(e: &NightcamError) -> String {
    match e {
        NightcamError::StorageFull { .. } => "storage full".into(),
        NightcamError::StorageError { .. } => "storage error".into(),
        NightcamError::Camera(_) => "camera error".into(),
        other => other.to_string(),
    }
}
