//! Camera collaborator interface and the `rpicam-vid` backed implementation.

use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use image::GrayImage;
use log::{debug, info, warn};

use crate::config::CameraConfig;

#[derive(Debug, thiserror::Error)]
pub enum CameraError {
    #[error("failed to spawn {program}: {source}")]
    Spawn { program: String, source: io::Error },

    #[error("camera stream error: {0}")]
    Io(#[from] io::Error),

    #[error("camera is not started")]
    NotRunning,

    #[error("camera is busy recording")]
    Busy,

    #[error("malformed frame: {0}")]
    BadFrame(String),
}

/// The camera as seen by the capture state machine.
pub trait Camera {
    fn start(&mut self) -> Result<(), CameraError>;
    fn stop(&mut self);
    /// Grab the next frame as grayscale. Blocks at most about one frame
    /// interval.
    fn capture_frame(&mut self) -> Result<GrayImage, CameraError>;
    /// Start encoding video into `output`.
    fn start_recording(&mut self, output: &Path) -> Result<Box<dyn Recording>, CameraError>;
}

/// An in-flight video recording.
pub trait Recording: Send {
    fn path(&self) -> &Path;
    /// Stop encoding and close the file. May block for seconds.
    fn stop(self: Box<Self>) -> Result<(), CameraError>;
}

// -- rpicam-vid -----------------------------------------------

/// Drives the Raspberry Pi camera through `rpicam-vid` subprocesses: a raw
/// YUV420 stream on stdout for preview and photos, and a separate H.264
/// process while recording.
pub struct RpicamCamera {
    config: CameraConfig,
    preview: Option<Child>,
    frame_buf: Vec<u8>,
    recording_active: Arc<AtomicBool>,
    running: bool,
}

impl RpicamCamera {
    pub fn new(config: CameraConfig) -> Self {
        Self {
            config,
            preview: None,
            frame_buf: Vec::new(),
            recording_active: Arc::new(AtomicBool::new(false)),
            running: false,
        }
    }

    fn base_command(&self) -> Command {
        let c = &self.config;
        let mut cmd = Command::new(&c.preview_program);
        cmd.args(["-t", "0", "-n"])
            .args(["--width", &c.width.to_string()])
            .args(["--height", &c.height.to_string()])
            .args(["--framerate", &c.framerate.to_string()])
            .stdin(Stdio::null())
            .stderr(Stdio::null());
        cmd
    }

    fn spawn_preview(&mut self) -> Result<(), CameraError> {
        let mut cmd = self.base_command();
        cmd.args(["--codec", "yuv420", "-o", "-"]).stdout(Stdio::piped());
        let child = cmd.spawn().map_err(|source| CameraError::Spawn {
            program: self.config.preview_program.clone(),
            source,
        })?;
        debug!("Preview stream started (pid {})", child.id());
        self.preview = Some(child);
        Ok(())
    }

    fn kill_preview(&mut self) {
        if let Some(mut child) = self.preview.take() {
            let _ = child.kill();
            let _ = child.wait();
            debug!("Preview stream stopped");
        }
    }
}

impl Camera for RpicamCamera {
    fn start(&mut self) -> Result<(), CameraError> {
        self.running = true;
        if self.preview.is_none() && !self.recording_active.load(Ordering::Acquire) {
            self.spawn_preview()?;
        }
        info!(
            "Camera started ({}x{} @ {} fps)",
            self.config.width, self.config.height, self.config.framerate
        );
        Ok(())
    }

    fn stop(&mut self) {
        self.running = false;
        self.kill_preview();
    }

    fn capture_frame(&mut self) -> Result<GrayImage, CameraError> {
        if !self.running {
            return Err(CameraError::NotRunning);
        }
        if self.preview.is_none() {
            if self.recording_active.load(Ordering::Acquire) {
                return Err(CameraError::Busy);
            }
            self.spawn_preview()?;
        }

        let (w, h) = (self.config.width, self.config.height);
        let luma = w as usize * h as usize;
        // Y plane followed by the quarter-size U and V planes.
        self.frame_buf.resize(luma + luma / 2, 0);

        let read = match self.preview.as_mut().and_then(|c| c.stdout.as_mut()) {
            Some(stdout) => stdout.read_exact(&mut self.frame_buf),
            None => return Err(CameraError::NotRunning),
        };
        if let Err(e) = read {
            // Restarted on the next capture.
            self.kill_preview();
            return Err(e.into());
        }

        GrayImage::from_raw(w, h, self.frame_buf[..luma].to_vec())
            .ok_or_else(|| CameraError::BadFrame(format!("{w}x{h} luma plane")))
    }

    fn start_recording(&mut self, output: &Path) -> Result<Box<dyn Recording>, CameraError> {
        if !self.running {
            return Err(CameraError::NotRunning);
        }
        if self.recording_active.load(Ordering::Acquire) {
            return Err(CameraError::Busy);
        }
        // The sensor can only be owned by one process.
        self.kill_preview();

        let mut cmd = self.base_command();
        cmd.args(["--codec", "h264"])
            .args(["--bitrate", &self.config.bitrate.to_string()])
            .arg("-o")
            .arg(output)
            .stdout(Stdio::null());
        let child = cmd.spawn().map_err(|source| CameraError::Spawn {
            program: self.config.preview_program.clone(),
            source,
        })?;
        self.recording_active.store(true, Ordering::Release);
        Ok(Box::new(RpicamRecording {
            child,
            path: output.to_path_buf(),
            active: Arc::clone(&self.recording_active),
        }))
    }
}

impl Drop for RpicamCamera {
    fn drop(&mut self) {
        self.kill_preview();
    }
}

struct RpicamRecording {
    child: Child,
    path: PathBuf,
    active: Arc<AtomicBool>,
}

impl Recording for RpicamRecording {
    fn path(&self) -> &Path {
        &self.path
    }

    fn stop(mut self: Box<Self>) -> Result<(), CameraError> {
        // SIGINT lets rpicam-vid flush the encoder and close the file.
        // SAFETY: plain kill(2) on our own child's pid.
        let rc = unsafe { libc::kill(self.child.id() as libc::pid_t, libc::SIGINT) };
        if rc != 0 {
            warn!("SIGINT to recorder failed: {}", io::Error::last_os_error());
            let _ = self.child.kill();
        }
        let status = self.child.wait();
        self.active.store(false, Ordering::Release);
        let status = status?;
        if !status.success() {
            debug!("Recorder exited with {status}");
        }
        Ok(())
    }
}
