//! Crate-wide error type.

use std::path::PathBuf;

use thiserror::Error;

use crate::camera::CameraError;
use crate::display::FramebufferError;

/// Top-level error type used throughout the crate.
#[derive(Debug, Error)]
pub enum NightcamError {
    #[error("Failed to read config file {path}: {source}")]
    ConfigReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    ConfigParseError { path: PathBuf, message: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to open touch device {path}: {source}")]
    TouchDeviceError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("No touch device named '{0}' found")]
    TouchDeviceNotFound(String),

    #[error("Framebuffer error: {0}")]
    Framebuffer(#[from] FramebufferError),

    #[error("Camera error: {0}")]
    Camera(#[from] CameraError),

    #[error("Storage error at {path}: {source}")]
    StorageError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Storage full: {free} bytes left at {path}")]
    StorageFull { path: PathBuf, free: u64 },

    #[error("Failed to encode photo {path}: {message}")]
    PhotoEncodeError { path: PathBuf, message: String },

    #[error("Command '{command}' failed: {message}")]
    CommandError { command: String, message: String },

    #[error("Calibration failed: {0}")]
    CalibrationError(String),
}
