//! nightcam: touch-driven night-vision camera for a Raspberry Pi with an
//! SPI touch display.
//!
//! The binary in `main.rs` is a thin CLI around [`manager::NightcamManager`].

pub mod calibration;
pub mod camera;
pub mod capture;
pub mod config;
pub mod dispatcher;
pub mod display;
pub mod error;
pub mod event;
pub mod hud;
pub mod imaging;
pub mod manager;
pub mod overlay;
pub mod power;
pub mod recognizer;
pub mod storage;

pub use error::NightcamError;
