use std::path::PathBuf;
use std::time::{Duration, Instant};

use embedded_graphics::pixelcolor::Rgb565;
use embedded_graphics::prelude::*;
use log::{info, warn};

use super::{Overlay, OverlayAction};
use crate::config::StorageConfig;
use crate::display::{Canvas, Rect};
use crate::error::NightcamError;
use crate::hud::{DARK_GREY, GREEN, GREY, RED, WHITE, YELLOW, draw_button, draw_text};
use crate::power::{run_command, sync_filesystems};
use crate::storage::find_usb_mount;

/// How long the result of an unmount stays visible before closing.
pub const UNMOUNT_LINGER: Duration = Duration::from_millis(1500);
const MARGIN: u32 = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UsbStatus {
    NoStick,
    NotMounted,
    Mounted(PathBuf),
}

/// Shows the stick state and lets the user unmount it before pulling it.
pub struct UsbManagerOverlay {
    config: StorageConfig,
    width: u32,
    height: u32,
    status: UsbStatus,
    message: Option<(String, Rgb565)>,
    unmounted_at: Option<Instant>,
}

impl UsbManagerOverlay {
    pub fn new(config: StorageConfig, width: u32, height: u32) -> Self {
        Self {
            config,
            width,
            height,
            status: UsbStatus::NoStick,
            message: None,
            unmounted_at: None,
        }
    }

    pub fn status(&self) -> &UsbStatus {
        &self.status
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_ref().map(|(text, _)| text.as_str())
    }

    pub fn unmount_button(&self) -> Option<Rect> {
        matches!(self.status, UsbStatus::Mounted(_))
            .then(|| Rect::new(MARGIN, 180, self.width.saturating_sub(2 * MARGIN), 60))
    }

    pub fn close_button(&self) -> Rect {
        Rect::new(
            MARGIN,
            self.height.saturating_sub(60),
            self.width.saturating_sub(2 * MARGIN),
            40,
        )
    }

    fn refresh(&mut self) {
        let mut roots = self.config.media_roots.clone();
        if !roots.contains(&self.config.mount_point) {
            if let Some(parent) = self.config.mount_point.parent() {
                roots.push(parent.to_path_buf());
            }
        }
        self.status = match find_usb_mount(&roots) {
            Some(path) => UsbStatus::Mounted(path),
            None if self.config.usb_device.exists() => UsbStatus::NotMounted,
            None => UsbStatus::NoStick,
        };
    }

    fn unmount(&mut self, now: Instant) {
        let UsbStatus::Mounted(path) = self.status.clone() else {
            return;
        };
        info!("Unmounting {}", path.display());
        // Blocks the loop for one sync and one unmount while only the
        // dialog is on screen. Camera frames are not drawn meanwhile.
        sync_filesystems();
        let mut argv = self.config.unmount_command.clone();
        argv.push(path.display().to_string());
        match run_command(&argv) {
            Ok(()) => {
                info!("{} unmounted, safe to remove", path.display());
                self.message = Some(("Safe to remove the stick".into(), GREEN));
                self.status = UsbStatus::NotMounted;
                self.unmounted_at = Some(now);
            }
            Err(e) => {
                warn!("Unmount failed: {e}");
                self.message = Some(("Unmount failed".into(), RED));
            }
        }
    }
}

impl Overlay for UsbManagerOverlay {
    fn activate(&mut self, _now: Instant) -> Result<(), NightcamError> {
        self.message = None;
        self.unmounted_at = None;
        self.refresh();
        info!("USB manager opened ({:?})", self.status);
        Ok(())
    }

    fn deactivate(&mut self) {
        self.message = None;
        self.unmounted_at = None;
    }

    fn handle_touch(&mut self, x: u32, y: u32, now: Instant) -> OverlayAction {
        if self.unmounted_at.is_some() {
            return OverlayAction::Stay;
        }
        if self.unmount_button().is_some_and(|b| b.contains(x, y)) {
            self.unmount(now);
            return OverlayAction::Stay;
        }
        if self.close_button().contains(x, y) {
            return OverlayAction::Close;
        }
        OverlayAction::Stay
    }

    fn update(&mut self, now: Instant) -> OverlayAction {
        match self.unmounted_at {
            Some(at) if now.saturating_duration_since(at) >= UNMOUNT_LINGER => {
                OverlayAction::Unmounted
            }
            Some(_) => OverlayAction::Stay,
            None => {
                self.refresh();
                OverlayAction::Stay
            }
        }
    }

    fn render(&self, canvas: &mut Canvas) {
        let _ = canvas.clear(Rgb565::BLACK);
        draw_text(canvas, "USB storage", MARGIN as i32, 30, WHITE);

        let (line, color) = match &self.status {
            UsbStatus::NoStick => ("No stick inserted".to_string(), GREY),
            UsbStatus::NotMounted => ("Stick present, not mounted".to_string(), YELLOW),
            UsbStatus::Mounted(path) => (format!("Mounted at {}", path.display()), GREEN),
        };
        draw_text(canvas, &line, MARGIN as i32, 70, color);
        let device = format!("Device: {}", self.config.usb_device.display());
        draw_text(canvas, &device, MARGIN as i32, 95, GREY);

        if let Some((text, color)) = &self.message {
            draw_text(canvas, text, MARGIN as i32, 140, *color);
        }
        if let Some(button) = self.unmount_button() {
            draw_button(canvas, button, "Safely remove", RED);
        }
        draw_button(canvas, self.close_button(), "Close", DARK_GREY);
    }
}
