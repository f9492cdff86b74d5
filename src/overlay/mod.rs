//! Full-screen alternate UIs that take over touch routing and rendering
//! while active.

mod terminal;
mod usb;

use std::time::Instant;

use strum::Display;

use crate::display::Canvas;
use crate::error::NightcamError;

pub use terminal::TerminalOverlay;
pub use usb::{UNMOUNT_LINGER, UsbManagerOverlay, UsbStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum OverlayKind {
    #[strum(serialize = "terminal")]
    Terminal,
    #[strum(serialize = "usb")]
    Usb,
}

/// What the dispatcher should do after an overlay handled input or ticked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayAction {
    Stay,
    Close,
    /// Close, and keep the stick from being mounted again until it is
    /// removed.
    Unmounted,
}

pub trait Overlay {
    fn activate(&mut self, now: Instant) -> Result<(), NightcamError>;
    fn deactivate(&mut self);
    /// A completed touch at display coordinates.
    fn handle_touch(&mut self, x: u32, y: u32, now: Instant) -> OverlayAction;
    /// Called once per loop iteration while active.
    fn update(&mut self, now: Instant) -> OverlayAction;
    fn render(&self, canvas: &mut Canvas);
}
