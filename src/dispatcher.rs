//! Per-iteration routing of touch releases.
//!
//! Priority, highest first:
//! 1. a video stop in flight swallows every touch,
//! 2. an active overlay gets every release,
//! 3. short taps on a control button open its overlay,
//! 4. the power watchdog checks the finger that is still down,
//! 5. remaining releases are classified and drive the capture machine,
//! 6. a pending tap whose double-tap window ran out is finalized.

use std::time::Instant;

use log::{debug, error, info};

use crate::camera::Camera;
use crate::capture::{CaptureMachine, Mode};
use crate::config::{AppConfig, ControlsConfig};
use crate::display::{Canvas, Rect};
use crate::event::{FingerState, TouchEvent};
use crate::overlay::{Overlay, OverlayAction, OverlayKind};
use crate::power::{PowerAction, PowerWatchdog};
use crate::recognizer::{GestureRecognizer, GestureType};

/// Fixed-position buttons on the camera screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlRegions {
    pub terminal: Rect,
    pub usb: Rect,
}

impl ControlRegions {
    pub fn resolve(controls: &ControlsConfig, width: u32, height: u32) -> Self {
        Self {
            terminal: controls.terminal.resolve(width, height),
            usb: controls.usb.resolve(width, height),
        }
    }

    /// The overlay whose button contains the point, borders included.
    pub fn hit(&self, x: u32, y: u32) -> Option<OverlayKind> {
        if self.terminal.contains(x, y) {
            Some(OverlayKind::Terminal)
        } else if self.usb.contains(x, y) {
            Some(OverlayKind::Usb)
        } else {
            None
        }
    }
}

/// The two overlays the dispatcher can switch to.
pub struct Overlays {
    pub terminal: Box<dyn Overlay>,
    pub usb: Box<dyn Overlay>,
}

impl Overlays {
    fn get_mut(&mut self, kind: OverlayKind) -> &mut dyn Overlay {
        match kind {
            OverlayKind::Terminal => self.terminal.as_mut(),
            OverlayKind::Usb => self.usb.as_mut(),
        }
    }

    fn get(&self, kind: OverlayKind) -> &dyn Overlay {
        match kind {
            OverlayKind::Terminal => self.terminal.as_ref(),
            OverlayKind::Usb => self.usb.as_ref(),
        }
    }
}

/// Owns all interactive device state: gesture recognizer, capture
/// machine, power watchdog and the active overlay.
pub struct ModeDispatcher<C: Camera> {
    recognizer: GestureRecognizer,
    capture: CaptureMachine<C>,
    watchdog: PowerWatchdog,
    controls: ControlRegions,
    overlays: Overlays,
    active: Option<OverlayKind>,
}

impl<C: Camera> ModeDispatcher<C> {
    pub fn new(config: &AppConfig, width: u32, height: u32, capture: CaptureMachine<C>, overlays: Overlays) -> Self {
        Self {
            recognizer: GestureRecognizer::new(config.thresholds),
            capture,
            watchdog: PowerWatchdog::new(&config.thresholds, &config.power),
            controls: ControlRegions::resolve(&config.controls, width, height),
            overlays,
            active: None,
        }
    }

    pub fn mode(&self) -> Mode {
        self.capture.mode()
    }

    pub fn capture(&self) -> &CaptureMachine<C> {
        &self.capture
    }

    pub fn capture_mut(&mut self) -> &mut CaptureMachine<C> {
        &mut self.capture
    }

    pub fn controls(&self) -> &ControlRegions {
        &self.controls
    }

    pub fn active_overlay(&self) -> Option<OverlayKind> {
        self.active
    }

    pub fn has_pending_tap(&self) -> bool {
        self.recognizer.has_pending_tap()
    }

    /// Process the releases completed during one poll. Returns a power
    /// action for the caller to carry out.
    pub fn step(&mut self, events: &[TouchEvent], finger: FingerState, now: Instant) -> Option<PowerAction> {
        if self.capture.is_stopping() {
            if !events.is_empty() {
                debug!("{} touch(es) ignored while video stops", events.len());
            }
            return None;
        }

        if let Some(kind) = self.active {
            let action = self.overlays.get_mut(kind).update(now);
            if self.apply_overlay_action(kind, action) {
                // The poll's touches were aimed at the overlay that just closed.
                if !events.is_empty() {
                    debug!("{} touch(es) dropped with closing overlay", events.len());
                }
                return None;
            }
        }

        if let Some(kind) = self.active {
            for event in events {
                let action = self
                    .overlays
                    .get_mut(kind)
                    .handle_touch(event.mapped_x, event.mapped_y, now);
                if self.apply_overlay_action(kind, action) {
                    break;
                }
            }
            return None;
        }

        let long_press = self.recognizer.thresholds.long_press;
        let mut remaining = Vec::with_capacity(events.len());
        for event in events {
            let button = (event.press_duration < long_press)
                .then(|| self.controls.hit(event.mapped_x, event.mapped_y))
                .flatten();
            match button {
                Some(kind) => {
                    self.open_overlay(kind, now);
                    if self.active.is_some() {
                        return None;
                    }
                }
                None => remaining.push(*event),
            }
        }

        if let Some(action) = self.watchdog.check_hold(finger, self.capture.mode(), now) {
            return Some(action);
        }

        for event in remaining {
            for gesture in self.recognizer.process(event) {
                debug!(
                    "{} at ({}, {}) after {:.2}s",
                    gesture.kind,
                    gesture.event.mapped_x,
                    gesture.event.mapped_y,
                    gesture.event.press_duration.as_secs_f64()
                );
                if gesture.kind == GestureType::VeryLongPress {
                    let action = self
                        .watchdog
                        .on_release(gesture.event.press_duration, self.capture.mode());
                    if action.is_some() {
                        return action;
                    }
                } else {
                    self.capture.on_gesture(gesture.kind, now);
                }
            }
        }

        if let Some(tap) = self.recognizer.check_pending_tap_expired(now) {
            debug!("Pending tap at ({}, {}) finalized", tap.event.mapped_x, tap.event.mapped_y);
            self.capture.on_gesture(GestureType::Tap, now);
        }
        None
    }

    pub fn open_overlay(&mut self, kind: OverlayKind, now: Instant) {
        if self.active.is_some() {
            return;
        }
        match self.overlays.get_mut(kind).activate(now) {
            Ok(()) => {
                info!("Overlay {kind} opened");
                self.recognizer.clear_pending();
                self.active = Some(kind);
            }
            Err(e) => {
                error!("Cannot open {kind} overlay: {e}");
                self.capture.set_status(format!("{kind} unavailable"), now);
            }
        }
    }

    pub fn close_overlay(&mut self) {
        if let Some(kind) = self.active.take() {
            self.overlays.get_mut(kind).deactivate();
            info!("Overlay {kind} closed");
        }
    }

    /// Returns `true` if the overlay closed.
    fn apply_overlay_action(&mut self, kind: OverlayKind, action: OverlayAction) -> bool {
        match action {
            OverlayAction::Stay => false,
            OverlayAction::Close => {
                self.close_overlay();
                true
            }
            OverlayAction::Unmounted => {
                debug!("{kind} overlay reported an unmount");
                self.close_overlay();
                self.capture.storage_mut().suppress_auto_mount();
                true
            }
        }
    }

    /// Draw the active overlay. Returns `false` if none is active.
    pub fn render_overlay(&self, canvas: &mut Canvas) -> bool {
        match self.active {
            Some(kind) => {
                self.overlays.get(kind).render(canvas);
                true
            }
            None => false,
        }
    }
}
