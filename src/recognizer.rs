//! Gesture classification of completed presses.
use std::time::Instant;

use strum::{Display, EnumString, IntoStaticStr};

use crate::config::Thresholds;
use crate::event::TouchEvent;

/// Supported gesture types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
pub enum GestureType {
    /// A short tap that was not followed by a second one in time.
    #[strum(serialize = "tap")]
    Tap,
    #[strum(serialize = "double_tap")]
    DoubleTap,
    #[strum(serialize = "long_press")]
    LongPress,
    #[strum(serialize = "very_long_press")]
    VeryLongPress,
}

/// A classified press together with the release that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Gesture {
    pub kind: GestureType,
    pub event: TouchEvent,
}

/// Classifies releases by press duration and tap spacing.
///
/// Short taps are provisional: they are held as the single pending tap
/// until either a second short tap completes a double tap or the
/// double-tap window runs out and [`check_pending_tap_expired`] finalizes
/// them.
///
/// [`check_pending_tap_expired`]: GestureRecognizer::check_pending_tap_expired
#[derive(Debug, Default)]
pub struct GestureRecognizer {
    pub thresholds: Thresholds,
    pending_tap: Option<TouchEvent>,
}

impl GestureRecognizer {
    pub fn new(thresholds: Thresholds) -> Self {
        Self {
            thresholds,
            pending_tap: None,
        }
    }

    /// Classify one release. Returns `None` when the release became the
    /// pending tap.
    ///
    /// Thresholds are checked longest first, so a press of exactly
    /// `very_long_press` is a very long press.
    pub fn classify(&mut self, event: TouchEvent) -> Option<GestureType> {
        let th = &self.thresholds;
        let d = event.press_duration;

        if d >= th.very_long_press {
            self.pending_tap = None;
            return Some(GestureType::VeryLongPress);
        }
        if d >= th.long_press {
            self.pending_tap = None;
            return Some(GestureType::LongPress);
        }

        if let Some(prev) = self.pending_tap {
            let gap = event.released_at.saturating_duration_since(prev.released_at);
            if gap < th.double_tap_window {
                self.pending_tap = None;
                return Some(GestureType::DoubleTap);
            }
        }

        // No pending tap, or a stale one: this tap restarts the window.
        self.pending_tap = Some(event);
        None
    }

    /// Finalize expired pending taps, then classify the release. Taps
    /// spaced wider than the window therefore come out as two `Tap`s.
    pub fn process(&mut self, event: TouchEvent) -> Vec<Gesture> {
        let mut gestures = Vec::new();
        if let Some(g) = self.check_pending_tap_expired(event.released_at) {
            gestures.push(g);
        }
        if let Some(kind) = self.classify(event) {
            gestures.push(Gesture { kind, event });
        }
        gestures
    }

    /// Check if a tap is pending.
    pub fn has_pending_tap(&self) -> bool {
        self.pending_tap.is_some()
    }

    /// Drop a pending tap without acting on it.
    pub fn clear_pending(&mut self) {
        self.pending_tap = None;
    }

    /// If a single tap is pending and the double-tap window has elapsed at
    /// `now`, consume it and return it as a `Tap`.
    pub fn check_pending_tap_expired(&mut self, now: Instant) -> Option<Gesture> {
        let pending = self.pending_tap?;
        if now.saturating_duration_since(pending.released_at) >= self.thresholds.double_tap_window {
            self.pending_tap = None;
            Some(Gesture {
                kind: GestureType::Tap,
                event: pending,
            })
        } else {
            None
        }
    }
}
