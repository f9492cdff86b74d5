//! Heads-up display: mode and storage line, recording marker, status
//! message and the two control buttons.

use std::time::{Duration, Instant};

use embedded_graphics::mono_font::MonoTextStyle;
use embedded_graphics::mono_font::ascii::{FONT_6X10, FONT_9X15, FONT_9X15_BOLD};
use embedded_graphics::pixelcolor::Rgb565;
use embedded_graphics::prelude::*;
use embedded_graphics::primitives::{Circle, PrimitiveStyle};
use embedded_graphics::text::{Alignment, Baseline, Text, TextStyleBuilder};
use log::debug;

use crate::capture::Mode;
use crate::dispatcher::ControlRegions;
use crate::display::{Canvas, Rect};
use crate::storage::{Capacity, Storage};

pub const GREEN: Rgb565 = Rgb565::GREEN;
pub const RED: Rgb565 = Rgb565::RED;
pub const YELLOW: Rgb565 = Rgb565::YELLOW;
pub const WHITE: Rgb565 = Rgb565::WHITE;
pub const GREY: Rgb565 = Rgb565::new(10, 20, 10);
pub const DARK_GREY: Rgb565 = Rgb565::new(4, 8, 4);
pub const BLUE_GREY: Rgb565 = Rgb565::new(6, 14, 14);

const SUMMARY_REFRESH: Duration = Duration::from_secs(1);

// -- Drawing helpers ------------------------------------------

/// Text with its baseline at `(x, y)`.
pub fn draw_text(canvas: &mut Canvas, text: &str, x: i32, y: i32, color: Rgb565) {
    let style = MonoTextStyle::new(&FONT_9X15, color);
    let _ = Text::new(text, Point::new(x, y), style).draw(canvas);
}

/// Small text with its top edge at `(x, y)`.
pub fn draw_small_text(canvas: &mut Canvas, text: &str, x: i32, y: i32, color: Rgb565) {
    let style = MonoTextStyle::new(&FONT_6X10, color);
    let _ = Text::with_baseline(text, Point::new(x, y), style, Baseline::Top).draw(canvas);
}

/// Filled rectangle with a white border and a centred label.
pub fn draw_button(canvas: &mut Canvas, rect: Rect, label: &str, fill: Rgb565) {
    let shape = rect.to_primitive();
    let _ = shape
        .into_styled(PrimitiveStyle::with_fill(fill))
        .draw(canvas);
    let _ = shape
        .into_styled(PrimitiveStyle::with_stroke(WHITE, 1))
        .draw(canvas);

    let character_style = MonoTextStyle::new(&FONT_9X15_BOLD, WHITE);
    let text_style = TextStyleBuilder::new()
        .alignment(Alignment::Center)
        .baseline(Baseline::Middle)
        .build();
    let _ = Text::with_text_style(label, shape.center(), character_style, text_style).draw(canvas);
}

// -- Storage summary ------------------------------------------

/// Where captures currently go and how much still fits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StorageSummary {
    pub on_usb: bool,
    pub capacity: Option<Capacity>,
}

/// Rate-limits storage queries for the HUD.
#[derive(Debug, Default)]
pub struct SummaryCache {
    cached: Option<(StorageSummary, Instant)>,
}

impl SummaryCache {
    pub fn get(&mut self, storage: &mut Storage, now: Instant) -> StorageSummary {
        if let Some((summary, at)) = self.cached {
            if now.saturating_duration_since(at) < SUMMARY_REFRESH {
                return summary;
            }
        }
        let on_usb = storage.usb_mountpoint(now).is_some();
        let capacity = match storage.capacity(now) {
            Ok(cap) => Some(cap),
            Err(e) => {
                debug!("Capacity unavailable: {e}");
                None
            }
        };
        let summary = StorageSummary { on_usb, capacity };
        self.cached = Some((summary, now));
        summary
    }
}

// -- HUD ------------------------------------------------------

/// Everything the HUD shows for one frame.
#[derive(Debug, Clone, Copy)]
pub struct HudInfo<'a> {
    pub mode: Mode,
    pub storage: StorageSummary,
    pub stopping: bool,
    pub status: Option<&'a str>,
}

/// `"<MODE> <USB|INT> F:<photos> V~<minutes>min"`
pub fn status_line(mode: Mode, storage: &StorageSummary) -> String {
    let location = if storage.on_usb { "USB" } else { "INT" };
    match storage.capacity {
        Some(cap) => format!(
            "{mode} {location} F:{} V~{}min",
            cap.photos, cap.video_minutes
        ),
        None => format!("{mode} {location} F:? V~?min"),
    }
}

pub fn draw_hud(canvas: &mut Canvas, info: &HudInfo<'_>, controls: &ControlRegions) {
    let width = canvas.width() as i32;

    draw_text(canvas, &status_line(info.mode, &info.storage), 10, 20, GREEN);

    if info.mode == Mode::Recording {
        let _ = Circle::with_center(Point::new(width - 40, 30), 20)
            .into_styled(PrimitiveStyle::with_fill(RED))
            .draw(canvas);
        draw_text(canvas, "REC", width - 80, 35, RED);
    }
    if info.stopping {
        draw_text(canvas, "STOP...", width - 100, 60, YELLOW);
    }
    if let Some(status) = info.status {
        draw_text(canvas, status, 10, 45, WHITE);
    }

    draw_button(canvas, controls.terminal, "TERM", BLUE_GREY);
    let usb_fill = if info.storage.on_usb { GREEN } else { GREY };
    draw_button(canvas, controls.usb, "USB", usb_fill);
}
