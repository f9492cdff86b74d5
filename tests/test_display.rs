//! Tests for `nightcam::display` and `nightcam::hud` - geometry, the RGB565
//! canvas and HUD composition.
mod common;

use std::time::Instant;

use embedded_graphics::pixelcolor::Rgb565;
use embedded_graphics::pixelcolor::raw::{RawData, RawU16};
use image::{GrayImage, Luma};
use tempfile::TempDir;

use nightcam::capture::Mode;
use nightcam::config::AppConfig;
use nightcam::dispatcher::ControlRegions;
use nightcam::display::{Canvas, Rect};
use nightcam::hud::{
    BLUE_GREY, GREEN, GREY, HudInfo, RED, StorageSummary, SummaryCache, draw_hud, status_line,
};
use nightcam::storage::{Capacity, Storage};

use common::{HEIGHT, WIDTH, secs, storage_config};

fn raw(color: Rgb565) -> u16 {
    RawU16::from(color).into_inner()
}

fn controls() -> ControlRegions {
    ControlRegions::resolve(&AppConfig::default().controls, WIDTH, HEIGHT)
}

fn hud(mode: Mode, on_usb: bool) -> Canvas {
    let mut canvas = Canvas::new(WIDTH, HEIGHT);
    let info = HudInfo {
        mode,
        storage: StorageSummary {
            on_usb,
            capacity: None,
        },
        stopping: false,
        status: None,
    };
    draw_hud(&mut canvas, &info, &controls());
    canvas
}

// -- Rect -----------------------------------------------------

#[test]
fn test_rect_contains_borders() {
    let r = Rect::new(10, 20, 30, 40);
    assert!(r.contains(10, 20));
    assert!(r.contains(40, 60));
    assert!(r.contains(25, 40));
    assert!(!r.contains(9, 20));
    assert!(!r.contains(41, 60));
    assert!(!r.contains(10, 61));
}

#[test]
fn test_rect_contains_at_u32_edge() {
    let r = Rect::new(10, 10, u32::MAX, u32::MAX);
    assert!(r.contains(10, 10));
    assert!(r.contains(u32::MAX, u32::MAX));
    assert!(!r.contains(9, 10));
}

// -- Canvas ---------------------------------------------------

#[test]
fn test_new_canvas_is_black() {
    let canvas = Canvas::new(4, 3);
    assert_eq!((canvas.width(), canvas.height()), (4, 3));
    assert_eq!(canvas.pixel(3, 2), Some(0));
    assert_eq!(canvas.pixel(4, 0), None);
    assert_eq!(canvas.pixel(0, 3), None);
}

#[test]
fn test_blit_scales_gray_frame() {
    let frame = GrayImage::from_fn(2, 1, |x, _| Luma([if x == 0 { 0 } else { 255 }]));
    let mut canvas = Canvas::new(4, 2);
    canvas.blit_gray(&frame);
    assert_eq!(canvas.pixel(0, 0), Some(0));
    assert_eq!(canvas.pixel(1, 1), Some(0));
    assert_eq!(canvas.pixel(2, 0), Some(0xFFFF));
    assert_eq!(canvas.pixel(3, 1), Some(0xFFFF));

    canvas.fill_black();
    assert_eq!(canvas.pixel(3, 1), Some(0));
}

#[test]
fn test_blit_empty_frame_is_black() {
    let mut canvas = Canvas::new(2, 2);
    canvas.blit_gray(&GrayImage::from_pixel(2, 2, Luma([255])));
    canvas.blit_gray(&GrayImage::new(0, 0));
    assert_eq!(canvas.pixel(1, 1), Some(0));
}

#[test]
fn test_le_bytes() {
    let mut canvas = Canvas::new(2, 1);
    canvas.blit_gray(&GrayImage::from_fn(2, 1, |x, _| Luma([if x == 0 { 255 } else { 0 }])));
    let mut out = [0xAAu8; 4];
    canvas.write_le_bytes(&mut out);
    assert_eq!(out, [0xFF, 0xFF, 0x00, 0x00]);
}

// -- HUD ------------------------------------------------------

#[test]
fn test_status_line() {
    let summary = StorageSummary {
        on_usb: true,
        capacity: Some(Capacity {
            photos: 1234,
            video_minutes: 56,
        }),
    };
    assert_eq!(status_line(Mode::Live, &summary), "LIVE USB F:1234 V~56min");

    let unknown = StorageSummary::default();
    assert_eq!(status_line(Mode::Idle, &unknown), "IDLE INT F:? V~?min");
}

#[test]
fn test_hud_draws_buttons() {
    let canvas = hud(Mode::Idle, false);
    let c = controls();
    assert_eq!(canvas.pixel(c.terminal.x + 2, c.terminal.y + 2), Some(raw(BLUE_GREY)));
    assert_eq!(canvas.pixel(c.usb.x + 2, c.usb.y + 2), Some(raw(GREY)));
    // The rest of the screen is left alone.
    assert_eq!(canvas.pixel(WIDTH / 2, HEIGHT / 2), Some(0));
}

#[test]
fn test_hud_usb_button_green_on_stick() {
    let canvas = hud(Mode::Live, true);
    let usb = controls().usb;
    assert_eq!(canvas.pixel(usb.x + 2, usb.y + 2), Some(raw(GREEN)));
}

#[test]
fn test_hud_recording_marker() {
    let marker = (WIDTH - 40, 30);
    assert_eq!(hud(Mode::Live, false).pixel(marker.0, marker.1), Some(0));
    assert_eq!(hud(Mode::Recording, false).pixel(marker.0, marker.1), Some(raw(RED)));
}

#[test]
fn test_summary_cache_rate_limits() {
    let dir = TempDir::new().unwrap();
    let mut storage = Storage::new(storage_config(dir.path()));
    let mut cache = SummaryCache::default();
    let t0 = Instant::now();

    // No fallback dir yet, so capacity is unknown.
    let first = cache.get(&mut storage, t0);
    assert!(!first.on_usb);
    assert_eq!(first.capacity, None);

    std::fs::create_dir_all(dir.path().join("home")).unwrap();
    storage.invalidate();
    assert_eq!(cache.get(&mut storage, t0 + secs(0.5)).capacity, None);
    assert!(cache.get(&mut storage, t0 + secs(1.5)).capacity.is_some());
}
