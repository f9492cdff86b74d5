//! Tests for `nightcam::calibration` - the raw-to-display mapper and the
//! calibration fit.
use std::path::Path;

use nightcam::calibration::{
    Calibration, CalibrationSample, CoordinateMapper, calibration_targets, fit,
};
use nightcam::config::parse_config_str;

const W: u32 = 480;
const H: u32 = 320;

fn mapper(cal: Calibration) -> CoordinateMapper {
    CoordinateMapper::new(cal, W, H)
}

/// A mounted panel whose raw X runs down the display (inverted) and raw Y
/// runs across it, over a narrower range than nominal.
fn panel_raw(target: (u32, u32)) -> (i32, i32) {
    let (tx, ty) = (target.0 as f64, target.1 as f64);
    let raw_x = 3900.0 - ty * 3500.0 / (H - 1) as f64;
    let raw_y = 250.0 + tx * 3600.0 / (W - 1) as f64;
    (raw_x.round() as i32, raw_y.round() as i32)
}

fn samples_for(targets: &[(u32, u32)]) -> Vec<CalibrationSample> {
    targets
        .iter()
        .map(|&target| CalibrationSample {
            raw: panel_raw(target),
            target,
        })
        .collect()
}

fn assert_near(actual: (u32, u32), expected: (u32, u32), tolerance: i64) {
    let dx = (actual.0 as i64 - expected.0 as i64).abs();
    let dy = (actual.1 as i64 - expected.1 as i64).abs();
    assert!(
        dx <= tolerance && dy <= tolerance,
        "{actual:?} not within {tolerance}px of {expected:?}"
    );
}

// -- Mapper ---------------------------------------------------

#[test]
fn test_identity_corners() {
    let m = mapper(Calibration::default());
    assert_eq!(m.display_size(), (W, H));
    assert_eq!(m.map(0, 0), (0, 0));
    assert_eq!(m.map(4095, 4095), (W - 1, H - 1));
    assert_near(m.map(2048, 2048), (W / 2, H / 2), 1);
}

#[test]
fn test_output_is_clamped() {
    let m = mapper(Calibration {
        offset_x: -50.0,
        scale_y: 2.0,
        ..Calibration::default()
    });
    assert_eq!(m.map(0, 4095), (0, H - 1));
    assert_eq!(m.map(-500, 9000), (0, H - 1));
    let (x, y) = m.map_unclamped(0, 4095);
    assert!(x < 0.0 && y > (H - 1) as f64);
}

#[test]
fn test_swap_axes() {
    let m = mapper(Calibration {
        swap_axes: true,
        ..Calibration::default()
    });
    assert_eq!(m.map(4095, 0), (0, H - 1));
    assert_eq!(m.map(0, 4095), (W - 1, 0));
}

#[test]
fn test_flips() {
    let m = mapper(Calibration {
        flip_x: true,
        flip_y: true,
        ..Calibration::default()
    });
    assert_eq!(m.map(0, 0), (W - 1, H - 1));
    assert_eq!(m.map(4095, 4095), (0, 0));
}

#[test]
fn test_raw_range_and_offset() {
    let m = mapper(Calibration {
        raw_min_x: 200,
        raw_max_x: 3800,
        offset_x: 10.0,
        ..Calibration::default()
    });
    assert_eq!(m.map(200, 0).0, 10);
    assert_eq!(m.map(3800, 0).0, W - 1);
}

// -- Fitting --------------------------------------------------

#[test]
fn test_targets_inset_and_centre() {
    assert_eq!(
        calibration_targets(W, H),
        vec![(48, 32), (431, 32), (431, 287), (48, 287), (240, 160)]
    );
}

#[test]
fn test_fit_recovers_orientation() {
    let samples = samples_for(&calibration_targets(W, H));
    let cal = fit(&samples, Calibration::default(), W, H).unwrap();
    assert!(cal.swap_axes);
    assert!(!cal.flip_x);
    assert!(cal.flip_y);
    assert_eq!((cal.raw_min_x, cal.raw_max_x), (0, 4095));
}

#[test]
fn test_fit_round_trips_within_two_pixels() {
    let samples = samples_for(&calibration_targets(W, H));
    let m = mapper(fit(&samples, Calibration::default(), W, H).unwrap());
    for s in &samples {
        assert_near(m.map(s.raw.0, s.raw.1), s.target, 2);
    }
    // Points that were not calibration targets land too.
    for target in [(0, 0), (W - 1, H - 1), (100, 250), (400, 20)] {
        let raw = panel_raw(target);
        assert_near(m.map(raw.0, raw.1), target, 2);
    }
}

#[test]
fn test_fit_with_device_range() {
    let base = Calibration {
        raw_min_x: 100,
        raw_max_x: 4000,
        raw_min_y: 100,
        raw_max_y: 4000,
        ..Calibration::default()
    };
    let samples = samples_for(&calibration_targets(W, H));
    let cal = fit(&samples, base, W, H).unwrap();
    assert_eq!((cal.raw_min_x, cal.raw_max_y), (100, 4000));
    let m = mapper(cal);
    for s in &samples {
        assert_near(m.map(s.raw.0, s.raw.1), s.target, 2);
    }
}

#[test]
fn test_fit_needs_three_taps() {
    let samples = samples_for(&[(10, 10), (400, 300)]);
    let msg = fit(&samples, Calibration::default(), W, H)
        .unwrap_err()
        .to_string();
    assert!(msg.contains("at least 3"));
}

#[test]
fn test_fit_rejects_degenerate_taps() {
    let samples = samples_for(&[(50, 50), (50, 50), (50, 50)]);
    let msg = fit(&samples, Calibration::default(), W, H)
        .unwrap_err()
        .to_string();
    assert!(msg.contains("Calibration failed"));
}

#[test]
fn test_fit_output_parses_as_config() {
    let samples = samples_for(&calibration_targets(W, H));
    let cal = fit(&samples, Calibration::default(), W, H).unwrap();
    let parsed = parse_config_str(&cal.to_toml(), Path::new("calibration.toml"))
        .unwrap()
        .calibration;
    assert_eq!(parsed.swap_axes, cal.swap_axes);
    assert_eq!(parsed.flip_y, cal.flip_y);
    assert!((parsed.scale_x - cal.scale_x).abs() < 1e-3);
    assert!((parsed.offset_y - cal.offset_y).abs() < 1e-2);

    // Rounded constants still calibrate within tolerance.
    let m = mapper(parsed);
    for s in &samples {
        assert_near(m.map(s.raw.0, s.raw.1), s.target, 2);
    }
}
