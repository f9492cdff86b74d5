//! Raw touch-panel coordinates to display pixels.
//!
//! Resistive panels are mounted rotated or mirrored relative to the display
//! and rarely report their full nominal range, so the mapping is an affine
//! remap driven entirely by [`Calibration`] values. [`fit`] derives those
//! values from taps on known screen targets (see `nightcam --calibrate`).

use crate::error::NightcamError;

/// Per-unit calibration constants.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    pub raw_min_x: i32,
    pub raw_max_x: i32,
    pub raw_min_y: i32,
    pub raw_max_y: i32,
    /// Raw Y drives display X (and vice versa).
    pub swap_axes: bool,
    pub flip_x: bool,
    pub flip_y: bool,
    pub scale_x: f64,
    pub scale_y: f64,
    /// Final pixel correction, applied after scaling.
    pub offset_x: f64,
    pub offset_y: f64,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            raw_min_x: 0,
            raw_max_x: 4095,
            raw_min_y: 0,
            raw_max_y: 4095,
            swap_axes: false,
            flip_x: false,
            flip_y: false,
            scale_x: 1.0,
            scale_y: 1.0,
            offset_x: 0.0,
            offset_y: 0.0,
        }
    }
}

impl Calibration {
    fn normalize(&self, raw_x: i32, raw_y: i32) -> (f64, f64) {
        let nx = (raw_x - self.raw_min_x) as f64 / (self.raw_max_x - self.raw_min_x) as f64;
        let ny = (raw_y - self.raw_min_y) as f64 / (self.raw_max_y - self.raw_min_y) as f64;
        (nx, ny)
    }

    /// Render as a `[calibration]` TOML section.
    pub fn to_toml(&self) -> String {
        format!(
            "[calibration]\n\
             raw_min_x = {}\n\
             raw_max_x = {}\n\
             raw_min_y = {}\n\
             raw_max_y = {}\n\
             swap_axes = {}\n\
             flip_x = {}\n\
             flip_y = {}\n\
             scale_x = {:.4}\n\
             scale_y = {:.4}\n\
             offset_x = {:.2}\n\
             offset_y = {:.2}\n",
            self.raw_min_x,
            self.raw_max_x,
            self.raw_min_y,
            self.raw_max_y,
            self.swap_axes,
            self.flip_x,
            self.flip_y,
            self.scale_x,
            self.scale_y,
            self.offset_x,
            self.offset_y,
        )
    }
}

/// Maps raw panel positions into `[0, width) x [0, height)`.
#[derive(Debug, Clone, Copy)]
pub struct CoordinateMapper {
    calibration: Calibration,
    width: u32,
    height: u32,
}

impl CoordinateMapper {
    pub fn new(calibration: Calibration, width: u32, height: u32) -> Self {
        Self {
            calibration,
            width: width.max(1),
            height: height.max(1),
        }
    }

    pub fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    pub fn display_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Affine position before clamping; may lie outside the display.
    pub fn map_unclamped(&self, raw_x: i32, raw_y: i32) -> (f64, f64) {
        let cal = &self.calibration;
        let (nx, ny) = cal.normalize(raw_x, raw_y);
        let (mut u, mut v) = if cal.swap_axes { (ny, nx) } else { (nx, ny) };
        if cal.flip_x {
            u = 1.0 - u;
        }
        if cal.flip_y {
            v = 1.0 - v;
        }
        (
            u * (self.width - 1) as f64 * cal.scale_x + cal.offset_x,
            v * (self.height - 1) as f64 * cal.scale_y + cal.offset_y,
        )
    }

    /// Display pixel for a raw panel position, clamped to the display.
    pub fn map(&self, raw_x: i32, raw_y: i32) -> (u32, u32) {
        let (x, y) = self.map_unclamped(raw_x, raw_y);
        (
            x.round().clamp(0.0, (self.width - 1) as f64) as u32,
            y.round().clamp(0.0, (self.height - 1) as f64) as u32,
        )
    }
}

// -- Fitting --------------------------------------------------

/// One calibration tap: where the panel reported it and where the target was.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationSample {
    pub raw: (i32, i32),
    pub target: (u32, u32),
}

/// Crosshair positions for the calibration run: the four corners inset by
/// 10 % and the centre.
pub fn calibration_targets(width: u32, height: u32) -> Vec<(u32, u32)> {
    let (ix, iy) = (width / 10, height / 10);
    let (rx, by) = (width - 1 - ix, height - 1 - iy);
    vec![
        (ix, iy),
        (rx, iy),
        (rx, by),
        (ix, by),
        (width / 2, height / 2),
    ]
}

fn mean(values: impl Iterator<Item = f64> + Clone) -> f64 {
    let n = values.clone().count() as f64;
    values.sum::<f64>() / n
}

/// Least-squares slope and intercept of `t = a * u + b`.
fn linear_fit(points: &[(f64, f64)]) -> Option<(f64, f64)> {
    let mu = mean(points.iter().map(|p| p.0));
    let mt = mean(points.iter().map(|p| p.1));
    let var: f64 = points.iter().map(|p| (p.0 - mu).powi(2)).sum();
    if var < 1e-9 {
        return None;
    }
    let cov: f64 = points.iter().map(|p| (p.0 - mu) * (p.1 - mt)).sum();
    let a = cov / var;
    Some((a, mt - a * mu))
}

fn correlation_sq(points: &[(f64, f64)]) -> f64 {
    let mu = mean(points.iter().map(|p| p.0));
    let mt = mean(points.iter().map(|p| p.1));
    let cov: f64 = points.iter().map(|p| (p.0 - mu) * (p.1 - mt)).sum();
    let vu: f64 = points.iter().map(|p| (p.0 - mu).powi(2)).sum();
    let vt: f64 = points.iter().map(|p| (p.1 - mt).powi(2)).sum();
    if vu < 1e-9 || vt < 1e-9 {
        return 0.0;
    }
    cov * cov / (vu * vt)
}

/// Fit `scale`/`offset`/`flip` for one display axis.
fn fit_axis(points: &[(f64, f64)], extent: u32, axis: &str) -> Result<(bool, f64, f64), NightcamError> {
    let (a, b) = linear_fit(points).ok_or_else(|| {
        NightcamError::CalibrationError(format!("taps do not span the display {axis} axis"))
    })?;
    // t = a*u + b == -a*(1-u) + (a+b)
    let (flip, slope, intercept) = if a < 0.0 { (true, -a, a + b) } else { (false, a, b) };
    Ok((flip, slope / (extent - 1).max(1) as f64, intercept))
}

/// Derive a calibration from taps on known targets.
///
/// `base` supplies the raw axis ranges (usually the device's reported
/// absolute axis limits); everything else is replaced.
pub fn fit(
    samples: &[CalibrationSample],
    base: Calibration,
    width: u32,
    height: u32,
) -> Result<Calibration, NightcamError> {
    if samples.len() < 3 {
        return Err(NightcamError::CalibrationError(format!(
            "need at least 3 taps, got {}",
            samples.len()
        )));
    }

    let norm: Vec<((f64, f64), (f64, f64))> = samples
        .iter()
        .map(|s| {
            (
                base.normalize(s.raw.0, s.raw.1),
                (s.target.0 as f64, s.target.1 as f64),
            )
        })
        .collect();
    let pairs = |raw_axis: fn(&(f64, f64)) -> f64, disp_axis: fn(&(f64, f64)) -> f64| {
        norm.iter()
            .map(|(n, t)| (raw_axis(n), disp_axis(t)))
            .collect::<Vec<_>>()
    };

    let straight = correlation_sq(&pairs(|n| n.0, |t| t.0)) + correlation_sq(&pairs(|n| n.1, |t| t.1));
    let crossed = correlation_sq(&pairs(|n| n.1, |t| t.0)) + correlation_sq(&pairs(|n| n.0, |t| t.1));
    let swap_axes = crossed > straight;

    let (x_pairs, y_pairs) = if swap_axes {
        (pairs(|n| n.1, |t| t.0), pairs(|n| n.0, |t| t.1))
    } else {
        (pairs(|n| n.0, |t| t.0), pairs(|n| n.1, |t| t.1))
    };
    let (flip_x, scale_x, offset_x) = fit_axis(&x_pairs, width, "x")?;
    let (flip_y, scale_y, offset_y) = fit_axis(&y_pairs, height, "y")?;

    Ok(Calibration {
        swap_axes,
        flip_x,
        flip_y,
        scale_x,
        scale_y,
        offset_x,
        offset_y,
        ..base
    })
}
