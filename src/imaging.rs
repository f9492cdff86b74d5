//! Night-vision enhancement and photo encoding.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use image::GrayImage;
use image::codecs::jpeg::JpegEncoder;

use crate::error::NightcamError;

const JPEG_QUALITY: u8 = 90;

/// Global histogram equalization: stretches the cumulative intensity
/// distribution over the full 0..=255 range.
pub fn equalize_histogram(frame: &GrayImage) -> GrayImage {
    let mut hist = [0u64; 256];
    for px in frame.as_raw() {
        hist[*px as usize] += 1;
    }

    let total: u64 = hist.iter().sum();
    let cdf_min = hist.iter().copied().find(|&c| c > 0).unwrap_or(0);
    if total == 0 || total == cdf_min {
        // Empty or single-intensity image.
        return frame.clone();
    }

    let mut lut = [0u8; 256];
    let mut cdf = 0u64;
    let span = (total - cdf_min) as f64;
    for (value, count) in hist.iter().enumerate() {
        cdf += count;
        let scaled = (cdf.saturating_sub(cdf_min)) as f64 * 255.0 / span;
        lut[value] = scaled.round().clamp(0.0, 255.0) as u8;
    }

    let data = frame.as_raw().iter().map(|&px| lut[px as usize]).collect();
    GrayImage::from_raw(frame.width(), frame.height(), data)
        .unwrap_or_else(|| frame.clone())
}

/// Encode a grayscale frame as JPEG at `path`.
pub fn save_jpeg(path: &Path, frame: &GrayImage) -> Result<(), NightcamError> {
    let file = File::create(path).map_err(|source| NightcamError::StorageError {
        path: path.to_path_buf(),
        source,
    })?;
    let mut encoder = JpegEncoder::new_with_quality(BufWriter::new(file), JPEG_QUALITY);
    encoder
        .encode_image(frame)
        .map_err(|e| NightcamError::PhotoEncodeError {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
}
