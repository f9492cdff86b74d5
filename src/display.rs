//! Framebuffer output: a memory-mapped `/dev/fb*` device and an RGB565
//! drawing canvas that `embedded-graphics` can render into.

use std::convert::Infallible;
use std::fs::{File, OpenOptions};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use embedded_graphics::pixelcolor::Rgb565;
use embedded_graphics::pixelcolor::raw::{RawData, RawU16};
use embedded_graphics::prelude::{DrawTarget, OriginDimensions, Pixel, Size};
use image::GrayImage;
use log::{info, warn};
use memmap2::{MmapMut, MmapOptions};

const FBIOGET_VSCREENINFO: libc::c_ulong = 0x4600;

/// Errors returned by [`Framebuffer`] methods.
#[derive(Debug, thiserror::Error)]
pub enum FramebufferError {
    #[error("cannot open {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot map {path}: {source}")]
    Map {
        path: PathBuf,
        source: std::io::Error,
    },
}

// -- Geometry -------------------------------------------------

/// Axis-aligned rectangle in display pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Inclusive containment: points on the border are inside.
    pub fn contains(&self, px: u32, py: u32) -> bool {
        (self.x..=self.x.saturating_add(self.width)).contains(&px)
            && (self.y..=self.y.saturating_add(self.height)).contains(&py)
    }

    pub fn to_primitive(&self) -> embedded_graphics::primitives::Rectangle {
        embedded_graphics::primitives::Rectangle::new(
            embedded_graphics::prelude::Point::new(self.x as i32, self.y as i32),
            Size::new(self.width, self.height),
        )
    }
}

// -- Canvas ---------------------------------------------------

/// Off-screen RGB565 image the size of the display.
pub struct Canvas {
    width: u32,
    height: u32,
    pixels: Vec<u16>,
}

impl Canvas {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; width as usize * height as usize],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Raw RGB565 value at a pixel, `None` outside the canvas.
    pub fn pixel(&self, x: u32, y: u32) -> Option<u16> {
        if x >= self.width || y >= self.height {
            return None;
        }
        Some(self.pixels[y as usize * self.width as usize + x as usize])
    }

    pub fn fill_black(&mut self) {
        self.pixels.fill(0);
    }

    /// Scale a grayscale frame to the full canvas (nearest neighbour).
    pub fn blit_gray(&mut self, frame: &GrayImage) {
        let (fw, fh) = frame.dimensions();
        if fw == 0 || fh == 0 {
            self.fill_black();
            return;
        }
        let src = frame.as_raw();
        for y in 0..self.height {
            let sy = (y as u64 * fh as u64 / self.height as u64) as usize;
            let row = &src[sy * fw as usize..(sy + 1) * fw as usize];
            let dst = &mut self.pixels
                [y as usize * self.width as usize..(y as usize + 1) * self.width as usize];
            for (x, out) in dst.iter_mut().enumerate() {
                let sx = (x as u64 * fw as u64 / self.width as u64) as usize;
                *out = gray_to_rgb565(row[sx]);
            }
        }
    }

    /// Packed little-endian RGB565 bytes, row-major.
    pub fn write_le_bytes(&self, out: &mut [u8]) {
        for (chunk, px) in out.chunks_exact_mut(2).zip(&self.pixels) {
            chunk.copy_from_slice(&px.to_le_bytes());
        }
    }
}

fn gray_to_rgb565(v: u8) -> u16 {
    let r = (v >> 3) as u16;
    let g = (v >> 2) as u16;
    (r << 11) | (g << 5) | r
}

impl OriginDimensions for Canvas {
    fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }
}

impl DrawTarget for Canvas {
    type Color = Rgb565;
    type Error = Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        for Pixel(point, color) in pixels {
            if point.x < 0 || point.y < 0 {
                continue;
            }
            let (x, y) = (point.x as u32, point.y as u32);
            if x >= self.width || y >= self.height {
                continue;
            }
            self.pixels[y as usize * self.width as usize + x as usize] =
                RawU16::from(color).into_inner();
        }
        Ok(())
    }

    fn clear(&mut self, color: Self::Color) -> Result<(), Self::Error> {
        self.pixels.fill(RawU16::from(color).into_inner());
        Ok(())
    }
}

// -- Framebuffer ----------------------------------------------

/// Leading part of the kernel's `fb_var_screeninfo`, padded to its full
/// 160-byte size.
#[repr(C)]
#[derive(Default)]
#[allow(dead_code)]
struct VarScreeninfo {
    xres: u32,
    yres: u32,
    xres_virtual: u32,
    yres_virtual: u32,
    xoffset: u32,
    yoffset: u32,
    bits_per_pixel: u32,
    grayscale: u32,
    _rest: [u32; 32],
}

/// A memory-mapped framebuffer device, written as packed 16 bpp.
pub struct Framebuffer {
    _file: File,
    map: MmapMut,
    width: u32,
    height: u32,
}

impl Framebuffer {
    /// Open the device and map `width * height * 2` bytes. The resolution
    /// comes from the driver; `fallback` is used if the ioctl fails.
    pub fn open(path: &Path, fallback: (u32, u32)) -> Result<Self, FramebufferError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|source| FramebufferError::Open {
                path: path.to_path_buf(),
                source,
            })?;

        let (width, height, bpp) = match query_resolution(&file) {
            Some(res) => res,
            None => {
                warn!(
                    "{}: cannot query resolution, assuming {}x{}",
                    path.display(),
                    fallback.0,
                    fallback.1
                );
                (fallback.0, fallback.1, 16)
            }
        };
        if bpp != 16 {
            warn!("{}: driver reports {bpp} bpp, writing RGB565 anyway", path.display());
        }

        // SAFETY: the mapping is only accessed through this struct, which
        // keeps the file open for its whole lifetime.
        let map = unsafe {
            MmapOptions::new()
                .len(width as usize * height as usize * 2)
                .map_mut(&file)
        }
        .map_err(|source| FramebufferError::Map {
            path: path.to_path_buf(),
            source,
        })?;

        info!("Framebuffer {} {width}x{height}@{bpp}bpp", path.display());
        Ok(Self {
            _file: file,
            map,
            width,
            height,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Write the whole canvas at offset 0.
    pub fn present(&mut self, canvas: &Canvas) {
        canvas.write_le_bytes(&mut self.map[..]);
    }
}

fn query_resolution(file: &File) -> Option<(u32, u32, u32)> {
    let mut info = VarScreeninfo::default();
    // SAFETY: FBIOGET_VSCREENINFO fills a struct fb_var_screeninfo, which
    // `VarScreeninfo` matches in size and layout.
    let rc = unsafe {
        libc::ioctl(
            file.as_raw_fd(),
            FBIOGET_VSCREENINFO as _,
            &mut info as *mut VarScreeninfo,
        )
    };
    if rc < 0 || info.xres == 0 || info.yres == 0 {
        return None;
    }
    Some((info.xres, info.yres, info.bits_per_pixel))
}
