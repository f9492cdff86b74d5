//! Where photos and videos go: USB stick if one is mounted, home otherwise.

use std::ffi::CString;
use std::fs;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use log::{debug, info, warn};

use crate::config::StorageConfig;
use crate::error::NightcamError;
use crate::power::run_command;

pub const PHOTO_DIR: &str = "Nachtsicht_Fotos";
pub const VIDEO_DIR: &str = "Nachtsicht_Videos";
const PHOTO_PREFIX: &str = "Nachtsicht_Foto";
const PHOTO_EXT: &str = ".jpg";

const FREE_SPACE_TTL: Duration = Duration::from_secs(2);

/// Remaining capacity estimate shown on the HUD.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capacity {
    pub photos: u64,
    pub video_minutes: u64,
}

pub fn estimate_capacity(free_bytes: u64, photo_bytes: u64, video_mbytes_per_sec: f64) -> Capacity {
    let mib = (free_bytes / (1024 * 1024)) as f64;
    Capacity {
        photos: free_bytes / photo_bytes.max(1),
        video_minutes: (mib / video_mbytes_per_sec / 60.0).floor() as u64,
    }
}

/// Number `N` of a `Nachtsicht_Foto<N>.jpg` file name.
pub fn photo_number(file_name: &str) -> Option<u64> {
    let digits = file_name
        .strip_prefix(PHOTO_PREFIX)?
        .strip_suffix(PHOTO_EXT)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Next free photo path in `dir`: one past the highest existing number.
pub fn next_photo_in(dir: &Path) -> io::Result<PathBuf> {
    let mut highest = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if let Some(n) = entry.file_name().to_str().and_then(photo_number) {
            highest = highest.max(n);
        }
    }
    Ok(dir.join(format!("{PHOTO_PREFIX}{}{PHOTO_EXT}", highest + 1)))
}

pub fn video_file_name(at: DateTime<Local>) -> String {
    format!(
        "Nachtsicht_Video_{}_{:06}.h264",
        at.format("%Y-%m-%d_%H%M%S"),
        at.timestamp_subsec_micros() % 1_000_000
    )
}

/// True if `path` is a directory on a different device than its parent.
pub fn is_mount_point(path: &Path) -> bool {
    let Ok(meta) = fs::metadata(path) else {
        return false;
    };
    if !meta.is_dir() {
        return false;
    }
    match path.parent() {
        Some(parent) => fs::metadata(parent).is_ok_and(|p| p.dev() != meta.dev()),
        None => true,
    }
}

/// Bytes available to unprivileged users on the filesystem holding `path`.
pub fn free_bytes(path: &Path) -> io::Result<u64> {
    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    // SAFETY: statvfs only writes into the zeroed struct we pass.
    let mut st: libc::statvfs = unsafe { std::mem::zeroed() };
    if unsafe { libc::statvfs(c_path.as_ptr(), &mut st) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(st.f_bavail as u64 * st.f_frsize as u64)
}

/// First `usb*` directory under any of `roots` that is a mount point.
pub fn find_usb_mount(roots: &[PathBuf]) -> Option<PathBuf> {
    for root in roots {
        let Ok(entries) = fs::read_dir(root) else {
            continue;
        };
        let mut candidates: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().starts_with("usb"))
            .map(|e| e.path())
            .collect();
        candidates.sort();
        if let Some(found) = candidates.into_iter().find(|p| is_mount_point(p)) {
            debug!("USB storage at {}", found.display());
            return Some(found);
        }
    }
    None
}

#[derive(Debug)]
struct CachedMount {
    path: Option<PathBuf>,
    found_at: Instant,
    verified_at: Instant,
}

/// Storage location resolver with USB detection cache.
#[derive(Debug)]
pub struct Storage {
    config: StorageConfig,
    usb: Option<CachedMount>,
    manual_unmount: bool,
    auto_mount_tried: bool,
    mount_worker: Option<JoinHandle<()>>,
    free: Option<(PathBuf, u64, Instant)>,
}

impl Storage {
    pub fn new(config: StorageConfig) -> Self {
        Self {
            config,
            usb: None,
            manual_unmount: false,
            auto_mount_tried: false,
            mount_worker: None,
            free: None,
        }
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Keep the stick unmounted until it is physically removed.
    pub fn suppress_auto_mount(&mut self) {
        info!("USB auto-mount disabled until the stick is removed");
        self.manual_unmount = true;
        self.invalidate();
    }

    pub fn auto_mount_suppressed(&self) -> bool {
        self.manual_unmount
    }

    /// Drop cached detection results.
    pub fn invalidate(&mut self) {
        self.usb = None;
        self.free = None;
    }

    /// Mounted USB stick, if any.
    pub fn usb_mountpoint(&mut self, now: Instant) -> Option<PathBuf> {
        let device_present = self.config.usb_device.exists();
        if !device_present {
            if self.manual_unmount {
                info!("USB stick removed, auto-mount enabled again");
                self.manual_unmount = false;
            }
            self.auto_mount_tried = false;
        }

        if let Some(worker) = self.mount_worker.take_if(|w| w.is_finished()) {
            if worker.join().is_err() {
                warn!("USB mount worker panicked");
            }
            // Look again now that the mount has settled.
            self.invalidate();
        }

        let recheck = match &self.usb {
            Some(CachedMount {
                path: Some(path),
                verified_at,
                ..
            }) if now.saturating_duration_since(*verified_at) >= self.config.recheck_interval => {
                Some(path.clone())
            }
            _ => None,
        };
        if let Some(path) = recheck {
            if is_mount_point(&path) {
                if let Some(cached) = &mut self.usb {
                    cached.verified_at = now;
                }
            } else {
                info!("USB hot-unplug: {} no longer mounted", path.display());
                self.usb = None;
                self.free = None;
            }
        }
        if let Some(cached) = &self.usb {
            if now.saturating_duration_since(cached.found_at) < self.config.cache_ttl {
                return cached.path.clone();
            }
        }

        if device_present
            && self.config.auto_mount
            && !self.manual_unmount
            && !self.auto_mount_tried
            && self.mount_worker.is_none()
        {
            self.try_auto_mount();
        }

        let found = find_usb_mount(&self.config.media_roots);
        self.usb = Some(CachedMount {
            path: found.clone(),
            found_at: now,
            verified_at: now,
        });
        found
    }

    /// True while a mount command started by auto-mount is still running.
    pub fn auto_mount_pending(&self) -> bool {
        self.mount_worker.as_ref().is_some_and(|w| !w.is_finished())
    }

    /// Start the mount command on the `usb-mount` thread. Runs at most once
    /// per detection of the device.
    fn try_auto_mount(&mut self) {
        let target = &self.config.mount_point;
        if is_mount_point(target) {
            return;
        }
        self.auto_mount_tried = true;
        info!(
            "{} present but not mounted, mounting at {}",
            self.config.usb_device.display(),
            target.display()
        );
        if let Err(e) = fs::create_dir_all(target) {
            warn!("Cannot create {}: {e}", target.display());
            return;
        }
        // SAFETY: getuid/getgid cannot fail.
        let (uid, gid) = unsafe { (libc::getuid(), libc::getgid()) };
        let mut argv = self.config.mount_command.clone();
        argv.extend([
            "-o".to_string(),
            format!("uid={uid},gid={gid},umask=000"),
            self.config.usb_device.display().to_string(),
            target.display().to_string(),
        ]);
        let target = target.clone();
        let spawned = thread::Builder::new()
            .name("usb-mount".to_string())
            .spawn(move || match run_command(&argv) {
                Ok(()) => info!("Auto-mount succeeded: {}", target.display()),
                Err(e) => warn!("Auto-mount failed: {e}"),
            });
        match spawned {
            Ok(handle) => self.mount_worker = Some(handle),
            Err(e) => warn!("Cannot start USB mount worker: {e}"),
        }
    }

    /// Directory all captures are stored under.
    pub fn base_dir(&mut self, now: Instant) -> PathBuf {
        self.usb_mountpoint(now)
            .unwrap_or_else(|| self.config.fallback_dir.clone())
    }

    /// Photo and video directories, created if missing.
    pub fn ensure_dirs(&mut self, now: Instant) -> Result<(PathBuf, PathBuf), NightcamError> {
        let base = self.base_dir(now);
        let photos = base.join(PHOTO_DIR);
        let videos = base.join(VIDEO_DIR);
        for dir in [&photos, &videos] {
            fs::create_dir_all(dir).map_err(|source| NightcamError::StorageError {
                path: dir.clone(),
                source,
            })?;
        }
        Ok((photos, videos))
    }

    fn ensure_space(&mut self, dir: &Path, now: Instant) -> Result<(), NightcamError> {
        let free = self.free_bytes(now)?;
        if free < self.config.photo_bytes {
            return Err(NightcamError::StorageFull {
                path: dir.to_path_buf(),
                free,
            });
        }
        Ok(())
    }

    pub fn next_photo_path(&mut self, now: Instant) -> Result<PathBuf, NightcamError> {
        let (photos, _) = self.ensure_dirs(now)?;
        self.ensure_space(&photos, now)?;
        next_photo_in(&photos).map_err(|source| NightcamError::StorageError {
            path: photos,
            source,
        })
    }

    pub fn next_video_path(&mut self, now: Instant) -> Result<PathBuf, NightcamError> {
        let (_, videos) = self.ensure_dirs(now)?;
        self.ensure_space(&videos, now)?;
        Ok(videos.join(video_file_name(Local::now())))
    }

    /// Free bytes at the current base directory (cached briefly).
    pub fn free_bytes(&mut self, now: Instant) -> Result<u64, NightcamError> {
        let base = self.base_dir(now);
        if let Some((path, bytes, at)) = &self.free {
            if *path == base && now.saturating_duration_since(*at) < FREE_SPACE_TTL {
                return Ok(*bytes);
            }
        }
        let bytes = free_bytes(&base).map_err(|source| NightcamError::StorageError {
            path: base.clone(),
            source,
        })?;
        self.free = Some((base, bytes, now));
        Ok(bytes)
    }

    pub fn capacity(&mut self, now: Instant) -> Result<Capacity, NightcamError> {
        let free = self.free_bytes(now)?;
        Ok(estimate_capacity(
            free,
            self.config.photo_bytes,
            self.config.video_mbytes_per_sec,
        ))
    }
}
