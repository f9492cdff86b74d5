//! Touch event decoding and press tracking - no hardware required.
//!
//! The panel is read as a raw stream of kernel `input_event` records. This
//! module decodes those records, classifies the few that matter (absolute
//! X/Y and the touch button) and turns button transitions into completed
//! [`TouchEvent`]s. [`TouchDevice`] is the thin non-blocking I/O wrapper.

use std::fs::{File, OpenOptions};
use std::io::{self, Read};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use evdev::{AbsoluteAxisType, EventType, InputEvent, InputEventKind, Key};
use log::{debug, info, trace, warn};

use crate::calibration::CoordinateMapper;

/// Size of one kernel `input_event` record on this target.
pub const EVENT_SIZE: usize = std::mem::size_of::<libc::input_event>();

/// Width of each of the two timestamp fields.
const TIME_FIELD: usize = (EVENT_SIZE - 8) / 2;

/// Presses longer than this are treated as clock jumps, not real presses.
const MAX_SANE_PRESS: Duration = Duration::from_secs(3600);

const REOPEN_INTERVAL: Duration = Duration::from_secs(5);

// -- Raw records ----------------------------------------------

/// One decoded `input_event` record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawRecord {
    pub sec: i64,
    pub usec: i64,
    pub kind: u16,
    pub code: u16,
    pub value: i32,
}

impl RawRecord {
    pub fn new(time: Duration, kind: EventType, code: u16, value: i32) -> Self {
        Self {
            sec: time.as_secs() as i64,
            usec: time.subsec_micros() as i64,
            kind: kind.0,
            code,
            value,
        }
    }

    /// Decode one record in native byte order.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < EVENT_SIZE {
            return None;
        }
        let time_field = |at: usize| -> i64 {
            let b = &buf[at..at + TIME_FIELD];
            if TIME_FIELD == 8 {
                i64::from_ne_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
            } else {
                i32::from_ne_bytes([b[0], b[1], b[2], b[3]]) as i64
            }
        };
        let rest = &buf[2 * TIME_FIELD..];
        Some(Self {
            sec: time_field(0),
            usec: time_field(TIME_FIELD),
            kind: u16::from_ne_bytes([rest[0], rest[1]]),
            code: u16::from_ne_bytes([rest[2], rest[3]]),
            value: i32::from_ne_bytes([rest[4], rest[5], rest[6], rest[7]]),
        })
    }

    /// Encode in the same layout [`RawRecord::decode`] reads.
    pub fn to_bytes(&self) -> [u8; EVENT_SIZE] {
        let mut out = [0u8; EVENT_SIZE];
        if TIME_FIELD == 8 {
            out[..8].copy_from_slice(&self.sec.to_ne_bytes());
            out[8..16].copy_from_slice(&self.usec.to_ne_bytes());
        } else {
            out[..4].copy_from_slice(&(self.sec as i32).to_ne_bytes());
            out[4..8].copy_from_slice(&(self.usec as i32).to_ne_bytes());
        }
        let rest = &mut out[2 * TIME_FIELD..];
        rest[..2].copy_from_slice(&self.kind.to_ne_bytes());
        rest[2..4].copy_from_slice(&self.code.to_ne_bytes());
        rest[4..8].copy_from_slice(&self.value.to_ne_bytes());
        out
    }

    /// Kernel timestamp of the record.
    pub fn timestamp(&self) -> Option<Duration> {
        if self.sec < 0 || !(0..1_000_000).contains(&self.usec) {
            return None;
        }
        Some(Duration::new(self.sec as u64, self.usec as u32 * 1000))
    }

    pub fn to_input_event(&self) -> InputEvent {
        InputEvent::new(EventType(self.kind), self.code, self.value)
    }
}

// -- Classification -------------------------------------------

/// The subset of input events the touch reader acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TouchInput {
    AbsX(i32),
    AbsY(i32),
    ButtonDown,
    ButtonUp,
}

/// Classify a single `evdev::InputEvent`. Returns `None` for irrelevant
/// events (other axes, other keys, sync reports, key auto-repeat).
pub fn classify_event(event: &InputEvent) -> Option<TouchInput> {
    match event.kind() {
        InputEventKind::AbsAxis(AbsoluteAxisType::ABS_X) => Some(TouchInput::AbsX(event.value())),
        InputEventKind::AbsAxis(AbsoluteAxisType::ABS_Y) => Some(TouchInput::AbsY(event.value())),
        InputEventKind::Key(Key::BTN_TOUCH) => match event.value() {
            1 => Some(TouchInput::ButtonDown),
            0 => Some(TouchInput::ButtonUp),
            _ => None,
        },
        _ => None,
    }
}

// -- Touch state ----------------------------------------------

/// Latest raw panel position. Only usable once both axes have reported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TouchSample {
    pub raw_x: Option<i32>,
    pub raw_y: Option<i32>,
}

impl TouchSample {
    pub fn position(&self) -> Option<(i32, i32)> {
        Some((self.raw_x?, self.raw_y?))
    }
}

/// A completed press, produced on button release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TouchEvent {
    pub mapped_x: u32,
    pub mapped_y: u32,
    pub raw_x: i32,
    pub raw_y: i32,
    pub press_duration: Duration,
    /// Poll time at which the release was read.
    pub released_at: Instant,
}

/// Whether a finger is on the panel right now, and since when.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FingerState {
    pub down_since: Option<Instant>,
}

impl FingerState {
    pub fn is_down(&self) -> bool {
        self.down_since.is_some()
    }

    pub fn held_for(&self, now: Instant) -> Option<Duration> {
        self.down_since.map(|t| now.saturating_duration_since(t))
    }
}

/// Press tracking across polls.
#[derive(Debug, Default)]
pub struct TouchReader {
    sample: TouchSample,
    down_at: Option<Instant>,
    down_stamp: Option<Duration>,
    partial: Vec<u8>,
}

impl TouchReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sample(&self) -> TouchSample {
        self.sample
    }

    pub fn finger(&self) -> FingerState {
        FingerState {
            down_since: self.down_at,
        }
    }

    /// Forget any in-progress press, e.g. after the device went away.
    pub fn reset_press(&mut self) {
        self.down_at = None;
        self.down_stamp = None;
        self.partial.clear();
    }

    /// Apply decoded records and return the presses they complete, in order.
    ///
    /// Press duration is the difference of the kernel timestamps of the
    /// down and up records; if those are unusable it falls back to poll
    /// time.
    pub fn process_records(
        &mut self,
        records: &[RawRecord],
        mapper: &CoordinateMapper,
        now: Instant,
    ) -> Vec<TouchEvent> {
        let mut completed = Vec::new();
        for record in records {
            let Some(input) = classify_event(&record.to_input_event()) else {
                continue;
            };
            trace!("touch input {input:?}");
            match input {
                TouchInput::AbsX(x) => self.sample.raw_x = Some(x),
                TouchInput::AbsY(y) => self.sample.raw_y = Some(y),
                TouchInput::ButtonDown => {
                    if self.down_at.is_none() {
                        self.down_at = Some(now);
                        self.down_stamp = record.timestamp();
                    }
                }
                TouchInput::ButtonUp => {
                    let Some(down_at) = self.down_at.take() else {
                        continue;
                    };
                    let down_stamp = self.down_stamp.take();
                    let press_duration = match (down_stamp, record.timestamp()) {
                        (Some(d), Some(u)) if u >= d && u - d < MAX_SANE_PRESS => u - d,
                        _ => now.saturating_duration_since(down_at),
                    };
                    let Some((raw_x, raw_y)) = self.sample.position() else {
                        debug!("Release without a reported position - dropped");
                        continue;
                    };
                    let (mapped_x, mapped_y) = mapper.map(raw_x, raw_y);
                    completed.push(TouchEvent {
                        mapped_x,
                        mapped_y,
                        raw_x,
                        raw_y,
                        press_duration,
                        released_at: now,
                    });
                }
            }
        }
        completed
    }

    /// Decode a chunk of the raw byte stream. Trailing bytes of an
    /// incomplete record are kept for the next call.
    pub fn feed_bytes(
        &mut self,
        bytes: &[u8],
        mapper: &CoordinateMapper,
        now: Instant,
    ) -> Vec<TouchEvent> {
        self.partial.extend_from_slice(bytes);
        let whole = self.partial.len() / EVENT_SIZE * EVENT_SIZE;
        let records: Vec<RawRecord> = self.partial[..whole]
            .chunks_exact(EVENT_SIZE)
            .filter_map(RawRecord::decode)
            .collect();
        self.partial.drain(..whole);
        self.process_records(&records, mapper, now)
    }

    /// Drain everything currently readable from a non-blocking source.
    pub fn poll<R: Read>(
        &mut self,
        source: &mut R,
        mapper: &CoordinateMapper,
        now: Instant,
    ) -> io::Result<Vec<TouchEvent>> {
        let mut buf = [0u8; EVENT_SIZE * 32];
        let mut completed = Vec::new();
        loop {
            match source.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => completed.extend(self.feed_bytes(&buf[..n], mapper, now)),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(completed)
    }
}

// -- Device I/O -----------------------------------------------

/// The touch panel's event node, opened non-blocking.
pub struct TouchDevice {
    path: PathBuf,
    file: Option<File>,
    warned: bool,
    last_open_attempt: Option<Instant>,
}

fn open_nonblocking(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_NONBLOCK)
        .open(path)
}

impl TouchDevice {
    /// Open the device. Failure is not fatal: polling then yields nothing
    /// and reopening is retried periodically.
    pub fn open(path: &Path) -> Self {
        let mut device = Self {
            path: path.to_path_buf(),
            file: None,
            warned: false,
            last_open_attempt: None,
        };
        device.try_open(Instant::now());
        device
    }

    /// Wrap an already opened, non-blocking file.
    pub fn from_file(path: &Path, file: File) -> Self {
        Self {
            path: path.to_path_buf(),
            file: Some(file),
            warned: false,
            last_open_attempt: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    fn try_open(&mut self, now: Instant) {
        self.last_open_attempt = Some(now);
        match open_nonblocking(&self.path) {
            Ok(file) => {
                info!("Opened touch device {}", self.path.display());
                self.file = Some(file);
                self.warned = false;
            }
            Err(e) => {
                if !self.warned {
                    warn!("Touch device {} unavailable: {e}", self.path.display());
                    self.warned = true;
                }
            }
        }
    }

    /// Non-blocking poll. Never fails: errors are logged (once while the
    /// device stays unavailable) and yield an empty list.
    pub fn poll(
        &mut self,
        reader: &mut TouchReader,
        mapper: &CoordinateMapper,
        now: Instant,
    ) -> Vec<TouchEvent> {
        if self.file.is_none() {
            let due = self
                .last_open_attempt
                .is_none_or(|t| now.saturating_duration_since(t) >= REOPEN_INTERVAL);
            if due {
                self.try_open(now);
            }
        }
        let Some(file) = self.file.as_mut() else {
            return Vec::new();
        };
        match reader.poll(file, mapper, now) {
            Ok(events) => events,
            Err(e) if e.raw_os_error() == Some(libc::ENODEV) => {
                warn!("Touch device {} disconnected", self.path.display());
                self.file = None;
                self.warned = true;
                self.last_open_attempt = Some(now);
                reader.reset_press();
                Vec::new()
            }
            Err(e) => {
                warn!("Touch read error on {}: {e}", self.path.display());
                Vec::new()
            }
        }
    }
}
