use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Read};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::thread;
use std::time::{Duration, Instant};

use embedded_graphics::pixelcolor::Rgb565;
use embedded_graphics::prelude::*;
use embedded_graphics::primitives::PrimitiveStyle;
use log::{debug, info, warn};

use super::{Overlay, OverlayAction};
use crate::display::{Canvas, Rect};
use crate::error::NightcamError;
use crate::hud::{DARK_GREY, GREEN, RED, WHITE, draw_button, draw_small_text, draw_text};

const TITLE_HEIGHT: u32 = 40;
const LINE_HEIGHT: u32 = 11;
/// Grace period for the reader threads to forward the last output after
/// the child exited.
const EXIT_DRAIN: Duration = Duration::from_secs(1);

/// Runs a shell command and shows its output. Input is not forwarded.
pub struct TerminalOverlay {
    command: Vec<String>,
    width: u32,
    height: u32,
    child: Option<Child>,
    output: Option<Receiver<String>>,
    lines: VecDeque<String>,
    exited_at: Option<Instant>,
}

fn forward_lines(name: &str, source: impl Read + Send + 'static, tx: Sender<String>) {
    let spawned = thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            for line in BufReader::new(source).lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        });
    if let Err(e) = spawned {
        warn!("Cannot spawn {name} reader: {e}");
    }
}

impl TerminalOverlay {
    pub fn new(command: Vec<String>, width: u32, height: u32) -> Self {
        Self {
            command,
            width,
            height,
            child: None,
            output: None,
            lines: VecDeque::new(),
            exited_at: None,
        }
    }

    pub fn exit_button(&self) -> Rect {
        Rect::new(self.width.saturating_sub(80), 5, 70, TITLE_HEIGHT - 10)
    }

    /// Output lines currently kept for display, oldest first.
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(String::as_str)
    }

    pub fn is_running(&self) -> bool {
        self.child.is_some() && self.exited_at.is_none()
    }

    fn max_lines(&self) -> usize {
        (self.height.saturating_sub(TITLE_HEIGHT + 4) / LINE_HEIGHT).max(1) as usize
    }

    /// Move pending output into the line buffer. Returns `true` once both
    /// reader threads have finished.
    fn drain_output(&mut self) -> bool {
        let Some(rx) = &self.output else {
            return true;
        };
        let mut finished = false;
        loop {
            match rx.try_recv() {
                Ok(line) => self.lines.push_back(line),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    finished = true;
                    break;
                }
            }
        }
        let keep = self.max_lines();
        while self.lines.len() > keep {
            self.lines.pop_front();
        }
        finished
    }
}

impl Overlay for TerminalOverlay {
    fn activate(&mut self, _now: Instant) -> Result<(), NightcamError> {
        let Some((program, args)) = self.command.split_first() else {
            return Err(NightcamError::CommandError {
                command: String::new(),
                message: "empty terminal command".into(),
            });
        };
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| NightcamError::CommandError {
                command: self.command.join(" "),
                message: e.to_string(),
            })?;

        let (tx, rx) = mpsc::channel();
        if let Some(stdout) = child.stdout.take() {
            forward_lines("term-stdout", stdout, tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            forward_lines("term-stderr", stderr, tx);
        }

        info!("Terminal started: {} (pid {})", self.command.join(" "), child.id());
        self.lines.clear();
        self.exited_at = None;
        self.output = Some(rx);
        self.child = Some(child);
        Ok(())
    }

    fn deactivate(&mut self) {
        if let Some(mut child) = self.child.take() {
            if self.exited_at.is_none() {
                let _ = child.kill();
            }
            let _ = child.wait();
            debug!("Terminal process reaped");
        }
        self.output = None;
        self.exited_at = None;
    }

    fn handle_touch(&mut self, x: u32, y: u32, _now: Instant) -> OverlayAction {
        if self.exit_button().contains(x, y) {
            info!("Terminal EXIT pressed");
            return OverlayAction::Close;
        }
        OverlayAction::Stay
    }

    fn update(&mut self, now: Instant) -> OverlayAction {
        let drained = self.drain_output();

        if self.exited_at.is_none() {
            let status = match self.child.as_mut() {
                Some(child) => child.try_wait(),
                None => return OverlayAction::Close,
            };
            match status {
                Ok(Some(status)) => {
                    info!("Terminal process exited ({status})");
                    self.exited_at = Some(now);
                }
                Ok(None) => return OverlayAction::Stay,
                Err(e) => {
                    warn!("Cannot poll terminal process: {e}");
                    return OverlayAction::Stay;
                }
            }
        }

        match self.exited_at {
            Some(at) if drained || now.saturating_duration_since(at) >= EXIT_DRAIN => {
                OverlayAction::Close
            }
            _ => OverlayAction::Stay,
        }
    }

    fn render(&self, canvas: &mut Canvas) {
        let _ = canvas.clear(Rgb565::BLACK);
        let _ = Rect::new(0, 0, self.width, TITLE_HEIGHT)
            .to_primitive()
            .into_styled(PrimitiveStyle::with_fill(DARK_GREY))
            .draw(canvas);
        draw_text(canvas, "TERMINAL", 10, 26, WHITE);
        draw_button(canvas, self.exit_button(), "EXIT", RED);

        let mut y = TITLE_HEIGHT + 4;
        for line in &self.lines {
            draw_small_text(canvas, line, 4, y as i32, GREEN);
            y += LINE_HEIGHT;
        }
    }
}

impl Drop for TerminalOverlay {
    fn drop(&mut self) {
        self.deactivate();
    }
}
