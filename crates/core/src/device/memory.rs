use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;

use super::{DeviceError, PixelDevice};
use crate::color::Color;

/// Snapshot of the strip at one commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub pixels: Vec<Color>,
    pub brightness: u8,
}

impl Frame {
    pub fn is_dark(&self) -> bool {
        self.pixels.iter().all(Color::is_off)
    }

    pub fn lit(&self) -> usize {
        self.pixels.iter().filter(|p| !p.is_off()).count()
    }

    pub fn is_filled_with(&self, color: Color) -> bool {
        self.pixels.iter().all(|p| *p == color)
    }
}

struct StripState {
    buffer: Vec<Color>,
    brightness: u8,
    frames: Vec<Frame>,
    fail_after: Option<usize>,
}

/// In-memory strip that records every commit.
///
/// Clones share the same buffer, so a caller can keep one handle for
/// inspection while the supervisor drives another.
#[derive(Clone)]
pub struct MemoryStrip {
    state: Arc<Mutex<StripState>>,
    commits: Arc<watch::Sender<usize>>,
}

impl MemoryStrip {
    pub fn new(num_pixels: usize) -> Self {
        let (commits, _) = watch::channel(0);
        Self {
            state: Arc::new(Mutex::new(StripState {
                buffer: vec![Color::OFF; num_pixels],
                brightness: 255,
                frames: Vec::new(),
                fail_after: None,
            })),
            commits: Arc::new(commits),
        }
    }

    /// Make every commit after the first `commits` fail.
    pub fn fail_after(&self, commits: usize) {
        self.state.lock().fail_after = Some(commits);
    }

    pub fn frames(&self) -> Vec<Frame> {
        self.state.lock().frames.clone()
    }

    pub fn last_frame(&self) -> Option<Frame> {
        self.state.lock().frames.last().cloned()
    }

    pub fn commit_count(&self) -> usize {
        self.state.lock().frames.len()
    }

    pub fn brightness(&self) -> u8 {
        self.state.lock().brightness
    }

    /// Wait until at least `count` commits have been recorded.
    pub async fn wait_for_commits(&self, count: usize) {
        let mut rx = self.commits.subscribe();
        // The sender lives as long as self, so this cannot fail
        let _ = rx.wait_for(|n| *n >= count).await;
    }
}

impl PixelDevice for MemoryStrip {
    fn num_pixels(&self) -> usize {
        self.state.lock().buffer.len()
    }

    fn set_pixel_color(&mut self, index: usize, color: Color) -> Result<(), DeviceError> {
        let mut state = self.state.lock();
        let len = state.buffer.len();
        let pixel = state
            .buffer
            .get_mut(index)
            .ok_or(DeviceError::IndexOutOfRange { index, len })?;
        *pixel = color;
        Ok(())
    }

    fn set_brightness(&mut self, level: u8) -> Result<(), DeviceError> {
        self.state.lock().brightness = level;
        Ok(())
    }

    fn show(&mut self) -> Result<(), DeviceError> {
        let count = {
            let mut state = self.state.lock();
            if let Some(limit) = state.fail_after {
                if state.frames.len() >= limit {
                    return Err(DeviceError::Unavailable("strip stopped responding".into()));
                }
            }
            let frame = Frame {
                pixels: state.buffer.clone(),
                brightness: state.brightness,
            };
            state.frames.push(frame);
            state.frames.len()
        };
        self.commits.send_replace(count);
        Ok(())
    }
}
