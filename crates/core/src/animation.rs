use std::time::Duration;

use thiserror::Error;

use crate::color::{wheel, Color};
use crate::command::{Command, CommandKind};
use crate::device::{self, DeviceError, SharedDevice};
use crate::job::{CancelSignal, JobOutcome};

/// How often an indefinite hold wakes up on its own
pub const HOLD_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Number of frames in one full turn of the color wheel
const WHEEL_STEPS: u64 = 256;

/// Chase-rainbow indexes the wheel modulo 255, unlike the other rainbows
const CHASE_RAINBOW_MODULUS: u64 = 255;

/// Spacing of lit pixels in the theater chase patterns
const CHASE_SPACING: usize = 3;

#[derive(Debug, Error)]
pub enum AnimationError {
    #[error("animation cancelled")]
    Cancelled,

    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// A job's view of the strip.
///
/// The device lock is taken per call and never held across an await.
pub struct Canvas {
    device: SharedDevice,
    signal: CancelSignal,
    num_pixels: usize,
}

impl Canvas {
    pub fn new(device: SharedDevice, signal: CancelSignal) -> Self {
        let num_pixels = device.lock().num_pixels();
        Self::with_len(device, signal, num_pixels)
    }

    /// Build a canvas for a strip of known length without touching the device.
    pub fn with_len(device: SharedDevice, signal: CancelSignal, num_pixels: usize) -> Self {
        Self {
            device,
            signal,
            num_pixels,
        }
    }

    pub fn num_pixels(&self) -> usize {
        self.num_pixels
    }

    fn check(&self) -> Result<(), AnimationError> {
        if self.signal.is_cancelled() {
            Err(AnimationError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn set_brightness(&self, level: u8) -> Result<(), AnimationError> {
        self.device.lock().set_brightness(level)?;
        Ok(())
    }

    /// Buffer one pixel; indices past the end of the strip are ignored.
    fn set(&self, index: usize, color: Color) -> Result<(), AnimationError> {
        if index < self.num_pixels {
            self.device.lock().set_pixel_color(index, color)?;
        }
        Ok(())
    }

    fn fill(&self, color: Color) -> Result<(), AnimationError> {
        let mut device = self.device.lock();
        for i in 0..self.num_pixels {
            device.set_pixel_color(i, color)?;
        }
        Ok(())
    }

    fn paint(&self, mut color_at: impl FnMut(usize) -> Color) -> Result<(), AnimationError> {
        let mut device = self.device.lock();
        for i in 0..self.num_pixels {
            device.set_pixel_color(i, color_at(i))?;
        }
        Ok(())
    }

    /// Commit the buffer, unless cancellation has been requested.
    fn show(&self) -> Result<(), AnimationError> {
        self.check()?;
        self.device.lock().show()?;
        Ok(())
    }

    /// Clear as an animation step; honours cancellation like any other frame.
    fn clear(&self) -> Result<(), AnimationError> {
        self.fill(Color::OFF)?;
        self.show()
    }

    /// Clear regardless of cancellation.
    pub fn force_clear(&self) -> Result<(), DeviceError> {
        let mut device = self.device.lock();
        device::clear(&mut **device)
    }

    /// Sleep between frames, waking early on cancellation.
    async fn pause(&mut self, duration: Duration) -> Result<(), AnimationError> {
        self.check()?;
        if duration.is_zero() {
            tokio::task::yield_now().await;
            return self.check();
        }

        let cancelled = tokio::select! {
            _ = tokio::time::sleep(duration) => false,
            _ = self.signal.cancelled() => true,
        };
        if cancelled {
            Err(AnimationError::Cancelled)
        } else {
            self.check()
        }
    }

    /// Hold the current frame until cancelled.
    async fn hold(&mut self) -> Result<(), AnimationError> {
        loop {
            self.pause(HOLD_POLL_INTERVAL).await?;
        }
    }
}

/// Run the stepping function for `command` to completion or cancellation.
pub async fn play(command: &Command, canvas: &mut Canvas) -> Result<(), AnimationError> {
    match command.kind {
        CommandKind::Clear => canvas.clear(),
        CommandKind::SolidColor => solid(command, canvas).await,
        CommandKind::Blink => blink(command, canvas).await,
        CommandKind::ColorWipe => color_wipe(command, canvas).await,
        CommandKind::TheaterChase => theater_chase(command, canvas).await,
        CommandKind::Rainbow => rainbow(command, canvas).await,
        CommandKind::RainbowCycle => rainbow_cycle(command, canvas).await,
        CommandKind::TheaterChaseRainbow => theater_chase_rainbow(command, canvas).await,
    }
}

/// Play `command` and turn the result into a job outcome, clearing the strip
/// when the animation was cancelled.
pub async fn perform(command: &Command, canvas: &mut Canvas) -> JobOutcome {
    match play(command, canvas).await {
        Ok(()) => JobOutcome::Completed,
        Err(AnimationError::Cancelled) => {
            if let Err(e) = canvas.force_clear() {
                log::warn!("Failed to clear strip after cancelling {}: {}", command.kind, e);
            }
            JobOutcome::Cancelled
        }
        Err(AnimationError::Device(e)) => JobOutcome::Failed(e),
    }
}

async fn solid(command: &Command, canvas: &mut Canvas) -> Result<(), AnimationError> {
    canvas.set_brightness(command.brightness)?;
    canvas.fill(command.color)?;
    canvas.show()?;

    if command.wait_ms == 0 {
        return canvas.hold().await;
    }

    canvas.pause(command.wait()).await?;
    canvas.clear()
}

async fn blink(command: &Command, canvas: &mut Canvas) -> Result<(), AnimationError> {
    canvas.set_brightness(command.brightness)?;

    for _ in 0..command.repeat {
        canvas.fill(command.color)?;
        canvas.show()?;
        canvas.pause(command.wait()).await?;

        canvas.fill(Color::OFF)?;
        canvas.show()?;
        canvas.pause(command.wait()).await?;
    }
    Ok(())
}

async fn color_wipe(command: &Command, canvas: &mut Canvas) -> Result<(), AnimationError> {
    canvas.set_brightness(command.brightness)?;

    for _ in 0..command.repeat {
        for i in 0..canvas.num_pixels() {
            canvas.set(i, command.color)?;
            canvas.show()?;
            canvas.pause(command.wait()).await?;
        }
        canvas.clear()?;
    }
    Ok(())
}

async fn theater_chase(command: &Command, canvas: &mut Canvas) -> Result<(), AnimationError> {
    canvas.set_brightness(command.brightness)?;
    let n = canvas.num_pixels();

    for _ in 0..command.repeat {
        for q in 0..CHASE_SPACING {
            for i in (0..n).step_by(CHASE_SPACING) {
                canvas.set(i + q, command.color)?;
            }
            canvas.show()?;
            canvas.pause(command.wait()).await?;

            // Turned off in the buffer only; the next commit flushes it
            for i in (0..n).step_by(CHASE_SPACING) {
                canvas.set(i + q, Color::OFF)?;
            }
        }
    }
    canvas.clear()
}

async fn rainbow(command: &Command, canvas: &mut Canvas) -> Result<(), AnimationError> {
    canvas.set_brightness(command.brightness)?;

    for frame in 0..WHEEL_STEPS * command.repeat as u64 {
        canvas.paint(|i| wheel(((i as u64 + frame) % WHEEL_STEPS) as u8))?;
        canvas.show()?;
        canvas.pause(command.wait()).await?;
    }
    canvas.clear()
}

async fn rainbow_cycle(command: &Command, canvas: &mut Canvas) -> Result<(), AnimationError> {
    canvas.set_brightness(command.brightness)?;
    let n = canvas.num_pixels() as u64;

    for frame in 0..WHEEL_STEPS * command.repeat as u64 {
        canvas.paint(|i| {
            let offset = i as u64 * WHEEL_STEPS / n;
            wheel(((offset + frame) % WHEEL_STEPS) as u8)
        })?;
        canvas.show()?;
        canvas.pause(command.wait()).await?;
    }
    canvas.clear()
}

async fn theater_chase_rainbow(
    command: &Command,
    canvas: &mut Canvas,
) -> Result<(), AnimationError> {
    canvas.set_brightness(command.brightness)?;
    let n = canvas.num_pixels();

    for frame in 0..WHEEL_STEPS * command.repeat as u64 {
        for q in 0..CHASE_SPACING {
            for i in (0..n).step_by(CHASE_SPACING) {
                let pos = (i as u64 + frame) % CHASE_RAINBOW_MODULUS;
                canvas.set(i + q, wheel(pos as u8))?;
            }
            canvas.show()?;
            canvas.pause(command.wait()).await?;

            for i in (0..n).step_by(CHASE_SPACING) {
                canvas.set(i + q, Color::OFF)?;
            }
        }
    }
    canvas.clear()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{shared, MemoryStrip};
    use crate::job::cancellation;

    fn canvas(strip: &MemoryStrip) -> (crate::job::CancelHandle, Canvas) {
        let (handle, signal) = cancellation();
        let canvas = Canvas::new(shared(Box::new(strip.clone())), signal);
        (handle, canvas)
    }

    async fn run(command: Command, strip: &MemoryStrip) -> JobOutcome {
        let (_handle, mut canvas) = canvas(strip);
        perform(&command, &mut canvas).await
    }

    #[tokio::test]
    async fn test_clear_commits_once() {
        let strip = MemoryStrip::new(4);
        let outcome = run(Command::new(CommandKind::Clear), &strip).await;

        assert!(matches!(outcome, JobOutcome::Completed));
        let frames = strip.frames();
        assert_eq!(frames.len(), 1);
        assert!(frames[0].is_dark());
    }

    #[tokio::test]
    async fn test_solid_with_wait_clears_afterwards() {
        let strip = MemoryStrip::new(5);
        let command = Command::new(CommandKind::SolidColor)
            .color((1, 2, 3))
            .wait_ms(1)
            .brightness(99);
        let outcome = run(command, &strip).await;

        assert!(matches!(outcome, JobOutcome::Completed));
        let frames = strip.frames();
        assert_eq!(frames.len(), 2);
        assert!(frames[0].is_filled_with(Color::new(1, 2, 3)));
        assert_eq!(frames[0].brightness, 99);
        assert!(frames[1].is_dark());
    }

    #[tokio::test]
    async fn test_blink_alternates_without_trailing_clear() {
        let strip = MemoryStrip::new(3);
        let command = Command::new(CommandKind::Blink)
            .color((9, 9, 9))
            .repeat(2)
            .wait_ms(0);
        run(command, &strip).await;

        let frames = strip.frames();
        assert_eq!(frames.len(), 4);
        assert!(frames[0].is_filled_with(Color::new(9, 9, 9)));
        assert!(frames[1].is_dark());
        assert!(frames[2].is_filled_with(Color::new(9, 9, 9)));
        assert!(frames[3].is_dark());
    }

    #[tokio::test]
    async fn test_color_wipe_clears_after_each_pass() {
        let strip = MemoryStrip::new(4);
        let command = Command::new(CommandKind::ColorWipe)
            .color((255, 0, 0))
            .repeat(2)
            .wait_ms(0);
        run(command, &strip).await;

        let lit: Vec<usize> = strip.frames().iter().map(|f| f.lit()).collect();
        assert_eq!(lit, vec![1, 2, 3, 4, 0, 1, 2, 3, 4, 0]);
    }

    #[tokio::test]
    async fn test_theater_chase_phases() {
        let strip = MemoryStrip::new(7);
        let on = Color::new(0, 0, 200);
        let command = Command::new(CommandKind::TheaterChase)
            .color(on)
            .repeat(1)
            .wait_ms(0);
        run(command, &strip).await;

        let frames = strip.frames();
        // three phases and the final clear
        assert_eq!(frames.len(), 4);
        let lit_at = |frame: &crate::device::Frame| -> Vec<usize> {
            (0..7).filter(|i| frame.pixels[*i] == on).collect()
        };
        assert_eq!(lit_at(&frames[0]), vec![0, 3, 6]);
        assert_eq!(lit_at(&frames[1]), vec![1, 4]);
        assert_eq!(lit_at(&frames[2]), vec![2, 5]);
        assert!(frames[3].is_dark());
    }

    #[tokio::test]
    async fn test_rainbow_frames_follow_the_wheel() {
        let strip = MemoryStrip::new(3);
        let command = Command::new(CommandKind::Rainbow).repeat(1).wait_ms(0);
        run(command, &strip).await;

        let frames = strip.frames();
        assert_eq!(frames.len(), 257);
        assert_eq!(frames[0].pixels, vec![wheel(0), wheel(1), wheel(2)]);
        assert_eq!(frames[255].pixels, vec![wheel(255), wheel(0), wheel(1)]);
        assert!(frames[256].is_dark());
    }

    #[tokio::test]
    async fn test_rainbow_cycle_spreads_wheel_over_strip() {
        let strip = MemoryStrip::new(4);
        let command = Command::new(CommandKind::RainbowCycle).repeat(1).wait_ms(0);
        run(command, &strip).await;

        let frames = strip.frames();
        assert_eq!(frames.len(), 257);
        assert_eq!(
            frames[0].pixels,
            vec![wheel(0), wheel(64), wheel(128), wheel(192)]
        );
        assert_eq!(
            frames[1].pixels,
            vec![wheel(1), wheel(65), wheel(129), wheel(193)]
        );
    }

    #[tokio::test]
    async fn test_theater_chase_rainbow_wraps_at_255() {
        let strip = MemoryStrip::new(3);
        let command = Command::new(CommandKind::TheaterChaseRainbow)
            .repeat(1)
            .wait_ms(0);
        run(command, &strip).await;

        let frames = strip.frames();
        assert_eq!(frames.len(), 256 * 3 + 1);
        // frame 255, phase 0: pixel 0 uses (0 + 255) % 255 == 0
        assert_eq!(frames[255 * 3].pixels[0], wheel(0));
        assert!(frames.last().unwrap().is_dark());
    }

    #[tokio::test]
    async fn test_cancelled_hold_clears_the_strip() {
        let strip = MemoryStrip::new(3);
        let (handle, mut canvas) = canvas(&strip);
        let command = Command::new(CommandKind::SolidColor)
            .color((10, 20, 30))
            .wait_ms(0);

        let task = tokio::spawn(async move { perform(&command, &mut canvas).await });
        strip.wait_for_commits(1).await;
        assert!(!task.is_finished());

        handle.cancel();
        let outcome = tokio::time::timeout(Duration::from_millis(500), task)
            .await
            .expect("hold should stop well inside one poll interval")
            .unwrap();

        assert!(matches!(outcome, JobOutcome::Cancelled));
        assert!(strip.last_frame().unwrap().is_dark());
    }

    #[tokio::test]
    async fn test_device_failure_ends_the_job() {
        let strip = MemoryStrip::new(3);
        strip.fail_after(2);
        let command = Command::new(CommandKind::ColorWipe).repeat(5).wait_ms(0);
        let outcome = run(command, &strip).await;

        assert!(matches!(outcome, JobOutcome::Failed(_)));
        assert_eq!(strip.commit_count(), 2);
    }
}
