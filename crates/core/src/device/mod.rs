pub mod artnet;
pub mod memory;

use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

use crate::color::Color;

pub use artnet::{ArtNetStrip, ByteOrder};
pub use memory::{Frame, MemoryStrip};

/// Errors raised by an output device.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("pixel {index} out of range for a strip of {len}")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("device unavailable: {0}")]
    Unavailable(String),
}

/// A buffered strip of RGB pixels.
pub trait PixelDevice: Send {
    fn num_pixels(&self) -> usize;

    /// Set one pixel in the buffer. Nothing is visible until [`PixelDevice::show`].
    fn set_pixel_color(&mut self, index: usize, color: Color) -> Result<(), DeviceError>;

    /// Global brightness scale applied when the buffer is committed.
    fn set_brightness(&mut self, level: u8) -> Result<(), DeviceError>;

    /// Commit the buffer to hardware.
    fn show(&mut self) -> Result<(), DeviceError>;
}

/// Device handle shared between the supervisor and whichever job holds the slot
pub type SharedDevice = Arc<Mutex<Box<dyn PixelDevice>>>;

pub fn shared(device: Box<dyn PixelDevice>) -> SharedDevice {
    Arc::new(Mutex::new(device))
}

/// Turn every pixel off and commit.
pub fn clear(device: &mut dyn PixelDevice) -> Result<(), DeviceError> {
    for i in 0..device.num_pixels() {
        device.set_pixel_color(i, Color::OFF)?;
    }
    device.show()
}
