use bling_core::{Color, DeviceError, PixelDevice};

/// Strip that logs each commit instead of driving hardware.
pub struct LogStrip {
    pixels: Vec<Color>,
    brightness: u8,
    commits: u64,
}

impl LogStrip {
    pub fn new(num_pixels: usize) -> Self {
        Self {
            pixels: vec![Color::OFF; num_pixels],
            brightness: 255,
            commits: 0,
        }
    }
}

impl PixelDevice for LogStrip {
    fn num_pixels(&self) -> usize {
        self.pixels.len()
    }

    fn set_pixel_color(&mut self, index: usize, color: Color) -> Result<(), DeviceError> {
        let len = self.pixels.len();
        let pixel = self
            .pixels
            .get_mut(index)
            .ok_or(DeviceError::IndexOutOfRange { index, len })?;
        *pixel = color;
        Ok(())
    }

    fn set_brightness(&mut self, level: u8) -> Result<(), DeviceError> {
        self.brightness = level;
        Ok(())
    }

    fn show(&mut self) -> Result<(), DeviceError> {
        self.commits += 1;
        let lit = self.pixels.iter().filter(|p| !p.is_off()).count();
        log::debug!(
            "frame {}: {}/{} lit at brightness {}, first {:?}",
            self.commits,
            lit,
            self.pixels.len(),
            self.brightness,
            self.pixels.first()
        );
        Ok(())
    }
}
