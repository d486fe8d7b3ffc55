use serde::{Deserialize, Serialize};

/// 24-bit color as sent to a pixel strip.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const OFF: Color = Color { r: 0, g: 0, b: 0 };

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Color { r, g, b }
    }

    /// Scale every channel by a 0-255 brightness level.
    pub fn scaled(&self, brightness: u8) -> Self {
        let scale = |c: u8| ((c as u16 * brightness as u16) / 255) as u8;
        Color {
            r: scale(self.r),
            g: scale(self.g),
            b: scale(self.b),
        }
    }

    pub fn is_off(&self) -> bool {
        *self == Color::OFF
    }
}

impl From<(u8, u8, u8)> for Color {
    fn from((r, g, b): (u8, u8, u8)) -> Self {
        Color { r, g, b }
    }
}

/// Map a position on the color wheel to a color.
///
/// The wheel runs green -> red -> blue and back to green over 0-255.
pub fn wheel(pos: u8) -> Color {
    match pos {
        0..=84 => Color::new(pos * 3, 255 - pos * 3, 0),
        85..=169 => {
            let pos = pos - 85;
            Color::new(255 - pos * 3, 0, pos * 3)
        }
        _ => {
            let pos = pos - 170;
            Color::new(0, pos * 3, 255 - pos * 3)
        }
    }
}
