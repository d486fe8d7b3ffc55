use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::color::Color;

/// Animations the runtime knows how to play
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandKind {
    SolidColor,
    Blink,
    ColorWipe,
    TheaterChase,
    Rainbow,
    RainbowCycle,
    TheaterChaseRainbow,
    Clear,
}

impl CommandKind {
    /// Name used on the shared table
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::SolidColor => "solid",
            CommandKind::Blink => "blink",
            CommandKind::ColorWipe => "colorWipe",
            CommandKind::TheaterChase => "theaterChase",
            CommandKind::Rainbow => "rainbow",
            CommandKind::RainbowCycle => "rainbowCycle",
            CommandKind::TheaterChaseRainbow => "theaterChaseRainbow",
            CommandKind::Clear => "clear",
        }
    }

    pub fn all() -> Vec<CommandKind> {
        vec![
            CommandKind::SolidColor,
            CommandKind::Blink,
            CommandKind::ColorWipe,
            CommandKind::TheaterChase,
            CommandKind::Rainbow,
            CommandKind::RainbowCycle,
            CommandKind::TheaterChaseRainbow,
            CommandKind::Clear,
        ]
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown command {0:?}")]
pub struct UnknownCommand(pub String);

impl FromStr for CommandKind {
    type Err = UnknownCommand;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CommandKind::all()
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownCommand(s.to_string()))
    }
}

/// Fallback values used when a parameter is missing or not a number
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParamDefaults {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
    pub repeat: u32,
    pub wait_ms: u64,
    pub brightness: u8,
}

impl Default for ParamDefaults {
    fn default() -> Self {
        // A dim grey, so a command sent without colors is still obvious
        Self {
            red: 32,
            green: 32,
            blue: 32,
            repeat: 1,
            wait_ms: 50,
            brightness: 64,
        }
    }
}

/// Parameter values exactly as read from the table, before coercion
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawParams {
    pub red: f64,
    pub green: f64,
    pub blue: f64,
    pub repeat: f64,
    pub wait_ms: f64,
    pub brightness: f64,
}

impl From<&ParamDefaults> for RawParams {
    fn from(defaults: &ParamDefaults) -> Self {
        Self {
            red: defaults.red as f64,
            green: defaults.green as f64,
            blue: defaults.blue as f64,
            repeat: defaults.repeat as f64,
            wait_ms: defaults.wait_ms as f64,
            brightness: defaults.brightness as f64,
        }
    }
}

/// Validated snapshot of one animation request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub kind: CommandKind,
    pub color: Color,
    pub repeat: u32,
    pub wait_ms: u64,
    pub brightness: u8,
}

impl Command {
    pub fn new(kind: CommandKind) -> Self {
        Self::with_defaults(kind, &ParamDefaults::default())
    }

    pub fn with_defaults(kind: CommandKind, defaults: &ParamDefaults) -> Self {
        Self {
            kind,
            color: Color::new(defaults.red, defaults.green, defaults.blue),
            repeat: defaults.repeat,
            wait_ms: defaults.wait_ms,
            brightness: defaults.brightness,
        }
    }

    /// Build a command from raw table numbers, coercing each field into range.
    pub fn from_raw(kind: CommandKind, raw: &RawParams, defaults: &ParamDefaults) -> Self {
        Self {
            kind,
            color: Color::new(
                coerce_u8(raw.red, defaults.red),
                coerce_u8(raw.green, defaults.green),
                coerce_u8(raw.blue, defaults.blue),
            ),
            repeat: coerce_u32(raw.repeat, defaults.repeat),
            wait_ms: coerce_u64(raw.wait_ms, defaults.wait_ms),
            brightness: coerce_u8(raw.brightness, defaults.brightness),
        }
    }

    pub fn color(mut self, color: impl Into<Color>) -> Self {
        self.color = color.into();
        self
    }

    pub fn repeat(mut self, repeat: u32) -> Self {
        self.repeat = repeat;
        self
    }

    pub fn wait_ms(mut self, wait_ms: u64) -> Self {
        self.wait_ms = wait_ms;
        self
    }

    pub fn brightness(mut self, brightness: u8) -> Self {
        self.brightness = brightness;
        self
    }

    pub fn wait(&self) -> Duration {
        Duration::from_millis(self.wait_ms)
    }
}

fn coerce_u8(value: f64, default: u8) -> u8 {
    if value.is_finite() {
        value.trunc().clamp(0.0, u8::MAX as f64) as u8
    } else {
        default
    }
}

fn coerce_u32(value: f64, default: u32) -> u32 {
    if value.is_finite() {
        value.trunc().clamp(0.0, u32::MAX as f64) as u32
    } else {
        default
    }
}

fn coerce_u64(value: f64, default: u64) -> u64 {
    if value.is_finite() {
        value.trunc().clamp(0.0, u64::MAX as f64) as u64
    } else {
        default
    }
}
