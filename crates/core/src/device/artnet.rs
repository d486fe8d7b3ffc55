use std::net::{SocketAddr, UdpSocket};

use artnet_protocol::{ArtCommand, Output, PortAddress};
use serde::{Deserialize, Serialize};

use super::{DeviceError, PixelDevice};
use crate::color::Color;

/// Largest number of RGB pixels that fit in one 512 channel universe
pub const PIXELS_PER_UNIVERSE: usize = 170;

/// Channel order expected by the strip controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ByteOrder {
    Rgb,
    #[default]
    Grb,
}

impl ByteOrder {
    fn bytes(&self, color: Color) -> [u8; 3] {
        match self {
            ByteOrder::Rgb => [color.r, color.g, color.b],
            ByteOrder::Grb => [color.g, color.r, color.b],
        }
    }
}

pub struct ArtNetStrip {
    socket: UdpSocket,
    destination: SocketAddr,
    first_universe: u16,
    order: ByteOrder,
    pixels: Vec<Color>,
    brightness: u8,
}

impl ArtNetStrip {
    pub fn new(
        bind: SocketAddr,
        destination: SocketAddr,
        num_pixels: usize,
        first_universe: u16,
        order: ByteOrder,
    ) -> Result<Self, DeviceError> {
        let socket = UdpSocket::bind(bind)?;
        socket.set_broadcast(is_broadcast(&destination))?;

        log::debug!(
            "Art-Net strip of {} pixels from {} to {} starting at universe {}",
            num_pixels,
            bind,
            destination,
            first_universe
        );

        Ok(Self {
            socket,
            destination,
            first_universe,
            order,
            pixels: vec![Color::OFF; num_pixels],
            brightness: 255,
        })
    }

    /// DMX payloads for the current buffer, one per universe.
    fn universes(&self) -> Vec<(u16, Vec<u8>)> {
        self.pixels
            .chunks(PIXELS_PER_UNIVERSE)
            .enumerate()
            .map(|(n, chunk)| {
                let mut data: Vec<u8> = chunk
                    .iter()
                    .flat_map(|c| self.order.bytes(c.scaled(self.brightness)))
                    .collect();
                // ArtDmx payloads must have an even length
                if data.len() % 2 == 1 {
                    data.push(0);
                }
                (self.first_universe + n as u16, data)
            })
            .collect()
    }
}

fn is_broadcast(addr: &SocketAddr) -> bool {
    match addr {
        SocketAddr::V4(v4) => v4.ip().is_broadcast() || v4.ip().octets()[3] == 255,
        SocketAddr::V6(_) => false,
    }
}

impl PixelDevice for ArtNetStrip {
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
        for (universe, data) in self.universes() {
            let port_address = PortAddress::try_from(universe)
                .map_err(|e| DeviceError::Protocol(format!("universe {}: {:?}", universe, e)))?;
            let command = ArtCommand::Output(Output {
                port_address,
                data: data.into(),
                ..Output::default()
            });
            let bytes = command
                .write_to_buffer()
                .map_err(|e| DeviceError::Protocol(format!("{:?}", e)))?;
            self.socket.send_to(&bytes, self.destination)?;
        }
        Ok(())
    }
}
