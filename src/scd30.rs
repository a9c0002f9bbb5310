// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! SCD30 CO₂ sensor: the [`Co2Sensor`] contract the sampler and calibration
//! flows are written against, and [`Scd30`], the Linux `i2c-dev` driver.
//!
//! The wire format is the Sensirion word-plus-CRC framing: 16-bit big-endian
//! command, optional 16-bit argument with a trailing CRC-8 byte, and responses
//! as 16-bit words each followed by their own CRC-8 (polynomial 0x31,
//! initialization 0xFF).

use std::{fs::File,
          io::{Read, Write},
          os::fd::AsRawFd,
          thread,
          time::Duration};

/// I2C_SLAVE from `linux/i2c-dev.h`.
nix::ioctl_write_int_bad!(i2c_set_slave_address, 0x0703);

/// Fixed I²C address of the SCD30.
pub const SCD30_ADDRESS: u16 = 0x61;

mod command {
    /// Trigger continuous measurement; argument is ambient pressure in mbar
    /// (0 disables pressure compensation).
    pub const START_CONTINUOUS: u16 = 0x0010;
    pub const DATA_READY: u16 = 0x0202;
    pub const READ_MEASUREMENT: u16 = 0x0300;
    pub const SELF_CALIBRATION: u16 = 0x5306;
    pub const FORCED_RECALIBRATION: u16 = 0x5204;
    pub const FIRMWARE_VERSION: u16 = 0xD100;
}

#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum SensorError {
    #[error("sensor bus I/O failed")]
    #[diagnostic(
        code(exhale::scd30::io),
        help("check the I²C wiring and that the i2c-dev module is loaded")
    )]
    Io(#[from] std::io::Error),

    #[error("sensor response failed its CRC check")]
    #[diagnostic(code(exhale::scd30::crc))]
    Crc,
}

/// The sensor contract. The production implementation is [`Scd30`]; tests
/// substitute a scripted fake.
pub trait Co2Sensor: std::fmt::Debug {
    fn data_available(&mut self) -> Result<bool, SensorError>;

    /// Read one measurement. The concentration may be non-finite on a sensor
    /// glitch; the caller filters.
    fn co2_ppm(&mut self) -> Result<f64, SensorError>;

    fn set_self_calibration(&mut self, enabled: bool) -> Result<(), SensorError>;

    fn set_forced_recalibration(&mut self, ppm: u16) -> Result<(), SensorError>;
}

#[derive(Debug)]
pub struct Scd30 {
    bus: File,
}

impl Scd30 {
    /// Open `/dev/i2c-<bus_index>`, claim the SCD30 address, and start
    /// continuous measurement.
    pub fn open(bus_index: u32) -> Result<Self, SensorError> {
        let bus = File::options()
            .read(true)
            .write(true)
            .open(format!("/dev/i2c-{bus_index}"))?;
        // SAFETY: freshly opened i2c-dev character device; the ioctl only
        // stores the slave address in the fd's client state.
        unsafe { i2c_set_slave_address(bus.as_raw_fd(), i32::from(SCD30_ADDRESS)) }
            .map_err(std::io::Error::from)?;
        let mut sensor = Self { bus };
        sensor.write_command(command::START_CONTINUOUS, Some(0))?;
        Ok(sensor)
    }

    /// Read the (major, minor) firmware version. Discovery uses this as the
    /// "is there really an SCD30 on this bus" probe.
    pub fn firmware_version(&mut self) -> Result<(u8, u8), SensorError> {
        let [word] = self.read_words::<1>(command::FIRMWARE_VERSION)?;
        Ok(((word >> 8) as u8, word as u8))
    }

    fn write_command(&mut self, command: u16, argument: Option<u16>) -> Result<(), SensorError> {
        let mut frame = [0u8; 5];
        frame[0..2].copy_from_slice(&command.to_be_bytes());
        let length = match argument {
            Some(argument) => {
                frame[2..4].copy_from_slice(&argument.to_be_bytes());
                frame[4] = crc8(&frame[2..4]);
                5
            }
            None => 2,
        };
        self.bus.write_all(&frame[..length])?;
        // The sensor needs a short pause before it answers the next transfer.
        thread::sleep(Duration::from_millis(5));
        Ok(())
    }

    fn read_words<const N: usize>(&mut self, command: u16) -> Result<[u16; N], SensorError> {
        self.write_command(command, None)?;
        let mut raw = [0u8; 3 * 6];
        let raw = &mut raw[..3 * N];
        self.bus.read_exact(raw)?;
        let mut words = [0u16; N];
        for (word, chunk) in words.iter_mut().zip(raw.chunks_exact(3)) {
            if crc8(&chunk[0..2]) != chunk[2] {
                return Err(SensorError::Crc);
            }
            *word = u16::from_be_bytes([chunk[0], chunk[1]]);
        }
        Ok(words)
    }
}

impl Co2Sensor for Scd30 {
    fn data_available(&mut self) -> Result<bool, SensorError> {
        let [ready] = self.read_words::<1>(command::DATA_READY)?;
        Ok(ready == 1)
    }

    fn co2_ppm(&mut self) -> Result<f64, SensorError> {
        // CO₂, temperature, humidity: three big-endian f32, two words each.
        // Only the CO₂ concentration is used.
        let words = self.read_words::<6>(command::READ_MEASUREMENT)?;
        let co2 = f32::from_bits((u32::from(words[0]) << 16) | u32::from(words[1]));
        Ok(f64::from(co2))
    }

    fn set_self_calibration(&mut self, enabled: bool) -> Result<(), SensorError> {
        self.write_command(command::SELF_CALIBRATION, Some(u16::from(enabled)))
    }

    fn set_forced_recalibration(&mut self, ppm: u16) -> Result<(), SensorError> {
        self.write_command(command::FORCED_RECALIBRATION, Some(ppm))
    }
}

/// Sensirion CRC-8: polynomial 0x31, initialization 0xFF, over 16-bit words.
fn crc8(data: &[u8]) -> u8 {
    let mut crc: u8 = 0xFF;
    for &byte in data {
        crc ^= byte;
        for _ in 0..8 {
            crc = if crc & 0x80 != 0 {
                (crc << 1) ^ 0x31
            } else {
                crc << 1
            };
        }
    }
    crc
}
