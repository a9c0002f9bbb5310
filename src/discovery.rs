// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Device auto-discovery for the `run` daemon: the Z-Wave serial stick and
//! the SCD30's I²C bus, so a stock install needs no flags at all.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::scd30::Scd30;

/// Known device locations, most specific first. The `usb-0658_0200` prefix is
/// the Sigma Designs vendor/product id the common Z-Wave sticks enumerate as.
const ZWAVE_DEVICE_PATTERNS: &[(&str, &str)] = &[
    ("/dev/serial/by-id", "usb-0658_0200"),
    ("/dev", "ttyACM"),
    ("/dev", "ttyUSB"),
];

const I2C_BUS_RANGE: std::ops::RangeInclusive<u32> = 0..=9;

#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum DiscoveryError {
    #[error("no Z-Wave serial device found")]
    #[diagnostic(
        code(exhale::discovery::zdevice),
        help("pass --zdevice explicitly, e.g. --zdevice /dev/ttyACM0")
    )]
    NoZwaveDevice,

    #[error("no SCD30 found on /dev/i2c-0 through /dev/i2c-9")]
    #[diagnostic(
        code(exhale::discovery::sensor),
        help("pass --scd30_i2c explicitly; check the wiring and that i2c-dev is loaded")
    )]
    NoSensorBus,
}

pub fn find_zwave_device() -> Result<PathBuf, DiscoveryError> {
    for &(directory, prefix) in ZWAVE_DEVICE_PATTERNS {
        let Ok(entries) = std::fs::read_dir(directory) else {
            continue;
        };
        let mut matches: Vec<PathBuf> = entries
            .flatten()
            .filter(|entry| entry.file_name().to_string_lossy().starts_with(prefix))
            .map(|entry| entry.path())
            .collect();
        matches.sort();
        if let Some(found) = matches.into_iter().next() {
            info!("discovered Z-Wave device {}", found.display());
            return Ok(found);
        }
    }
    Err(DiscoveryError::NoZwaveDevice)
}

/// Probe each bus by asking for the SCD30 firmware version; the first bus
/// that answers wins.
pub fn find_scd30_bus() -> Result<u32, DiscoveryError> {
    for bus in I2C_BUS_RANGE {
        if !Path::new(&format!("/dev/i2c-{bus}")).exists() {
            continue;
        }
        match Scd30::open(bus).and_then(|mut sensor| sensor.firmware_version()) {
            Ok((major, minor)) => {
                info!("discovered SCD30 on /dev/i2c-{bus} (firmware {major}.{minor})");
                return Ok(bus);
            }
            Err(error) => debug!("no SCD30 on /dev/i2c-{bus}: {error}"),
        }
    }
    Err(DiscoveryError::NoSensorBus)
}
