// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! The `calibrate` mode: stream readings while the sensor warms up, then
//! optionally disable automatic self-calibration and write a forced
//! recalibration reference. The blinker doubles as the progress indicator:
//! a slow 0.5 Hz wave during warm-up, a fast 5 Hz wave once the reference is
//! written.

use std::{path::PathBuf, time::Duration};

use tokio::time::{Instant, sleep};
use tracing::info;

use crate::{blinker::{BlinkerHandle, LedBlinker},
            discovery,
            scd30::{Co2Sensor, Scd30}};

const WARM_UP: Duration = Duration::from_secs(120);
const WARM_UP_HZ: f64 = 0.5;
const CALIBRATED_HZ: f64 = 5.0;
const POLL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct CalibrateConfig {
    pub scd30_i2c: Option<u32>,
    /// Reference concentration to force-calibrate against; a dry run when
    /// omitted.
    pub scd30_ppm: Option<u16>,
    pub led: PathBuf,
}

pub async fn run(config: CalibrateConfig) -> miette::Result<()> {
    let bus = match config.scd30_i2c {
        Some(bus) => bus,
        None => discovery::find_scd30_bus()?,
    };
    let sensor = Scd30::open(bus)?;
    let (blinker_handle, blinker) = LedBlinker::try_open(&config.led)?;
    let _blinker_task = blinker.spawn_local();

    tokio::select! {
        result = calibrate_flow(sensor, &blinker_handle, config.scd30_ppm) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("calibration interrupted");
            Ok(())
        }
    }
}

async fn calibrate_flow(
    mut sensor: impl Co2Sensor,
    blinker: &BlinkerHandle,
    reference_ppm: Option<u16>,
) -> miette::Result<()> {
    blinker.blink_hz(WARM_UP_HZ);
    match reference_ppm {
        Some(ppm) => info!(
            "warming up for {} s, then forcing recalibration to {ppm} ppm",
            WARM_UP.as_secs()
        ),
        None => info!("dry run: streaming readings only"),
    }

    stream_readings(&mut sensor, Some(Instant::now() + WARM_UP)).await?;

    if let Some(ppm) = reference_ppm {
        sensor.set_self_calibration(false)?;
        sensor.set_forced_recalibration(ppm)?;
        info!("self-calibration disabled, reference {ppm} ppm written");
        blinker.blink_hz(CALIBRATED_HZ);
    }

    stream_readings(&mut sensor, None).await
}

/// Log every reading until the deadline (forever when `None`).
async fn stream_readings(
    sensor: &mut impl Co2Sensor,
    deadline: Option<Instant>,
) -> miette::Result<()> {
    loop {
        if let Some(deadline) = deadline
            && Instant::now() >= deadline
        {
            return Ok(());
        }
        if sensor.data_available()? {
            let co2 = sensor.co2_ppm()?;
            info!("CO₂ {co2:.0} ppm");
        }
        sleep(POLL).await;
    }
}
