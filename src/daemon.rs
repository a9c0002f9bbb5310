// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! The `run` mode: wire the bridge, tracker, sensor, blinker, and control
//! loop together on the single-threaded executor and run until ctrl-c.

use std::{path::PathBuf, rc::Rc, time::Duration};

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::{blinker::LedBlinker,
            co2::Co2Sampler,
            control::{ControlConfig, ControlLoop},
            discovery,
            fs_path,
            scd30::Scd30,
            switch::SetValue,
            tracker::NetworkEventTracker,
            zwave::{BridgeManager, Manager}};

#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Serial device of the Z-Wave controller; auto-discovered when omitted.
    pub zdevice: Option<PathBuf>,
    /// I²C bus index of the SCD30; auto-discovered when omitted.
    pub scd30_i2c: Option<u32>,
    pub co2_limit: u32,
    pub co2_diff: u32,
    pub manual_secs: u64,
    pub led: PathBuf,
    pub bridge: String,
}

pub async fn run(config: RunConfig) -> miette::Result<()> {
    let device = match &config.zdevice {
        Some(device) => device.clone(),
        None => discovery::find_zwave_device()?,
    };
    let bus = match config.scd30_i2c {
        Some(bus) => bus,
        None => discovery::find_scd30_bus()?,
    };
    let user_path = fs_path::try_create_user_path()?;

    let (notifications, queue) = mpsc::unbounded_channel();
    let manager = Rc::new(BridgeManager::try_spawn(
        &config.bridge,
        &user_path,
        notifications,
    )?);
    let set_value: SetValue = {
        let manager = manager.clone();
        Rc::new(move |switch_id, on| manager.set_value(switch_id, on))
    };
    let mut tracker = NetworkEventTracker::new(
        queue,
        set_value,
        Duration::from_secs(config.manual_secs),
    );

    manager.add_driver(&device.to_string_lossy());
    tracker.wait_for_nodes().await?;

    let sensor = Scd30::open(bus)?;
    let (blinker_handle, blinker) = LedBlinker::try_open(&config.led)?;
    let sampler = Co2Sampler::new(Box::new(sensor), blinker_handle);
    let co2 = sampler.reading();
    let blinker_task = blinker.spawn_local();
    let sampler_task = sampler.spawn_local();

    let control = ControlLoop::new(
        ControlConfig {
            co2_limit: config.co2_limit,
            co2_diff: config.co2_diff,
        },
        co2,
    );
    tokio::select! {
        () = control.run(&mut tracker) => {}
        result = tokio::signal::ctrl_c() => {
            if let Err(error) = result {
                warn!("ctrl-c handler failed: {error}");
            }
            info!("shutting down");
        }
    }

    // Teardown order: sampler, blinker, then the controller tasks.
    sampler_task.abort();
    blinker_task.abort();
    tracker.shutdown();
    manager.destroy();
    Ok(())
}
