// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! The `reset` mode: factory-reset the wireless controller, then induct new
//! binary switches one at a time with the operator at the wall plate.

use std::{path::PathBuf, rc::Rc, time::Duration};

use miette::IntoDiagnostic;
use tokio::{io::{AsyncBufReadExt, BufReader},
            sync::mpsc};
use tracing::info;

use crate::{discovery,
            fs_path,
            switch::SetValue,
            tracker::NetworkEventTracker,
            zwave::{BridgeManager, Manager}};

const PAIRING_TIPS: &str = "
Tips for the UltraPro Z-Wave toggle switch:

  Factory reset (before joining):
    Quickly press up up up down down down.

  Join the network:
    Press up.
";

#[derive(Debug, Clone)]
pub struct ResetConfig {
    pub zdevice: Option<PathBuf>,
    /// How many switches to induct after the reset.
    pub switches: u32,
    pub bridge: String,
}

pub async fn run(config: ResetConfig) -> miette::Result<()> {
    let device = match &config.zdevice {
        Some(device) => device.clone(),
        None => discovery::find_zwave_device()?,
    };
    let user_path = fs_path::try_create_user_path()?;

    let (notifications, queue) = mpsc::unbounded_channel();
    let manager = Rc::new(BridgeManager::try_spawn(
        &config.bridge,
        &user_path,
        notifications,
    )?);
    // Controllers born during provisioning command through the same manager;
    // the ack below is what actually matters here.
    let set_value: SetValue = {
        let manager = manager.clone();
        Rc::new(move |switch_id, on| manager.set_value(switch_id, on))
    };
    let mut tracker = NetworkEventTracker::new(queue, set_value, Duration::from_secs(3600));

    manager.add_driver(&device.to_string_lossy());
    tracker.wait_for_nodes().await?;

    let home_id = tracker
        .home_id()
        .ok_or_else(|| miette::miette!("driver ready without a home id"))?;
    info!("factory-resetting controller {home_id:#x}");
    manager.reset_controller(home_id);
    tracker.wait_for_driver_removed().await?;
    tracker.wait_for_nodes().await?;
    let home_id = tracker
        .home_id()
        .ok_or_else(|| miette::miette!("driver ready without a home id"))?;

    let mut operator = BufReader::new(tokio::io::stdin()).lines();
    for number in 1..=config.switches {
        println!("Press Enter to include switch {number} of {}.", config.switches);
        operator.next_line().await.into_diagnostic()?;

        manager.add_node(home_id, false);
        tracker.wait_for_controller_state("Waiting").await?;
        println!("{PAIRING_TIPS}");

        let switch_id = tracker.wait_for_switch_added().await?;
        tracker.wait_for_controller_state("Completed").await?;
        // Acknowledge the induction by commanding the new switch off.
        manager.set_value(switch_id, false);
        info!(switch = switch_id, "switch {number} included");
    }

    tracker.shutdown();
    manager.destroy();
    info!("Everything seems fine!");
    Ok(())
}
