// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Event-driven wireless-network tracker.
//!
//! The tracker owns two things exclusively: the queue of normalized
//! notifications posted by the bridge, and the map of known switches. It
//! never reads controller state; its only interaction with a controller is
//! enqueueing [`SwitchEvent`]s into that controller's mailbox.
//!
//! Consumption is pull-driven: whichever flow currently holds the tracker
//! (startup waits, the control loop's between-tick [`wait_until`], the
//! provisioning handshakes) drains the queue, and every notification passes
//! through the consumption rules before it can satisfy an explicit wait. That
//! keeps the switch map healing — driver drops, node replacements, late
//! inclusions — no matter which wait is active.
//!
//! [`wait_until`]: NetworkEventTracker::wait_until

use std::{collections::HashMap, time::Duration};

use tokio::{sync::mpsc,
            task::JoinHandle,
            time::{Instant, sleep_until, timeout_at}};
use tracing::{debug, info, warn};

use crate::{switch::{MAILBOX_CAPACITY, SetValue, SwitchController, SwitchEvent},
            zwave::{NOTIFICATION_CODE_ALIVE, Notification, NotificationType, ValueId}};

/// Default timeout for explicit waits.
pub const DEFAULT_WAIT: Duration = Duration::from_secs(60);

/// Hard cap on waiting for a new switch during provisioning.
pub const SWITCH_ADDED_WAIT: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum WaitError {
    #[error("timed out after {timeout:?} waiting for {what}")]
    #[diagnostic(
        code(exhale::tracker::timeout),
        help("check that the wireless controller is attached and the bridge is running")
    )]
    TimedOut { what: String, timeout: Duration },

    #[error("notification queue closed while waiting for {what}")]
    #[diagnostic(code(exhale::tracker::queue_closed))]
    QueueClosed { what: String },
}

/// Tracker-side record of one switch: identity, mailbox, controller task.
#[derive(Debug)]
struct Switch {
    node_id: u8,
    switch_id: u64,
    mailbox: mpsc::Sender<SwitchEvent>,
    controller: JoinHandle<()>,
}

impl Switch {
    /// Non-blocking enqueue; the tracker must never await on a mailbox.
    fn inject(&self, event: SwitchEvent) {
        match self.mailbox.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!(node = self.node_id, ?event, "mailbox full, dropping event");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(node = self.node_id, "mailbox closed");
            }
        }
    }
}

pub struct NetworkEventTracker {
    notifications: mpsc::UnboundedReceiver<Notification>,
    switches: HashMap<u8, Switch>,
    home_id: Option<u32>,
    nodes_queried: bool,
    set_value: SetValue,
    manual: Duration,
}

impl std::fmt::Debug for NetworkEventTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkEventTracker")
            .field("home_id", &self.home_id)
            .field("nodes_queried", &self.nodes_queried)
            .field("switches", &self.switches)
            .finish_non_exhaustive()
    }
}

impl NetworkEventTracker {
    pub fn new(
        notifications: mpsc::UnboundedReceiver<Notification>,
        set_value: SetValue,
        manual: Duration,
    ) -> Self {
        Self {
            notifications,
            switches: HashMap::new(),
            home_id: None,
            nodes_queried: false,
            set_value,
            manual,
        }
    }

    pub fn home_id(&self) -> Option<u32> {
        self.home_id
    }

    pub fn switch_count(&self) -> usize {
        self.switches.len()
    }

    /// Startup synchronization: driver ready, then the initial node query.
    ///
    /// # Panics
    ///
    /// Panics if a home id is already latched; waiting for a driver that is
    /// already up is a programmer error.
    pub async fn wait_for_nodes(&mut self) -> Result<(), WaitError> {
        assert!(
            self.home_id.is_none(),
            "wait_for_nodes requires no latched home id"
        );
        self.match_notification("DriverReady", DEFAULT_WAIT, |notification| {
            (notification.notification_type == NotificationType::DriverReady).then_some(())
        })
        .await?;
        self.match_notification("node query completion", DEFAULT_WAIT, |notification| {
            matches!(
                notification.notification_type,
                NotificationType::AllNodesQueried
                    | NotificationType::AllNodesQueriedSomeDead
                    | NotificationType::AwakeNodesQueried
            )
            .then_some(())
        })
        .await?;
        info!("Active switch count: {}", self.switches.len());
        Ok(())
    }

    pub async fn wait_for_driver_removed(&mut self) -> Result<(), WaitError> {
        self.match_notification("DriverRemoved", DEFAULT_WAIT, |notification| {
            (notification.notification_type == NotificationType::DriverRemoved).then_some(())
        })
        .await
    }

    pub async fn wait_for_controller_state(&mut self, state: &str) -> Result<(), WaitError> {
        self.match_notification(
            format!("controller state {state:?}"),
            DEFAULT_WAIT,
            |notification| {
                (notification.notification_type == NotificationType::ControllerCommand
                    && notification.controller_state.as_deref() == Some(state))
                .then_some(())
            },
        )
        .await
    }

    /// Wait for a binary switch to appear (inclusion); returns its value id.
    pub async fn wait_for_switch_added(&mut self) -> Result<u64, WaitError> {
        self.match_notification("a new binary switch", SWITCH_ADDED_WAIT, |notification| {
            if notification.notification_type != NotificationType::ValueAdded {
                return None;
            }
            notification.binary_switch().map(|value| value.id)
        })
        .await
    }

    /// Passively drain the queue until the deadline; consumption rules keep
    /// firing, nothing is matched.
    pub async fn wait_until(&mut self, deadline: Instant) {
        loop {
            match timeout_at(deadline, self.notifications.recv()).await {
                Ok(Some(notification)) => self.consume(&notification),
                Ok(None) => {
                    // Queue closed (bridge gone): nothing left to consume,
                    // just sleep out the remainder of the tick.
                    sleep_until(deadline).await;
                    return;
                }
                Err(_elapsed) => return,
            }
        }
    }

    /// The control loop's enqueue path: fan desire to every switch.
    pub fn publish_desire(&self, on: bool) {
        for switch in self.switches.values() {
            switch.inject(SwitchEvent::desire(on));
        }
    }

    /// Cancel every controller task (process shutdown).
    pub fn shutdown(&mut self) {
        for (_, switch) in self.switches.drain() {
            switch.controller.abort();
        }
    }

    async fn match_notification<T>(
        &mut self,
        what: impl Into<String>,
        timeout: Duration,
        mut extract: impl FnMut(&Notification) -> Option<T>,
    ) -> Result<T, WaitError> {
        let what = what.into();
        info!("waiting for {what}");
        let deadline = Instant::now() + timeout;
        loop {
            let notification = match timeout_at(deadline, self.notifications.recv()).await {
                Ok(Some(notification)) => notification,
                Ok(None) => return Err(WaitError::QueueClosed { what }),
                Err(_elapsed) => return Err(WaitError::TimedOut { what, timeout }),
            };
            self.consume(&notification);
            if let Some(matched) = extract(&notification) {
                return Ok(matched);
            }
        }
    }

    /// Apply the consumption rules. Every notification goes through here
    /// exactly once, before any wait can match it.
    fn consume(&mut self, notification: &Notification) {
        debug!("notification: {notification:?}");
        match notification.notification_type {
            NotificationType::ValueAdded => {
                if let Some(value) = notification.binary_switch() {
                    match notification.node_id {
                        Some(node_id) => self.add_switch(node_id, value.id),
                        None => warn!("ValueAdded without a node id"),
                    }
                }
            }
            NotificationType::ValueChanged => {
                if let Some(value) = notification.binary_switch() {
                    self.value_changed(notification.node_id, value);
                }
            }
            NotificationType::Notification => {
                if notification.notification_code == Some(NOTIFICATION_CODE_ALIVE) {
                    self.node_alive(notification.node_id);
                }
            }
            NotificationType::DriverReady => {
                self.home_id = notification.home_id;
                match self.home_id {
                    Some(home_id) => info!("driver ready, home id {home_id:#x}"),
                    None => warn!("DriverReady without a home id"),
                }
            }
            NotificationType::DriverRemoved => self.driver_removed(),
            NotificationType::AllNodesQueried
            | NotificationType::AllNodesQueriedSomeDead
            | NotificationType::AwakeNodesQueried => self.queries_complete(),
            NotificationType::ControllerCommand | NotificationType::Other => {}
        }
    }

    /// A switch is born. A second `ValueAdded` for the same node replaces the
    /// controller outright, so at most one controller per node is ever live.
    fn add_switch(&mut self, node_id: u8, switch_id: u64) {
        if let Some(old) = self.switches.remove(&node_id) {
            warn!(node = node_id, "node re-added, replacing its controller");
            old.controller.abort();
        }
        info!(node = node_id, switch = switch_id, "adding switch");
        let (mailbox, receiver) = mpsc::channel(MAILBOX_CAPACITY);
        let controller = SwitchController::new(
            node_id,
            switch_id,
            receiver,
            self.set_value.clone(),
            self.manual,
        );
        self.switches.insert(
            node_id,
            Switch {
                node_id,
                switch_id,
                mailbox,
                controller: tokio::task::spawn_local(controller.run()),
            },
        );
    }

    fn value_changed(&self, node_id: Option<u8>, value: &ValueId) {
        let switch = node_id.and_then(|node_id| self.switches.get(&node_id));
        match switch {
            Some(switch) if switch.switch_id == value.id => match value.value.as_bool() {
                Some(on) => switch.inject(SwitchEvent::observed(on)),
                None => warn!(switch = value.id, "non-boolean switch value"),
            },
            _ => warn!(?node_id, value = value.id, "unknown switch"),
        }
    }

    fn node_alive(&self, node_id: Option<u8>) {
        if !self.nodes_queried {
            return;
        }
        if let Some(switch) = node_id.and_then(|node_id| self.switches.get(&node_id)) {
            info!(node = switch.node_id, "node alive");
            switch.inject(SwitchEvent::Alive);
        }
    }

    fn driver_removed(&mut self) {
        info!("driver removed, destroying all switches");
        self.home_id = None;
        self.nodes_queried = false;
        self.shutdown();
    }

    fn queries_complete(&mut self) {
        if self.home_id.is_none() {
            warn!("node query completed without a driver");
            return;
        }
        self.nodes_queried = true;
        for switch in self.switches.values() {
            switch.inject(SwitchEvent::Alive);
        }
    }
}
