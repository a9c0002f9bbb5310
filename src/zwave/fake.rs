// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! In-memory stand-in for the wireless stack: records every manager call and
//! lets tests inject notifications directly into the tracker's queue.

use std::{cell::RefCell, rc::Rc};

use tokio::sync::mpsc;

use super::{Manager, model::Notification};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FakeCall {
    AddDriver(String),
    RemoveDriver(String),
    ResetController(u32),
    AddNode(u32, bool),
    SetValue(u64, bool),
    SetPollInterval(u32, bool),
    EnablePoll(u64),
    Destroy,
}

#[derive(Debug, Clone)]
pub struct FakeManager {
    pub calls: Rc<RefCell<Vec<FakeCall>>>,
    notifications: mpsc::UnboundedSender<Notification>,
}

impl FakeManager {
    pub fn new(notifications: mpsc::UnboundedSender<Notification>) -> Self {
        Self {
            calls: Rc::new(RefCell::new(Vec::new())),
            notifications,
        }
    }

    /// Inject a notification as if the stack's worker thread delivered it.
    pub fn notify(&self, notification: Notification) {
        self.notifications
            .send(notification)
            .expect("tracker queue open");
    }

    pub fn set_value_calls(&self) -> Vec<(u64, bool)> {
        self.calls
            .borrow()
            .iter()
            .filter_map(|call| match call {
                FakeCall::SetValue(switch_id, on) => Some((*switch_id, *on)),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: FakeCall) {
        self.calls.borrow_mut().push(call);
    }
}

impl Manager for FakeManager {
    fn add_driver(&self, device: &str) {
        self.record(FakeCall::AddDriver(device.into()));
    }

    fn remove_driver(&self, device: &str) {
        self.record(FakeCall::RemoveDriver(device.into()));
    }

    fn reset_controller(&self, home_id: u32) {
        self.record(FakeCall::ResetController(home_id));
    }

    fn add_node(&self, home_id: u32, secure: bool) {
        self.record(FakeCall::AddNode(home_id, secure));
    }

    fn set_value(&self, switch_id: u64, on: bool) {
        self.record(FakeCall::SetValue(switch_id, on));
    }

    fn set_poll_interval(&self, interval_ms: u32, interval_between_polls: bool) {
        self.record(FakeCall::SetPollInterval(interval_ms, interval_between_polls));
    }

    fn enable_poll(&self, switch_id: u64) {
        self.record(FakeCall::EnablePoll(switch_id));
    }

    fn destroy(&self) {
        self.record(FakeCall::Destroy);
    }
}
