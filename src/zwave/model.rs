// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Normalized wireless notifications, exactly as the stack's watcher callback
//! surfaces them. Field names are the wire names; only the fields the tracker
//! consumes are modeled, everything else deserializes into the defaults.

use serde::{Deserialize, Serialize};

pub const COMMAND_CLASS_SWITCH_BINARY: &str = "COMMAND_CLASS_SWITCH_BINARY";

/// Notification code meaning "a previously silent node has responded".
pub const NOTIFICATION_CODE_ALIVE: u8 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum NotificationType {
    DriverReady,
    DriverRemoved,
    ValueAdded,
    ValueChanged,
    Notification,
    ControllerCommand,
    AllNodesQueried,
    AllNodesQueriedSomeDead,
    AwakeNodesQueried,
    /// Anything the tracker has no rule for.
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub notification_type: NotificationType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub home_id: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<u8>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification_code: Option<u8>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller_state: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_id: Option<ValueId>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueId {
    pub id: u64,
    pub command_class: String,
    pub index: u32,
    #[serde(default)]
    pub value: serde_json::Value,
}

impl Notification {
    /// The value iff this is a binary-switch notification (the switch command
    /// class at index 0).
    pub fn binary_switch(&self) -> Option<&ValueId> {
        self.value_id
            .as_ref()
            .filter(|value| value.command_class == COMMAND_CLASS_SWITCH_BINARY && value.index == 0)
    }
}

/// Shorthand constructors for tests; production notifications only ever come
/// off the wire.
#[cfg(test)]
impl Notification {
    pub fn of_type(notification_type: NotificationType) -> Self {
        Self {
            notification_type,
            home_id: None,
            node_id: None,
            notification_code: None,
            controller_state: None,
            value_id: None,
        }
    }

    pub fn driver_ready(home_id: u32) -> Self {
        Self {
            home_id: Some(home_id),
            ..Self::of_type(NotificationType::DriverReady)
        }
    }

    pub fn value_added(node_id: u8, switch_id: u64) -> Self {
        Self {
            node_id: Some(node_id),
            value_id: Some(ValueId {
                id: switch_id,
                command_class: COMMAND_CLASS_SWITCH_BINARY.into(),
                index: 0,
                value: serde_json::Value::Bool(false),
            }),
            ..Self::of_type(NotificationType::ValueAdded)
        }
    }

    pub fn value_changed(node_id: u8, switch_id: u64, on: bool) -> Self {
        Self {
            node_id: Some(node_id),
            value_id: Some(ValueId {
                id: switch_id,
                command_class: COMMAND_CLASS_SWITCH_BINARY.into(),
                index: 0,
                value: serde_json::Value::Bool(on),
            }),
            ..Self::of_type(NotificationType::ValueChanged)
        }
    }

    pub fn node_alive(node_id: u8) -> Self {
        Self {
            node_id: Some(node_id),
            notification_code: Some(NOTIFICATION_CODE_ALIVE),
            ..Self::of_type(NotificationType::Notification)
        }
    }

    pub fn controller_command(state: &str) -> Self {
        Self {
            controller_state: Some(state.into()),
            ..Self::of_type(NotificationType::ControllerCommand)
        }
    }
}
