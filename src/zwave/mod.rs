// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! The wireless-stack boundary: the normalized notification model, the
//! [`Manager`] capability the rest of the crate is injected with, and the
//! production [`bridge`] that keeps the native stack in a helper process.

pub mod bridge;
pub mod manager;
pub mod model;

#[cfg(test)]
pub mod fake;

pub use bridge::BridgeManager;
pub use manager::Manager;
pub use model::{COMMAND_CLASS_SWITCH_BINARY,
                NOTIFICATION_CODE_ALIVE,
                Notification,
                NotificationType,
                ValueId};
