// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! The process-wide wireless-stack operations, expressed as an injected
//! capability rather than a singleton so tests can substitute an in-memory
//! fake.
//!
//! Every operation is fire-and-forget: the stack acknowledges through the
//! asynchronous notification stream, never through a return value. Outcomes
//! (driver ready, value changed, command state) arrive at the tracker.

pub trait Manager {
    fn add_driver(&self, device: &str);

    fn remove_driver(&self, device: &str);

    /// Factory-reset the controller identified by `home_id`. The stack
    /// answers with `DriverRemoved` followed by a fresh `DriverReady`.
    fn reset_controller(&self, home_id: u32);

    /// Put the controller into inclusion mode. `secure` selects Z-Wave
    /// security bootstrapping; the switches handled here don't use it.
    fn add_node(&self, home_id: u32, secure: bool);

    /// Command a binary switch. Confirmation comes back, eventually, as one
    /// or more `ValueChanged` notifications.
    fn set_value(&self, switch_id: u64, on: bool);

    fn set_poll_interval(&self, interval_ms: u32, interval_between_polls: bool);

    fn enable_poll(&self, switch_id: u64);

    fn destroy(&self);
}
