// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! # exhale
//!
//! Unattended CO₂ controller. An SCD30 sensor is sampled and smoothed over a
//! sliding minute; the smoothed concentration drives exhaust fans through
//! Z-Wave binary switches with a hysteresis band; a status LED blinks the
//! reading in hundreds of ppm. Humans may flip any switch at the wall: the
//! per-switch state machine detects that, yields control for a bounded manual
//! override, and resumes automatically.
//!
//! The interesting parts:
//!
//! - [`switch`] — the per-switch concurrent control state machine
//!   (announcement pulse, debounced commands, manual-override detection).
//! - [`tracker`] — the event-driven network tracker feeding those machines
//!   from the wireless stack's notification stream.
//! - [`averager`] — the time-windowed mean shared by CO₂ smoothing and
//!   duty-cycle reporting.
//! - [`blinker`] — the LED driver whose pattern encodes a number.
//!
//! Everything runs on one `current_thread` tokio runtime inside a
//! [`tokio::task::LocalSet`]; the only cross-thread boundary is the bridge
//! posting notifications into the tracker's queue.

pub mod averager;
pub mod blinker;
pub mod calibrate;
pub mod co2;
pub mod control;
pub mod daemon;
pub mod discovery;
pub mod fs_path;
pub mod provision;
pub mod scd30;
pub mod switch;
pub mod tracker;
pub mod zwave;

pub use averager::TimeWindowAverager;
pub use blinker::{BlinkerHandle, LedBlinker};
pub use co2::{Co2Sampler, SmoothedCo2};
pub use control::{ControlConfig, ControlLoop, FanState};
pub use scd30::{Co2Sensor, Scd30};
pub use switch::{SwitchController, SwitchEvent};
pub use tracker::NetworkEventTracker;
