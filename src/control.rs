// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! The CO₂ control loop: hysteresis over the smoothed reading, desire
//! published to every switch, duty-cycle bookkeeping, rate-limited status
//! logging. Between ticks the loop passively drives the tracker so the
//! network keeps healing while nothing else is happening.

use std::time::Duration;

use chrono::Utc;
use strum_macros::Display;
use tokio::time::Instant;
use tracing::info;

use crate::{averager::TimeWindowAverager, co2::SmoothedCo2, tracker::NetworkEventTracker};

/// Non-round tick keeps this loop from beating against other periodic jobs.
const TICK_SECONDS: f64 = 137.0 / 13.0;

/// Status lines are emitted at most once per wall-clock bucket, plus on every
/// fan-state change.
const LOG_BUCKET_SECONDS: i64 = 300;

const DUTY_SHORT_WINDOW: f64 = 3600.0;
const DUTY_LONG_WINDOW: f64 = 86400.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum FanState {
    Off,
    On,
}

/// Hysteresis step: reaching the limit turns the fan on, dropping to
/// `limit - diff` turns it off, and the band in between preserves state. The
/// stale-sensor sentinel (smoothed 0) therefore always lands in the off arm.
pub fn apply_hysteresis(current: FanState, smoothed_ppm: u32, limit: u32, diff: u32) -> FanState {
    if smoothed_ppm >= limit {
        FanState::On
    } else if smoothed_ppm <= limit.saturating_sub(diff) {
        FanState::Off
    } else {
        current
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ControlConfig {
    /// Smoothed ppm at which the fans turn on.
    pub co2_limit: u32,
    /// Hysteresis below the limit before the fans turn off.
    pub co2_diff: u32,
}

#[derive(Debug)]
pub struct ControlLoop {
    config: ControlConfig,
    co2: SmoothedCo2,
    fan_state: FanState,
    duty_short: TimeWindowAverager,
    duty_long: TimeWindowAverager,
    epoch: Instant,
    last_log_bucket: Option<i64>,
}

impl ControlLoop {
    pub fn new(config: ControlConfig, co2: SmoothedCo2) -> Self {
        Self {
            config,
            co2,
            fan_state: FanState::Off,
            duty_short: TimeWindowAverager::new(DUTY_SHORT_WINDOW),
            duty_long: TimeWindowAverager::new(DUTY_LONG_WINDOW),
            epoch: Instant::now(),
            last_log_bucket: None,
        }
    }

    /// Runs until cancelled. Holds the tracker for the whole run: ticks
    /// mutate it through [`NetworkEventTracker::publish_desire`], and the gap
    /// between ticks drives its queue.
    pub async fn run(mut self, tracker: &mut NetworkEventTracker) {
        loop {
            let next_tick = Instant::now() + Duration::from_secs_f64(TICK_SECONDS);
            self.tick(tracker);
            tracker.wait_until(next_tick).await;
        }
    }

    fn tick(&mut self, tracker: &NetworkEventTracker) {
        let smoothed = self.co2.smoothed_ppm();
        let next = apply_hysteresis(
            self.fan_state,
            smoothed,
            self.config.co2_limit,
            self.config.co2_diff,
        );
        let state_changed = next != self.fan_state;
        self.fan_state = next;

        tracker.publish_desire(self.fan_state == FanState::On);

        let now = self.epoch.elapsed().as_secs_f64();
        let duty = if self.fan_state == FanState::On { 1.0 } else { 0.0 };
        self.duty_short.add(now, duty);
        self.duty_long.add(now, duty);

        self.log_status(smoothed, state_changed);
    }

    fn log_status(&mut self, smoothed: u32, state_changed: bool) {
        let bucket = Utc::now().timestamp() / LOG_BUCKET_SECONDS;
        if !state_changed && self.last_log_bucket == Some(bucket) {
            return;
        }
        self.last_log_bucket = Some(bucket);
        let uptime_hours = self.epoch.elapsed().as_secs() / 3600;
        info!(
            "co2 {smoothed} ppm, fan {}, up {uptime_hours} h, duty {}% / {}%",
            self.fan_state,
            duty_percent(&self.duty_short),
            duty_percent(&self.duty_long)
        );
    }
}

/// Ceiling so any activity at all reports at least 1%.
fn duty_percent(averager: &TimeWindowAverager) -> u32 {
    (averager.average() * 100.0).ceil() as u32
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    use super::{FanState, apply_hysteresis, duty_percent};
    use crate::averager::TimeWindowAverager;

    #[test_case(FanState::Off, 899, FanState::Off; "just under the limit stays off")]
    #[test_case(FanState::Off, 900, FanState::On; "reaching the limit turns on")]
    #[test_case(FanState::Off, 905, FanState::On; "over the limit turns on")]
    #[test_case(FanState::Off, 875, FanState::Off; "dead band preserves off")]
    #[test_case(FanState::On, 875, FanState::On; "dead band preserves on")]
    #[test_case(FanState::On, 851, FanState::On; "just above the floor stays on")]
    #[test_case(FanState::On, 850, FanState::Off; "reaching the floor turns off")]
    #[test_case(FanState::On, 0, FanState::Off; "stale sentinel forces off")]
    #[test_case(FanState::Off, 0, FanState::Off; "stale sentinel keeps off")]
    fn hysteresis(current: FanState, smoothed: u32, expected: FanState) {
        assert_eq!(apply_hysteresis(current, smoothed, 900, 50), expected);
    }

    #[test]
    fn hysteresis_with_diff_larger_than_limit_saturates() {
        assert_eq!(
            apply_hysteresis(FanState::On, 5, 100, 500),
            FanState::Off
        );
    }

    #[test]
    fn duty_percent_rounds_up_so_activity_shows() {
        let mut averager = TimeWindowAverager::new(3600.0);
        for i in 0..1000 {
            averager.add(f64::from(i), if i == 0 { 1.0 } else { 0.0 });
        }
        assert_eq!(duty_percent(&averager), 1);
    }

    #[test]
    fn duty_percent_of_empty_is_zero() {
        let averager = TimeWindowAverager::new(3600.0);
        assert_eq!(duty_percent(&averager), 0);
    }

    #[test]
    fn fan_state_names_are_log_friendly() {
        assert_eq!(FanState::On.to_string(), "On");
        assert_eq!(FanState::Off.to_string(), "Off");
    }
}
