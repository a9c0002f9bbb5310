// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! CO₂ sampling: polls the sensor, smooths readings over a 60-second window,
//! and publishes the clamped average as a blink count.
//!
//! The smoothed value is shared with the control loop through the cheap
//! [`SmoothedCo2`] read handle. Staleness is encoded as the `0` sentinel: when
//! no sample has landed inside the window, [`SmoothedCo2::smoothed_ppm`]
//! returns 0 and the control loop reads that as "no data, force fan off".

use std::{cell::RefCell, rc::Rc, time::Duration};

use tokio::{task::JoinHandle,
            time::{Instant, sleep}};
use tracing::{debug, warn};

use crate::{averager::TimeWindowAverager,
            blinker::BlinkerHandle,
            scd30::{Co2Sensor, SensorError}};

const CO2_WINDOW_SECONDS: f64 = 60.0;
/// Idle poll cadence while the sensor has no data ready.
const POLL_IDLE: Duration = Duration::from_millis(500);
const RESTART_AFTER_ERROR: Duration = Duration::from_secs(1);

pub const SMOOTHED_MIN_PPM: u32 = 100;
pub const SMOOTHED_MAX_PPM: u32 = 2000;

/// Read handle over the shared 60-second averager. Clone freely; everything
/// lives on the single-threaded executor.
#[derive(Debug, Clone)]
pub struct SmoothedCo2 {
    epoch: Instant,
    averager: Rc<RefCell<TimeWindowAverager>>,
}

impl SmoothedCo2 {
    fn new() -> Self {
        Self {
            epoch: Instant::now(),
            averager: Rc::new(RefCell::new(TimeWindowAverager::new(CO2_WINDOW_SECONDS))),
        }
    }

    fn now(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    /// Integer mean over the last 60 s clamped to
    /// [[`SMOOTHED_MIN_PPM`], [`SMOOTHED_MAX_PPM`]], or the 0 sentinel when no
    /// sample is fresh.
    pub fn smoothed_ppm(&self) -> u32 {
        let averager = self.averager.borrow();
        if !averager.is_fresh(self.now()) {
            return 0;
        }
        (averager.average() as u32).clamp(SMOOTHED_MIN_PPM, SMOOTHED_MAX_PPM)
    }
}

#[derive(Debug)]
pub struct Co2Sampler {
    sensor: Box<dyn Co2Sensor>,
    blinker: BlinkerHandle,
    shared: SmoothedCo2,
}

impl Co2Sampler {
    pub fn new(sensor: Box<dyn Co2Sensor>, blinker: BlinkerHandle) -> Self {
        Self {
            sensor,
            blinker,
            shared: SmoothedCo2::new(),
        }
    }

    /// The read handle the control loop polls.
    pub fn reading(&self) -> SmoothedCo2 {
        self.shared.clone()
    }

    pub fn spawn_local(self) -> JoinHandle<()> {
        tokio::task::spawn_local(self.run())
    }

    /// Reader loop with the blanket failure policy: any sensor error is
    /// logged and the loop restarts after a second. Cancellation (task abort)
    /// exits at any await point.
    async fn run(mut self) {
        loop {
            if let Err(error) = self.sample_loop().await {
                warn!("sensor reader failed, restarting: {error}");
                sleep(RESTART_AFTER_ERROR).await;
            }
        }
    }

    async fn sample_loop(&mut self) -> Result<(), SensorError> {
        loop {
            while !self.sensor.data_available()? {
                sleep(POLL_IDLE).await;
            }
            let co2 = self.sensor.co2_ppm()?;
            if !co2.is_finite() {
                warn!("discarding non-finite CO₂ reading: {co2}");
                continue;
            }
            let now = self.shared.now();
            self.shared.averager.borrow_mut().add(now, co2);
            debug!("CO₂ sample: {co2:.0} ppm");
            let smoothed = self.shared.smoothed_ppm();
            if smoothed > 0 {
                self.blinker.blink_number(smoothed / 100);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, collections::VecDeque, rc::Rc, time::Duration};

    use pretty_assertions::assert_eq;
    use tokio::task::LocalSet;

    use super::{Co2Sampler, SMOOTHED_MAX_PPM, SMOOTHED_MIN_PPM};
    use crate::{blinker::{BlinkCommand, test_pair},
                scd30::{Co2Sensor, SensorError}};

    /// Scripted sensor: `data_available` is true while readings are queued.
    #[derive(Clone, Debug)]
    struct ScriptedSensor {
        readings: Rc<RefCell<VecDeque<f64>>>,
    }

    impl ScriptedSensor {
        fn new() -> Self {
            Self {
                readings: Rc::new(RefCell::new(VecDeque::new())),
            }
        }

        fn push(&self, ppm: f64) {
            self.readings.borrow_mut().push_back(ppm);
        }
    }

    impl Co2Sensor for ScriptedSensor {
        fn data_available(&mut self) -> Result<bool, SensorError> {
            Ok(!self.readings.borrow().is_empty())
        }

        fn co2_ppm(&mut self) -> Result<f64, SensorError> {
            Ok(self.readings.borrow_mut().pop_front().unwrap())
        }

        fn set_self_calibration(&mut self, _enabled: bool) -> Result<(), SensorError> {
            Ok(())
        }

        fn set_forced_recalibration(&mut self, _ppm: u16) -> Result<(), SensorError> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn smooths_and_clamps_and_blinks() {
        let local = LocalSet::new();
        local
            .run_until(async {
                let sensor = ScriptedSensor::new();
                let (blinker, mut blink_commands) = test_pair();
                let sampler = Co2Sampler::new(Box::new(sensor.clone()), blinker);
                let reading = sampler.reading();

                sensor.push(850.0);
                let task = tokio::task::spawn_local(sampler.run());
                tokio::time::sleep(Duration::from_secs(1)).await;

                assert_eq!(reading.smoothed_ppm(), 850);
                assert_eq!(blink_commands.try_recv(), Ok(BlinkCommand::Number(8)));

                // A second reading inside the window averages with the first.
                sensor.push(950.0);
                tokio::time::sleep(Duration::from_secs(1)).await;
                assert_eq!(reading.smoothed_ppm(), 900);

                task.abort();
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn clamps_into_the_displayable_range() {
        let local = LocalSet::new();
        local
            .run_until(async {
                let sensor = ScriptedSensor::new();
                let (blinker, mut blink_commands) = test_pair();
                let sampler = Co2Sampler::new(Box::new(sensor.clone()), blinker);
                let reading = sampler.reading();

                sensor.push(9000.0);
                let task = tokio::task::spawn_local(sampler.run());
                tokio::time::sleep(Duration::from_secs(1)).await;
                assert_eq!(reading.smoothed_ppm(), SMOOTHED_MAX_PPM);
                assert_eq!(blink_commands.try_recv(), Ok(BlinkCommand::Number(20)));

                // Let the window empty out, then feed an implausibly low reading.
                tokio::time::sleep(Duration::from_secs(61)).await;
                sensor.push(3.0);
                tokio::time::sleep(Duration::from_secs(1)).await;
                assert_eq!(reading.smoothed_ppm(), SMOOTHED_MIN_PPM);

                task.abort();
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn stale_window_reads_zero() {
        let local = LocalSet::new();
        local
            .run_until(async {
                let sensor = ScriptedSensor::new();
                let (blinker, _blink_commands) = test_pair();
                let sampler = Co2Sampler::new(Box::new(sensor.clone()), blinker);
                let reading = sampler.reading();

                sensor.push(800.0);
                let task = tokio::task::spawn_local(sampler.run());
                tokio::time::sleep(Duration::from_secs(1)).await;
                assert_eq!(reading.smoothed_ppm(), 800);

                tokio::time::sleep(Duration::from_secs(61)).await;
                assert_eq!(reading.smoothed_ppm(), 0);

                task.abort();
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn non_finite_readings_are_dropped() {
        let local = LocalSet::new();
        local
            .run_until(async {
                let sensor = ScriptedSensor::new();
                let (blinker, _blink_commands) = test_pair();
                let sampler = Co2Sampler::new(Box::new(sensor.clone()), blinker);
                let reading = sampler.reading();

                sensor.push(f64::NAN);
                sensor.push(700.0);
                let task = tokio::task::spawn_local(sampler.run());
                tokio::time::sleep(Duration::from_secs(1)).await;

                assert_eq!(reading.smoothed_ppm(), 700);
                task.abort();
            })
            .await;
    }
}
