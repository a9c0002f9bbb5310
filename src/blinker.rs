// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Status-LED blinker.
//!
//! The blinker owns the opened sysfs-style brightness file for the lifetime of
//! its task and accepts two controls through a capacity-1 command mailbox:
//!
//! - [`BlinkerHandle::blink_number`] encodes an integer as a blink pattern:
//!   short pulses, with every fifth pulse lengthened so a human can count in
//!   groups of five.
//! - [`BlinkerHandle::blink_hz`] switches to a continuous on/off square wave,
//!   used by the calibration mode to signal warm-up vs. done.
//!
//! The mailbox is deliberately "latest wins, but lossy": when a command is
//! still pending, a new one is silently dropped. The display is a coarse
//! human-facing surface; bounded staleness is fine, backpressure is not.

use std::{fs::File,
          io::Write,
          path::Path,
          time::Duration};

use miette::{Context, IntoDiagnostic};
use tokio::{sync::mpsc, task::JoinHandle, time::sleep};
use tracing::warn;

const PULSE_GAP: Duration = Duration::from_millis(200);
const PULSE_ON: Duration = Duration::from_millis(100);
/// Every fifth pulse is held longer so counts stay readable.
const FIVES_PULSE_ON: Duration = Duration::from_millis(300);
const GROUP_GAP: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BlinkCommand {
    Number(u32),
    Hz(f64),
}

/// Cheap-to-clone sender half. Both controls are non-blocking and lossy on a
/// full mailbox (the pending command is kept, the new one dropped).
#[derive(Debug, Clone)]
pub struct BlinkerHandle {
    sender: mpsc::Sender<BlinkCommand>,
}

impl BlinkerHandle {
    /// Request that `n` be blinked out. Clears Hz mode.
    pub fn blink_number(&self, n: u32) {
        _ = self.sender.try_send(BlinkCommand::Number(n));
    }

    /// Switch to a continuous square wave at `hz`.
    pub fn blink_hz(&self, hz: f64) {
        _ = self.sender.try_send(BlinkCommand::Hz(hz));
    }
}

#[derive(Debug)]
pub struct LedBlinker {
    led: File,
    receiver: mpsc::Receiver<BlinkCommand>,
}

impl LedBlinker {
    /// Open the brightness file and build the task half plus its handle. The
    /// file handle lives exactly as long as the blinker task.
    pub fn try_open(path: &Path) -> miette::Result<(BlinkerHandle, LedBlinker)> {
        let led = File::options()
            .write(true)
            .open(path)
            .into_diagnostic()
            .wrap_err_with(|| format!("opening LED file {}", path.display()))?;
        let (sender, receiver) = mpsc::channel(1);
        Ok((BlinkerHandle { sender }, LedBlinker { led, receiver }))
    }

    pub fn spawn_local(self) -> JoinHandle<()> {
        tokio::task::spawn_local(self.run())
    }

    async fn run(mut self) {
        let mut pending: Option<BlinkCommand> = None;
        loop {
            let command = match pending.take() {
                Some(command) => command,
                None => match self.receiver.recv().await {
                    Some(command) => command,
                    None => return,
                },
            };
            match command {
                BlinkCommand::Number(n) => {
                    self.emit_number(n).await;
                    sleep(GROUP_GAP).await;
                }
                BlinkCommand::Hz(hz) => pending = self.run_hz(hz).await,
            }
        }
    }

    /// Blink the group for `n`: every fifth pulse is the longer "fives" pulse.
    async fn emit_number(&mut self, n: u32) {
        for i in 0..n {
            if (i + 1) % 5 == 0 {
                self.set(false);
                sleep(PULSE_GAP).await;
                self.set(true);
                sleep(FIVES_PULSE_ON).await;
                self.set(false);
            } else {
                self.set(false);
                sleep(PULSE_GAP).await;
                self.set(true);
                sleep(PULSE_ON).await;
                self.set(false);
                sleep(PULSE_GAP).await;
            }
        }
    }

    /// Square wave until the next command arrives; returns it (or `None` when
    /// the handle side is gone, which ends the task).
    async fn run_hz(&mut self, hz: f64) -> Option<BlinkCommand> {
        let half_period = Duration::from_secs_f64(1.0 / hz / 2.0);
        let mut on = false;
        loop {
            on = !on;
            self.set(on);
            tokio::select! {
                command = self.receiver.recv() => {
                    self.set(false);
                    return command;
                }
                () = sleep(half_period) => {}
            }
        }
    }

    fn set(&mut self, on: bool) {
        let bytes: &[u8] = if on { b"1\n" } else { b"0\n" };
        if let Err(error) = self.led.write_all(bytes).and_then(|()| self.led.flush()) {
            warn!("LED write failed: {error}");
        }
    }
}

#[cfg(test)]
pub(crate) fn test_pair() -> (BlinkerHandle, mpsc::Receiver<BlinkCommand>) {
    let (sender, receiver) = mpsc::channel(1);
    (BlinkerHandle { sender }, receiver)
}
