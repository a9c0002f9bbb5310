// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Per-switch control state machine.
//!
//! Each physical switch gets one cooperative task reconciling three
//! unsynchronized sources of truth:
//!
//! - the desired state published by the CO₂ control loop (`DesireOn/Off`),
//! - the last physical state reported by the network (`ObservedOn/Off`),
//! - and the human standing at the wall plate.
//!
//! The task moves through three phases:
//!
//! 1. **Pre-alive** — the wireless stack surfaces a node only after its
//!    initial scan, so the task consumes (and records) events until the first
//!    `Alive` arrives. No commands are issued.
//! 2. **Automatic control** — an *announcement pulse* (off, on, off) tells
//!    humans the switch is machine-driven, then desired and observed state
//!    are reconciled with debounced commands.
//! 3. **Manual override** — a toggle that disagrees with what we believe the
//!    switch to be means a human flipped it. The task yields for the
//!    configured window, sliding it on every further toggle, then re-enters
//!    automatic control at the pulse.
//!
//! An `Alive` at any point restarts automatic control at the pulse: the node
//! may have rebooted and forgotten everything, so we re-announce.
//!
//! Everything is built on one primitive, [`SwitchController::drain`], which
//! turns what would be control-flow exceptions into a small sum type,
//! [`DrainOutcome`].

use std::{rc::Rc, time::Duration};

use tokio::{sync::mpsc,
            time::{Instant, timeout_at}};
use tracing::{debug, info};

/// Callback used to command the physical switch; injected so the controller
/// never touches the wireless stack directly.
pub type SetValue = Rc<dyn Fn(u64, bool)>;

/// Per-switch mailbox depth. The tracker enqueues without awaiting, so the
/// mailbox bounds how far a switch can fall behind before events are shed.
pub const MAILBOX_CAPACITY: usize = 64;

/// Settle time after each edge of the announcement pulse.
const PULSE_SETTLE: Duration = Duration::from_secs(1);

/// How long settling `ValueChanged` traffic is consumed after a command
/// before observed state is compared against the commanded value.
const DEBOUNCE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchEvent {
    /// The node answered the network again; re-announce and reconcile.
    Alive,
    ObservedOn,
    ObservedOff,
    DesireOn,
    DesireOff,
}

impl SwitchEvent {
    pub fn observed(on: bool) -> Self {
        if on { Self::ObservedOn } else { Self::ObservedOff }
    }

    pub fn desire(on: bool) -> Self {
        if on { Self::DesireOn } else { Self::DesireOff }
    }
}

/// What a mailbox drain concluded, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DrainOutcome {
    /// Deadline reached (or mailbox emptied) without anything notable.
    Returned,
    /// An `Alive` was observed somewhere in the drain.
    Alive,
    /// While monitoring, an observation disagreed with what we believed.
    Toggled,
    /// The mailbox is gone; the task should end.
    Closed,
}

/// Whether `automatic` should run again (fresh pulse) or the task is done.
enum Flow {
    Restart,
    Closed,
}

pub struct SwitchController {
    node_id: u8,
    switch_id: u64,
    /// Last physical state reported by the network.
    observed_onoff: bool,
    /// Latest desire published by the control loop; none until the first one.
    desired_onoff: Option<bool>,
    mailbox: mpsc::Receiver<SwitchEvent>,
    set_value: SetValue,
    manual: Duration,
}

impl std::fmt::Debug for SwitchController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SwitchController")
            .field("node_id", &self.node_id)
            .field("switch_id", &self.switch_id)
            .field("observed_onoff", &self.observed_onoff)
            .field("desired_onoff", &self.desired_onoff)
            .finish_non_exhaustive()
    }
}

impl SwitchController {
    pub fn new(
        node_id: u8,
        switch_id: u64,
        mailbox: mpsc::Receiver<SwitchEvent>,
        set_value: SetValue,
        manual: Duration,
    ) -> Self {
        Self {
            node_id,
            switch_id,
            observed_onoff: false,
            desired_onoff: None,
            mailbox,
            set_value,
            manual,
        }
    }

    pub async fn run(mut self) {
        // Phase 1: consume stale events until the node is known to be alive.
        debug!(node = self.node_id, "waiting for first alive");
        loop {
            match self.drain(None, false).await {
                DrainOutcome::Alive => break,
                DrainOutcome::Closed => return,
                DrainOutcome::Returned | DrainOutcome::Toggled => {}
            }
        }
        loop {
            match self.automatic().await {
                Flow::Restart => {}
                Flow::Closed => return,
            }
        }
    }

    /// One pass of automatic control: announcement pulse, then reconcile
    /// desired against observed until an `Alive` forces a restart or the
    /// mailbox closes. A detected human toggle detours through the manual
    /// override window before returning.
    async fn automatic(&mut self) -> Flow {
        info!(node = self.node_id, "announcement pulse");
        self.set(false);
        match self.drain(Some(PULSE_SETTLE), false).await {
            DrainOutcome::Alive => return Flow::Restart,
            DrainOutcome::Closed => return Flow::Closed,
            DrainOutcome::Returned | DrainOutcome::Toggled => {}
        }
        self.set(true);
        match self.drain(Some(PULSE_SETTLE), false).await {
            DrainOutcome::Alive => return Flow::Restart,
            DrainOutcome::Closed => return Flow::Closed,
            DrainOutcome::Returned | DrainOutcome::Toggled => {}
        }
        match self.command(false).await {
            DrainOutcome::Alive => return Flow::Restart,
            DrainOutcome::Closed => return Flow::Closed,
            DrainOutcome::Toggled => return self.manual_override().await,
            DrainOutcome::Returned => {}
        }

        loop {
            let outcome = match self.desired_onoff {
                Some(desired) if desired != self.observed_onoff => self.command(desired).await,
                _ => self.drain(None, true).await,
            };
            match outcome {
                DrainOutcome::Alive => return Flow::Restart,
                DrainOutcome::Closed => return Flow::Closed,
                DrainOutcome::Toggled => return self.manual_override().await,
                DrainOutcome::Returned => {}
            }
        }
    }

    /// A human owns the switch for the configured window. Every further
    /// toggle restarts the window; desires keep being recorded but nothing is
    /// commanded until the window elapses (or the node re-announces itself).
    async fn manual_override(&mut self) -> Flow {
        info!(
            node = self.node_id,
            secs = self.manual.as_secs(),
            "manual toggle detected, yielding control"
        );
        loop {
            match self.drain(Some(self.manual), true).await {
                DrainOutcome::Toggled => {
                    debug!(node = self.node_id, "toggled again, override restarted");
                }
                DrainOutcome::Returned | DrainOutcome::Alive => {
                    info!(node = self.node_id, "resuming automatic control");
                    return Flow::Restart;
                }
                DrainOutcome::Closed => return Flow::Closed,
            }
        }
    }

    /// Debounced send: command the switch, consume settling traffic for the
    /// full window (it updates `observed_onoff` silently), then compare. An
    /// observed state that still disagrees with the commanded value means a
    /// human is flipping the switch right now.
    async fn command(&mut self, on: bool) -> DrainOutcome {
        self.set(on);
        match self.drain(Some(DEBOUNCE), false).await {
            DrainOutcome::Returned if self.observed_onoff != on => DrainOutcome::Toggled,
            outcome => outcome,
        }
    }

    /// The one primitive underneath every phase.
    ///
    /// With a duration, receives until the deadline; without one, waits
    /// indefinitely for the first event and then drains until the mailbox is
    /// empty. An `Alive` — or, while `monitor_toggled`, an observation that
    /// changes `observed_onoff` — flips the drain into stop-on-empty mode so
    /// the signal is delivered promptly. Desires are always recorded.
    async fn drain(&mut self, duration: Option<Duration>, monitor_toggled: bool) -> DrainOutcome {
        let deadline = duration.map(|duration| Instant::now() + duration);
        let mut saw_alive = false;
        let mut saw_toggle = false;
        let mut stop_on_empty = false;
        loop {
            let event = if stop_on_empty {
                match self.mailbox.try_recv() {
                    Ok(event) => event,
                    Err(mpsc::error::TryRecvError::Empty) => break,
                    Err(mpsc::error::TryRecvError::Disconnected) => return DrainOutcome::Closed,
                }
            } else if let Some(deadline) = deadline {
                match timeout_at(deadline, self.mailbox.recv()).await {
                    Ok(Some(event)) => event,
                    Ok(None) => return DrainOutcome::Closed,
                    Err(_elapsed) => break,
                }
            } else {
                match self.mailbox.recv().await {
                    Some(event) => event,
                    None => return DrainOutcome::Closed,
                }
            };

            match event {
                SwitchEvent::Alive => {
                    saw_alive = true;
                    stop_on_empty = true;
                }
                SwitchEvent::ObservedOn | SwitchEvent::ObservedOff => {
                    let on = event == SwitchEvent::ObservedOn;
                    if self.observed_onoff != on {
                        self.observed_onoff = on;
                        if monitor_toggled {
                            saw_toggle = true;
                            stop_on_empty = true;
                        }
                    }
                }
                SwitchEvent::DesireOn | SwitchEvent::DesireOff => {
                    self.desired_onoff = Some(event == SwitchEvent::DesireOn);
                }
            }
            if duration.is_none() {
                stop_on_empty = true;
            }
        }
        if saw_alive {
            DrainOutcome::Alive
        } else if saw_toggle {
            DrainOutcome::Toggled
        } else {
            DrainOutcome::Returned
        }
    }

    fn set(&self, on: bool) {
        debug!(node = self.node_id, on, "commanding switch");
        (self.set_value)(self.switch_id, on);
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc, time::Duration};

    use pretty_assertions::assert_eq;
    use tokio::{sync::mpsc, task::LocalSet};

    use super::{DrainOutcome, MAILBOX_CAPACITY, SwitchController, SwitchEvent};

    const SWITCH_ID: u64 = 100;
    const MANUAL: Duration = Duration::from_secs(3600);

    type Commands = Rc<RefCell<Vec<(u64, bool)>>>;

    fn fixture(manual: Duration) -> (mpsc::Sender<SwitchEvent>, Commands, SwitchController) {
        let (sender, receiver) = mpsc::channel(MAILBOX_CAPACITY);
        let commands: Commands = Rc::new(RefCell::new(Vec::new()));
        let sink = commands.clone();
        let controller = SwitchController::new(
            2,
            SWITCH_ID,
            receiver,
            Rc::new(move |switch_id, on| sink.borrow_mut().push((switch_id, on))),
            manual,
        );
        (sender, commands, controller)
    }

    async fn advance(duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn secs(seconds: u64) -> Duration {
        Duration::from_secs(seconds)
    }

    // -- drain primitive --------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn drain_without_duration_stops_once_empty() {
        let (sender, _commands, mut controller) = fixture(MANUAL);
        sender.send(SwitchEvent::DesireOn).await.unwrap();
        sender.send(SwitchEvent::ObservedOn).await.unwrap();
        let outcome = controller.drain(None, false).await;
        assert_eq!(outcome, DrainOutcome::Returned);
        assert_eq!(controller.desired_onoff, Some(true));
        assert!(controller.observed_onoff);
    }

    #[tokio::test(start_paused = true)]
    async fn drain_times_out_with_returned_when_nothing_happens() {
        let (_sender, _commands, mut controller) = fixture(MANUAL);
        let outcome = controller.drain(Some(secs(3)), true).await;
        assert_eq!(outcome, DrainOutcome::Returned);
    }

    #[tokio::test(start_paused = true)]
    async fn drain_prioritizes_alive_over_toggle() {
        let (sender, _commands, mut controller) = fixture(MANUAL);
        sender.send(SwitchEvent::ObservedOn).await.unwrap();
        sender.send(SwitchEvent::Alive).await.unwrap();
        let outcome = controller.drain(Some(secs(10)), true).await;
        assert_eq!(outcome, DrainOutcome::Alive);
    }

    #[tokio::test(start_paused = true)]
    async fn unmonitored_drain_updates_observed_without_toggling() {
        let (sender, _commands, mut controller) = fixture(MANUAL);
        sender.send(SwitchEvent::ObservedOn).await.unwrap();
        let outcome = controller.drain(Some(secs(2)), false).await;
        assert_eq!(outcome, DrainOutcome::Returned);
        assert!(controller.observed_onoff);
    }

    #[tokio::test(start_paused = true)]
    async fn monitored_drain_flags_an_observation_that_changes_state() {
        let (sender, _commands, mut controller) = fixture(MANUAL);
        sender.send(SwitchEvent::ObservedOn).await.unwrap();
        let outcome = controller.drain(Some(secs(60)), true).await;
        assert_eq!(outcome, DrainOutcome::Toggled);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_observation_of_the_same_state_is_not_a_toggle() {
        let (sender, _commands, mut controller) = fixture(MANUAL);
        sender.send(SwitchEvent::ObservedOff).await.unwrap();
        let outcome = controller.drain(Some(secs(2)), true).await;
        assert_eq!(outcome, DrainOutcome::Returned);
    }

    #[tokio::test(start_paused = true)]
    async fn drain_reports_closed_when_the_mailbox_is_dropped() {
        let (sender, _commands, mut controller) = fixture(MANUAL);
        drop(sender);
        let outcome = controller.drain(None, false).await;
        assert_eq!(outcome, DrainOutcome::Closed);
    }

    // -- phases ------------------------------------------------------------

    /// Walk a fresh controller through alive + pulse. Ends with the pulse
    /// done, observed off, and the controller blocked in the idle drain.
    async fn start_and_pulse(sender: &mpsc::Sender<SwitchEvent>, commands: &Commands) {
        sender.send(SwitchEvent::Alive).await.unwrap();
        // off at t+0, on at t+1, off-with-debounce at t+2..t+7.
        advance(secs(8)).await;
        assert_eq!(
            commands.borrow().clone(),
            vec![(SWITCH_ID, false), (SWITCH_ID, true), (SWITCH_ID, false)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn no_commands_before_first_alive() {
        let local = LocalSet::new();
        local
            .run_until(async {
                let (sender, commands, controller) = fixture(MANUAL);
                let task = tokio::task::spawn_local(controller.run());

                sender.send(SwitchEvent::DesireOn).await.unwrap();
                sender.send(SwitchEvent::ObservedOff).await.unwrap();
                advance(secs(600)).await;
                assert!(commands.borrow().is_empty());

                task.abort();
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn alive_triggers_the_announcement_pulse() {
        let local = LocalSet::new();
        local
            .run_until(async {
                let (sender, commands, controller) = fixture(MANUAL);
                let task = tokio::task::spawn_local(controller.run());

                start_and_pulse(&sender, &commands).await;
                task.abort();
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn desire_is_applied_after_the_pulse_and_confirmed() {
        let local = LocalSet::new();
        local
            .run_until(async {
                let (sender, commands, controller) = fixture(MANUAL);
                let task = tokio::task::spawn_local(controller.run());

                start_and_pulse(&sender, &commands).await;

                // A desire that differs from observed: the controller
                // commands on and debounces.
                sender.send(SwitchEvent::DesireOn).await.unwrap();
                advance(secs(1)).await;
                assert_eq!(commands.borrow().last(), Some(&(SWITCH_ID, true)));
                // The network confirms inside the debounce window.
                sender.send(SwitchEvent::ObservedOn).await.unwrap();
                advance(secs(6)).await;

                // Reconciled: no further commands.
                let count = commands.borrow().len();
                sender.send(SwitchEvent::DesireOn).await.unwrap();
                advance(secs(60)).await;
                assert_eq!(commands.borrow().len(), count);

                task.abort();
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn unconfirmed_command_is_treated_as_a_toggle() {
        let local = LocalSet::new();
        local
            .run_until(async {
                let (sender, commands, controller) = fixture(MANUAL);
                let task = tokio::task::spawn_local(controller.run());

                start_and_pulse(&sender, &commands).await;

                // Command on, but nothing ever confirms it: after the
                // debounce the controller concludes a human is interfering
                // and stops commanding.
                sender.send(SwitchEvent::DesireOn).await.unwrap();
                advance(secs(7)).await;
                let count = commands.borrow().len();
                assert_eq!(commands.borrow().last(), Some(&(SWITCH_ID, true)));
                advance(secs(120)).await;
                assert_eq!(commands.borrow().len(), count);

                task.abort();
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn human_toggle_enters_manual_override_then_resumes() {
        let local = LocalSet::new();
        local
            .run_until(async {
                let (sender, commands, controller) = fixture(MANUAL);
                let task = tokio::task::spawn_local(controller.run());

                start_and_pulse(&sender, &commands).await;
                sender.send(SwitchEvent::DesireOn).await.unwrap();
                advance(secs(1)).await;
                sender.send(SwitchEvent::ObservedOn).await.unwrap();
                advance(secs(6)).await;
                let reconciled = commands.borrow().len();

                // Human flips the switch off: the idle monitored drain sees
                // the change and yields control.
                sender.send(SwitchEvent::ObservedOff).await.unwrap();
                advance(secs(1)).await;

                // Desires keep arriving but nothing is commanded for the
                // whole override window.
                for _ in 0..4 {
                    sender.send(SwitchEvent::DesireOn).await.unwrap();
                    advance(secs(600)).await;
                }
                assert_eq!(commands.borrow().len(), reconciled);

                // Window elapses: the pulse re-emits and the recorded desire
                // is re-applied.
                advance(secs(1300)).await;
                let after = commands.borrow().clone();
                assert_eq!(
                    after[reconciled..reconciled + 3],
                    [(SWITCH_ID, false), (SWITCH_ID, true), (SWITCH_ID, false)]
                );
                assert_eq!(after.last(), Some(&(SWITCH_ID, true)));

                task.abort();
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn another_toggle_slides_the_override_window() {
        let local = LocalSet::new();
        local
            .run_until(async {
                let (sender, commands, controller) = fixture(MANUAL);
                let task = tokio::task::spawn_local(controller.run());

                start_and_pulse(&sender, &commands).await;
                let pulsed = commands.borrow().len();

                // First toggle enters override.
                sender.send(SwitchEvent::ObservedOn).await.unwrap();
                advance(secs(3500)).await;
                // Second toggle at t=3500 restarts the 3600 s window.
                sender.send(SwitchEvent::ObservedOff).await.unwrap();
                advance(secs(3500)).await;
                assert_eq!(commands.borrow().len(), pulsed);

                // 3500 + 3600 in total: now it expires and control resumes.
                advance(secs(200)).await;
                assert!(commands.borrow().len() > pulsed);

                task.abort();
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn alive_restarts_the_pulse_from_anywhere() {
        let local = LocalSet::new();
        local
            .run_until(async {
                let (sender, commands, controller) = fixture(MANUAL);
                let task = tokio::task::spawn_local(controller.run());

                start_and_pulse(&sender, &commands).await;
                let pulsed = commands.borrow().len();

                // Node reboots while we idle: full pulse again.
                sender.send(SwitchEvent::Alive).await.unwrap();
                advance(secs(8)).await;
                assert_eq!(
                    commands.borrow()[pulsed..],
                    [(SWITCH_ID, false), (SWITCH_ID, true), (SWITCH_ID, false)]
                );

                task.abort();
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn alive_during_override_also_restarts_the_pulse() {
        let local = LocalSet::new();
        local
            .run_until(async {
                let (sender, commands, controller) = fixture(MANUAL);
                let task = tokio::task::spawn_local(controller.run());

                start_and_pulse(&sender, &commands).await;
                sender.send(SwitchEvent::ObservedOn).await.unwrap();
                advance(secs(60)).await;
                let during_override = commands.borrow().len();

                sender.send(SwitchEvent::Alive).await.unwrap();
                advance(secs(8)).await;
                assert_eq!(
                    commands.borrow()[during_override..],
                    [(SWITCH_ID, false), (SWITCH_ID, true), (SWITCH_ID, false)]
                );

                task.abort();
            })
            .await;
    }
}
