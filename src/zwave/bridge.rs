// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Helper-process bridge to the native wireless stack.
//!
//! The native stack (and its worker threads) live in a separate helper
//! process. The bridge speaks newline-delimited JSON with it: commands go to
//! the child's stdin, notifications come back on its stdout and are posted
//! into the tracker's queue. That post is the single cross-thread boundary
//! the rest of the crate never sees: a non-blocking push into an unbounded
//! channel drained on the executor.

use std::path::Path;

use miette::{Context, IntoDiagnostic};
use serde::Serialize;
use tokio::{io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
            process::Command,
            sync::mpsc};
use tracing::{debug, error, info, warn};

use super::{Manager, model::Notification};

#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "camelCase", rename_all_fields = "camelCase")]
enum BridgeCommand<'a> {
    AddDriver { device: &'a str },
    RemoveDriver { device: &'a str },
    ResetController { home_id: u32 },
    AddNode { home_id: u32, secure: bool },
    SetValue { switch_id: u64, on: bool },
    SetPollInterval { interval_ms: u32, interval_between_polls: bool },
    EnablePoll { switch_id: u64 },
    Destroy,
}

#[derive(Debug)]
pub struct BridgeManager {
    commands: mpsc::UnboundedSender<String>,
}

impl BridgeManager {
    /// Spawn the helper process and wire its stdio. Notifications land on
    /// `notifications`; the child is killed when the writer task winds down.
    pub fn try_spawn(
        bridge_command: &str,
        user_path: &Path,
        notifications: mpsc::UnboundedSender<Notification>,
    ) -> miette::Result<Self> {
        let mut child = Command::new(bridge_command)
            .arg("--user-path")
            .arg(user_path)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .into_diagnostic()
            .wrap_err_with(|| format!("spawning wireless bridge `{bridge_command}`"))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| miette::miette!("bridge stdout was not piped"))?;
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| miette::miette!("bridge stdin was not piped"))?;

        // Reader: one JSON notification per line, posted to the tracker.
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => match serde_json::from_str::<Notification>(&line) {
                        Ok(notification) => {
                            if notifications.send(notification).is_err() {
                                debug!("tracker gone, bridge reader exiting");
                                return;
                            }
                        }
                        Err(parse_error) => warn!("unparseable bridge line: {parse_error}: {line}"),
                    },
                    Ok(None) => {
                        warn!("wireless bridge closed its stdout");
                        return;
                    }
                    Err(read_error) => {
                        error!("reading from wireless bridge failed: {read_error}");
                        return;
                    }
                }
            }
        });

        // Writer: serialized commands, one per line. Dropping the sender ends
        // this task, which drops the child handle and kills the bridge.
        let (command_sender, mut command_receiver) = mpsc::unbounded_channel::<String>();
        tokio::spawn(async move {
            while let Some(line) = command_receiver.recv().await {
                if let Err(write_error) = stdin.write_all(line.as_bytes()).await {
                    error!("writing to wireless bridge failed: {write_error}");
                    break;
                }
                if let Err(write_error) = stdin.write_all(b"\n").await {
                    error!("writing to wireless bridge failed: {write_error}");
                    break;
                }
            }
            info!("wireless bridge shutting down");
            drop(child);
        });

        Ok(Self {
            commands: command_sender,
        })
    }

    fn send(&self, command: &BridgeCommand<'_>) {
        match serde_json::to_string(command) {
            Ok(line) => {
                if self.commands.send(line).is_err() {
                    warn!("bridge writer gone, dropping command");
                }
            }
            Err(encode_error) => error!("failed to encode bridge command: {encode_error}"),
        }
    }
}

impl Manager for BridgeManager {
    fn add_driver(&self, device: &str) {
        self.send(&BridgeCommand::AddDriver { device });
    }

    fn remove_driver(&self, device: &str) {
        self.send(&BridgeCommand::RemoveDriver { device });
    }

    fn reset_controller(&self, home_id: u32) {
        self.send(&BridgeCommand::ResetController { home_id });
    }

    fn add_node(&self, home_id: u32, secure: bool) {
        self.send(&BridgeCommand::AddNode { home_id, secure });
    }

    fn set_value(&self, switch_id: u64, on: bool) {
        self.send(&BridgeCommand::SetValue { switch_id, on });
    }

    fn set_poll_interval(&self, interval_ms: u32, interval_between_polls: bool) {
        self.send(&BridgeCommand::SetPollInterval {
            interval_ms,
            interval_between_polls,
        });
    }

    fn enable_poll(&self, switch_id: u64) {
        self.send(&BridgeCommand::EnablePoll { switch_id });
    }

    fn destroy(&self) {
        self.send(&BridgeCommand::Destroy);
    }
}
