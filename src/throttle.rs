// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The throttle engine.
//!
//! One task owns the KSM control surface and the mode state machine.
//! Kicks and shutdown arrive as messages on a single channel; the decay
//! timer is an arm of the same `select!`, so every knob write happens on
//! the owner task and a kick racing a timer expiry always wins.

use std::future;
use std::time::Duration;

use log::debug;
use log::warn;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::Error;
use crate::error::Result;
use crate::ksm::KsmControl;
use crate::ksm::KsmMode;

const AGGRESSIVE_DWELL: Duration = Duration::from_secs(30);
const STANDARD_DWELL: Duration = Duration::from_secs(120);
const SLOW_DWELL: Duration = Duration::from_secs(120);

// Kicks queued ahead of the engine task. A kick dropped on overflow is
// harmless: one queued kick already guarantees the aggressive window.
const COMMAND_QUEUE_DEPTH: usize = 16;

/// Dwell time in `mode` and the mode the decay timer moves to next.
/// `None` means the engine parks until the next kick.
fn schedule(mode: KsmMode) -> (Option<Duration>, KsmMode) {
    match mode {
        KsmMode::Aggressive => (Some(AGGRESSIVE_DWELL), KsmMode::Standard),
        KsmMode::Standard => (Some(STANDARD_DWELL), KsmMode::Slow),
        KsmMode::Slow => (Some(SLOW_DWELL), KsmMode::Initial),
        KsmMode::Initial | KsmMode::Auto => (None, KsmMode::Initial),
    }
}

enum Command {
    Kick,
    Shutdown(oneshot::Sender<()>),
}

/// Handle to a running throttle engine. Clones share the same engine.
#[derive(Clone)]
pub struct Throttler {
    commands: mpsc::Sender<Command>,
}

impl Throttler {
    /// Capture the KSM snapshot, start scanning in `mode` and spawn the
    /// engine task parked in `Initial`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start<C: KsmControl>(mut ksm: C, mode: KsmMode) -> Result<Self> {
        ksm.start(mode)?;

        let (commands, receiver) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let engine = Engine {
            ksm,
            mode: KsmMode::Initial,
            deadline: None,
        };
        tokio::spawn(engine.run(receiver));

        Ok(Self { commands })
    }

    /// Force the engine into `Aggressive` and restart the decay window.
    /// Never blocks; kicks beyond the queue depth coalesce.
    pub fn kick(&self) -> Result<()> {
        match self.commands.try_send(Command::Kick) {
            Ok(()) | Err(TrySendError::Full(_)) => Ok(()),
            Err(TrySendError::Closed(_)) => Err(Error::KsmMissing),
        }
    }

    /// Stop the engine and restore the snapshotted settings. After this
    /// returns, further kicks are rejected with [`Error::KsmMissing`].
    pub async fn shutdown(&self) {
        let (ack, done) = oneshot::channel();
        if self.commands.send(Command::Shutdown(ack)).await.is_ok() {
            let _ = done.await;
        }
    }
}

struct Engine<C> {
    ksm: C,
    mode: KsmMode,
    deadline: Option<Instant>,
}

impl<C: KsmControl> Engine<C> {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        loop {
            tokio::select! {
                // Commands take priority over a simultaneous timer expiry.
                biased;

                command = commands.recv() => match command {
                    Some(Command::Kick) => self.kick(),
                    Some(Command::Shutdown(ack)) => {
                        self.shutdown();
                        let _ = ack.send(());
                        return;
                    }
                    // All handles dropped: restore as on shutdown.
                    None => {
                        self.shutdown();
                        return;
                    }
                },

                () = Self::expired(self.deadline) => self.advance(),
            }
        }
    }

    async fn expired(deadline: Option<Instant>) {
        match deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => future::pending().await,
        }
    }

    fn kick(&mut self) {
        if let Err(e) = self.ksm.apply(KsmMode::Aggressive) {
            // Keep the prior mode and timer; the next event retries.
            warn!("could not apply aggressive KSM settings: {}", e);
            return;
        }

        debug!("KSM mode {:?} -> {:?} (kick)", self.mode, KsmMode::Aggressive);
        self.mode = KsmMode::Aggressive;
        let (dwell, _) = schedule(self.mode);
        self.deadline = dwell.map(|dwell| Instant::now() + dwell);
    }

    fn advance(&mut self) {
        let (dwell, next) = schedule(self.mode);

        if let Err(e) = self.ksm.apply(next) {
            // Stay in the current mode and retry the transition after
            // another full dwell.
            warn!("could not apply {:?} KSM settings: {}", next, e);
            self.deadline = dwell.map(|dwell| Instant::now() + dwell);
            return;
        }

        debug!("KSM mode {:?} -> {:?}", self.mode, next);
        self.mode = next;
        let (dwell, _) = schedule(self.mode);
        self.deadline = dwell.map(|dwell| Instant::now() + dwell);
    }

    fn shutdown(&mut self) {
        self.deadline = None;
        if let Err(e) = self.ksm.restore() {
            warn!("could not restore KSM settings: {}", e);
        }
    }
}
