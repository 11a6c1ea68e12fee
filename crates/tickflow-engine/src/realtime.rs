//! Free-running driver: ticks an [`Environment`] on a background thread.
//!
//! ```text
//! Caller thread(s)                      Driver thread
//!     |                                      |
//!     |--set_ticks_per_second()------------->| cmd_rx.recv_timeout(budget)
//!     |   [cmd_tx: bounded(64)]              | env.tick()
//!     |--manual_tick(n)--------------------->| env.manual_tick(n)
//!     |<--now via reply_tx-------------------|
//!     |--query()---------------------------->| snapshot views + stats
//!     |<--DriverSnapshot via reply_tx--------|
//!     |--shutdown()------------------------->| break, return Environment
//! ```
//!
//! The driver thread owns the environment exclusively. A rate of zero, or
//! [`pause`](RealtimeDriver::pause), stops automatic ticking; commands
//! are still served.

use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use thiserror::Error;
use tickflow_core::Tick;
use tracing::{debug, info};

use crate::entity::EntityView;
use crate::environment::Environment;
use crate::metrics::TickMetrics;

// ── Error types ──────────────────────────────────────────────────

/// Error talking to the driver thread.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum DriverError {
    /// The driver thread has shut down.
    #[error("driver thread has shut down")]
    Shutdown,
    /// The command channel is full (back-pressure).
    #[error("command channel full")]
    ChannelFull,
}

// ── Snapshot ─────────────────────────────────────────────────────

/// Point-in-time copy of everything a presentation layer displays.
#[derive(Clone, Debug)]
pub struct DriverSnapshot {
    /// Simulated time.
    pub now: Tick,
    /// Whether automatic ticking is active.
    pub running: bool,
    /// Current automatic tick rate.
    pub ticks_per_second: u32,
    /// One view per entity, in creation order.
    pub entities: Vec<EntityView>,
    /// Mean of the per-entity latency averages.
    pub average_global_latency: u64,
    /// Idle percentage averaged over consumers.
    pub average_global_idle_percentage: f64,
    /// Tick counters and timings.
    pub metrics: TickMetrics,
}

enum DriverCommand {
    ManualTick { n: u64, reply: Sender<Tick> },
    SetTicksPerSecond(u32),
    Pause,
    Resume,
    Query(Sender<DriverSnapshot>),
    Shutdown,
}

// ── Driver thread ────────────────────────────────────────────────

struct DriverThread {
    env: Environment,
    commands: Receiver<DriverCommand>,
    ticks_per_second: u32,
    paused: bool,
}

impl DriverThread {
    fn running(&self) -> bool {
        !self.paused && self.ticks_per_second > 0
    }

    fn budget(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.ticks_per_second.max(1)))
    }

    fn run(mut self) -> Environment {
        info!(ticks_per_second = self.ticks_per_second, "driver started");
        let mut next_tick = Instant::now() + self.budget();
        loop {
            let command = if self.running() {
                let timeout = next_tick.saturating_duration_since(Instant::now());
                match self.commands.recv_timeout(timeout) {
                    Ok(c) => Some(c),
                    Err(RecvTimeoutError::Timeout) => None,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            } else {
                match self.commands.recv() {
                    Ok(c) => Some(c),
                    Err(_) => break,
                }
            };

            match command {
                None => {
                    self.env.tick();
                    let now = Instant::now();
                    next_tick += self.budget();
                    // Behind schedule: drop the backlog instead of bursting.
                    if next_tick < now {
                        next_tick = now;
                    }
                }
                Some(DriverCommand::Shutdown) => break,
                Some(command) => {
                    let was_running = self.running();
                    self.handle(command);
                    if self.running() && !was_running {
                        next_tick = Instant::now() + self.budget();
                    }
                }
            }
        }
        info!(now = %self.env.now(), "driver stopped");
        self.env
    }

    fn handle(&mut self, command: DriverCommand) {
        match command {
            DriverCommand::ManualTick { n, reply } => {
                self.env.manual_tick(n);
                // Best-effort reply; the caller may have given up.
                let _ = reply.send(self.env.now());
            }
            DriverCommand::SetTicksPerSecond(value) => {
                debug!(ticks_per_second = value, "tick rate changed");
                self.ticks_per_second = value;
                self.env.set_ticks_per_second(value);
            }
            DriverCommand::Pause => self.paused = true,
            DriverCommand::Resume => self.paused = false,
            DriverCommand::Query(reply) => {
                let _ = reply.send(self.snapshot());
            }
            DriverCommand::Shutdown => {}
        }
    }

    fn snapshot(&self) -> DriverSnapshot {
        DriverSnapshot {
            now: self.env.now(),
            running: self.running(),
            ticks_per_second: self.ticks_per_second,
            entities: self.env.views(),
            average_global_latency: self.env.average_global_latency(),
            average_global_idle_percentage: self.env.average_global_idle_percentage(),
            metrics: self.env.metrics().clone(),
        }
    }
}

// ── RealtimeDriver ───────────────────────────────────────────────

/// Handle to an environment ticking on its own thread.
pub struct RealtimeDriver {
    commands: Option<Sender<DriverCommand>>,
    thread: Option<JoinHandle<Environment>>,
}

impl RealtimeDriver {
    /// Move `env` onto a new driver thread ticking at the configured rate.
    pub fn spawn(env: Environment) -> Self {
        let (cmd_tx, cmd_rx) = crossbeam_channel::bounded(64);
        let state = DriverThread {
            ticks_per_second: env.config().ticks_per_second,
            env,
            commands: cmd_rx,
            paused: false,
        };
        let thread = thread::Builder::new()
            .name("tickflow-driver".into())
            .spawn(move || state.run())
            .expect("failed to spawn driver thread");
        Self {
            commands: Some(cmd_tx),
            thread: Some(thread),
        }
    }

    fn send(&self, command: DriverCommand) -> Result<(), DriverError> {
        let tx = self.commands.as_ref().ok_or(DriverError::Shutdown)?;
        tx.try_send(command).map_err(|e| match e {
            TrySendError::Full(_) => DriverError::ChannelFull,
            TrySendError::Disconnected(_) => DriverError::Shutdown,
        })
    }

    /// Run `n` ticks on the driver thread and return the resulting time.
    pub fn manual_tick(&self, n: u64) -> Result<Tick, DriverError> {
        let (reply, rx) = crossbeam_channel::bounded(1);
        self.send(DriverCommand::ManualTick { n, reply })?;
        rx.recv().map_err(|_| DriverError::Shutdown)
    }

    /// Change the automatic tick rate. Zero stops automatic ticking.
    pub fn set_ticks_per_second(&self, value: u32) -> Result<(), DriverError> {
        self.send(DriverCommand::SetTicksPerSecond(value))
    }

    /// Stop automatic ticking.
    pub fn pause(&self) -> Result<(), DriverError> {
        self.send(DriverCommand::Pause)
    }

    /// Restart automatic ticking.
    pub fn resume(&self) -> Result<(), DriverError> {
        self.send(DriverCommand::Resume)
    }

    /// Snapshot the environment between ticks.
    pub fn query(&self) -> Result<DriverSnapshot, DriverError> {
        let (reply, rx) = crossbeam_channel::bounded(1);
        self.send(DriverCommand::Query(reply))?;
        rx.recv().map_err(|_| DriverError::Shutdown)
    }

    /// Stop the driver thread and take the environment back.
    pub fn shutdown(mut self) -> Result<Environment, DriverError> {
        self.stop().ok_or(DriverError::Shutdown)
    }

    fn stop(&mut self) -> Option<Environment> {
        if let Some(tx) = self.commands.take() {
            // A full channel still disconnects once `tx` is dropped.
            let _ = tx.try_send(DriverCommand::Shutdown);
        }
        self.thread.take()?.join().ok()
    }
}

impl Drop for RealtimeDriver {
    fn drop(&mut self) {
        self.stop();
    }
}
