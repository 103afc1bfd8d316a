//! # Real-Time Thread
//!
//! One fixed-rate thread per device. Each tick:
//!
//! 1. run every queued [`RtLink`] command (transfers from the main thread)
//! 2. call [`RealtimeTask::tick`]
//! 3. publish tick statistics (never blocking)
//! 4. wait for the next deadline
//!
//! The thread exits when the task returns [`CallbackCode::Done`] or when
//! [`RealtimeThread::stop`] is called. Before exiting it stops the link
//! from accepting commands and runs the ones still queued, so no caller
//! is left waiting.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::link::{drain, Command};
use super::tick::{TickLoop, TickStats};
use super::{mark_realtime_thread, RtLink};
use crate::error::RealtimeError;

/// What the thread should do after a tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallbackCode {
    /// Keep ticking.
    Continue,
    /// Exit the loop.
    Done,
}

/// Timing of the tick being executed.
#[derive(Clone, Copy, Debug)]
pub struct TickInfo {
    /// Tick number, starting at 1.
    pub tick: u64,
    /// Time since the thread started.
    pub elapsed: Duration,
    /// Time since the previous tick started.
    pub dt: Duration,
}

/// Work executed once per tick on the real-time thread.
pub trait RealtimeTask: Send + 'static {
    /// Runs one tick. Must stay within the tick budget.
    fn tick(&mut self, info: &TickInfo) -> CallbackCode;
}

/// Rate and channel settings of a real-time thread.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    /// Ticks per second.
    pub rate_hz: u32,
    /// Final part of each wait spent spin-waiting, in microseconds.
    pub spin_threshold_us: u64,
    /// Capacity of the command channel.
    pub command_capacity: usize,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            rate_hz: 1000,
            spin_threshold_us: 200,
            command_capacity: 64,
        }
    }
}

/// Marks the link stopped when the thread exits, also on panic.
struct ExitGuard {
    link: RtLink,
    receiver: Receiver<Command>,
    finished: bool,
}

impl ExitGuard {
    fn finish(mut self) {
        self.link.detach(&self.receiver, true);
        self.finished = true;
    }
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        if !self.finished {
            self.link.detach(&self.receiver, false);
        }
    }
}

/// A running real-time thread that owns its task.
pub struct RealtimeThread<T: RealtimeTask> {
    name: String,
    stop: Arc<AtomicBool>,
    stats: Arc<Mutex<TickStats>>,
    handle: Option<JoinHandle<T>>,
}

impl<T: RealtimeTask> RealtimeThread<T> {
    /// Spawns the thread and attaches it to `link`.
    ///
    /// # Errors
    ///
    /// Returns an error if `link` already has a thread or the OS refuses
    /// to spawn one.
    pub fn spawn(
        name: impl Into<String>,
        link: &RtLink,
        config: &RealtimeConfig,
        task: T,
    ) -> Result<Self, RealtimeError> {
        let name = name.into();
        let receiver = link.attach()?;
        let stop = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(Mutex::new(TickStats::default()));

        let guard = ExitGuard {
            link: link.clone(),
            receiver,
            finished: false,
        };
        let rate_hz = config.rate_hz;
        let spin_threshold = Duration::from_micros(config.spin_threshold_us);
        let thread_stop = Arc::clone(&stop);
        let thread_stats = Arc::clone(&stats);

        let spawned = std::thread::Builder::new().name(name.clone()).spawn(move || {
            mark_realtime_thread();
            run(guard, task, rate_hz, spin_threshold, &thread_stop, &thread_stats)
        });
        let handle = match spawned {
            Ok(handle) => handle,
            Err(source) => {
                // The guard was dropped with the closure, detaching the link.
                return Err(RealtimeError::Spawn { name, source });
            }
        };

        tracing::info!(thread = %name, rate_hz, "real-time thread started");
        Ok(Self {
            name,
            stop,
            stats,
            handle: Some(handle),
        })
    }

    /// Thread name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// True until the loop has exited.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Latest published tick statistics.
    #[must_use]
    pub fn stats(&self) -> TickStats {
        *self.stats.lock()
    }

    /// Stops the loop, joins the thread and returns the task.
    ///
    /// # Errors
    ///
    /// Returns [`RealtimeError::Panicked`] if the thread panicked.
    pub fn stop(mut self) -> Result<T, RealtimeError> {
        self.stop.store(true, Ordering::Release);
        let Some(handle) = self.handle.take() else {
            return Err(RealtimeError::Panicked(self.name.clone()));
        };
        let task = handle
            .join()
            .map_err(|_| RealtimeError::Panicked(self.name.clone()))?;
        tracing::info!(thread = %self.name, "real-time thread stopped");
        Ok(task)
    }
}

impl<T: RealtimeTask> Drop for RealtimeThread<T> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.stop.store(true, Ordering::Release);
            if handle.join().is_err() {
                tracing::error!(thread = %self.name, "real-time thread panicked");
            }
        }
    }
}

impl<T: RealtimeTask> std::fmt::Debug for RealtimeThread<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeThread")
            .field("name", &self.name)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

fn run<T: RealtimeTask>(
    guard: ExitGuard,
    mut task: T,
    rate_hz: u32,
    spin_threshold: Duration,
    stop: &AtomicBool,
    stats: &Mutex<TickStats>,
) -> T {
    let mut ticks = TickLoop::new(rate_hz, spin_threshold);
    let started = Instant::now();
    let mut previous = started;

    while !stop.load(Ordering::Acquire) {
        let start = ticks.begin_tick();
        drain(&guard.receiver, true);

        let info = TickInfo {
            tick: ticks.tick_count(),
            elapsed: start.duration_since(started),
            dt: start.duration_since(previous),
        };
        previous = start;
        let code = task.tick(&info);
        ticks.end_tick(start);

        if let Some(mut published) = stats.try_lock() {
            *published = *ticks.stats();
        }
        if code == CallbackCode::Done {
            break;
        }
        ticks.wait_for_next_tick();
    }

    guard.finish();
    task
}
