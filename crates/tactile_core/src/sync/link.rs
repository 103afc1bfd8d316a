//! # Synchronous Callback Link
//!
//! A bounded command channel into one real-time thread plus a rendezvous
//! reply per call.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;

use super::in_realtime_thread;
use crate::error::RealtimeError;

pub(crate) type Command = Box<dyn FnOnce() + Send>;

struct LinkShared {
    /// True while a real-time thread takes commands. Senders hold the
    /// lock across `send`, so flipping it to false fences off new sends.
    accepting: Mutex<bool>,
    running: AtomicBool,
    sender: Sender<Command>,
    receiver: Receiver<Command>,
}

/// Handle for running closures on a real-time thread.
///
/// Cheap to clone. Without a running thread, [`RtLink::call_sync`] runs
/// the closure inline since nothing can race with the caller.
#[derive(Clone)]
pub struct RtLink {
    shared: Arc<LinkShared>,
}

impl RtLink {
    /// Creates a link whose command channel holds `capacity` requests.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity.max(1));
        Self {
            shared: Arc::new(LinkShared {
                accepting: Mutex::new(false),
                running: AtomicBool::new(false),
                sender,
                receiver,
            }),
        }
    }

    /// True while a real-time thread is attached and taking commands.
    #[inline]
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Number of commands waiting for the real-time thread.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.shared.receiver.len()
    }

    /// Runs `f` on the real-time thread at the top of its next tick and
    /// blocks until it returns.
    ///
    /// # Errors
    ///
    /// Returns [`RealtimeError::Disconnected`] if the thread died before
    /// running the closure.
    ///
    /// # Panics
    ///
    /// Panics when called from a real-time thread: it would wait on itself.
    pub fn call_sync<R, F>(&self, f: F) -> Result<R, RealtimeError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        assert!(
            !in_realtime_thread(),
            "call_sync issued from the real-time thread"
        );

        let (reply_tx, reply_rx) = bounded(1);
        {
            let accepting = self.shared.accepting.lock();
            if !*accepting {
                drop(accepting);
                return Ok(f());
            }
            let command: Command = Box::new(move || {
                // The caller may have given up; nothing to do then.
                let _ = reply_tx.send(f());
            });
            self.shared
                .sender
                .send(command)
                .map_err(|_| RealtimeError::Disconnected)?;
        }
        reply_rx.recv().map_err(|_| RealtimeError::Disconnected)
    }

    /// Claims the link for a new real-time thread.
    pub(crate) fn attach(&self) -> Result<Receiver<Command>, RealtimeError> {
        let mut accepting = self.shared.accepting.lock();
        if *accepting {
            return Err(RealtimeError::AlreadyRunning);
        }
        *accepting = true;
        self.shared.running.store(true, Ordering::Release);
        Ok(self.shared.receiver.clone())
    }

    /// Stops accepting commands, then runs (or drops) everything queued.
    ///
    /// Called on the real-time thread as it exits. A sender blocked on a
    /// full channel holds the lock, so keep draining until it is free.
    pub(crate) fn detach(&self, receiver: &Receiver<Command>, run: bool) {
        loop {
            if let Some(mut accepting) = self.shared.accepting.try_lock() {
                *accepting = false;
                self.shared.running.store(false, Ordering::Release);
                break;
            }
            drain(receiver, run);
            std::hint::spin_loop();
        }
        drain(receiver, run);
    }
}

/// Runs every queued command. Dropped commands disconnect their caller.
pub(crate) fn drain(receiver: &Receiver<Command>, run: bool) -> usize {
    let mut count = 0;
    while let Ok(command) = receiver.try_recv() {
        if run {
            command();
        }
        count += 1;
    }
    count
}

impl std::fmt::Debug for RtLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RtLink")
            .field("running", &self.is_running())
            .field("pending", &self.pending())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_sync_inline_without_thread() {
        let link = RtLink::new(4);
        assert!(!link.is_running());
        assert_eq!(link.call_sync(|| 41 + 1).unwrap(), 42);
    }

    #[test]
    fn test_attach_twice_fails() {
        let link = RtLink::new(4);
        let receiver = link.attach().unwrap();
        assert!(link.is_running());
        assert!(matches!(link.attach(), Err(RealtimeError::AlreadyRunning)));
        link.detach(&receiver, true);
        assert!(!link.is_running());
    }

    #[test]
    fn test_commands_run_on_receiving_thread() {
        let link = RtLink::new(4);
        let receiver = link.attach().unwrap();
        let worker = std::thread::spawn(move || {
            let command = receiver.recv().unwrap();
            command();
            std::thread::current().id()
        });
        let ran_on = link.call_sync(|| std::thread::current().id()).unwrap();
        let worker_id = worker.join().unwrap();
        assert_eq!(ran_on, worker_id);
    }

    #[test]
    fn test_dropped_command_disconnects_caller() {
        let link = RtLink::new(4);
        let receiver = link.attach().unwrap();
        let dropper = {
            let link = link.clone();
            std::thread::spawn(move || {
                while link.pending() == 0 {
                    std::thread::yield_now();
                }
                link.detach(&receiver, false);
            })
        };
        let result = link.call_sync(|| 1);
        dropper.join().unwrap();
        assert!(matches!(result, Err(RealtimeError::Disconnected)));
        assert!(!link.is_running());
    }
}
