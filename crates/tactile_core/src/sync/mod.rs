//! # Cross-Thread Synchronization
//!
//! Two roles share field state:
//!
//! ```text
//! Main thread (scene graph, ~60 Hz)      Real-time thread (device, 1 kHz)
//!   FieldGraph: canonical `value`          rt_value copies
//!          │                                      ▲
//!          │  call_sync(closure) ──── channel ────┤ runs at top of tick
//!          │◄──────────── reply (rendezvous) ─────┘
//! ```
//!
//! - `value` is only touched by the main thread, `rt_value` only by the
//!   real-time thread
//! - transfers are closures the main thread sends over an [`RtLink`] and
//!   blocks on; the real-time thread runs them between ticks, so it is
//!   never mid-tick while a copy happens
//! - the real-time thread never waits for the main thread
//!
//! Thread identity is a thread-local flag set by [`RealtimeThread`] and
//! only used for contract assertions.

mod link;
mod realtime;
mod thread_safe;
mod tick;

use std::cell::Cell;

pub use link::RtLink;
pub use realtime::{CallbackCode, RealtimeConfig, RealtimeTask, RealtimeThread, TickInfo};
pub use thread_safe::{
    RtMField, RtRefSField, RtSField, ThreadSafeMField, ThreadSafeRefSField, ThreadSafeSField,
};
pub use tick::{TickLoop, TickStats};

use crate::field::FieldValue;

thread_local! {
    static IN_REALTIME: Cell<bool> = const { Cell::new(false) };
}

/// Returns true on a thread started by [`RealtimeThread`].
#[inline]
#[must_use]
pub fn in_realtime_thread() -> bool {
    IN_REALTIME.with(Cell::get)
}

fn mark_realtime_thread() {
    IN_REALTIME.with(|flag| flag.set(true));
}

/// Real-time side of a thread-safe field, driven by the graph.
///
/// `push` runs after the main-thread value changed, `pull` when the field
/// is brought up to date. Both are main-thread calls.
pub(crate) trait RealtimeMirror: Send {
    /// Copies the canonical value to the real-time side.
    fn push(&self, value: &dyn FieldValue);
    /// Takes the value the real-time thread wrote since the last transfer.
    fn pull(&self) -> Option<Box<dyn FieldValue>>;
}
