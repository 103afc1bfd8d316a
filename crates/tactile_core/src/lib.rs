//! # TACTILE Core
//!
//! Field/Route dataflow engine shared by every scene-graph node, and the
//! protocol that lets a hard-real-time device thread exchange field
//! values with the single-threaded scene graph.
//!
//! ## Architecture Rules
//!
//! 1. **Push for notification, pull for computation** - events only mark
//!    fields pending, values are recomputed when read or swept
//! 2. **Arena, not pointers** - fields and nodes live in a [`FieldGraph`]
//!    and routes are index lists, so cycles need no ownership tricks
//! 3. **One writer per buffer** - the main thread owns field values, the
//!    real-time thread owns its copies, transfers run synchronously on
//!    the real-time thread
//!
//! ## Example
//!
//! ```rust,ignore
//! use tactile_core::{compute, input, FieldDef, FieldGraph};
//!
//! let mut graph = FieldGraph::new();
//! let a = graph.add_field(FieldDef::new("a"), 2.0f64)?;
//! let b = graph.add_field(FieldDef::new("b"), 3.0f64)?;
//! let product = compute(|inputs| Some(input::<f64>(inputs, 0)? * input::<f64>(inputs, 1)?));
//! let f = graph.add_field(FieldDef::new("f").updater(product), 0.0f64)?;
//! graph.route(a, f)?;
//! graph.route(b, f)?;
//! graph.set_value(a, 5.0f64)?;
//! assert_eq!(graph.get_value::<f64>(f)?, 15.0);
//! ```

#![deny(unsafe_code)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod error;
pub mod field;
pub mod graph;
pub mod math;
pub mod sync;

pub use error::{FieldError, FieldResult, RealtimeError};
pub use field::{
    compute, input, AccessType, Caller, Compute, FieldDef, FieldId, FieldValue, PeriodKind,
    PeriodicPolicy, Updatable,
};
pub use graph::{FieldGraph, GraphStats, NodeId};
pub use math::{Matrix3, Matrix4, Rotation, Vec3};
pub use sync::{
    in_realtime_thread, CallbackCode, RealtimeConfig, RealtimeTask, RealtimeThread, RtLink,
    RtMField, RtRefSField, RtSField, ThreadSafeMField, ThreadSafeRefSField, ThreadSafeSField,
    TickInfo, TickLoop, TickStats,
};
