//! # Engine Error Types
//!
//! Errors that ordinary dataflow can report. Cross-thread misuse is not in
//! here: it is a wiring bug and panics instead.

use thiserror::Error;

use crate::field::{AccessType, FieldId};
use crate::graph::NodeId;

/// Errors that can occur while reading, writing or routing fields.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FieldError {
    /// The field handle refers to a removed field.
    #[error("stale field handle {0:?}")]
    StaleField(FieldId),

    /// The node handle refers to a removed node.
    #[error("stale node handle {0:?}")]
    StaleNode(NodeId),

    /// Lookup by name failed.
    #[error("node {node} has no field named {name}")]
    UnknownField {
        /// Name of the node that was searched.
        node: String,
        /// The requested field name.
        name: String,
    },

    /// The caller is not allowed to perform the operation on this field.
    #[error("cannot {operation} {access} field {field}")]
    Access {
        /// Full name of the field.
        field: String,
        /// The field's access type.
        access: AccessType,
        /// What was attempted ("set", "get", "route from", "route to").
        operation: &'static str,
    },

    /// An INITIALIZE_ONLY field was written after its node was initialized.
    #[error("cannot set initializeOnly field {0} after initialization")]
    AlreadyInitialized(String),

    /// The stored element type differs from the requested one.
    #[error("type mismatch on {field}: expected {expected}, found {found}")]
    TypeMismatch {
        /// Full name of the field.
        field: String,
        /// Requested element type.
        expected: &'static str,
        /// Stored element type.
        found: &'static str,
    },
}

/// Result type for field operations.
pub type FieldResult<T> = Result<T, FieldError>;

/// Errors from the real-time thread and its link.
#[derive(Error, Debug)]
pub enum RealtimeError {
    /// The OS refused to create the thread.
    #[error("failed to spawn real-time thread {name}: {source}")]
    Spawn {
        /// Thread name.
        name: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A thread is already attached to this link.
    #[error("real-time thread already running on this link")]
    AlreadyRunning,

    /// The link's command receiver is gone (a previous thread panicked).
    #[error("real-time link disconnected")]
    Disconnected,

    /// The thread panicked; its task is lost.
    #[error("real-time thread {0} panicked")]
    Panicked(String),
}
