//! # Fields
//!
//! A field is one typed, named slot of state owned by a node:
//! - a cached value (`Box<dyn FieldValue>`)
//! - an access type restricting external callers
//! - routes in and out (stored in the graph, see [`crate::graph`])
//! - an optional update function and periodic policy
//!
//! Fields live in the arena of a [`crate::FieldGraph`] and are addressed
//! by [`FieldId`] handles.

mod value;

pub use value::{compute, input, Compute, FieldValue, Updatable};

use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::graph::NodeId;
use crate::sync::RealtimeMirror;

/// Handle to a field in a [`crate::FieldGraph`].
///
/// The ID is split into two parts:
/// - Lower 32 bits: Index into the field arena
/// - Upper 32 bits: Generation counter for detecting stale handles
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct FieldId(u64);

impl FieldId {
    /// Creates a field ID from index and generation.
    #[inline]
    #[must_use]
    pub const fn new(index: u32, generation: u32) -> Self {
        Self(((generation as u64) << 32) | (index as u64))
    }

    /// Returns the arena index.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn index(self) -> u32 {
        self.0 as u32
    }

    /// Returns the generation.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }
}

impl fmt::Debug for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FieldId({}v{})", self.index(), self.generation())
    }
}

/// Who may read, write and route a field from outside its owner node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AccessType {
    /// Settable until the owner is initialized; not routable into.
    InitializeOnly,
    /// Write-only from outside; cannot be routed from.
    InputOnly,
    /// Read-only from outside; cannot be set or routed into.
    OutputOnly,
    /// No restrictions.
    InputOutput,
}

impl fmt::Display for AccessType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::InitializeOnly => "initializeOnly",
            Self::InputOnly => "inputOnly",
            Self::OutputOnly => "outputOnly",
            Self::InputOutput => "inputOutput",
        };
        f.write_str(name)
    }
}

/// Identity of whoever calls into the graph.
///
/// The owner node of a field is exempt from its access type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Caller {
    /// Code outside every node: parsers, scripts, tests.
    External,
    /// A node acting on fields (its own or others').
    Node(NodeId),
}

/// How often the periodic sweep brings a field up to date.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PeriodKind {
    /// Every n+1-th sweep (0 = every sweep).
    Count(u32),
    /// When at least this much time passed since the last up-to-date.
    Time(Duration),
}

/// Lazy-recompute policy attached to a field that joins the periodic sweep.
#[derive(Clone, Copy, Debug)]
pub struct PeriodicPolicy {
    kind: PeriodKind,
    counter: u32,
    last_up_to_date: Option<Instant>,
}

impl PeriodicPolicy {
    /// Creates a policy of the given kind.
    #[must_use]
    pub const fn new(kind: PeriodKind) -> Self {
        Self {
            kind,
            counter: 0,
            last_up_to_date: None,
        }
    }

    /// Swept on every scene-graph iteration.
    #[must_use]
    pub const fn every_iteration() -> Self {
        Self::new(PeriodKind::Count(0))
    }

    /// Returns the period kind.
    #[inline]
    #[must_use]
    pub const fn kind(&self) -> PeriodKind {
        self.kind
    }

    /// Changes the period.
    pub fn set_kind(&mut self, kind: PeriodKind) {
        self.kind = kind;
        self.counter = 0;
    }

    /// Returns true if the sweep should update the field now.
    ///
    /// Counting policies advance their counter on every call.
    pub fn time_to_update(&mut self, now: Instant) -> bool {
        match self.kind {
            PeriodKind::Count(period) => {
                if self.counter >= period {
                    self.counter = 0;
                    true
                } else {
                    self.counter += 1;
                    false
                }
            }
            PeriodKind::Time(period) => self
                .last_up_to_date
                .map_or(true, |last| now.duration_since(last) >= period),
        }
    }

    pub(crate) fn mark_up_to_date(&mut self, now: Instant) {
        self.last_up_to_date = Some(now);
    }
}

impl Default for PeriodicPolicy {
    fn default() -> Self {
        Self::every_iteration()
    }
}

/// Declaration of a field, consumed by [`crate::FieldGraph::add_field`].
pub struct FieldDef {
    pub(crate) name: String,
    pub(crate) access: AccessType,
    pub(crate) owner: Option<NodeId>,
    pub(crate) updater: Option<Box<dyn Updatable>>,
    pub(crate) periodic: Option<PeriodicPolicy>,
    pub(crate) mirror: Option<Box<dyn RealtimeMirror>>,
}

impl FieldDef {
    /// A free-standing INPUT_OUTPUT field with default update.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            access: AccessType::InputOutput,
            owner: None,
            updater: None,
            periodic: None,
            mirror: None,
        }
    }

    /// Sets the access type.
    #[must_use]
    pub fn access(mut self, access: AccessType) -> Self {
        self.access = access;
        self
    }

    /// Attaches the field to an owner node.
    #[must_use]
    pub fn owner(mut self, node: NodeId) -> Self {
        self.owner = Some(node);
        self
    }

    /// Replaces the default update (copy from event source).
    #[must_use]
    pub fn updater(mut self, updater: impl Updatable + 'static) -> Self {
        self.updater = Some(Box::new(updater));
        self
    }

    /// Makes the field part of the periodic sweep.
    #[must_use]
    pub fn periodic(mut self, policy: PeriodicPolicy) -> Self {
        self.periodic = Some(policy);
        self
    }

    pub(crate) fn mirror(mut self, mirror: Box<dyn RealtimeMirror>) -> Self {
        self.mirror = Some(mirror);
        self
    }
}

impl fmt::Debug for FieldDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldDef")
            .field("name", &self.name)
            .field("access", &self.access)
            .field("owner", &self.owner)
            .field("has_updater", &self.updater.is_some())
            .field("periodic", &self.periodic)
            .field("thread_safe", &self.mirror.is_some())
            .finish_non_exhaustive()
    }
}
