//! # Field Graph
//!
//! Arena that owns every node and field of a scene graph, and the routes
//! between fields.
//!
//! ## Evaluation model
//!
//! Push for notification, pull for computation:
//! - `set_value` / `touch` stamp an event and flood it along routes-out,
//!   only marking fields as pending
//! - `get_value` / `up_to_date` recompute a pending field from its
//!   routes-in, once, no matter how many events arrived
//!
//! Routes are index lists on both endpoints, so cycles are plain index
//! references. Removing a field tears its routes down first.
//!
//! The graph belongs to the main thread. Calling into it from the
//! real-time thread panics.

mod arena;
mod periodic;
mod routes;

use std::any::type_name;
use std::fmt;
use std::time::Instant;

use crate::error::{FieldError, FieldResult};
use crate::field::{
    AccessType, Caller, FieldDef, FieldId, FieldValue, PeriodicPolicy, Updatable,
};
use crate::sync::{in_realtime_thread, RealtimeMirror};
use arena::Arena;

/// Handle to a node in a [`FieldGraph`].
///
/// Same layout as [`FieldId`]: index in the low 32 bits, generation in
/// the high 32 bits.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct NodeId(u64);

impl NodeId {
    /// Creates a node ID from index and generation.
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

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({}v{})", self.index(), self.generation())
    }
}

/// Counters accumulated over the lifetime of a graph.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GraphStats {
    /// Events started by `set_value`, `touch` and new routes.
    pub events: u64,
    /// Fields marked pending by event propagation.
    pub notifications: u64,
    /// Recomputations performed by `up_to_date`.
    pub updates: u64,
    /// Values pulled from the real-time side of thread-safe fields.
    pub transfers: u64,
}

#[derive(Clone, Copy, Debug, Default)]
struct Event {
    stamp: u64,
    source: Option<FieldId>,
    pending: bool,
}

struct FieldRecord {
    name: String,
    owner: Option<NodeId>,
    access: AccessType,
    access_check: bool,
    value: Box<dyn FieldValue>,
    event: Event,
    routes_in: Vec<FieldId>,
    routes_out: Vec<FieldId>,
    updater: Option<Box<dyn Updatable>>,
    periodic: Option<PeriodicPolicy>,
    mirror: Option<Box<dyn RealtimeMirror>>,
    updating: bool,
    update_count: u64,
}

struct NodeRecord {
    type_name: String,
    name: String,
    fields: Vec<FieldId>,
    initialized: bool,
}

/// A field locked for recomputation while its inputs are pulled.
struct PendingUpdate {
    id: FieldId,
    inputs: Vec<FieldId>,
    source: Option<FieldId>,
    updater: Option<Box<dyn Updatable>>,
    next: Box<dyn FieldValue>,
}

enum Pull {
    Visit(FieldId),
    Finish(PendingUpdate),
}

#[track_caller]
fn assert_main_thread() {
    assert!(
        !in_realtime_thread(),
        "field graph accessed from the real-time thread"
    );
}

/// Owner of all nodes, fields and routes of one scene graph.
pub struct FieldGraph {
    fields: Arena<FieldRecord>,
    nodes: Arena<NodeRecord>,
    clock: u64,
    sweep_set: Vec<FieldId>,
    stats: GraphStats,
}

impl FieldGraph {
    /// Creates an empty graph.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            fields: Arena::new(),
            nodes: Arena::new(),
            clock: 0,
            sweep_set: Vec::new(),
            stats: GraphStats {
                events: 0,
                notifications: 0,
                updates: 0,
                transfers: 0,
            },
        }
    }

    /// Number of live fields.
    #[must_use]
    pub const fn field_count(&self) -> usize {
        self.fields.len()
    }

    /// Number of live nodes.
    #[must_use]
    pub const fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Lifetime counters.
    #[must_use]
    pub const fn stats(&self) -> GraphStats {
        self.stats
    }

    // ------------------------------------------------------------------
    // Nodes
    // ------------------------------------------------------------------

    /// Registers a node. Its fields are added with [`FieldDef::owner`].
    pub fn add_node(&mut self, type_name: impl Into<String>, name: impl Into<String>) -> NodeId {
        let (index, generation) = self.nodes.insert(NodeRecord {
            type_name: type_name.into(),
            name: name.into(),
            fields: Vec::new(),
            initialized: false,
        });
        NodeId::new(index, generation)
    }

    /// Marks a node initialized. INITIALIZE_ONLY fields become read-only.
    ///
    /// # Errors
    ///
    /// Returns an error if the node was removed.
    pub fn initialize_node(&mut self, node: NodeId) -> FieldResult<()> {
        let record = self
            .nodes
            .get_mut(node.index(), node.generation())
            .ok_or(FieldError::StaleNode(node))?;
        record.initialized = true;
        Ok(())
    }

    /// Returns true if the node has been initialized.
    ///
    /// # Errors
    ///
    /// Returns an error if the node was removed.
    pub fn is_node_initialized(&self, node: NodeId) -> FieldResult<bool> {
        Ok(self.node(node)?.initialized)
    }

    /// Removes a node together with all of its fields and their routes.
    ///
    /// # Errors
    ///
    /// Returns an error if the node was already removed.
    pub fn remove_node(&mut self, node: NodeId) -> FieldResult<()> {
        let fields = self.node(node)?.fields.clone();
        for field in fields {
            self.remove_field(field)?;
        }
        self.nodes.remove(node.index(), node.generation());
        tracing::debug!(node = ?node, "node removed");
        Ok(())
    }

    /// Name the node was registered with.
    ///
    /// # Errors
    ///
    /// Returns an error if the node was removed.
    pub fn node_name(&self, node: NodeId) -> FieldResult<&str> {
        Ok(&self.node(node)?.name)
    }

    /// Type name the node was registered with.
    ///
    /// # Errors
    ///
    /// Returns an error if the node was removed.
    pub fn node_type_name(&self, node: NodeId) -> FieldResult<&str> {
        Ok(&self.node(node)?.type_name)
    }

    /// Looks up a field of `node` by name.
    ///
    /// This is the entry point parsers and scripts use to set initial
    /// values and install routes.
    ///
    /// # Errors
    ///
    /// Returns an error if the node was removed or has no such field.
    pub fn field_by_name(&self, node: NodeId, name: &str) -> FieldResult<FieldId> {
        let record = self.node(node)?;
        record
            .fields
            .iter()
            .copied()
            .find(|&id| self.record(id).is_ok_and(|field| field.name == name))
            .ok_or_else(|| FieldError::UnknownField {
                node: record.name.clone(),
                name: name.to_owned(),
            })
    }

    /// Names of the fields of `node`, in declaration order.
    ///
    /// # Errors
    ///
    /// Returns an error if the node was removed.
    pub fn node_field_names(&self, node: NodeId) -> FieldResult<Vec<&str>> {
        let record = self.node(node)?;
        Ok(record
            .fields
            .iter()
            .filter_map(|&id| self.record(id).ok())
            .map(|field| field.name.as_str())
            .collect())
    }

    // ------------------------------------------------------------------
    // Fields
    // ------------------------------------------------------------------

    /// Adds a field holding `initial`.
    ///
    /// # Errors
    ///
    /// Returns an error if the declared owner node was removed.
    pub fn add_field<T: FieldValue>(&mut self, def: FieldDef, initial: T) -> FieldResult<FieldId> {
        self.insert_field(def, Box::new(initial))
    }

    fn insert_field(&mut self, def: FieldDef, value: Box<dyn FieldValue>) -> FieldResult<FieldId> {
        if let Some(owner) = def.owner {
            self.node(owner)?;
        }
        let periodic = def.periodic.is_some();
        let (index, generation) = self.fields.insert(FieldRecord {
            name: def.name,
            owner: def.owner,
            access: def.access,
            access_check: true,
            value,
            event: Event::default(),
            routes_in: Vec::new(),
            routes_out: Vec::new(),
            updater: def.updater,
            periodic: def.periodic,
            mirror: def.mirror,
            updating: false,
            update_count: 0,
        });
        let id = FieldId::new(index, generation);
        if let Some(owner) = def.owner {
            if let Some(node) = self.nodes.get_mut(owner.index(), owner.generation()) {
                node.fields.push(id);
            }
        }
        if periodic {
            self.sweep_set.push(id);
        }
        Ok(id)
    }

    /// Removes a field after tearing down all of its routes.
    ///
    /// # Errors
    ///
    /// Returns an error if the field was already removed.
    pub fn remove_field(&mut self, id: FieldId) -> FieldResult<()> {
        let record = self.record(id)?;
        let outgoing = record.routes_out.clone();
        let incoming = record.routes_in.clone();
        let owner = record.owner;
        for to in outgoing {
            self.detach(id, to);
        }
        for from in incoming {
            self.detach(from, id);
        }
        self.sweep_set.retain(|&member| member != id);
        if let Some(owner) = owner {
            if let Some(node) = self.nodes.get_mut(owner.index(), owner.generation()) {
                node.fields.retain(|&field| field != id);
            }
        }
        self.fields.remove(id.index(), id.generation());
        Ok(())
    }

    /// Returns true if `id` refers to a live field.
    #[must_use]
    pub fn contains(&self, id: FieldId) -> bool {
        self.record(id).is_ok()
    }

    /// The field's own name.
    ///
    /// # Errors
    ///
    /// Returns an error if the field was removed.
    pub fn name(&self, id: FieldId) -> FieldResult<&str> {
        Ok(&self.record(id)?.name)
    }

    /// `Node.field` for owned fields, the bare name otherwise.
    ///
    /// # Errors
    ///
    /// Returns an error if the field was removed.
    pub fn full_name(&self, id: FieldId) -> FieldResult<String> {
        let record = self.record(id)?;
        Ok(match record.owner.and_then(|owner| self.node(owner).ok()) {
            Some(node) => format!("{}.{}", node.name, record.name),
            None => record.name.clone(),
        })
    }

    /// The field's access type.
    ///
    /// # Errors
    ///
    /// Returns an error if the field was removed.
    pub fn access_type(&self, id: FieldId) -> FieldResult<AccessType> {
        Ok(self.record(id)?.access)
    }

    /// The node owning the field, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the field was removed.
    pub fn owner(&self, id: FieldId) -> FieldResult<Option<NodeId>> {
        Ok(self.record(id)?.owner)
    }

    /// Enables or disables access-type checking for one field.
    ///
    /// # Errors
    ///
    /// Returns an error if the field was removed.
    pub fn set_access_check(&mut self, id: FieldId, enabled: bool) -> FieldResult<()> {
        self.record_mut(id)?.access_check = enabled;
        Ok(())
    }

    /// Fields this one notifies, in route order.
    ///
    /// # Errors
    ///
    /// Returns an error if the field was removed.
    pub fn routes_out(&self, id: FieldId) -> FieldResult<&[FieldId]> {
        Ok(&self.record(id)?.routes_out)
    }

    /// Fields notifying this one, in route order.
    ///
    /// # Errors
    ///
    /// Returns an error if the field was removed.
    pub fn routes_in(&self, id: FieldId) -> FieldResult<&[FieldId]> {
        Ok(&self.record(id)?.routes_in)
    }

    /// True if an event arrived since the last recomputation.
    ///
    /// # Errors
    ///
    /// Returns an error if the field was removed.
    pub fn is_pending(&self, id: FieldId) -> FieldResult<bool> {
        Ok(self.record(id)?.event.pending)
    }

    /// The upstream field whose event made this one pending.
    ///
    /// # Errors
    ///
    /// Returns an error if the field was removed.
    pub fn event_source(&self, id: FieldId) -> FieldResult<Option<FieldId>> {
        Ok(self.record(id)?.event.source)
    }

    /// How many times the field was recomputed.
    ///
    /// # Errors
    ///
    /// Returns an error if the field was removed.
    pub fn update_count(&self, id: FieldId) -> FieldResult<u64> {
        Ok(self.record(id)?.update_count)
    }

    // ------------------------------------------------------------------
    // Values
    // ------------------------------------------------------------------

    /// Sets the value as an external caller. See [`Self::set_value_as`].
    ///
    /// # Errors
    ///
    /// See [`Self::set_value_as`].
    pub fn set_value<T: FieldValue>(&mut self, id: FieldId, value: T) -> FieldResult<()> {
        self.set_value_as(Caller::External, id, value)
    }

    /// Stores `value`, clears the field's own pending state and sends an
    /// event to every field in its routes-out.
    ///
    /// # Errors
    ///
    /// Returns an error on access-type violations, stale handles and
    /// element type mismatches.
    ///
    /// # Panics
    ///
    /// Panics when called from the real-time thread.
    pub fn set_value_as<T: FieldValue>(
        &mut self,
        caller: Caller,
        id: FieldId,
        value: T,
    ) -> FieldResult<()> {
        self.modify_as(caller, id, |slot: &mut T| *slot = value)
    }

    /// Edits the value in place as an external caller.
    ///
    /// # Errors
    ///
    /// See [`Self::set_value_as`].
    pub fn modify<T: FieldValue, R>(
        &mut self,
        id: FieldId,
        f: impl FnOnce(&mut T) -> R,
    ) -> FieldResult<R> {
        self.modify_as(Caller::External, id, f)
    }

    /// Edits the value in place, then behaves like [`Self::set_value_as`].
    ///
    /// # Errors
    ///
    /// See [`Self::set_value_as`].
    ///
    /// # Panics
    ///
    /// Panics when called from the real-time thread.
    pub fn modify_as<T: FieldValue, R>(
        &mut self,
        caller: Caller,
        id: FieldId,
        f: impl FnOnce(&mut T) -> R,
    ) -> FieldResult<R> {
        assert_main_thread();
        self.check_set(caller, id)?;
        let record = self.record_mut(id)?;
        let result = record.value.downcast_mut::<T>().map(f);
        let Some(result) = result else {
            return Err(self.type_mismatch::<T>(id));
        };

        let record = self.record_mut(id)?;
        record.event.pending = false;
        record.event.source = None;
        if let Some(mirror) = record.mirror.as_ref() {
            mirror.push(record.value.as_ref());
        }
        self.fire(id);
        Ok(result)
    }

    /// Returns a clone of the up-to-date value, as an external caller.
    ///
    /// # Errors
    ///
    /// See [`Self::get_value_as`].
    pub fn get_value<T: FieldValue + Clone>(&mut self, id: FieldId) -> FieldResult<T> {
        self.get_value_as(Caller::External, id)
    }

    /// Brings the field up to date and returns a clone of its value.
    ///
    /// # Errors
    ///
    /// Returns an error on access-type violations, stale handles and
    /// element type mismatches.
    ///
    /// # Panics
    ///
    /// Panics when called from the real-time thread.
    pub fn get_value_as<T: FieldValue + Clone>(
        &mut self,
        caller: Caller,
        id: FieldId,
    ) -> FieldResult<T> {
        self.with_value_as(caller, id, T::clone)
    }

    /// Reads the up-to-date value by reference, as an external caller.
    ///
    /// # Errors
    ///
    /// See [`Self::get_value_as`].
    pub fn with_value<T: FieldValue, R>(
        &mut self,
        id: FieldId,
        f: impl FnOnce(&T) -> R,
    ) -> FieldResult<R> {
        self.with_value_as(Caller::External, id, f)
    }

    /// Brings the field up to date and passes its value to `f`.
    ///
    /// # Errors
    ///
    /// See [`Self::get_value_as`].
    ///
    /// # Panics
    ///
    /// Panics when called from the real-time thread.
    pub fn with_value_as<T: FieldValue, R>(
        &mut self,
        caller: Caller,
        id: FieldId,
        f: impl FnOnce(&T) -> R,
    ) -> FieldResult<R> {
        assert_main_thread();
        self.check_get(caller, id)?;
        self.refresh(id);
        let record = self.record(id)?;
        record
            .value
            .downcast_ref::<T>()
            .map(f)
            .ok_or_else(|| self.type_mismatch::<T>(id))
    }

    /// Recomputes the field if an event is pending. Thread-safe fields
    /// first pull a value written on the real-time side.
    ///
    /// # Errors
    ///
    /// Returns an error if the field was removed.
    ///
    /// # Panics
    ///
    /// Panics when called from the real-time thread.
    pub fn up_to_date(&mut self, id: FieldId) -> FieldResult<()> {
        assert_main_thread();
        self.record(id)?;
        self.refresh(id);
        Ok(())
    }

    /// Brings `id` up to date, pulling pending inputs first.
    ///
    /// Post-order walk on an explicit stack: a field is visited, its
    /// inputs are pushed above it, and it is recomputed once they are
    /// done. Fields already updating are skipped, so cycles read the
    /// cached value.
    fn refresh(&mut self, id: FieldId) {
        let now = Instant::now();
        let mut stack = vec![Pull::Visit(id)];
        while let Some(step) = stack.pop() {
            match step {
                Pull::Visit(id) => {
                    let Some(update) = self.begin_update(id, now) else {
                        continue;
                    };
                    let inputs: Vec<Pull> = update
                        .inputs
                        .iter()
                        .rev()
                        .filter(|&&input| input != id)
                        .map(|&input| Pull::Visit(input))
                        .collect();
                    stack.push(Pull::Finish(update));
                    stack.extend(inputs);
                }
                Pull::Finish(update) => self.finish_update(update),
            }
        }
    }

    /// Pulls a pending real-time value, or locks a pending field for
    /// recomputation. `None` when there is nothing to recompute.
    fn begin_update(&mut self, id: FieldId, now: Instant) -> Option<PendingUpdate> {
        let record = self.fields.get_mut(id.index(), id.generation())?;
        if let Some(policy) = record.periodic.as_mut() {
            policy.mark_up_to_date(now);
        }

        if let Some(pulled) = record.mirror.as_ref().and_then(|mirror| mirror.pull()) {
            if pulled.same_type(record.value.as_ref()) {
                record.value = pulled;
                record.event.pending = false;
                record.event.source = None;
                self.stats.transfers += 1;
                self.fire(id);
            } else {
                tracing::error!(
                    expected = record.value.type_name(),
                    found = pulled.type_name(),
                    "real-time value has the wrong type, dropped"
                );
            }
            return None;
        }

        if !record.event.pending || record.updating {
            return None;
        }
        record.updating = true;
        Some(PendingUpdate {
            id,
            inputs: record.routes_in.clone(),
            source: record.event.source,
            updater: record.updater.take(),
            next: record.value.as_ref().clone_box(),
        })
    }

    fn finish_update(&mut self, update: PendingUpdate) {
        let PendingUpdate {
            id,
            inputs,
            source,
            mut updater,
            mut next,
        } = update;

        match updater.as_mut() {
            Some(updater) => {
                let values: Vec<&dyn FieldValue> = inputs
                    .iter()
                    .filter_map(|&input| self.fields.get(input.index(), input.generation()))
                    .map(|input| input.value.as_ref())
                    .collect();
                updater.update(&values, next.as_mut());
            }
            None => {
                let copied = source
                    .and_then(|source| self.fields.get(source.index(), source.generation()))
                    .filter(|source| source.value.same_type(next.as_ref()))
                    .map(|source| source.value.as_ref().clone_box());
                if let Some(copied) = copied {
                    next = copied;
                }
            }
        }

        let Some(record) = self.fields.get_mut(id.index(), id.generation()) else {
            return;
        };
        record.value = next;
        record.updater = updater;
        record.updating = false;
        record.event.pending = false;
        record.event.source = None;
        record.update_count += 1;
        if let Some(mirror) = record.mirror.as_ref() {
            mirror.push(record.value.as_ref());
        }
        self.stats.updates += 1;
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn record(&self, id: FieldId) -> FieldResult<&FieldRecord> {
        self.fields
            .get(id.index(), id.generation())
            .ok_or(FieldError::StaleField(id))
    }

    fn record_mut(&mut self, id: FieldId) -> FieldResult<&mut FieldRecord> {
        self.fields
            .get_mut(id.index(), id.generation())
            .ok_or(FieldError::StaleField(id))
    }

    fn node(&self, id: NodeId) -> FieldResult<&NodeRecord> {
        self.nodes
            .get(id.index(), id.generation())
            .ok_or(FieldError::StaleNode(id))
    }

    fn display_name(&self, id: FieldId) -> String {
        self.full_name(id).unwrap_or_else(|_| format!("{id:?}"))
    }

    fn type_mismatch<T>(&self, id: FieldId) -> FieldError {
        FieldError::TypeMismatch {
            field: self.display_name(id),
            expected: type_name::<T>(),
            found: self
                .record(id)
                .map_or("<removed>", |record| record.value.type_name()),
        }
    }

    fn access_error(&self, id: FieldId, access: AccessType, operation: &'static str) -> FieldError {
        FieldError::Access {
            field: self.display_name(id),
            access,
            operation,
        }
    }

    /// Owner and access type of a field whose access is checked.
    fn checked_access(&self, id: FieldId) -> FieldResult<Option<(NodeId, AccessType)>> {
        let record = self.record(id)?;
        Ok(match record.owner {
            Some(owner) if record.access_check => Some((owner, record.access)),
            _ => None,
        })
    }

    fn check_set(&self, caller: Caller, id: FieldId) -> FieldResult<()> {
        let Some((owner, access)) = self.checked_access(id)? else {
            return Ok(());
        };
        match access {
            AccessType::InitializeOnly if self.node(owner).is_ok_and(|node| node.initialized) => {
                Err(FieldError::AlreadyInitialized(self.display_name(id)))
            }
            AccessType::OutputOnly if caller != Caller::Node(owner) => {
                Err(self.access_error(id, access, "set"))
            }
            _ => Ok(()),
        }
    }

    fn check_get(&self, caller: Caller, id: FieldId) -> FieldResult<()> {
        let Some((owner, access)) = self.checked_access(id)? else {
            return Ok(());
        };
        let routed = !self.record(id)?.routes_out.is_empty();
        if access == AccessType::InputOnly && caller != Caller::Node(owner) && !routed {
            return Err(self.access_error(id, access, "get"));
        }
        Ok(())
    }
}

impl Default for FieldGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for FieldGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldGraph")
            .field("nodes", &self.nodes.len())
            .field("fields", &self.fields.len())
            .field("clock", &self.clock)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}
