//! # Routes and Events
//!
//! Route editing and event propagation.
//!
//! Every event gets a stamp from the graph clock. A field takes an event
//! only if the stamp is newer than the last one it saw, so flooding stops
//! on cycles and a later event still reaches a field that is already
//! pending. Propagation uses an explicit stack, never recursion.

use super::FieldGraph;
use crate::error::{FieldError, FieldResult};
use crate::field::{AccessType, Caller, FieldId};

impl FieldGraph {
    /// Routes `from` into `to` and sends an initial event along the new
    /// route so `to` synchronizes with `from`.
    ///
    /// Routing an already routed pair does nothing.
    ///
    /// # Errors
    ///
    /// Returns an error on stale handles, access-type violations, or when
    /// `to` copies its source (no update function) and the element types
    /// differ.
    pub fn route(&mut self, from: FieldId, to: FieldId) -> FieldResult<()> {
        self.link(Caller::External, from, to, true)
    }

    /// Like [`Self::route`] without the initial event.
    ///
    /// # Errors
    ///
    /// See [`Self::route`].
    pub fn route_no_event(&mut self, from: FieldId, to: FieldId) -> FieldResult<()> {
        self.link(Caller::External, from, to, false)
    }

    /// [`Self::route`] on behalf of `caller`.
    ///
    /// # Errors
    ///
    /// See [`Self::route`].
    pub fn route_as(&mut self, caller: Caller, from: FieldId, to: FieldId) -> FieldResult<()> {
        self.link(caller, from, to, true)
    }

    /// [`Self::route_no_event`] on behalf of `caller`.
    ///
    /// # Errors
    ///
    /// See [`Self::route`].
    pub fn route_no_event_as(
        &mut self,
        caller: Caller,
        from: FieldId,
        to: FieldId,
    ) -> FieldResult<()> {
        self.link(caller, from, to, false)
    }

    /// Removes the route from `from` to `to`. Returns false if there was
    /// none.
    ///
    /// If `to` is pending because of an event from `from`, it is no
    /// longer pending afterwards.
    ///
    /// # Errors
    ///
    /// Returns an error if either field was removed.
    pub fn unroute(&mut self, from: FieldId, to: FieldId) -> FieldResult<bool> {
        self.record(from)?;
        self.record(to)?;
        let removed = self.detach(from, to);
        if removed {
            tracing::trace!(from = ?from, to = ?to, "route removed");
        }
        Ok(removed)
    }

    /// Replaces the `index`-th route into `to` with a route from `from`,
    /// then sends an initial event. Returns the field that was detached.
    ///
    /// An out-of-range index appends the route instead and returns `None`.
    /// If `from` is already routed to `to`, nothing changes.
    ///
    /// # Errors
    ///
    /// See [`Self::route`].
    pub fn replace_route(
        &mut self,
        from: FieldId,
        to: FieldId,
        index: usize,
    ) -> FieldResult<Option<FieldId>> {
        self.replace(Caller::External, from, to, index, true)
    }

    /// Like [`Self::replace_route`] without the initial event.
    ///
    /// # Errors
    ///
    /// See [`Self::route`].
    pub fn replace_route_no_event(
        &mut self,
        from: FieldId,
        to: FieldId,
        index: usize,
    ) -> FieldResult<Option<FieldId>> {
        self.replace(Caller::External, from, to, index, false)
    }

    /// Sends an event to every dependent without changing the value.
    ///
    /// Use it after mutating something a field refers to out of band.
    ///
    /// # Errors
    ///
    /// Returns an error if the field was removed.
    ///
    /// # Panics
    ///
    /// Panics when called from the real-time thread.
    pub fn touch(&mut self, id: FieldId) -> FieldResult<()> {
        super::assert_main_thread();
        self.record(id)?;
        self.fire(id);
        Ok(())
    }

    fn link(&mut self, caller: Caller, from: FieldId, to: FieldId, event: bool) -> FieldResult<()> {
        super::assert_main_thread();
        self.check_route(caller, from, to)?;
        if self.record(from)?.routes_out.contains(&to) {
            return Ok(());
        }
        self.record_mut(from)?.routes_out.push(to);
        self.record_mut(to)?.routes_in.push(from);
        tracing::trace!(from = ?from, to = ?to, "route added");
        if event {
            self.fire_along(from, to);
        }
        Ok(())
    }

    fn replace(
        &mut self,
        caller: Caller,
        from: FieldId,
        to: FieldId,
        index: usize,
        event: bool,
    ) -> FieldResult<Option<FieldId>> {
        super::assert_main_thread();
        self.check_route(caller, from, to)?;
        if self.record(from)?.routes_out.contains(&to) {
            return Ok(None);
        }

        let target = self.record_mut(to)?;
        let old = target.routes_in.get(index).copied();
        match old {
            Some(old) => {
                target.routes_in[index] = from;
                if target.event.source == Some(old) {
                    target.event.source = None;
                    target.event.pending = false;
                }
                if let Some(record) = self.fields.get_mut(old.index(), old.generation()) {
                    if let Some(position) = record.routes_out.iter().position(|&out| out == to) {
                        record.routes_out.remove(position);
                    }
                }
            }
            None => target.routes_in.push(from),
        }
        self.record_mut(from)?.routes_out.push(to);
        tracing::trace!(from = ?from, to = ?to, replaced = ?old, "route replaced");

        if event {
            self.fire_along(from, to);
        }
        Ok(old)
    }

    fn check_route(&self, caller: Caller, from: FieldId, to: FieldId) -> FieldResult<()> {
        if let Some((owner, AccessType::InputOnly)) = self.checked_access(from)? {
            if caller != Caller::Node(owner) {
                return Err(self.access_error(from, AccessType::InputOnly, "route from"));
            }
        }
        if let Some((owner, access @ (AccessType::InitializeOnly | AccessType::OutputOnly))) =
            self.checked_access(to)?
        {
            if caller != Caller::Node(owner) {
                return Err(self.access_error(to, access, "route to"));
            }
        }

        let source = self.record(from)?;
        let target = self.record(to)?;
        if target.updater.is_none() && !source.value.same_type(target.value.as_ref()) {
            return Err(FieldError::TypeMismatch {
                field: self.display_name(to),
                expected: target.value.type_name(),
                found: source.value.type_name(),
            });
        }
        Ok(())
    }

    /// Removes one route edge from both endpoints. Returns true if the
    /// edge existed.
    pub(super) fn detach(&mut self, from: FieldId, to: FieldId) -> bool {
        let mut removed = false;
        if let Some(record) = self.fields.get_mut(from.index(), from.generation()) {
            if let Some(position) = record.routes_out.iter().position(|&out| out == to) {
                record.routes_out.remove(position);
                removed = true;
            }
        }
        if let Some(record) = self.fields.get_mut(to.index(), to.generation()) {
            if let Some(position) = record.routes_in.iter().position(|&input| input == from) {
                record.routes_in.remove(position);
            }
            if record.event.source == Some(from) {
                record.event.source = None;
                record.event.pending = false;
            }
        }
        removed
    }

    fn next_stamp(&mut self) -> u64 {
        self.clock += 1;
        self.stats.events += 1;
        self.clock
    }

    /// Starts an event at `origin` and floods it along all routes-out.
    pub(super) fn fire(&mut self, origin: FieldId) {
        let stamp = self.next_stamp();
        let Some(record) = self.fields.get_mut(origin.index(), origin.generation()) else {
            return;
        };
        record.event.stamp = stamp;
        let targets = record.routes_out.clone();
        self.propagate(origin, stamp, &targets);
    }

    /// Starts an event at `origin` that enters the graph through one route.
    fn fire_along(&mut self, origin: FieldId, target: FieldId) {
        let stamp = self.next_stamp();
        if let Some(record) = self.fields.get_mut(origin.index(), origin.generation()) {
            record.event.stamp = stamp;
        }
        self.propagate(origin, stamp, &[target]);
    }

    fn propagate(&mut self, origin: FieldId, stamp: u64, targets: &[FieldId]) {
        let mut stack: Vec<(FieldId, FieldId)> =
            targets.iter().rev().map(|&target| (target, origin)).collect();

        while let Some((target, source)) = stack.pop() {
            let Some(record) = self.fields.get_mut(target.index(), target.generation()) else {
                continue;
            };
            if record.event.stamp >= stamp {
                continue;
            }
            record.event.stamp = stamp;
            record.event.source = Some(source);
            record.event.pending = true;
            self.stats.notifications += 1;
            stack.extend(record.routes_out.iter().rev().map(|&next| (next, target)));
        }
    }
}
