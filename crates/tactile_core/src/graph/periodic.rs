//! # Periodic Sweep
//!
//! Once per scene-graph iteration every field with a [`PeriodicPolicy`]
//! is brought up to date if its policy says so. Pending fields that
//! nobody reads still get recomputed, and thread-safe fields pull what
//! the real-time thread wrote.

use std::time::Instant;

use super::FieldGraph;
use crate::error::FieldResult;
use crate::field::{FieldId, PeriodicPolicy};

impl FieldGraph {
    /// Adds a field to the sweep, replaces its policy, or removes it
    /// with `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if the field was removed.
    pub fn set_periodic(&mut self, id: FieldId, policy: Option<PeriodicPolicy>) -> FieldResult<()> {
        let record = self.record_mut(id)?;
        let was_member = record.periodic.is_some();
        record.periodic = policy;
        match (was_member, policy.is_some()) {
            (false, true) => self.sweep_set.push(id),
            (true, false) => self.sweep_set.retain(|&member| member != id),
            _ => {}
        }
        Ok(())
    }

    /// Number of fields in the sweep.
    #[must_use]
    pub fn sweep_len(&self) -> usize {
        self.sweep_set.len()
    }

    /// Brings every due member of the sweep up to date.
    ///
    /// Returns the number of recomputations and real-time pulls the
    /// sweep performed, including those of inputs pulled in on the way.
    ///
    /// # Panics
    ///
    /// Panics when called from the real-time thread.
    pub fn sweep(&mut self) -> usize {
        super::assert_main_thread();
        let now = Instant::now();
        let before = self.stats.updates + self.stats.transfers;

        let mut index = 0;
        while let Some(&id) = self.sweep_set.get(index) {
            index += 1;
            let due = self
                .fields
                .get_mut(id.index(), id.generation())
                .and_then(|record| record.periodic.as_mut())
                .is_some_and(|policy| policy.time_to_update(now));
            if due {
                self.refresh(id);
            }
        }

        let performed = (self.stats.updates + self.stats.transfers) - before;
        tracing::trace!(performed, members = self.sweep_set.len(), "sweep done");
        usize::try_from(performed).unwrap_or(usize::MAX)
    }
}
