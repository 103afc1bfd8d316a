//! # Thread-Safe Fields
//!
//! A thread-safe field keeps its canonical value in the [`FieldGraph`]
//! (main thread) and a second copy, `rt_value`, for the real-time thread.
//!
//! | operation              | thread    | effect                                           |
//! |------------------------|-----------|--------------------------------------------------|
//! | main `set`             | main      | store in graph, `call_sync` copy to `rt_value`   |
//! | real-time `set`        | real-time | store in `rt_value`, raise the changed flag      |
//! | main `up_to_date`      | main      | if changed: `call_sync` copy back, start event   |
//! | real-time `get`        | real-time | read `rt_value`                                  |
//!
//! A main-thread write clears a pending real-time change: the latest write
//! wins. Fields join the periodic sweep (every iteration) unless the
//! definition says otherwise, so real-time writes reach the scene graph
//! once per scene-graph iteration even if nobody reads them.
//!
//! The locks around `rt_value` are uncontended by protocol: transfers run
//! on the real-time thread, between its ticks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use super::{in_realtime_thread, RealtimeMirror, RtLink};
use crate::error::FieldResult;
use crate::field::{Caller, FieldDef, FieldId, FieldValue, PeriodicPolicy};
use crate::graph::FieldGraph;

#[track_caller]
fn assert_realtime_side(link: &RtLink) {
    assert!(
        in_realtime_thread() || !link.is_running(),
        "real-time field handle used outside the real-time thread"
    );
}

fn with_sweep(def: FieldDef) -> FieldDef {
    if def.periodic.is_some() {
        def
    } else {
        def.periodic(PeriodicPolicy::every_iteration())
    }
}

// ----------------------------------------------------------------------
// Transfer cells
// ----------------------------------------------------------------------

/// Which thread wrote a real-time copy, recorded in unit tests only.
#[derive(Default)]
struct WriteLog {
    #[cfg(test)]
    on_realtime_thread: Mutex<Vec<bool>>,
}

impl WriteLog {
    #[inline]
    #[cfg_attr(not(test), allow(clippy::unused_self))]
    fn record(&self) {
        #[cfg(test)]
        self.on_realtime_thread.lock().push(in_realtime_thread());
    }
}

/// Storage for the real-time copy of a field.
trait RtCell: Send + Sync + 'static {
    type Value: FieldValue + Clone;

    fn store(&self, value: Self::Value);
    fn load(&self) -> Self::Value;
    fn changed(&self) -> &AtomicBool;
}

struct ScalarCell<T> {
    value: Mutex<T>,
    changed: AtomicBool,
    writes: WriteLog,
}

impl<T: FieldValue + Clone> RtCell for ScalarCell<T> {
    type Value = T;

    fn store(&self, value: T) {
        self.writes.record();
        *self.value.lock() = value;
    }

    fn load(&self) -> T {
        self.value.lock().clone()
    }

    fn changed(&self) -> &AtomicBool {
        &self.changed
    }
}

struct SequenceCell<T> {
    values: RwLock<Vec<T>>,
    changed: AtomicBool,
    writes: WriteLog,
}

impl<T: FieldValue + Clone + Sync> RtCell for SequenceCell<T> {
    type Value = Vec<T>;

    fn store(&self, values: Vec<T>) {
        self.writes.record();
        *self.values.write() = values;
    }

    fn load(&self) -> Vec<T> {
        self.values.read().clone()
    }

    fn changed(&self) -> &AtomicBool {
        &self.changed
    }
}

struct Mirror<C> {
    name: String,
    cell: Arc<C>,
    link: RtLink,
}

impl<C: RtCell> RealtimeMirror for Mirror<C> {
    fn push(&self, value: &dyn FieldValue) {
        let Some(value) = value.downcast_ref::<C::Value>() else {
            return;
        };
        let value = value.clone();
        let cell = Arc::clone(&self.cell);
        let sent = self.link.call_sync(move || {
            cell.store(value);
            cell.changed().store(false, Ordering::Release);
        });
        if let Err(err) = sent {
            tracing::error!(field = %self.name, error = %err, "transfer to real-time thread failed");
        }
    }

    fn pull(&self) -> Option<Box<dyn FieldValue>> {
        if !self.cell.changed().load(Ordering::Acquire) {
            return None;
        }
        let cell = Arc::clone(&self.cell);
        let pulled = self.link.call_sync(move || {
            cell.changed().store(false, Ordering::Release);
            cell.load()
        });
        match pulled {
            Ok(value) => Some(Box::new(value)),
            Err(err) => {
                tracing::error!(field = %self.name, error = %err, "transfer from real-time thread failed");
                None
            }
        }
    }
}

fn register<C: RtCell>(
    graph: &mut FieldGraph,
    link: &RtLink,
    def: FieldDef,
    initial: C::Value,
    cell: Arc<C>,
) -> FieldResult<FieldId> {
    let mirror = Mirror {
        name: def.name.clone(),
        cell,
        link: link.clone(),
    };
    graph.add_field(with_sweep(def).mirror(Box::new(mirror)), initial)
}

// ----------------------------------------------------------------------
// Scalar
// ----------------------------------------------------------------------

/// Main-thread handle of a thread-safe single-value field.
pub struct ThreadSafeSField<T> {
    id: FieldId,
    cell: Arc<ScalarCell<T>>,
    link: RtLink,
}

impl<T: FieldValue + Clone> ThreadSafeSField<T> {
    /// Adds the field to `graph`, with its real-time copy on `link`'s thread.
    ///
    /// # Errors
    ///
    /// Returns an error if the declared owner node was removed.
    pub fn new(
        graph: &mut FieldGraph,
        link: &RtLink,
        def: FieldDef,
        initial: T,
    ) -> FieldResult<Self> {
        let cell = Arc::new(ScalarCell {
            value: Mutex::new(initial.clone()),
            changed: AtomicBool::new(false),
            writes: WriteLog::default(),
        });
        let id = register(graph, link, def, initial, Arc::clone(&cell))?;
        Ok(Self {
            id,
            cell,
            link: link.clone(),
        })
    }

    /// The field's handle in the graph.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> FieldId {
        self.id
    }

    /// Up-to-date main-thread value.
    ///
    /// # Errors
    ///
    /// See [`FieldGraph::get_value_as`].
    pub fn get(&self, graph: &mut FieldGraph) -> FieldResult<T> {
        graph.get_value(self.id)
    }

    /// [`Self::get`] on behalf of `caller`.
    ///
    /// # Errors
    ///
    /// See [`FieldGraph::get_value_as`].
    pub fn get_as(&self, graph: &mut FieldGraph, caller: Caller) -> FieldResult<T> {
        graph.get_value_as(caller, self.id)
    }

    /// Stores `value` and copies it to the real-time side before returning.
    ///
    /// # Errors
    ///
    /// See [`FieldGraph::set_value_as`].
    pub fn set(&self, graph: &mut FieldGraph, value: T) -> FieldResult<()> {
        graph.set_value(self.id, value)
    }

    /// [`Self::set`] on behalf of `caller`.
    ///
    /// # Errors
    ///
    /// See [`FieldGraph::set_value_as`].
    pub fn set_as(&self, graph: &mut FieldGraph, caller: Caller, value: T) -> FieldResult<()> {
        graph.set_value_as(caller, self.id, value)
    }

    /// Pulls a real-time write into the graph, or recomputes if pending.
    ///
    /// # Errors
    ///
    /// Returns an error if the field was removed.
    pub fn up_to_date(&self, graph: &mut FieldGraph) -> FieldResult<()> {
        graph.up_to_date(self.id)
    }

    /// Handle for the real-time thread.
    #[must_use]
    pub fn realtime(&self) -> RtSField<T> {
        RtSField {
            cell: Arc::clone(&self.cell),
            link: self.link.clone(),
        }
    }
}

impl<T> std::fmt::Debug for ThreadSafeSField<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadSafeSField")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// Real-time handle of a [`ThreadSafeSField`].
///
/// Usable only on the real-time thread, or from anywhere while no
/// real-time thread is running.
pub struct RtSField<T> {
    cell: Arc<ScalarCell<T>>,
    link: RtLink,
}

impl<T> Clone for RtSField<T> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
            link: self.link.clone(),
        }
    }
}

impl<T: FieldValue + Clone> RtSField<T> {
    /// Reads the real-time copy.
    ///
    /// # Panics
    ///
    /// Panics on the wrong thread.
    #[must_use]
    pub fn get(&self) -> T {
        assert_realtime_side(&self.link);
        self.cell.load()
    }

    /// Reads the real-time copy by reference.
    ///
    /// # Panics
    ///
    /// Panics on the wrong thread.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        assert_realtime_side(&self.link);
        f(&self.cell.value.lock())
    }

    /// Writes the real-time copy; the main thread pulls it on its next
    /// up-to-date.
    ///
    /// # Panics
    ///
    /// Panics on the wrong thread.
    pub fn set(&self, value: T) {
        assert_realtime_side(&self.link);
        self.cell.store(value);
        self.cell.changed.store(true, Ordering::Release);
    }

    /// True if a real-time write is waiting for the main thread.
    #[must_use]
    pub fn has_pending_change(&self) -> bool {
        self.cell.changed.load(Ordering::Acquire)
    }
}

impl<T> std::fmt::Debug for RtSField<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RtSField")
            .field("changed", &self.cell.changed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

// ----------------------------------------------------------------------
// Reference
// ----------------------------------------------------------------------

/// Main-thread handle of a thread-safe field holding a shared reference.
///
/// The real-time copy owns a reference too, so the object stays alive on
/// the real-time thread even after the main thread replaced it.
pub struct ThreadSafeRefSField<T> {
    inner: ThreadSafeSField<Option<Arc<T>>>,
}

impl<T> ThreadSafeRefSField<T>
where
    T: Send + Sync + std::fmt::Debug + 'static,
{
    /// Adds the field to `graph`.
    ///
    /// # Errors
    ///
    /// Returns an error if the declared owner node was removed.
    pub fn new(
        graph: &mut FieldGraph,
        link: &RtLink,
        def: FieldDef,
        initial: Option<Arc<T>>,
    ) -> FieldResult<Self> {
        Ok(Self {
            inner: ThreadSafeSField::new(graph, link, def, initial)?,
        })
    }

    /// The field's handle in the graph.
    #[must_use]
    pub const fn id(&self) -> FieldId {
        self.inner.id()
    }

    /// Up-to-date referenced object.
    ///
    /// # Errors
    ///
    /// See [`FieldGraph::get_value_as`].
    pub fn get(&self, graph: &mut FieldGraph) -> FieldResult<Option<Arc<T>>> {
        self.inner.get(graph)
    }

    /// Replaces the referenced object on both sides.
    ///
    /// # Errors
    ///
    /// See [`FieldGraph::set_value_as`].
    pub fn set(&self, graph: &mut FieldGraph, value: Option<Arc<T>>) -> FieldResult<()> {
        self.inner.set(graph, value)
    }

    /// Pulls a real-time write into the graph.
    ///
    /// # Errors
    ///
    /// Returns an error if the field was removed.
    pub fn up_to_date(&self, graph: &mut FieldGraph) -> FieldResult<()> {
        self.inner.up_to_date(graph)
    }

    /// Handle for the real-time thread.
    #[must_use]
    pub fn realtime(&self) -> RtRefSField<T> {
        RtRefSField {
            inner: self.inner.realtime(),
        }
    }
}

impl<T> std::fmt::Debug for ThreadSafeRefSField<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadSafeRefSField")
            .field("id", &self.inner.id)
            .finish_non_exhaustive()
    }
}

/// Real-time handle of a [`ThreadSafeRefSField`].
pub struct RtRefSField<T> {
    inner: RtSField<Option<Arc<T>>>,
}

impl<T> Clone for RtRefSField<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> RtRefSField<T>
where
    T: Send + Sync + std::fmt::Debug + 'static,
{
    /// The referenced object, kept alive by the returned `Arc`.
    ///
    /// # Panics
    ///
    /// Panics on the wrong thread.
    #[must_use]
    pub fn get(&self) -> Option<Arc<T>> {
        self.inner.get()
    }

    /// Replaces the referenced object on the real-time side.
    ///
    /// # Panics
    ///
    /// Panics on the wrong thread.
    pub fn set(&self, value: Option<Arc<T>>) {
        self.inner.set(value);
    }
}

// ----------------------------------------------------------------------
// Sequence
// ----------------------------------------------------------------------

/// Main-thread handle of a thread-safe multi-value field.
///
/// Every main-side mutation replaces the whole real-time copy through one
/// synchronous transfer.
pub struct ThreadSafeMField<T> {
    id: FieldId,
    cell: Arc<SequenceCell<T>>,
    link: RtLink,
}

impl<T: FieldValue + Clone + Sync> ThreadSafeMField<T> {
    /// Adds the field to `graph`.
    ///
    /// # Errors
    ///
    /// Returns an error if the declared owner node was removed.
    pub fn new(
        graph: &mut FieldGraph,
        link: &RtLink,
        def: FieldDef,
        initial: Vec<T>,
    ) -> FieldResult<Self> {
        let cell = Arc::new(SequenceCell {
            values: RwLock::new(initial.clone()),
            changed: AtomicBool::new(false),
            writes: WriteLog::default(),
        });
        let id = register(graph, link, def, initial, Arc::clone(&cell))?;
        Ok(Self {
            id,
            cell,
            link: link.clone(),
        })
    }

    /// The field's handle in the graph.
    #[must_use]
    pub const fn id(&self) -> FieldId {
        self.id
    }

    /// Up-to-date copy of all values.
    ///
    /// # Errors
    ///
    /// See [`FieldGraph::get_value_as`].
    pub fn get(&self, graph: &mut FieldGraph) -> FieldResult<Vec<T>> {
        graph.get_value(self.id)
    }

    /// Up-to-date value at `index`.
    ///
    /// # Errors
    ///
    /// See [`FieldGraph::get_value_as`].
    pub fn get_index(&self, graph: &mut FieldGraph, index: usize) -> FieldResult<Option<T>> {
        graph.with_value(self.id, |values: &Vec<T>| values.get(index).cloned())
    }

    /// Reads the up-to-date values by reference.
    ///
    /// # Errors
    ///
    /// See [`FieldGraph::get_value_as`].
    pub fn with<R>(&self, graph: &mut FieldGraph, f: impl FnOnce(&[T]) -> R) -> FieldResult<R> {
        graph.with_value(self.id, |values: &Vec<T>| f(values))
    }

    /// Number of values.
    ///
    /// # Errors
    ///
    /// See [`FieldGraph::get_value_as`].
    pub fn len(&self, graph: &mut FieldGraph) -> FieldResult<usize> {
        graph.with_value(self.id, Vec::<T>::len)
    }

    /// True if the field holds no values.
    ///
    /// # Errors
    ///
    /// See [`FieldGraph::get_value_as`].
    pub fn is_empty(&self, graph: &mut FieldGraph) -> FieldResult<bool> {
        Ok(self.len(graph)? == 0)
    }

    /// Replaces all values.
    ///
    /// # Errors
    ///
    /// See [`FieldGraph::set_value_as`].
    pub fn set(&self, graph: &mut FieldGraph, values: Vec<T>) -> FieldResult<()> {
        graph.set_value(self.id, values)
    }

    /// Replaces the value at `index`. Returns false (and changes nothing)
    /// if `index` is out of range.
    ///
    /// # Errors
    ///
    /// See [`FieldGraph::set_value_as`].
    pub fn set_index(&self, graph: &mut FieldGraph, index: usize, value: T) -> FieldResult<bool> {
        if index >= self.len(graph)? {
            return Ok(false);
        }
        graph.modify(self.id, |values: &mut Vec<T>| values[index] = value)?;
        Ok(true)
    }

    /// Appends a value.
    ///
    /// # Errors
    ///
    /// See [`FieldGraph::set_value_as`].
    pub fn push_back(&self, graph: &mut FieldGraph, value: T) -> FieldResult<()> {
        graph.modify(self.id, |values: &mut Vec<T>| values.push(value))
    }

    /// Removes the last value.
    ///
    /// # Errors
    ///
    /// See [`FieldGraph::set_value_as`].
    pub fn pop_back(&self, graph: &mut FieldGraph) -> FieldResult<Option<T>> {
        graph.modify(self.id, Vec::<T>::pop)
    }

    /// Exchanges the field's values with `other`.
    ///
    /// # Errors
    ///
    /// See [`FieldGraph::set_value_as`].
    pub fn swap(&self, graph: &mut FieldGraph, other: &mut Vec<T>) -> FieldResult<()> {
        graph.modify(self.id, |values: &mut Vec<T>| std::mem::swap(values, other))
    }

    /// Removes all values.
    ///
    /// # Errors
    ///
    /// See [`FieldGraph::set_value_as`].
    pub fn clear(&self, graph: &mut FieldGraph) -> FieldResult<()> {
        graph.modify(self.id, Vec::<T>::clear)
    }

    /// Pulls a real-time write into the graph.
    ///
    /// # Errors
    ///
    /// Returns an error if the field was removed.
    pub fn up_to_date(&self, graph: &mut FieldGraph) -> FieldResult<()> {
        graph.up_to_date(self.id)
    }

    /// Handle for the real-time thread.
    #[must_use]
    pub fn realtime(&self) -> RtMField<T> {
        RtMField {
            cell: Arc::clone(&self.cell),
            link: self.link.clone(),
        }
    }
}

impl<T> std::fmt::Debug for ThreadSafeMField<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadSafeMField")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// Real-time handle of a [`ThreadSafeMField`].
///
/// Each mutation holds the write lock for its whole duration, so readers
/// never see a half-applied `push_back` or `swap`.
pub struct RtMField<T> {
    cell: Arc<SequenceCell<T>>,
    link: RtLink,
}

impl<T> Clone for RtMField<T> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
            link: self.link.clone(),
        }
    }
}

impl<T: FieldValue + Clone + Sync> RtMField<T> {
    fn mutate<R>(&self, f: impl FnOnce(&mut Vec<T>) -> R) -> R {
        assert_realtime_side(&self.link);
        self.cell.writes.record();
        let result = f(&mut self.cell.values.write());
        self.cell.changed.store(true, Ordering::Release);
        result
    }

    /// Copy of all values.
    ///
    /// # Panics
    ///
    /// Panics on the wrong thread.
    #[must_use]
    pub fn get(&self) -> Vec<T> {
        assert_realtime_side(&self.link);
        self.cell.load()
    }

    /// Value at `index`.
    ///
    /// # Panics
    ///
    /// Panics on the wrong thread.
    #[must_use]
    pub fn get_index(&self, index: usize) -> Option<T> {
        assert_realtime_side(&self.link);
        self.cell.values.read().get(index).cloned()
    }

    /// Reads all values under the read lock.
    ///
    /// # Panics
    ///
    /// Panics on the wrong thread.
    pub fn with<R>(&self, f: impl FnOnce(&[T]) -> R) -> R {
        assert_realtime_side(&self.link);
        f(&self.cell.values.read())
    }

    /// Number of values.
    ///
    /// # Panics
    ///
    /// Panics on the wrong thread.
    #[must_use]
    pub fn len(&self) -> usize {
        assert_realtime_side(&self.link);
        self.cell.values.read().len()
    }

    /// True if there are no values.
    ///
    /// # Panics
    ///
    /// Panics on the wrong thread.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replaces all values.
    ///
    /// # Panics
    ///
    /// Panics on the wrong thread.
    pub fn set(&self, values: Vec<T>) {
        self.mutate(|current| *current = values);
    }

    /// Replaces the value at `index`; false if out of range.
    ///
    /// # Panics
    ///
    /// Panics on the wrong thread.
    pub fn set_index(&self, index: usize, value: T) -> bool {
        assert_realtime_side(&self.link);
        let mut values = self.cell.values.write();
        let Some(slot) = values.get_mut(index) else {
            return false;
        };
        self.cell.writes.record();
        *slot = value;
        self.cell.changed.store(true, Ordering::Release);
        true
    }

    /// Appends a value.
    ///
    /// # Panics
    ///
    /// Panics on the wrong thread.
    pub fn push_back(&self, value: T) {
        self.mutate(|values| values.push(value));
    }

    /// Removes the last value.
    ///
    /// # Panics
    ///
    /// Panics on the wrong thread.
    pub fn pop_back(&self) -> Option<T> {
        self.mutate(Vec::pop)
    }

    /// Exchanges the values with `other`.
    ///
    /// # Panics
    ///
    /// Panics on the wrong thread.
    pub fn swap(&self, other: &mut Vec<T>) {
        self.mutate(|values| std::mem::swap(values, other));
    }

    /// Removes all values.
    ///
    /// # Panics
    ///
    /// Panics on the wrong thread.
    pub fn clear(&self) {
        self.mutate(Vec::clear);
    }

    /// True if a real-time write is waiting for the main thread.
    #[must_use]
    pub fn has_pending_change(&self) -> bool {
        self.cell.changed.load(Ordering::Acquire)
    }
}
