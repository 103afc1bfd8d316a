//! # Field Values
//!
//! Type-erased element storage for fields and the update-function trait.
//!
//! A field stores its cached value as `Box<dyn FieldValue>`. Any `Clone +
//! Debug + Send + 'static` type is a field value, so `bool`, `f32`,
//! `Vec<Vec3>` or `Option<Arc<T>>` all work without registration.

use std::any::Any;
use std::fmt;
use std::marker::PhantomData;

/// A value that can be held by a field.
pub trait FieldValue: Any + Send + fmt::Debug {
    /// Clones the value behind the trait object.
    fn clone_box(&self) -> Box<dyn FieldValue>;
    /// Upcast for downcasting.
    fn as_any(&self) -> &dyn Any;
    /// Mutable upcast for downcasting.
    fn as_any_mut(&mut self) -> &mut dyn Any;
    /// Name of the concrete element type, for diagnostics.
    fn type_name(&self) -> &'static str;
}

impl<T> FieldValue for T
where
    T: Any + Send + Clone + fmt::Debug,
{
    fn clone_box(&self) -> Box<dyn FieldValue> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

impl dyn FieldValue + '_ {
    /// Returns the value as `T` if that is its element type.
    #[inline]
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    /// Returns the value as `&mut T` if that is its element type.
    #[inline]
    pub fn downcast_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.as_any_mut().downcast_mut::<T>()
    }

    /// Returns true if both values have the same element type.
    #[inline]
    #[must_use]
    pub fn same_type(&self, other: &dyn FieldValue) -> bool {
        self.as_any().type_id() == other.as_any().type_id()
    }
}

/// Recomputes a field's value from the values of its routes-in.
///
/// `inputs` are in route order and have already been brought up to date.
/// `value` holds the previous cached value; leave it untouched to keep it.
pub trait Updatable: Send {
    /// Recomputes `value` from `inputs`.
    fn update(&mut self, inputs: &[&dyn FieldValue], value: &mut dyn FieldValue);
}

/// Update function built from a closure returning the new value.
///
/// Returning `None` keeps the previous value (e.g. while an input is
/// missing or has the wrong type).
pub struct Compute<T, F> {
    f: F,
    _marker: PhantomData<fn() -> T>,
}

impl<T, F> Updatable for Compute<T, F>
where
    T: FieldValue,
    F: FnMut(&[&dyn FieldValue]) -> Option<T> + Send,
{
    fn update(&mut self, inputs: &[&dyn FieldValue], value: &mut dyn FieldValue) {
        if let Some(next) = (self.f)(inputs) {
            if let Some(slot) = value.downcast_mut::<T>() {
                *slot = next;
            }
        }
    }
}

/// Builds an update function from a closure.
///
/// ```rust,ignore
/// let product = compute(|inputs| Some(input::<f64>(inputs, 0)? * input::<f64>(inputs, 1)?));
/// ```
pub fn compute<T, F>(f: F) -> Compute<T, F>
where
    T: FieldValue,
    F: FnMut(&[&dyn FieldValue]) -> Option<T> + Send,
{
    Compute {
        f,
        _marker: PhantomData,
    }
}

/// Downcasts the `index`-th update input.
#[inline]
#[must_use]
pub fn input<'a, T: Any>(inputs: &[&'a dyn FieldValue], index: usize) -> Option<&'a T> {
    inputs.get(index)?.downcast_ref::<T>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downcast() {
        let value: Box<dyn FieldValue> = Box::new(2.5f64);
        assert_eq!(value.downcast_ref::<f64>(), Some(&2.5));
        assert!(value.downcast_ref::<f32>().is_none());
        assert!(value.type_name().contains("f64"));
    }

    #[test]
    fn test_clone_box_keeps_type() {
        let value: Box<dyn FieldValue> = Box::new(vec![1i32, 2, 3]);
        let copy = value.as_ref().clone_box();
        assert!(copy.same_type(value.as_ref()));
        assert_eq!(copy.downcast_ref::<Vec<i32>>(), Some(&vec![1, 2, 3]));
    }

    #[test]
    fn test_compute_writes_value() {
        let mut sum = compute(|inputs| Some(input::<i32>(inputs, 0)? + input::<i32>(inputs, 1)?));
        let a: Box<dyn FieldValue> = Box::new(2i32);
        let b: Box<dyn FieldValue> = Box::new(5i32);
        let mut out: Box<dyn FieldValue> = Box::new(0i32);
        sum.update(&[a.as_ref(), b.as_ref()], out.as_mut());
        assert_eq!(out.downcast_ref::<i32>(), Some(&7));
    }

    #[test]
    fn test_compute_keeps_value_on_missing_input() {
        let mut sum = compute(|inputs| Some(input::<i32>(inputs, 0)? + input::<i32>(inputs, 1)?));
        let a: Box<dyn FieldValue> = Box::new(2i32);
        let mut out: Box<dyn FieldValue> = Box::new(-1i32);
        sum.update(&[a.as_ref()], out.as_mut());
        assert_eq!(out.downcast_ref::<i32>(), Some(&-1));
    }
}
