/*!
 * Copy-on-Write Vector
 * Shared, bounded sequence of reference-counted elements
 *
 * A [`Vector`] handle points at one reference-counted array, or none while
 * empty. Cloning a handle shares the array. Any mutation through a handle
 * whose array is shared first copies the array, re-retaining every element,
 * so other sharers keep seeing the original contents.
 */

use super::object::Object;
use super::traits::{AutoRelease, RefCounted};
use crate::core::config::MemoryConfig;
use crate::core::errors::{MemoryError, MemoryResult};
use crate::core::limits::{DEFAULT_VECTOR_LIMIT, MIN_VECTOR_CAPACITY};
use std::fmt;
use std::mem;
use std::ops::Range;
use tracing::trace;

struct Array<T> {
    capacity: usize,
    items: Vec<Object<T>>,
}

impl<T> Array<T> {
    /// Reserve room for `capacity` handles up front
    fn with_capacity(capacity: usize) -> MemoryResult<Self> {
        let mut items = Vec::new();
        items
            .try_reserve_exact(capacity)
            .map_err(|_| MemoryError::CapacityExceeded {
                requested: capacity,
                limit: isize::MAX as usize / mem::size_of::<Object<T>>(),
            })?;
        Ok(Self { capacity, items })
    }

    fn from_slice(items: &[Object<T>], capacity: usize) -> MemoryResult<Self> {
        let mut array = Self::with_capacity(capacity.max(items.len()))?;
        array.items.extend(items.iter().map(Object::retain));
        Ok(array)
    }

    /// Copy of `items` keeping the recorded capacity without reserving it
    fn retained(items: &[Object<T>], capacity: usize) -> Self {
        Self {
            capacity: capacity.max(items.len()),
            items: items.iter().map(Object::retain).collect(),
        }
    }
}

/// Copy-on-write vector of [`Object`] elements
///
/// # Example
///
/// ```
/// use memory_kernel::memory::{Object, Vector};
///
/// let mut a = Vector::new();
/// a.add(Object::new(1)).unwrap();
/// let mut b = a.clone();
/// b.set(0, Object::new(2)).unwrap();
///
/// assert_eq!(**a.get(0).unwrap(), 1);
/// assert_eq!(**b.get(0).unwrap(), 2);
/// ```
pub struct Vector<T> {
    array: Option<Object<Array<T>>>,
    limit: usize,
}

impl<T> Vector<T> {
    /// Empty vector with no backing array
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_VECTOR_LIMIT)
    }

    /// Empty vector bounded to `limit` elements
    pub fn with_limit(limit: usize) -> Self {
        Self { array: None, limit }
    }

    pub fn with_config(config: &MemoryConfig) -> Self {
        Self::with_limit(config.vector_limit)
    }

    /// Empty vector with room for `capacity` elements before regrowing
    ///
    /// Fails with `CapacityExceeded` when the reservation cannot be made.
    pub fn with_capacity(capacity: usize) -> MemoryResult<Self> {
        let mut vector = Self::new();
        let capacity = capacity.min(vector.limit);
        if capacity > 0 {
            vector.array = Some(Object::new(Array::with_capacity(capacity)?));
        }
        Ok(vector)
    }

    /// Take ownership of existing handles, in order
    pub fn from_objects<I>(objects: I) -> Self
    where
        I: IntoIterator<Item = Object<T>>,
    {
        let items: Vec<Object<T>> = objects.into_iter().collect();
        let mut vector = Self::new();
        if !items.is_empty() {
            vector.array = Some(Object::new(Array {
                capacity: items.len(),
                items,
            }));
        }
        vector
    }

    #[inline]
    fn items(&self) -> &[Object<T>] {
        self.array.as_ref().map_or(&[], |array| &array.items)
    }

    /// Map a possibly negative index onto `0..=len`
    fn resolve(&self, index: isize) -> Option<usize> {
        let len = self.len();
        if index >= 0 {
            Some(index as usize)
        } else {
            len.checked_sub(index.unsigned_abs())
        }
    }

    /// Element at `index`; negative indices count from the end
    pub fn get(&self, index: isize) -> Option<&Object<T>> {
        self.resolve(index).and_then(|i| self.items().get(i))
    }

    pub fn first(&self) -> Option<&Object<T>> {
        self.items().first()
    }

    pub fn last(&self) -> Option<&Object<T>> {
        self.items().last()
    }

    pub fn len(&self) -> usize {
        self.items().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items().is_empty()
    }

    /// Elements the current array holds before it must regrow
    pub fn capacity(&self) -> usize {
        self.array.as_ref().map_or(0, |array| array.capacity)
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Whether another handle shares this vector's array
    pub fn is_copied(&self) -> bool {
        self.array.as_ref().is_some_and(Object::is_copied)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Object<T>> {
        self.items().iter()
    }

    /// Position of `element` at or after `offset`, compared by identity
    pub fn find(&self, element: &Object<T>, offset: usize) -> Option<usize> {
        self.items()
            .iter()
            .skip(offset)
            .position(|item| Object::ptr_eq(item, element))
            .map(|pos| pos + offset)
    }

    /// Make the array private to this handle with room for `extra` more
    ///
    /// Copies when the array is shared or too small. Elements are
    /// re-retained by the copy; the old array is released.
    pub fn copy_on_write(&mut self, extra: usize) -> MemoryResult<()> {
        let len = self.len();
        let needed = len.checked_add(extra).unwrap_or(usize::MAX);
        if needed > self.limit {
            return Err(MemoryError::CapacityExceeded {
                requested: needed,
                limit: self.limit,
            });
        }

        let copied = match &self.array {
            None => {
                if needed == 0 {
                    return Ok(());
                }
                let capacity = needed.max(MIN_VECTOR_CAPACITY).min(self.limit);
                Array::with_capacity(capacity)?
            }
            Some(array) if array.is_copied() || array.capacity < needed => {
                let capacity = if array.capacity < needed {
                    needed
                        .max(array.capacity.saturating_mul(2))
                        .max(MIN_VECTOR_CAPACITY)
                        .min(self.limit)
                } else {
                    array.capacity
                };
                trace!(
                    len = len,
                    capacity = capacity,
                    shared = array.is_copied(),
                    "Copying vector array"
                );
                Array::from_slice(&array.items, capacity)?
            }
            Some(_) => return Ok(()),
        };

        // Dropping the old handle releases the previous array
        self.array = Some(Object::new(copied));
        Ok(())
    }

    fn writable(&mut self, extra: usize) -> MemoryResult<&mut Array<T>> {
        self.copy_on_write(extra)?;
        match self.array.as_mut().and_then(Object::get_mut) {
            Some(array) => Ok(array),
            None => unreachable!("copy-on-write left the array shared"),
        }
    }

    /// Append one element
    ///
    /// Fails with `CapacityExceeded` at the limit, leaving the vector as it was.
    pub fn add(&mut self, element: Object<T>) -> MemoryResult<()> {
        self.writable(1)?.items.push(element);
        Ok(())
    }

    /// Append every element, or none of them if the limit would be exceeded
    pub fn add_all<I>(&mut self, elements: I) -> MemoryResult<()>
    where
        I: IntoIterator<Item = Object<T>>,
    {
        let elements: Vec<Object<T>> = elements.into_iter().collect();
        if elements.is_empty() {
            return Ok(());
        }
        self.writable(elements.len())?.items.extend(elements);
        Ok(())
    }

    /// Replace the element at `index`, releasing the previous occupant
    ///
    /// `index == len` appends.
    pub fn set(&mut self, index: isize, element: Object<T>) -> MemoryResult<()> {
        let len = self.len();
        let position = match self.resolve(index) {
            Some(position) if position <= len => position,
            _ => return Err(MemoryError::IndexOutOfRange { index, len }),
        };

        if position == len {
            return self.add(element);
        }
        self.writable(0)?.items[position] = element;
        Ok(())
    }

    fn clamp(&self, pos: isize) -> usize {
        self.resolve(pos).unwrap_or(0).min(self.len())
    }

    /// Keep `[0, pos)` and release the rest
    pub fn split(&mut self, pos: isize) {
        let end = self.clamp(pos);
        self.keep_range(0..end);
    }

    /// Keep `[pos, len)` and release the head
    pub fn rsplit(&mut self, pos: isize) {
        let start = self.clamp(pos);
        let len = self.len();
        self.keep_range(start..len);
    }

    fn keep_range(&mut self, range: Range<usize>) {
        if range == (0..self.len()) {
            return;
        }
        let Some(array) = self.array.as_mut() else {
            return;
        };

        match array.get_mut() {
            Some(unique) => {
                unique.items.truncate(range.end);
                unique.items.drain(..range.start);
            }
            None => {
                let kept = Array::retained(&array.items[range], array.capacity);
                self.array = Some(Object::new(kept));
            }
        }
    }

    /// Drop this handle's array; other sharers keep theirs
    pub fn clear(&mut self) {
        self.array = None;
    }
}

impl<T> Default for Vector<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Vector<T> {
    fn clone(&self) -> Self {
        if let Some(array) = &self.array {
            trace!(len = array.items.len(), "Sharing vector array");
        }
        Self {
            array: self.array.as_ref().map(Object::retain),
            limit: self.limit,
        }
    }
}

impl<T> RefCounted for Vector<T> {
    fn retain(&self) -> Self {
        self.clone()
    }

    fn release(self) -> bool {
        let mut this = self;
        match this.array.take() {
            Some(array) => array.release(),
            None => false,
        }
    }

    fn is_copied(&self) -> bool {
        Vector::is_copied(self)
    }
}

impl<T> AutoRelease for Vector<T> {
    fn release(self: Box<Self>) {
        RefCounted::release(*self);
    }
}

impl<'a, T> IntoIterator for &'a Vector<T> {
    type Item = &'a Object<T>;
    type IntoIter = std::slice::Iter<'a, Object<T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<T> FromIterator<Object<T>> for Vector<T> {
    fn from_iter<I: IntoIterator<Item = Object<T>>>(iter: I) -> Self {
        Self::from_objects(iter)
    }
}

impl<T: fmt::Debug> fmt::Debug for Vector<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.iter().map(|item| &**item))
            .finish()
    }
}
