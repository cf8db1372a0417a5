//! Component heaps
//!
//! One heap per component type per archetype. A heap is a plain `Vec<T>`
//! whose length always equals the archetype capacity; rows past the
//! archetype's entity count hold `T::default()`.
//!
//! Heaps are reached through the object-safe [`ComponentHeap`] trait for
//! structural work (grow, shrink, row moves) and downcast to
//! [`StructHeap<T>`] for typed access. The vtable call happens once per heap
//! per structural operation, never per entity during iteration.

use std::any::Any;

use crate::component::Component;
use crate::schema::StructIndex;

/// Constructor stored in the schema dispatch table, one per component type.
pub(crate) type HeapFactory = fn(StructIndex) -> Box<dyn ComponentHeap>;

pub(crate) fn new_heap<T: Component>(index: StructIndex) -> Box<dyn ComponentHeap> {
    Box::new(StructHeap::<T>::new(index))
}

/// Type-erased heap operations used by archetype row management.
pub trait ComponentHeap: Send + Sync {
    fn struct_index(&self) -> StructIndex;

    /// Allocated rows.
    fn capacity(&self) -> usize;

    /// Grow with default values or truncate to `capacity`.
    fn resize(&mut self, capacity: usize);

    /// Move the value at `row` into `dst[dst_row]`, leaving a default behind.
    /// No-op if `dst` stores a different type.
    fn move_value(&mut self, row: usize, dst: &mut dyn ComponentHeap, dst_row: usize);

    /// Move the value at `last` into `row` and reset `last` to default.
    fn swap_remove(&mut self, row: usize, last: usize);

    /// Reset `row` to the default value.
    fn reset(&mut self, row: usize);

    fn value(&self, row: usize) -> Option<&dyn Any>;

    fn value_mut(&mut self, row: usize) -> Option<&mut dyn Any>;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Typed contiguous component storage.
pub struct StructHeap<T: Component> {
    index: StructIndex,
    components: Vec<T>,
}

impl<T: Component> StructHeap<T> {
    pub fn new(index: StructIndex) -> Self {
        Self {
            index,
            components: Vec::new(),
        }
    }

    /// All allocated rows, including unused rows past the entity count.
    pub fn components(&self) -> &[T] {
        &self.components
    }

    pub fn components_mut(&mut self) -> &mut [T] {
        &mut self.components
    }

    pub fn get(&self, row: usize) -> Option<&T> {
        self.components.get(row)
    }

    pub fn get_mut(&mut self, row: usize) -> Option<&mut T> {
        self.components.get_mut(row)
    }

    /// Overwrite the value at `row`, returning `false` if out of bounds.
    pub fn set(&mut self, row: usize, value: T) -> bool {
        match self.components.get_mut(row) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    pub(crate) fn as_mut_ptr(&mut self) -> *mut T {
        self.components.as_mut_ptr()
    }
}

impl<T: Component> ComponentHeap for StructHeap<T> {
    fn struct_index(&self) -> StructIndex {
        self.index
    }

    fn capacity(&self) -> usize {
        self.components.len()
    }

    fn resize(&mut self, capacity: usize) {
        if capacity > self.components.len() {
            // Fresh rows are written once here so later creates hit warm memory
            self.components.reserve_exact(capacity - self.components.len());
            self.components.resize_with(capacity, T::default);
        } else {
            self.components.truncate(capacity);
            self.components.shrink_to_fit();
        }
    }

    fn move_value(&mut self, row: usize, dst: &mut dyn ComponentHeap, dst_row: usize) {
        if let Some(dst) = dst.as_any_mut().downcast_mut::<StructHeap<T>>() {
            if let (Some(src), Some(slot)) =
                (self.components.get_mut(row), dst.components.get_mut(dst_row))
            {
                *slot = std::mem::take(src);
            }
        }
    }

    fn swap_remove(&mut self, row: usize, last: usize) {
        if row != last {
            self.components.swap(row, last);
        }
        self.reset(last);
    }

    fn reset(&mut self, row: usize) {
        if let Some(slot) = self.components.get_mut(row) {
            *slot = T::default();
        }
    }

    fn value(&self, row: usize) -> Option<&dyn Any> {
        self.components.get(row).map(|v| v as &dyn Any)
    }

    fn value_mut(&mut self, row: usize) -> Option<&mut dyn Any> {
        self.components.get_mut(row).map(|v| v as &mut dyn Any)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Name(String);

    fn index() -> StructIndex {
        StructIndex::from_usize(1)
    }

    #[test]
    fn test_resize_fills_defaults() {
        let mut heap = StructHeap::<Name>::new(index());
        heap.resize(4);
        assert_eq!(heap.capacity(), 4);
        assert!(heap.components().iter().all(|n| n.0.is_empty()));
        heap.resize(2);
        assert_eq!(heap.capacity(), 2);
    }

    #[test]
    fn test_swap_remove_resets_last() {
        let mut heap = StructHeap::<Name>::new(index());
        heap.resize(4);
        heap.set(0, Name("a".into()));
        heap.set(1, Name("b".into()));
        heap.set(2, Name("c".into()));

        heap.swap_remove(0, 2);
        assert_eq!(heap.get(0), Some(&Name("c".into())));
        assert_eq!(heap.get(1), Some(&Name("b".into())));
        assert_eq!(heap.get(2), Some(&Name::default()));
    }

    #[test]
    fn test_move_value_between_heaps() {
        let mut src: Box<dyn ComponentHeap> = new_heap::<Name>(index());
        let mut dst: Box<dyn ComponentHeap> = new_heap::<Name>(index());
        src.resize(1);
        dst.resize(2);
        if let Some(v) = src.value_mut(0).and_then(|v| v.downcast_mut::<Name>()) {
            v.0.push_str("moved");
        }

        src.move_value(0, dst.as_mut(), 1);

        let dst = dst.as_any().downcast_ref::<StructHeap<Name>>().unwrap();
        assert_eq!(dst.get(1), Some(&Name("moved".into())));
        let src = src.as_any().downcast_ref::<StructHeap<Name>>().unwrap();
        assert_eq!(src.get(0), Some(&Name::default()));
    }

    #[test]
    fn test_move_value_ignores_other_type() {
        let mut src: Box<dyn ComponentHeap> = new_heap::<Name>(index());
        let mut dst: Box<dyn ComponentHeap> = new_heap::<u32>(index());
        src.resize(1);
        dst.resize(1);
        src.move_value(0, dst.as_mut(), 0);
        assert_eq!(dst.value(0).and_then(|v| v.downcast_ref::<u32>()), Some(&0));
    }
}
