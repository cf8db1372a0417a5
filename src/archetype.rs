// Copyright 2024 Saptak Santra
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Archetype storage with row allocation and removal
//!
//! Rows `[0, entity_count)` are occupied, rows `[entity_count, capacity)`
//! hold default values. Capacity is zero or a power of two: it doubles when
//! a row is appended to a full archetype and halves once occupancy drops to
//! a quarter, never below the configured floor.

use std::any::Any;

use serde::{Deserialize, Serialize};

use crate::component::Component;
use crate::schema::{EntitySchema, StructIndex};
use crate::storage::{ComponentHeap, StructHeap};
use crate::types::{ComponentTypes, Tags};

/// Position of an archetype in its store. `ArchetypeId::EMPTY` is the
/// archetype without components or tags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ArchetypeId(u32);

impl ArchetypeId {
    pub const EMPTY: Self = Self(0);

    pub(crate) fn new(index: usize) -> Self {
        Self(index as u32)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Archetype identity: component set plus tag set
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArchetypeKey {
    pub components: ComponentTypes,
    pub tags: Tags,
}

impl ArchetypeKey {
    pub fn new(components: ComponentTypes, tags: Tags) -> Self {
        Self { components, tags }
    }
}

/// Archetype: Structure of Arrays storage
pub struct Archetype {
    id: ArchetypeId,
    key: ArchetypeKey,
    heaps: Vec<Box<dyn ComponentHeap>>,
    /// StructIndex -> position in `heaps`
    heap_map: Vec<Option<u16>>,
    entity_ids: Vec<u32>,
    /// Generation of each row's entity, parallel to `entity_ids`
    generations: Vec<u32>,
    entity_count: usize,
    capacity: usize,
    min_capacity: usize,
}

impl Archetype {
    /// Create an empty archetype (capacity 0) with one heap per component in `key`.
    pub(crate) fn new(
        id: ArchetypeId,
        key: ArchetypeKey,
        schema: &EntitySchema,
        min_capacity: usize,
    ) -> Self {
        let heaps: Vec<Box<dyn ComponentHeap>> = key
            .components
            .iter()
            .filter_map(|index| {
                let factory = schema.component(index)?.heap_factory?;
                Some(factory(index))
            })
            .collect();

        let mut heap_map = vec![None; key.components.iter().last().map_or(0, |i| i.get() + 1)];
        for (position, heap) in heaps.iter().enumerate() {
            heap_map[heap.struct_index().get()] = Some(position as u16);
        }

        Self {
            id,
            key,
            heaps,
            heap_map,
            entity_ids: Vec::new(),
            generations: Vec::new(),
            entity_count: 0,
            capacity: 0,
            min_capacity: min_capacity.max(1),
        }
    }

    pub fn id(&self) -> ArchetypeId {
        self.id
    }

    pub fn key(&self) -> &ArchetypeKey {
        &self.key
    }

    pub fn component_types(&self) -> &ComponentTypes {
        &self.key.components
    }

    pub fn tags(&self) -> &Tags {
        &self.key.tags
    }

    /// Number of occupied rows
    pub fn entity_count(&self) -> usize {
        self.entity_count
    }

    pub fn len(&self) -> usize {
        self.entity_count
    }

    pub fn is_empty(&self) -> bool {
        self.entity_count == 0
    }

    /// Allocated rows
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Entity ids of the occupied rows, in row order
    pub fn entity_ids(&self) -> &[u32] {
        &self.entity_ids[..self.entity_count]
    }

    /// Generations matching [`entity_ids`](Self::entity_ids)
    pub fn entity_generations(&self) -> &[u32] {
        &self.generations[..self.entity_count]
    }

    pub fn has_component(&self, index: StructIndex) -> bool {
        self.heap_position(index).is_some()
    }

    fn heap_position(&self, index: StructIndex) -> Option<usize> {
        self.heap_map
            .get(index.get())
            .copied()
            .flatten()
            .map(usize::from)
    }

    /// Type-erased heap for `index`
    pub fn heap_dyn(&self, index: StructIndex) -> Option<&dyn ComponentHeap> {
        let position = self.heap_position(index)?;
        Some(self.heaps[position].as_ref())
    }

    pub fn heap<T: Component>(&self, index: StructIndex) -> Option<&StructHeap<T>> {
        self.heap_dyn(index)?.as_any().downcast_ref()
    }

    pub fn heap_mut<T: Component>(&mut self, index: StructIndex) -> Option<&mut StructHeap<T>> {
        let position = self.heap_position(index)?;
        self.heaps[position].as_any_mut().downcast_mut()
    }

    /// Occupied rows of the heap for `index`
    pub fn components<T: Component>(&self, index: StructIndex) -> Option<&[T]> {
        let count = self.entity_count;
        self.heap::<T>(index).map(|heap| &heap.components()[..count])
    }

    pub fn components_mut<T: Component>(&mut self, index: StructIndex) -> Option<&mut [T]> {
        let count = self.entity_count;
        self.heap_mut::<T>(index)
            .map(|heap| &mut heap.components_mut()[..count])
    }

    pub fn component<T: Component>(&self, index: StructIndex, row: usize) -> Option<&T> {
        if row >= self.entity_count {
            return None;
        }
        self.heap::<T>(index)?.get(row)
    }

    pub fn component_mut<T: Component>(&mut self, index: StructIndex, row: usize) -> Option<&mut T> {
        if row >= self.entity_count {
            return None;
        }
        self.heap_mut::<T>(index)?.get_mut(row)
    }

    /// Value at `row` as `Any`, for mappers that only know the struct index.
    pub fn value(&self, index: StructIndex, row: usize) -> Option<&dyn Any> {
        if row >= self.entity_count {
            return None;
        }
        self.heap_dyn(index)?.value(row)
    }

    pub fn value_mut(&mut self, index: StructIndex, row: usize) -> Option<&mut dyn Any> {
        if row >= self.entity_count {
            return None;
        }
        let position = self.heap_position(index)?;
        self.heaps[position].value_mut(row)
    }

    /// Overwrite a value in place. Returns `false` if the heap or row is missing.
    pub(crate) fn set_value<T: Component>(&mut self, index: StructIndex, row: usize, value: T) -> bool {
        if row >= self.entity_count {
            return false;
        }
        match self.heap_mut::<T>(index) {
            Some(heap) => heap.set(row, value),
            None => false,
        }
    }

    /// Base pointer of the heap for `index`. Valid until the next structural change.
    pub(crate) fn heap_ptr<T: Component>(&mut self, index: StructIndex) -> Option<*mut T> {
        self.heap_mut::<T>(index).map(|heap| heap.as_mut_ptr())
    }

    pub(crate) fn entity_ids_ptr(&self) -> *const u32 {
        self.entity_ids.as_ptr()
    }

    pub(crate) fn generations_ptr(&self) -> *const u32 {
        self.generations.as_ptr()
    }

    /// Append a row for `id`, growing if full. Returns the row.
    pub(crate) fn create_row(&mut self, id: u32, generation: u32) -> usize {
        if self.entity_count == self.capacity {
            let capacity = (self.capacity * 2).max(1);
            self.resize(capacity);
        }
        let row = self.entity_count;
        self.entity_ids[row] = id;
        self.generations[row] = generation;
        self.entity_count += 1;
        row
    }

    /// Swap-remove `row`. Returns the id of the entity moved into `row`, if any.
    pub(crate) fn delete_row(&mut self, row: usize) -> Option<u32> {
        if row >= self.entity_count {
            return None;
        }
        let last = self.entity_count - 1;
        for heap in &mut self.heaps {
            heap.swap_remove(row, last);
        }
        self.entity_ids[row] = self.entity_ids[last];
        self.entity_ids[last] = 0;
        self.generations[row] = self.generations[last];
        self.generations[last] = 0;
        self.entity_count = last;

        let moved = (row != last).then(|| self.entity_ids[row]);
        self.shrink_if_sparse();
        moved
    }

    /// Move every value of `row` that `dst` also stores into `dst[dst_row]`.
    /// The source row keeps default values and must be deleted by the caller.
    pub(crate) fn move_row_to(&mut self, row: usize, dst: &mut Archetype, dst_row: usize) {
        for heap in &mut self.heaps {
            if let Some(position) = dst.heap_position(heap.struct_index()) {
                heap.move_value(row, dst.heaps[position].as_mut(), dst_row);
            }
        }
    }

    fn shrink_if_sparse(&mut self) {
        if self.capacity > self.min_capacity && self.entity_count <= self.capacity / 4 {
            let capacity = (self.capacity / 2).max(self.min_capacity);
            self.resize(capacity);
        }
    }

    fn resize(&mut self, capacity: usize) {
        tracing::debug!(
            archetype = self.id.index(),
            from = self.capacity,
            to = capacity,
            entities = self.entity_count,
            "resize archetype"
        );
        for heap in &mut self.heaps {
            heap.resize(capacity);
        }
        for rows in [&mut self.entity_ids, &mut self.generations] {
            if capacity > rows.len() {
                rows.resize(capacity, 0);
            } else {
                rows.truncate(capacity);
                rows.shrink_to_fit();
            }
        }
        self.capacity = capacity;
    }
}

impl std::fmt::Debug for Archetype {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Archetype")
            .field("id", &self.id)
            .field("components", &self.key.components)
            .field("tags", &self.key.tags)
            .field("entity_count", &self.entity_count)
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::schema::SchemaRegistry;

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Position(i32);

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Label(String);

    fn archetype() -> Result<(Archetype, StructIndex, StructIndex)> {
        let registry = SchemaRegistry::new();
        let pos = registry.register_component::<Position>()?;
        let label = registry.register_component::<Label>()?;
        let schema = registry.entity_schema();
        let key = ArchetypeKey::new(ComponentTypes::from_indices([pos, label]), Tags::new());
        Ok((Archetype::new(ArchetypeId::new(1), key, &schema, 1), pos, label))
    }

    #[test]
    fn test_capacity_doubles() -> Result<()> {
        let (mut arch, _, _) = archetype()?;
        assert_eq!(arch.capacity(), 0);
        let mut seen = Vec::new();
        for id in 1..=5 {
            arch.create_row(id, 0);
            seen.push(arch.capacity());
        }
        assert_eq!(seen, vec![1, 2, 4, 4, 8]);
        assert_eq!(arch.entity_ids(), &[1, 2, 3, 4, 5]);
        Ok(())
    }

    #[test]
    fn test_delete_row_swaps_last() -> Result<()> {
        let (mut arch, pos, label) = archetype()?;
        for id in 1..=3 {
            let row = arch.create_row(id, id);
            arch.set_value(pos, row, Position(id as i32));
            arch.set_value(label, row, Label(format!("e{id}")));
        }

        assert_eq!(arch.delete_row(0), Some(3));
        assert_eq!(arch.entity_ids(), &[3, 2]);
        assert_eq!(arch.entity_generations(), &[3, 2]);
        assert_eq!(arch.component::<Position>(pos, 0), Some(&Position(3)));
        assert_eq!(arch.component::<Label>(label, 0), Some(&Label("e3".into())));
        // vacated row is back to default
        assert_eq!(arch.heap::<Label>(label).and_then(|h| h.get(2)), Some(&Label::default()));

        assert_eq!(arch.delete_row(1), None);
        assert_eq!(arch.entity_ids(), &[3]);
        Ok(())
    }

    #[test]
    fn test_shrink_at_quarter_occupancy() -> Result<()> {
        let (mut arch, _, _) = archetype()?;
        for id in 1..=8 {
            arch.create_row(id, 0);
        }
        assert_eq!(arch.capacity(), 8);
        for _ in 0..5 {
            arch.delete_row(0);
        }
        assert_eq!(arch.capacity(), 8);
        arch.delete_row(0);
        assert_eq!(arch.entity_count(), 2);
        assert_eq!(arch.capacity(), 4);
        Ok(())
    }

    #[test]
    fn test_move_row_drops_missing_types() -> Result<()> {
        let registry = SchemaRegistry::new();
        let pos = registry.register_component::<Position>()?;
        let label = registry.register_component::<Label>()?;
        let schema = registry.entity_schema();

        let mut src = Archetype::new(
            ArchetypeId::new(1),
            ArchetypeKey::new(ComponentTypes::from_indices([pos, label]), Tags::new()),
            &schema,
            1,
        );
        let mut dst = Archetype::new(
            ArchetypeId::new(2),
            ArchetypeKey::new(ComponentTypes::from(pos), Tags::new()),
            &schema,
            1,
        );

        let row = src.create_row(7, 0);
        src.set_value(pos, row, Position(42));
        src.set_value(label, row, Label("gone".into()));

        let dst_row = dst.create_row(7, 0);
        src.move_row_to(row, &mut dst, dst_row);
        src.delete_row(row);

        assert_eq!(dst.component::<Position>(pos, dst_row), Some(&Position(42)));
        assert!(!dst.has_component(label));
        assert!(src.is_empty());
        Ok(())
    }
}
