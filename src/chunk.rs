//! Chunk views over archetype heaps
//!
//! A chunk is a bounded row range of one archetype. Queries hand out one span
//! per requested component type, all aligned to the same rows, plus the
//! entities of those rows.

use std::marker::PhantomData;
use std::ops::{Deref, DerefMut, Range};

use smallvec::SmallVec;

use crate::archetype::{Archetype, ArchetypeId};
use crate::component::{check_unique, Component};
use crate::entity::{Entity, StoreId};
use crate::error::Result;
use crate::schema::{EntitySchema, StructIndex};
use crate::types::ComponentTypes;

/// Maximum number of component types in a query tuple
pub const MAX_QUERY_COMPONENTS: usize = 8;

/// Span of one component type within a chunk
///
/// `Heap` borrows the live archetype rows. `Copy` is a private snapshot for
/// types marked with `ArchetypeQuery::read_only`; writes to it are discarded.
pub enum Chunk<'a, T> {
    Heap(&'a mut [T]),
    Copy(Vec<T>),
}

impl<'a, T> Chunk<'a, T> {
    pub fn is_copy(&self) -> bool {
        matches!(self, Chunk::Copy(_))
    }
}

impl<'a, T> Deref for Chunk<'a, T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        match self {
            Chunk::Heap(slice) => slice,
            Chunk::Copy(values) => values,
        }
    }
}

impl<'a, T> DerefMut for Chunk<'a, T> {
    fn deref_mut(&mut self) -> &mut [T] {
        match self {
            Chunk::Heap(slice) => slice,
            Chunk::Copy(values) => values,
        }
    }
}

impl<'a, T: std::fmt::Debug> std::fmt::Debug for Chunk<'a, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

/// Entities of the rows in a chunk
///
/// Handles resolve without touching the store, so a job callback can record
/// commands against them while the store is borrowed.
#[derive(Debug, Clone, Copy)]
pub struct ChunkEntities<'a> {
    archetype: ArchetypeId,
    store: StoreId,
    ids: &'a [u32],
    generations: &'a [u32],
    offset: usize,
}

impl<'a> ChunkEntities<'a> {
    pub(crate) fn new(
        archetype: ArchetypeId,
        store: StoreId,
        ids: &'a [u32],
        generations: &'a [u32],
        offset: usize,
    ) -> Self {
        Self {
            archetype,
            store,
            ids,
            generations,
            offset,
        }
    }

    /// Owning archetype
    pub fn archetype(&self) -> ArchetypeId {
        self.archetype
    }

    pub fn ids(&self) -> &'a [u32] {
        self.ids
    }

    /// Handle of the entity in chunk row `i`
    pub fn entity(&self, i: usize) -> Option<Entity> {
        Some(Entity::new(*self.ids.get(i)?, *self.generations.get(i)?, self.store))
    }

    /// Handles in row order
    pub fn iter(&self) -> impl Iterator<Item = Entity> + 'a {
        let store = self.store;
        self.ids
            .iter()
            .zip(self.generations)
            .map(move |(&id, &generation)| Entity::new(id, generation, store))
    }

    /// Row of the first entity within the archetype
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Archetype rows covered by this chunk
    pub fn rows(&self) -> Range<usize> {
        self.offset..self.offset + self.ids.len()
    }
}

/// Chunk handed to `QueryJob` callbacks
pub struct QueryChunk<'a, Q: QueryComponents> {
    pub components: Q::Chunks<'a>,
    pub entities: ChunkEntities<'a>,
}

/// Base pointer of a typed heap
pub struct HeapPtr<T>(*mut T);

impl<T> Clone for HeapPtr<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for HeapPtr<T> {}

// SAFETY: only dereferenced for disjoint row ranges while the owning store is
// exclusively borrowed
unsafe impl<T: Send> Send for HeapPtr<T> {}
unsafe impl<T: Send> Sync for HeapPtr<T> {}

impl<T: Clone> HeapPtr<T> {
    /// # Safety
    /// `range` must lie within the heap's occupied rows, the heap must outlive
    /// `'a`, and no other live reference may cover `range`.
    unsafe fn chunk<'a>(self, range: Range<usize>, copy: bool) -> Chunk<'a, T> {
        let start = self.0.add(range.start);
        if copy {
            Chunk::Copy(std::slice::from_raw_parts(start, range.len()).to_vec())
        } else {
            Chunk::Heap(std::slice::from_raw_parts_mut(start, range.len()))
        }
    }
}

#[derive(Clone, Copy)]
pub(crate) struct IdsPtr(*const u32);

// SAFETY: entity id and generation arrays are only read during iteration
unsafe impl Send for IdsPtr {}
unsafe impl Sync for IdsPtr {}

impl IdsPtr {
    /// # Safety
    /// `range` must lie within the occupied rows of a live archetype.
    unsafe fn slice<'a>(self, range: &Range<usize>) -> &'a [u32] {
        std::slice::from_raw_parts(self.0.add(range.start), range.len())
    }
}

/// Row range of one archetype plus the heap pointers to read it
pub(crate) struct ChunkDesc<P> {
    pub archetype: ArchetypeId,
    pub store: StoreId,
    pub ptrs: P,
    pub ids: IdsPtr,
    pub generations: IdsPtr,
    pub range: Range<usize>,
}

impl<P: Copy> ChunkDesc<P> {
    pub fn new(archetype: &Archetype, store: StoreId, ptrs: P, range: Range<usize>) -> Self {
        Self {
            archetype: archetype.id(),
            store,
            ptrs,
            ids: IdsPtr(archetype.entity_ids_ptr()),
            generations: IdsPtr(archetype.generations_ptr()),
            range,
        }
    }

    /// # Safety
    /// The archetype must be alive and structurally unchanged for `'a`.
    pub unsafe fn entities<'a>(&self) -> ChunkEntities<'a> {
        ChunkEntities::new(
            self.archetype,
            self.store,
            self.ids.slice(&self.range),
            self.generations.slice(&self.range),
            self.range.start,
        )
    }

    /// # Safety
    /// As [`QueryComponents::chunks`]; no two live chunks may share a descriptor.
    pub unsafe fn query_chunk<'a, Q>(&self, indices: &[StructIndex], read_only: &ComponentTypes) -> QueryChunk<'a, Q>
    where
        Q: QueryComponents<Ptrs = P>,
    {
        QueryChunk {
            components: Q::chunks(self.ptrs, indices, self.range.clone(), read_only),
            entities: self.entities(),
        }
    }
}

/// Component tuple a query iterates
///
/// Implemented for `()` and tuples of up to five components.
pub trait QueryComponents: 'static {
    /// Tuple of shared slices
    type Slices<'a>;
    /// Tuple of [`Chunk`] spans
    type Chunks<'a>;
    /// Tuple of heap base pointers
    type Ptrs: Copy + Send + Sync;

    /// Struct indices in tuple order. Fails on unregistered or repeated types.
    fn struct_indices(schema: &EntitySchema) -> Result<SmallVec<[StructIndex; MAX_QUERY_COMPONENTS]>>;

    fn slices<'a>(archetype: &'a Archetype, indices: &[StructIndex], range: Range<usize>) -> Option<Self::Slices<'a>>;

    fn ptrs(archetype: &mut Archetype, indices: &[StructIndex]) -> Option<Self::Ptrs>;

    /// # Safety
    /// `ptrs` must come from [`ptrs`](Self::ptrs) on an archetype that stays
    /// structurally unchanged for `'a`, `range` must be within its occupied
    /// rows, and no other live chunk may overlap `range`.
    unsafe fn chunks<'a>(
        ptrs: Self::Ptrs,
        indices: &[StructIndex],
        range: Range<usize>,
        read_only: &ComponentTypes,
    ) -> Self::Chunks<'a>;
}

macro_rules! impl_query_components {
    ($($T:ident),*) => {
        impl<$($T: Component),*> QueryComponents for ($($T,)*) {
            type Slices<'a> = ($(&'a [$T],)*);
            type Chunks<'a> = ($(Chunk<'a, $T>,)*);
            type Ptrs = ($(HeapPtr<$T>,)*);

            fn struct_indices(
                schema: &EntitySchema,
            ) -> Result<SmallVec<[StructIndex; MAX_QUERY_COMPONENTS]>> {
                let indices: SmallVec<[StructIndex; MAX_QUERY_COMPONENTS]> =
                    smallvec::smallvec![$(schema.component_index::<$T>()?),*];
                check_unique(&indices, &[$(std::any::type_name::<$T>()),*])?;
                Ok(indices)
            }

            #[allow(unused_variables, unused_mut)]
            fn slices<'a>(
                archetype: &'a Archetype,
                indices: &[StructIndex],
                range: Range<usize>,
            ) -> Option<Self::Slices<'a>> {
                let mut indices = indices.iter();
                Some(($(archetype.components::<$T>(*indices.next()?)?.get(range.clone())?,)*))
            }

            #[allow(unused_variables, unused_mut)]
            fn ptrs(archetype: &mut Archetype, indices: &[StructIndex]) -> Option<Self::Ptrs> {
                let mut indices = indices.iter();
                Some(($(HeapPtr(archetype.heap_ptr::<$T>(*indices.next()?)?),)*))
            }

            #[allow(non_snake_case, unused_variables, unused_mut, clippy::unused_unit)]
            unsafe fn chunks<'a>(
                ptrs: Self::Ptrs,
                indices: &[StructIndex],
                range: Range<usize>,
                read_only: &ComponentTypes,
            ) -> Self::Chunks<'a> {
                let ($($T,)*) = ptrs;
                let mut indices = indices.iter();
                ($({
                    let copy = indices.next().is_some_and(|index| read_only.has(*index));
                    $T.chunk(range.clone(), copy)
                },)*)
            }
        }
    };
}

impl_query_components!();
impl_query_components!(A);
impl_query_components!(A, B);
impl_query_components!(A, B, C);
impl_query_components!(A, B, C, D);
impl_query_components!(A, B, C, D, E);

/// Mutable chunk iterator returned by `ArchetypeQuery::chunks_mut`
pub struct ChunksMut<'a, Q: QueryComponents> {
    descs: std::vec::IntoIter<ChunkDesc<Q::Ptrs>>,
    indices: SmallVec<[StructIndex; MAX_QUERY_COMPONENTS]>,
    read_only: ComponentTypes,
    _store: PhantomData<&'a mut Archetype>,
}

impl<'a, Q: QueryComponents> ChunksMut<'a, Q> {
    pub(crate) fn new(
        descs: Vec<ChunkDesc<Q::Ptrs>>,
        indices: SmallVec<[StructIndex; MAX_QUERY_COMPONENTS]>,
        read_only: ComponentTypes,
    ) -> Self {
        Self {
            descs: descs.into_iter(),
            indices,
            read_only,
            _store: PhantomData,
        }
    }
}

impl<'a, Q: QueryComponents> Iterator for ChunksMut<'a, Q> {
    type Item = (Q::Chunks<'a>, ChunkEntities<'a>);

    fn next(&mut self) -> Option<Self::Item> {
        let desc = self.descs.next()?;
        // SAFETY: descriptors cover disjoint row ranges, each is consumed once,
        // and the store stays mutably borrowed for 'a
        let chunk = unsafe { desc.query_chunk::<Q>(&self.indices, &self.read_only) };
        Some((chunk.components, chunk.entities))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.descs.size_hint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EcsError;
    use crate::schema::SchemaRegistry;

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Position(i32);

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Velocity(i32);

    #[test]
    fn test_chunk_deref() {
        let mut values = vec![1, 2, 3];
        let mut heap = Chunk::Heap(&mut values[..2]);
        heap[0] = 10;
        assert_eq!(&*heap, &[10, 2]);
        assert!(!heap.is_copy());

        let mut copy: Chunk<'_, i32> = Chunk::Copy(vec![5]);
        copy[0] += 1;
        assert_eq!(&*copy, &[6]);
        assert_eq!(values, vec![10, 2, 3]);
    }

    #[test]
    fn test_query_tuple_rejects_duplicates() -> Result<()> {
        let registry = SchemaRegistry::new();
        registry.register_component::<Position>()?;
        registry.register_component::<Velocity>()?;
        let schema = registry.entity_schema();

        assert_eq!(<(Position, Velocity)>::struct_indices(&schema)?.len(), 2);
        assert!(<()>::struct_indices(&schema)?.is_empty());
        assert!(matches!(
            <(Position, Velocity, Position)>::struct_indices(&schema),
            Err(EcsError::DuplicateComponent(_))
        ));
        Ok(())
    }

    #[test]
    fn test_chunk_entities_rows() {
        let ids = [4, 5, 6];
        let generations = [0, 2, 1];
        let store = StoreId::next();
        let entities = ChunkEntities::new(ArchetypeId::new(1), store, &ids[1..], &generations[1..], 1);
        assert_eq!(entities.rows(), 1..3);
        assert_eq!(entities.len(), 2);
        assert_eq!(entities.entity(0), Some(Entity::new(5, 2, store)));
        assert_eq!(entities.entity(2), None);
        let handles: Vec<_> = entities.iter().collect();
        assert_eq!(handles, vec![Entity::new(5, 2, store), Entity::new(6, 1, store)]);
    }
}
