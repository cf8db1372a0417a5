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

//! Query system with archetype filtering
//!
//! An [`ArchetypeQuery`] matches archetypes against a [`Signature`] and
//! yields their rows in fixed-size chunks. The matched archetype list is
//! cached and extended incrementally: archetypes are never removed from a
//! store, so each update only has to look at archetypes created since the
//! previous one.
//!
//! Iteration order is archetype creation order, then row order. It changes
//! with structural mutation and must not be relied on across calls.

use std::marker::PhantomData;
use std::sync::Arc;

use smallvec::SmallVec;

#[cfg(feature = "profiling")]
use tracing::info_span;

use crate::archetype::{ArchetypeId, ArchetypeKey};
use crate::chunk::{ChunkDesc, ChunkEntities, ChunksMut, QueryChunk, QueryComponents, MAX_QUERY_COMPONENTS};
use crate::component::Component;
use crate::entity::{Entity, StoreId};
use crate::error::{EcsError, Result};
use crate::parallel::QueryJob;
use crate::schema::{EntitySchema, StructIndex};
use crate::store::EntityStore;
use crate::types::{ComponentTypes, Tags};

/// Tag and component filters applied on top of the required components
///
/// Empty sets do not constrain. When both `all` and `any` are set, both must
/// hold.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct QueryFilter {
    all_tags: Tags,
    any_tags: Tags,
    without_all_tags: Tags,
    without_any_tags: Tags,
    all_components: ComponentTypes,
    any_components: ComponentTypes,
    without_all_components: ComponentTypes,
    without_any_components: ComponentTypes,
}

impl QueryFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Archetype must have every tag in `tags`
    pub fn all_tags(mut self, tags: Tags) -> Self {
        self.all_tags |= tags;
        self
    }

    /// Archetype must have at least one tag in `tags`
    pub fn any_tags(mut self, tags: Tags) -> Self {
        self.any_tags |= tags;
        self
    }

    /// Archetype must be missing at least one tag in `tags`
    pub fn without_all_tags(mut self, tags: Tags) -> Self {
        self.without_all_tags |= tags;
        self
    }

    /// Archetype must have none of the tags in `tags`
    pub fn without_any_tags(mut self, tags: Tags) -> Self {
        self.without_any_tags |= tags;
        self
    }

    pub fn all_components(mut self, components: ComponentTypes) -> Self {
        self.all_components |= components;
        self
    }

    pub fn any_components(mut self, components: ComponentTypes) -> Self {
        self.any_components |= components;
        self
    }

    pub fn without_all_components(mut self, components: ComponentTypes) -> Self {
        self.without_all_components |= components;
        self
    }

    pub fn without_any_components(mut self, components: ComponentTypes) -> Self {
        self.without_any_components |= components;
        self
    }

    pub fn matches(&self, key: &ArchetypeKey) -> bool {
        let tags = &key.tags;
        let tags_ok = (self.all_tags.is_empty() || tags.has_all(&self.all_tags))
            && (self.any_tags.is_empty() || tags.has_any(&self.any_tags))
            && (self.without_all_tags.is_empty() || !tags.has_all(&self.without_all_tags))
            && !tags.has_any(&self.without_any_tags);
        if !tags_ok {
            return false;
        }

        let components = &key.components;
        (self.all_components.is_empty() || components.has_all(&self.all_components))
            && (self.any_components.is_empty() || components.has_any(&self.any_components))
            && (self.without_all_components.is_empty()
                || !components.has_all(&self.without_all_components))
            && !components.has_any(&self.without_any_components)
    }
}

/// Required components plus filters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Signature {
    pub required: ComponentTypes,
    pub filter: QueryFilter,
}

impl Signature {
    pub fn matches(&self, key: &ArchetypeKey) -> bool {
        key.components.has_all(&self.required) && self.filter.matches(key)
    }
}

/// Cached query over the archetypes of one store
pub struct ArchetypeQuery<Q: QueryComponents> {
    store: StoreId,
    schema: Arc<EntitySchema>,
    indices: SmallVec<[StructIndex; MAX_QUERY_COMPONENTS]>,
    signature: Signature,
    read_only: ComponentTypes,
    matched: Vec<ArchetypeId>,
    /// Archetypes already scanned
    seen: usize,
    chunk_size: usize,
    _marker: PhantomData<fn() -> Q>,
}

impl<Q: QueryComponents> ArchetypeQuery<Q> {
    pub(crate) fn new(store: &EntityStore) -> Result<Self> {
        let schema = Arc::clone(store.schema());
        let indices = Q::struct_indices(&schema)?;
        Ok(Self {
            store: store.id(),
            signature: Signature {
                required: ComponentTypes::from_indices(indices.iter().copied()),
                filter: QueryFilter::default(),
            },
            schema,
            indices,
            read_only: ComponentTypes::new(),
            matched: Vec::new(),
            seen: 0,
            chunk_size: store.config().chunk_size,
            _marker: PhantomData,
        })
    }

    /// Replace the filter. Clears the archetype cache.
    pub fn with_filter(mut self, filter: QueryFilter) -> Self {
        self.signature.filter = filter;
        self.matched.clear();
        self.seen = 0;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(EcsError::InvalidQuery("chunk size must be > 0".into()));
        }
        self.chunk_size = chunk_size;
        Ok(self)
    }

    /// Hand out `T` as a private copy in mutable chunks
    pub fn read_only<T: Component>(mut self) -> Result<Self> {
        let index = self.schema.component_index::<T>()?;
        if !self.signature.required.has(index) {
            return Err(EcsError::InvalidQuery(format!(
                "{} is not part of the query",
                std::any::type_name::<T>()
            )));
        }
        self.read_only.add(index);
        Ok(self)
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn filter(&self) -> &QueryFilter {
        &self.signature.filter
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub(crate) fn indices(&self) -> &[StructIndex] {
        &self.indices
    }

    pub(crate) fn read_only_types(&self) -> &ComponentTypes {
        &self.read_only
    }

    /// Scan archetypes created since the last update.
    pub fn update(&mut self, store: &EntityStore) -> Result<()> {
        if store.id() != self.store {
            return Err(EcsError::InvalidStoreOwnership {
                expected: self.store,
                found: store.id(),
            });
        }
        let archetypes = store.archetypes();
        if archetypes.len() > self.seen {
            for archetype in &archetypes[self.seen..] {
                if self.signature.matches(archetype.key()) {
                    self.matched.push(archetype.id());
                }
            }
            self.seen = archetypes.len();
        }
        Ok(())
    }

    /// Matching archetypes, including empty ones, in creation order
    pub fn archetype_ids(&mut self, store: &EntityStore) -> Result<Vec<ArchetypeId>> {
        self.update(store)?;
        Ok(self.matched.clone())
    }

    /// Number of matching entities
    pub fn count(&mut self, store: &EntityStore) -> Result<usize> {
        self.update(store)?;
        Ok(self
            .matched
            .iter()
            .filter_map(|id| store.archetype(*id))
            .map(|archetype| archetype.len())
            .sum())
    }

    /// Handles of all matching entities
    pub fn entities(&mut self, store: &EntityStore) -> Result<Vec<Entity>> {
        self.update(store)?;
        let store_id = store.id();
        Ok(self
            .matched
            .iter()
            .filter_map(|id| store.archetype(*id))
            .flat_map(|archetype| {
                archetype
                    .entity_ids()
                    .iter()
                    .zip(archetype.entity_generations())
                    .map(move |(&id, &generation)| Entity::new(id, generation, store_id))
            })
            .collect())
    }

    /// Shared chunk iteration
    pub fn chunks<'a>(
        &'a mut self,
        store: &'a EntityStore,
    ) -> Result<impl Iterator<Item = (Q::Slices<'a>, ChunkEntities<'a>)> + 'a> {
        self.update(store)?;
        let this: &'a Self = self;
        let chunk_size = this.chunk_size;
        let store_id = store.id();
        Ok(this
            .matched
            .iter()
            .filter_map(move |id| store.archetype(*id))
            .flat_map(move |archetype| {
                let len = archetype.len();
                (0..len).step_by(chunk_size).filter_map(move |start| {
                    let range = start..(start + chunk_size).min(len);
                    let slices = Q::slices(archetype, &this.indices, range.clone())?;
                    let ids = &archetype.entity_ids()[range.clone()];
                    let generations = &archetype.entity_generations()[range];
                    Some((
                        slices,
                        ChunkEntities::new(archetype.id(), store_id, ids, generations, start),
                    ))
                })
            }))
    }

    /// Mutable chunk iteration. Read-only types come as copies.
    pub fn chunks_mut<'a>(&'a mut self, store: &'a mut EntityStore) -> Result<ChunksMut<'a, Q>> {
        let descs = self.chunk_descs(store)?;
        Ok(ChunksMut::new(descs, self.indices.clone(), self.read_only))
    }

    /// Job running `f` over every chunk, see [`QueryJob`].
    pub fn for_each<F>(&mut self, f: F) -> QueryJob<'_, Q, F>
    where
        F: for<'c> Fn(QueryChunk<'c, Q>) + Send + Sync,
    {
        QueryJob::new(self, f)
    }

    /// One descriptor per chunk of every non-empty matching archetype.
    pub(crate) fn chunk_descs(&mut self, store: &mut EntityStore) -> Result<Vec<ChunkDesc<Q::Ptrs>>> {
        #[cfg(feature = "profiling")]
        let span = info_span!("query.chunk_descs", matched = self.matched.len());
        #[cfg(feature = "profiling")]
        let _span_guard = span.enter();

        self.update(store)?;
        let store_id = store.id();
        let mut descs = Vec::new();
        for &id in &self.matched {
            let Some(archetype) = store.archetype_mut(id) else {
                continue;
            };
            let len = archetype.len();
            if len == 0 {
                continue;
            }
            let Some(ptrs) = Q::ptrs(archetype, &self.indices) else {
                continue;
            };
            for start in (0..len).step_by(self.chunk_size) {
                let range = start..(start + self.chunk_size).min(len);
                descs.push(ChunkDesc::new(archetype, store_id, ptrs, range));
            }
        }
        Ok(descs)
    }
}
