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

//! EntityStore: entity ids, archetype ownership and structural mutation
//!
//! Every structural change moves the entity's row into the archetype for its
//! new (components, tags) key. The destination row is fully written before
//! the source row is swap-removed, so a failed call leaves nothing behind.
//!
//! The store is single-writer. Observers are called synchronously after a
//! change completes and only see the event.

use std::any::Any;
use std::sync::Arc;

use ahash::AHashMap;
use rustc_hash::FxHashMap;
use serde::Serialize;
use smallvec::SmallVec;

#[cfg(feature = "profiling")]
use tracing::info_span;

use crate::archetype::{Archetype, ArchetypeId, ArchetypeKey};
use crate::chunk::QueryComponents;
use crate::command::{CommandBuffer, PlaybackReport};
use crate::component::{Component, ComponentBundle, Script};
use crate::config::StoreConfig;
use crate::entity::{Entity, EntityLocation, EntityNode, IdSequence, StoreId};
use crate::error::{EcsError, Result};
use crate::event::{ComponentAction, ComponentChanged, EntityEvent, TagsChanged};
use crate::index::{ComponentIndexer, IndexedComponent, ValueIndex};
use crate::observer::{Observer, ObserverId, ObserverRegistry};
use crate::query::{ArchetypeQuery, QueryFilter};
use crate::schema::{EntitySchema, SchemaRegistry, ScriptIndex, StructIndex};
use crate::types::{ComponentTypes, Tags};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Transition {
    AddComponent(StructIndex),
    RemoveComponent(StructIndex),
    AddTags(Tags),
    RemoveTags(Tags),
}

type ScriptSlots = SmallVec<[(ScriptIndex, Box<dyn Any + Send + Sync>); 2]>;

/// Snapshot of store occupancy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub entities: usize,
    pub archetypes: usize,
    /// Rows allocated across all archetypes
    pub allocated_rows: usize,
    /// Ids waiting for reuse
    pub free_ids: usize,
    /// Next never-used id
    pub next_id: u32,
    /// Slots in the dense node table, one per id up to the highest used
    pub node_slots: usize,
    /// Distinct values across all value indexes
    pub indexed_values: usize,
}

/// Central entity and archetype storage
pub struct EntityStore {
    id: StoreId,
    schema: Arc<EntitySchema>,
    config: StoreConfig,

    /// Indexed by entity id, slot 0 unused
    nodes: Vec<EntityNode>,
    free_ids: Vec<u32>,
    sequence: Arc<IdSequence>,
    alive: usize,

    /// `archetypes[0]` is the empty archetype
    archetypes: Vec<Archetype>,
    archetype_index: AHashMap<ArchetypeKey, ArchetypeId>,
    transitions: AHashMap<(ArchetypeId, Transition), ArchetypeId>,

    observers: ObserverRegistry,

    /// Indexed by StructIndex
    indexes: Vec<Option<Box<dyn ComponentIndexer>>>,
    indexed: ComponentTypes,

    scripts: FxHashMap<u32, ScriptSlots>,
}

impl EntityStore {
    /// Create a store over a finalized schema with default config.
    pub fn new(schema: Arc<EntitySchema>) -> Self {
        Self::build(schema, StoreConfig::default())
    }

    pub fn with_config(schema: Arc<EntitySchema>, config: StoreConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(schema, config))
    }

    /// Create a store from a registry, freezing it.
    pub fn from_registry(registry: &SchemaRegistry) -> Self {
        Self::new(registry.entity_schema())
    }

    fn build(schema: Arc<EntitySchema>, config: StoreConfig) -> Self {
        let mut indexes: Vec<Option<Box<dyn ComponentIndexer>>> = Vec::new();
        indexes.resize_with(schema.max_struct_index() + 1, || None);
        for schema_type in schema.components() {
            if let (Some(index), Some(factory)) = (schema_type.struct_index(), schema_type.index_factory) {
                indexes[index.get()] = Some(factory());
            }
        }

        let mut store = Self {
            id: StoreId::next(),
            indexed: schema.indexed_components(),
            config: config.clone(),
            nodes: vec![EntityNode::default()],
            free_ids: Vec::new(),
            sequence: Arc::new(IdSequence::new(config.max_entities)),
            alive: 0,
            archetypes: Vec::with_capacity(64),
            archetype_index: AHashMap::with_capacity(64),
            transitions: AHashMap::with_capacity(128),
            observers: ObserverRegistry::new(),
            indexes,
            scripts: FxHashMap::default(),
            schema,
        };
        store.archetype_for(ArchetypeKey::default());
        store
    }

    pub fn id(&self) -> StoreId {
        self.id
    }

    pub fn schema(&self) -> &Arc<EntitySchema> {
        &self.schema
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    // ---- entity lifecycle -------------------------------------------------

    /// Create an entity without components.
    pub fn create_entity(&mut self) -> Result<Entity> {
        #[cfg(feature = "profiling")]
        let span = info_span!("store.create_entity", entities = self.alive);
        #[cfg(feature = "profiling")]
        let _span_guard = span.enter();

        let id = self.allocate_id()?;
        let (entity, _) = self.place(id, ArchetypeId::EMPTY);
        self.notify(EntityEvent::Created(entity));
        Ok(entity)
    }

    /// Create an entity with a caller-chosen id.
    ///
    /// Fails with `InvalidEntityId` for 0 or ids above `max_entities`, and with
    /// `EntityIdInUse` if the id is alive. Fresh ids below `id` that were never
    /// handed out are skipped by later `create_entity` calls.
    ///
    /// The node table is dense, so an explicit id allocates a slot for every
    /// id up to it. Keep `max_entities` near the ids actually used; an
    /// allocation the system refuses fails with `CapacityOverflow`.
    pub fn create_entity_with_id(&mut self, id: u32) -> Result<Entity> {
        if id == 0 || id > self.sequence.limit() {
            return Err(EcsError::InvalidEntityId(id));
        }
        if self.is_id_alive(id) {
            return Err(EcsError::EntityIdInUse(id));
        }
        self.reserve_slot(id)?;
        self.sequence.advance_past(id);
        let (entity, _) = self.place(id, ArchetypeId::EMPTY);
        self.notify(EntityEvent::Created(entity));
        Ok(entity)
    }

    /// Create the entity for an id a command buffer reserved. Buffers hand
    /// out generation 0, so a slot used since the reservation counts as taken.
    pub(crate) fn create_reserved_entity(&mut self, id: u32) -> Result<Entity> {
        if self
            .nodes
            .get(id as usize)
            .is_some_and(|node| node.is_alive() || node.generation != 0)
        {
            return Err(EcsError::EntityIdInUse(id));
        }
        self.create_entity_with_id(id)
    }

    /// Create an entity directly in the archetype of `bundle`.
    pub fn create_entity_with<B: ComponentBundle>(&mut self, bundle: B) -> Result<Entity> {
        #[cfg(feature = "profiling")]
        let span = info_span!("store.create_entity", entities = self.alive);
        #[cfg(feature = "profiling")]
        let _span_guard = span.enter();

        let indices = B::struct_indices(&self.schema)?;
        let components = ComponentTypes::from_indices(indices.iter().copied());
        let archetype = self.archetype_for(ArchetypeKey::new(components, Tags::new()));
        let id = self.allocate_id()?;
        let (entity, row) = self.place(id, archetype);
        bundle.write(&indices, &mut self.archetypes[archetype.index()], row);
        self.index_components(id, archetype, row, &components);

        if !self.observers.is_empty() {
            self.notify(EntityEvent::Created(entity));
            for index in indices {
                self.notify(component_event(entity, index, ComponentAction::Add));
            }
        }
        Ok(entity)
    }

    pub fn delete_entity(&mut self, entity: Entity) -> Result<()> {
        let (archetype, row) = self.locate(entity)?;
        let id = entity.id();
        let components = *self.archetypes[archetype.index()].component_types();
        self.unindex_components(id, archetype, row, &components);

        if let Some(moved) = self.archetypes[archetype.index()].delete_row(row) {
            self.nodes[moved as usize].row = row as u32;
        }
        let node = &mut self.nodes[id as usize];
        node.archetype = None;
        node.generation = node.generation.wrapping_add(1);
        self.free_ids.push(id);
        self.alive -= 1;
        self.scripts.remove(&id);

        self.notify(EntityEvent::Deleted(entity));
        Ok(())
    }

    pub fn is_alive(&self, entity: Entity) -> bool {
        self.locate(entity).is_ok()
    }

    /// Current handle for a live id
    pub fn entity_by_id(&self, id: u32) -> Option<Entity> {
        let node = self.nodes.get(id as usize)?;
        node.is_alive().then(|| Entity::new(id, node.generation, self.id))
    }

    pub fn entity_location(&self, entity: Entity) -> Result<EntityLocation> {
        let (archetype, row) = self.locate(entity)?;
        Ok(EntityLocation { archetype, row })
    }

    pub fn entity(&self, entity: Entity) -> Result<EntityRef<'_>> {
        let location = self.entity_location(entity)?;
        Ok(EntityRef {
            store: self,
            entity,
            location,
        })
    }

    pub fn entity_count(&self) -> usize {
        self.alive
    }

    // ---- components -------------------------------------------------------

    /// Add or overwrite a component.
    ///
    /// Returns `true` if the component type was added, `false` if an existing
    /// value was overwritten in place.
    pub fn add_component<T: Component>(&mut self, entity: Entity, component: T) -> Result<bool> {
        let index = self.schema.component_index::<T>()?;
        let (archetype, row) = self.locate(entity)?;
        let id = entity.id();
        let single = ComponentTypes::from(index);

        if self.archetypes[archetype.index()].has_component(index) {
            self.unindex_components(id, archetype, row, &single);
            self.archetypes[archetype.index()].set_value(index, row, component);
            self.index_components(id, archetype, row, &single);
            self.notify(component_event(entity, index, ComponentAction::Update));
            return Ok(false);
        }

        let target = self.transition(archetype, Transition::AddComponent(index));
        let row = self.migrate(id, archetype, row, target);
        self.archetypes[target.index()].set_value(index, row, component);
        self.index_components(id, target, row, &single);
        self.notify(component_event(entity, index, ComponentAction::Add));
        Ok(true)
    }

    /// Remove a component. Returns `false` if it was not present.
    pub fn remove_component<T: Component>(&mut self, entity: Entity) -> Result<bool> {
        let index = self.schema.component_index::<T>()?;
        let (archetype, row) = self.locate(entity)?;
        if !self.archetypes[archetype.index()].has_component(index) {
            return Ok(false);
        }

        let id = entity.id();
        self.unindex_components(id, archetype, row, &ComponentTypes::from(index));
        let target = self.transition(archetype, Transition::RemoveComponent(index));
        self.migrate(id, archetype, row, target);
        self.notify(component_event(entity, index, ComponentAction::Remove));
        Ok(true)
    }

    pub fn get_component<T: Component>(&self, entity: Entity) -> Result<&T> {
        let index = self.schema.component_index::<T>()?;
        let (archetype, row) = self.locate(entity)?;
        self.archetypes[archetype.index()]
            .component::<T>(index, row)
            .ok_or(EcsError::ComponentNotFound {
                entity,
                type_name: std::any::type_name::<T>(),
            })
    }

    /// Mutable access in place. Does not update value indexes or fire events.
    pub fn get_component_mut<T: Component>(&mut self, entity: Entity) -> Result<&mut T> {
        let index = self.schema.component_index::<T>()?;
        let (archetype, row) = self.locate(entity)?;
        self.archetypes[archetype.index()]
            .component_mut::<T>(index, row)
            .ok_or(EcsError::ComponentNotFound {
                entity,
                type_name: std::any::type_name::<T>(),
            })
    }

    pub fn has_component<T: Component>(&self, entity: Entity) -> bool {
        match (self.schema.component_index::<T>(), self.locate(entity)) {
            (Ok(index), Ok((archetype, _))) => self.archetypes[archetype.index()].has_component(index),
            _ => false,
        }
    }

    /// Component types of a live entity
    pub fn component_types(&self, entity: Entity) -> Result<ComponentTypes> {
        let (archetype, _) = self.locate(entity)?;
        Ok(*self.archetypes[archetype.index()].component_types())
    }

    /// Component value by struct index, for mappers that do not know `T`.
    pub fn component_value(&self, entity: Entity, index: StructIndex) -> Result<&dyn Any> {
        let (archetype, row) = self.locate(entity)?;
        self.archetypes[archetype.index()]
            .value(index, row)
            .ok_or_else(|| self.missing_index(entity, index))
    }

    pub fn component_value_mut(&mut self, entity: Entity, index: StructIndex) -> Result<&mut dyn Any> {
        let (archetype, row) = self.locate(entity)?;
        let type_name = self.type_name_of(index);
        self.archetypes[archetype.index()]
            .value_mut(index, row)
            .ok_or(EcsError::ComponentNotFound { entity, type_name })
    }

    fn missing_index(&self, entity: Entity, index: StructIndex) -> EcsError {
        EcsError::ComponentNotFound {
            entity,
            type_name: self.type_name_of(index),
        }
    }

    fn type_name_of(&self, index: StructIndex) -> &'static str {
        self.schema
            .component(index)
            .map_or("<unregistered>", |t| t.type_name())
    }

    // ---- tags -------------------------------------------------------------

    pub fn add_tag<T: 'static>(&mut self, entity: Entity) -> Result<bool> {
        let tags = self.schema.tags_of::<T>()?;
        self.add_tags(entity, tags)
    }

    pub fn remove_tag<T: 'static>(&mut self, entity: Entity) -> Result<bool> {
        let tags = self.schema.tags_of::<T>()?;
        self.remove_tags(entity, tags)
    }

    /// Add every tag in `tags`. Returns `false` if all were already present.
    pub fn add_tags(&mut self, entity: Entity, tags: Tags) -> Result<bool> {
        let (archetype, row) = self.locate(entity)?;
        let old_tags = *self.archetypes[archetype.index()].tags();
        let new_tags = old_tags | tags;
        if new_tags == old_tags {
            return Ok(false);
        }
        let target = self.transition(archetype, Transition::AddTags(tags));
        self.migrate(entity.id(), archetype, row, target);
        self.notify(tags_event(entity, old_tags, new_tags));
        Ok(true)
    }

    /// Remove every tag in `tags`. Returns `false` if none was present.
    pub fn remove_tags(&mut self, entity: Entity, tags: Tags) -> Result<bool> {
        let (archetype, row) = self.locate(entity)?;
        let old_tags = *self.archetypes[archetype.index()].tags();
        if !old_tags.has_any(&tags) {
            return Ok(false);
        }
        let new_tags = old_tags.difference(&tags);
        let target = self.transition(archetype, Transition::RemoveTags(tags));
        self.migrate(entity.id(), archetype, row, target);
        self.notify(tags_event(entity, old_tags, new_tags));
        Ok(true)
    }

    pub fn has_tag<T: 'static>(&self, entity: Entity) -> bool {
        match (self.schema.tag_index::<T>(), self.locate(entity)) {
            (Ok(index), Ok((archetype, _))) => self.archetypes[archetype.index()].tags().has(index),
            _ => false,
        }
    }

    pub fn tags(&self, entity: Entity) -> Result<Tags> {
        let (archetype, _) = self.locate(entity)?;
        Ok(*self.archetypes[archetype.index()].tags())
    }

    // ---- scripts ----------------------------------------------------------

    /// Attach a script. Returns `false` if a script of the same type was replaced.
    pub fn add_script<S: Script>(&mut self, entity: Entity, script: S) -> Result<bool> {
        let index = self.schema.script_index::<S>()?;
        self.locate(entity)?;
        let slots = self.scripts.entry(entity.id()).or_default();
        if let Some(slot) = slots.iter_mut().find(|(other, _)| *other == index) {
            slot.1 = Box::new(script);
            return Ok(false);
        }
        slots.push((index, Box::new(script)));
        Ok(true)
    }

    pub fn get_script<S: Script>(&self, entity: Entity) -> Result<&S> {
        let index = self.schema.script_index::<S>()?;
        self.locate(entity)?;
        self.scripts
            .get(&entity.id())
            .and_then(|slots| slots.iter().find(|(other, _)| *other == index))
            .and_then(|(_, script)| (**script).downcast_ref::<S>())
            .ok_or(EcsError::ComponentNotFound {
                entity,
                type_name: std::any::type_name::<S>(),
            })
    }

    pub fn remove_script<S: Script>(&mut self, entity: Entity) -> Result<Option<S>> {
        let index = self.schema.script_index::<S>()?;
        self.locate(entity)?;
        let Some(slots) = self.scripts.get_mut(&entity.id()) else {
            return Ok(None);
        };
        let Some(position) = slots.iter().position(|(other, _)| *other == index) else {
            return Ok(None);
        };
        let (_, script) = slots.remove(position);
        if slots.is_empty() {
            self.scripts.remove(&entity.id());
        }
        Ok(script.downcast::<S>().ok().map(|script| *script))
    }

    /// Script indices attached to an entity
    pub fn scripts(&self, entity: Entity) -> Result<Vec<ScriptIndex>> {
        self.locate(entity)?;
        Ok(self
            .scripts
            .get(&entity.id())
            .map(|slots| slots.iter().map(|(index, _)| *index).collect())
            .unwrap_or_default())
    }

    // ---- archetypes -------------------------------------------------------

    /// All archetypes in creation order
    pub fn archetypes(&self) -> &[Archetype] {
        &self.archetypes
    }

    pub fn archetype(&self, id: ArchetypeId) -> Option<&Archetype> {
        self.archetypes.get(id.index())
    }

    pub(crate) fn archetype_mut(&mut self, id: ArchetypeId) -> Option<&mut Archetype> {
        self.archetypes.get_mut(id.index())
    }

    pub fn archetype_count(&self) -> usize {
        self.archetypes.len()
    }

    /// Existing archetype for exactly this component and tag set
    pub fn find_archetype(&self, components: &ComponentTypes, tags: &Tags) -> Option<&Archetype> {
        let id = self
            .archetype_index
            .get(&ArchetypeKey::new(*components, *tags))?;
        self.archetypes.get(id.index())
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            entities: self.alive,
            archetypes: self.archetypes.len(),
            allocated_rows: self.archetypes.iter().map(Archetype::capacity).sum(),
            free_ids: self.free_ids.iter().filter(|id| !self.is_id_alive(**id)).count(),
            next_id: self.sequence.peek(),
            node_slots: self.nodes.len(),
            indexed_values: self.indexes.iter().flatten().map(|index| index.value_count()).sum(),
        }
    }

    // ---- queries and commands ---------------------------------------------

    pub fn query<Q: QueryComponents>(&self) -> Result<ArchetypeQuery<Q>> {
        ArchetypeQuery::new(self)
    }

    pub fn query_filtered<Q: QueryComponents>(&self, filter: QueryFilter) -> Result<ArchetypeQuery<Q>> {
        Ok(ArchetypeQuery::new(self)?.with_filter(filter))
    }

    /// New command buffer bound to this store
    pub fn command_buffer(&self) -> CommandBuffer {
        CommandBuffer::new(self.id, Arc::clone(&self.schema), Arc::clone(&self.sequence))
    }

    /// Shorthand for [`CommandBuffer::playback`]
    pub fn playback(&mut self, buffer: &mut CommandBuffer) -> Result<PlaybackReport> {
        buffer.playback(self)
    }

    // ---- observers --------------------------------------------------------

    pub fn add_observer<O: Observer + 'static>(&mut self, observer: O) -> ObserverId {
        self.observers.register(Box::new(observer))
    }

    pub fn remove_observer(&mut self, id: ObserverId) -> bool {
        self.observers.unregister(id).is_some()
    }

    pub fn observers_mut(&mut self) -> &mut ObserverRegistry {
        &mut self.observers
    }

    // ---- value indexes ----------------------------------------------------

    pub fn value_index<T: IndexedComponent>(&self) -> Result<&ValueIndex<T>> {
        let index = self.schema.component_index::<T>()?;
        self.indexes
            .get(index.get())
            .and_then(|slot| slot.as_ref())
            .and_then(|indexer| indexer.as_any().downcast_ref::<ValueIndex<T>>())
            .ok_or_else(|| {
                EcsError::InvalidQuery(format!(
                    "{} is not an indexed component",
                    std::any::type_name::<T>()
                ))
            })
    }

    /// Entities whose `T` maps to `value`
    pub fn entities_with_value<T: IndexedComponent>(&self, value: &T::Value) -> Result<Vec<Entity>> {
        let index = self.value_index::<T>()?;
        Ok(index
            .ids(value)
            .iter()
            .filter_map(|&id| self.entity_by_id(id))
            .collect())
    }

    /// Distinct values currently held by `T` components
    pub fn indexed_values<T: IndexedComponent>(&self) -> Result<Vec<T::Value>> {
        Ok(self.value_index::<T>()?.values().cloned().collect())
    }

    /// Entities whose link component `T` points at `target`
    pub fn linked_entities<T>(&self, target: Entity) -> Result<Vec<Entity>>
    where
        T: IndexedComponent<Value = Entity>,
    {
        self.entities_with_value::<T>(&target)
    }

    // ---- internals shared with command playback ---------------------------

    pub(crate) fn locate(&self, entity: Entity) -> Result<(ArchetypeId, usize)> {
        if entity.store() != self.id {
            return Err(EcsError::InvalidStoreOwnership {
                expected: self.id,
                found: entity.store(),
            });
        }
        match self.nodes.get(entity.id() as usize) {
            Some(node) if node.generation == entity.generation() => node
                .archetype
                .map(|archetype| (archetype, node.row as usize))
                .ok_or(EcsError::EntityNotFound(entity)),
            _ => Err(EcsError::EntityNotFound(entity)),
        }
    }

    fn is_id_alive(&self, id: u32) -> bool {
        self.nodes
            .get(id as usize)
            .is_some_and(EntityNode::is_alive)
    }

    fn allocate_id(&mut self) -> Result<u32> {
        // Ids re-created explicitly while on the free list are skipped here
        while let Some(id) = self.free_ids.pop() {
            if !self.is_id_alive(id) {
                return Ok(id);
            }
        }
        self.sequence.reserve().ok_or(EcsError::CapacityOverflow {
            limit: self.sequence.limit(),
        })
    }

    /// Grow the node table to hold `id`.
    fn reserve_slot(&mut self, id: u32) -> Result<()> {
        let slot = id as usize;
        if self.nodes.len() <= slot {
            let additional = slot + 1 - self.nodes.len();
            self.nodes
                .try_reserve_exact(additional)
                .map_err(|_| EcsError::CapacityOverflow {
                    limit: self.sequence.limit(),
                })?;
            self.nodes.resize(slot + 1, EntityNode::default());
        }
        Ok(())
    }

    fn place(&mut self, id: u32, archetype: ArchetypeId) -> (Entity, usize) {
        let slot = id as usize;
        if self.nodes.len() <= slot {
            self.nodes.resize(slot + 1, EntityNode::default());
        }
        let generation = self.nodes[slot].generation;
        let row = self.archetypes[archetype.index()].create_row(id, generation);
        let node = &mut self.nodes[slot];
        node.archetype = Some(archetype);
        node.row = row as u32;
        self.alive += 1;
        (Entity::new(id, generation, self.id), row)
    }

    /// Archetype for `key`, created empty on first use.
    pub(crate) fn archetype_for(&mut self, key: ArchetypeKey) -> ArchetypeId {
        if let Some(&id) = self.archetype_index.get(&key) {
            return id;
        }
        let id = ArchetypeId::new(self.archetypes.len());
        tracing::debug!(
            archetype = id.index(),
            components = ?key.components,
            tags = ?key.tags,
            "created archetype"
        );
        self.archetypes.push(Archetype::new(
            id,
            key,
            &self.schema,
            self.config.min_archetype_capacity,
        ));
        self.archetype_index.insert(key, id);
        id
    }

    fn transition(&mut self, from: ArchetypeId, transition: Transition) -> ArchetypeId {
        if let Some(&to) = self.transitions.get(&(from, transition)) {
            return to;
        }
        let mut key = *self.archetypes[from.index()].key();
        match transition {
            Transition::AddComponent(index) => key.components.add(index),
            Transition::RemoveComponent(index) => key.components.remove(index),
            Transition::AddTags(tags) => key.tags |= tags,
            Transition::RemoveTags(tags) => key.tags = key.tags.difference(&tags),
        }
        let to = self.archetype_for(key);
        self.transitions.insert((from, transition), to);
        to
    }

    /// Move entity `id` from `(from, row)` to a new row in `to`. Values of
    /// types missing from `to` are dropped. Returns the new row.
    pub(crate) fn migrate(&mut self, id: u32, from: ArchetypeId, row: usize, to: ArchetypeId) -> usize {
        #[cfg(feature = "profiling")]
        let span = info_span!("store.migrate", from = from.index(), to = to.index());
        #[cfg(feature = "profiling")]
        let _span_guard = span.enter();

        tracing::trace!(entity = id, from = from.index(), to = to.index(), "migrate entity");

        let (src, dst) = archetype_pair(&mut self.archetypes, from.index(), to.index());
        let dst_row = dst.create_row(id, self.nodes[id as usize].generation);
        src.move_row_to(row, dst, dst_row);
        if let Some(moved) = src.delete_row(row) {
            self.nodes[moved as usize].row = row as u32;
        }

        let node = &mut self.nodes[id as usize];
        node.archetype = Some(to);
        node.row = dst_row as u32;
        dst_row
    }

    pub(crate) fn index_components(
        &mut self,
        id: u32,
        archetype: ArchetypeId,
        row: usize,
        components: &ComponentTypes,
    ) {
        let targets = components.intersection(&self.indexed);
        if targets.is_empty() {
            return;
        }
        let archetype = &self.archetypes[archetype.index()];
        for index in targets.iter() {
            if let (Some(value), Some(Some(indexer))) =
                (archetype.value(index, row), self.indexes.get_mut(index.get()))
            {
                indexer.insert(id, value);
            }
        }
    }

    pub(crate) fn unindex_components(
        &mut self,
        id: u32,
        archetype: ArchetypeId,
        row: usize,
        components: &ComponentTypes,
    ) {
        let targets = components.intersection(&self.indexed);
        if targets.is_empty() {
            return;
        }
        let archetype = &self.archetypes[archetype.index()];
        for index in targets.iter() {
            if let (Some(value), Some(Some(indexer))) =
                (archetype.value(index, row), self.indexes.get_mut(index.get()))
            {
                indexer.remove(id, value);
            }
        }
    }

    pub(crate) fn notify(&mut self, event: EntityEvent) {
        if !self.observers.is_empty() {
            self.observers.broadcast(&event);
        }
    }
}

impl Default for EntityStore {
    /// Store over the process-wide registry. Freezes it.
    fn default() -> Self {
        Self::from_registry(SchemaRegistry::global())
    }
}

fn archetype_pair(archetypes: &mut [Archetype], a: usize, b: usize) -> (&mut Archetype, &mut Archetype) {
    debug_assert_ne!(a, b);
    if a < b {
        let (left, right) = archetypes.split_at_mut(b);
        (&mut left[a], &mut right[0])
    } else {
        let (left, right) = archetypes.split_at_mut(a);
        (&mut right[0], &mut left[b])
    }
}

pub(crate) fn component_event(entity: Entity, struct_index: StructIndex, action: ComponentAction) -> EntityEvent {
    EntityEvent::ComponentChanged(ComponentChanged {
        entity,
        struct_index,
        action,
    })
}

pub(crate) fn tags_event(entity: Entity, old_tags: Tags, tags: Tags) -> EntityEvent {
    EntityEvent::TagsChanged(TagsChanged {
        entity,
        old_tags,
        tags,
    })
}

/// Borrowed view of one live entity
pub struct EntityRef<'a> {
    store: &'a EntityStore,
    entity: Entity,
    location: EntityLocation,
}

impl<'a> EntityRef<'a> {
    pub fn entity(&self) -> Entity {
        self.entity
    }

    pub fn location(&self) -> EntityLocation {
        self.location
    }

    pub fn archetype(&self) -> &'a Archetype {
        &self.store.archetypes[self.location.archetype.index()]
    }

    pub fn get<T: Component>(&self) -> Result<&'a T> {
        let index = self.store.schema.component_index::<T>()?;
        self.archetype()
            .component::<T>(index, self.location.row)
            .ok_or(EcsError::ComponentNotFound {
                entity: self.entity,
                type_name: std::any::type_name::<T>(),
            })
    }

    pub fn has<T: Component>(&self) -> bool {
        self.store
            .schema
            .component_index::<T>()
            .is_ok_and(|index| self.archetype().has_component(index))
    }

    pub fn has_tag<T: 'static>(&self) -> bool {
        self.store
            .schema
            .tag_index::<T>()
            .is_ok_and(|index| self.archetype().tags().has(index))
    }

    pub fn tags(&self) -> Tags {
        *self.archetype().tags()
    }

    pub fn component_types(&self) -> ComponentTypes {
        *self.archetype().component_types()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaRegistry;

    #[derive(Debug, Default, Clone, Copy, PartialEq)]
    struct Position(f32, f32, f32);

    #[derive(Debug, Default, Clone, Copy, PartialEq)]
    struct Rotation(f32);

    struct Disabled;

    struct Mover {
        speed: f32,
    }

    fn store() -> Result<EntityStore> {
        let registry = SchemaRegistry::new();
        registry.register_component::<Position>()?;
        registry.register_component::<Rotation>()?;
        registry.register_tag::<Disabled>()?;
        registry.register_script::<Mover>()?;
        Ok(EntityStore::from_registry(&registry))
    }

    #[test]
    fn test_create_and_delete() -> Result<()> {
        let mut store = store()?;
        let a = store.create_entity()?;
        let b = store.create_entity()?;
        assert_eq!((a.id(), b.id()), (1, 2));
        assert_eq!(store.entity_count(), 2);

        store.delete_entity(a)?;
        assert!(!store.is_alive(a));
        assert!(matches!(store.delete_entity(a), Err(EcsError::EntityNotFound(_))));

        // id reused with a bumped generation
        let c = store.create_entity()?;
        assert_eq!(c.id(), a.id());
        assert_ne!(c.generation(), a.generation());
        assert!(matches!(
            store.add_component(a, Position::default()),
            Err(EcsError::EntityNotFound(_))
        ));
        Ok(())
    }

    #[test]
    fn test_add_overwrite_remove() -> Result<()> {
        let mut store = store()?;
        let e = store.create_entity()?;
        assert!(store.add_component(e, Position(1.0, 1.0, 1.0))?);
        assert!(!store.add_component(e, Position(2.0, 2.0, 2.0))?);
        assert_eq!(store.get_component::<Position>(e)?, &Position(2.0, 2.0, 2.0));

        assert!(store.remove_component::<Position>(e)?);
        assert!(!store.remove_component::<Position>(e)?);
        assert!(matches!(
            store.get_component::<Position>(e),
            Err(EcsError::ComponentNotFound { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_explicit_ids() -> Result<()> {
        let mut store = store()?;
        let e = store.create_entity_with_id(10)?;
        assert_eq!(e.id(), 10);
        assert!(matches!(store.create_entity_with_id(10), Err(EcsError::EntityIdInUse(10))));
        assert!(matches!(store.create_entity_with_id(0), Err(EcsError::InvalidEntityId(0))));
        assert_eq!(store.create_entity()?.id(), 11);
        Ok(())
    }

    #[test]
    fn test_explicit_ids_bounded_by_max_entities() -> Result<()> {
        let registry = SchemaRegistry::new();
        let config = StoreConfig::default().with_max_entities(1_000);
        let mut store = EntityStore::with_config(registry.entity_schema(), config)?;

        store.create_entity_with_id(1_000)?;
        assert_eq!(store.stats().node_slots, 1_001);
        assert!(matches!(
            store.create_entity_with_id(1_001),
            Err(EcsError::InvalidEntityId(1_001))
        ));
        assert!(matches!(
            store.create_entity_with_id(u32::MAX - 1),
            Err(EcsError::InvalidEntityId(_))
        ));
        assert_eq!(store.stats().node_slots, 1_001);
        Ok(())
    }

    #[test]
    fn test_capacity_overflow() -> Result<()> {
        let registry = SchemaRegistry::new();
        let config = StoreConfig::default().with_max_entities(2);
        let mut store = EntityStore::with_config(registry.entity_schema(), config)?;
        store.create_entity()?;
        store.create_entity()?;
        assert!(matches!(
            store.create_entity(),
            Err(EcsError::CapacityOverflow { limit: 2 })
        ));
        Ok(())
    }

    #[test]
    fn test_foreign_handle_rejected() -> Result<()> {
        let mut first = store()?;
        let second = store()?;
        let e = first.create_entity()?;
        assert!(matches!(
            second.get_component::<Position>(e),
            Err(EcsError::InvalidStoreOwnership { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_tags_migrate() -> Result<()> {
        let mut store = store()?;
        let e = store.create_entity_with((Position(1.0, 2.0, 3.0),))?;
        assert!(store.add_tag::<Disabled>(e)?);
        assert!(!store.add_tag::<Disabled>(e)?);
        assert!(store.has_tag::<Disabled>(e));
        assert_eq!(store.get_component::<Position>(e)?, &Position(1.0, 2.0, 3.0));

        let entity = store.entity(e)?;
        assert!(entity.has_tag::<Disabled>());
        assert!(entity.has::<Position>());

        assert!(store.remove_tag::<Disabled>(e)?);
        assert!(store.tags(e)?.is_empty());
        Ok(())
    }

    #[test]
    fn test_scripts() -> Result<()> {
        let mut store = store()?;
        let e = store.create_entity()?;
        assert!(store.add_script(e, Mover { speed: 1.0 })?);
        assert!(!store.add_script(e, Mover { speed: 2.0 })?);
        assert_eq!(store.get_script::<Mover>(e)?.speed, 2.0);
        assert_eq!(store.scripts(e)?.len(), 1);

        let removed = store.remove_script::<Mover>(e)?;
        assert_eq!(removed.map(|m| m.speed), Some(2.0));
        assert!(store.get_script::<Mover>(e).is_err());
        Ok(())
    }

    #[test]
    fn test_component_value_by_index() -> Result<()> {
        let mut store = store()?;
        let pos = store.schema().component_index::<Position>()?;
        let e = store.create_entity_with((Position(4.0, 5.0, 6.0),))?;

        if let Some(p) = store.component_value_mut(e, pos)?.downcast_mut::<Position>() {
            p.0 = 9.0;
        }
        let value = store.component_value(e, pos)?;
        assert_eq!(value.downcast_ref::<Position>(), Some(&Position(9.0, 5.0, 6.0)));
        Ok(())
    }

    #[test]
    fn test_find_archetype_and_stats() -> Result<()> {
        let mut store = store()?;
        let pos = store.schema().component_types_of::<Position>()?;
        assert!(store.find_archetype(&pos, &Tags::new()).is_none());
        store.create_entity_with((Position::default(),))?;
        let archetype = store.find_archetype(&pos, &Tags::new());
        assert_eq!(archetype.map(Archetype::entity_count), Some(1));

        let stats = store.stats();
        assert_eq!(stats.entities, 1);
        assert_eq!(stats.archetypes, 2);
        assert_eq!(stats.next_id, 2);
        Ok(())
    }
}
