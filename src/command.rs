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

//! Deferred structural changes
//!
//! A [`CommandBuffer`] records creates, deletes, component and tag changes
//! without touching the store, so it can be filled while the store is
//! borrowed by a query job. [`CommandBuffer::playback`] applies it once:
//!
//! 1. creates, then deletes
//! 2. resolve the final component and tag set of every touched entity
//! 3. migrate each entity at most once, straight to its final archetype
//! 4. write queued values, skipping types missing from the final set
//! 5. re-index and fire change events for the net effect
//!
//! Within one buffer the last add or remove of a type decides membership,
//! and a delete drops every other command for that entity. So does a failed
//! create. A failing command
//! is reported in [`PlaybackReport::errors`]; the rest of the buffer still
//! applies.

use std::any::Any;
use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::warn;

#[cfg(feature = "profiling")]
use tracing::info_span;

use crate::archetype::ArchetypeKey;
use crate::component::Component;
use crate::entity::{Entity, IdSequence, StoreId};
use crate::error::{EcsError, Result, SchemaError};
use crate::event::ComponentAction;
use crate::schema::{EntitySchema, SchemaKind, StructIndex};
use crate::store::{component_event, tags_event, EntityStore};
use crate::types::{ComponentTypes, Tags};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CommandAction {
    Add,
    Update,
    Remove,
}

struct ComponentCommand<T> {
    entity: Entity,
    action: CommandAction,
    value: Option<T>,
}

/// Queue of commands for one component type
struct StructCommands<T: Component> {
    index: StructIndex,
    commands: Vec<ComponentCommand<T>>,
}

impl<T: Component> StructCommands<T> {
    fn new(index: StructIndex) -> Self {
        Self {
            index,
            commands: Vec::new(),
        }
    }
}

/// Type-erased per-type queue, driven by playback
trait ComponentCommands: Send {
    fn len(&self) -> usize;

    /// Fold membership changes into `resolution`.
    fn resolve(&self, store: &EntityStore, resolution: &mut Resolution, report: &mut PlaybackReport);

    /// Write queued values into the migrated rows.
    fn write(&mut self, store: &mut EntityStore, resolution: &mut Resolution);

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Component> ComponentCommands for StructCommands<T> {
    fn len(&self) -> usize {
        self.commands.len()
    }

    fn resolve(&self, store: &EntityStore, resolution: &mut Resolution, report: &mut PlaybackReport) {
        for command in &self.commands {
            let Some(change) = resolution.change_mut(store, command.entity, report) else {
                continue;
            };
            match command.action {
                CommandAction::Add => change.target.components.add(self.index),
                CommandAction::Remove => change.target.components.remove(self.index),
                CommandAction::Update => {}
            }
        }
    }

    fn write(&mut self, store: &mut EntityStore, resolution: &mut Resolution) {
        let index = self.index;
        for command in &mut self.commands {
            let Some(value) = command.value.take() else {
                continue;
            };
            let Some(change) = resolution.resolved_mut(command.entity) else {
                continue;
            };
            if !change.target.components.has(index) {
                continue;
            }
            let Ok((archetype, row)) = store.locate(command.entity) else {
                continue;
            };
            let written = store
                .archetype_mut(archetype)
                .is_some_and(|archetype| archetype.set_value(index, row, value));
            if written && change.original.components.has(index) {
                change.updated.add(index);
            }
        }
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[derive(Debug, Clone, Copy)]
struct TagCommand {
    entity: Entity,
    tags: Tags,
    add: bool,
}

/// Net change of one entity
struct EntityChange {
    entity: Entity,
    original: ArchetypeKey,
    target: ArchetypeKey,
    /// Types present before and after whose value was overwritten
    updated: ComponentTypes,
}

#[derive(Default)]
struct Resolution {
    changes: Vec<EntityChange>,
    /// entity id -> position in `changes`
    slots: FxHashMap<u32, usize>,
    /// Ids deleted by this buffer or whose buffered create failed
    skipped: FxHashSet<u32>,
}

impl Resolution {
    /// Change record for `entity`, created on first use. Failures are
    /// reported once per command.
    fn change_mut(
        &mut self,
        store: &EntityStore,
        entity: Entity,
        report: &mut PlaybackReport,
    ) -> Option<&mut EntityChange> {
        if self.skipped.contains(&entity.id()) && entity.store() == store.id() {
            return None;
        }
        if let Some(&slot) = self.slots.get(&entity.id()) {
            if self.changes[slot].entity == entity {
                return Some(&mut self.changes[slot]);
            }
        }

        let key = match store.locate(entity) {
            Ok((archetype, _)) => store
                .archetype(archetype)
                .map(|archetype| *archetype.key())
                .unwrap_or_default(),
            Err(err) => {
                warn!(?entity, error = %err, "dropping buffered command");
                report.errors.push(err);
                return None;
            }
        };
        let slot = self.changes.len();
        self.slots.insert(entity.id(), slot);
        self.changes.push(EntityChange {
            entity,
            original: key,
            target: key,
            updated: ComponentTypes::new(),
        });
        Some(&mut self.changes[slot])
    }

    fn resolved_mut(&mut self, entity: Entity) -> Option<&mut EntityChange> {
        let slot = *self.slots.get(&entity.id())?;
        let change = &mut self.changes[slot];
        (change.entity == entity).then_some(change)
    }
}

/// Outcome of [`CommandBuffer::playback`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlaybackReport {
    /// Entities created by the buffer
    pub created: Vec<Entity>,
    pub deleted: usize,
    /// Entities moved to another archetype
    pub migrated: usize,
    /// One entry per failed command
    pub errors: Vec<EcsError>,
}

impl PlaybackReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Recorded structural changes for one store, played back once
pub struct CommandBuffer {
    store: StoreId,
    schema: Arc<EntitySchema>,
    sequence: Arc<IdSequence>,
    played: bool,
    creates: Vec<u32>,
    deletes: Vec<Entity>,
    /// Indexed by StructIndex
    components: Vec<Option<Box<dyn ComponentCommands>>>,
    tags: Vec<TagCommand>,
}

impl CommandBuffer {
    pub(crate) fn new(store: StoreId, schema: Arc<EntitySchema>, sequence: Arc<IdSequence>) -> Self {
        Self {
            store,
            schema,
            sequence,
            played: false,
            creates: Vec::new(),
            deletes: Vec::new(),
            components: Vec::new(),
            tags: Vec::new(),
        }
    }

    /// Store this buffer belongs to
    pub fn store_id(&self) -> StoreId {
        self.store
    }

    /// Number of recorded commands
    pub fn len(&self) -> usize {
        self.creates.len()
            + self.deletes.len()
            + self.tags.len()
            + self
                .components
                .iter()
                .flatten()
                .map(|commands| commands.len())
                .sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_played(&self) -> bool {
        self.played
    }

    /// Reserve an id now and create the entity at playback.
    ///
    /// The returned handle is valid for the other commands of this buffer
    /// and, after playback, for the store.
    pub fn create_entity(&mut self) -> Result<Entity> {
        self.check_recording()?;
        let id = self.sequence.reserve().ok_or(EcsError::CapacityOverflow {
            limit: self.sequence.limit(),
        })?;
        self.creates.push(id);
        Ok(Entity::new(id, 0, self.store))
    }

    pub fn delete_entity(&mut self, entity: Entity) -> Result<()> {
        self.check_recording()?;
        self.deletes.push(entity);
        Ok(())
    }

    /// Add `T`, or overwrite it if already present.
    pub fn add_component<T: Component>(&mut self, entity: Entity, component: T) -> Result<()> {
        self.push(entity, CommandAction::Add, Some(component))
    }

    /// Overwrite `T` if the entity has it after playback. Never adds the type.
    pub fn set_component<T: Component>(&mut self, entity: Entity, component: T) -> Result<()> {
        self.push(entity, CommandAction::Update, Some(component))
    }

    pub fn remove_component<T: Component>(&mut self, entity: Entity) -> Result<()> {
        self.push::<T>(entity, CommandAction::Remove, None)
    }

    pub fn add_tags(&mut self, entity: Entity, tags: Tags) -> Result<()> {
        self.check_recording()?;
        self.tags.push(TagCommand {
            entity,
            tags,
            add: true,
        });
        Ok(())
    }

    pub fn remove_tags(&mut self, entity: Entity, tags: Tags) -> Result<()> {
        self.check_recording()?;
        self.tags.push(TagCommand {
            entity,
            tags,
            add: false,
        });
        Ok(())
    }

    pub fn add_tag<T: 'static>(&mut self, entity: Entity) -> Result<()> {
        let tags = self.schema.tags_of::<T>()?;
        self.add_tags(entity, tags)
    }

    pub fn remove_tag<T: 'static>(&mut self, entity: Entity) -> Result<()> {
        let tags = self.schema.tags_of::<T>()?;
        self.remove_tags(entity, tags)
    }

    fn check_recording(&self) -> Result<()> {
        if self.played {
            warn!(store = self.store.get(), "command recorded into a played buffer");
            return Err(EcsError::AlreadyPlayedBack);
        }
        Ok(())
    }

    fn push<T: Component>(&mut self, entity: Entity, action: CommandAction, value: Option<T>) -> Result<()> {
        self.check_recording()?;
        self.commands_mut::<T>()?.commands.push(ComponentCommand {
            entity,
            action,
            value,
        });
        Ok(())
    }

    fn commands_mut<T: Component>(&mut self) -> Result<&mut StructCommands<T>> {
        let index = self.schema.component_index::<T>()?;
        if self.components.len() <= index.get() {
            self.components.resize_with(index.get() + 1, || None);
        }
        self.components[index.get()]
            .get_or_insert_with(|| Box::new(StructCommands::<T>::new(index)))
            .as_any_mut()
            .downcast_mut::<StructCommands<T>>()
            .ok_or(EcsError::Schema(SchemaError::Unregistered {
                kind: SchemaKind::Component,
                type_name: std::any::type_name::<T>(),
            }))
    }

    /// Apply every recorded command to `store`. A buffer plays back once.
    pub fn playback(&mut self, store: &mut EntityStore) -> Result<PlaybackReport> {
        if self.played {
            return Err(EcsError::AlreadyPlayedBack);
        }
        if store.id() != self.store {
            return Err(EcsError::InvalidStoreOwnership {
                expected: self.store,
                found: store.id(),
            });
        }
        self.played = true;

        #[cfg(feature = "profiling")]
        let span = info_span!("command.playback", commands = self.len());
        #[cfg(feature = "profiling")]
        let _span_guard = span.enter();

        let mut report = PlaybackReport::default();
        let mut resolution = Resolution::default();

        for id in self.creates.drain(..) {
            match store.create_reserved_entity(id) {
                Ok(entity) => report.created.push(entity),
                Err(err) => {
                    warn!(id, error = %err, "buffered create failed");
                    resolution.skipped.insert(id);
                    report.errors.push(err);
                }
            }
        }
        for entity in self.deletes.drain(..) {
            match store.delete_entity(entity) {
                Ok(()) => {
                    resolution.skipped.insert(entity.id());
                    report.deleted += 1;
                }
                Err(err) => {
                    warn!(?entity, error = %err, "buffered delete failed");
                    report.errors.push(err);
                }
            }
        }

        for commands in self.components.iter().flatten() {
            commands.resolve(store, &mut resolution, &mut report);
        }
        for command in &self.tags {
            let Some(change) = resolution.change_mut(store, command.entity, &mut report) else {
                continue;
            };
            if command.add {
                change.target.tags |= command.tags;
            } else {
                change.target.tags = change.target.tags.difference(&command.tags);
            }
        }

        for change in &resolution.changes {
            let Ok((archetype, row)) = store.locate(change.entity) else {
                continue;
            };
            let id = change.entity.id();
            store.unindex_components(id, archetype, row, &change.original.components);
            if change.target != change.original {
                let target = store.archetype_for(change.target);
                store.migrate(id, archetype, row, target);
                report.migrated += 1;
            }
        }

        for commands in self.components.iter_mut().flatten() {
            commands.write(store, &mut resolution);
        }

        for change in &resolution.changes {
            let Ok((archetype, row)) = store.locate(change.entity) else {
                continue;
            };
            store.index_components(change.entity.id(), archetype, row, &change.target.components);
            notify_change(store, change);
        }

        self.components.clear();
        self.tags.clear();
        Ok(report)
    }
}

/// Fire events for the net effect of `change`.
fn notify_change(store: &mut EntityStore, change: &EntityChange) {
    let entity = change.entity;
    let before = &change.original;
    let after = &change.target;

    for index in after.components.difference(&before.components).iter() {
        store.notify(component_event(entity, index, ComponentAction::Add));
    }
    for index in change.updated.intersection(&after.components).iter() {
        store.notify(component_event(entity, index, ComponentAction::Update));
    }
    for index in before.components.difference(&after.components).iter() {
        store.notify(component_event(entity, index, ComponentAction::Remove));
    }
    if before.tags != after.tags {
        store.notify(tags_event(entity, before.tags, after.tags));
    }
}

impl std::fmt::Debug for CommandBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandBuffer")
            .field("store", &self.store)
            .field("commands", &self.len())
            .field("played", &self.played)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EntityEvent;
    use crate::schema::SchemaRegistry;
    use std::sync::Mutex;

    #[derive(Debug, Default, Clone, Copy, PartialEq)]
    struct Position(f32, f32);

    #[derive(Debug, Default, Clone, Copy, PartialEq)]
    struct Velocity(f32, f32);

    struct Frozen;

    fn store() -> Result<EntityStore> {
        let registry = SchemaRegistry::new();
        registry.register_component::<Position>()?;
        registry.register_component::<Velocity>()?;
        registry.register_tag::<Frozen>()?;
        Ok(EntityStore::from_registry(&registry))
    }

    fn record_events(store: &mut EntityStore) -> Arc<Mutex<Vec<&'static str>>> {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        store.add_observer(move |event: &EntityEvent| {
            let name = match event {
                EntityEvent::ComponentChanged(change) => match change.action {
                    ComponentAction::Add => "add",
                    ComponentAction::Update => "update",
                    ComponentAction::Remove => "remove",
                },
                other => other.event_type(),
            };
            sink.lock().unwrap().push(name);
        });
        log
    }

    #[test]
    fn test_add_then_remove_is_net_zero() -> Result<()> {
        let mut store = store()?;
        let e = store.create_entity()?;
        let log = record_events(&mut store);

        let mut buffer = store.command_buffer();
        buffer.add_component(e, Position(1.0, 1.0))?;
        buffer.remove_component::<Position>(e)?;
        let report = store.playback(&mut buffer)?;

        assert!(report.is_ok());
        assert_eq!(report.migrated, 0);
        assert!(!store.has_component::<Position>(e));
        assert!(log.lock().unwrap().is_empty());
        Ok(())
    }

    #[test]
    fn test_final_remove_wins_over_set() -> Result<()> {
        let mut store = store()?;
        let e = store.create_entity()?;
        let mut buffer = store.command_buffer();
        buffer.add_component(e, Position(1.0, 0.0))?;
        buffer.set_component(e, Position(2.0, 0.0))?;
        buffer.remove_component::<Position>(e)?;
        store.playback(&mut buffer)?;

        assert!(!store.has_component::<Position>(e));
        Ok(())
    }

    #[test]
    fn test_single_migration_for_many_changes() -> Result<()> {
        let mut store = store()?;
        let e = store.create_entity_with((Position(1.0, 2.0),))?;
        let mut buffer = store.command_buffer();
        buffer.add_component(e, Velocity(3.0, 4.0))?;
        buffer.add_tag::<Frozen>(e)?;
        buffer.set_component(e, Position(5.0, 6.0))?;
        let report = store.playback(&mut buffer)?;

        assert_eq!(report.migrated, 1);
        assert_eq!(store.get_component::<Position>(e)?, &Position(5.0, 6.0));
        assert_eq!(store.get_component::<Velocity>(e)?, &Velocity(3.0, 4.0));
        assert!(store.has_tag::<Frozen>(e));
        // no intermediate archetypes
        assert_eq!(store.archetype_count(), 3);
        Ok(())
    }

    #[test]
    fn test_create_and_add_in_same_buffer() -> Result<()> {
        let mut store = store()?;
        let mut buffer = store.command_buffer();
        let e = buffer.create_entity()?;
        buffer.add_component(e, Position(7.0, 8.0))?;
        let report = store.playback(&mut buffer)?;

        assert_eq!(report.created, vec![e]);
        assert_eq!(store.get_component::<Position>(e)?, &Position(7.0, 8.0));
        Ok(())
    }

    #[test]
    fn test_delete_drops_other_commands() -> Result<()> {
        let mut store = store()?;
        let e = store.create_entity()?;
        let mut buffer = store.command_buffer();
        buffer.add_component(e, Position::default())?;
        buffer.delete_entity(e)?;
        let report = store.playback(&mut buffer)?;

        assert!(report.is_ok());
        assert_eq!(report.deleted, 1);
        assert!(!store.is_alive(e));
        Ok(())
    }

    #[test]
    fn test_partial_playback() -> Result<()> {
        let mut store = store()?;
        let live = store.create_entity()?;
        let dead = store.create_entity()?;
        store.delete_entity(dead)?;

        let mut buffer = store.command_buffer();
        buffer.add_component(dead, Position::default())?;
        buffer.add_component(live, Position(1.0, 1.0))?;
        buffer.add_tag::<Frozen>(dead)?;
        let report = store.playback(&mut buffer)?;

        assert_eq!(report.errors.len(), 2);
        assert!(report
            .errors
            .iter()
            .all(|err| matches!(err, EcsError::EntityNotFound(_))));
        assert_eq!(store.get_component::<Position>(live)?, &Position(1.0, 1.0));
        Ok(())
    }

    #[test]
    fn test_single_use() -> Result<()> {
        let mut store = store()?;
        let e = store.create_entity()?;
        let mut buffer = store.command_buffer();
        buffer.add_component(e, Position::default())?;
        store.playback(&mut buffer)?;

        assert!(buffer.is_played());
        assert!(matches!(store.playback(&mut buffer), Err(EcsError::AlreadyPlayedBack)));
        assert!(matches!(
            buffer.remove_component::<Position>(e),
            Err(EcsError::AlreadyPlayedBack)
        ));
        Ok(())
    }

    #[test]
    fn test_wrong_store() -> Result<()> {
        let first = store()?;
        let mut second = store()?;
        let mut buffer = first.command_buffer();
        assert!(matches!(
            buffer.playback(&mut second),
            Err(EcsError::InvalidStoreOwnership { .. })
        ));
        assert!(!buffer.is_played());
        Ok(())
    }

    #[test]
    fn test_update_events() -> Result<()> {
        let mut store = store()?;
        let e = store.create_entity_with((Position::default(),))?;
        let log = record_events(&mut store);

        let mut buffer = store.command_buffer();
        buffer.add_component(e, Position(1.0, 1.0))?;
        buffer.add_component(e, Velocity(1.0, 1.0))?;
        buffer.add_tag::<Frozen>(e)?;
        store.playback(&mut buffer)?;

        assert_eq!(*log.lock().unwrap(), vec!["add", "update", "TagsChanged"]);
        Ok(())
    }

    #[test]
    fn test_set_never_adds() -> Result<()> {
        let mut store = store()?;
        let e = store.create_entity()?;
        let mut buffer = store.command_buffer();
        buffer.set_component(e, Velocity(1.0, 0.0))?;
        let report = store.playback(&mut buffer)?;

        assert!(report.is_ok());
        assert!(!store.has_component::<Velocity>(e));
        Ok(())
    }

    #[test]
    fn test_len() -> Result<()> {
        let store = store()?;
        let mut buffer = store.command_buffer();
        assert!(buffer.is_empty());
        let e = buffer.create_entity()?;
        buffer.add_component(e, Position::default())?;
        buffer.add_tag::<Frozen>(e)?;
        assert_eq!(buffer.len(), 3);
        Ok(())
    }
}
