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

//! Store-level scenarios

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use crate::{
    ComponentAction, EcsError, EntityEvent, EntityLocation, EntityStore, Observer, QueryFilter,
    Result, SchemaRegistry, StatisticsObserver,
};

#[derive(Debug, Default, Clone, Copy, PartialEq)]
struct Position(f32, f32, f32);

#[derive(Debug, Default, Clone, Copy, PartialEq)]
struct Rotation(f32, f32, f32, f32);

#[derive(Debug, Default, Clone, PartialEq)]
struct Name(String);

struct Disabled;

struct Other;

fn registry() -> Result<SchemaRegistry> {
    let registry = SchemaRegistry::new();
    registry.register_component::<Position>()?;
    registry.register_component::<Rotation>()?;
    registry.register_component::<Name>()?;
    registry.register_tag::<Disabled>()?;
    registry.register_tag::<Other>()?;
    Ok(registry)
}

/// Every occupied row maps back to its entity node and vice versa.
fn check_rows(store: &EntityStore) {
    let mut live = 0;
    for archetype in store.archetypes() {
        assert!(archetype.entity_count() <= archetype.capacity());
        for (row, &id) in archetype.entity_ids().iter().enumerate() {
            let entity = store.entity_by_id(id).expect("row holds a dead id");
            assert_eq!(
                store.entity_location(entity).ok(),
                Some(EntityLocation {
                    archetype: archetype.id(),
                    row,
                })
            );
            live += 1;
        }
    }
    assert_eq!(live, store.entity_count());
}

#[test]
fn test_add_component_keeps_values() -> Result<()> {
    let mut store = EntityStore::from_registry(&registry()?);
    let e = store.create_entity_with((Position(1.0, 1.0, 1.0),))?;
    let pos = store.schema().component_types_of::<Position>()?;
    assert_eq!(store.component_types(e)?, pos);

    store.add_component(e, Rotation::default())?;
    let both = pos | store.schema().component_types_of::<Rotation>()?;
    assert_eq!(store.component_types(e)?, both);
    assert_eq!(store.get_component::<Position>(e)?, &Position(1.0, 1.0, 1.0));
    check_rows(&store);
    Ok(())
}

#[test]
fn test_capacity_grows_and_shrinks() -> Result<()> {
    let mut store = EntityStore::from_registry(&registry()?);
    let mut entities = Vec::new();
    for _ in 0..2000 {
        entities.push(store.create_entity()?);
    }
    let empty = &store.archetypes()[0];
    assert_eq!(empty.entity_count(), 2000);
    assert_eq!(empty.capacity(), 2048);

    for entity in entities.drain(500..) {
        store.delete_entity(entity)?;
    }
    let empty = &store.archetypes()[0];
    assert_eq!(empty.entity_count(), 500);
    assert_eq!(empty.capacity(), 1024);
    check_rows(&store);
    Ok(())
}

#[test]
fn test_without_all_tags_query() -> Result<()> {
    let mut store = EntityStore::from_registry(&registry()?);
    let plain = store.create_entity_with((Position::default(),))?;
    let disabled = store.create_entity_with((Position::default(),))?;
    store.add_tag::<Disabled>(disabled)?;
    let other = store.create_entity_with((Position::default(),))?;
    store.add_tag::<Other>(other)?;

    let filter = QueryFilter::new().without_all_tags(store.schema().tags_of::<Disabled>()?);
    let mut query = store.query_filtered::<(Position,)>(filter)?;
    let mut found = query.entities(&store)?;
    found.sort_by_key(|e| e.id());
    assert_eq!(found, vec![plain, other]);
    Ok(())
}

#[test]
fn test_buffered_add_remove_fires_nothing() -> Result<()> {
    let mut store = EntityStore::from_registry(&registry()?);
    for _ in 0..5 {
        store.create_entity()?;
    }
    let e = store.entity_by_id(5).ok_or(EcsError::InvalidEntityId(5))?;

    let added = Arc::new(Mutex::new(0));
    let sink = Arc::clone(&added);
    store.add_observer(move |event: &EntityEvent| {
        if let EntityEvent::ComponentChanged(change) = event {
            if change.action == ComponentAction::Add {
                *sink.lock().unwrap() += 1;
            }
        }
    });

    let mut buffer = store.command_buffer();
    buffer.add_component(e, Position(1.0, 2.0, 3.0))?;
    buffer.remove_component::<Position>(e)?;
    assert!(store.playback(&mut buffer)?.is_ok());

    assert!(!store.has_component::<Position>(e));
    assert_eq!(*added.lock().unwrap(), 0);
    Ok(())
}

#[test]
fn test_migration_sequence_preserves_values() -> Result<()> {
    let mut store = EntityStore::from_registry(&registry()?);
    let entities: Vec<_> = (0..32)
        .map(|i| store.create_entity_with((Position(i as f32, 0.0, 0.0), Name(format!("e{i}")))))
        .collect::<Result<_>>()?;

    for (i, &e) in entities.iter().enumerate() {
        match i % 4 {
            0 => {
                store.add_component(e, Rotation(1.0, 0.0, 0.0, 0.0))?;
            }
            1 => {
                store.add_tag::<Disabled>(e)?;
            }
            2 => {
                store.remove_component::<Name>(e)?;
            }
            _ => {
                store.add_tag::<Other>(e)?;
                store.remove_tag::<Other>(e)?;
            }
        }
        check_rows(&store);
    }
    for &e in entities.iter().step_by(2) {
        store.delete_entity(e)?;
        assert!(!store.is_alive(e));
    }
    check_rows(&store);

    for (i, &e) in entities.iter().enumerate().skip(1).step_by(2) {
        assert_eq!(store.get_component::<Position>(e)?, &Position(i as f32, 0.0, 0.0));
        assert_eq!(store.has_component::<Name>(e), i % 4 != 2);
        if i % 4 != 2 {
            assert_eq!(store.get_component::<Name>(e)?, &Name(format!("e{i}")));
        }
    }
    Ok(())
}

#[test]
fn test_statistics_observer() -> Result<()> {
    let mut store = EntityStore::from_registry(&registry()?);
    let stats = Arc::new(Mutex::new(StatisticsObserver::new()));
    let sink = Arc::clone(&stats);
    store.add_observer(move |event: &EntityEvent| {
        sink.lock().unwrap().on_event(event);
    });

    let e = store.create_entity_with((Position::default(),))?;
    store.add_component(e, Position(1.0, 0.0, 0.0))?;
    store.add_tag::<Disabled>(e)?;
    store.remove_component::<Position>(e)?;
    store.delete_entity(e)?;

    let stats = stats.lock().unwrap();
    assert_eq!(stats.created, 1);
    assert_eq!(stats.component_additions, 1);
    assert_eq!(stats.component_updates, 1);
    assert_eq!(stats.tag_changes, 1);
    assert_eq!(stats.component_removals, 1);
    assert_eq!(stats.deleted, 1);
    Ok(())
}
