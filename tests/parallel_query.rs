use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use archetype_store::prelude::*;
use archetype_store::ArchetypeId;

#[derive(Debug, Default, Clone, Copy, PartialEq)]
struct Position {
    x: f32,
    y: f32,
}

#[derive(Debug, Default, Clone, Copy, PartialEq)]
struct Velocity {
    x: f32,
    y: f32,
}

#[derive(Debug, Default, Clone, Copy, PartialEq)]
struct Health(u32);

struct Marked;

fn populated(count: usize, chunk_size: usize) -> Result<EntityStore> {
    let registry = SchemaRegistry::new();
    registry.register_component::<Position>()?;
    registry.register_component::<Velocity>()?;
    registry.register_component::<Health>()?;
    registry.register_tag::<Marked>()?;
    let config = StoreConfig::default()
        .with_chunk_size(chunk_size)
        .with_min_parallel_chunk_length(1);
    let mut store = EntityStore::with_config(registry.entity_schema(), config)?;
    for i in 0..count {
        let e = store.create_entity_with((Position::default(), Velocity { x: 1.0, y: 1.0 }))?;
        // spread entities over several archetypes
        if i % 3 == 0 {
            store.add_component(e, Health(100))?;
        }
        if i % 4 == 0 {
            store.add_tag::<Marked>(e)?;
        }
    }
    Ok(store)
}

#[test]
fn test_parallel_chunks_never_overlap() -> Result<()> {
    let mut store = populated(10_000, 128)?;
    let visited: Mutex<Vec<(ArchetypeId, Range<usize>)>> = Mutex::new(Vec::new());
    let rows = AtomicUsize::new(0);

    let mut query = store.query::<(Position, Velocity)>()?;
    query
        .for_each(|chunk| {
            let (mut positions, velocities) = chunk.components;
            for (p, v) in positions.iter_mut().zip(velocities.iter()) {
                p.x += v.x;
                p.y += v.y;
            }
            rows.fetch_add(chunk.entities.len(), Ordering::Relaxed);
            visited
                .lock()
                .unwrap()
                .push((chunk.entities.archetype(), chunk.entities.rows()));
        })
        .run_parallel(&mut store)?;

    assert_eq!(rows.load(Ordering::Relaxed), 10_000);

    let mut visited = visited.into_inner().unwrap();
    visited.sort_by_key(|(archetype, range)| (archetype.index(), range.start));
    for pair in visited.windows(2) {
        let (a, first) = &pair[0];
        let (b, second) = &pair[1];
        if a == b {
            assert!(first.end <= second.start, "overlapping rows in {a:?}");
        }
    }

    let mut check = store.query::<(Position,)>()?;
    for ((positions,), _) in check.chunks(&store)? {
        assert!(positions.iter().all(|p| *p == Position { x: 1.0, y: 1.0 }));
    }
    Ok(())
}

#[test]
fn test_parallel_matches_sequential() -> Result<()> {
    let mut parallel = populated(4_000, 64)?;
    let mut sequential = populated(4_000, 64)?;

    let step = |chunk: QueryChunk<'_, (Position, Velocity)>| {
        let (mut positions, velocities) = chunk.components;
        for (p, v) in positions.iter_mut().zip(velocities.iter()) {
            p.x += v.x * 2.0;
        }
    };

    let mut query = parallel.query::<(Position, Velocity)>()?;
    query.for_each(step).run_parallel(&mut parallel)?;
    let mut query = sequential.query::<(Position, Velocity)>()?;
    query.for_each(step).run(&mut sequential)?;

    let sum = |store: &EntityStore| -> Result<f32> {
        let mut query = store.query::<(Position,)>()?;
        let total = query
            .chunks(store)?
            .map(|((positions,), _)| positions.iter().map(|p| p.x).sum::<f32>())
            .sum();
        Ok(total)
    };
    assert_eq!(sum(&parallel)?, sum(&sequential)?);
    Ok(())
}

#[test]
fn test_buffer_records_during_job() -> Result<()> {
    let mut store = populated(1_000, 100)?;
    let mut query = store.query::<(Health,)>()?;
    let buffer = Mutex::new(store.command_buffer());

    query
        .for_each(|chunk| {
            let mut buffer = buffer.lock().unwrap();
            for (health, entity) in chunk.components.0.iter().zip(chunk.entities.iter()) {
                if health.0 == 100 && entity.id() % 2 == 0 {
                    buffer.set_component(entity, Health(50)).unwrap();
                }
            }
        })
        .run_parallel(&mut store)?;

    let mut buffer = buffer.into_inner().unwrap();
    let report = store.playback(&mut buffer)?;
    assert!(report.is_ok());
    assert_eq!(report.migrated, 0);

    let mut check = store.query::<(Health,)>()?;
    for ((health,), entities) in check.chunks(&store)? {
        for (h, &id) in health.iter().zip(entities.ids()) {
            assert_eq!(h.0, if id % 2 == 0 { 50 } else { 100 });
        }
    }
    Ok(())
}
