#![allow(dead_code, unused_imports)]

use archetype_store::{EntityStore, SchemaRegistry};
use std::time::Instant;

#[derive(Debug, Default, Clone)]
struct Position(f32, f32, f32);

#[derive(Debug, Default, Clone)]
struct Velocity(f32, f32, f32);

#[derive(Debug, Default, Clone)]
struct Health(u32);

struct Sleeping;

#[cfg(feature = "profiling")]
fn profile_creates(store: &mut EntityStore, count: usize) -> archetype_store::Result<()> {
    let _span = tracing::info_span!("create_loop", count = count).entered();
    for i in 0..count {
        if i % 1_000 == 0 {
            tracing::info!("Creating entity {}/{}", i, count);
        }
        store.create_entity_with((
            Position(1.0, 2.0, 3.0),
            Velocity(1.0, 0.0, 0.0),
            Health(100),
        ))?;
    }
    Ok(())
}

#[cfg(feature = "profiling")]
fn profile_playback(store: &mut EntityStore) -> archetype_store::Result<()> {
    let _span = tracing::info_span!("tag_half").entered();
    let mut query = store.query::<(Health,)>()?;
    let mut buffer = store.command_buffer();
    for entity in query.entities(store)?.into_iter().step_by(2) {
        buffer.add_tag::<Sleeping>(entity)?;
    }
    let report = store.playback(&mut buffer)?;
    tracing::info!(migrated = report.migrated, "tagged");
    Ok(())
}

#[cfg(feature = "profiling")]
fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _guard = archetype_store::profiling::init_file_subscriber("trace.json")?;

    let registry = SchemaRegistry::new();
    registry.register_component::<Position>()?;
    registry.register_component::<Velocity>()?;
    registry.register_component::<Health>()?;
    registry.register_tag::<Sleeping>()?;
    let mut store = EntityStore::from_registry(&registry);

    println!("Warming up...");
    {
        let _span = tracing::info_span!("warmup").entered();
        for _ in 0..1000 {
            store.create_entity_with((Position(1.0, 2.0, 3.0), Velocity(1.0, 0.0, 0.0)))?;
        }
    }

    println!("Profiling create with 3 components...");
    let start = Instant::now();
    profile_creates(&mut store, 10_000)?;
    println!("Create 10k entities complete in: {:?}", start.elapsed());

    let start = Instant::now();
    profile_playback(&mut store)?;
    println!("Tag playback complete in: {:?}", start.elapsed());

    let mut query = store.query::<(Position, Velocity)>()?;
    let start = Instant::now();
    query
        .for_each(|chunk| {
            let (mut positions, velocities) = chunk.components;
            for (p, v) in positions.iter_mut().zip(velocities.iter()) {
                p.0 += v.0;
            }
        })
        .run_parallel(&mut store)?;
    println!("Parallel update complete in: {:?}", start.elapsed());
    println!("{}", serde_json::to_string_pretty(&store.stats())?);
    Ok(())
}

#[cfg(not(feature = "profiling"))]
fn main() {
    println!("Run with: cargo run --release --bin profile_store --features profiling");
}
