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

//! Archetype Store - schema-indexed entity component storage
//!
//! Entities live in archetypes, one per distinct (component set, tag set).
//! Each archetype keeps one contiguous heap per component type, so a query
//! walks plain slices chunk by chunk. Structural changes move rows between
//! archetypes, either directly through [`EntityStore`] or deferred through a
//! [`CommandBuffer`] that resolves each entity's final archetype before
//! moving anything.
//!
//! ```
//! use archetype_store::{EntityStore, SchemaRegistry};
//!
//! #[derive(Debug, Default, Clone, PartialEq)]
//! struct Position(f32, f32);
//!
//! #[derive(Debug, Default, Clone, PartialEq)]
//! struct Velocity(f32, f32);
//!
//! # fn main() -> archetype_store::Result<()> {
//! let registry = SchemaRegistry::new();
//! registry.register_component::<Position>()?;
//! registry.register_component::<Velocity>()?;
//! let mut store = EntityStore::from_registry(&registry);
//!
//! let e = store.create_entity_with((Position(0.0, 0.0), Velocity(1.0, 2.0)))?;
//!
//! let mut query = store.query::<(Position, Velocity)>()?;
//! for ((mut positions, velocities), _) in query.chunks_mut(&mut store)? {
//!     for (p, v) in positions.iter_mut().zip(velocities.iter()) {
//!         p.0 += v.0;
//!         p.1 += v.1;
//!     }
//! }
//! assert_eq!(store.get_component::<Position>(e)?, &Position(1.0, 2.0));
//! # Ok(())
//! # }
//! ```

pub mod archetype;
pub mod bitset;
pub mod chunk;
pub mod command;
pub mod component;
pub mod config;
pub mod entity;
pub mod error;
pub mod event;
pub mod index;
pub mod observer;
pub mod parallel;
pub mod prelude;
pub mod profiling;
pub mod query;
pub mod schema;
pub mod storage;
pub mod store;
pub mod types;

#[cfg(test)]
mod tests;

pub use archetype::*;
pub use chunk::*;
pub use command::*;
pub use component::*;
pub use config::*;
pub use entity::*;
pub use error::*;
pub use event::*;
pub use index::*;
pub use observer::*;
pub use parallel::*;
pub use query::*;
pub use schema::*;
pub use storage::*;
pub use store::*;
pub use types::*;
