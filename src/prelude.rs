//! Convenient re-exports of commonly used types.
//!
//! The prelude can be imported with:
//! ```
//! use archetype_store::prelude::*;
//! ```

pub use crate::chunk::{Chunk, ChunkEntities, QueryChunk};
pub use crate::command::{CommandBuffer, PlaybackReport};
pub use crate::component::Component;
pub use crate::config::StoreConfig;
pub use crate::entity::Entity;
pub use crate::error::{EcsError, Result};
pub use crate::event::{ComponentAction, EntityEvent};
pub use crate::index::IndexedComponent;
pub use crate::observer::Observer;
pub use crate::query::{ArchetypeQuery, QueryFilter};
pub use crate::schema::{SchemaRegistry, StructIndex, TagIndex};
pub use crate::store::EntityStore;
pub use crate::types::{ComponentTypes, Tags};
