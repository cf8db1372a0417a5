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

//! Schema registry
//!
//! Assigns stable small indices to component, tag and script types. Index 0
//! is the null index on every axis; real types start at 1 and indices are
//! never reused. Registration happens on a [`SchemaRegistry`]; the first call
//! to [`SchemaRegistry::entity_schema`] freezes it and hands out an immutable
//! [`EntitySchema`] shared by every store built from it.
//!
//! The schema doubles as the dispatch table: each component entry carries
//! the monomorphized heap constructor for its type, so archetypes build
//! their heaps by index without any name lookups.

use std::any::TypeId;
use std::fmt;
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::bitset::BITSET_BITS;
use crate::component::{Component, Script};
use crate::error::{Result, SchemaError};
use crate::index::{new_indexer, IndexFactory, IndexedComponent};
use crate::storage::{new_heap, HeapFactory};
use crate::types::{ComponentTypes, Tags};

/// Highest usable index per kind. Bounded by the archetype key bitsets.
pub const MAX_SCHEMA_INDEX: usize = BITSET_BITS - 1;

macro_rules! schema_index {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(u16);

        impl $name {
            /// Reserved "no type" index.
            pub const NULL: Self = Self(0);

            pub fn get(self) -> usize {
                self.0 as usize
            }

            pub fn is_null(self) -> bool {
                self.0 == 0
            }

            pub(crate) fn from_usize(index: usize) -> Self {
                debug_assert!(index <= MAX_SCHEMA_INDEX);
                Self(index as u16)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

schema_index!(
    /// Index of a component type.
    StructIndex
);
schema_index!(
    /// Index of a tag type.
    TagIndex
);
schema_index!(
    /// Index of a script type.
    ScriptIndex
);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SchemaKind {
    Component,
    Tag,
    Script,
}

/// One registered type.
#[derive(Clone)]
pub struct SchemaType {
    kind: SchemaKind,
    index: u16,
    key: String,
    type_name: &'static str,
    type_id: TypeId,
    size: usize,
    pub(crate) heap_factory: Option<HeapFactory>,
    pub(crate) index_factory: Option<IndexFactory>,
}

impl SchemaType {
    pub fn kind(&self) -> SchemaKind {
        self.kind
    }

    /// Raw index; interpret per `kind`.
    pub fn index(&self) -> usize {
        self.index as usize
    }

    pub fn struct_index(&self) -> Option<StructIndex> {
        (self.kind == SchemaKind::Component).then_some(StructIndex(self.index))
    }

    pub fn tag_index(&self) -> Option<TagIndex> {
        (self.kind == SchemaKind::Tag).then_some(TagIndex(self.index))
    }

    pub fn script_index(&self) -> Option<ScriptIndex> {
        (self.kind == SchemaKind::Script).then_some(ScriptIndex(self.index))
    }

    /// Stable string key used by serialization mappers.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Size in bytes of one value. Zero for tags.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_indexed(&self) -> bool {
        self.index_factory.is_some()
    }
}

impl fmt::Debug for SchemaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaType")
            .field("kind", &self.kind)
            .field("index", &self.index)
            .field("key", &self.key)
            .field("size", &self.size)
            .finish()
    }
}

/// Finalized, read-only schema.
#[derive(Clone, Default)]
pub struct EntitySchema {
    components: Vec<SchemaType>,
    tags: Vec<SchemaType>,
    scripts: Vec<SchemaType>,
    by_type: FxHashMap<TypeId, (SchemaKind, u16)>,
}

impl EntitySchema {
    fn lookup<T: 'static>(&self, kind: SchemaKind) -> std::result::Result<u16, SchemaError> {
        match self.by_type.get(&TypeId::of::<T>()) {
            Some(&(registered, index)) if registered == kind => Ok(index),
            _ => Err(SchemaError::Unregistered {
                kind,
                type_name: std::any::type_name::<T>(),
            }),
        }
    }

    pub fn component_index<T: 'static>(&self) -> Result<StructIndex> {
        Ok(StructIndex(self.lookup::<T>(SchemaKind::Component)?))
    }

    pub fn tag_index<T: 'static>(&self) -> Result<TagIndex> {
        Ok(TagIndex(self.lookup::<T>(SchemaKind::Tag)?))
    }

    pub fn script_index<T: 'static>(&self) -> Result<ScriptIndex> {
        Ok(ScriptIndex(self.lookup::<T>(SchemaKind::Script)?))
    }

    /// Single-tag set for `T`.
    pub fn tags_of<T: 'static>(&self) -> Result<Tags> {
        Ok(Tags::from(self.tag_index::<T>()?))
    }

    /// Single-component set for `T`.
    pub fn component_types_of<T: 'static>(&self) -> Result<ComponentTypes> {
        Ok(ComponentTypes::from(self.component_index::<T>()?))
    }

    pub fn component(&self, index: StructIndex) -> Option<&SchemaType> {
        index.get().checked_sub(1).and_then(|i| self.components.get(i))
    }

    pub fn tag(&self, index: TagIndex) -> Option<&SchemaType> {
        index.get().checked_sub(1).and_then(|i| self.tags.get(i))
    }

    pub fn script(&self, index: ScriptIndex) -> Option<&SchemaType> {
        index.get().checked_sub(1).and_then(|i| self.scripts.get(i))
    }

    /// Registered components ordered by index.
    pub fn components(&self) -> &[SchemaType] {
        &self.components
    }

    pub fn tags(&self) -> &[SchemaType] {
        &self.tags
    }

    pub fn scripts(&self) -> &[SchemaType] {
        &self.scripts
    }

    pub fn component_by_key(&self, key: &str) -> Option<&SchemaType> {
        self.components.iter().find(|t| t.key == key)
    }

    pub fn tag_by_key(&self, key: &str) -> Option<&SchemaType> {
        self.tags.iter().find(|t| t.key == key)
    }

    /// Largest struct index in use, i.e. the length of an index-keyed table minus one.
    pub fn max_struct_index(&self) -> usize {
        self.components.len()
    }

    /// Components registered with an index.
    pub fn indexed_components(&self) -> ComponentTypes {
        ComponentTypes::from_indices(
            self.components
                .iter()
                .filter(|t| t.is_indexed())
                .map(|t| StructIndex(t.index)),
        )
    }

    fn list_mut(&mut self, kind: SchemaKind) -> &mut Vec<SchemaType> {
        match kind {
            SchemaKind::Component => &mut self.components,
            SchemaKind::Tag => &mut self.tags,
            SchemaKind::Script => &mut self.scripts,
        }
    }
}

impl fmt::Debug for EntitySchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntitySchema")
            .field("components", &self.components.len())
            .field("tags", &self.tags.len())
            .field("scripts", &self.scripts.len())
            .finish()
    }
}

struct Registration {
    kind: SchemaKind,
    type_id: TypeId,
    type_name: &'static str,
    key: Option<String>,
    size: usize,
    heap_factory: Option<HeapFactory>,
    index_factory: Option<IndexFactory>,
}

#[derive(Default)]
struct RegistryState {
    building: EntitySchema,
    frozen: Option<Arc<EntitySchema>>,
}

/// Mutable-until-frozen type catalog.
///
/// Register every type during startup, then call [`entity_schema`](Self::entity_schema).
/// Re-registering a known type is a no-op returning the same index, also after
/// the freeze. Registering a new type after the freeze fails with
/// [`SchemaError::Finalized`].
#[derive(Default)]
pub struct SchemaRegistry {
    state: RwLock<RegistryState>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide registry used by `EntityStore::default()`.
    pub fn global() -> &'static SchemaRegistry {
        static GLOBAL: OnceLock<SchemaRegistry> = OnceLock::new();
        GLOBAL.get_or_init(SchemaRegistry::new)
    }

    pub fn register_component<T: Component>(&self) -> Result<StructIndex> {
        self.register(Registration::component::<T>(None, None))
            .map(StructIndex)
    }

    /// Register with an explicit serialization key instead of the short type name.
    pub fn register_component_with_key<T: Component>(&self, key: &str) -> Result<StructIndex> {
        self.register(Registration::component::<T>(Some(key.to_owned()), None))
            .map(StructIndex)
    }

    /// Register a component whose values are tracked in a value index.
    pub fn register_indexed_component<T: IndexedComponent>(&self) -> Result<StructIndex> {
        self.register(Registration::component::<T>(None, Some(new_indexer::<T>)))
            .map(StructIndex)
    }

    pub fn register_tag<T: 'static>(&self) -> Result<TagIndex> {
        self.register(Registration {
            kind: SchemaKind::Tag,
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            key: None,
            size: 0,
            heap_factory: None,
            index_factory: None,
        })
        .map(TagIndex)
    }

    pub fn register_script<T: Script>(&self) -> Result<ScriptIndex> {
        self.register(Registration {
            kind: SchemaKind::Script,
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            key: None,
            size: std::mem::size_of::<T>(),
            heap_factory: None,
            index_factory: None,
        })
        .map(ScriptIndex)
    }

    /// Freeze the registry and return the shared schema.
    pub fn entity_schema(&self) -> Arc<EntitySchema> {
        if let Some(schema) = &self.state.read().frozen {
            return Arc::clone(schema);
        }
        let state = &mut *self.state.write();
        let building = &state.building;
        let schema = state.frozen.get_or_insert_with(|| {
            tracing::debug!(
                components = building.components.len(),
                tags = building.tags.len(),
                scripts = building.scripts.len(),
                "schema finalized"
            );
            Arc::new(building.clone())
        });
        Arc::clone(schema)
    }

    pub fn is_finalized(&self) -> bool {
        self.state.read().frozen.is_some()
    }

    fn register(&self, registration: Registration) -> Result<u16> {
        let mut state = self.state.write();

        if let Some(&(kind, index)) = state.building.by_type.get(&registration.type_id) {
            if kind == registration.kind {
                return Ok(index);
            }
            return Err(SchemaError::KindMismatch {
                type_name: registration.type_name,
                registered: kind,
            }
            .into());
        }

        if state.frozen.is_some() {
            return Err(SchemaError::Finalized {
                type_name: registration.type_name,
            }
            .into());
        }

        let kind = registration.kind;
        let list = state.building.list_mut(kind);
        if list.len() >= MAX_SCHEMA_INDEX {
            return Err(SchemaError::TooManyTypes {
                kind,
                limit: MAX_SCHEMA_INDEX,
            }
            .into());
        }

        let key = registration
            .key
            .unwrap_or_else(|| short_type_name(registration.type_name));
        if list.iter().any(|t| t.key == key) {
            return Err(SchemaError::DuplicateKey { kind, key }.into());
        }

        let index = (list.len() + 1) as u16;
        tracing::debug!(?kind, index, key = %key, "registered schema type");
        list.push(SchemaType {
            kind,
            index,
            key,
            type_name: registration.type_name,
            type_id: registration.type_id,
            size: registration.size,
            heap_factory: registration.heap_factory,
            index_factory: registration.index_factory,
        });
        state
            .building
            .by_type
            .insert(registration.type_id, (kind, index));
        Ok(index)
    }
}

impl Registration {
    fn component<T: Component>(key: Option<String>, index_factory: Option<IndexFactory>) -> Self {
        Self {
            kind: SchemaKind::Component,
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            key,
            size: std::mem::size_of::<T>(),
            heap_factory: Some(new_heap::<T>),
            index_factory,
        }
    }
}

/// `a::b::Foo<c::Bar>` -> `Foo<c::Bar>`
fn short_type_name(type_name: &'static str) -> String {
    let (path, generics) = match type_name.find('<') {
        Some(pos) => type_name.split_at(pos),
        None => (type_name, ""),
    };
    let name = path.rsplit("::").next().unwrap_or(path);
    format!("{name}{generics}")
}
