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

//! Error types

use std::fmt;

use crate::entity::{Entity, StoreId};
use crate::schema::SchemaKind;

/// Store error type
#[derive(Debug, Clone, PartialEq)]
pub enum EcsError {
    /// Schema lookup or registration failed
    Schema(SchemaError),

    /// Entity is dead, unknown, or the handle is stale
    EntityNotFound(Entity),

    /// Explicit-id create on an id that is alive
    EntityIdInUse(u32),

    /// Id 0, or an explicit id above `max_entities`
    InvalidEntityId(u32),

    /// Component not present on entity
    ComponentNotFound {
        entity: Entity,
        type_name: &'static str,
    },

    /// Handle, buffer or query created by another store
    InvalidStoreOwnership { expected: StoreId, found: StoreId },

    /// Entity id space exhausted
    CapacityOverflow { limit: u32 },

    /// Same component type listed twice in a bundle or query tuple
    DuplicateComponent(&'static str),

    /// Command buffer was already played back
    AlreadyPlayedBack,

    /// Query construction error
    InvalidQuery(String),

    /// Store configuration error
    InvalidConfig(String),
}

/// Schema registry errors
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaError {
    /// Registration attempted after the schema was frozen
    Finalized { type_name: &'static str },

    /// Type used at runtime without being registered
    Unregistered {
        kind: SchemaKind,
        type_name: &'static str,
    },

    /// Two types of the same kind share a key
    DuplicateKey { kind: SchemaKind, key: String },

    /// Index space for a kind is full
    TooManyTypes { kind: SchemaKind, limit: usize },

    /// Type already registered under another kind
    KindMismatch {
        type_name: &'static str,
        registered: SchemaKind,
    },
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaError::Finalized { type_name } => {
                write!(f, "schema already finalized, cannot register {type_name}")
            }
            SchemaError::Unregistered { kind, type_name } => {
                write!(f, "{kind:?} type {type_name} is not registered in the schema")
            }
            SchemaError::DuplicateKey { kind, key } => {
                write!(f, "duplicate {kind:?} key '{key}'")
            }
            SchemaError::TooManyTypes { kind, limit } => {
                write!(f, "too many {kind:?} types, limit is {limit}")
            }
            SchemaError::KindMismatch {
                type_name,
                registered,
            } => {
                write!(f, "{type_name} is already registered as {registered:?}")
            }
        }
    }
}

impl fmt::Display for EcsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EcsError::Schema(err) => write!(f, "Schema error: {err}"),
            EcsError::EntityNotFound(entity) => write!(f, "Entity not found: {entity:?}"),
            EcsError::EntityIdInUse(id) => write!(f, "Entity id {id} is already in use"),
            EcsError::InvalidEntityId(id) => write!(f, "Invalid entity id {id}"),
            EcsError::ComponentNotFound { entity, type_name } => {
                write!(f, "Component {type_name} not found on {entity:?}")
            }
            EcsError::InvalidStoreOwnership { expected, found } => {
                write!(f, "Store ownership mismatch: expected {expected:?}, found {found:?}")
            }
            EcsError::CapacityOverflow { limit } => {
                write!(f, "Entity capacity exhausted (max id {limit})")
            }
            EcsError::DuplicateComponent(name) => write!(f, "Duplicate component type {name}"),
            EcsError::AlreadyPlayedBack => write!(f, "Command buffer was already played back"),
            EcsError::InvalidQuery(msg) => write!(f, "Invalid query: {msg}"),
            EcsError::InvalidConfig(msg) => write!(f, "Invalid config: {msg}"),
        }
    }
}

impl std::error::Error for SchemaError {}

impl std::error::Error for EcsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EcsError::Schema(err) => Some(err),
            _ => None,
        }
    }
}

impl From<SchemaError> for EcsError {
    fn from(err: SchemaError) -> Self {
        EcsError::Schema(err)
    }
}

impl From<serde_json::Error> for EcsError {
    fn from(err: serde_json::Error) -> Self {
        EcsError::InvalidConfig(err.to_string())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, EcsError>;
