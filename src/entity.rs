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

//! Entity handles, node table entries and id allocation.

use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::archetype::ArchetypeId;

/// Identifies one `EntityStore` instance within the process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StoreId(u64);

impl StoreId {
    /// Process-unique, never 0.
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

/// Lightweight entity handle: (store, id, generation).
///
/// The generation is bumped every time an id is recycled, so a handle that
/// outlives its entity is detected instead of silently resolving to the new
/// occupant of the slot.
///
/// `Entity::default()` is [`Entity::NULL`], which never resolves in any store.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Entity {
    id: u32,
    generation: u32,
    store: StoreId,
}

impl Entity {
    /// Placeholder handle. Id 0 is never allocated.
    pub const NULL: Self = Self {
        id: 0,
        generation: 0,
        store: StoreId(0),
    };

    pub(crate) fn new(id: u32, generation: u32, store: StoreId) -> Self {
        Self {
            id,
            generation,
            store,
        }
    }

    /// Store-local id. Stable for the lifetime of the entity.
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn store(&self) -> StoreId {
        self.store
    }

    pub fn is_null(&self) -> bool {
        self.id == 0
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Entity({}v{})", self.id, self.generation)
    }
}

/// Entity location in archetype (archetype, row)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityLocation {
    pub archetype: ArchetypeId,
    pub row: usize,
}

/// Per-id slot in the store's node table.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct EntityNode {
    /// `None` for free, reserved or never used ids
    pub archetype: Option<ArchetypeId>,
    pub row: u32,
    pub generation: u32,
}

impl EntityNode {
    pub fn is_alive(&self) -> bool {
        self.archetype.is_some()
    }
}

/// Source of never-used entity ids.
///
/// Shared with command buffers so ids can be reserved from worker threads
/// without touching the store. Recycled ids never come from here.
#[derive(Debug)]
pub(crate) struct IdSequence {
    next: AtomicU32,
    limit: u32,
}

impl IdSequence {
    pub fn new(limit: u32) -> Self {
        Self {
            next: AtomicU32::new(1),
            limit,
        }
    }

    /// Reserve the next fresh id, `None` once `limit` has been handed out.
    pub fn reserve(&self) -> Option<u32> {
        let limit = self.limit;
        self.next
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |next| {
                if next <= limit {
                    Some(next + 1)
                } else {
                    None
                }
            })
            .ok()
    }

    /// First id not yet handed out.
    pub fn peek(&self) -> u32 {
        self.next.load(Ordering::Relaxed)
    }

    /// Make sure `id` is never handed out by `reserve`.
    pub fn advance_past(&self, id: u32) {
        self.next.fetch_max(id.saturating_add(1), Ordering::Relaxed);
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }
}
