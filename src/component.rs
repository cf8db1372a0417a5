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

//! Component, Script and Bundle traits
//!
//! Components are plain values stored in archetype heaps. Scripts are
//! per-entity objects kept outside archetypes. Bundles group components
//! so an entity can be created directly in its final archetype.

use smallvec::SmallVec;

use crate::archetype::Archetype;
use crate::error::{EcsError, Result};
use crate::schema::{EntitySchema, StructIndex};
use crate::types::ComponentTypes;

/// Maximum number of components supported by bundle implementations
pub const MAX_BUNDLE_COMPONENTS: usize = 8;

/// Marker trait for components
///
/// Heaps are pre-filled with `Default` values, so every component needs one.
pub trait Component: Default + Clone + Send + Sync + 'static {}

impl<T: Default + Clone + Send + Sync + 'static> Component for T {}

/// Marker trait for scripts
pub trait Script: Send + Sync + 'static {}

impl<T: Send + Sync + 'static> Script for T {}

/// Bundle of components written into one row
pub trait ComponentBundle: Send + 'static {
    /// Struct indices of the bundle members, in tuple order.
    ///
    /// Fails if a member is unregistered or listed twice.
    fn struct_indices(schema: &EntitySchema) -> Result<SmallVec<[StructIndex; MAX_BUNDLE_COMPONENTS]>>
    where
        Self: Sized;

    /// Write the values into `row`. `indices` comes from [`struct_indices`](Self::struct_indices).
    fn write(self, indices: &[StructIndex], archetype: &mut Archetype, row: usize);
}

/// Fails with `DuplicateComponent` naming the first repeated type.
pub(crate) fn check_unique(indices: &[StructIndex], names: &[&'static str]) -> Result<()> {
    let mut seen = ComponentTypes::new();
    for (index, name) in indices.iter().zip(names) {
        if seen.has(*index) {
            return Err(EcsError::DuplicateComponent(name));
        }
        seen.add(*index);
    }
    Ok(())
}

macro_rules! impl_bundle {
    ($($T:ident),*) => {
        impl<$($T: Component),*> ComponentBundle for ($($T,)*) {
            fn struct_indices(
                schema: &EntitySchema,
            ) -> Result<SmallVec<[StructIndex; MAX_BUNDLE_COMPONENTS]>> {
                let indices: SmallVec<[StructIndex; MAX_BUNDLE_COMPONENTS]> =
                    smallvec::smallvec![$(schema.component_index::<$T>()?),*];
                check_unique(&indices, &[$(std::any::type_name::<$T>()),*])?;
                Ok(indices)
            }

            #[allow(non_snake_case)]
            fn write(self, indices: &[StructIndex], archetype: &mut Archetype, row: usize) {
                let ($($T,)*) = self;
                let mut indices = indices.iter();
                $(
                    if let Some(&index) = indices.next() {
                        archetype.set_value(index, row, $T);
                    }
                )*
            }
        }
    };
}

impl_bundle!(A);
impl_bundle!(A, B);
impl_bundle!(A, B, C);
impl_bundle!(A, B, C, D);
impl_bundle!(A, B, C, D, E);
impl_bundle!(A, B, C, D, E, F);
impl_bundle!(A, B, C, D, E, F, G);
impl_bundle!(A, B, C, D, E, F, G, H);
