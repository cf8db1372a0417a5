//! Value indexes over components
//!
//! A component type registered with
//! [`SchemaRegistry::register_indexed_component`](crate::schema::SchemaRegistry::register_indexed_component)
//! gets a [`ValueIndex`] in every store: an inverted map from the indexed
//! value to the ids of the entities holding it. The store keeps it current
//! on create, add, overwrite, remove, delete and command playback.
//!
//! Writes through `get_component_mut` or mutable query chunks bypass the
//! index. Re-add the component to re-index it.
//!
//! A component whose value is an [`Entity`](crate::entity::Entity) forms a
//! link relation, see `EntityStore::linked_entities`. Links are not removed
//! when their target is deleted.

use std::any::Any;
use std::hash::Hash;

use ahash::AHashMap;
use smallvec::SmallVec;

use crate::component::Component;

/// Component with a hashable key tracked by a [`ValueIndex`]
pub trait IndexedComponent: Component {
    type Value: Eq + Hash + Clone + Send + Sync + 'static;

    fn indexed_value(&self) -> Self::Value;
}

pub(crate) type IndexFactory = fn() -> Box<dyn ComponentIndexer>;

pub(crate) fn new_indexer<T: IndexedComponent>() -> Box<dyn ComponentIndexer> {
    Box::new(ValueIndex::<T>::new())
}

/// Type-erased index maintenance, driven by the store
pub trait ComponentIndexer: Send + Sync {
    /// `component` is the `&T` stored for entity `id`.
    fn insert(&mut self, id: u32, component: &dyn Any);

    fn remove(&mut self, id: u32, component: &dyn Any);

    /// Number of distinct indexed values
    fn value_count(&self) -> usize;

    fn as_any(&self) -> &dyn Any;
}

/// Inverted index: value -> entity ids
pub struct ValueIndex<T: IndexedComponent> {
    map: AHashMap<T::Value, SmallVec<[u32; 4]>>,
}

impl<T: IndexedComponent> Default for ValueIndex<T> {
    fn default() -> Self {
        Self {
            map: AHashMap::new(),
        }
    }
}

impl<T: IndexedComponent> ValueIndex<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ids of the entities whose component maps to `value`
    pub fn ids(&self, value: &T::Value) -> &[u32] {
        self.map.get(value).map(|ids| ids.as_slice()).unwrap_or(&[])
    }

    pub fn values(&self) -> impl Iterator<Item = &T::Value> + '_ {
        self.map.keys()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    fn insert_value(&mut self, id: u32, value: T::Value) {
        let ids = self.map.entry(value).or_default();
        if !ids.contains(&id) {
            ids.push(id);
        }
    }

    fn remove_value(&mut self, id: u32, value: &T::Value) {
        if let Some(ids) = self.map.get_mut(value) {
            if let Some(position) = ids.iter().position(|other| *other == id) {
                ids.swap_remove(position);
            }
            if ids.is_empty() {
                self.map.remove(value);
            }
        }
    }
}

impl<T: IndexedComponent> ComponentIndexer for ValueIndex<T> {
    fn insert(&mut self, id: u32, component: &dyn Any) {
        if let Some(component) = component.downcast_ref::<T>() {
            self.insert_value(id, component.indexed_value());
        }
    }

    fn remove(&mut self, id: u32, component: &dyn Any) {
        if let Some(component) = component.downcast_ref::<T>() {
            self.remove_value(id, &component.indexed_value());
        }
    }

    fn value_count(&self) -> usize {
        self.map.len()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
