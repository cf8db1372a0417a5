//! Synchronous change observers
//!
//! Observers run after the change they describe has been fully applied.
//! They receive the event only, never the store, so a handler cannot
//! mutate the store while it is being notified.

use crate::event::{ComponentAction, EntityEvent};

/// Observer that reacts to entity events
pub trait Observer: Send {
    fn on_event(&mut self, event: &EntityEvent);

    /// Get name for debugging
    fn name(&self) -> &str {
        "Observer"
    }
}

impl<F> Observer for F
where
    F: FnMut(&EntityEvent) + Send,
{
    fn on_event(&mut self, event: &EntityEvent) {
        self(event)
    }

    fn name(&self) -> &str {
        "FnObserver"
    }
}

/// Handle returned by [`ObserverRegistry::register`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// Registry that manages all observers
#[derive(Default)]
pub struct ObserverRegistry {
    observers: Vec<(ObserverId, Box<dyn Observer>)>,
    next_id: u64,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, observer: Box<dyn Observer>) -> ObserverId {
        let id = ObserverId(self.next_id);
        self.next_id += 1;
        tracing::debug!(observer = observer.name(), "registered observer");
        self.observers.push((id, observer));
        id
    }

    pub fn unregister(&mut self, id: ObserverId) -> Option<Box<dyn Observer>> {
        let position = self.observers.iter().position(|(other, _)| *other == id)?;
        Some(self.observers.remove(position).1)
    }

    /// Deliver `event` to every observer in registration order
    pub fn broadcast(&mut self, event: &EntityEvent) {
        for (_, observer) in &mut self.observers {
            observer.on_event(event);
        }
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    pub fn clear(&mut self) {
        self.observers.clear();
    }
}

/// Counts events by kind
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatisticsObserver {
    pub created: usize,
    pub deleted: usize,
    pub component_additions: usize,
    pub component_updates: usize,
    pub component_removals: usize,
    pub tag_changes: usize,
}

impl StatisticsObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

impl Observer for StatisticsObserver {
    fn on_event(&mut self, event: &EntityEvent) {
        match event {
            EntityEvent::Created(_) => self.created += 1,
            EntityEvent::Deleted(_) => self.deleted += 1,
            EntityEvent::ComponentChanged(change) => match change.action {
                ComponentAction::Add => self.component_additions += 1,
                ComponentAction::Update => self.component_updates += 1,
                ComponentAction::Remove => self.component_removals += 1,
            },
            EntityEvent::TagsChanged(_) => self.tag_changes += 1,
        }
    }

    fn name(&self) -> &str {
        "StatisticsObserver"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Entity;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_broadcast_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = ObserverRegistry::new();
        for name in ["first", "second"] {
            let log = Arc::clone(&log);
            registry.register(Box::new(move |event: &EntityEvent| {
                log.lock().unwrap().push((name, event.event_type()));
            }));
        }

        registry.broadcast(&EntityEvent::Created(Entity::NULL));
        assert_eq!(
            *log.lock().unwrap(),
            vec![("first", "Created"), ("second", "Created")]
        );
    }

    #[test]
    fn test_unregister() {
        let mut registry = ObserverRegistry::new();
        let id = registry.register(Box::new(StatisticsObserver::new()));
        assert_eq!(registry.observer_count(), 1);
        assert!(registry.unregister(id).is_some());
        assert!(registry.unregister(id).is_none());
        assert!(registry.is_empty());
    }
}
