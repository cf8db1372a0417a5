//! Entity change notifications
//!
//! Plain structs handed to observers after a change has been applied.

use serde::Serialize;

use crate::entity::Entity;
use crate::schema::StructIndex;
use crate::types::Tags;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum ComponentAction {
    /// Component type added to the entity
    Add,
    /// Value of a present component overwritten
    Update,
    /// Component type removed from the entity
    Remove,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct ComponentChanged {
    pub entity: Entity,
    pub struct_index: StructIndex,
    pub action: ComponentAction,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct TagsChanged {
    pub entity: Entity,
    pub old_tags: Tags,
    pub tags: Tags,
}

impl TagsChanged {
    pub fn added(&self) -> Tags {
        self.tags.difference(&self.old_tags)
    }

    pub fn removed(&self) -> Tags {
        self.old_tags.difference(&self.tags)
    }
}

/// Entity lifecycle events that trigger observers
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum EntityEvent {
    Created(Entity),
    Deleted(Entity),
    ComponentChanged(ComponentChanged),
    TagsChanged(TagsChanged),
}

impl EntityEvent {
    /// Get the entity involved in this event
    pub fn entity(&self) -> Entity {
        match self {
            EntityEvent::Created(entity) | EntityEvent::Deleted(entity) => *entity,
            EntityEvent::ComponentChanged(change) => change.entity,
            EntityEvent::TagsChanged(change) => change.entity,
        }
    }

    /// Get event type name for debugging
    pub fn event_type(&self) -> &'static str {
        match self {
            EntityEvent::Created(_) => "Created",
            EntityEvent::Deleted(_) => "Deleted",
            EntityEvent::ComponentChanged(change) => match change.action {
                ComponentAction::Add => "ComponentAdded",
                ComponentAction::Update => "ComponentUpdated",
                ComponentAction::Remove => "ComponentRemoved",
            },
            EntityEvent::TagsChanged(_) => "TagsChanged",
        }
    }
}
