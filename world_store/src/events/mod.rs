//! Domain events: immutable records of something that happened in the world.

mod bus;

pub use bus::*;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entities::{Actor, ComponentId, EntityId, EventId};

/// Event type tags published by the store itself.
pub mod kinds {
    pub const ENTITY_CREATED: &str = "entity.created";
    pub const ENTITY_UPDATED: &str = "entity.updated";
    pub const ENTITY_DELETED: &str = "entity.deleted";
    pub const ENTITY_RESTORED: &str = "entity.restored";
    pub const COMPONENT_ADDED: &str = "component.added";
    pub const COMPONENT_UPDATED: &str = "component.updated";
    pub const COMPONENT_REMOVED: &str = "component.removed";
    pub const RELATIONSHIP_CREATED: &str = "relationship.created";
    pub const RELATIONSHIP_DELETED: &str = "relationship.deleted";

    /// Subscribing to this tag receives every event.
    pub const ALL: &str = "*";
}

/// An immutable record of a state change or module-defined occurrence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    #[serde(rename = "type")]
    pub event_type: String,
    pub entity_id: Option<EntityId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component_id: Option<ComponentId>,
    #[serde(default)]
    pub actor: Actor,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// Create a new event stamped with the current time.
    pub fn new(event_type: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            id: EventId::new(),
            event_type: event_type.into(),
            entity_id: None,
            component_id: None,
            actor: Actor::System,
            data,
            timestamp: crate::store::rows::now(),
        }
    }

    pub fn with_entity(mut self, entity_id: EntityId) -> Self {
        self.entity_id = Some(entity_id);
        self
    }

    pub fn with_component(mut self, component_id: ComponentId) -> Self {
        self.component_id = Some(component_id);
        self
    }

    pub fn with_actor(mut self, actor: Actor) -> Self {
        self.actor = actor;
        self
    }

    /// Check whether this event concerns the given entity.
    pub fn concerns(&self, entity_id: EntityId) -> bool {
        self.entity_id == Some(entity_id)
    }
}

/// Filter for reading back event logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventQuery {
    pub entity_id: Option<EntityId>,
    pub event_type: Option<String>,
    pub limit: usize,
}

impl Default for EventQuery {
    fn default() -> Self {
        Self {
            entity_id: None,
            event_type: None,
            limit: 100,
        }
    }
}

impl EventQuery {
    pub fn for_entity(entity_id: EntityId) -> Self {
        Self {
            entity_id: Some(entity_id),
            ..Self::default()
        }
    }

    pub fn of_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn matches(&self, event: &Event) -> bool {
        self.entity_id.map_or(true, |id| event.concerns(id))
            && self
                .event_type
                .as_deref()
                .map_or(true, |t| event.event_type == t)
    }
}
