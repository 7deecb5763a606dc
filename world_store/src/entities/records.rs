//! Snapshot records returned by the store.
//!
//! These are copies of committed rows. Mutating one changes nothing in the
//! store; every write goes through a `WorldStore` operation.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::{Actor, ComponentId, EntityId, RelationshipId};
use crate::error::StoreResult;

/// An entity: an identity that components attach to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub deleted_by: Option<Actor>,
}

impl Entity {
    /// Check if the entity is live (not tombstoned).
    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }
}

/// A typed, versioned data record attached to one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    pub id: ComponentId,
    pub entity_id: EntityId,
    pub component_type: String,
    pub data: serde_json::Value,
    /// Starts at 1 and increments on every update.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Component {
    /// Check if the component is live (not tombstoned).
    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }

    /// Decode the payload into its typed record.
    pub fn decode<T: DeserializeOwned>(&self) -> StoreResult<T> {
        Ok(serde_json::from_value(self.data.clone())?)
    }

    /// Read a string field from the payload.
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.data.get(field).and_then(|v| v.as_str())
    }

    /// Read an integer field from the payload.
    pub fn get_i64(&self, field: &str) -> Option<i64> {
        self.data.get(field).and_then(|v| v.as_i64())
    }
}

/// A directed, typed edge between two entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub id: RelationshipId,
    pub from_entity: EntityId,
    pub to_entity: EntityId,
    pub relationship_type: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Relationship {
    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }

    /// The endpoint on the other side of `entity`, if `entity` is an endpoint.
    pub fn other_end(&self, entity: EntityId) -> Option<EntityId> {
        if self.from_entity == entity {
            Some(self.to_entity)
        } else if self.to_entity == entity {
            Some(self.from_entity)
        } else {
            None
        }
    }
}

/// Which edges of an entity to return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    /// Edges where the entity is `from_entity`.
    Outgoing,
    /// Edges where the entity is `to_entity`.
    Incoming,
    #[default]
    Both,
}
