//! Identifiers and records for everything the store persists.

mod records;

pub use records::*;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Create a new random ID.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Create an ID from a specific UUID.
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Create a nil/empty ID (useful for defaults in tests).
            pub fn nil() -> Self {
                Self(Uuid::nil())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for all entities in the world.
    EntityId
);
uuid_id!(
    /// Unique identifier for a component row.
    ComponentId
);
uuid_id!(
    /// Unique identifier for a relationship edge.
    RelationshipId
);
uuid_id!(
    /// Unique identifier for a published event.
    EventId
);

/// Who performed a write: the engine itself or an entity acting in the world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Actor {
    #[default]
    System,
    Entity(EntityId),
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Actor::System => f.write_str("system"),
            Actor::Entity(id) => write!(f, "{id}"),
        }
    }
}

impl FromStr for Actor {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "system" {
            Ok(Actor::System)
        } else {
            Ok(Actor::Entity(s.parse()?))
        }
    }
}

impl From<EntityId> for Actor {
    fn from(id: EntityId) -> Self {
        Actor::Entity(id)
    }
}

impl Serialize for Actor {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Actor {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_id_parse() {
        let id = EntityId::new();
        let parsed: EntityId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert!("Test City".parse::<EntityId>().is_err());
    }

    #[test]
    fn test_actor_text_form() {
        assert_eq!(Actor::System.to_string(), "system");
        assert_eq!("system".parse::<Actor>().unwrap(), Actor::System);

        let id = EntityId::new();
        let actor = Actor::from(id);
        assert_eq!(actor.to_string().parse::<Actor>().unwrap(), actor);
    }

    #[test]
    fn test_actor_serializes_as_string() {
        let json = serde_json::to_string(&Actor::System).unwrap();
        assert_eq!(json, "\"system\"");
    }
}
