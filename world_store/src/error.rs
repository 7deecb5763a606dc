//! Error types for the world store.

use thiserror::Error;

use crate::entities::{EntityId, RelationshipId};

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in store operations.
///
/// Lookups never fail with a "not found" variant; they return `None`.
/// The not-found variants are reserved for writes that require existence.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Entity absent or tombstoned.
    #[error("unknown entity: {0}")]
    UnknownEntity(EntityId),

    /// No active component of this type on the entity.
    #[error("entity {entity_id} has no active {component_type} component")]
    ComponentNotFound {
        entity_id: EntityId,
        component_type: String,
    },

    #[error("relationship not found: {0}")]
    RelationshipNotFound(RelationshipId),

    #[error("component type not registered: {0}")]
    UnknownComponentType(String),

    #[error("relationship type not registered: {0}")]
    UnknownRelationshipType(String),

    /// Payload does not conform to the declared schema.
    #[error("invalid {component_type} payload at '{field}': {reason}")]
    SchemaValidation {
        component_type: String,
        field: String,
        reason: String,
    },

    /// The entity already carries an active component of this type.
    #[error("entity {entity_id} already has an active {component_type} component")]
    DuplicateComponent {
        entity_id: EntityId,
        component_type: String,
    },

    /// A different definition is already registered under this name.
    #[error("conflicting registration for component type '{0}'")]
    DuplicateComponentType(String),

    #[error("conflicting registration for relationship type '{0}'")]
    DuplicateRelationshipType(String),

    #[error("{component_type} on {entity_id} is at version {actual}, expected {expected}")]
    ConcurrentModification {
        entity_id: EntityId,
        component_type: String,
        expected: u64,
        actual: u64,
    },

    /// Registration attempted after the engine was opened to runtime traffic.
    #[error("type registry is sealed; cannot register '{0}'")]
    RegistrySealed(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored row could not be decoded.
    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("store lock poisoned")]
    LockPoisoned,
}

impl StoreError {
    /// True for errors that describe a missing row rather than a failure.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StoreError::UnknownEntity(_)
                | StoreError::ComponentNotFound { .. }
                | StoreError::RelationshipNotFound(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_classification() {
        assert!(StoreError::UnknownEntity(EntityId::nil()).is_not_found());
        assert!(StoreError::ComponentNotFound {
            entity_id: EntityId::nil(),
            component_type: "Health".into(),
        }
        .is_not_found());
        assert!(!StoreError::UnknownComponentType("Health".into()).is_not_found());
        assert!(!StoreError::LockPoisoned.is_not_found());
    }

    #[test]
    fn test_schema_error_message() {
        let err = StoreError::SchemaValidation {
            component_type: "Health".into(),
            field: "current".into(),
            reason: "expected integer".into(),
        };
        assert_eq!(
            err.to_string(),
            "invalid Health payload at 'current': expected integer"
        );
    }
}
