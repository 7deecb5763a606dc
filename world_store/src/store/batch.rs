//! Writes inside one store transaction.

use rusqlite::Connection;
use serde_json::{json, Value};
use tracing::debug;

use super::rows;
use crate::entities::{Actor, Component, ComponentId, Direction, Entity, EntityId, Relationship, RelationshipId};
use crate::error::{StoreError, StoreResult};
use crate::events::{kinds, Event};
use crate::schema::{ComponentTypeDefinition, TypeRegistry, TypedComponent};

/// A set of writes that commit together.
///
/// Handed to the closure passed to [`WorldStore::write`](super::WorldStore::write).
/// Reads made through the batch see its own uncommitted writes. Events are
/// collected here and published only after the transaction commits.
pub struct WriteBatch<'a> {
    conn: &'a Connection,
    registry: &'a TypeRegistry,
    events: Vec<Event>,
}

impl<'a> WriteBatch<'a> {
    pub(crate) fn new(conn: &'a Connection, registry: &'a TypeRegistry) -> Self {
        Self {
            conn,
            registry,
            events: Vec::new(),
        }
    }

    pub(crate) fn into_events(self) -> Vec<Event> {
        self.events
    }

    fn emit(&mut self, event: Event) -> StoreResult<()> {
        rows::insert_event(self.conn, &event)?;
        self.events.push(event);
        Ok(())
    }

    fn live_entity(&self, id: EntityId) -> StoreResult<Entity> {
        rows::find_live_entity(self.conn, id)?.ok_or(StoreError::UnknownEntity(id))
    }

    fn component_type(&self, name: &str) -> StoreResult<&'a ComponentTypeDefinition> {
        self.registry
            .component_type(name)
            .ok_or_else(|| StoreError::UnknownComponentType(name.to_string()))
    }

    fn active_component(&self, entity_id: EntityId, component_type: &str) -> StoreResult<Component> {
        rows::find_active_component(self.conn, entity_id, component_type)?.ok_or_else(|| {
            StoreError::ComponentNotFound {
                entity_id,
                component_type: component_type.to_string(),
            }
        })
    }

    // ── Entities ─────────────────────────────────────────────

    pub fn create_entity(&mut self, name: &str) -> StoreResult<Entity> {
        let now = rows::now();
        let entity = Entity {
            id: EntityId::new(),
            name: name.to_string(),
            created_at: now,
            modified_at: now,
            deleted_at: None,
            deleted_by: None,
        };
        rows::insert_entity(self.conn, &entity)?;
        debug!(entity_id = %entity.id, name = %entity.name, "Entity created");

        self.emit(Event::new(kinds::ENTITY_CREATED, json!({ "name": entity.name })).with_entity(entity.id))?;
        Ok(entity)
    }

    pub fn rename_entity(&mut self, id: EntityId, name: &str, actor: Actor) -> StoreResult<Entity> {
        let mut entity = self.live_entity(id)?;
        if entity.name == name {
            return Ok(entity);
        }
        let old_name = std::mem::replace(&mut entity.name, name.to_string());
        entity.modified_at = rows::now();
        rows::update_entity(self.conn, &entity)?;
        debug!(entity_id = %id, old_name = %old_name, new_name = %name, "Entity renamed");

        self.emit(
            Event::new(
                kinds::ENTITY_UPDATED,
                json!({ "old_name": old_name, "new_name": entity.name }),
            )
            .with_entity(id)
            .with_actor(actor),
        )?;
        Ok(entity)
    }

    /// Tombstone an entity. Components and relationships are left in place;
    /// readers hide them through the owner's tombstone.
    ///
    /// Returns `false` if the entity was already deleted.
    pub fn delete_entity(&mut self, id: EntityId, actor: Actor) -> StoreResult<bool> {
        let mut entity = rows::find_entity(self.conn, id)?.ok_or(StoreError::UnknownEntity(id))?;
        if !entity.is_active() {
            return Ok(false);
        }
        let now = rows::now();
        entity.deleted_at = Some(now);
        entity.deleted_by = Some(actor);
        entity.modified_at = now;
        rows::update_entity(self.conn, &entity)?;
        debug!(entity_id = %id, actor = %actor, "Entity deleted");

        self.emit(
            Event::new(kinds::ENTITY_DELETED, json!({ "name": entity.name }))
                .with_entity(id)
                .with_actor(actor),
        )?;
        Ok(true)
    }

    /// Clear an entity's tombstone. A live entity is returned unchanged.
    pub fn restore_entity(&mut self, id: EntityId, actor: Actor) -> StoreResult<Entity> {
        let mut entity = rows::find_entity(self.conn, id)?.ok_or(StoreError::UnknownEntity(id))?;
        if entity.is_active() {
            return Ok(entity);
        }
        entity.deleted_at = None;
        entity.deleted_by = None;
        entity.modified_at = rows::now();
        rows::update_entity(self.conn, &entity)?;
        debug!(entity_id = %id, "Entity restored");

        self.emit(
            Event::new(kinds::ENTITY_RESTORED, json!({ "name": entity.name }))
                .with_entity(id)
                .with_actor(actor),
        )?;
        Ok(entity)
    }

    // ── Components ───────────────────────────────────────────

    /// Attach a new component at version 1.
    ///
    /// Fails with `DuplicateComponent` if the entity already has an active
    /// component of this type; use [`upsert_component`](Self::upsert_component)
    /// to add-or-update.
    pub fn add_component(&mut self, entity_id: EntityId, component_type: &str, payload: Value) -> StoreResult<Component> {
        self.live_entity(entity_id)?;
        let definition = self.component_type(component_type)?;
        let data = definition.prepare_payload(payload)?;

        if rows::find_active_component(self.conn, entity_id, component_type)?.is_some() {
            return Err(StoreError::DuplicateComponent {
                entity_id,
                component_type: component_type.to_string(),
            });
        }

        let now = rows::now();
        let component = Component {
            id: ComponentId::new(),
            entity_id,
            component_type: component_type.to_string(),
            data,
            version: 1,
            created_at: now,
            modified_at: now,
            deleted_at: None,
        };
        rows::insert_component(self.conn, &component)?;
        debug!(entity_id = %entity_id, component_type, "Component added");

        self.emit(
            Event::new(
                kinds::COMPONENT_ADDED,
                json!({
                    "component_type": component.component_type,
                    "data": component.data,
                    "version": component.version,
                }),
            )
            .with_entity(entity_id)
            .with_component(component.id),
        )?;
        Ok(component)
    }

    /// Merge `payload` into the active component per its type's merge rule,
    /// validate, and bump the version.
    pub fn update_component(&mut self, entity_id: EntityId, component_type: &str, payload: Value) -> StoreResult<Component> {
        self.update(entity_id, component_type, payload, None)
    }

    /// Like [`update_component`](Self::update_component), but fails with
    /// `ConcurrentModification` unless the stored version is `expected_version`.
    pub fn update_component_checked(
        &mut self,
        entity_id: EntityId,
        component_type: &str,
        payload: Value,
        expected_version: u64,
    ) -> StoreResult<Component> {
        self.update(entity_id, component_type, payload, Some(expected_version))
    }

    fn update(
        &mut self,
        entity_id: EntityId,
        component_type: &str,
        payload: Value,
        expected_version: Option<u64>,
    ) -> StoreResult<Component> {
        self.live_entity(entity_id)?;
        let definition = self.component_type(component_type)?;
        let mut component = self.active_component(entity_id, component_type)?;

        if let Some(expected) = expected_version {
            if component.version != expected {
                return Err(StoreError::ConcurrentModification {
                    entity_id,
                    component_type: component_type.to_string(),
                    expected,
                    actual: component.version,
                });
            }
        }

        let merged = definition.merge.apply(&component.data, payload);
        let data = definition.prepare_payload(merged)?;
        let previous = std::mem::replace(&mut component.data, data);
        component.version += 1;
        component.modified_at = rows::now();
        rows::update_component(self.conn, &component)?;
        debug!(
            entity_id = %entity_id,
            component_type,
            version = component.version,
            "Component updated"
        );

        self.emit(
            Event::new(
                kinds::COMPONENT_UPDATED,
                json!({
                    "component_type": component.component_type,
                    "data": component.data,
                    "previous": previous,
                    "version": component.version,
                }),
            )
            .with_entity(entity_id)
            .with_component(component.id),
        )?;
        Ok(component)
    }

    /// Add the component, or update it if one of this type is already active.
    pub fn upsert_component(&mut self, entity_id: EntityId, component_type: &str, payload: Value) -> StoreResult<Component> {
        self.live_entity(entity_id)?;
        if rows::find_active_component(self.conn, entity_id, component_type)?.is_some() {
            self.update_component(entity_id, component_type, payload)
        } else {
            self.add_component(entity_id, component_type, payload)
        }
    }

    /// Tombstone the active component of a type.
    ///
    /// Returns the removed component, or `None` if there was nothing active
    /// to remove. Fails only for an entity id that never existed.
    pub fn remove_component(&mut self, entity_id: EntityId, component_type: &str) -> StoreResult<Option<Component>> {
        if rows::find_entity(self.conn, entity_id)?.is_none() {
            return Err(StoreError::UnknownEntity(entity_id));
        }
        let Some(mut component) = rows::find_active_component(self.conn, entity_id, component_type)? else {
            return Ok(None);
        };

        let now = rows::now();
        component.deleted_at = Some(now);
        component.modified_at = now;
        rows::update_component(self.conn, &component)?;
        debug!(entity_id = %entity_id, component_type, "Component removed");

        self.emit(
            Event::new(
                kinds::COMPONENT_REMOVED,
                json!({
                    "component_type": component.component_type,
                    "data": component.data,
                }),
            )
            .with_entity(entity_id)
            .with_component(component.id),
        )?;
        Ok(Some(component))
    }

    // ── Relationships ────────────────────────────────────────

    pub fn add_relationship(
        &mut self,
        from_entity: EntityId,
        to_entity: EntityId,
        relationship_type: &str,
    ) -> StoreResult<Relationship> {
        self.add_relationship_with_metadata(from_entity, to_entity, relationship_type, json!({}))
    }

    pub fn add_relationship_with_metadata(
        &mut self,
        from_entity: EntityId,
        to_entity: EntityId,
        relationship_type: &str,
        metadata: Value,
    ) -> StoreResult<Relationship> {
        self.live_entity(from_entity)?;
        self.live_entity(to_entity)?;
        if self.registry.relationship_type(relationship_type).is_none() {
            return Err(StoreError::UnknownRelationshipType(relationship_type.to_string()));
        }

        let relationship = Relationship {
            id: RelationshipId::new(),
            from_entity,
            to_entity,
            relationship_type: relationship_type.to_string(),
            metadata,
            created_at: rows::now(),
            deleted_at: None,
        };
        rows::insert_relationship(self.conn, &relationship)?;
        debug!(
            relationship_id = %relationship.id,
            from = %from_entity,
            to = %to_entity,
            relationship_type,
            "Relationship created"
        );

        self.emit(
            Event::new(kinds::RELATIONSHIP_CREATED, relationship_payload(&relationship)).with_entity(from_entity),
        )?;
        Ok(relationship)
    }

    /// Tombstone a relationship. Returns `false` if it was already removed.
    pub fn remove_relationship(&mut self, id: RelationshipId, actor: Actor) -> StoreResult<bool> {
        let mut relationship =
            rows::find_relationship(self.conn, id)?.ok_or(StoreError::RelationshipNotFound(id))?;
        if !relationship.is_active() {
            return Ok(false);
        }
        let now = rows::now();
        rows::tombstone_relationship(self.conn, id, now)?;
        relationship.deleted_at = Some(now);
        debug!(relationship_id = %id, "Relationship deleted");

        self.emit(
            Event::new(kinds::RELATIONSHIP_DELETED, relationship_payload(&relationship))
                .with_entity(relationship.from_entity)
                .with_actor(actor),
        )?;
        Ok(true)
    }

    // ── Events and reads ─────────────────────────────────────

    /// Queue a module-defined event for publication after commit.
    pub fn publish(&mut self, event: Event) -> StoreResult<()> {
        self.emit(event)
    }

    pub fn get_entity(&self, id: EntityId) -> StoreResult<Option<Entity>> {
        rows::find_live_entity(self.conn, id)
    }

    pub fn get_entity_including_deleted(&self, id: EntityId) -> StoreResult<Option<Entity>> {
        rows::find_entity(self.conn, id)
    }

    pub fn query_entities(&self, required_types: &[&str]) -> StoreResult<Vec<Entity>> {
        rows::query_entities(self.conn, required_types)
    }

    pub fn get_component(&self, entity_id: EntityId, component_type: &str) -> StoreResult<Option<Component>> {
        rows::find_live_component(self.conn, entity_id, component_type)
    }

    pub fn get_typed<T: TypedComponent>(&self, entity_id: EntityId) -> StoreResult<Option<T>> {
        self.get_component(entity_id, T::TYPE_NAME)?
            .map(|c| c.decode())
            .transpose()
    }

    pub fn get_relationships(
        &self,
        entity_id: EntityId,
        direction: Direction,
        relationship_type: Option<&str>,
    ) -> StoreResult<Vec<Relationship>> {
        rows::live_relationships(self.conn, entity_id, direction, relationship_type)
    }
}

fn relationship_payload(relationship: &Relationship) -> Value {
    json!({
        "relationship_id": relationship.id,
        "from_entity": relationship.from_entity,
        "to_entity": relationship.to_entity,
        "relationship_type": relationship.relationship_type,
        "metadata": relationship.metadata,
    })
}
