//! Read-side operations over the store.
//!
//! Every read takes the connection lock and runs against committed state;
//! nothing here is cached. Tombstoned rows are hidden unless a method says
//! otherwise, and components or relationships of a tombstoned entity are
//! hidden along with it.

use std::collections::BTreeMap;

use crate::entities::{Component, Direction, Entity, EntityId, Relationship, RelationshipId};
use crate::error::StoreResult;
use crate::events::{Event, EventQuery};
use crate::schema::{ComponentTypeDefinition, RegistryEntry, RelationshipTypeDefinition};
use crate::store::{rows, WorldStore};

impl WorldStore {
    /// A live entity, or `None`.
    pub fn get_entity(&self, id: EntityId) -> StoreResult<Option<Entity>> {
        rows::find_live_entity(&*self.conn()?, id)
    }

    /// An entity even if tombstoned.
    pub fn get_entity_including_deleted(&self, id: EntityId) -> StoreResult<Option<Entity>> {
        rows::find_entity(&*self.conn()?, id)
    }

    /// All entities in creation order.
    pub fn list_entities(&self, include_deleted: bool) -> StoreResult<Vec<Entity>> {
        rows::list_entities(&*self.conn()?, include_deleted)
    }

    /// The single active component of a type, or `None`.
    pub fn get_component(&self, entity_id: EntityId, component_type: &str) -> StoreResult<Option<Component>> {
        rows::find_live_component(&*self.conn()?, entity_id, component_type)
    }

    pub fn has_component(&self, entity_id: EntityId, component_type: &str) -> StoreResult<bool> {
        Ok(self.get_component(entity_id, component_type)?.is_some())
    }

    /// Active components of a live entity keyed by type.
    pub fn get_entity_components(&self, entity_id: EntityId) -> StoreResult<BTreeMap<String, Component>> {
        let components = rows::live_components(&*self.conn()?, entity_id)?;
        Ok(components
            .into_iter()
            .map(|c| (c.component_type.clone(), c))
            .collect())
    }

    /// Live entities with an active component of every required type, in
    /// creation order. An empty list returns every live entity.
    pub fn query_entities(&self, required_types: &[&str]) -> StoreResult<Vec<Entity>> {
        rows::query_entities(&*self.conn()?, required_types)
    }

    /// Live relationships of an entity, optionally of one type.
    pub fn get_relationships(
        &self,
        entity_id: EntityId,
        direction: Direction,
        relationship_type: Option<&str>,
    ) -> StoreResult<Vec<Relationship>> {
        rows::live_relationships(&*self.conn()?, entity_id, direction, relationship_type)
    }

    /// A relationship by id, including tombstoned ones.
    pub fn get_relationship(&self, id: RelationshipId) -> StoreResult<Option<Relationship>> {
        rows::find_relationship(&*self.conn()?, id)
    }

    /// Live entities whose name contains `fragment`, ignoring case.
    pub fn search_by_name(&self, fragment: &str) -> StoreResult<Vec<Entity>> {
        let needle = fragment.to_lowercase();
        let entities = self.list_entities(false)?;
        Ok(entities
            .into_iter()
            .filter(|e| e.name.to_lowercase().contains(&needle))
            .collect())
    }

    /// Live entities with an active component holding a string value that
    /// contains `fragment`, case-insensitively. Field names are not searched.
    pub fn search_text(&self, fragment: &str) -> StoreResult<Vec<Entity>> {
        rows::search_component_text(&*self.conn()?, fragment)
    }

    /// Names of module-declared lookup tables, sorted.
    pub fn get_registry_names(&self) -> StoreResult<Vec<String>> {
        Ok(self.registry()?.lookup_names())
    }

    /// Entries of one lookup table in registration order; empty if unknown.
    pub fn get_registry_values(&self, name: &str) -> StoreResult<Vec<RegistryEntry>> {
        Ok(self
            .registry()?
            .lookup(name)
            .map(|l| l.entries.clone())
            .unwrap_or_default())
    }

    pub fn get_component_types(&self) -> StoreResult<Vec<ComponentTypeDefinition>> {
        Ok(self.registry()?.component_types().cloned().collect())
    }

    pub fn get_component_type(&self, name: &str) -> StoreResult<Option<ComponentTypeDefinition>> {
        Ok(self.registry()?.component_type(name).cloned())
    }

    pub fn get_relationship_types(&self) -> StoreResult<Vec<RelationshipTypeDefinition>> {
        Ok(self.registry()?.relationship_types().cloned().collect())
    }

    /// The persisted event log, most recent first.
    pub fn event_history(&self, query: &EventQuery) -> StoreResult<Vec<Event>> {
        rows::event_history(&*self.conn()?, query)
    }
}
