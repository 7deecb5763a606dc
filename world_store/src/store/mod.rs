//! The persistent world store.
//!
//! One SQLite connection behind one mutex. Every operation is a complete
//! transaction: when it returns `Ok`, the write is committed and visible to
//! every later read. Events are published after the commit and after the
//! connection lock is released, so handlers may call back into the store.

mod batch;
pub(crate) mod rows;

pub use batch::WriteBatch;

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use rusqlite::Connection;
use serde_json::Value;
use tracing::{debug, info};

use crate::entities::{Actor, Component, Entity, EntityId, Relationship, RelationshipId};
use crate::error::{StoreError, StoreResult};
use crate::events::{Event, EventBus, EventQuery, SubscriptionId, DEFAULT_LOG_CAPACITY};
use crate::schema::{
    ComponentTypeDefinition, LookupRegistry, RegistryEntry, RelationshipTypeDefinition, TypeRegistry,
    TypedComponent,
};

/// Path that selects an in-memory database.
pub const IN_MEMORY: &str = ":memory:";

/// Tuning knobs for [`WorldStore::open`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreOptions {
    /// Bound on the bus's in-memory event log.
    pub event_log_capacity: usize,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            event_log_capacity: DEFAULT_LOG_CAPACITY,
        }
    }
}

pub struct WorldStore {
    conn: Mutex<Connection>,
    registry: RwLock<TypeRegistry>,
    bus: EventBus<WorldStore>,
    path: Option<PathBuf>,
}

impl std::fmt::Debug for WorldStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorldStore")
            .field("path", &self.path)
            .field("bus", &self.bus)
            .finish_non_exhaustive()
    }
}

impl WorldStore {
    /// Open (or create) a store at `path`. `":memory:"` opens an in-memory store.
    pub fn open(path: impl AsRef<Path>, options: StoreOptions) -> StoreResult<Self> {
        let path = path.as_ref();
        if path == Path::new(IN_MEMORY) {
            return Self::from_connection(Connection::open_in_memory()?, None, options);
        }
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::from_connection(conn, Some(path.to_path_buf()), options)
    }

    /// Opens an in-memory store with default options.
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::from_connection(Connection::open_in_memory()?, None, StoreOptions::default())
    }

    fn from_connection(conn: Connection, path: Option<PathBuf>, options: StoreOptions) -> StoreResult<Self> {
        rows::init_schema(&conn)?;
        info!(path = ?path, "World store opened");
        Ok(Self {
            conn: Mutex::new(conn),
            registry: RwLock::new(TypeRegistry::new()),
            bus: EventBus::new(options.event_log_capacity),
            path,
        })
    }

    /// Database file, or `None` for an in-memory store.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub(crate) fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    pub(crate) fn registry(&self) -> StoreResult<RwLockReadGuard<'_, TypeRegistry>> {
        self.registry.read().map_err(|_| StoreError::LockPoisoned)
    }

    fn registry_mut(&self) -> StoreResult<RwLockWriteGuard<'_, TypeRegistry>> {
        self.registry.write().map_err(|_| StoreError::LockPoisoned)
    }

    // ── Registration ─────────────────────────────────────────

    /// Register a component type. Identical re-registration is a no-op.
    pub fn register_component_type(&self, definition: ComponentTypeDefinition) -> StoreResult<()> {
        let mut registry = self.registry_mut()?;
        let name = definition.name.clone();
        if registry.register_component_type(definition)? {
            if let Some(definition) = registry.component_type(&name) {
                rows::persist_component_type(&*self.conn()?, definition)?;
            }
            debug!(component_type = %name, "Component type registered");
        }
        Ok(())
    }

    pub fn register_relationship_type(&self, definition: RelationshipTypeDefinition) -> StoreResult<()> {
        let name = definition.name.clone();
        if self.registry_mut()?.register_relationship_type(definition)? {
            debug!(relationship_type = %name, "Relationship type registered");
        }
        Ok(())
    }

    pub fn register_lookup(&self, registry: LookupRegistry) -> StoreResult<()> {
        debug!(registry = %registry.name, entries = registry.entries.len(), "Lookup registry registered");
        self.registry_mut()?.register_lookup(registry)
    }

    pub fn register_lookup_entry(&self, registry: &str, module: &str, entry: RegistryEntry) -> StoreResult<()> {
        self.registry_mut()?.register_lookup_entry(registry, module, entry)
    }

    /// Close the registry; later registrations fail with `RegistrySealed`.
    pub fn seal_registry(&self) -> StoreResult<()> {
        self.registry_mut()?.seal();
        info!("Type registry sealed");
        Ok(())
    }

    pub fn is_registry_sealed(&self) -> StoreResult<bool> {
        Ok(self.registry()?.is_sealed())
    }

    // ── Events ───────────────────────────────────────────────

    /// Subscribe to an event type (`"*"` for all). Handlers receive the store.
    pub fn subscribe<F>(&self, event_type: impl Into<String>, handler: F) -> SubscriptionId
    where
        F: Fn(&WorldStore, &Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.bus.subscribe(event_type, handler)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.bus.unsubscribe(id)
    }

    pub fn bus(&self) -> &EventBus<WorldStore> {
        &self.bus
    }

    /// Record a module-defined event and deliver it to subscribers.
    pub fn publish(&self, event: Event) -> StoreResult<()> {
        self.write(|batch| batch.publish(event))
    }

    /// Events from the in-memory bus log, most recent first.
    pub fn get_events(&self, query: &EventQuery) -> Vec<Event> {
        self.bus.get_events(query)
    }

    // ── Transactions ─────────────────────────────────────────

    /// Run several writes as one transaction.
    ///
    /// If `f` returns an error the transaction rolls back and no events are
    /// published. The closure must not call back into this store.
    pub fn write<T, F>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut WriteBatch<'_>) -> StoreResult<T>,
    {
        let (value, events) = {
            let registry = self.registry()?;
            let mut conn = self.conn()?;
            let tx = conn.transaction()?;
            let mut batch = WriteBatch::new(&tx, &registry);
            let value = f(&mut batch)?;
            let events = batch.into_events();
            tx.commit()?;
            (value, events)
        };

        for event in &events {
            self.bus.publish(self, event);
        }
        Ok(value)
    }

    // ── Writes ───────────────────────────────────────────────

    pub fn create_entity(&self, name: &str) -> StoreResult<Entity> {
        self.write(|batch| batch.create_entity(name))
    }

    pub fn rename_entity(&self, id: EntityId, name: &str, actor: Actor) -> StoreResult<Entity> {
        self.write(|batch| batch.rename_entity(id, name, actor))
    }

    /// Tombstone an entity. Deleting a deleted entity is a no-op.
    pub fn delete_entity(&self, id: EntityId, actor: Actor) -> StoreResult<()> {
        self.write(|batch| batch.delete_entity(id, actor)).map(|_| ())
    }

    pub fn restore_entity(&self, id: EntityId, actor: Actor) -> StoreResult<Entity> {
        self.write(|batch| batch.restore_entity(id, actor))
    }

    pub fn add_component(&self, entity_id: EntityId, component_type: &str, payload: Value) -> StoreResult<Component> {
        self.write(|batch| batch.add_component(entity_id, component_type, payload))
    }

    pub fn update_component(&self, entity_id: EntityId, component_type: &str, payload: Value) -> StoreResult<Component> {
        self.write(|batch| batch.update_component(entity_id, component_type, payload))
    }

    pub fn update_component_checked(
        &self,
        entity_id: EntityId,
        component_type: &str,
        payload: Value,
        expected_version: u64,
    ) -> StoreResult<Component> {
        self.write(|batch| batch.update_component_checked(entity_id, component_type, payload, expected_version))
    }

    pub fn upsert_component(&self, entity_id: EntityId, component_type: &str, payload: Value) -> StoreResult<Component> {
        self.write(|batch| batch.upsert_component(entity_id, component_type, payload))
    }

    pub fn remove_component(&self, entity_id: EntityId, component_type: &str) -> StoreResult<Option<Component>> {
        self.write(|batch| batch.remove_component(entity_id, component_type))
    }

    pub fn add_relationship(
        &self,
        from_entity: EntityId,
        to_entity: EntityId,
        relationship_type: &str,
    ) -> StoreResult<Relationship> {
        self.write(|batch| batch.add_relationship(from_entity, to_entity, relationship_type))
    }

    pub fn add_relationship_with_metadata(
        &self,
        from_entity: EntityId,
        to_entity: EntityId,
        relationship_type: &str,
        metadata: Value,
    ) -> StoreResult<Relationship> {
        self.write(|batch| batch.add_relationship_with_metadata(from_entity, to_entity, relationship_type, metadata))
    }

    pub fn remove_relationship(&self, id: RelationshipId, actor: Actor) -> StoreResult<()> {
        self.write(|batch| batch.remove_relationship(id, actor)).map(|_| ())
    }

    // ── Typed access ─────────────────────────────────────────

    pub fn add_typed<T: TypedComponent>(&self, entity_id: EntityId, value: &T) -> StoreResult<Component> {
        self.add_component(entity_id, T::TYPE_NAME, serde_json::to_value(value)?)
    }

    pub fn update_typed<T: TypedComponent>(&self, entity_id: EntityId, value: &T) -> StoreResult<Component> {
        self.update_component(entity_id, T::TYPE_NAME, serde_json::to_value(value)?)
    }

    /// Read and decode the active component of type `T`.
    pub fn get_typed<T: TypedComponent>(&self, entity_id: EntityId) -> StoreResult<Option<T>> {
        self.get_component(entity_id, T::TYPE_NAME)?
            .map(|c| c.decode())
            .transpose()
    }
}

#[cfg(test)]
mod tests;
