//! The type registry: component types, relationship types and module lookup tables.
//!
//! Populated while modules load, then sealed. After sealing it is read-only.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{ComponentTypeDefinition, RelationshipTypeDefinition};
use crate::error::{StoreError, StoreResult};

/// One row of a module-declared lookup table (a race, a class, a category...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub key: String,
    pub description: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl RegistryEntry {
    pub fn new(key: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            description: description.into(),
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// A named lookup table declared by a module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LookupRegistry {
    pub name: String,
    pub module: String,
    pub entries: Vec<RegistryEntry>,
}

impl LookupRegistry {
    pub fn new(name: impl Into<String>, module: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            module: module.into(),
            entries: Vec::new(),
        }
    }

    pub fn entry(mut self, entry: RegistryEntry) -> Self {
        self.entries.push(entry);
        self
    }

    /// Insert or replace the entry with the same key, keeping its position.
    pub fn upsert(&mut self, entry: RegistryEntry) {
        match self.entries.iter_mut().find(|e| e.key == entry.key) {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
    }

    pub fn get(&self, key: &str) -> Option<&RegistryEntry> {
        self.entries.iter().find(|e| e.key == key)
    }
}

/// All type and lookup declarations known to one store.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    component_types: BTreeMap<String, ComponentTypeDefinition>,
    relationship_types: BTreeMap<String, RelationshipTypeDefinition>,
    lookups: BTreeMap<String, LookupRegistry>,
    sealed: bool,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Close the registry to further declarations.
    pub fn seal(&mut self) {
        self.sealed = true;
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    fn ensure_open(&self, name: &str) -> StoreResult<()> {
        if self.sealed {
            Err(StoreError::RegistrySealed(name.to_string()))
        } else {
            Ok(())
        }
    }

    /// Register a component type.
    ///
    /// Returns `true` if the type is new, `false` if an identical definition
    /// was already present.
    pub fn register_component_type(&mut self, definition: ComponentTypeDefinition) -> StoreResult<bool> {
        self.ensure_open(&definition.name)?;
        match self.component_types.get(&definition.name) {
            Some(existing) if *existing == definition => Ok(false),
            Some(_) => Err(StoreError::DuplicateComponentType(definition.name)),
            None => {
                self.component_types.insert(definition.name.clone(), definition);
                Ok(true)
            }
        }
    }

    pub fn register_relationship_type(&mut self, definition: RelationshipTypeDefinition) -> StoreResult<bool> {
        self.ensure_open(&definition.name)?;
        match self.relationship_types.get(&definition.name) {
            Some(existing) if *existing == definition => Ok(false),
            Some(_) => Err(StoreError::DuplicateRelationshipType(definition.name)),
            None => {
                self.relationship_types.insert(definition.name.clone(), definition);
                Ok(true)
            }
        }
    }

    /// Create a lookup table, or merge entries into an existing one with the same name.
    pub fn register_lookup(&mut self, registry: LookupRegistry) -> StoreResult<()> {
        self.ensure_open(&registry.name)?;
        match self.lookups.get_mut(&registry.name) {
            Some(existing) => {
                for entry in registry.entries {
                    existing.upsert(entry);
                }
            }
            None => {
                self.lookups.insert(registry.name.clone(), registry);
            }
        }
        Ok(())
    }

    pub fn register_lookup_entry(&mut self, registry: &str, module: &str, entry: RegistryEntry) -> StoreResult<()> {
        self.ensure_open(registry)?;
        self.lookups
            .entry(registry.to_string())
            .or_insert_with(|| LookupRegistry::new(registry, module))
            .upsert(entry);
        Ok(())
    }

    pub fn component_type(&self, name: &str) -> Option<&ComponentTypeDefinition> {
        self.component_types.get(name)
    }

    pub fn relationship_type(&self, name: &str) -> Option<&RelationshipTypeDefinition> {
        self.relationship_types.get(name)
    }

    /// Registered component types, ordered by name.
    pub fn component_types(&self) -> impl Iterator<Item = &ComponentTypeDefinition> {
        self.component_types.values()
    }

    pub fn relationship_types(&self) -> impl Iterator<Item = &RelationshipTypeDefinition> {
        self.relationship_types.values()
    }

    /// Lookup table names, sorted.
    pub fn lookup_names(&self) -> Vec<String> {
        self.lookups.keys().cloned().collect()
    }

    pub fn lookup(&self, name: &str) -> Option<&LookupRegistry> {
        self.lookups.get(name)
    }
}
