//! Modules - independently developed extensions to the engine.
//!
//! A module declares the component types, relationship types and lookup
//! tables it provides, names the modules it depends on, and gets one
//! `initialize` call (after all of its dependencies) to subscribe to events
//! and register turn handlers.

pub mod core_components;
pub mod items;
mod loader;

pub use loader::*;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::EngineResult;
use crate::turns::{TurnHandler, TurnScheduler};
use world_store::{
    ComponentTypeDefinition, Event, LookupRegistry, RegistryEntry, RelationshipTypeDefinition,
    SubscriptionId, WorldStore,
};

/// The contract every extension implements.
pub trait Module: Send + Sync {
    /// Unique module name, e.g. "core_components".
    fn name(&self) -> &str;

    fn version(&self) -> &str {
        "1.0.0"
    }

    fn description(&self) -> &str {
        ""
    }

    /// Names of modules that must be initialized first.
    fn dependencies(&self) -> Vec<String> {
        Vec::new()
    }

    fn register_component_types(&self) -> Vec<ComponentTypeDefinition> {
        Vec::new()
    }

    fn register_relationship_types(&self) -> Vec<RelationshipTypeDefinition> {
        Vec::new()
    }

    /// Lookup tables (races, classes, slots...) this module exposes.
    fn registries(&self) -> Vec<LookupRegistry> {
        Vec::new()
    }

    /// Called exactly once, after every dependency has initialized.
    fn initialize(&mut self, _ctx: &mut ModuleContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }
}

/// What a loaded module registered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    pub name: String,
    pub version: String,
    pub description: String,
    pub dependencies: Vec<String>,
    pub component_types: Vec<String>,
    pub relationship_types: Vec<String>,
    pub registries: Vec<String>,
    /// Event types the module subscribed to during `initialize`.
    pub event_subscriptions: Vec<String>,
}

impl ModuleDescriptor {
    fn from_module(module: &dyn Module) -> Self {
        Self {
            name: module.name().to_string(),
            version: module.version().to_string(),
            description: module.description().to_string(),
            dependencies: module.dependencies(),
            component_types: Vec::new(),
            relationship_types: Vec::new(),
            registries: Vec::new(),
            event_subscriptions: Vec::new(),
        }
    }
}

/// Handed to [`Module::initialize`].
pub struct ModuleContext<'a> {
    store: &'a WorldStore,
    turns: &'a mut TurnScheduler,
    descriptor: &'a mut ModuleDescriptor,
    subscriptions: Vec<SubscriptionId>,
}

impl<'a> ModuleContext<'a> {
    pub(crate) fn new(
        store: &'a WorldStore,
        turns: &'a mut TurnScheduler,
        descriptor: &'a mut ModuleDescriptor,
    ) -> Self {
        Self {
            store,
            turns,
            descriptor,
            subscriptions: Vec::new(),
        }
    }

    pub fn store(&self) -> &'a WorldStore {
        self.store
    }

    pub fn module_name(&self) -> &str {
        &self.descriptor.name
    }

    /// Subscribe a handler on the store's event bus.
    pub fn subscribe<F>(&mut self, event_type: &str, handler: F) -> SubscriptionId
    where
        F: Fn(&WorldStore, &Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = self.store.subscribe(event_type, handler);
        self.subscriptions.push(id);
        self.descriptor.event_subscriptions.push(event_type.to_string());
        id
    }

    /// Append a turn handler to the engine's ordered list.
    pub fn register_turn_handler(&mut self, handler: Box<dyn TurnHandler>) {
        self.turns.register(handler);
    }

    /// Create (or reopen) a lookup table owned by this module.
    pub fn create_registry(&mut self, name: &str) -> EngineResult<RegistryWriter<'a>> {
        self.store
            .register_lookup(LookupRegistry::new(name, self.descriptor.name.clone()))?;
        if !self.descriptor.registries.iter().any(|r| r == name) {
            self.descriptor.registries.push(name.to_string());
        }
        Ok(RegistryWriter {
            store: self.store,
            registry: name.to_string(),
            module: self.descriptor.name.clone(),
        })
    }

    pub(crate) fn into_subscriptions(self) -> Vec<SubscriptionId> {
        self.subscriptions
    }
}

/// Adds entries to one lookup table.
pub struct RegistryWriter<'a> {
    store: &'a WorldStore,
    registry: String,
    module: String,
}

impl RegistryWriter<'_> {
    pub fn register(&self, key: &str, description: &str, metadata: Value) -> EngineResult<()> {
        self.store.register_lookup_entry(
            &self.registry,
            &self.module,
            RegistryEntry::new(key, description).with_metadata(metadata),
        )?;
        Ok(())
    }
}
