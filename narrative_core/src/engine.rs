//! The engine facade: one store, its loaded modules and its turn handlers.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::info;

use crate::config::EngineConfig;
use crate::error::EngineResult;
use crate::modules::core_components::CoreComponents;
use crate::modules::items::Items;
use crate::modules::{Module, ModuleDescriptor, ModuleLoader};
use crate::resolver::EntityResolver;
use crate::turns::{TurnOutcome, TurnScheduler};
use world_store::{EntityId, RegistryEntry, StoreResult, WorldStore};

/// Collects configuration and modules, then opens an [`Engine`].
#[derive(Default)]
pub struct EngineBuilder {
    config: EngineConfig,
    modules: Vec<Box<dyn Module>>,
}

impl EngineBuilder {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn module<M: Module + 'static>(mut self, module: M) -> Self {
        self.modules.push(Box::new(module));
        self
    }

    /// Add the built-in `core_components` and `items` modules.
    pub fn with_builtin_modules(self) -> Self {
        self.module(CoreComponents).module(Items)
    }

    /// Open the store and load modules in dependency order.
    ///
    /// Any loader error (missing or cyclic dependency, failed initialize)
    /// aborts the build; no engine is returned.
    pub fn build(self) -> EngineResult<Engine> {
        let store = Arc::new(WorldStore::open(&self.config.storage.path, self.config.store_options())?);

        let mut loader = ModuleLoader::new();
        for module in self.modules {
            loader.register_boxed(module)?;
        }

        let mut turns = TurnScheduler::new();
        match &self.config.modules.enabled {
            Some(enabled) => {
                let roots: Vec<&str> = enabled.iter().map(String::as_str).collect();
                loader.load_roots(&roots, &store, &mut turns)?;
            }
            None => {
                loader.load_all(&store, &mut turns)?;
            }
        }
        store.seal_registry()?;

        info!(
            modules = loader.loaded().len(),
            turn_handlers = turns.len(),
            path = %self.config.storage.path,
            "Engine ready"
        );
        Ok(Engine {
            config: self.config,
            store,
            loader,
            turns,
        })
    }
}

pub struct Engine {
    config: EngineConfig,
    store: Arc<WorldStore>,
    loader: ModuleLoader,
    turns: TurnScheduler,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("store", &self.store)
            .field("loader", &self.loader)
            .field("turns", &self.turns)
            .finish()
    }
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    /// Open with the built-in modules.
    pub fn open(config: EngineConfig) -> EngineResult<Self> {
        Self::builder().config(config).with_builtin_modules().build()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<WorldStore> {
        &self.store
    }

    pub fn resolver(&self) -> EntityResolver<'_> {
        EntityResolver::new(&self.store, self.config.resolver.clone())
    }

    /// Loaded modules in initialization order.
    pub fn modules(&self) -> &[ModuleDescriptor] {
        self.loader.loaded()
    }

    pub fn module(&self, name: &str) -> Option<&ModuleDescriptor> {
        self.modules().iter().find(|d| d.name == name)
    }

    /// Every lookup table the loaded modules declared, with its entries.
    pub fn registry_entries(&self) -> StoreResult<BTreeMap<String, Vec<RegistryEntry>>> {
        let mut tables = BTreeMap::new();
        for descriptor in self.modules() {
            for name in &descriptor.registries {
                tables.insert(name.clone(), self.store.get_registry_values(name)?);
            }
        }
        Ok(tables)
    }

    /// Advance time in `scene`. See [`TurnScheduler::advance`].
    pub fn advance_time(&mut self, scene: EntityId) -> EngineResult<TurnOutcome> {
        self.turns.advance(&self.store, scene)
    }

    pub fn current_actor(&self, scene: EntityId) -> Option<EntityId> {
        self.turns.current_actor(&self.store, scene)
    }

    pub fn end_sequence(&mut self, scene: EntityId) -> EngineResult<bool> {
        self.turns.end_sequence(&self.store, scene)
    }
}
