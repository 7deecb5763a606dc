//! Dependency-ordered module loading.
//!
//! Load order is a topological sort of the declared dependency graph (Kahn's
//! algorithm). Among modules whose dependencies are all satisfied, the one
//! registered first goes first.

use std::collections::{BTreeSet, HashMap, HashSet};

use tracing::{debug, info, warn};

use super::{Module, ModuleContext, ModuleDescriptor};
use crate::error::{EngineError, EngineResult};
use crate::turns::TurnScheduler;
use world_store::WorldStore;

#[derive(Default)]
pub struct ModuleLoader {
    modules: Vec<Box<dyn Module>>,
    loaded: Vec<ModuleDescriptor>,
}

impl std::fmt::Debug for ModuleLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleLoader")
            .field("registered", &self.module_names())
            .field("loaded", &self.loaded.len())
            .finish()
    }
}

impl ModuleLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module for loading. Names must be unique.
    pub fn register<M: Module + 'static>(&mut self, module: M) -> EngineResult<()> {
        self.register_boxed(Box::new(module))
    }

    pub fn register_boxed(&mut self, module: Box<dyn Module>) -> EngineResult<()> {
        if self.position(module.name()).is_some() {
            return Err(EngineError::DuplicateModule(module.name().to_string()));
        }
        debug!(module = module.name(), "Module registered");
        self.modules.push(module);
        Ok(())
    }

    /// Registered module names in registration order.
    pub fn module_names(&self) -> Vec<&str> {
        self.modules.iter().map(|m| m.name()).collect()
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.loaded.iter().any(|d| d.name == name)
    }

    /// Descriptors of loaded modules, in load order.
    pub fn loaded(&self) -> &[ModuleDescriptor] {
        &self.loaded
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.modules.iter().position(|m| m.name() == name)
    }

    /// Load order for every registered module.
    pub fn resolve_order(&self) -> EngineResult<Vec<String>> {
        let roots: Vec<&str> = self.module_names();
        self.resolve_order_for(&roots)
    }

    /// Load order for `roots` and everything they transitively depend on.
    pub fn resolve_order_for(&self, roots: &[&str]) -> EngineResult<Vec<String>> {
        let indices = self.topological_order(roots)?;
        Ok(indices
            .into_iter()
            .map(|i| self.modules[i].name().to_string())
            .collect())
    }

    fn topological_order(&self, roots: &[&str]) -> EngineResult<Vec<usize>> {
        // Collect the dependency closure, failing on anything unregistered.
        let mut closure: BTreeSet<usize> = BTreeSet::new();
        let mut stack: Vec<usize> = Vec::new();
        for root in roots {
            let index = self
                .position(root)
                .ok_or_else(|| EngineError::UnknownModule(root.to_string()))?;
            stack.push(index);
        }
        while let Some(index) = stack.pop() {
            if !closure.insert(index) {
                continue;
            }
            let module = &self.modules[index];
            for dependency in module.dependencies() {
                let dep_index =
                    self.position(&dependency)
                        .ok_or_else(|| EngineError::MissingDependency {
                            module: module.name().to_string(),
                            dependency: dependency.clone(),
                        })?;
                stack.push(dep_index);
            }
        }

        // Kahn's algorithm over the closure. Edges run dependency -> dependent.
        let mut dependents: HashMap<usize, Vec<usize>> = HashMap::new();
        let mut in_degree: HashMap<usize, usize> = closure.iter().map(|&i| (i, 0)).collect();
        for &index in &closure {
            let unique: HashSet<String> = self.modules[index].dependencies().into_iter().collect();
            for dependency in unique {
                if let Some(dep_index) = self.position(&dependency) {
                    dependents.entry(dep_index).or_default().push(index);
                    if let Some(degree) = in_degree.get_mut(&index) {
                        *degree += 1;
                    }
                }
            }
        }

        let mut ready: BTreeSet<usize> = in_degree
            .iter()
            .filter(|&(_, &degree)| degree == 0)
            .map(|(&i, _)| i)
            .collect();
        let mut order = Vec::with_capacity(closure.len());
        while let Some(index) = ready.pop_first() {
            order.push(index);
            for &dependent in dependents.get(&index).into_iter().flatten() {
                if let Some(degree) = in_degree.get_mut(&dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.insert(dependent);
                    }
                }
            }
        }

        if order.len() != closure.len() {
            let placed: HashSet<usize> = order.iter().copied().collect();
            let modules = closure
                .iter()
                .filter(|&&i| !placed.contains(&i))
                .map(|&i| self.modules[i].name().to_string())
                .collect();
            return Err(EngineError::CyclicDependency { modules });
        }
        Ok(order)
    }

    /// Load `name` and any of its dependencies not yet loaded.
    ///
    /// Returns descriptors of the modules loaded by this call.
    pub fn load_module(
        &mut self,
        name: &str,
        store: &WorldStore,
        turns: &mut TurnScheduler,
    ) -> EngineResult<Vec<ModuleDescriptor>> {
        self.load_roots(&[name], store, turns)
    }

    /// Load every registered module.
    pub fn load_all(&mut self, store: &WorldStore, turns: &mut TurnScheduler) -> EngineResult<Vec<ModuleDescriptor>> {
        let names: Vec<String> = self.module_names().into_iter().map(String::from).collect();
        let roots: Vec<&str> = names.iter().map(String::as_str).collect();
        self.load_roots(&roots, store, turns)
    }

    /// Load the listed modules and their dependencies.
    pub fn load_roots(
        &mut self,
        roots: &[&str],
        store: &WorldStore,
        turns: &mut TurnScheduler,
    ) -> EngineResult<Vec<ModuleDescriptor>> {
        let order = self.topological_order(roots)?;
        let mut newly_loaded = Vec::new();
        for index in order {
            if self.is_loaded(self.modules[index].name()) {
                continue;
            }
            let descriptor = Self::load_one(self.modules[index].as_mut(), store, turns)?;
            self.loaded.push(descriptor.clone());
            newly_loaded.push(descriptor);
        }
        Ok(newly_loaded)
    }

    fn load_one(module: &mut dyn Module, store: &WorldStore, turns: &mut TurnScheduler) -> EngineResult<ModuleDescriptor> {
        let mut descriptor = ModuleDescriptor::from_module(module);

        for definition in module.register_component_types() {
            descriptor.component_types.push(definition.name.clone());
            store.register_component_type(definition)?;
        }
        for definition in module.register_relationship_types() {
            descriptor.relationship_types.push(definition.name.clone());
            store.register_relationship_type(definition)?;
        }
        for registry in module.registries() {
            descriptor.registries.push(registry.name.clone());
            store.register_lookup(registry)?;
        }

        let mut ctx = ModuleContext::new(store, turns, &mut descriptor);
        let result = module.initialize(&mut ctx);
        let subscriptions = ctx.into_subscriptions();
        if let Err(source) = result {
            for id in subscriptions {
                store.unsubscribe(id);
            }
            warn!(module = module.name(), error = %source, "Module initialization failed");
            return Err(EngineError::ModuleInitialization {
                module: module.name().to_string(),
                source,
            });
        }

        info!(
            module = %descriptor.name,
            version = %descriptor.version,
            component_types = descriptor.component_types.len(),
            relationship_types = descriptor.relationship_types.len(),
            "Module loaded"
        );
        Ok(descriptor)
    }
}
