//! # Narrative Core (The Cortex)
//!
//! The engine layer over [`world_store`]. It loads modules in dependency
//! order, resolves names from free text to entities, and owns the turn
//! handlers that structure time.
//!
//! ## Core Components
//!
//! - **modules**: the `Module` contract, the dependency-ordered loader and
//!   the built-in `core_components` and `items` modules
//! - **resolver**: staged name resolution with type filtering
//! - **turns**: the ordered turn-handler list owned by each engine
//! - **engine**: the facade tying store, modules and turns together
//!
//! ```no_run
//! use narrative_core::{Engine, EngineConfig};
//!
//! let engine = Engine::open(EngineConfig::load("engine.toml")?)?;
//! let city = engine.store().create_entity("Test City")?;
//! let hit = engine.resolver().resolve("test city")?;
//! assert_eq!(hit.entity().map(|e| e.id), Some(city.id));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod modules;
pub mod resolver;
pub mod turns;

pub use config::*;
pub use engine::{Engine, EngineBuilder};
pub use error::{EngineError, EngineResult};
pub use logging::init_tracing;
pub use modules::{Module, ModuleContext, ModuleDescriptor, ModuleLoader, RegistryWriter};
pub use resolver::{EntityResolver, MatchKind, Resolution, ResolveOptions, ResolvedEntity};
pub use turns::{TurnHandler, TurnMode, TurnOutcome, TurnScheduler};
