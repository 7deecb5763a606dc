//! Error types for module loading and the engine facade.

use thiserror::Error;
use world_store::StoreError;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// The declared dependency graph has a cycle through these modules.
    #[error("cyclic module dependency among: {}", modules.join(", "))]
    CyclicDependency { modules: Vec<String> },

    #[error("module '{module}' depends on '{dependency}', which is not registered")]
    MissingDependency { module: String, dependency: String },

    #[error("module '{0}' is already registered")]
    DuplicateModule(String),

    #[error("unknown module: {0}")]
    UnknownModule(String),

    /// A module's `initialize` failed. Fatal at startup.
    #[error("module '{module}' failed to initialize: {source}")]
    ModuleInitialization {
        module: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("turn handler '{handler}' failed: {source}")]
    Turn {
        handler: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}
