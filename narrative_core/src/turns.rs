//! Turn scheduling.
//!
//! Modules that run structured sequences (combat rounds, timed puzzles)
//! register a [`TurnHandler`] while they initialize. The engine owns the
//! resulting [`TurnScheduler`]; advancing time asks each handler in
//! registration order whether it claims the scene.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{EngineError, EngineResult};
use world_store::{EntityId, WorldStore};

/// Text returned when no handler claims the scene.
pub const NARRATIVE_MESSAGE: &str = "Time passes...";

/// How a time step was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnMode {
    /// Free narrative time, no structured sequence running.
    Narrative,
    /// A handler advanced its own sequence.
    Sequence,
}

/// Result of one `advance` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnOutcome {
    pub mode: TurnMode,
    /// Handler that produced the outcome, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    /// Entity whose turn it now is.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<EntityId>,
    #[serde(default)]
    pub round: u32,
    /// The sequence finished with this step.
    #[serde(default)]
    pub ended: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl TurnOutcome {
    pub fn narrative() -> Self {
        Self {
            mode: TurnMode::Narrative,
            system: None,
            actor: None,
            round: 0,
            ended: false,
            message: Some(NARRATIVE_MESSAGE.to_string()),
        }
    }

    pub fn sequence(system: impl Into<String>, actor: Option<EntityId>, round: u32) -> Self {
        Self {
            mode: TurnMode::Sequence,
            system: Some(system.into()),
            actor,
            round,
            ended: false,
            message: None,
        }
    }

    pub fn ended(mut self) -> Self {
        self.ended = true;
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// A system that owns structured time for some scenes.
pub trait TurnHandler: Send + Sync {
    fn name(&self) -> &str;

    /// Whether this handler is running a sequence in `scene`.
    fn can_handle(&self, store: &WorldStore, scene: EntityId) -> bool;

    fn advance_turn(&mut self, store: &WorldStore, scene: EntityId) -> anyhow::Result<TurnOutcome>;

    fn current_actor(&self, store: &WorldStore, scene: EntityId) -> Option<EntityId>;

    fn end_sequence(&mut self, store: &WorldStore, scene: EntityId) -> anyhow::Result<()>;
}

/// Ordered list of turn handlers, owned by one engine instance.
#[derive(Default)]
pub struct TurnScheduler {
    handlers: Vec<Box<dyn TurnHandler>>,
}

impl std::fmt::Debug for TurnScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TurnScheduler")
            .field("handlers", &self.handler_names())
            .finish()
    }
}

impl TurnScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Box<dyn TurnHandler>) {
        debug!(handler = handler.name(), "Turn handler registered");
        self.handlers.push(handler);
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn handler_names(&self) -> Vec<&str> {
        self.handlers.iter().map(|h| h.name()).collect()
    }

    /// Advance time in `scene`.
    ///
    /// The first handler that claims the scene advances it; with no claimant
    /// the result is a narrative outcome.
    pub fn advance(&mut self, store: &WorldStore, scene: EntityId) -> EngineResult<TurnOutcome> {
        let Some(handler) = self.claimant_mut(store, scene) else {
            return Ok(TurnOutcome::narrative());
        };
        let name = handler.name().to_string();
        handler
            .advance_turn(store, scene)
            .map_err(|source| EngineError::Turn { handler: name, source })
    }

    pub fn current_actor(&self, store: &WorldStore, scene: EntityId) -> Option<EntityId> {
        self.handlers
            .iter()
            .find(|h| h.can_handle(store, scene))
            .and_then(|h| h.current_actor(store, scene))
    }

    /// End the running sequence. Returns `false` if nothing claimed the scene.
    pub fn end_sequence(&mut self, store: &WorldStore, scene: EntityId) -> EngineResult<bool> {
        let Some(handler) = self.claimant_mut(store, scene) else {
            return Ok(false);
        };
        let name = handler.name().to_string();
        handler
            .end_sequence(store, scene)
            .map_err(|source| EngineError::Turn { handler: name, source })?;
        Ok(true)
    }

    fn claimant_mut(&mut self, store: &WorldStore, scene: EntityId) -> Option<&mut Box<dyn TurnHandler>> {
        self.handlers.iter_mut().find(|h| h.can_handle(store, scene))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashSet;

    /// Round-robin over a fixed cast while the scene is active.
    struct Rounds {
        name: &'static str,
        scenes: HashSet<EntityId>,
        cast: Vec<EntityId>,
        step: usize,
        fail: bool,
    }

    impl Rounds {
        fn new(name: &'static str, scene: EntityId, cast: Vec<EntityId>) -> Self {
            Self {
                name,
                scenes: HashSet::from([scene]),
                cast,
                step: 0,
                fail: false,
            }
        }
    }

    impl TurnHandler for Rounds {
        fn name(&self) -> &str {
            self.name
        }

        fn can_handle(&self, _store: &WorldStore, scene: EntityId) -> bool {
            self.scenes.contains(&scene)
        }

        fn advance_turn(&mut self, _store: &WorldStore, _scene: EntityId) -> anyhow::Result<TurnOutcome> {
            if self.fail {
                anyhow::bail!("initiative table is empty");
            }
            self.step += 1;
            let round = (self.step - 1) / self.cast.len() + 1;
            let actor = self.cast[(self.step - 1) % self.cast.len()];
            Ok(TurnOutcome::sequence(self.name, Some(actor), round as u32))
        }

        fn current_actor(&self, _store: &WorldStore, _scene: EntityId) -> Option<EntityId> {
            self.step.checked_sub(1).map(|i| self.cast[i % self.cast.len()])
        }

        fn end_sequence(&mut self, _store: &WorldStore, scene: EntityId) -> anyhow::Result<()> {
            self.scenes.remove(&scene);
            Ok(())
        }
    }

    #[test]
    fn test_no_handler_is_narrative() {
        let store = WorldStore::open_in_memory().unwrap();
        let mut turns = TurnScheduler::new();

        let outcome = turns.advance(&store, EntityId::new()).unwrap();
        assert_eq!(outcome.mode, TurnMode::Narrative);
        assert_eq!(outcome.message.as_deref(), Some("Time passes..."));
    }

    #[test]
    fn test_claimant_advances_and_ends() {
        let store = WorldStore::open_in_memory().unwrap();
        let scene = EntityId::new();
        let (a, b) = (EntityId::new(), EntityId::new());
        let mut turns = TurnScheduler::new();
        turns.register(Box::new(Rounds::new("combat", scene, vec![a, b])));

        assert_eq!(turns.current_actor(&store, scene), None);
        turns.advance(&store, scene).unwrap();
        let second = turns.advance(&store, scene).unwrap();
        let third = turns.advance(&store, scene).unwrap();

        assert_eq!(second.actor, Some(b));
        assert_eq!(third.actor, Some(a));
        assert_eq!(third.round, 2);
        assert_eq!(turns.current_actor(&store, scene), Some(a));

        assert!(turns.end_sequence(&store, scene).unwrap());
        assert_eq!(turns.advance(&store, scene).unwrap().mode, TurnMode::Narrative);
        assert!(!turns.end_sequence(&store, scene).unwrap());
    }

    #[test]
    fn test_first_registered_claimant_wins() {
        let store = WorldStore::open_in_memory().unwrap();
        let scene = EntityId::new();
        let actor = EntityId::new();
        let mut turns = TurnScheduler::new();
        turns.register(Box::new(Rounds::new("combat", scene, vec![actor])));
        turns.register(Box::new(Rounds::new("chase", scene, vec![actor])));

        let outcome = turns.advance(&store, scene).unwrap();
        assert_eq!(outcome.system.as_deref(), Some("combat"));
        assert_eq!(turns.handler_names(), vec!["combat", "chase"]);
    }

    #[test]
    fn test_handler_error_names_handler() {
        let store = WorldStore::open_in_memory().unwrap();
        let scene = EntityId::new();
        let mut handler = Rounds::new("combat", scene, vec![EntityId::new()]);
        handler.fail = true;
        let mut turns = TurnScheduler::new();
        turns.register(Box::new(handler));

        let err = turns.advance(&store, scene).unwrap_err();
        assert!(matches!(err, EngineError::Turn { ref handler, .. } if handler == "combat"));
    }
}
