//! Entity resolution: turning a name from free text into an entity.
//!
//! Matching runs in stages, and the first stage that produces any candidate
//! decides the result:
//!
//! 1. a reference that parses as an entity id resolves by id
//! 2. exact, case-sensitive name
//! 3. case-insensitive name
//! 4. substring of the name
//! 5. fuzzy similarity at or above the configured threshold
//!
//! An optional type filter restricts every stage to entities that carry an
//! active component of that type. The filter is evaluated against the
//! store's committed state on every call; nothing is cached.

pub mod similarity;

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::debug;

use crate::config::ResolverConfig;
use crate::modules::core_components::{Position, LOCATED_AT};
use world_store::{Direction, Entity, EntityId, StoreResult, TypedComponent, WorldStore};

/// Map a semantic kind ("npc", "character", "pc", "place"...) to its component type.
///
/// Anything that is not a known kind is taken as a component type name.
pub fn component_type_for(kind: &str) -> &str {
    match kind.to_ascii_lowercase().as_str() {
        "npc" | "character" => "NPC",
        "player" | "pc" => "PlayerCharacter",
        "location" | "place" => "Location",
        "item" => "Item",
        _ => kind,
    }
}

/// Which stage matched. Earlier stages rank higher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    Id,
    Exact,
    CaseInsensitive,
    Substring,
    Fuzzy,
}

/// One entity that matched a reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub entity: Entity,
    pub matched_by: MatchKind,
    pub score: f64,
    /// Located in the requested context location.
    pub local: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedEntity {
    pub entity: Entity,
    pub matched_by: MatchKind,
    pub score: f64,
    /// Other candidates from the deciding stage, best first.
    pub alternatives: Vec<Entity>,
}

/// Outcome of a resolve. A miss is a value, not an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Resolution {
    Found(ResolvedEntity),
    NotFound { reference: String },
}

impl Resolution {
    pub fn is_found(&self) -> bool {
        matches!(self, Resolution::Found(_))
    }

    pub fn entity(&self) -> Option<&Entity> {
        match self {
            Resolution::Found(found) => Some(&found.entity),
            Resolution::NotFound { .. } => None,
        }
    }

    pub fn into_entity(self) -> Option<Entity> {
        match self {
            Resolution::Found(found) => Some(found.entity),
            Resolution::NotFound { .. } => None,
        }
    }
}

/// Per-call resolve options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolveOptions {
    /// Semantic kind or component type the entity must carry.
    pub expected_type: Option<String>,
    /// Prefer entities in this location when candidates tie.
    pub context_location: Option<EntityId>,
}

impl ResolveOptions {
    pub fn of_type(kind: &str) -> Self {
        Self {
            expected_type: Some(kind.to_string()),
            context_location: None,
        }
    }

    pub fn near(mut self, location: EntityId) -> Self {
        self.context_location = Some(location);
        self
    }
}

/// Resolves references against the live contents of a store.
#[derive(Debug, Clone)]
pub struct EntityResolver<'a> {
    store: &'a WorldStore,
    config: ResolverConfig,
}

impl<'a> EntityResolver<'a> {
    pub fn new(store: &'a WorldStore, config: ResolverConfig) -> Self {
        Self { store, config }
    }

    pub fn resolve(&self, reference: &str) -> StoreResult<Resolution> {
        self.resolve_with(reference, &ResolveOptions::default())
    }

    /// Resolve, requiring a semantic kind such as "location" or "npc".
    pub fn resolve_as(&self, reference: &str, kind: &str) -> StoreResult<Resolution> {
        self.resolve_with(reference, &ResolveOptions::of_type(kind))
    }

    pub fn resolve_with(&self, reference: &str, options: &ResolveOptions) -> StoreResult<Resolution> {
        let mut candidates = self.resolve_all(reference, options)?;
        if candidates.is_empty() {
            debug!(reference, expected_type = ?options.expected_type, "Reference not resolved");
            return Ok(Resolution::NotFound {
                reference: reference.to_string(),
            });
        }

        let best = candidates.remove(0);
        let alternatives = candidates
            .into_iter()
            .take_while(|c| c.matched_by == best.matched_by)
            .map(|c| c.entity)
            .collect();
        debug!(
            reference,
            entity_id = %best.entity.id,
            matched_by = ?best.matched_by,
            score = best.score,
            "Reference resolved"
        );
        Ok(Resolution::Found(ResolvedEntity {
            entity: best.entity,
            matched_by: best.matched_by,
            score: best.score,
            alternatives,
        }))
    }

    /// Every candidate for `reference`, most relevant first.
    ///
    /// Only the earliest stage that matched anything contributes.
    pub fn resolve_all(&self, reference: &str, options: &ResolveOptions) -> StoreResult<Vec<Candidate>> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Ok(Vec::new());
        }
        let required = options.expected_type.as_deref().map(component_type_for);

        if let Ok(id) = reference.parse::<EntityId>() {
            return self.resolve_id(id, required, options);
        }

        let pool = match required {
            Some(component_type) => self.store.query_entities(&[component_type])?,
            None => self.store.list_entities(false)?,
        };

        let lowered = reference.to_lowercase();
        let mut stages: [Vec<(Entity, f64)>; 4] = Default::default();
        for entity in pool {
            let name = entity.name.to_lowercase();
            if entity.name == reference {
                stages[0].push((entity, 1.0));
            } else if name == lowered {
                stages[1].push((entity, 1.0));
            } else if name.contains(&lowered) {
                let score = similarity::similarity(reference, &entity.name);
                stages[2].push((entity, score));
            } else if self.config.allow_fuzzy {
                let score = similarity::similarity(reference, &entity.name);
                if score >= self.config.fuzzy_threshold {
                    stages[3].push((entity, score));
                }
            }
        }

        let kinds = [
            MatchKind::Exact,
            MatchKind::CaseInsensitive,
            MatchKind::Substring,
            MatchKind::Fuzzy,
        ];
        let Some((matched_by, matches)) = kinds
            .into_iter()
            .zip(stages)
            .find(|(_, matches)| !matches.is_empty())
        else {
            return Ok(Vec::new());
        };

        let mut candidates = Vec::with_capacity(matches.len());
        for (entity, score) in matches {
            let local = match options.context_location {
                Some(location) => self.is_located_in(entity.id, location)?,
                None => false,
            };
            candidates.push(Candidate {
                entity,
                matched_by,
                score,
                local,
            });
        }
        // Stable sort: ties keep creation order.
        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then(b.local.cmp(&a.local))
        });
        Ok(candidates)
    }

    fn resolve_id(
        &self,
        id: EntityId,
        required: Option<&str>,
        options: &ResolveOptions,
    ) -> StoreResult<Vec<Candidate>> {
        let Some(entity) = self.store.get_entity(id)? else {
            return Ok(Vec::new());
        };
        if let Some(component_type) = required {
            if !self.store.has_component(id, component_type)? {
                return Ok(Vec::new());
            }
        }
        let local = match options.context_location {
            Some(location) => self.is_located_in(id, location)?,
            None => false,
        };
        Ok(vec![Candidate {
            entity,
            matched_by: MatchKind::Id,
            score: 1.0,
            local,
        }])
    }

    /// `Position.region` names the location, or a `located_at` edge points at it.
    fn is_located_in(&self, entity: EntityId, location: EntityId) -> StoreResult<bool> {
        let region = location.to_string();
        if let Some(position) = self.store.get_component(entity, Position::TYPE_NAME)? {
            if position.get_str("region") == Some(region.as_str()) {
                return Ok(true);
            }
        }
        Ok(self
            .store
            .get_relationships(entity, Direction::Outgoing, Some(LOCATED_AT))?
            .iter()
            .any(|r| r.to_entity == location))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::core_components::{place_in, CoreComponents, Disposition, Location, Npc};
    use crate::modules::ModuleLoader;
    use crate::turns::TurnScheduler;
    use pretty_assertions::assert_eq;

    fn store() -> WorldStore {
        let store = WorldStore::open_in_memory().unwrap();
        let mut loader = ModuleLoader::new();
        loader.register(CoreComponents).unwrap();
        loader.load_all(&store, &mut TurnScheduler::new()).unwrap();
        store
    }

    fn resolver(store: &WorldStore) -> EntityResolver<'_> {
        EntityResolver::new(store, ResolverConfig::default())
    }

    fn found(resolution: Resolution) -> ResolvedEntity {
        match resolution {
            Resolution::Found(found) => found,
            Resolution::NotFound { reference } => panic!("{reference} not resolved"),
        }
    }

    #[test]
    fn test_component_type_aliases() {
        assert_eq!(component_type_for("NPC"), "NPC");
        assert_eq!(component_type_for("npc"), "NPC");
        assert_eq!(component_type_for("Location"), "Location");
        assert_eq!(component_type_for("player"), "PlayerCharacter");
        assert_eq!(component_type_for("PC"), "PlayerCharacter");
        assert_eq!(component_type_for("character"), "NPC");
        assert_eq!(component_type_for("place"), "Location");
        assert_eq!(component_type_for("item"), "Item");
        assert_eq!(component_type_for("Health"), "Health");
    }

    #[test]
    fn test_stages_in_order() {
        let store = store();
        let exact = store.create_entity("Gorrim").unwrap();
        store.create_entity("gorrim").unwrap();
        store.create_entity("Gorrim the Smith").unwrap();
        let r = resolver(&store);

        let hit = found(r.resolve("Gorrim").unwrap());
        assert_eq!(hit.entity.id, exact.id);
        assert_eq!(hit.matched_by, MatchKind::Exact);
        assert!(hit.alternatives.is_empty());

        let hit = found(r.resolve("GORRIM").unwrap());
        assert_eq!(hit.matched_by, MatchKind::CaseInsensitive);
        assert_eq!(hit.entity.id, exact.id);
        assert_eq!(hit.alternatives.len(), 1);

        let hit = found(r.resolve("the smith").unwrap());
        assert_eq!(hit.matched_by, MatchKind::Substring);
        assert_eq!(hit.entity.name, "Gorrim the Smith");
    }

    #[test]
    fn test_fuzzy_threshold_and_toggle() {
        let store = store();
        let inn = store.create_entity("Rusty Anchor Inn").unwrap();

        let hit = found(resolver(&store).resolve("Rusty Ancor").unwrap());
        assert_eq!(hit.entity.id, inn.id);
        assert_eq!(hit.matched_by, MatchKind::Fuzzy);
        assert!(hit.score >= 0.6);

        assert!(!resolver(&store).resolve("Dragon's Lair").unwrap().is_found());

        let strict = EntityResolver::new(
            &store,
            ResolverConfig {
                allow_fuzzy: false,
                ..ResolverConfig::default()
            },
        );
        assert!(!strict.resolve("Rusty Ancor").unwrap().is_found());
    }

    #[test]
    fn test_longer_reference_does_not_fuzzy_match_one_word_name() {
        let store = store();
        store.create_entity("Tavern").unwrap();

        let miss = resolver(&store).resolve("Tavern Keeper Aldric").unwrap();
        assert!(!miss.is_found());
    }

    #[test]
    fn test_type_filter_sees_component_added_just_before() {
        let store = store();
        let city = store.create_entity("Test City").unwrap();
        let r = resolver(&store);

        assert!(!r.resolve_as("Test City", "location").unwrap().is_found());
        store.add_typed(city.id, &Location::new("city")).unwrap();
        let hit = found(r.resolve_as("Test City", "location").unwrap());
        assert_eq!(hit.entity.id, city.id);
        assert!(!r.resolve_as("Test City", "npc").unwrap().is_found());
    }

    #[test]
    fn test_type_filter_applies_to_every_stage() {
        let store = store();
        store.create_entity("Mara").unwrap();
        let npc = store.create_entity("Mara the Baker").unwrap();
        store.add_typed(npc.id, &Npc::new(Disposition::Friendly)).unwrap();

        let hit = found(resolver(&store).resolve_as("Mara", "npc").unwrap());
        assert_eq!(hit.entity.id, npc.id);
        assert_eq!(hit.matched_by, MatchKind::Substring);
    }

    #[test]
    fn test_ties_break_by_creation_then_location() {
        let store = store();
        let first = store.create_entity("Guard").unwrap();
        let second = store.create_entity("Guard").unwrap();
        let gate = store.create_entity("North Gate").unwrap();
        let r = resolver(&store);

        let hit = found(r.resolve("Guard").unwrap());
        assert_eq!(hit.entity.id, first.id);
        assert_eq!(hit.alternatives.iter().map(|e| e.id).collect::<Vec<_>>(), vec![second.id]);

        place_in(&store, second.id, gate.id).unwrap();
        let options = ResolveOptions::default().near(gate.id);
        let hit = found(r.resolve_with("Guard", &options).unwrap());
        assert_eq!(hit.entity.id, second.id);
    }

    #[test]
    fn test_id_reference_and_tombstones() {
        let store = store();
        let ghost = store.create_entity("Ghost").unwrap();
        let r = resolver(&store);

        let hit = found(r.resolve(&ghost.id.to_string()).unwrap());
        assert_eq!(hit.matched_by, MatchKind::Id);
        assert!(!r.resolve_as(&ghost.id.to_string(), "npc").unwrap().is_found());

        store.delete_entity(ghost.id, world_store::Actor::System).unwrap();
        assert!(!r.resolve("Ghost").unwrap().is_found());
        assert!(!r.resolve(&ghost.id.to_string()).unwrap().is_found());
    }

    #[test]
    fn test_blank_reference_is_not_found() {
        let store = store();
        store.create_entity("Anything").unwrap();
        let miss = resolver(&store).resolve("   ").unwrap();
        assert_eq!(miss, Resolution::NotFound { reference: "   ".into() });
    }

    #[test]
    fn test_resolve_all_lists_candidates() {
        let store = store();
        store.create_entity("Old Well").unwrap();
        store.create_entity("Wellspring").unwrap();
        let all = resolver(&store).resolve_all("well", &ResolveOptions::default()).unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.iter().all(|c| c.matched_by == MatchKind::Substring));
    }
}
