//! Core components every world needs: identity, placement, locations,
//! characters and containers.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, warn};

use super::{Module, ModuleContext};
use world_store::{
    Component, ComponentSchema, ComponentTypeDefinition, Direction, Entity, EntityId, FieldSchema,
    PayloadMerge, RelationshipTypeDefinition, StoreError, StoreResult, TypedComponent, WorldStore,
    WriteBatch,
};

pub const MODULE_NAME: &str = "core_components";

/// Relationship: entity is inside a location.
pub const LOCATED_AT: &str = "located_at";
/// Relationship: container holds an entity.
pub const CONTAINS: &str = "contains";

pub const CHARACTER_SHEET_CATEGORIES: &str = "character_sheet_categories";

/// Deepest chain of nested regions followed before it is treated as a cycle.
const MAX_REGION_DEPTH: usize = 100;

const SHEET_CATEGORIES: [(&str, &str); 10] = [
    ("core", "Core identity and attributes"),
    ("combat", "Combat statistics"),
    ("skills", "Skills and proficiencies"),
    ("resources", "Expendable resources such as hit dice and charges"),
    ("equipment", "Equipped gear"),
    ("inventory", "Carried items"),
    ("spells", "Spellcasting"),
    ("features", "Class and racial features"),
    ("info", "Background and description"),
    ("misc", "Everything else"),
];

/// Narrative description and free-form tags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl TypedComponent for Identity {
    const TYPE_NAME: &'static str = "Identity";

    fn schema() -> ComponentSchema {
        ComponentSchema::new()
            .field(FieldSchema::string("description").required())
            .field(FieldSchema::array("tags").with_default(json!([])))
    }
}

/// Where an entity is. `region` holds the id of the containing location.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub z: f64,
    #[serde(default)]
    pub region: Option<String>,
}

impl Position {
    pub fn in_region(region: EntityId) -> Self {
        Self {
            region: Some(region.to_string()),
            ..Self::default()
        }
    }

    /// Offset from a parent entity.
    pub fn relative_to(parent: EntityId, x: f64, y: f64, z: f64) -> Self {
        Self {
            x,
            y,
            z,
            region: Some(parent.to_string()),
        }
    }

    /// The region as an entity id. Named areas such as "overworld" are `None`.
    pub fn parent(&self) -> Option<EntityId> {
        self.region.as_deref().and_then(|region| region.parse().ok())
    }
}

impl TypedComponent for Position {
    const TYPE_NAME: &'static str = "Position";

    fn schema() -> ComponentSchema {
        ComponentSchema::new()
            .field(FieldSchema::number("x").with_default(json!(0.0)))
            .field(FieldSchema::number("y").with_default(json!(0.0)))
            .field(FieldSchema::number("z").with_default(json!(0.0)))
            .field(FieldSchema::string("region").nullable())
    }

    fn definition(module: &str) -> ComponentTypeDefinition {
        ComponentTypeDefinition::new(Self::TYPE_NAME, module, Self::schema())
            .with_description("Spatial position and containing region")
            .with_merge(PayloadMerge::Shallow)
    }
}

/// A place: a city, a building, a room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    #[serde(rename = "type")]
    pub location_type: String,
    #[serde(default)]
    pub region: Option<String>,
    /// Enclosing location, if any.
    #[serde(default)]
    pub parent: Option<EntityId>,
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default)]
    pub visited: bool,
}

impl Location {
    pub fn new(location_type: &str) -> Self {
        Self {
            location_type: location_type.to_string(),
            region: None,
            parent: None,
            features: Vec::new(),
            visited: false,
        }
    }

    pub fn within(mut self, parent: EntityId) -> Self {
        self.parent = Some(parent);
        self
    }
}

impl TypedComponent for Location {
    const TYPE_NAME: &'static str = "Location";

    fn schema() -> ComponentSchema {
        ComponentSchema::new()
            .field(FieldSchema::string("type").required().describe("city, building, room..."))
            .field(FieldSchema::string("region").nullable())
            .field(FieldSchema::entity_ref("parent").nullable())
            .field(FieldSchema::array("features").with_default(json!([])))
            .field(FieldSchema::boolean("visited").with_default(json!(false)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    Friendly,
    Neutral,
    Hostile,
    Fearful,
    Admiring,
}

/// A non-player character.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Npc {
    #[serde(default)]
    pub occupation: Option<String>,
    pub disposition: Disposition,
    #[serde(default = "initial_dialogue_state")]
    pub dialogue_state: String,
    #[serde(default)]
    pub met_player: bool,
}

fn initial_dialogue_state() -> String {
    "initial".to_string()
}

impl Npc {
    pub fn new(disposition: Disposition) -> Self {
        Self {
            occupation: None,
            disposition,
            dialogue_state: initial_dialogue_state(),
            met_player: false,
        }
    }
}

impl TypedComponent for Npc {
    const TYPE_NAME: &'static str = "NPC";

    fn schema() -> ComponentSchema {
        ComponentSchema::new()
            .field(FieldSchema::string("occupation").nullable())
            .field(
                FieldSchema::string("disposition")
                    .required()
                    .one_of(["friendly", "neutral", "hostile", "fearful", "admiring"]),
            )
            .field(FieldSchema::string("dialogue_state").with_default(json!("initial")))
            .field(FieldSchema::boolean("met_player").with_default(json!(false)))
    }
}

/// Marks the entity the player controls.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayerCharacter {}

impl TypedComponent for PlayerCharacter {
    const TYPE_NAME: &'static str = "PlayerCharacter";

    fn schema() -> ComponentSchema {
        ComponentSchema::new()
    }
}

/// Something that holds other entities. `None` capacity is unlimited.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Container {
    pub capacity: Option<u32>,
}

impl TypedComponent for Container {
    const TYPE_NAME: &'static str = "Container";

    fn schema() -> ComponentSchema {
        ComponentSchema::new().field(FieldSchema::integer("capacity").required().nullable().at_least(0.0))
    }
}

#[derive(Debug, Error)]
pub enum PlacementError {
    #[error("region entity {0} does not exist")]
    RegionNotFound(EntityId),

    #[error("region entity {0} is deleted")]
    RegionDeleted(EntityId),

    #[error("region entity {0} has no Position to be relative to")]
    RegionUnpositioned(EntityId),

    #[error("placing {entity} in {region} would create a circular reference")]
    CircularReference { entity: EntityId, region: EntityId },

    #[error("region {region} is at capacity ({capacity})")]
    RegionFull { region: EntityId, capacity: u32 },

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type PlacementResult<T> = Result<T, PlacementError>;

/// Absolute coordinates of an entity.
///
/// A `Position` whose region names another entity is an offset from that
/// entity's own world position, so offsets are summed up the chain until a
/// named or empty region is reached. `None` if any level lacks a Position or
/// the chain loops.
pub fn world_position(store: &WorldStore, entity: EntityId) -> StoreResult<Option<(f64, f64, f64)>> {
    let (mut x, mut y, mut z) = (0.0, 0.0, 0.0);
    let mut current = entity;
    for _ in 0..MAX_REGION_DEPTH {
        let Some(position) = store.get_typed::<Position>(current)? else {
            return Ok(None);
        };
        x += position.x;
        y += position.y;
        z += position.z;
        match position.parent() {
            Some(parent) => current = parent,
            None => return Ok(Some((x, y, z))),
        }
    }
    warn!(%entity, "Region chain does not terminate");
    Ok(None)
}

/// Live entities whose `Position.region` is exactly `region`, in creation
/// order. `region` is a named area or an entity id.
pub fn entities_in_region(store: &WorldStore, region: &str) -> StoreResult<Vec<Entity>> {
    let mut found = Vec::new();
    for entity in store.query_entities(&[Position::TYPE_NAME])? {
        let position: Option<Position> = store.get_typed(entity.id)?;
        if position.is_some_and(|p| p.region.as_deref() == Some(region)) {
            found.push(entity);
        }
    }
    Ok(found)
}

pub fn count_entities_in_region(store: &WorldStore, region: &str) -> StoreResult<usize> {
    Ok(entities_in_region(store, region)?.len())
}

/// Whether one more entity fits in `region`.
///
/// Named areas always accept. An entity region must be live, and if it is a
/// `Container` with a capacity, must hold fewer entities than that.
pub fn can_add_to_region(store: &WorldStore, region: &str) -> PlacementResult<()> {
    let Ok(region) = region.parse::<EntityId>() else {
        return Ok(());
    };
    store.write(|batch| {
        Ok(check_region_live(batch, region).and_then(|()| check_capacity(batch, None, region)))
    })?
}

/// Move `entity` into `location`.
///
/// Updates the entity's `Position.region` and replaces its `located_at`
/// edge, in one transaction. The location must be live, must not sit inside
/// `entity`, and must have room if it is a bounded `Container`.
pub fn place_in(store: &WorldStore, entity: EntityId, location: EntityId) -> PlacementResult<()> {
    store.write(|batch| {
        let checked = check_region(batch, entity, location)
            .and_then(|()| check_capacity(batch, Some(entity), location));
        if let Err(err) = checked {
            return Ok(Err(err));
        }
        for edge in batch.get_relationships(entity, Direction::Outgoing, Some(LOCATED_AT))? {
            batch.remove_relationship(edge.id, entity.into())?;
        }
        batch.upsert_component(entity, Position::TYPE_NAME, json!({"region": location.to_string()}))?;
        batch.add_relationship(entity, location, LOCATED_AT)?;
        debug!(%entity, %location, "Entity placed");
        Ok(Ok(()))
    })?
}

/// Set an entity's Position, checked like [`place_in`] when the region is an
/// entity. That entity also needs a Position of its own, since the new
/// coordinates are offsets from it.
pub fn set_position(store: &WorldStore, entity: EntityId, position: &Position) -> PlacementResult<Component> {
    let payload = serde_json::to_value(position).map_err(StoreError::from)?;
    store.write(|batch| {
        if let Some(parent) = position.parent() {
            let checked = check_region(batch, entity, parent)
                .and_then(|()| match batch.get_component(parent, Position::TYPE_NAME)? {
                    Some(_) => Ok(()),
                    None => Err(PlacementError::RegionUnpositioned(parent)),
                })
                .and_then(|()| check_capacity(batch, Some(entity), parent));
            if let Err(err) = checked {
                return Ok(Err(err));
            }
        }
        Ok(Ok(batch.upsert_component(entity, Position::TYPE_NAME, payload)?))
    })?
}

fn check_region_live(batch: &WriteBatch<'_>, region: EntityId) -> PlacementResult<()> {
    match batch.get_entity_including_deleted(region)? {
        None => Err(PlacementError::RegionNotFound(region)),
        Some(found) if !found.is_active() => Err(PlacementError::RegionDeleted(region)),
        Some(_) => Ok(()),
    }
}

/// The region is live and is neither `entity` nor nested inside it.
fn check_region(batch: &WriteBatch<'_>, entity: EntityId, region: EntityId) -> PlacementResult<()> {
    check_region_live(batch, region)?;
    let mut visited = HashSet::from([entity]);
    let mut current = region;
    for _ in 0..MAX_REGION_DEPTH {
        if !visited.insert(current) {
            return Err(PlacementError::CircularReference { entity, region });
        }
        match batch.get_typed::<Position>(current)?.and_then(|p| p.parent()) {
            Some(parent) => current = parent,
            None => return Ok(()),
        }
    }
    Err(PlacementError::CircularReference { entity, region })
}

/// Room for one more in a bounded container. `entity` is not counted if it
/// is already there.
fn check_capacity(batch: &WriteBatch<'_>, entity: Option<EntityId>, region: EntityId) -> PlacementResult<()> {
    let Some(capacity) = batch.get_typed::<Container>(region)?.and_then(|c| c.capacity) else {
        return Ok(());
    };
    let key = region.to_string();
    let mut held = 0;
    for other in batch.query_entities(&[Position::TYPE_NAME])? {
        if Some(other.id) == entity {
            continue;
        }
        let position: Option<Position> = batch.get_typed(other.id)?;
        if position.is_some_and(|p| p.region.as_deref() == Some(key.as_str())) {
            held += 1;
        }
    }
    if held >= capacity as usize {
        return Err(PlacementError::RegionFull { region, capacity });
    }
    Ok(())
}

/// Entities currently in `location`, by `located_at` edge.
pub fn occupants(store: &WorldStore, location: EntityId) -> StoreResult<Vec<EntityId>> {
    Ok(store
        .get_relationships(location, Direction::Incoming, Some(LOCATED_AT))?
        .into_iter()
        .map(|r| r.from_entity)
        .collect())
}

#[derive(Debug, Default)]
pub struct CoreComponents;

impl Module for CoreComponents {
    fn name(&self) -> &str {
        MODULE_NAME
    }

    fn description(&self) -> &str {
        "Identity, placement, locations, characters and containers"
    }

    fn register_component_types(&self) -> Vec<ComponentTypeDefinition> {
        vec![
            Identity::definition(MODULE_NAME).with_description("Narrative description and tags"),
            Position::definition(MODULE_NAME),
            Location::definition(MODULE_NAME).with_description("A place entities can be in"),
            Npc::definition(MODULE_NAME).with_description("Non-player character state"),
            PlayerCharacter::definition(MODULE_NAME).with_description("The player's character"),
            Container::definition(MODULE_NAME).with_description("Holds other entities"),
        ]
    }

    fn register_relationship_types(&self) -> Vec<RelationshipTypeDefinition> {
        vec![
            RelationshipTypeDefinition::new(LOCATED_AT, "Entity is inside a location", MODULE_NAME),
            RelationshipTypeDefinition::new(CONTAINS, "Container holds an entity", MODULE_NAME),
        ]
    }

    fn initialize(&mut self, ctx: &mut ModuleContext<'_>) -> anyhow::Result<()> {
        let categories = ctx.create_registry(CHARACTER_SHEET_CATEGORIES)?;
        for (order, (key, description)) in SHEET_CATEGORIES.iter().enumerate() {
            categories.register(key, description, json!({ "order": order }))?;
        }
        Ok(())
    }
}
