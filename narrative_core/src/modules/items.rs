//! Items, ownership and equipment slots.

use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::debug;

use super::core_components::{Position, MODULE_NAME as CORE_COMPONENTS};
use super::{Module, ModuleContext};
use world_store::{
    ComponentSchema, ComponentTypeDefinition, Direction, EntityId, FieldSchema, LookupRegistry,
    RegistryEntry, RelationshipTypeDefinition, StoreError, StoreResult, TypedComponent, WorldStore,
    WriteBatch,
};

pub const MODULE_NAME: &str = "items";

/// Relationship: owner holds an item.
pub const OWNS: &str = "owns";
/// Relationship: owner wears or wields an item. Metadata carries the slot.
pub const EQUIPPED: &str = "equipped";

pub const EQUIPMENT_SLOTS: &str = "equipment_slots";
pub const ITEM_RARITIES: &str = "item_rarities";

const MAIN_HAND: &str = "main_hand";
const OFF_HAND: &str = "off_hand";

const SLOTS: [(&str, &str, &str); 10] = [
    (MAIN_HAND, "Primary weapon hand", "weapon"),
    (OFF_HAND, "Shield or secondary weapon", "weapon"),
    ("head", "Helmets and hats", "armor"),
    ("body", "Armor and clothing", "armor"),
    ("hands", "Gloves and gauntlets", "armor"),
    ("feet", "Boots", "armor"),
    ("neck", "Amulets and necklaces", "accessory"),
    ("ring_1", "First ring", "accessory"),
    ("ring_2", "Second ring", "accessory"),
    ("back", "Cloaks and capes", "accessory"),
];

const RARITIES: [(&str, &str, &str); 6] = [
    ("common", "Common", "gray"),
    ("uncommon", "Uncommon", "green"),
    ("rare", "Rare", "blue"),
    ("very_rare", "Very rare", "purple"),
    ("legendary", "Legendary", "orange"),
    ("artifact", "Artifact", "red"),
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub weight: f64,
    pub value: f64,
    #[serde(default = "common")]
    pub rarity: String,
    #[serde(default)]
    pub stackable: bool,
    #[serde(default = "one")]
    pub quantity: u32,
}

fn common() -> String {
    "common".to_string()
}

fn one() -> u32 {
    1
}

impl Item {
    pub fn new(weight: f64, value: f64) -> Self {
        Self {
            weight,
            value,
            rarity: common(),
            stackable: false,
            quantity: 1,
        }
    }
}

impl TypedComponent for Item {
    const TYPE_NAME: &'static str = "Item";

    fn schema() -> ComponentSchema {
        ComponentSchema::new()
            .field(FieldSchema::number("weight").required().at_least(0.0))
            .field(FieldSchema::number("value").required().at_least(0.0))
            .field(
                FieldSchema::string("rarity")
                    .one_of(RARITIES.iter().map(|(key, _, _)| *key))
                    .with_default(json!("common")),
            )
            .field(FieldSchema::boolean("stackable").with_default(json!(false)))
            .field(FieldSchema::integer("quantity").at_least(1.0).with_default(json!(1)))
    }
}

/// An item that occupies an equipment slot when worn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Equippable {
    pub slot: String,
    #[serde(default)]
    pub two_handed: bool,
    #[serde(default)]
    pub required_strength: Option<u32>,
    #[serde(default)]
    pub required_level: Option<u32>,
}

impl Equippable {
    pub fn in_slot(slot: &str) -> Self {
        Self {
            slot: slot.to_string(),
            two_handed: false,
            required_strength: None,
            required_level: None,
        }
    }

    pub fn two_handed(mut self) -> Self {
        self.two_handed = true;
        self
    }

    fn uses_hands(&self) -> bool {
        self.two_handed || self.slot == MAIN_HAND || self.slot == OFF_HAND
    }
}

impl TypedComponent for Equippable {
    const TYPE_NAME: &'static str = "Equippable";

    fn schema() -> ComponentSchema {
        ComponentSchema::new()
            .field(
                FieldSchema::string("slot")
                    .required()
                    .one_of(SLOTS.iter().map(|(key, _, _)| *key)),
            )
            .field(FieldSchema::boolean("two_handed").with_default(json!(false)))
            .field(FieldSchema::integer("required_strength").nullable().at_least(0.0))
            .field(FieldSchema::integer("required_level").nullable().at_least(1.0))
    }
}

#[derive(Debug, Error)]
pub enum ItemError {
    #[error("entity {0} is not equippable")]
    NotEquippable(EntityId),

    #[error("entity {owner} does not own item {item}")]
    NotOwned { owner: EntityId, item: EntityId },

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type ItemResult<T> = Result<T, ItemError>;

/// Items `owner` holds, in acquisition order.
pub fn inventory(store: &WorldStore, owner: EntityId) -> ItemResult<Vec<EntityId>> {
    Ok(store
        .get_relationships(owner, Direction::Outgoing, Some(OWNS))?
        .into_iter()
        .map(|r| r.to_entity)
        .collect())
}

/// Equipped items with the slot each occupies.
pub fn equipped(store: &WorldStore, owner: EntityId) -> ItemResult<Vec<(EntityId, String)>> {
    Ok(store
        .get_relationships(owner, Direction::Outgoing, Some(EQUIPPED))?
        .into_iter()
        .map(|r| {
            let slot = r.metadata["slot"].as_str().unwrap_or_default().to_string();
            (r.to_entity, slot)
        })
        .collect())
}

fn owns(batch: &WriteBatch<'_>, owner: EntityId, item: EntityId) -> StoreResult<bool> {
    Ok(batch
        .get_relationships(owner, Direction::Outgoing, Some(OWNS))?
        .iter()
        .any(|r| r.to_entity == item))
}

/// Equip an owned item.
///
/// Whatever already occupies the slot is unequipped first; a two-handed
/// weapon also clears both hands, and any two-handed weapon in hand is
/// cleared when a hand slot is filled. Returns the items that came off.
///
/// The checks and the edge changes run in one transaction.
pub fn equip(store: &WorldStore, owner: EntityId, item: EntityId) -> ItemResult<Vec<EntityId>> {
    store.write(|batch| {
        let Some(gear) = batch.get_typed::<Equippable>(item)? else {
            return Ok(Err(ItemError::NotEquippable(item)));
        };
        if !owns(batch, owner, item)? {
            return Ok(Err(ItemError::NotOwned { owner, item }));
        }

        let worn = batch.get_relationships(owner, Direction::Outgoing, Some(EQUIPPED))?;
        if worn.iter().any(|edge| edge.to_entity == item) {
            return Ok(Ok(Vec::new()));
        }

        let mut conflicts = Vec::new();
        for edge in worn {
            let slot = edge.metadata["slot"].as_str().unwrap_or_default();
            let worn_two_handed = batch
                .get_typed::<Equippable>(edge.to_entity)?
                .is_some_and(|g| g.two_handed);
            let in_hand = slot == MAIN_HAND || slot == OFF_HAND;
            let hands_clash = gear.uses_hands() && (gear.two_handed || worn_two_handed) && in_hand;
            if slot == gear.slot || hands_clash {
                batch.remove_relationship(edge.id, owner.into())?;
                conflicts.push(edge.to_entity);
            }
        }
        batch.add_relationship_with_metadata(owner, item, EQUIPPED, json!({ "slot": gear.slot }))?;
        debug!(%owner, %item, slot = %gear.slot, unequipped = conflicts.len(), "Item equipped");
        Ok(Ok(conflicts))
    })?
}

/// Take an item off. Returns `false` if it was not equipped.
pub fn unequip(store: &WorldStore, owner: EntityId, item: EntityId) -> ItemResult<bool> {
    Ok(store.write(|batch| {
        let mut removed = false;
        for edge in batch.get_relationships(owner, Direction::Outgoing, Some(EQUIPPED))? {
            if edge.to_entity == item {
                removed |= batch.remove_relationship(edge.id, owner.into())?;
            }
        }
        Ok(removed)
    })?)
}

/// Hand an item from one owner to another.
///
/// The item is unequipped, ownership moves, and its `Position.region`
/// follows the new owner.
pub fn transfer(store: &WorldStore, item: EntityId, from: EntityId, to: EntityId) -> ItemResult<()> {
    let outcome = store.write(|batch| {
        if !owns(batch, from, item)? {
            return Ok(Err(ItemError::NotOwned { owner: from, item }));
        }
        for edge in batch.get_relationships(item, Direction::Incoming, None)? {
            let held = edge.relationship_type == OWNS || edge.relationship_type == EQUIPPED;
            if held && edge.from_entity == from {
                batch.remove_relationship(edge.id, from.into())?;
            }
        }
        batch.add_relationship(to, item, OWNS)?;
        batch.upsert_component(item, Position::TYPE_NAME, json!({ "region": to.to_string() }))?;
        Ok(Ok(()))
    })?;
    if outcome.is_ok() {
        debug!(%item, %from, %to, "Item transferred");
    }
    outcome
}

#[derive(Debug, Default)]
pub struct Items;

impl Module for Items {
    fn name(&self) -> &str {
        MODULE_NAME
    }

    fn description(&self) -> &str {
        "Items, ownership and equipment"
    }

    fn dependencies(&self) -> Vec<String> {
        vec![CORE_COMPONENTS.to_string()]
    }

    fn register_component_types(&self) -> Vec<ComponentTypeDefinition> {
        vec![
            Item::definition(MODULE_NAME).with_description("Physical item with weight and value"),
            Equippable::definition(MODULE_NAME).with_description("Item that fits an equipment slot"),
        ]
    }

    fn register_relationship_types(&self) -> Vec<RelationshipTypeDefinition> {
        vec![
            RelationshipTypeDefinition::new(OWNS, "Owner holds an item", MODULE_NAME),
            RelationshipTypeDefinition::new(EQUIPPED, "Owner has an item equipped", MODULE_NAME),
        ]
    }

    fn registries(&self) -> Vec<LookupRegistry> {
        let rarities = RARITIES.iter().fold(
            LookupRegistry::new(ITEM_RARITIES, MODULE_NAME),
            |registry, (key, description, color)| {
                registry.entry(RegistryEntry::new(*key, *description).with_metadata(json!({ "color": color })))
            },
        );
        vec![rarities]
    }

    fn initialize(&mut self, ctx: &mut ModuleContext<'_>) -> anyhow::Result<()> {
        let slots = ctx.create_registry(EQUIPMENT_SLOTS)?;
        for (key, description, category) in SLOTS {
            slots.register(key, description, json!({ "category": category }))?;
        }
        Ok(())
    }
}
