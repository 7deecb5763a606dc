use std::sync::{Arc, Mutex};

use pretty_assertions::assert_eq;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::*;
use crate::entities::Direction;
use crate::events::kinds;
use crate::schema::{ComponentSchema, FieldSchema, PayloadMerge};

fn store() -> WorldStore {
    let store = WorldStore::open_in_memory().unwrap();
    register_types(&store);
    store
}

fn register_types(store: &WorldStore) {
    store
        .register_component_type(ComponentTypeDefinition::new(
            "Health",
            "test",
            ComponentSchema::new()
                .field(FieldSchema::integer("current").required())
                .field(FieldSchema::integer("max").required()),
        ))
        .unwrap();
    store
        .register_component_type(ComponentTypeDefinition::new(
            "Location",
            "test",
            ComponentSchema::new().field(FieldSchema::string("location_type").required()),
        ))
        .unwrap();
    store
        .register_component_type(
            ComponentTypeDefinition::new(
                "Notes",
                "test",
                ComponentSchema::new().allow_additional_fields(),
            )
            .with_merge(PayloadMerge::Shallow),
        )
        .unwrap();
    store
        .register_relationship_type(RelationshipTypeDefinition::new("parent", "Spatial parent", "test"))
        .unwrap();
    store
        .register_relationship_type(RelationshipTypeDefinition::new("owns", "Ownership", "test"))
        .unwrap();
}

/// Subscribe to every event and record "type" strings for one entity.
fn record(store: &WorldStore, entity_id: Option<EntityId>) -> Arc<Mutex<Vec<String>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    store.subscribe(crate::events::kinds::ALL, move |_: &WorldStore, event: &Event| {
        if entity_id.map_or(true, |id| event.concerns(id)) {
            sink.lock().unwrap().push(event.event_type.clone());
        }
        Ok(())
    });
    seen
}

#[test]
fn test_writes_are_immediately_visible() {
    let store = store();
    let city = store.create_entity("Test City").unwrap();
    assert_eq!(store.get_entity(city.id).unwrap(), Some(city.clone()));

    let location = store
        .add_component(city.id, "Location", json!({"location_type": "city"}))
        .unwrap();
    assert_eq!(store.get_component(city.id, "Location").unwrap(), Some(location));
    assert_eq!(store.query_entities(&["Location"]).unwrap(), vec![city]);
}

#[test]
fn test_health_update_scenario() {
    let store = store();
    let hero = store.create_entity("Hero").unwrap();
    let seen = record(&store, Some(hero.id));

    store
        .add_component(hero.id, "Health", json!({"current": 28, "max": 28}))
        .unwrap();
    store
        .update_component(hero.id, "Health", json!({"current": 21, "max": 28}))
        .unwrap();

    let health = store.get_component(hero.id, "Health").unwrap().unwrap();
    assert_eq!(health.version, 2);
    assert_eq!(health.get_i64("current"), Some(21));
    assert_eq!(
        *seen.lock().unwrap(),
        vec![kinds::COMPONENT_ADDED, kinds::COMPONENT_UPDATED]
    );

    let logged: Vec<String> = store
        .get_events(&EventQuery::for_entity(hero.id))
        .into_iter()
        .map(|e| e.event_type)
        .collect();
    assert_eq!(
        logged,
        vec![kinds::COMPONENT_UPDATED, kinds::COMPONENT_ADDED, kinds::ENTITY_CREATED]
    );
}

#[test]
fn test_add_existing_type_is_rejected() {
    let store = store();
    let hero = store.create_entity("Hero").unwrap();
    store
        .add_component(hero.id, "Health", json!({"current": 5, "max": 5}))
        .unwrap();

    let err = store
        .add_component(hero.id, "Health", json!({"current": 1, "max": 5}))
        .unwrap_err();
    assert!(matches!(err, StoreError::DuplicateComponent { .. }));
    assert_eq!(
        store.get_component(hero.id, "Health").unwrap().unwrap().get_i64("current"),
        Some(5)
    );

    let upserted = store
        .upsert_component(hero.id, "Health", json!({"current": 1, "max": 5}))
        .unwrap();
    assert_eq!(upserted.version, 2);
}

#[test]
fn test_at_most_one_active_component() {
    let store = store();
    let hero = store.create_entity("Hero").unwrap();

    for round in 0..3 {
        store
            .upsert_component(hero.id, "Health", json!({"current": round, "max": 10}))
            .unwrap();
        store.remove_component(hero.id, "Health").unwrap();
        store
            .add_component(hero.id, "Health", json!({"current": round, "max": 10}))
            .unwrap();
        store
            .update_component(hero.id, "Health", json!({"current": round + 1, "max": 10}))
            .unwrap();
    }

    let components = store.get_entity_components(hero.id).unwrap();
    assert_eq!(components.len(), 1);
    let health = store.get_component(hero.id, "Health").unwrap().unwrap();
    assert_eq!(health.get_i64("current"), Some(3));
    assert_eq!(health.version, 2);
}

#[test]
fn test_delete_entity_twice_matches_once() {
    let store = store();
    let hero = store.create_entity("Hero").unwrap();
    let seen = record(&store, Some(hero.id));

    store.delete_entity(hero.id, Actor::System).unwrap();
    let once = store.get_entity_including_deleted(hero.id).unwrap().unwrap();
    store.delete_entity(hero.id, Actor::Entity(EntityId::new())).unwrap();
    let twice = store.get_entity_including_deleted(hero.id).unwrap().unwrap();

    assert_eq!(once, twice);
    assert_eq!(twice.deleted_by, Some(Actor::System));
    assert!(store.get_entity(hero.id).unwrap().is_none());
    assert_eq!(*seen.lock().unwrap(), vec![kinds::ENTITY_DELETED]);

    assert!(matches!(
        store.delete_entity(EntityId::new(), Actor::System),
        Err(StoreError::UnknownEntity(_))
    ));
}

#[test]
fn test_remove_component_twice_matches_once() {
    let store = store();
    let hero = store.create_entity("Hero").unwrap();
    store
        .add_component(hero.id, "Health", json!({"current": 5, "max": 5}))
        .unwrap();

    let removed = store.remove_component(hero.id, "Health").unwrap();
    assert!(removed.is_some_and(|c| c.deleted_at.is_some()));
    assert_eq!(store.remove_component(hero.id, "Health").unwrap(), None);
    assert_eq!(store.get_component(hero.id, "Health").unwrap(), None);

    let removals = store.event_history(&EventQuery::for_entity(hero.id).of_type(kinds::COMPONENT_REMOVED));
    assert_eq!(removals.unwrap().len(), 1);
}

#[test]
fn test_tombstoned_entity_hides_components_and_relationships() {
    let store = store();
    let city = store.create_entity("Test City").unwrap();
    let house = store.create_entity("House").unwrap();
    store
        .add_component(house.id, "Location", json!({"location_type": "building"}))
        .unwrap();
    store.add_relationship(house.id, city.id, "parent").unwrap();

    store.delete_entity(city.id, Actor::System).unwrap();
    assert!(store
        .get_relationships(house.id, Direction::Both, None)
        .unwrap()
        .is_empty());

    store.delete_entity(house.id, Actor::System).unwrap();
    assert_eq!(store.get_component(house.id, "Location").unwrap(), None);
    assert!(store.get_entity_components(house.id).unwrap().is_empty());
    assert!(store.query_entities(&["Location"]).unwrap().is_empty());

    store.restore_entity(house.id, Actor::System).unwrap();
    assert!(store.get_component(house.id, "Location").unwrap().is_some());
}

#[test]
fn test_validation_failures() {
    let store = store();
    let hero = store.create_entity("Hero").unwrap();

    assert!(matches!(
        store.add_component(hero.id, "Mana", json!({})),
        Err(StoreError::UnknownComponentType(_))
    ));
    assert!(matches!(
        store.add_component(hero.id, "Health", json!({"current": "full"})),
        Err(StoreError::SchemaValidation { .. })
    ));
    assert!(matches!(
        store.add_component(EntityId::new(), "Health", json!({"current": 1, "max": 1})),
        Err(StoreError::UnknownEntity(_))
    ));
    assert!(matches!(
        store.update_component(hero.id, "Health", json!({"current": 1, "max": 1})),
        Err(StoreError::ComponentNotFound { .. })
    ));
    assert!(matches!(
        store.add_relationship(hero.id, hero.id, "likes"),
        Err(StoreError::UnknownRelationshipType(_))
    ));
}

#[test]
fn test_checked_update_detects_stale_version() {
    let store = store();
    let hero = store.create_entity("Hero").unwrap();
    store
        .add_component(hero.id, "Health", json!({"current": 10, "max": 10}))
        .unwrap();

    store
        .update_component_checked(hero.id, "Health", json!({"current": 9, "max": 10}), 1)
        .unwrap();
    let err = store
        .update_component_checked(hero.id, "Health", json!({"current": 8, "max": 10}), 1)
        .unwrap_err();
    assert!(matches!(
        err,
        StoreError::ConcurrentModification { expected: 1, actual: 2, .. }
    ));
}

#[test]
fn test_shallow_merge_update() {
    let store = store();
    let hero = store.create_entity("Hero").unwrap();
    store
        .add_component(hero.id, "Notes", json!({"mood": "calm", "goal": "rest"}))
        .unwrap();
    let updated = store
        .update_component(hero.id, "Notes", json!({"mood": "angry", "goal": null}))
        .unwrap();
    assert_eq!(updated.data, json!({"mood": "angry"}));
}

#[test]
fn test_failed_batch_rolls_back_and_publishes_nothing() {
    let store = store();
    let seen = record(&store, None);

    let result: StoreResult<()> = store.write(|batch| {
        let hero = batch.create_entity("Hero")?;
        batch.add_component(hero.id, "Health", json!({"current": 1, "max": 1}))?;
        batch.add_component(hero.id, "Health", json!({"current": 2, "max": 2}))?;
        Ok(())
    });

    assert!(matches!(result, Err(StoreError::DuplicateComponent { .. })));
    assert!(store.list_entities(true).unwrap().is_empty());
    assert!(seen.lock().unwrap().is_empty());
    assert!(store.event_history(&EventQuery::default()).unwrap().is_empty());
}

#[test]
fn test_batch_reads_see_own_writes() {
    let store = store();
    let seen = record(&store, None);

    let hero = store
        .write(|batch| {
            let hero = batch.create_entity("Hero")?;
            batch.add_component(hero.id, "Health", json!({"current": 3, "max": 3}))?;
            assert!(batch.get_component(hero.id, "Health")?.is_some());
            assert_eq!(batch.query_entities(&["Health"])?, vec![hero.clone()]);
            Ok(hero)
        })
        .unwrap();

    assert!(store.has_component(hero.id, "Health").unwrap());
    assert_eq!(
        *seen.lock().unwrap(),
        vec![kinds::ENTITY_CREATED, kinds::COMPONENT_ADDED]
    );
}

#[test]
fn test_handlers_can_write_back() {
    let store = store();
    store.subscribe(kinds::ENTITY_CREATED, |store: &WorldStore, event: &Event| {
        let Some(entity_id) = event.entity_id else {
            return Ok(());
        };
        store.add_component(entity_id, "Health", json!({"current": 10, "max": 10}))?;
        Ok(())
    });

    let hero = store.create_entity("Hero").unwrap();
    let health = store.get_component(hero.id, "Health").unwrap().unwrap();
    assert_eq!(health.get_i64("max"), Some(10));
}

#[test]
fn test_failing_handler_does_not_abort_write() {
    let store = store();
    store.subscribe(kinds::ENTITY_CREATED, |_: &WorldStore, _: &Event| {
        anyhow::bail!("subscriber is broken")
    });
    let seen = record(&store, None);

    let hero = store.create_entity("Hero").unwrap();
    assert!(store.get_entity(hero.id).unwrap().is_some());
    assert_eq!(*seen.lock().unwrap(), vec![kinds::ENTITY_CREATED]);
    assert_eq!(store.bus().handler_failures(), 1);
}

#[test]
fn test_query_entities_by_type_set() {
    let store = store();
    let a = store.create_entity("A").unwrap();
    let b = store.create_entity("B").unwrap();
    let c = store.create_entity("C").unwrap();
    for id in [a.id, b.id, c.id] {
        store
            .add_component(id, "Health", json!({"current": 1, "max": 1}))
            .unwrap();
    }
    store
        .add_component(b.id, "Location", json!({"location_type": "inn"}))
        .unwrap();
    store
        .add_component(c.id, "Location", json!({"location_type": "inn"}))
        .unwrap();
    store.remove_component(c.id, "Health").unwrap();

    let names = |entities: Vec<Entity>| entities.into_iter().map(|e| e.name).collect::<Vec<_>>();
    assert_eq!(names(store.query_entities(&[]).unwrap()), vec!["A", "B", "C"]);
    assert_eq!(names(store.query_entities(&["Health"]).unwrap()), vec!["A", "B"]);
    assert_eq!(
        names(store.query_entities(&["Health", "Location", "Health"]).unwrap()),
        vec!["B"]
    );
}

#[test]
fn test_relationship_directions_and_removal() {
    let store = store();
    let hero = store.create_entity("Hero").unwrap();
    let sword = store.create_entity("Sword").unwrap();
    let rel = store
        .add_relationship_with_metadata(hero.id, sword.id, "owns", json!({"since": "dawn"}))
        .unwrap();

    assert_eq!(
        store.get_relationships(hero.id, Direction::Outgoing, None).unwrap(),
        vec![rel.clone()]
    );
    assert!(store
        .get_relationships(hero.id, Direction::Incoming, None)
        .unwrap()
        .is_empty());
    assert_eq!(
        store
            .get_relationships(sword.id, Direction::Both, Some("owns"))
            .unwrap()
            .len(),
        1
    );
    assert!(store
        .get_relationships(sword.id, Direction::Both, Some("parent"))
        .unwrap()
        .is_empty());

    store.remove_relationship(rel.id, Actor::System).unwrap();
    store.remove_relationship(rel.id, Actor::System).unwrap();
    assert!(store
        .get_relationships(hero.id, Direction::Both, None)
        .unwrap()
        .is_empty());
    assert!(store.get_relationship(rel.id).unwrap().unwrap().deleted_at.is_some());
    assert!(matches!(
        store.remove_relationship(RelationshipId::new(), Actor::System),
        Err(StoreError::RelationshipNotFound(_))
    ));
}

#[test]
fn test_rename_and_search() {
    let store = store();
    let inn = store.create_entity("Prancing Pony").unwrap();
    store
        .add_component(inn.id, "Location", json!({"location_type": "tavern"}))
        .unwrap();
    store.create_entity("Pony Express").unwrap();

    assert_eq!(store.search_by_name("pony").unwrap().len(), 2);
    assert_eq!(store.search_text("TAVERN").unwrap()[0].id, inn.id);

    store
        .rename_entity(inn.id, "The Green Dragon", Actor::System)
        .unwrap();
    assert_eq!(store.search_by_name("pony").unwrap().len(), 1);

    let renamed = store
        .event_history(&EventQuery::for_entity(inn.id).of_type(kinds::ENTITY_UPDATED))
        .unwrap();
    assert_eq!(renamed[0].data["old_name"], "Prancing Pony");
}

#[test]
fn test_registry_lookups_and_sealing() {
    let store = store();
    store
        .register_lookup(
            LookupRegistry::new("races", "test")
                .entry(RegistryEntry::new("elf", "Long-lived"))
                .entry(RegistryEntry::new("dwarf", "Stout")),
        )
        .unwrap();
    store.seal_registry().unwrap();

    assert_eq!(store.get_registry_names().unwrap(), vec!["races"]);
    let keys: Vec<String> = store
        .get_registry_values("races")
        .unwrap()
        .into_iter()
        .map(|e| e.key)
        .collect();
    assert_eq!(keys, vec!["elf", "dwarf"]);
    assert!(store.get_registry_values("classes").unwrap().is_empty());

    assert!(matches!(
        store.register_component_type(ComponentTypeDefinition::new("Mana", "late", ComponentSchema::new())),
        Err(StoreError::RegistrySealed(_))
    ));
}

#[test]
fn test_module_events_are_published_and_persisted() {
    let store = store();
    let seen = record(&store, None);
    store
        .publish(Event::new("weather.changed", json!({"to": "rain"})))
        .unwrap();

    assert_eq!(*seen.lock().unwrap(), vec!["weather.changed"]);
    let history = store
        .event_history(&EventQuery::default().of_type("weather.changed"))
        .unwrap();
    assert_eq!(history[0].data["to"], "rain");
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct Health {
    current: i64,
    max: i64,
}

impl TypedComponent for Health {
    const TYPE_NAME: &'static str = "Health";

    fn schema() -> ComponentSchema {
        ComponentSchema::new()
            .field(FieldSchema::integer("current").required())
            .field(FieldSchema::integer("max").required())
    }
}

#[test]
fn test_typed_access() {
    let store = WorldStore::open_in_memory().unwrap();
    store.register_component_type(Health::definition("test")).unwrap();
    let hero = store.create_entity("Hero").unwrap();

    store.add_typed(hero.id, &Health { current: 7, max: 9 }).unwrap();
    store.update_typed(hero.id, &Health { current: 8, max: 9 }).unwrap();
    assert_eq!(
        store.get_typed::<Health>(hero.id).unwrap(),
        Some(Health { current: 8, max: 9 })
    );
}

#[test]
fn test_state_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("world").join("world.db");

    let hero_id = {
        let store = WorldStore::open(&path, StoreOptions::default()).unwrap();
        register_types(&store);
        let hero = store.create_entity("Hero").unwrap();
        store
            .add_component(hero.id, "Health", json!({"current": 4, "max": 9}))
            .unwrap();
        hero.id
    };

    let store = WorldStore::open(&path, StoreOptions::default()).unwrap();
    assert_eq!(store.path(), Some(path.as_path()));
    assert_eq!(store.get_entity(hero_id).unwrap().unwrap().name, "Hero");
    let health = store.get_component(hero_id, "Health").unwrap().unwrap();
    assert_eq!(health.get_i64("current"), Some(4));
    assert_eq!(store.event_history(&EventQuery::for_entity(hero_id)).unwrap().len(), 2);
}

#[test]
fn test_returned_snapshots_equal_stored_rows() {
    let store = store();
    let city = store.create_entity("Test City").unwrap();
    let keep = store.create_entity("Keep").unwrap();
    assert_eq!(store.get_entity(city.id).unwrap().unwrap(), city);

    store
        .add_component(city.id, "Health", json!({"current": 28, "max": 28}))
        .unwrap();
    let updated = store
        .update_component(city.id, "Health", json!({"current": 21, "max": 28}))
        .unwrap();
    assert_eq!(store.get_component(city.id, "Health").unwrap().unwrap(), updated);

    let renamed = store.rename_entity(city.id, "Old City", Actor::System).unwrap();
    assert_eq!(store.get_entity(city.id).unwrap().unwrap(), renamed);

    let rel = store.add_relationship(keep.id, city.id, "parent").unwrap();
    assert_eq!(store.get_relationship(rel.id).unwrap().unwrap(), rel);

    let stored = &store.event_history(&EventQuery::for_entity(city.id)).unwrap()[0];
    let published = store
        .get_events(&EventQuery::default())
        .into_iter()
        .find(|e| e.id == stored.id)
        .unwrap();
    assert_eq!(published.timestamp, stored.timestamp);
}

#[test]
fn test_write_on_one_thread_is_visible_on_another() {
    let store = Arc::new(store());
    let (tx, rx) = std::sync::mpsc::channel();

    let writer = {
        let store = Arc::clone(&store);
        std::thread::spawn(move || {
            for i in 0..20 {
                let entity = store.create_entity(&format!("Guard {i}")).unwrap();
                store
                    .add_component(entity.id, "Health", json!({"current": i, "max": 20}))
                    .unwrap();
                tx.send(entity.id).unwrap();
            }
        })
    };

    let reader = {
        let store = Arc::clone(&store);
        std::thread::spawn(move || {
            for (i, id) in rx.iter().enumerate() {
                let health = store.get_component(id, "Health").unwrap().unwrap();
                assert_eq!(health.get_i64("current"), Some(i as i64));
                assert!(store.get_entity(id).unwrap().is_some());
            }
        })
    };

    writer.join().unwrap();
    reader.join().unwrap();
    assert_eq!(store.query_entities(&["Health"]).unwrap().len(), 20);
}

#[test]
fn test_concurrent_writers_are_serialized() {
    let store = Arc::new(store());
    let hero = store.create_entity("Hero").unwrap().id;
    store
        .add_component(hero, "Health", json!({"current": 0, "max": 100}))
        .unwrap();

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                for _ in 0..10 {
                    store
                        .write(|batch| {
                            let current = batch
                                .get_component(hero, "Health")?
                                .and_then(|c| c.get_i64("current"))
                                .unwrap_or_default();
                            batch.update_component(hero, "Health", json!({"current": current + 1, "max": 100}))
                        })
                        .unwrap();
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    let health = store.get_component(hero, "Health").unwrap().unwrap();
    assert_eq!(health.get_i64("current"), Some(40));
    assert_eq!(health.version, 41);
}

#[test]
fn test_text_search_ignores_field_names() {
    let store = store();
    let hero = store.create_entity("Hero").unwrap();
    store
        .add_component(hero.id, "Health", json!({"current": 5, "max": 9}))
        .unwrap();
    let inn = store.create_entity("Inn").unwrap();
    store
        .add_component(inn.id, "Notes", json!({"summary": "the current barkeep is new"}))
        .unwrap();

    let hits: Vec<EntityId> = store.search_text("current").unwrap().iter().map(|e| e.id).collect();
    assert_eq!(hits, vec![inn.id]);
    assert!(store.search_text("location_type").unwrap().is_empty());
}
