//! SQL schema, row decoding and read paths shared by the store and write batches.
//!
//! Every function takes a plain `&Connection` so the same reads run against
//! the autocommit connection and against an in-flight transaction.

use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

use crate::entities::{Actor, Component, Direction, Entity, EntityId, Relationship, RelationshipId};
use crate::error::{StoreError, StoreResult};
use crate::events::{Event, EventQuery};
use crate::schema::ComponentTypeDefinition;

pub(crate) const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS entities (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        created_at TEXT NOT NULL,
        modified_at TEXT NOT NULL,
        deleted_at TEXT,
        deleted_by TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_entities_name ON entities(name);

    CREATE TABLE IF NOT EXISTS components (
        id TEXT PRIMARY KEY,
        entity_id TEXT NOT NULL REFERENCES entities(id),
        component_type TEXT NOT NULL,
        data TEXT NOT NULL,
        version INTEGER NOT NULL,
        created_at TEXT NOT NULL,
        modified_at TEXT NOT NULL,
        deleted_at TEXT
    );
    CREATE UNIQUE INDEX IF NOT EXISTS idx_components_active
        ON components(entity_id, component_type) WHERE deleted_at IS NULL;
    CREATE INDEX IF NOT EXISTS idx_components_type ON components(component_type);

    CREATE TABLE IF NOT EXISTS relationships (
        id TEXT PRIMARY KEY,
        from_entity TEXT NOT NULL REFERENCES entities(id),
        to_entity TEXT NOT NULL REFERENCES entities(id),
        relationship_type TEXT NOT NULL,
        metadata TEXT NOT NULL DEFAULT '{}',
        created_at TEXT NOT NULL,
        deleted_at TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_relationships_from ON relationships(from_entity);
    CREATE INDEX IF NOT EXISTS idx_relationships_to ON relationships(to_entity);

    CREATE TABLE IF NOT EXISTS events (
        id TEXT PRIMARY KEY,
        event_type TEXT NOT NULL,
        entity_id TEXT,
        component_id TEXT,
        actor TEXT NOT NULL,
        data TEXT NOT NULL,
        timestamp TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_id);

    CREATE TABLE IF NOT EXISTS component_types (
        name TEXT PRIMARY KEY,
        module TEXT NOT NULL,
        description TEXT NOT NULL,
        schema_version TEXT NOT NULL,
        definition TEXT NOT NULL
    );
";

pub(crate) fn init_schema(conn: &Connection) -> StoreResult<()> {
    conn.pragma_update(None, "foreign_keys", true)?;
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

// ── Encoding ─────────────────────────────────────────────────

/// Current time at the precision the database keeps.
pub(crate) fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

pub(crate) fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(raw: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::InvalidData(format!("bad timestamp '{raw}': {e}")))
}

fn parse_opt_ts(raw: Option<String>) -> StoreResult<Option<DateTime<Utc>>> {
    raw.as_deref().map(parse_ts).transpose()
}

fn parse_id<T>(raw: &str) -> StoreResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse()
        .map_err(|e| StoreError::InvalidData(format!("bad id '{raw}': {e}")))
}

fn decode_all<R, T>(
    rows: impl Iterator<Item = rusqlite::Result<R>>,
    decode: impl Fn(R) -> StoreResult<T>,
) -> StoreResult<Vec<T>> {
    let mut out = Vec::new();
    for row in rows {
        out.push(decode(row?)?);
    }
    Ok(out)
}

// ── Entities ─────────────────────────────────────────────────

const ENTITY_COLUMNS: &str = "e.id, e.name, e.created_at, e.modified_at, e.deleted_at, e.deleted_by";

struct EntityRow {
    id: String,
    name: String,
    created_at: String,
    modified_at: String,
    deleted_at: Option<String>,
    deleted_by: Option<String>,
}

impl EntityRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            created_at: row.get(2)?,
            modified_at: row.get(3)?,
            deleted_at: row.get(4)?,
            deleted_by: row.get(5)?,
        })
    }

    fn decode(self) -> StoreResult<Entity> {
        Ok(Entity {
            id: parse_id(&self.id)?,
            name: self.name,
            created_at: parse_ts(&self.created_at)?,
            modified_at: parse_ts(&self.modified_at)?,
            deleted_at: parse_opt_ts(self.deleted_at)?,
            deleted_by: self
                .deleted_by
                .as_deref()
                .map(parse_id::<Actor>)
                .transpose()?,
        })
    }
}

fn collect_entities(conn: &Connection, sql: &str, args: &[&dyn rusqlite::ToSql]) -> StoreResult<Vec<Entity>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(args, EntityRow::read)?;
    decode_all(rows, EntityRow::decode)
}

/// Look up an entity, tombstoned or not.
pub(crate) fn find_entity(conn: &Connection, id: EntityId) -> StoreResult<Option<Entity>> {
    let sql = format!("SELECT {ENTITY_COLUMNS} FROM entities e WHERE e.id = ?1");
    conn.query_row(&sql, params![id.to_string()], EntityRow::read)
        .optional()?
        .map(EntityRow::decode)
        .transpose()
}

pub(crate) fn find_live_entity(conn: &Connection, id: EntityId) -> StoreResult<Option<Entity>> {
    Ok(find_entity(conn, id)?.filter(Entity::is_active))
}

/// Entities in creation order.
pub(crate) fn list_entities(conn: &Connection, include_deleted: bool) -> StoreResult<Vec<Entity>> {
    let filter = if include_deleted { "" } else { "WHERE e.deleted_at IS NULL" };
    let sql = format!("SELECT {ENTITY_COLUMNS} FROM entities e {filter} ORDER BY e.rowid");
    collect_entities(conn, &sql, &[])
}

/// Live entities carrying an active component of every listed type.
pub(crate) fn query_entities(conn: &Connection, required_types: &[&str]) -> StoreResult<Vec<Entity>> {
    let mut types: Vec<&str> = required_types.to_vec();
    types.sort_unstable();
    types.dedup();
    if types.is_empty() {
        return list_entities(conn, false);
    }

    let placeholders = vec!["?"; types.len()].join(", ");
    let sql = format!(
        "SELECT {ENTITY_COLUMNS} FROM entities e
         WHERE e.deleted_at IS NULL
           AND (SELECT COUNT(DISTINCT c.component_type) FROM components c
                WHERE c.entity_id = e.id
                  AND c.deleted_at IS NULL
                  AND c.component_type IN ({placeholders})) = {}
         ORDER BY e.rowid",
        types.len()
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(types.iter()), EntityRow::read)?;
    decode_all(rows, EntityRow::decode)
}

/// Live entities whose active components hold a string value containing
/// `fragment`. Field names never match.
pub(crate) fn search_component_text(conn: &Connection, fragment: &str) -> StoreResult<Vec<Entity>> {
    let pattern = format!("%{}%", escape_like(fragment));
    let sql = format!(
        "SELECT {ENTITY_COLUMNS} FROM entities e
         WHERE e.deleted_at IS NULL
           AND EXISTS (SELECT 1 FROM components c, json_tree(c.data) t
                       WHERE c.entity_id = e.id
                         AND c.deleted_at IS NULL
                         AND t.type = 'text'
                         AND t.atom LIKE ?1 ESCAPE '\\')
         ORDER BY e.rowid"
    );
    collect_entities(conn, &sql, &[&pattern])
}

fn escape_like(fragment: &str) -> String {
    let mut out = String::with_capacity(fragment.len());
    for ch in fragment.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

pub(crate) fn insert_entity(conn: &Connection, entity: &Entity) -> StoreResult<()> {
    conn.execute(
        "INSERT INTO entities (id, name, created_at, modified_at, deleted_at, deleted_by)
         VALUES (?1, ?2, ?3, ?4, NULL, NULL)",
        params![
            entity.id.to_string(),
            entity.name,
            ts(entity.created_at),
            ts(entity.modified_at),
        ],
    )?;
    Ok(())
}

pub(crate) fn update_entity(conn: &Connection, entity: &Entity) -> StoreResult<()> {
    conn.execute(
        "UPDATE entities SET name = ?2, modified_at = ?3, deleted_at = ?4, deleted_by = ?5 WHERE id = ?1",
        params![
            entity.id.to_string(),
            entity.name,
            ts(entity.modified_at),
            entity.deleted_at.map(ts),
            entity.deleted_by.map(|a| a.to_string()),
        ],
    )?;
    Ok(())
}

// ── Components ───────────────────────────────────────────────

const COMPONENT_COLUMNS: &str =
    "c.id, c.entity_id, c.component_type, c.data, c.version, c.created_at, c.modified_at, c.deleted_at";

struct ComponentRow {
    id: String,
    entity_id: String,
    component_type: String,
    data: String,
    version: i64,
    created_at: String,
    modified_at: String,
    deleted_at: Option<String>,
}

impl ComponentRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            entity_id: row.get(1)?,
            component_type: row.get(2)?,
            data: row.get(3)?,
            version: row.get(4)?,
            created_at: row.get(5)?,
            modified_at: row.get(6)?,
            deleted_at: row.get(7)?,
        })
    }

    fn decode(self) -> StoreResult<Component> {
        Ok(Component {
            id: parse_id(&self.id)?,
            entity_id: parse_id(&self.entity_id)?,
            component_type: self.component_type,
            data: serde_json::from_str(&self.data)?,
            version: u64::try_from(self.version)
                .map_err(|_| StoreError::InvalidData(format!("negative version {}", self.version)))?,
            created_at: parse_ts(&self.created_at)?,
            modified_at: parse_ts(&self.modified_at)?,
            deleted_at: parse_opt_ts(self.deleted_at)?,
        })
    }
}

/// The active component of a type, regardless of the owner's tombstone.
pub(crate) fn find_active_component(
    conn: &Connection,
    entity_id: EntityId,
    component_type: &str,
) -> StoreResult<Option<Component>> {
    let sql = format!(
        "SELECT {COMPONENT_COLUMNS} FROM components c
         WHERE c.entity_id = ?1 AND c.component_type = ?2 AND c.deleted_at IS NULL"
    );
    conn.query_row(&sql, params![entity_id.to_string(), component_type], ComponentRow::read)
        .optional()?
        .map(ComponentRow::decode)
        .transpose()
}

/// The active component of a type on a live entity.
pub(crate) fn find_live_component(
    conn: &Connection,
    entity_id: EntityId,
    component_type: &str,
) -> StoreResult<Option<Component>> {
    let sql = format!(
        "SELECT {COMPONENT_COLUMNS} FROM components c
         JOIN entities e ON e.id = c.entity_id AND e.deleted_at IS NULL
         WHERE c.entity_id = ?1 AND c.component_type = ?2 AND c.deleted_at IS NULL"
    );
    conn.query_row(&sql, params![entity_id.to_string(), component_type], ComponentRow::read)
        .optional()?
        .map(ComponentRow::decode)
        .transpose()
}

/// Active components of a live entity, ordered by type name.
pub(crate) fn live_components(conn: &Connection, entity_id: EntityId) -> StoreResult<Vec<Component>> {
    let sql = format!(
        "SELECT {COMPONENT_COLUMNS} FROM components c
         JOIN entities e ON e.id = c.entity_id AND e.deleted_at IS NULL
         WHERE c.entity_id = ?1 AND c.deleted_at IS NULL
         ORDER BY c.component_type"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![entity_id.to_string()], ComponentRow::read)?;
    decode_all(rows, ComponentRow::decode)
}

pub(crate) fn insert_component(conn: &Connection, component: &Component) -> StoreResult<()> {
    conn.execute(
        "INSERT INTO components (id, entity_id, component_type, data, version, created_at, modified_at, deleted_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, NULL)",
        params![
            component.id.to_string(),
            component.entity_id.to_string(),
            component.component_type,
            serde_json::to_string(&component.data)?,
            component.version as i64,
            ts(component.created_at),
            ts(component.modified_at),
        ],
    )?;
    Ok(())
}

pub(crate) fn update_component(conn: &Connection, component: &Component) -> StoreResult<()> {
    conn.execute(
        "UPDATE components SET data = ?2, version = ?3, modified_at = ?4, deleted_at = ?5 WHERE id = ?1",
        params![
            component.id.to_string(),
            serde_json::to_string(&component.data)?,
            component.version as i64,
            ts(component.modified_at),
            component.deleted_at.map(ts),
        ],
    )?;
    Ok(())
}

// ── Relationships ────────────────────────────────────────────

const RELATIONSHIP_COLUMNS: &str =
    "r.id, r.from_entity, r.to_entity, r.relationship_type, r.metadata, r.created_at, r.deleted_at";

struct RelationshipRow {
    id: String,
    from_entity: String,
    to_entity: String,
    relationship_type: String,
    metadata: String,
    created_at: String,
    deleted_at: Option<String>,
}

impl RelationshipRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            from_entity: row.get(1)?,
            to_entity: row.get(2)?,
            relationship_type: row.get(3)?,
            metadata: row.get(4)?,
            created_at: row.get(5)?,
            deleted_at: row.get(6)?,
        })
    }

    fn decode(self) -> StoreResult<Relationship> {
        Ok(Relationship {
            id: parse_id(&self.id)?,
            from_entity: parse_id(&self.from_entity)?,
            to_entity: parse_id(&self.to_entity)?,
            relationship_type: self.relationship_type,
            metadata: serde_json::from_str(&self.metadata)?,
            created_at: parse_ts(&self.created_at)?,
            deleted_at: parse_opt_ts(self.deleted_at)?,
        })
    }
}

pub(crate) fn find_relationship(conn: &Connection, id: RelationshipId) -> StoreResult<Option<Relationship>> {
    let sql = format!("SELECT {RELATIONSHIP_COLUMNS} FROM relationships r WHERE r.id = ?1");
    conn.query_row(&sql, params![id.to_string()], RelationshipRow::read)
        .optional()?
        .map(RelationshipRow::decode)
        .transpose()
}

/// Live relationships touching `entity_id` whose endpoints are both live.
pub(crate) fn live_relationships(
    conn: &Connection,
    entity_id: EntityId,
    direction: Direction,
    relationship_type: Option<&str>,
) -> StoreResult<Vec<Relationship>> {
    let endpoint = match direction {
        Direction::Outgoing => "r.from_entity = ?1",
        Direction::Incoming => "r.to_entity = ?1",
        Direction::Both => "(r.from_entity = ?1 OR r.to_entity = ?1)",
    };
    let sql = format!(
        "SELECT {RELATIONSHIP_COLUMNS} FROM relationships r
         JOIN entities f ON f.id = r.from_entity AND f.deleted_at IS NULL
         JOIN entities t ON t.id = r.to_entity AND t.deleted_at IS NULL
         WHERE r.deleted_at IS NULL
           AND {endpoint}
           AND (?2 IS NULL OR r.relationship_type = ?2)
         ORDER BY r.rowid"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        params![entity_id.to_string(), relationship_type],
        RelationshipRow::read,
    )?;
    decode_all(rows, RelationshipRow::decode)
}

pub(crate) fn insert_relationship(conn: &Connection, rel: &Relationship) -> StoreResult<()> {
    conn.execute(
        "INSERT INTO relationships (id, from_entity, to_entity, relationship_type, metadata, created_at, deleted_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL)",
        params![
            rel.id.to_string(),
            rel.from_entity.to_string(),
            rel.to_entity.to_string(),
            rel.relationship_type,
            serde_json::to_string(&rel.metadata)?,
            ts(rel.created_at),
        ],
    )?;
    Ok(())
}

pub(crate) fn tombstone_relationship(conn: &Connection, id: RelationshipId, at: DateTime<Utc>) -> StoreResult<()> {
    conn.execute(
        "UPDATE relationships SET deleted_at = ?2 WHERE id = ?1",
        params![id.to_string(), ts(at)],
    )?;
    Ok(())
}

// ── Events ───────────────────────────────────────────────────

pub(crate) fn insert_event(conn: &Connection, event: &Event) -> StoreResult<()> {
    conn.execute(
        "INSERT INTO events (id, event_type, entity_id, component_id, actor, data, timestamp)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.id.to_string(),
            event.event_type,
            event.entity_id.map(|id| id.to_string()),
            event.component_id.map(|id| id.to_string()),
            event.actor.to_string(),
            serde_json::to_string(&event.data)?,
            ts(event.timestamp),
        ],
    )?;
    Ok(())
}

struct EventRow {
    id: String,
    event_type: String,
    entity_id: Option<String>,
    component_id: Option<String>,
    actor: String,
    data: String,
    timestamp: String,
}

impl EventRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            event_type: row.get(1)?,
            entity_id: row.get(2)?,
            component_id: row.get(3)?,
            actor: row.get(4)?,
            data: row.get(5)?,
            timestamp: row.get(6)?,
        })
    }

    fn decode(self) -> StoreResult<Event> {
        Ok(Event {
            id: parse_id(&self.id)?,
            event_type: self.event_type,
            entity_id: self.entity_id.as_deref().map(parse_id).transpose()?,
            component_id: self.component_id.as_deref().map(parse_id).transpose()?,
            actor: parse_id(&self.actor)?,
            data: serde_json::from_str(&self.data)?,
            timestamp: parse_ts(&self.timestamp)?,
        })
    }
}

/// Persisted events, most recent first.
pub(crate) fn event_history(conn: &Connection, query: &EventQuery) -> StoreResult<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT id, event_type, entity_id, component_id, actor, data, timestamp FROM events
         WHERE (?1 IS NULL OR entity_id = ?1)
           AND (?2 IS NULL OR event_type = ?2)
         ORDER BY rowid DESC
         LIMIT ?3",
    )?;
    let limit = i64::try_from(query.limit).unwrap_or(i64::MAX);
    let rows = stmt.query_map(
        params![
            query.entity_id.map(|id| id.to_string()),
            query.event_type.as_deref(),
            limit,
        ],
        EventRow::read,
    )?;
    decode_all(rows, EventRow::decode)
}

// ── Component types ──────────────────────────────────────────

pub(crate) fn persist_component_type(conn: &Connection, definition: &ComponentTypeDefinition) -> StoreResult<()> {
    conn.execute(
        "INSERT OR REPLACE INTO component_types (name, module, description, schema_version, definition)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            definition.name,
            definition.module,
            definition.description,
            definition.schema_version,
            serde_json::to_string(definition)?,
        ],
    )?;
    Ok(())
}
