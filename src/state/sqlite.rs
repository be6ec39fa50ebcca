use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use super::backend::ResourceStore;
use super::models::{timestamp, ResourceEvent, ResourceRecord, StackRecord};
use super::schema;
use crate::resource::status::{Action, ResourceState, Status};

/// SQLite-backed state store for local, single-operator use.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the SQLite state database.
    pub fn open(db_path: &str) -> Result<Self> {
        let parent = Path::new(db_path).parent();
        if let Some(dir) = parent {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir).with_context(|| {
                    format!("Failed to create state directory {}", dir.display())
                })?;
            }
        }
        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open state database at {}", db_path))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("State database connection lock poisoned"))
    }
}

#[async_trait]
impl ResourceStore for SqliteStore {
    // ─── Initialization ─────────────────────────────────────────────────────

    async fn initialize(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(schema::CREATE_TABLES_SQL)?;
        conn.execute_batch(schema::CREATE_INDEXES_SQL)?;

        conn.execute(
            "INSERT OR IGNORE INTO schema_version (version, applied_at, description) VALUES (?1, ?2, ?3)",
            params![schema::SCHEMA_VERSION, timestamp(), "Initial schema"],
        )?;
        Ok(())
    }

    // ─── Stacks ─────────────────────────────────────────────────────────────

    async fn store_stack(&self, stack: &StackRecord) -> Result<()> {
        let definition = serde_json::to_string(&stack.definition)?;
        let (action, status) = state_columns(stack.state);
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO stacks (id, name, definition_json, action, status, status_reason, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(name) DO UPDATE SET
                id = excluded.id,
                definition_json = excluded.definition_json,
                action = excluded.action,
                status = excluded.status,
                status_reason = excluded.status_reason,
                updated_at = excluded.updated_at",
            params![
                stack.id,
                stack.name,
                definition,
                action,
                status,
                stack.status_reason,
                stack.created_at,
                stack.updated_at,
            ],
        )
        .with_context(|| format!("Failed to store stack '{}'", stack.name))?;
        Ok(())
    }

    async fn get_stack(&self, name: &str) -> Result<Option<StackRecord>> {
        let raw = {
            let conn = self.conn()?;
            let mut stmt = conn.prepare(
                "SELECT id, name, definition_json, action, status, status_reason, created_at, updated_at
                 FROM stacks WHERE name = ?1",
            )?;
            let raw = stmt
                .query_row(params![name], RawStack::from_row)
                .optional()?;
            raw
        };
        raw.map(RawStack::into_record).transpose()
    }

    async fn list_stacks(&self) -> Result<Vec<StackRecord>> {
        let rows = {
            let conn = self.conn()?;
            let mut stmt = conn.prepare(
                "SELECT id, name, definition_json, action, status, status_reason, created_at, updated_at
                 FROM stacks ORDER BY name",
            )?;
            let rows = stmt
                .query_map([], RawStack::from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };
        rows.into_iter().map(RawStack::into_record).collect()
    }

    async fn delete_stack(&self, name: &str) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let id: Option<String> = tx
            .query_row("SELECT id FROM stacks WHERE name = ?1", params![name], |row| {
                row.get(0)
            })
            .optional()?;
        if let Some(id) = id {
            tx.execute("DELETE FROM resource_events WHERE stack_id = ?1", params![id])?;
            tx.execute("DELETE FROM resources WHERE stack_id = ?1", params![id])?;
            tx.execute("DELETE FROM stacks WHERE id = ?1", params![id])?;
        }
        tx.commit()?;
        Ok(())
    }

    // ─── Resources ──────────────────────────────────────────────────────────

    async fn store_resource(&self, resource: &ResourceRecord) -> Result<()> {
        let definition = serde_json::to_string(&resource.definition)?;
        let snapshot = resource
            .snapshot
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let properties = serde_json::to_string(&resource.properties)?;
        let data = serde_json::to_string(&resource.data)?;
        let (action, status) = state_columns(resource.state);

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO resources (id, stack_id, name, resource_type, position, resource_id,
                                    action, status, status_reason, definition_json, snapshot_json,
                                    properties_json, data_json, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
             ON CONFLICT(stack_id, name) DO UPDATE SET
                id = excluded.id,
                resource_type = excluded.resource_type,
                position = excluded.position,
                resource_id = excluded.resource_id,
                action = excluded.action,
                status = excluded.status,
                status_reason = excluded.status_reason,
                definition_json = excluded.definition_json,
                snapshot_json = excluded.snapshot_json,
                properties_json = excluded.properties_json,
                data_json = excluded.data_json,
                updated_at = excluded.updated_at",
            params![
                resource.id,
                resource.stack_id,
                resource.name,
                resource.resource_type,
                resource.position as i64,
                resource.resource_id,
                action,
                status,
                resource.status_reason,
                definition,
                snapshot,
                properties,
                data,
                resource.created_at,
                resource.updated_at,
            ],
        )
        .with_context(|| format!("Failed to store resource '{}'", resource.name))?;
        Ok(())
    }

    async fn get_resource(&self, stack_id: &str, name: &str) -> Result<Option<ResourceRecord>> {
        let raw = {
            let conn = self.conn()?;
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM resources WHERE stack_id = ?1 AND name = ?2",
                RESOURCE_COLUMNS
            ))?;
            let raw = stmt
                .query_row(params![stack_id, name], RawResource::from_row)
                .optional()?;
            raw
        };
        raw.map(RawResource::into_record).transpose()
    }

    async fn list_resources(&self, stack_id: &str) -> Result<Vec<ResourceRecord>> {
        let rows = {
            let conn = self.conn()?;
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM resources WHERE stack_id = ?1 ORDER BY position, name",
                RESOURCE_COLUMNS
            ))?;
            let rows = stmt
                .query_map(params![stack_id], RawResource::from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };
        rows.into_iter().map(RawResource::into_record).collect()
    }

    async fn delete_resource(&self, stack_id: &str, name: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM resources WHERE stack_id = ?1 AND name = ?2",
            params![stack_id, name],
        )?;
        Ok(())
    }

    // ─── Events ─────────────────────────────────────────────────────────────

    async fn record_event(&self, event: &ResourceEvent) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO resource_events (id, stack_id, resource_name, action, status, reason, resource_id, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                event.id,
                event.stack_id,
                event.resource_name,
                event.action.as_str(),
                event.status.as_str(),
                event.reason,
                event.resource_id,
                event.timestamp,
            ],
        )?;
        Ok(())
    }

    async fn list_events(
        &self,
        stack_id: &str,
        resource_name: Option<&str>,
    ) -> Result<Vec<ResourceEvent>> {
        let rows = {
            let conn = self.conn()?;
            let mut stmt = conn.prepare(
                "SELECT id, stack_id, resource_name, action, status, reason, resource_id, timestamp
                 FROM resource_events
                 WHERE stack_id = ?1 AND (?2 IS NULL OR resource_name = ?2)
                 ORDER BY seq",
            )?;
            let rows = stmt
                .query_map(params![stack_id, resource_name], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, Option<String>>(6)?,
                        row.get::<_, String>(7)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        rows.into_iter()
            .map(
                |(id, stack_id, resource_name, action, status, reason, resource_id, timestamp)| {
                    Ok(ResourceEvent {
                        id,
                        stack_id,
                        resource_name,
                        action: action.parse()?,
                        status: status.parse()?,
                        reason,
                        resource_id,
                        timestamp,
                    })
                },
            )
            .collect()
    }
}

// ─── Row Mapping ────────────────────────────────────────────────────────────

const RESOURCE_COLUMNS: &str = "id, stack_id, name, resource_type, position, resource_id, action, status,
     status_reason, definition_json, snapshot_json, properties_json, data_json, created_at, updated_at";

fn state_columns(state: Option<ResourceState>) -> (Option<&'static str>, Option<&'static str>) {
    match state {
        Some(s) => (Some(s.action.as_str()), Some(s.status.as_str())),
        None => (None, None),
    }
}

fn parse_state(action: Option<String>, status: Option<String>) -> Result<Option<ResourceState>> {
    match (action, status) {
        (Some(action), Some(status)) => Ok(Some(ResourceState::new(
            action.parse::<Action>()?,
            status.parse::<Status>()?,
        ))),
        _ => Ok(None),
    }
}

struct RawStack {
    id: String,
    name: String,
    definition_json: String,
    action: Option<String>,
    status: Option<String>,
    status_reason: String,
    created_at: String,
    updated_at: String,
}

impl RawStack {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            definition_json: row.get(2)?,
            action: row.get(3)?,
            status: row.get(4)?,
            status_reason: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }

    fn into_record(self) -> Result<StackRecord> {
        Ok(StackRecord {
            definition: serde_json::from_str(&self.definition_json)
                .with_context(|| format!("Corrupt definition for stack '{}'", self.name))?,
            state: parse_state(self.action, self.status)?,
            id: self.id,
            name: self.name,
            status_reason: self.status_reason,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

struct RawResource {
    id: String,
    stack_id: String,
    name: String,
    resource_type: String,
    position: i64,
    resource_id: Option<String>,
    action: Option<String>,
    status: Option<String>,
    status_reason: String,
    definition_json: String,
    snapshot_json: Option<String>,
    properties_json: String,
    data_json: String,
    created_at: String,
    updated_at: String,
}

impl RawResource {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            stack_id: row.get(1)?,
            name: row.get(2)?,
            resource_type: row.get(3)?,
            position: row.get(4)?,
            resource_id: row.get(5)?,
            action: row.get(6)?,
            status: row.get(7)?,
            status_reason: row.get(8)?,
            definition_json: row.get(9)?,
            snapshot_json: row.get(10)?,
            properties_json: row.get(11)?,
            data_json: row.get(12)?,
            created_at: row.get(13)?,
            updated_at: row.get(14)?,
        })
    }

    fn into_record(self) -> Result<ResourceRecord> {
        let context = || format!("Corrupt state for resource '{}'", self.name);
        let definition = serde_json::from_str(&self.definition_json).with_context(context)?;
        let snapshot = self
            .snapshot_json
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .with_context(context)?;
        let properties = serde_json::from_str(&self.properties_json).with_context(context)?;
        let data = serde_json::from_str(&self.data_json).with_context(context)?;
        let state = parse_state(self.action, self.status)?;

        Ok(ResourceRecord {
            id: self.id,
            stack_id: self.stack_id,
            name: self.name,
            resource_type: self.resource_type,
            position: self.position.max(0) as usize,
            resource_id: self.resource_id,
            state,
            status_reason: self.status_reason,
            definition,
            snapshot,
            properties,
            data,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
