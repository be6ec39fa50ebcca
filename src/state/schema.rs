/// SQL DDL for the strata state database.
///
/// JSON columns are stored as TEXT. Action and status are NULL for a
/// resource that has never been acted on.

pub const SCHEMA_VERSION: i32 = 1;

pub const CREATE_TABLES_SQL: &str = "
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL,
    description TEXT
);

-- Stacks
CREATE TABLE IF NOT EXISTS stacks (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    definition_json TEXT NOT NULL,
    action TEXT,
    status TEXT,
    status_reason TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Resources
CREATE TABLE IF NOT EXISTS resources (
    id TEXT PRIMARY KEY,
    stack_id TEXT NOT NULL,
    name TEXT NOT NULL,
    resource_type TEXT NOT NULL,
    position INTEGER NOT NULL DEFAULT 0,
    resource_id TEXT,
    action TEXT,
    status TEXT,
    status_reason TEXT NOT NULL DEFAULT '',
    definition_json TEXT NOT NULL,
    snapshot_json TEXT,
    properties_json TEXT NOT NULL DEFAULT '{}',
    data_json TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(stack_id, name)
);

-- Resource events (state transitions)
CREATE TABLE IF NOT EXISTS resource_events (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    stack_id TEXT NOT NULL,
    resource_name TEXT NOT NULL,
    action TEXT NOT NULL,
    status TEXT NOT NULL,
    reason TEXT NOT NULL DEFAULT '',
    resource_id TEXT,
    timestamp TEXT NOT NULL
);
";

pub const CREATE_INDEXES_SQL: &str = "
CREATE INDEX IF NOT EXISTS idx_resources_stack ON resources(stack_id, position);
CREATE INDEX IF NOT EXISTS idx_events_stack ON resource_events(stack_id, resource_name);
";
