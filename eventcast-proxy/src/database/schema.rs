//! Database schema definitions.

/// SQL schema for the event store.
pub const SCHEMA_SQL: &str = r#"
-- Discovered events
CREATE TABLE IF NOT EXISTS entries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    provider TEXT NOT NULL,                -- Provider adapter name
    event_id TEXT NOT NULL,                -- Provider-scoped event id
    name TEXT NOT NULL,
    network TEXT,
    sport TEXT,
    image TEXT,
    upstream_ref TEXT NOT NULL,            -- Opaque stream reference for the adapter
    start_at INTEGER NOT NULL,             -- Unix seconds
    end_at INTEGER NOT NULL,               -- Unix seconds
    channel TEXT,                          -- Channel number or linear channel id (NULL = unscheduled)
    is_linear INTEGER,                     -- Linear marker (NULL = unset)
    created_at INTEGER DEFAULT (strftime('%s', 'now')),
    UNIQUE(provider, event_id)
);

-- Live channel schedule
CREATE TABLE IF NOT EXISTS schedule (
    channel INTEGER PRIMARY KEY,
    ends_at INTEGER NOT NULL               -- End of the last entry packed onto this channel
);

-- Provider state
CREATE TABLE IF NOT EXISTS providers (
    name TEXT PRIMARY KEY,
    enabled INTEGER DEFAULT 1,
    tokens TEXT,                           -- Adapter-specific credential blob (JSON)
    updated_at INTEGER DEFAULT (strftime('%s', 'now'))
);

-- Channel numbering policy
CREATE TABLE IF NOT EXISTS channel_policy (
    id INTEGER PRIMARY KEY CHECK (id = 1),  -- Only one policy row allowed
    start_channel INTEGER NOT NULL,
    num_of_channels INTEGER NOT NULL,
    use_linear INTEGER NOT NULL DEFAULT 0,
    updated_at INTEGER DEFAULT (strftime('%s', 'now'))
);

CREATE INDEX IF NOT EXISTS idx_entries_channel ON entries(channel);
CREATE INDEX IF NOT EXISTS idx_entries_start ON entries(start_at, id);
CREATE INDEX IF NOT EXISTS idx_entries_provider ON entries(provider);
"#;
