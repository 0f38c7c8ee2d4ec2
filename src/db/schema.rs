/// Schema for the entity cache.
///
/// `last_sync_time` is Unix milliseconds so MAX() and range deletes compare numerically.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS fallas (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    section TEXT NOT NULL,
    category TEXT NOT NULL DEFAULT 'SIN_CATEGORIA',
    president TEXT,
    fallera TEXT,
    artist TEXT,
    founded_year INTEGER,
    motto TEXT,
    description TEXT,
    badge TEXT,
    experimental INTEGER NOT NULL DEFAULT 0,
    latitude REAL,
    longitude REAL,
    website TEXT,
    phone TEXT,
    email TEXT,
    sketch_url TEXT,
    total_events INTEGER NOT NULL DEFAULT 0,
    total_ninots INTEGER NOT NULL DEFAULT 0,
    total_members INTEGER NOT NULL DEFAULT 0,
    created_at TEXT,
    updated_at TEXT,
    last_sync_time INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_fallas_name ON fallas(name);
CREATE INDEX IF NOT EXISTS idx_fallas_category ON fallas(category);
CREATE INDEX IF NOT EXISTS idx_fallas_section ON fallas(section);
CREATE INDEX IF NOT EXISTS idx_fallas_last_sync ON fallas(last_sync_time);
"#;
