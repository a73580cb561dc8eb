/// Current store schema version. Reads accept this version and the one
/// before it.
pub const SCHEMA_VERSION: i64 = 1;

/// Full SQL schema for tether's `SQLite` database.
pub const SCHEMA_SQL: &str = r"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS tether_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

-- Asset nodes, keyed by Unity GUID
CREATE TABLE IF NOT EXISTS assets (
    guid TEXT PRIMARY KEY,
    path TEXT NOT NULL,
    kind TEXT NOT NULL,
    size_bytes INTEGER NOT NULL DEFAULT 0,
    last_modified TEXT NOT NULL,
    content_hash INTEGER,
    is_analyzed INTEGER NOT NULL DEFAULT 0,
    importer_metadata TEXT NOT NULL DEFAULT '{}',
    active INTEGER NOT NULL DEFAULT 1
);
CREATE INDEX IF NOT EXISTS idx_assets_path ON assets(path);
CREATE INDEX IF NOT EXISTS idx_assets_kind ON assets(kind);
CREATE INDEX IF NOT EXISTS idx_assets_active ON assets(active);

-- Dependency edges; context_path uses '' for none so the uniqueness
-- constraint covers it
CREATE TABLE IF NOT EXISTS dependencies (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source_guid TEXT NOT NULL REFERENCES assets(guid) ON DELETE CASCADE,
    target_guid TEXT NOT NULL REFERENCES assets(guid) ON DELETE CASCADE,
    dep_kind TEXT NOT NULL,
    strength TEXT NOT NULL,
    context_path TEXT NOT NULL DEFAULT '',
    component_type TEXT,
    property_name TEXT,
    source_file_id INTEGER,
    active INTEGER NOT NULL DEFAULT 1,
    UNIQUE(source_guid, target_guid, dep_kind, context_path)
);
CREATE INDEX IF NOT EXISTS idx_deps_source ON dependencies(source_guid);
CREATE INDEX IF NOT EXISTS idx_deps_target ON dependencies(target_guid);
CREATE INDEX IF NOT EXISTS idx_deps_kind ON dependencies(dep_kind);

-- File signature cache for incremental change detection
CREATE TABLE IF NOT EXISTS signatures (
    path TEXT PRIMARY KEY,
    size INTEGER NOT NULL,
    mtime_ns INTEGER NOT NULL,
    content_hash INTEGER,
    last_seen_scan_id INTEGER NOT NULL DEFAULT 0
);

-- Scan history
CREATE TABLE IF NOT EXISTS scans (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    summary TEXT
);
";

/// `SQLite` PRAGMAs for performance.
pub const PRAGMAS_SQL: &str = r"
PRAGMA synchronous = NORMAL;
PRAGMA cache_size = -64000;
PRAGMA foreign_keys = ON;
";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_executes_on_in_memory_sqlite() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
        conn.execute_batch(SCHEMA_SQL).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();

        assert!(tables.contains(&"assets".to_string()));
        assert!(tables.contains(&"dependencies".to_string()));
        assert!(tables.contains(&"signatures".to_string()));
        assert!(tables.contains(&"scans".to_string()));
        assert!(tables.contains(&"tether_meta".to_string()));
    }

    #[test]
    fn edge_uniqueness_enforced() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch(SCHEMA_SQL).unwrap();
        conn.execute(
            "INSERT INTO assets (guid, path, kind, last_modified) VALUES
             ('a', 'p1', 'prefab', ''), ('b', 'p2', 'material', '')",
            [],
        )
        .unwrap();
        let insert = "INSERT INTO dependencies
             (source_guid, target_guid, dep_kind, strength, context_path)
             VALUES ('a', 'b', 'material', 'medium', 'ctx')";
        conn.execute(insert, []).unwrap();
        assert!(conn.execute(insert, []).is_err());
    }
}
