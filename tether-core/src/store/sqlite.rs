use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::scan::{Signature, SignatureCache};
use tether_graphs::{
    AssetKind, AssetNode, DependencyEdge, DependencyKind, GraphDump, Guid, Strength,
};

use super::{schema, AssetStore, StoreStats};

/// SQLite-backed implementation of [`AssetStore`].
#[derive(Debug)]
pub struct SqliteStore {
    conn: Mutex<Connection>,
    path: Option<std::path::PathBuf>,
}

impl SqliteStore {
    /// Open (or create) a store at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Migration(format!("cannot create {}: {e}", parent.display()))
            })?;
        }
        let conn = Connection::open(path).map_err(StoreError::Sqlite)?;
        let store = Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        };
        store.initialize()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(StoreError::Sqlite)?;
        let store = Self {
            conn: Mutex::new(conn),
            path: None,
        };
        store.initialize()?;
        Ok(store)
    }

    fn initialize(&self) -> Result<()> {
        let conn = self.conn.lock().expect("store lock poisoned");

        conn.execute_batch(schema::PRAGMAS_SQL)
            .map_err(StoreError::Sqlite)?;
        // WAL is silently ignored in-memory.
        let _ = conn.execute_batch("PRAGMA journal_mode = WAL;");

        conn.execute_batch(schema::SCHEMA_SQL)
            .map_err(StoreError::Sqlite)?;

        let stored: Option<String> = conn
            .query_row(
                "SELECT value FROM tether_meta WHERE key = 'schema_version'",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(StoreError::Sqlite)?;

        match stored.and_then(|v| v.parse::<i64>().ok()) {
            None => {
                conn.execute(
                    "INSERT OR REPLACE INTO tether_meta (key, value) VALUES ('schema_version', ?1)",
                    params![schema::SCHEMA_VERSION.to_string()],
                )
                .map_err(StoreError::Sqlite)?;
            }
            Some(found)
                if found > schema::SCHEMA_VERSION || found + 1 < schema::SCHEMA_VERSION =>
            {
                return Err(StoreError::SchemaVersion {
                    found,
                    supported: schema::SCHEMA_VERSION,
                }
                .into());
            }
            Some(found) => {
                debug!(found, "Opened store with compatible schema version");
            }
        }
        Ok(())
    }

    fn row_to_node(row: &rusqlite::Row<'_>) -> rusqlite::Result<AssetNode> {
        let guid_str: String = row.get("guid")?;
        let kind_str: String = row.get("kind")?;
        let last_modified_str: String = row.get("last_modified")?;
        let metadata_str: String = row.get("importer_metadata")?;
        // Stored as i64; reinterpret bits back to u64.
        let hash_i64: Option<i64> = row.get("content_hash")?;

        Ok(AssetNode {
            guid: Guid::parse(&guid_str).map_err(|_| {
                rusqlite::Error::InvalidColumnType(
                    0,
                    "guid".into(),
                    rusqlite::types::Type::Text,
                )
            })?,
            path: row.get("path")?,
            kind: AssetKind::parse(&kind_str).unwrap_or(AssetKind::Unknown),
            size_bytes: row.get::<_, i64>("size_bytes")? as u64,
            last_modified: DateTime::parse_from_rfc3339(&last_modified_str)
                .map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc)),
            content_hash: hash_i64.map(|h| h as u64),
            is_analyzed: row.get::<_, i64>("is_analyzed")? != 0,
            importer_metadata: serde_json::from_str(&metadata_str).unwrap_or_default(),
            active: row.get::<_, i64>("active")? != 0,
        })
    }

    fn row_to_edge(row: &rusqlite::Row<'_>) -> rusqlite::Result<DependencyEdge> {
        let source: String = row.get("source_guid")?;
        let target: String = row.get("target_guid")?;
        let dep_kind: String = row.get("dep_kind")?;
        let strength: String = row.get("strength")?;
        let context: String = row.get("context_path")?;

        let bad_guid = |name: &str| {
            rusqlite::Error::InvalidColumnType(0, name.into(), rusqlite::types::Type::Text)
        };
        Ok(DependencyEdge {
            source: Guid::parse(&source).map_err(|_| bad_guid("source_guid"))?,
            target: Guid::parse(&target).map_err(|_| bad_guid("target_guid"))?,
            dep_kind: DependencyKind::parse(&dep_kind).unwrap_or(DependencyKind::Indirect),
            strength: Strength::parse(&strength).unwrap_or_default(),
            context_path: if context.is_empty() { None } else { Some(context) },
            component_type: row.get("component_type")?,
            property_name: row.get("property_name")?,
            source_file_id: row.get("source_file_id")?,
            active: row.get::<_, i64>("active")? != 0,
        })
    }

    fn insert_node(conn: &Connection, node: &AssetNode) -> Result<()> {
        let metadata =
            serde_json::to_string(&node.importer_metadata).map_err(StoreError::Serialization)?;
        conn.execute(
            "INSERT INTO assets
                 (guid, path, kind, size_bytes, last_modified, content_hash,
                  is_analyzed, importer_metadata, active)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(guid) DO UPDATE SET
                 path = excluded.path,
                 kind = excluded.kind,
                 size_bytes = excluded.size_bytes,
                 last_modified = excluded.last_modified,
                 content_hash = excluded.content_hash,
                 is_analyzed = excluded.is_analyzed,
                 importer_metadata = excluded.importer_metadata,
                 active = excluded.active",
            params![
                node.guid.as_str(),
                node.path,
                node.kind.as_str(),
                node.size_bytes as i64,
                node.last_modified.to_rfc3339(),
                node.content_hash.map(|h| h as i64),
                node.is_analyzed as i64,
                metadata,
                node.active as i64,
            ],
        )
        .map_err(StoreError::Sqlite)?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl AssetStore for SqliteStore {
    async fn load_graph(&self) -> Result<GraphDump> {
        let conn = self.conn.lock().expect("store lock poisoned");

        let mut stmt = conn
            .prepare_cached("SELECT * FROM assets ORDER BY guid")
            .map_err(StoreError::Sqlite)?;
        let nodes = stmt
            .query_map([], Self::row_to_node)
            .map_err(StoreError::Sqlite)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StoreError::Sqlite)?;

        let mut stmt = conn
            .prepare_cached(
                "SELECT * FROM dependencies
                 ORDER BY source_guid, target_guid, dep_kind, context_path",
            )
            .map_err(StoreError::Sqlite)?;
        let edges = stmt
            .query_map([], Self::row_to_edge)
            .map_err(StoreError::Sqlite)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StoreError::Sqlite)?;

        Ok(GraphDump {
            schema_version: GraphDump::SCHEMA_VERSION,
            nodes,
            edges,
        })
    }

    async fn save_node(&self, node: &AssetNode) -> Result<()> {
        let conn = self.conn.lock().expect("store lock poisoned");
        Self::insert_node(&conn, node)
    }

    async fn deactivate_node(&self, guid: &Guid) -> Result<()> {
        let conn = self.conn.lock().expect("store lock poisoned");
        conn.execute(
            "UPDATE assets SET active = 0 WHERE guid = ?1",
            params![guid.as_str()],
        )
        .map_err(StoreError::Sqlite)?;
        conn.execute(
            "UPDATE dependencies SET active = 0
             WHERE source_guid = ?1 OR target_guid = ?1",
            params![guid.as_str()],
        )
        .map_err(StoreError::Sqlite)?;
        Ok(())
    }

    async fn replace_dependencies(&self, source: &Guid, edges: &[DependencyEdge]) -> Result<()> {
        let mut conn = self.conn.lock().expect("store lock poisoned");
        let tx = conn.transaction().map_err(StoreError::Sqlite)?;
        tx.execute(
            "DELETE FROM dependencies WHERE source_guid = ?1",
            params![source.as_str()],
        )
        .map_err(StoreError::Sqlite)?;
        {
            let mut stmt = tx
                .prepare_cached(
                    "INSERT OR REPLACE INTO dependencies
                         (source_guid, target_guid, dep_kind, strength, context_path,
                          component_type, property_name, source_file_id, active)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                )
                .map_err(StoreError::Sqlite)?;
            for edge in edges {
                stmt.execute(params![
                    edge.source.as_str(),
                    edge.target.as_str(),
                    edge.dep_kind.as_str(),
                    edge.strength.as_str(),
                    edge.context_path.as_deref().unwrap_or(""),
                    edge.component_type,
                    edge.property_name,
                    edge.source_file_id,
                    edge.active as i64,
                ])
                .map_err(StoreError::Sqlite)?;
            }
        }
        tx.commit().map_err(StoreError::Sqlite)?;
        Ok(())
    }

    async fn load_signatures(&self) -> Result<SignatureCache> {
        let conn = self.conn.lock().expect("store lock poisoned");
        let mut stmt = conn
            .prepare_cached("SELECT path, size, mtime_ns, content_hash FROM signatures")
            .map_err(StoreError::Sqlite)?;
        let entries = stmt
            .query_map([], |row| {
                let hash: Option<i64> = row.get(3)?;
                Ok((
                    row.get::<_, String>(0)?,
                    Signature {
                        size: row.get::<_, i64>(1)? as u64,
                        mtime_ns: row.get(2)?,
                        content_hash: hash.map(|h| h as u64),
                    },
                ))
            })
            .map_err(StoreError::Sqlite)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StoreError::Sqlite)?;
        Ok(SignatureCache::from_entries(entries))
    }

    async fn flush_signatures(&self, cache: &SignatureCache, scan_id: i64) -> Result<()> {
        let mut conn = self.conn.lock().expect("store lock poisoned");
        let tx = conn.transaction().map_err(StoreError::Sqlite)?;
        tx.execute("DELETE FROM signatures", [])
            .map_err(StoreError::Sqlite)?;
        {
            let mut stmt = tx
                .prepare_cached(
                    "INSERT INTO signatures (path, size, mtime_ns, content_hash, last_seen_scan_id)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )
                .map_err(StoreError::Sqlite)?;
            for (path, sig) in cache.entries() {
                stmt.execute(params![
                    path,
                    sig.size as i64,
                    sig.mtime_ns,
                    sig.content_hash.map(|h| h as i64),
                    scan_id,
                ])
                .map_err(StoreError::Sqlite)?;
            }
        }
        tx.commit().map_err(StoreError::Sqlite)?;
        Ok(())
    }

    async fn begin_scan(&self) -> Result<i64> {
        let conn = self.conn.lock().expect("store lock poisoned");
        conn.execute(
            "INSERT INTO scans (started_at) VALUES (?1)",
            params![Utc::now().to_rfc3339()],
        )
        .map_err(StoreError::Sqlite)?;
        Ok(conn.last_insert_rowid())
    }

    async fn finish_scan(&self, scan_id: i64, summary: &str) -> Result<()> {
        let conn = self.conn.lock().expect("store lock poisoned");
        conn.execute(
            "UPDATE scans SET finished_at = ?1, summary = ?2 WHERE id = ?3",
            params![Utc::now().to_rfc3339(), summary, scan_id],
        )
        .map_err(StoreError::Sqlite)?;
        Ok(())
    }

    async fn stats(&self) -> Result<StoreStats> {
        let conn = self.conn.lock().expect("store lock poisoned");
        let total_assets: i64 = conn
            .query_row("SELECT COUNT(*) FROM assets", [], |r| r.get(0))
            .map_err(StoreError::Sqlite)?;
        let active_assets: i64 = conn
            .query_row("SELECT COUNT(*) FROM assets WHERE active = 1", [], |r| {
                r.get(0)
            })
            .map_err(StoreError::Sqlite)?;
        let total_dependencies: i64 = conn
            .query_row("SELECT COUNT(*) FROM dependencies", [], |r| r.get(0))
            .map_err(StoreError::Sqlite)?;

        let mut assets_by_kind: HashMap<String, u64> = HashMap::new();
        let mut stmt = conn
            .prepare_cached("SELECT kind, COUNT(*) FROM assets WHERE active = 1 GROUP BY kind")
            .map_err(StoreError::Sqlite)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
            })
            .map_err(StoreError::Sqlite)?;
        for row in rows {
            let (kind, count) = row.map_err(StoreError::Sqlite)?;
            assets_by_kind.insert(kind, count);
        }

        let db_size_bytes = self
            .path
            .as_ref()
            .and_then(|p| std::fs::metadata(p).ok())
            .map_or(0, |m| m.len());

        Ok(StoreStats {
            total_assets: total_assets as u64,
            active_assets: active_assets as u64,
            total_dependencies: total_dependencies as u64,
            assets_by_kind,
            db_size_bytes,
        })
    }
}
