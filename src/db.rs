use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::Connection;

pub fn connect(path: &Path) -> Result<Connection> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    let conn = Connection::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS nodes (
            id             TEXT PRIMARY KEY,
            node_type      TEXT NOT NULL,
            content_digest TEXT NOT NULL,
            body           TEXT NOT NULL,
            created_at     TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_nodes_type ON nodes(node_type);

        -- Single row: liveness of the last sync
        CREATE TABLE IF NOT EXISTS plugin_status (
            id            INTEGER PRIMARY KEY CHECK (id = 1),
            last_fetched  INTEGER NOT NULL
        );
        ",
    )?;
    Ok(())
}

// ── Nodes ──

pub struct NodeRow {
    pub id: String,
    pub node_type: String,
    pub content_digest: String,
    pub body: String,
}

pub fn upsert_node(conn: &Connection, row: &NodeRow) -> Result<()> {
    conn.execute(
        "INSERT INTO nodes (id, node_type, content_digest, body)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(id) DO UPDATE SET
             node_type = excluded.node_type,
             content_digest = excluded.content_digest,
             body = excluded.body,
             created_at = datetime('now')",
        rusqlite::params![row.id, row.node_type, row.content_digest, row.body],
    )?;
    Ok(())
}

pub fn set_last_fetched(conn: &Connection, last_fetched: i64) -> Result<()> {
    conn.execute(
        "INSERT INTO plugin_status (id, last_fetched) VALUES (1, ?1)
         ON CONFLICT(id) DO UPDATE SET last_fetched = excluded.last_fetched",
        rusqlite::params![last_fetched],
    )?;
    Ok(())
}

// ── Overview ──

pub struct OverviewRow {
    pub id: String,
    pub node_type: String,
    pub content_digest: String,
    pub created_at: String,
}

pub fn fetch_overview(
    conn: &Connection,
    node_type: Option<&str>,
    limit: usize,
) -> Result<Vec<OverviewRow>> {
    let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

    let where_clause = match node_type {
        Some(t) => {
            params.push(Box::new(t.to_string()));
            " WHERE node_type = ?1".to_string()
        }
        None => String::new(),
    };

    let sql = format!(
        "SELECT id, node_type, content_digest, created_at
         FROM nodes{}
         ORDER BY node_type, id
         LIMIT {}",
        where_clause, limit
    );

    let mut stmt = conn.prepare(&sql)?;
    let param_refs: Vec<&dyn rusqlite::types::ToSql> = params.iter().map(|p| p.as_ref()).collect();
    let rows = stmt
        .query_map(param_refs.as_slice(), |row| {
            Ok(OverviewRow {
                id: row.get(0)?,
                node_type: row.get(1)?,
                content_digest: row.get(2)?,
                created_at: row.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn counts_by_type(conn: &Connection) -> Result<Vec<(String, i64)>> {
    let mut stmt =
        conn.prepare("SELECT node_type, COUNT(*) FROM nodes GROUP BY node_type ORDER BY node_type")?;
    let rows = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ── Stats ──

pub struct Stats {
    pub total: usize,
    pub by_type: Vec<(String, i64)>,
    pub last_fetched: Option<i64>,
}

pub fn get_stats(conn: &Connection) -> Result<Stats> {
    let total: usize = conn.query_row("SELECT COUNT(*) FROM nodes", [], |r| r.get(0))?;
    let by_type = counts_by_type(conn)?;
    let last_fetched: Option<i64> = conn
        .query_row("SELECT MAX(last_fetched) FROM plugin_status", [], |r| r.get(0))?;
    Ok(Stats {
        total,
        by_type,
        last_fetched,
    })
}
