use std::collections::HashSet;
use std::io::Write;
use std::sync::Mutex;

use chrono::Utc;
use indicatif::ProgressBar;
use rusqlite::Connection;
use serde::Serialize;
use tracing::{debug, warn};

use crate::db;
use crate::error::{Result, SourceError};
use crate::node::Node;

/// Registers finished nodes with the content graph. Called from several
/// collection pipelines at once, so implementations synchronize internally.
pub trait NodeSink: Sync {
    fn create_node(&self, node: Node) -> Result<()>;
}

/// Receives a liveness signal after every page fetch.
pub trait StatusSink: Sync {
    fn set_plugin_status(&self, status: PluginStatus);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PluginStatus {
    /// Unix timestamp in milliseconds.
    #[serde(rename = "lastFetched")]
    pub last_fetched: i64,
}

impl PluginStatus {
    pub fn now() -> Self {
        Self {
            last_fetched: Utc::now().timestamp_millis(),
        }
    }
}

// ── SQLite ──

/// Node registry backed by the local SQLite database.
pub struct NodeStore {
    conn: Mutex<Connection>,
}

impl NodeStore {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> anyhow::Result<T>) -> Result<T> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| SourceError::Sink("node store lock poisoned".into()))?;
        f(&conn).map_err(|e| SourceError::Sink(format!("{:#}", e)))
    }
}

impl NodeSink for NodeStore {
    fn create_node(&self, node: Node) -> Result<()> {
        let body = serde_json::to_string(&node).map_err(|e| SourceError::Sink(e.to_string()))?;
        self.with_conn(|conn| {
            db::upsert_node(
                conn,
                &db::NodeRow {
                    id: node.id.clone(),
                    node_type: node.internal.node_type.clone(),
                    content_digest: node.internal.content_digest.clone(),
                    body,
                },
            )
        })
    }
}

impl StatusSink for NodeStore {
    fn set_plugin_status(&self, status: PluginStatus) {
        if let Err(e) = self.with_conn(|conn| db::set_last_fetched(conn, status.last_fetched)) {
            warn!("Failed to record plugin status: {}", e);
        }
    }
}

// ── Dry run ──

/// Writes each node as one JSON line.
pub struct JsonLinesSink<W> {
    out: Mutex<W>,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn into_inner(self) -> Result<W> {
        self.out
            .into_inner()
            .map_err(|_| SourceError::Sink("json lines writer poisoned".into()))
    }
}

impl<W: Write + Send> NodeSink for JsonLinesSink<W> {
    fn create_node(&self, node: Node) -> Result<()> {
        let line = serde_json::to_string(&node).map_err(|e| SourceError::Sink(e.to_string()))?;
        let mut out = self
            .out
            .lock()
            .map_err(|_| SourceError::Sink("json lines writer poisoned".into()))?;
        writeln!(out, "{}", line).map_err(|e| SourceError::Sink(e.to_string()))
    }
}

/// Status sink for runs that persist nothing.
pub struct LogStatus;

impl StatusSink for LogStatus {
    fn set_plugin_status(&self, status: PluginStatus) {
        debug!(last_fetched = status.last_fetched, "plugin status");
    }
}

// ── Wrappers ──

/// Rejects a second node with an id already seen in this run.
pub struct UniqueIds<'a> {
    inner: &'a dyn NodeSink,
    seen: Mutex<HashSet<String>>,
}

impl<'a> UniqueIds<'a> {
    pub fn new(inner: &'a dyn NodeSink) -> Self {
        Self {
            inner,
            seen: Mutex::new(HashSet::new()),
        }
    }
}

impl NodeSink for UniqueIds<'_> {
    fn create_node(&self, node: Node) -> Result<()> {
        {
            let mut seen = self
                .seen
                .lock()
                .map_err(|_| SourceError::Sink("id set poisoned".into()))?;
            if !seen.insert(node.id.clone()) {
                return Err(SourceError::DuplicateNodeId(node.id));
            }
        }
        self.inner.create_node(node)
    }
}

/// Ticks a spinner for every node that reaches the inner sink.
pub struct ProgressSink<'a> {
    inner: &'a dyn NodeSink,
    pb: ProgressBar,
}

impl<'a> ProgressSink<'a> {
    pub fn new(inner: &'a dyn NodeSink, pb: ProgressBar) -> Self {
        Self { inner, pb }
    }
}

impl NodeSink for ProgressSink<'_> {
    fn create_node(&self, node: Node) -> Result<()> {
        self.inner.create_node(node)?;
        self.pb.inc(1);
        Ok(())
    }
}
