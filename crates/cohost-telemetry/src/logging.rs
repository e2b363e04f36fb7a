use std::path::Path;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::field::{Field, Visit};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

/// A log record persisted to SQLite.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogRecord {
    pub id: i64,
    pub timestamp: String,
    pub level: String,
    pub target: String,
    pub message: String,
    pub fields: Option<String>,
}

/// Query parameters for searching persisted logs.
#[derive(Clone, Debug, Default)]
pub struct LogQuery {
    pub level: Option<String>,
    pub target: Option<String>,
    pub since: Option<String>,
    pub limit: Option<u32>,
}

/// SQLite sink that persists warn+ logs.
pub struct SqliteLogSink {
    conn: Mutex<Connection>,
}

impl SqliteLogSink {
    pub fn new(db_path: &Path) -> Result<Self, rusqlite::Error> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(db_path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             CREATE TABLE IF NOT EXISTS logs (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 timestamp TEXT NOT NULL,
                 level TEXT NOT NULL,
                 target TEXT NOT NULL,
                 message TEXT NOT NULL,
                 fields TEXT,
                 created_at TEXT NOT NULL DEFAULT (datetime('now'))
             );
             CREATE INDEX IF NOT EXISTS idx_logs_level ON logs(level);
             CREATE INDEX IF NOT EXISTS idx_logs_timestamp ON logs(timestamp);",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn insert(&self, record: &LogInsert) {
        let conn = self.conn.lock();
        let _ = conn.execute(
            "INSERT INTO logs (timestamp, level, target, message, fields)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                record.timestamp,
                record.level,
                record.target,
                record.message,
                record.fields,
            ],
        );
    }

    pub fn query(&self, q: &LogQuery) -> Result<Vec<LogRecord>, rusqlite::Error> {
        let conn = self.conn.lock();
        let mut sql = String::from(
            "SELECT id, timestamp, level, target, message, fields FROM logs WHERE 1=1",
        );
        let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(level) = &q.level {
            sql.push_str(&format!(" AND level = ?{}", params.len() + 1));
            params.push(Box::new(level.clone()));
        }
        if let Some(target) = &q.target {
            sql.push_str(&format!(" AND target LIKE ?{}", params.len() + 1));
            params.push(Box::new(format!("%{target}%")));
        }
        if let Some(since) = &q.since {
            sql.push_str(&format!(" AND timestamp >= ?{}", params.len() + 1));
            params.push(Box::new(since.clone()));
        }

        sql.push_str(" ORDER BY id DESC");

        let limit = q.limit.unwrap_or(100);
        sql.push_str(&format!(" LIMIT {limit}"));

        let param_refs: Vec<&dyn rusqlite::types::ToSql> =
            params.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(param_refs.as_slice(), |row| {
            Ok(LogRecord {
                id: row.get(0)?,
                timestamp: row.get(1)?,
                level: row.get(2)?,
                target: row.get(3)?,
                message: row.get(4)?,
                fields: row.get(5)?,
            })
        })?;

        rows.collect()
    }

    pub fn count(&self) -> Result<i64, rusqlite::Error> {
        let conn = self.conn.lock();
        conn.query_row("SELECT COUNT(*) FROM logs", [], |row| row.get(0))
    }
}

/// Internal insert record (not public).
struct LogInsert {
    timestamp: String,
    level: String,
    target: String,
    message: String,
    fields: Option<String>,
}

/// tracing Layer that writes warn+ events to SQLite.
pub struct SqliteLogLayer {
    sink: std::sync::Arc<SqliteLogSink>,
}

impl SqliteLogLayer {
    pub fn new(sink: std::sync::Arc<SqliteLogSink>) -> Self {
        Self { sink }
    }
}

/// Visitor that extracts fields from a tracing event.
struct FieldVisitor {
    message: Option<String>,
    fields: serde_json::Map<String, serde_json::Value>,
}

impl FieldVisitor {
    fn new() -> Self {
        Self {
            message: None,
            fields: serde_json::Map::new(),
        }
    }
}

impl Visit for FieldVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let val = format!("{:?}", value);
        match field.name() {
            "message" => self.message = Some(val),
            name => {
                self.fields
                    .insert(name.to_string(), serde_json::Value::String(val));
            }
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        match field.name() {
            "message" => self.message = Some(value.to_string()),
            name => {
                self.fields.insert(
                    name.to_string(),
                    serde_json::Value::String(value.to_string()),
                );
            }
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields
            .insert(field.name().to_string(), serde_json::Value::Number(value.into()));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields
            .insert(field.name().to_string(), serde_json::Value::Number(value.into()));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        if let Some(n) = serde_json::Number::from_f64(value) {
            self.fields
                .insert(field.name().to_string(), serde_json::Value::Number(n));
        }
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields
            .insert(field.name().to_string(), serde_json::Value::Bool(value));
    }
}

impl<S> Layer<S> for SqliteLogLayer
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        // Only persist WARN and above
        let level = *event.metadata().level();
        if level > tracing::Level::WARN {
            return;
        }

        let mut visitor = FieldVisitor::new();
        event.record(&mut visitor);

        let fields_json = if visitor.fields.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&visitor.fields).unwrap_or_default())
        };

        let record = LogInsert {
            timestamp: Utc::now().to_rfc3339(),
            level: level.to_string().to_uppercase(),
            target: event.metadata().target().to_string(),
            message: visitor.message.unwrap_or_default(),
            fields: fields_json,
        };

        self.sink.insert(&record);
    }
}
