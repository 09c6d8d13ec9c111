//! Append-only audit store.
//!
//! Grounded on `Rul1an-assay/crates/assay-core/src/runtime/schema.rs`'s
//! `CREATE TABLE IF NOT EXISTS`-plus-index migration style and
//! `danielchristiancazares-forge/context/src/sqlite_util.rs`'s secure-open
//! idiom (parent-directory creation, WAL pragma at open time), rebuilt
//! around `rusqlite` directly rather than that crate's hand-rolled
//! timestamp formatting — `chrono` is already a dependency here and is used
//! for `created_at` instead.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Per-field truncation budget applied only at the storage boundary (§3).
const TRUNCATE_BUDGET: usize = 8192;
const TRUNCATION_SUFFIX: &str = "…(truncated)";

/// Which frontend produced a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Line-delimited stdio frontend.
    Stdio,
    /// Session-oriented HTTP+SSE frontend.
    Http,
}

impl Mode {
    fn as_str(self) -> &'static str {
        match self {
            Self::Stdio => "stdio",
            Self::Http => "http",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "http" => Self::Http,
            _ => Self::Stdio,
        }
    }
}

/// One call outcome, ready to be appended. Carries the full, untruncated
/// `params`/`response` text — truncation happens inside [`AuditStore::append`],
/// never before (§9).
#[derive(Debug, Clone)]
pub struct AuditRecord {
    /// Which frontend handled the call.
    pub mode: Mode,
    /// JSON-RPC method name.
    pub method: String,
    /// Tool name, when one was resolved (absent for e.g. an unknown-method
    /// outcome where no tool was ever looked up).
    pub tool_name: Option<String>,
    /// Request params, as JSON text.
    pub params: String,
    /// Response payload, as JSON text. Empty on an error outcome.
    pub response: String,
    /// Human-readable error, when the call did not succeed.
    pub error: Option<String>,
    /// Size, in bytes, of the original (untruncated) request payload.
    pub request_size: usize,
    /// Size, in bytes, of the original (untruncated) response payload.
    pub response_size: usize,
    /// Wall-clock duration of the call, in milliseconds.
    pub duration_ms: u64,
}

/// A persisted [`AuditRecord`], with its assigned id and timestamp.
#[derive(Debug, Clone)]
pub struct StoredAuditRecord {
    /// Monotonically increasing id assigned by the store.
    pub id: i64,
    /// See [`AuditRecord::mode`].
    pub mode: Mode,
    /// See [`AuditRecord::method`].
    pub method: String,
    /// See [`AuditRecord::tool_name`].
    pub tool_name: Option<String>,
    /// Possibly-truncated params text.
    pub params: String,
    /// Possibly-truncated response text.
    pub response: String,
    /// See [`AuditRecord::error`].
    pub error: Option<String>,
    /// See [`AuditRecord::request_size`].
    pub request_size: usize,
    /// See [`AuditRecord::response_size`].
    pub response_size: usize,
    /// See [`AuditRecord::duration_ms`].
    pub duration_ms: u64,
    /// When the store committed this record.
    pub created_at: DateTime<Utc>,
}

/// Filter applied to [`AuditStore::list`]/[`AuditStore::count`]. Every
/// populated field narrows the query; `None` leaves it unconstrained. This
/// exists to serve an external admin surface this crate does not itself
/// implement (§4.D) — nothing in `cmdgate` itself calls `list`/`count` yet.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    /// Restrict to one frontend.
    pub mode: Option<Mode>,
    /// Restrict to one tool name.
    pub tool_name: Option<String>,
    /// Restrict to one JSON-RPC method.
    pub method: Option<String>,
}

/// Migrations are identified by name and applied in lexical order at
/// store-open time; an already-applied one (tracked in `migrations`) is
/// skipped idempotently.
const MIGRATIONS: &[(&str, &str)] = &[
    (
        "0001_migrations_table",
        "CREATE TABLE IF NOT EXISTS migrations (
            name TEXT PRIMARY KEY,
            applied_at TEXT NOT NULL
        );",
    ),
    (
        "0002_audit_logs",
        "CREATE TABLE audit_logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            mode TEXT NOT NULL,
            method TEXT NOT NULL,
            tool_name TEXT,
            params TEXT NOT NULL,
            response TEXT NOT NULL,
            error TEXT,
            request_size INTEGER NOT NULL,
            response_size INTEGER NOT NULL,
            duration_ms INTEGER NOT NULL,
            created_at TEXT NOT NULL
        );",
    ),
    (
        "0003_audit_logs_indexes",
        "CREATE INDEX idx_audit_logs_tool_name ON audit_logs (tool_name);
         CREATE INDEX idx_audit_logs_created_at ON audit_logs (created_at);",
    ),
];

/// An append-only, WAL-mode SQLite-backed audit log (§4.D).
pub struct AuditStore {
    conn: Mutex<Connection>,
}

impl AuditStore {
    /// Open (creating if necessary) the database at `path`, applying any
    /// migration not yet recorded in the `migrations` table.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::Error::Audit`] if the file cannot be opened,
    /// WAL mode cannot be enabled, or a migration fails to apply.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.run_migrations()?;
        Ok(store)
    }

    /// Open an in-memory store, for tests.
    #[cfg(test)]
    fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.run_migrations()?;
        Ok(store)
    }

    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn.lock().expect("audit connection mutex poisoned");

        // The migrations table itself must exist before we can query it.
        conn.execute_batch(MIGRATIONS[0].1)?;

        let mut ordered: Vec<&(&str, &str)> = MIGRATIONS.iter().collect();
        ordered.sort_unstable_by_key(|(name, _)| *name);

        for (name, sql) in ordered {
            let already_applied: Option<String> = conn
                .query_row(
                    "SELECT name FROM migrations WHERE name = ?1",
                    params![name],
                    |row| row.get(0),
                )
                .optional()?;
            if already_applied.is_some() {
                continue;
            }
            conn.execute_batch(sql)?;
            conn.execute(
                "INSERT INTO migrations (name, applied_at) VALUES (?1, ?2)",
                params![name, Utc::now().to_rfc3339()],
            )?;
        }
        Ok(())
    }

    /// Append one record, truncating `params`/`response` at the storage
    /// boundary only. Returns the assigned id.
    pub fn append(&self, record: AuditRecord) -> Result<i64> {
        let params_text = truncate_field(&record.params);
        let response_text = truncate_field(&record.response);
        let created_at = Utc::now().to_rfc3339();

        let conn = self.conn.lock().expect("audit connection mutex poisoned");
        conn.execute(
            "INSERT INTO audit_logs
                (mode, method, tool_name, params, response, error,
                 request_size, response_size, duration_ms, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                record.mode.as_str(),
                record.method,
                record.tool_name,
                params_text,
                response_text,
                record.error,
                record.request_size as i64,
                record.response_size as i64,
                record.duration_ms as i64,
                created_at,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// List records matching `filter`, newest first, bounded by `limit`/`offset`.
    pub fn list(&self, filter: &AuditFilter, limit: i64, offset: i64) -> Result<Vec<StoredAuditRecord>> {
        let conn = self.conn.lock().expect("audit connection mutex poisoned");
        let (clause, bind) = filter.to_sql();

        let sql = format!(
            "SELECT id, mode, method, tool_name, params, response, error,
                    request_size, response_size, duration_ms, created_at
             FROM audit_logs
             {clause}
             ORDER BY id DESC
             LIMIT ?{n1} OFFSET ?{n2}",
            n1 = bind.len() + 1,
            n2 = bind.len() + 2,
        );

        let mut stmt = conn.prepare(&sql)?;
        let mut all_params: Vec<&dyn rusqlite::ToSql> =
            bind.iter().map(|v| v as &dyn rusqlite::ToSql).collect();
        all_params.push(&limit);
        all_params.push(&offset);

        let rows = stmt.query_map(all_params.as_slice(), row_to_record)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Count records matching `filter`.
    pub fn count(&self, filter: &AuditFilter) -> Result<i64> {
        let conn = self.conn.lock().expect("audit connection mutex poisoned");
        let (clause, bind) = filter.to_sql();
        let sql = format!("SELECT COUNT(*) FROM audit_logs {clause}");
        let mut stmt = conn.prepare(&sql)?;
        let all_params: Vec<&dyn rusqlite::ToSql> =
            bind.iter().map(|v| v as &dyn rusqlite::ToSql).collect();
        let count: i64 = stmt.query_row(all_params.as_slice(), |row| row.get(0))?;
        Ok(count)
    }
}

impl AuditFilter {
    fn to_sql(&self) -> (String, Vec<String>) {
        let mut conditions = Vec::new();
        let mut bind = Vec::new();

        if let Some(mode) = self.mode {
            conditions.push(format!("mode = ?{}", bind.len() + 1));
            bind.push(mode.as_str().to_string());
        }
        if let Some(tool_name) = &self.tool_name {
            conditions.push(format!("tool_name = ?{}", bind.len() + 1));
            bind.push(tool_name.clone());
        }
        if let Some(method) = &self.method {
            conditions.push(format!("method = ?{}", bind.len() + 1));
            bind.push(method.clone());
        }

        if conditions.is_empty() {
            (String::new(), bind)
        } else {
            (format!("WHERE {}", conditions.join(" AND ")), bind)
        }
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredAuditRecord> {
    let mode_text: String = row.get(1)?;
    let created_at_text: String = row.get(10)?;
    let created_at = DateTime::parse_from_rfc3339(&created_at_text)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc.timestamp_opt(0, 0).single().unwrap_or_default());

    Ok(StoredAuditRecord {
        id: row.get(0)?,
        mode: Mode::parse(&mode_text),
        method: row.get(2)?,
        tool_name: row.get(3)?,
        params: row.get(4)?,
        response: row.get(5)?,
        error: row.get(6)?,
        request_size: row.get::<_, i64>(7)? as usize,
        response_size: row.get::<_, i64>(8)? as usize,
        duration_ms: row.get::<_, i64>(9)? as u64,
        created_at,
    })
}

fn truncate_field(s: &str) -> String {
    if s.len() <= TRUNCATE_BUDGET {
        return s.to_string();
    }
    let mut cut = TRUNCATE_BUDGET;
    while cut > 0 && !s.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}{TRUNCATION_SUFFIX}", &s[..cut])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(mode: Mode) -> AuditRecord {
        AuditRecord {
            mode,
            method: "tools/call".to_string(),
            tool_name: Some("echo".to_string()),
            params: "{\"name\":\"echo\"}".to_string(),
            response: "{\"ok\":true}".to_string(),
            error: None,
            request_size: 16,
            response_size: 11,
            duration_ms: 5,
        }
    }

    #[test]
    fn migrations_run_idempotently_on_reopen() {
        let store = AuditStore::open_in_memory().unwrap();
        store.run_migrations().unwrap();
        store.run_migrations().unwrap();
    }

    #[test]
    fn append_assigns_increasing_ids() {
        let store = AuditStore::open_in_memory().unwrap();
        let id1 = store.append(sample(Mode::Stdio)).unwrap();
        let id2 = store.append(sample(Mode::Http)).unwrap();
        assert!(id2 > id1);
    }

    #[test]
    fn list_filters_by_mode() {
        let store = AuditStore::open_in_memory().unwrap();
        store.append(sample(Mode::Stdio)).unwrap();
        store.append(sample(Mode::Http)).unwrap();

        let filter = AuditFilter {
            mode: Some(Mode::Http),
            ..Default::default()
        };
        let rows = store.list(&filter, 10, 0).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].mode, Mode::Http);
    }

    #[test]
    fn count_matches_list_len_without_limit() {
        let store = AuditStore::open_in_memory().unwrap();
        for _ in 0..5 {
            store.append(sample(Mode::Stdio)).unwrap();
        }
        assert_eq!(store.count(&AuditFilter::default()).unwrap(), 5);
        assert_eq!(store.list(&AuditFilter::default(), 100, 0).unwrap().len(), 5);
    }

    #[test]
    fn long_fields_are_truncated_with_suffix() {
        let store = AuditStore::open_in_memory().unwrap();
        let mut record = sample(Mode::Stdio);
        record.params = "x".repeat(TRUNCATE_BUDGET + 100);
        let id = store.append(record).unwrap();
        let rows = store.list(&AuditFilter::default(), 10, 0).unwrap();
        let row = rows.iter().find(|r| r.id == id).unwrap();
        assert!(row.params.len() < TRUNCATE_BUDGET + 100);
        assert!(row.params.ends_with(TRUNCATION_SUFFIX));
    }

    #[test]
    fn short_fields_are_not_truncated() {
        let store = AuditStore::open_in_memory().unwrap();
        let id = store.append(sample(Mode::Stdio)).unwrap();
        let rows = store.list(&AuditFilter::default(), 10, 0).unwrap();
        let row = rows.iter().find(|r| r.id == id).unwrap();
        assert!(!row.params.ends_with(TRUNCATION_SUFFIX));
    }
}
