use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;

use skillforge_core::error::{Result, SkillforgeError};
use skillforge_core::record::{ExecutionRecord, ExecutionStatus, RecordPatch};
use skillforge_core::traits::ExecutionRecordStore;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS executions (
        id TEXT PRIMARY KEY,
        skill_id TEXT NOT NULL,
        status TEXT NOT NULL,
        input TEXT NOT NULL,
        output TEXT,
        error TEXT,
        error_code TEXT,
        triggered_by TEXT NOT NULL,
        trigger_source TEXT NOT NULL,
        listing_id TEXT,
        campaign_id TEXT,
        parent_execution_id TEXT,
        started_at TEXT NOT NULL,
        completed_at TEXT,
        execution_time_ms INTEGER,
        tokens_used INTEGER,
        cost_usd REAL,
        retry_count INTEGER
    );

    CREATE INDEX IF NOT EXISTS idx_executions_parent
        ON executions(parent_execution_id);

    CREATE INDEX IF NOT EXISTS idx_executions_started
        ON executions(started_at DESC);";

const COLUMNS: &str = "id, skill_id, status, input, output, error, error_code, triggered_by, \
     trigger_source, listing_id, campaign_id, parent_execution_id, started_at, completed_at, \
     execution_time_ms, tokens_used, cost_usd, retry_count";

/// SQLite-backed execution record store.
pub struct SqliteRecordStore {
    conn: Mutex<Connection>,
}

impl SqliteRecordStore {
    /// Open or create a SQLite database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        // Create parent directories
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                SkillforgeError::Database(format!("Failed to create db directory: {}", e))
            })?;
        }

        let conn = Connection::open(path).map_err(db_err)?;

        // Enable WAL mode for better concurrent performance
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;

        debug!(path = %path.display(), "Execution store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn get(&self, execution_id: &str) -> Result<Option<ExecutionRecord>> {
        let conn = self.lock()?;
        load(&conn, execution_id)
    }

    /// Records created by one composition run, oldest first.
    pub fn list_by_parent(&self, parent_execution_id: &str) -> Result<Vec<ExecutionRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM executions WHERE parent_execution_id = ?1 ORDER BY started_at ASC",
                COLUMNS
            ))
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![parent_execution_id], from_row)
            .map_err(db_err)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(db_err)
    }

    /// Most recent records, newest first.
    pub fn list_recent(&self, limit: usize) -> Result<Vec<ExecutionRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM executions ORDER BY started_at DESC LIMIT ?1",
                COLUMNS
            ))
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![limit as i64], from_row)
            .map_err(db_err)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(db_err)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| SkillforgeError::Database(e.to_string()))
    }
}

impl ExecutionRecordStore for SqliteRecordStore {
    fn save(&self, record: ExecutionRecord) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let conn = self.lock()?;
            upsert(&conn, &record)
        })
    }

    fn update(&self, execution_id: &str, patch: RecordPatch) -> BoxFuture<'_, Result<()>> {
        let execution_id = execution_id.to_string();
        Box::pin(async move {
            let conn = self.lock()?;
            let mut record = load(&conn, &execution_id)?.ok_or_else(|| {
                SkillforgeError::Database(format!("No execution record: {}", execution_id))
            })?;
            record.apply(&patch);
            upsert(&conn, &record)
        })
    }
}

fn db_err(e: rusqlite::Error) -> SkillforgeError {
    SkillforgeError::Database(e.to_string())
}

fn load(conn: &Connection, execution_id: &str) -> Result<Option<ExecutionRecord>> {
    conn.query_row(
        &format!("SELECT {} FROM executions WHERE id = ?1", COLUMNS),
        params![execution_id],
        from_row,
    )
    .optional()
    .map_err(db_err)
}

fn upsert(conn: &Connection, record: &ExecutionRecord) -> Result<()> {
    conn.execute(
        &format!(
            "INSERT OR REPLACE INTO executions ({}) VALUES \
             (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
            COLUMNS
        ),
        params![
            record.id,
            record.skill_id,
            record.status.as_str(),
            serde_json::to_string(&record.input)?,
            record.output.as_ref().map(serde_json::to_string).transpose()?,
            record.error,
            record.error_code,
            record.triggered_by,
            record.trigger_source.to_string(),
            record.listing_id,
            record.campaign_id,
            record.parent_execution_id,
            record.started_at.to_rfc3339(),
            record.completed_at.map(|t| t.to_rfc3339()),
            record.execution_time_ms.map(|v| v as i64),
            record.tokens_used.map(|v| v as i64),
            record.cost_usd,
            record.retry_count.map(|v| v as i64),
        ],
    )
    .map_err(db_err)?;
    Ok(())
}

fn from_row(row: &Row<'_>) -> rusqlite::Result<ExecutionRecord> {
    let status: String = row.get(2)?;
    let input: String = row.get(3)?;
    let output: Option<String> = row.get(4)?;
    let trigger_source: String = row.get(8)?;
    let started_at: String = row.get(12)?;
    let completed_at: Option<String> = row.get(13)?;

    Ok(ExecutionRecord {
        id: row.get(0)?,
        skill_id: row.get(1)?,
        status: ExecutionStatus::parse(&status).unwrap_or(ExecutionStatus::Failed),
        input: serde_json::from_str(&input).unwrap_or(serde_json::Value::Null),
        output: output.and_then(|o| serde_json::from_str(&o).ok()),
        error: row.get(5)?,
        error_code: row.get(6)?,
        triggered_by: row.get(7)?,
        trigger_source: trigger_source.parse().unwrap_or_default(),
        listing_id: row.get(9)?,
        campaign_id: row.get(10)?,
        parent_execution_id: row.get(11)?,
        started_at: parse_time(&started_at).unwrap_or_else(Utc::now),
        completed_at: completed_at.as_deref().and_then(parse_time),
        execution_time_ms: row.get::<_, Option<i64>>(14)?.map(|v| v as u64),
        tokens_used: row.get::<_, Option<i64>>(15)?.map(|v| v as u64),
        cost_usd: row.get(16)?,
        retry_count: row.get::<_, Option<i64>>(17)?.map(|v| v as u32),
    })
}

fn parse_time(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
