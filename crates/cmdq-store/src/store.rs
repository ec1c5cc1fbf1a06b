use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::{Mutex, MutexGuard};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, info};

use crate::storage::{RunStorage, StepFailure};
use crate::types::{CommandRun, NewCommandRun, RunFilter, Step, StepShell};
use crate::{Result, StoreError};

/// Current schema version, tracked in `PRAGMA user_version`.
const SCHEMA_VERSION: i32 = 1;

/// How long a statement waits for another process's write lock.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const RUN_COLUMNS: &str = "id, name, directory_path, completed, error, failed_step, error_message, \
     add_date, completed_at, processing, processing_started_at";

const STEP_COLUMNS: &str = "step_order, label, command, shell, run_as_system, timeout_ms, \
     completed, completed_at, error, log";

/// Lease predicate shared by candidate discovery and acquisition:
/// unleased, released, or started before `stale_before`.
const LEASE_AVAILABLE: &str =
    "(processing IS NULL OR processing = 0 OR processing_started_at < ?)";

/// SQLite-backed run store.
///
/// Several worker processes may open the same database file; the lease and
/// step writes are single conditional `UPDATE` statements, which SQLite
/// applies atomically. Thread-safe via internal `Mutex<Connection>`.
pub struct SqliteRunStore {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for SqliteRunStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteRunStore").finish_non_exhaustive()
    }
}

impl SqliteRunStore {
    /// Open (or create) the database at `path` and bring the schema up to date.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        let store = Self::from_connection(conn)?;
        info!(path = %path.display(), "Run store opened");
        Ok(store)
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        create_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock()
    }

    fn load_runs(
        &self,
        where_clause: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<CommandRun>> {
        let conn = self.conn();
        let sql = format!(
            "SELECT {RUN_COLUMNS} FROM command_runs WHERE {where_clause} ORDER BY add_date ASC, rowid ASC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut runs = stmt
            .query_map(params, row_to_run)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        drop(stmt);

        for run in &mut runs {
            run.steps = load_steps(&conn, &run.id)?;
        }
        Ok(runs)
    }
}

// ── Schema ──────────────────────────────────────────────────────────

fn create_schema(conn: &Connection) -> Result<()> {
    let current_version: i32 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .unwrap_or(0);

    if current_version >= SCHEMA_VERSION {
        debug!(version = current_version, "Schema up to date");
        return Ok(());
    }

    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS command_runs (
            id TEXT PRIMARY KEY,
            name TEXT,
            directory_path TEXT NOT NULL,
            completed INTEGER NOT NULL DEFAULT 0,
            error INTEGER NOT NULL DEFAULT 0,
            failed_step TEXT,
            error_message TEXT,
            add_date TEXT NOT NULL,
            completed_at TEXT,
            processing INTEGER,
            processing_started_at TEXT
        );

        -- Candidate discovery: open runs in FIFO order
        CREATE INDEX IF NOT EXISTS idx_command_runs_open
            ON command_runs(completed, add_date);

        CREATE TABLE IF NOT EXISTS command_run_steps (
            run_id TEXT NOT NULL REFERENCES command_runs(id) ON DELETE CASCADE,
            step_order INTEGER NOT NULL,
            label TEXT NOT NULL,
            command TEXT NOT NULL,
            shell TEXT NOT NULL DEFAULT 'default',
            run_as_system INTEGER NOT NULL DEFAULT 1,
            timeout_ms INTEGER,
            completed INTEGER NOT NULL DEFAULT 0,
            completed_at TEXT,
            error INTEGER NOT NULL DEFAULT 0,
            log TEXT,
            PRIMARY KEY (run_id, step_order)
        );
        "#,
    )?;

    conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    info!(version = SCHEMA_VERSION, "Schema created");
    Ok(())
}

// ── RunStorage ──────────────────────────────────────────────────────

impl RunStorage for SqliteRunStore {
    fn insert_run(&self, new_run: NewCommandRun) -> Result<CommandRun> {
        let run = new_run.into_run(Utc::now())?;

        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO command_runs (id, name, directory_path, completed, error, add_date)
             VALUES (?1, ?2, ?3, 0, 0, ?4)",
            params![
                run.id,
                run.name,
                run.directory_path.to_string_lossy().into_owned(),
                format_timestamp(run.add_date)
            ],
        )?;
        for step in &run.steps {
            tx.execute(
                "INSERT INTO command_run_steps
                     (run_id, step_order, label, command, shell, run_as_system, timeout_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    run.id,
                    step.order,
                    step.label,
                    step.command,
                    step.shell.as_str(),
                    step.run_as_system,
                    step.timeout_ms.map(|ms| i64::try_from(ms).unwrap_or(i64::MAX)),
                ],
            )?;
        }
        tx.commit()?;

        debug!(run_id = %run.id, steps = run.steps.len(), "Command run inserted");
        Ok(run)
    }

    fn get_run(&self, id: &str) -> Result<CommandRun> {
        let conn = self.conn();
        let run = conn
            .query_row(
                &format!("SELECT {RUN_COLUMNS} FROM command_runs WHERE id = ?1"),
                params![id],
                row_to_run,
            )
            .optional()?;

        match run {
            Some(mut run) => {
                run.steps = load_steps(&conn, id)?;
                Ok(run)
            }
            None => Err(StoreError::NotFound(id.to_string())),
        }
    }

    fn list_runs(&self, filter: RunFilter) -> Result<Vec<CommandRun>> {
        let where_clause = match filter {
            RunFilter::All => "1 = 1",
            RunFilter::Pending => "completed = 0",
            RunFilter::Failed => "completed = 1 AND error = 1",
            RunFilter::Completed => "completed = 1 AND error = 0",
        };
        self.load_runs(where_clause, &[])
    }

    fn find_pending(&self, stale_before: DateTime<Utc>) -> Result<Vec<CommandRun>> {
        let stale = format_timestamp(stale_before);
        self.load_runs(&format!("completed = 0 AND {LEASE_AVAILABLE}"), &[&stale])
    }

    fn try_acquire_lease(
        &self,
        id: &str,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<bool> {
        let sql = format!(
            "UPDATE command_runs SET processing = 1, processing_started_at = ?
             WHERE id = ? AND completed = 0 AND {LEASE_AVAILABLE}"
        );
        let changed = self.conn().execute(
            &sql,
            params![format_timestamp(now), id, format_timestamp(stale_before)],
        )?;
        Ok(changed > 0)
    }

    fn record_step_success(
        &self,
        id: &str,
        order: i64,
        log: &str,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let changed = self.conn().execute(
            "UPDATE command_run_steps
             SET completed = 1, completed_at = ?1, error = 0, log = ?2
             WHERE run_id = ?3 AND step_order = ?4 AND completed = 0",
            params![format_timestamp(at), log, id, order],
        )?;
        Ok(changed > 0)
    }

    fn fail_run_at_step(
        &self,
        id: &str,
        failure: StepFailure<'_>,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let at = format_timestamp(at);
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute(
            "UPDATE command_run_steps
             SET completed = 1, completed_at = ?1, error = 1, log = ?2
             WHERE run_id = ?3 AND step_order = ?4 AND completed = 0",
            params![at, failure.log, id, failure.order],
        )?;
        let changed = tx.execute(
            "UPDATE command_runs
             SET completed = 1, error = 1, failed_step = ?1, error_message = ?2,
                 completed_at = ?3, processing = 0
             WHERE id = ?4",
            params![failure.label, failure.error_message, at, id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        tx.commit()?;
        Ok(())
    }

    fn complete_run(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        let changed = self.conn().execute(
            "UPDATE command_runs
             SET completed = 1, error = 0, failed_step = NULL, error_message = NULL,
                 completed_at = ?1, processing = 0
             WHERE id = ?2",
            params![format_timestamp(at), id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    fn abort_run(&self, id: &str, message: &str, at: DateTime<Utc>) -> Result<()> {
        let changed = self.conn().execute(
            "UPDATE command_runs
             SET completed = 1, error = 1, error_message = ?1, completed_at = ?2, processing = 0
             WHERE id = ?3",
            params![message, format_timestamp(at), id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }
}

// ── Row mapping ─────────────────────────────────────────────────────

/// Fixed-width UTC form, so SQL text comparison orders chronologically.
pub fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(idx: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_optional_timestamp(
    row: &rusqlite::Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    row.get::<_, Option<String>>(idx)?
        .map(|s| parse_timestamp(idx, &s))
        .transpose()
}

fn row_to_run(row: &rusqlite::Row<'_>) -> rusqlite::Result<CommandRun> {
    Ok(CommandRun {
        id: row.get(0)?,
        name: row.get(1)?,
        directory_path: row.get::<_, String>(2)?.into(),
        steps: Vec::new(),
        completed: row.get(3)?,
        error: row.get(4)?,
        failed_step: row.get(5)?,
        error_message: row.get(6)?,
        add_date: parse_timestamp(7, &row.get::<_, String>(7)?)?,
        completed_at: parse_optional_timestamp(row, 8)?,
        processing: row.get::<_, Option<bool>>(9)?.unwrap_or(false),
        processing_started_at: parse_optional_timestamp(row, 10)?,
    })
}

fn row_to_step(row: &rusqlite::Row<'_>) -> rusqlite::Result<Step> {
    let shell: String = row.get(3)?;
    let shell = shell
        .parse::<StepShell>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e)))?;

    Ok(Step {
        order: row.get(0)?,
        label: row.get(1)?,
        command: row.get(2)?,
        shell,
        run_as_system: row.get(4)?,
        timeout_ms: row
            .get::<_, Option<i64>>(5)?
            .map(|ms| u64::try_from(ms).unwrap_or(0)),
        completed: row.get(6)?,
        completed_at: parse_optional_timestamp(row, 7)?,
        error: row.get(8)?,
        log: row.get(9)?,
    })
}

fn load_steps(conn: &Connection, run_id: &str) -> Result<Vec<Step>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {STEP_COLUMNS} FROM command_run_steps WHERE run_id = ?1 ORDER BY step_order"
    ))?;
    let steps = stmt
        .query_map(params![run_id], row_to_step)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(steps)
}
