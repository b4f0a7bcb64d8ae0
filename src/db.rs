use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;

use crate::reference::{ReferenceEntry, ReferenceId, ReferenceSet, ReferenceStore};
use crate::sync::{BatchSummary, UpdateIntent};

/// Audit entry written next to every applied update
///
/// Keeps the full intent, so the history shows what the sync believed
/// (resolved ids, founder count) and not just the resulting columns.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct UpdateEvent {
    pub event_id: uuid::Uuid,
    pub recorded_at: DateTime<Utc>,
    pub intent: UpdateIntent,
}

impl UpdateEvent {
    pub fn for_intent(intent: &UpdateIntent) -> Self {
        UpdateEvent {
            event_id: uuid::Uuid::new_v4(),
            recorded_at: Utc::now(),
            intent: intent.clone(),
        }
    }
}

/// Record of one committed import
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ImportRun {
    pub run_id: String,
    pub source_file: String,
    pub source_sha256: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub summary: BatchSummary,
}

/// Outcome of applying a batch of intents
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyOutcome {
    /// Intents that updated at least one incubatee
    pub applied: usize,
    /// Business keys with no matching incubatee
    pub unmatched: Vec<String>,
}

/// Accepts update intents and applies them as one commit
pub trait TargetStore {
    /// All intents are applied, or none are
    fn apply_updates(&mut self, intents: &[UpdateIntent]) -> Result<ApplyOutcome>;

    /// Optional bookkeeping after a successful commit
    fn record_run(&mut self, _run: &ImportRun) -> Result<()> {
        Ok(())
    }
}

// ============================================================================
// SQLITE STORE
// ============================================================================

/// Reference tables + incubatees on one SQLite connection
///
/// The connection is opened once per batch and closed when the store is
/// dropped, including on early returns through `?`.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open database: {}", db_path.display()))?;
        Ok(SqliteStore { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(SqliteStore {
            conn: Connection::open_in_memory()?,
        })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn setup(&self) -> Result<()> {
        setup_database(&self.conn)
    }
}

/// Fixed query per reference set, in insertion (rowid) order
fn reference_query(set: ReferenceSet) -> &'static str {
    match set {
        ReferenceSet::FieldOfWork => {
            "SELECT fieldofworkrecid, fieldofworkname FROM fieldofwork ORDER BY rowid"
        }
        ReferenceSet::StartupStage => {
            "SELECT startupstagesrecid, startupstagesname FROM startupstages ORDER BY rowid"
        }
    }
}

impl ReferenceStore for SqliteStore {
    fn fetch_reference_set(&self, set: ReferenceSet) -> Result<Vec<ReferenceEntry>> {
        let mut stmt = self
            .conn
            .prepare(reference_query(set))
            .with_context(|| format!("Failed to query reference set {}", set))?;

        let entries = stmt
            .query_map([], |row| {
                let label: Option<String> = row.get(1)?;
                Ok(ReferenceEntry {
                    id: ReferenceId(row.get(0)?),
                    label: label.unwrap_or_default(),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(entries)
    }
}

impl TargetStore for SqliteStore {
    fn apply_updates(&mut self, intents: &[UpdateIntent]) -> Result<ApplyOutcome> {
        // Absent values never overwrite stored ones. Dropping the transaction
        // without commit rolls everything back.
        let tx = self.conn.transaction().context("Failed to begin transaction")?;
        let mut outcome = ApplyOutcome::default();

        {
            let mut update = tx.prepare(
                "UPDATE incubatees
                 SET incubateesfoundername = COALESCE(?1, incubateesfoundername),
                     incubateesfoundercount = CASE WHEN ?1 IS NULL
                         THEN incubateesfoundercount ELSE ?4 END,
                     incubateesfieldofworkid = COALESCE(?2, incubateesfieldofworkid),
                     incubateesstartupstageid = COALESCE(?3, incubateesstartupstageid)
                 WHERE incubateesemail = ?5",
            )?;

            for intent in intents {
                let changed = update.execute(params![
                    intent.founder_name,
                    intent.field_of_work_id.map(|id| id.0),
                    intent.startup_stage_id.map(|id| id.0),
                    intent.founder_count as i64,
                    intent.target_key,
                ])?;

                if changed == 0 {
                    outcome.unmatched.push(intent.target_key.clone());
                    continue;
                }

                outcome.applied += 1;
                insert_update_event(&tx, &UpdateEvent::for_intent(intent))?;
            }
        }

        tx.commit().context("Failed to commit updates")?;
        Ok(outcome)
    }

    fn record_run(&mut self, run: &ImportRun) -> Result<()> {
        insert_import_run(&self.conn, run)
    }
}

// ============================================================================
// SCHEMA
// ============================================================================

pub fn setup_database(conn: &Connection) -> Result<()> {
    // In-memory databases answer "memory" and stay that way
    let _mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS fieldofwork (
            fieldofworkrecid INTEGER NOT NULL UNIQUE,
            fieldofworkname TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS startupstages (
            startupstagesrecid INTEGER NOT NULL UNIQUE,
            startupstagesname TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS incubatees (
            incubateesrecid INTEGER PRIMARY KEY AUTOINCREMENT,
            incubateesemail TEXT UNIQUE NOT NULL,
            incubateesname TEXT,
            incubateesfoundername TEXT,
            incubateesfoundercount INTEGER DEFAULT 0,
            incubateesfieldofworkid INTEGER REFERENCES fieldofwork(fieldofworkrecid),
            incubateesstartupstageid INTEGER REFERENCES startupstages(startupstagesrecid)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS update_events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            recorded_at TEXT NOT NULL,
            business_key TEXT NOT NULL,
            intent TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS import_runs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id TEXT UNIQUE NOT NULL,
            source_file TEXT NOT NULL,
            source_sha256 TEXT,
            started_at TEXT NOT NULL,
            finished_at TEXT NOT NULL,
            summary TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_update_events_key ON update_events(business_key)",
        [],
    )?;

    Ok(())
}

// ============================================================================
// AUDIT TRAIL
// ============================================================================

pub fn insert_update_event(conn: &Connection, event: &UpdateEvent) -> Result<()> {
    conn.execute(
        "INSERT INTO update_events (event_id, recorded_at, business_key, intent)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            event.event_id.to_string(),
            event.recorded_at.to_rfc3339(),
            event.intent.target_key,
            serde_json::to_string(&event.intent)?,
        ],
    )?;

    Ok(())
}

/// Update history for one business key, newest first
pub fn incubatee_history(conn: &Connection, business_key: &str) -> Result<Vec<UpdateEvent>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, recorded_at, intent
         FROM update_events
         WHERE business_key = ?1
         ORDER BY id DESC",
    )?;

    let raw = stmt
        .query_map([business_key], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    raw.into_iter()
        .map(|(event_id, recorded_at, intent)| -> Result<UpdateEvent> {
            Ok(UpdateEvent {
                event_id: uuid::Uuid::parse_str(&event_id)
                    .with_context(|| format!("Corrupt event id '{}'", event_id))?,
                recorded_at: DateTime::parse_from_rfc3339(&recorded_at)?.with_timezone(&Utc),
                intent: serde_json::from_str(&intent).context("Corrupt update event payload")?,
            })
        })
        .collect()
}

pub fn insert_import_run(conn: &Connection, run: &ImportRun) -> Result<()> {
    conn.execute(
        "INSERT INTO import_runs (
            run_id, source_file, source_sha256, started_at, finished_at, summary
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            run.run_id,
            run.source_file,
            run.source_sha256,
            run.started_at.to_rfc3339(),
            run.finished_at.to_rfc3339(),
            serde_json::to_string(&run.summary)?,
        ],
    )?;

    Ok(())
}

/// Most recent committed import, if any
pub fn last_import_run(conn: &Connection) -> Result<Option<ImportRun>> {
    let row = conn
        .query_row(
            "SELECT run_id, source_file, source_sha256, started_at, finished_at, summary
             FROM import_runs
             ORDER BY id DESC
             LIMIT 1",
            [],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                ))
            },
        )
        .optional()?;

    let Some((run_id, source_file, source_sha256, started, finished, summary)) = row else {
        return Ok(None);
    };

    Ok(Some(ImportRun {
        run_id,
        source_file,
        source_sha256,
        started_at: DateTime::parse_from_rfc3339(&started)?.with_timezone(&Utc),
        finished_at: DateTime::parse_from_rfc3339(&finished)?.with_timezone(&Utc),
        summary: serde_json::from_str(&summary).context("Corrupt import run summary")?,
    }))
}

/// SHA-256 of a file's bytes, hex encoded
pub fn file_sha256(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read {} for hashing", path.display()))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

// ============================================================================
// SEEDING (`init-db --seed`) AND LOOKUPS
// ============================================================================

pub fn insert_reference_entry(conn: &Connection, set: ReferenceSet, entry: &ReferenceEntry) -> Result<()> {
    let sql = match set {
        ReferenceSet::FieldOfWork => {
            "INSERT INTO fieldofwork (fieldofworkrecid, fieldofworkname) VALUES (?1, ?2)"
        }
        ReferenceSet::StartupStage => {
            "INSERT INTO startupstages (startupstagesrecid, startupstagesname) VALUES (?1, ?2)"
        }
    };
    conn.execute(sql, params![entry.id.0, entry.label])?;
    Ok(())
}

pub fn insert_incubatee(conn: &Connection, email: &str, name: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO incubatees (incubateesemail, incubateesname) VALUES (?1, ?2)",
        params![email, name],
    )?;
    Ok(())
}

/// Stored incubatee columns touched by the sync
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncubateeRecord {
    pub email: String,
    pub founder_name: Option<String>,
    pub founder_count: i64,
    pub field_of_work_id: Option<i64>,
    pub startup_stage_id: Option<i64>,
}

pub fn get_incubatee(conn: &Connection, email: &str) -> Result<Option<IncubateeRecord>> {
    let record = conn
        .query_row(
            "SELECT incubateesemail, incubateesfoundername, incubateesfoundercount,
                    incubateesfieldofworkid, incubateesstartupstageid
             FROM incubatees
             WHERE incubateesemail = ?1",
            [email],
            |row| {
                Ok(IncubateeRecord {
                    email: row.get(0)?,
                    founder_name: row.get(1)?,
                    founder_count: row.get::<_, Option<i64>>(2)?.unwrap_or(0),
                    field_of_work_id: row.get(3)?,
                    startup_stage_id: row.get(4)?,
                })
            },
        )
        .optional()?;

    Ok(record)
}
