// 🔄 Sync Engine - spreadsheet rows → update intents → one commit
//
// Per row: resolve field of work, resolve startup stage, parse founders.
// Rows are independent; a row without a business key is skipped with a
// warning. Reference data is loaded once per batch and the whole batch is
// committed once at the end (nothing is written if any store call fails).

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::config::ColumnMapping;
use crate::db::{file_sha256, ImportRun, TargetStore};
use crate::error::{Result, SyncError};
use crate::founders::parse_founders;
use crate::reference::{ReferenceId, ReferenceSet, ReferenceSnapshot, ReferenceStore};
use crate::source::{InputRow, RowSource};

// ============================================================================
// UPDATE INTENT
// ============================================================================

/// Structured description of one keyed update
///
/// The persistence adapter turns this into a parameterized statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateIntent {
    /// Business key (company email) that selects the record
    pub target_key: String,
    pub founder_name: Option<String>,
    pub founder_count: usize,
    pub field_of_work_id: Option<ReferenceId>,
    pub startup_stage_id: Option<ReferenceId>,
}

// ============================================================================
// BATCH SUMMARY / REPORT
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total_rows: usize,
    /// Rows that produced an update intent
    pub processed: usize,
    /// Rows without a business key
    pub skipped: usize,
    /// Intents whose business key matched no stored record
    pub failed: usize,
    pub unresolved_field_of_work: usize,
    pub unresolved_startup_stage: usize,
    pub committed: bool,
}

impl BatchSummary {
    pub fn summary(&self) -> String {
        format!(
            "{} rows: {} processed, {} skipped, {} failed ({} field-of-work and {} startup-stage labels unresolved)",
            self.total_rows,
            self.processed,
            self.skipped,
            self.failed,
            self.unresolved_field_of_work,
            self.unresolved_startup_stage
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub summary: BatchSummary,
    pub intents: Vec<UpdateIntent>,
    /// Recovered row-level errors, in row order
    pub skipped_rows: Vec<String>,
    /// Business keys that matched nothing at commit time
    pub unmatched_keys: Vec<String>,
}

// ============================================================================
// SYNC ENGINE
// ============================================================================

pub struct SyncEngine {
    columns: ColumnMapping,
}

impl SyncEngine {
    pub fn new(columns: ColumnMapping) -> Self {
        SyncEngine { columns }
    }

    /// Turn one row into an update intent
    ///
    /// Fails only with `MalformedInput` when the business key is blank.
    /// Unresolved labels leave the corresponding id unset.
    pub fn build_intent(&self, row: &InputRow, snapshot: &ReferenceSnapshot) -> Result<UpdateIntent> {
        let target_key = row
            .get(&self.columns.business_key)
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .ok_or_else(|| SyncError::MalformedInput {
                row: row.line_number,
                column: self.columns.business_key.clone(),
            })?;

        let field_of_work_id =
            snapshot.resolve(ReferenceSet::FieldOfWork, row.get(&self.columns.field_of_work));
        let startup_stage_id =
            snapshot.resolve(ReferenceSet::StartupStage, row.get(&self.columns.startup_stage));
        let founders = parse_founders(row.get(&self.columns.founders));

        log::debug!(
            "Row {}: key={} field_of_work={:?} stage={:?} founders={}",
            row.line_number,
            target_key,
            field_of_work_id,
            startup_stage_id,
            founders.count
        );

        Ok(UpdateIntent {
            target_key: target_key.to_string(),
            founder_name: founders.primary_name,
            founder_count: founders.count,
            field_of_work_id,
            startup_stage_id,
        })
    }

    /// Build intents for every row without touching the store
    pub fn plan(&self, rows: &[InputRow], snapshot: &ReferenceSnapshot) -> BatchReport {
        let mut report = BatchReport::default();
        report.summary.total_rows = rows.len();

        for row in rows {
            match self.build_intent(row, snapshot) {
                Ok(intent) => {
                    if intent.field_of_work_id.is_none()
                        && row.get(&self.columns.field_of_work).is_some()
                    {
                        report.summary.unresolved_field_of_work += 1;
                    }
                    if intent.startup_stage_id.is_none()
                        && row.get(&self.columns.startup_stage).is_some()
                    {
                        report.summary.unresolved_startup_stage += 1;
                    }
                    report.intents.push(intent);
                }
                Err(e) => {
                    log::warn!("Skipping row: {}", e);
                    report.skipped_rows.push(e.to_string());
                }
            }
        }

        report.summary.processed = report.intents.len();
        report.summary.skipped = report.skipped_rows.len();
        report
    }

    /// Load reference data, plan every row, then commit once
    pub fn run<S>(&self, rows: &[InputRow], store: &mut S, dry_run: bool) -> Result<BatchReport>
    where
        S: ReferenceStore + TargetStore,
    {
        let snapshot = ReferenceSnapshot::load(&*store)
            .map_err(|(set, source)| SyncError::LookupFailure { set, source })?;
        log::info!(
            "Reference data loaded: {} fields of work, {} startup stages",
            snapshot.len(ReferenceSet::FieldOfWork),
            snapshot.len(ReferenceSet::StartupStage)
        );

        let mut report = self.plan(rows, &snapshot);

        if dry_run {
            log::info!("Dry run: {} intents not committed", report.intents.len());
            return Ok(report);
        }

        let outcome = store
            .apply_updates(&report.intents)
            .map_err(|source| SyncError::PersistenceFailure { source })?;

        for key in &outcome.unmatched {
            log::warn!("No incubatee with business key '{}'", key);
        }
        report.summary.failed = outcome.unmatched.len();
        report.summary.committed = true;
        report.unmatched_keys = outcome.unmatched;

        log::info!("Committed {} updates", outcome.applied);
        Ok(report)
    }
}

/// Read a source and run one batch against a store, recording provenance
pub fn run_batch<S>(
    engine: &SyncEngine,
    source: &dyn RowSource,
    store: &mut S,
    dry_run: bool,
) -> Result<BatchReport>
where
    S: ReferenceStore + TargetStore,
{
    let started_at = Utc::now();
    let path = source.path().to_path_buf();

    let rows = source.read_rows().map_err(|e| SyncError::Source {
        path: path.clone(),
        source: e,
    })?;
    log::info!("Read {} rows from {}", rows.len(), path.display());

    let report = engine.run(&rows, store, dry_run)?;

    if report.summary.committed {
        let source_sha256 = match file_sha256(&path) {
            Ok(hash) => Some(hash),
            Err(e) => {
                log::debug!("Source hash unavailable: {:#}", e);
                None
            }
        };

        let run = ImportRun {
            run_id: uuid::Uuid::new_v4().to_string(),
            source_file: path.display().to_string(),
            source_sha256,
            started_at,
            finished_at: Utc::now(),
            summary: report.summary.clone(),
        };

        // The updates are already committed; a missing run record is not fatal
        if let Err(e) = store.record_run(&run) {
            log::warn!("Failed to record import run: {:#}", e);
        }
    }

    Ok(report)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{
        get_incubatee, insert_incubatee, insert_reference_entry, last_import_run, ApplyOutcome,
        SqliteStore,
    };
    use crate::reference::ReferenceEntry;
    use std::path::{Path, PathBuf};

    fn columns() -> ColumnMapping {
        ColumnMapping::default()
    }

    fn row(line: usize, email: Option<&str>, field: Option<&str>, stage: Option<&str>, founders: Option<&str>) -> InputRow {
        let c = columns();
        InputRow::new(line)
            .with(&c.business_key, email)
            .with(&c.field_of_work, field)
            .with(&c.startup_stage, stage)
            .with(&c.founders, founders)
    }

    fn seeded_store() -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        store.setup().unwrap();

        let conn = store.connection();
        insert_reference_entry(conn, ReferenceSet::FieldOfWork, &ReferenceEntry::new(1, "FinTech")).unwrap();
        insert_reference_entry(conn, ReferenceSet::FieldOfWork, &ReferenceEntry::new(2, "HealthTech")).unwrap();
        insert_reference_entry(conn, ReferenceSet::StartupStage, &ReferenceEntry::new(10, "Ideation")).unwrap();
        insert_reference_entry(conn, ReferenceSet::StartupStage, &ReferenceEntry::new(11, "Early Traction")).unwrap();
        insert_incubatee(conn, "pay@finly.in", "Finly").unwrap();
        insert_incubatee(conn, "care@medix.in", "Medix").unwrap();
        insert_incubatee(conn, "hi@agro.in", "Agro").unwrap();

        store
    }

    #[test]
    fn test_build_intent() {
        let snapshot = ReferenceSnapshot::from_entries(
            &[ReferenceEntry::new(1, "FinTech"), ReferenceEntry::new(2, "HealthTech")],
            &[ReferenceEntry::new(10, "Ideation")],
        );
        let engine = SyncEngine::new(columns());

        let intent = engine
            .build_intent(
                &row(1, Some(" pay@finly.in "), Some(" fintech "), Some("IDEATION"), Some("Alice & Bob, Carol")),
                &snapshot,
            )
            .unwrap();

        assert_eq!(
            intent,
            UpdateIntent {
                target_key: "pay@finly.in".to_string(),
                founder_name: Some("Alice".to_string()),
                founder_count: 3,
                field_of_work_id: Some(ReferenceId(1)),
                startup_stage_id: Some(ReferenceId(10)),
            }
        );
    }

    #[test]
    fn test_missing_key_is_malformed_input() {
        let engine = SyncEngine::new(columns());
        let snapshot = ReferenceSnapshot::default();

        let err = engine
            .build_intent(&row(4, Some("  "), Some("FinTech"), None, None), &snapshot)
            .unwrap_err();

        match err {
            SyncError::MalformedInput { row, column } => {
                assert_eq!(row, 4);
                assert_eq!(column, "Company email-id (Y)");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_no_match_leaves_id_unset() {
        let engine = SyncEngine::new(columns());
        let snapshot = ReferenceSnapshot::from_entries(&[ReferenceEntry::new(1, "FinTech")], &[]);

        let report = engine.plan(
            &[
                row(1, Some("a@x.in"), Some("SpaceTech"), Some("Series Z"), Some("Solo")),
                row(2, Some("b@x.in"), None, None, None),
            ],
            &snapshot,
        );

        assert_eq!(report.summary.processed, 2);
        assert_eq!(report.summary.unresolved_field_of_work, 1);
        assert_eq!(report.summary.unresolved_startup_stage, 1);
        assert_eq!(report.intents[0].field_of_work_id, None);
        assert_eq!(report.intents[1].founder_name, None);
        assert_eq!(report.intents[1].founder_count, 0);
    }

    #[test]
    fn test_batch_skips_row_without_key_and_commits() {
        let mut store = seeded_store();
        let engine = SyncEngine::new(columns());

        let rows = vec![
            row(1, Some("pay@finly.in"), Some(" FINTECH\n"), Some("Ideation"), Some("Jane Doe and John Roe; Mary Lee\n")),
            row(2, None, Some("HealthTech"), None, Some("Nobody")),
            row(3, Some("care@medix.in"), Some("Health\u{00A0}Tech"), Some("early traction"), Some("Ravi")),
        ];

        let report = engine.run(&rows, &mut store, false).unwrap();

        assert_eq!(report.summary.total_rows, 3);
        assert_eq!(report.summary.processed, 2);
        assert_eq!(report.summary.skipped, 1);
        assert_eq!(report.summary.failed, 0);
        assert!(report.summary.committed);

        let finly = get_incubatee(store.connection(), "pay@finly.in").unwrap().unwrap();
        assert_eq!(finly.founder_name.as_deref(), Some("Jane Doe"));
        assert_eq!(finly.founder_count, 3);
        assert_eq!(finly.field_of_work_id, Some(1));
        assert_eq!(finly.startup_stage_id, Some(10));

        let medix = get_incubatee(store.connection(), "care@medix.in").unwrap().unwrap();
        assert_eq!(medix.field_of_work_id, Some(2));
        assert_eq!(medix.startup_stage_id, Some(11));

        println!("✅ Batch: {}", report.summary.summary());
    }

    #[test]
    fn test_unknown_key_counts_as_failed() {
        let mut store = seeded_store();
        let engine = SyncEngine::new(columns());

        let report = engine
            .run(
                &[
                    row(1, Some("ghost@nowhere.in"), None, None, Some("Casper")),
                    row(2, Some("hi@agro.in"), None, None, Some("Kiran, Lata")),
                ],
                &mut store,
                false,
            )
            .unwrap();

        assert_eq!(report.summary.processed, 2);
        assert_eq!(report.summary.failed, 1);
        assert_eq!(report.unmatched_keys, vec!["ghost@nowhere.in".to_string()]);

        let agro = get_incubatee(store.connection(), "hi@agro.in").unwrap().unwrap();
        assert_eq!(agro.founder_name.as_deref(), Some("Kiran"));
    }

    #[test]
    fn test_dry_run_does_not_write() {
        let mut store = seeded_store();
        let engine = SyncEngine::new(columns());

        let report = engine
            .run(&[row(1, Some("pay@finly.in"), None, None, Some("Alice"))], &mut store, true)
            .unwrap();

        assert!(!report.summary.committed);
        assert_eq!(report.intents.len(), 1);

        let finly = get_incubatee(store.connection(), "pay@finly.in").unwrap().unwrap();
        assert_eq!(finly.founder_name, None);
    }

    /// Store whose reference fetch or commit can be made to fail
    #[derive(Default)]
    struct FlakyStore {
        fail_lookup: bool,
        fail_commit: bool,
        applied: Vec<UpdateIntent>,
    }

    impl ReferenceStore for FlakyStore {
        fn fetch_reference_set(&self, set: ReferenceSet) -> anyhow::Result<Vec<ReferenceEntry>> {
            if self.fail_lookup && set == ReferenceSet::FieldOfWork {
                anyhow::bail!("connection reset");
            }
            Ok(Vec::new())
        }
    }

    impl TargetStore for FlakyStore {
        fn apply_updates(&mut self, intents: &[UpdateIntent]) -> anyhow::Result<ApplyOutcome> {
            if self.fail_commit {
                anyhow::bail!("deadlock detected");
            }
            self.applied.extend_from_slice(intents);
            Ok(ApplyOutcome {
                applied: intents.len(),
                unmatched: Vec::new(),
            })
        }
    }

    #[test]
    fn test_lookup_failure_aborts_batch() {
        let mut store = FlakyStore {
            fail_lookup: true,
            ..FlakyStore::default()
        };
        let engine = SyncEngine::new(columns());

        let err = engine
            .run(&[row(1, Some("a@x.in"), None, None, None)], &mut store, false)
            .unwrap_err();

        assert!(matches!(err, SyncError::LookupFailure { set: ReferenceSet::FieldOfWork, .. }));
        assert!(store.applied.is_empty());
    }

    #[test]
    fn test_persistence_failure_is_surfaced() {
        let mut store = FlakyStore {
            fail_commit: true,
            ..FlakyStore::default()
        };
        let engine = SyncEngine::new(columns());

        let err = engine
            .run(&[row(1, Some("a@x.in"), None, None, None)], &mut store, false)
            .unwrap_err();

        assert!(matches!(err, SyncError::PersistenceFailure { .. }));
        assert!(err.is_fatal());
    }

    struct FixedSource {
        path: PathBuf,
        rows: Vec<InputRow>,
    }

    impl RowSource for FixedSource {
        fn read_rows(&self) -> anyhow::Result<Vec<InputRow>> {
            Ok(self.rows.clone())
        }

        fn path(&self) -> &Path {
            &self.path
        }
    }

    #[test]
    fn test_run_batch_records_import_run() {
        let mut store = seeded_store();
        let engine = SyncEngine::new(columns());
        let source = FixedSource {
            path: PathBuf::from("/nonexistent/startups.xlsx"),
            rows: vec![row(1, Some("hi@agro.in"), None, None, Some("Kiran"))],
        };

        let report = run_batch(&engine, &source, &mut store, false).unwrap();
        assert_eq!(report.summary.processed, 1);

        let run = last_import_run(store.connection()).unwrap().unwrap();
        assert_eq!(run.source_file, "/nonexistent/startups.xlsx");
        assert_eq!(run.source_sha256, None);
        assert_eq!(run.summary, report.summary);
    }

    #[test]
    fn test_unreadable_source_is_source_error() {
        let mut store = seeded_store();
        let engine = SyncEngine::new(columns());
        let source = crate::source::CsvSource::new(Path::new("/nonexistent/startups.csv"));

        let err = run_batch(&engine, &source, &mut store, false).unwrap_err();
        assert!(matches!(err, SyncError::Source { .. }));
    }
}
