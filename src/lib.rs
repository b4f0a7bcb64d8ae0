// Incubatee Sync - Core Library
// Reconciles the startup spreadsheet against the incubation database

pub mod config;
pub mod dates;
pub mod db;
pub mod error;
pub mod founders;
pub mod normalize;
pub mod reference;
pub mod source;
pub mod sync;

// Re-export commonly used types
pub use config::{CliOverrides, ColumnMapping, FileConfig, SeedFile, SyncConfig};
pub use dates::{parse_timestamp, to_sql_datetime, DateParseError};
pub use db::{
    setup_database, incubatee_history, last_import_run,
    ApplyOutcome, ImportRun, SqliteStore, TargetStore, UpdateEvent,
};
pub use error::SyncError;
pub use founders::{parse_founders, FounderParse};
pub use normalize::normalize;
pub use reference::{
    resolve, ReferenceEntry, ReferenceId, ReferenceSet, ReferenceSnapshot, ReferenceStore,
};
pub use source::{open_source, CsvSource, InputRow, RowSource, WorkbookSource};
pub use sync::{run_batch, BatchReport, BatchSummary, SyncEngine, UpdateIntent};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
