// ⚙️ Configuration - where to read, where to write, which columns to use
//
// Precedence (lowest → highest): defaults, TOML file, environment, CLI flags.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::SyncError;
use crate::reference::ReferenceEntry;

pub const ENV_DATABASE: &str = "INCUBATEE_SYNC_DB";
pub const ENV_SOURCE: &str = "INCUBATEE_SYNC_SOURCE";

/// Spreadsheet headers (after header cleanup) feeding each intent field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnMapping {
    pub business_key: String,
    pub field_of_work: String,
    pub startup_stage: String,
    pub founders: String,
}

impl Default for ColumnMapping {
    fn default() -> Self {
        ColumnMapping {
            business_key: "Company email-id (Y)".to_string(),
            field_of_work: "Field of Incubatee - Health tech/Fin tech ) (Y)".to_string(),
            startup_stage: "Startup Stage (Y)".to_string(),
            founders: "Contact person name (Y)".to_string(),
        }
    }
}

/// Settings as they appear in a TOML file; every key optional
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub source: Option<PathBuf>,
    pub sheet: Option<String>,
    pub database: Option<PathBuf>,
    pub dry_run: Option<bool>,
    pub columns: ColumnMapping,
}

impl FileConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).context("Invalid configuration file")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml_str(&text)
    }
}

/// Overrides collected from the command line
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub source: Option<PathBuf>,
    pub sheet: Option<String>,
    pub database: Option<PathBuf>,
    pub dry_run: bool,
}

/// Fully resolved settings for one batch
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    pub source: PathBuf,
    pub sheet: Option<String>,
    pub database: PathBuf,
    pub dry_run: bool,
    pub columns: ColumnMapping,
}

impl SyncConfig {
    /// Merge file, environment and CLI layers
    ///
    /// `env` is a lookup so tests don't depend on the process environment.
    pub fn resolve<F>(file: FileConfig, env: F, cli: CliOverrides) -> Result<Self, SyncError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let source = cli
            .source
            .or_else(|| env(ENV_SOURCE).map(PathBuf::from))
            .or(file.source)
            .ok_or_else(|| SyncError::Config(format!("no source file (use --source or {})", ENV_SOURCE)))?;

        let database = cli
            .database
            .or_else(|| env(ENV_DATABASE).map(PathBuf::from))
            .or(file.database)
            .ok_or_else(|| SyncError::Config(format!("no database (use --database or {})", ENV_DATABASE)))?;

        Ok(SyncConfig {
            source,
            sheet: cli.sheet.or(file.sheet),
            database,
            dry_run: cli.dry_run || file.dry_run.unwrap_or(false),
            columns: file.columns,
        })
    }
}

/// Reference rows and incubatees for `init-db --seed`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SeedFile {
    pub field_of_work: Vec<ReferenceEntry>,
    pub startup_stage: Vec<ReferenceEntry>,
    pub incubatee: Vec<SeedIncubatee>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedIncubatee {
    pub email: String,
    #[serde(default)]
    pub name: String,
}

impl SeedFile {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read seed file: {}", path.display()))?;
        toml::from_str(&text).context("Invalid seed file")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::ReferenceId;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_defaults_match_workbook_headers() {
        let columns = ColumnMapping::default();
        assert_eq!(columns.business_key, "Company email-id (Y)");
        assert_eq!(columns.founders, "Contact person name (Y)");
    }

    #[test]
    fn test_file_config_partial_columns() {
        let file = FileConfig::from_toml_str(
            r#"
            source = "startups.xlsx"
            database = "incubation.db"

            [columns]
            business_key = "Email"
            "#,
        )
        .unwrap();

        assert_eq!(file.columns.business_key, "Email");
        assert_eq!(file.columns.startup_stage, "Startup Stage (Y)");

        let config = SyncConfig::resolve(file, no_env, CliOverrides::default()).unwrap();
        assert_eq!(config.source, PathBuf::from("startups.xlsx"));
        assert!(!config.dry_run);
    }

    #[test]
    fn test_precedence_cli_over_env_over_file() {
        let file = FileConfig::from_toml_str(
            r#"
            source = "file.xlsx"
            database = "file.db"
            dry_run = true
            "#,
        )
        .unwrap();

        let env = |key: &str| match key {
            ENV_DATABASE => Some("env.db".to_string()),
            ENV_SOURCE => Some("env.xlsx".to_string()),
            _ => None,
        };
        let cli = CliOverrides {
            source: Some(PathBuf::from("cli.csv")),
            ..CliOverrides::default()
        };

        let config = SyncConfig::resolve(file, env, cli).unwrap();
        assert_eq!(config.source, PathBuf::from("cli.csv"));
        assert_eq!(config.database, PathBuf::from("env.db"));
        assert!(config.dry_run);
    }

    #[test]
    fn test_missing_database_is_config_error() {
        let cli = CliOverrides {
            source: Some(PathBuf::from("startups.xlsx")),
            ..CliOverrides::default()
        };

        let err = SyncConfig::resolve(FileConfig::default(), no_env, cli).unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
    }

    #[test]
    fn test_seed_file() {
        let seed: SeedFile = toml::from_str(
            r#"
            [[field_of_work]]
            id = 1
            label = "FinTech"

            [[startup_stage]]
            id = 3
            label = "Scale Up"

            [[incubatee]]
            email = "pay@finly.in"
            "#,
        )
        .unwrap();

        assert_eq!(seed.field_of_work[0].id, ReferenceId(1));
        assert_eq!(seed.startup_stage[0].label, "Scale Up");
        assert_eq!(seed.incubatee[0].name, "");
    }
}
