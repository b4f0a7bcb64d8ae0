use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use incubatee_sync::db::{get_incubatee, insert_incubatee, insert_reference_entry};
use incubatee_sync::{
    incubatee_history, last_import_run, open_source, run_batch, CliOverrides, FileConfig,
    ReferenceSet, SeedFile, SqliteStore, SyncConfig, SyncEngine,
};

#[derive(Parser)]
#[command(name = "incubatee-sync", version, about = "Sync the startup spreadsheet into the incubation database")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create reference and incubatee tables (optionally seeding them)
    InitDb {
        #[arg(long)]
        database: PathBuf,

        /// TOML file with field_of_work, startup_stage and incubatee entries
        #[arg(long)]
        seed: Option<PathBuf>,
    },

    /// Resolve every spreadsheet row and commit the updates
    Import {
        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long)]
        source: Option<PathBuf>,

        /// Worksheet name (default: first sheet)
        #[arg(long)]
        sheet: Option<String>,

        #[arg(long)]
        database: Option<PathBuf>,

        /// Print intents instead of committing them
        #[arg(long)]
        dry_run: bool,
    },

    /// Show the last import and, optionally, one incubatee's update history
    History {
        #[arg(long)]
        database: PathBuf,

        /// Company email to show updates for
        #[arg(long)]
        email: Option<String>,
    },
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Command::InitDb { database, seed } => run_init_db(database, seed),
        Command::Import {
            config,
            source,
            sheet,
            database,
            dry_run,
        } => {
            let file = match config {
                Some(path) => FileConfig::load(&path)?,
                None => FileConfig::default(),
            };
            let overrides = CliOverrides {
                source,
                sheet,
                database,
                dry_run,
            };
            let config = SyncConfig::resolve(file, |key| std::env::var(key).ok(), overrides)?;
            run_import(config)
        }
        Command::History { database, email } => run_history(database, email),
    }
}

fn run_history(database: PathBuf, email: Option<String>) -> Result<()> {
    let store = SqliteStore::open(&database)?;
    let conn = store.connection();

    match last_import_run(conn)? {
        Some(run) => {
            println!("📊 Last import: {} ({})", run.source_file, run.finished_at.to_rfc3339());
            println!("   {}", run.summary.summary());
            if let Some(hash) = &run.source_sha256 {
                println!("   sha256 {}", hash);
            }
        }
        None => println!("📊 No imports recorded yet"),
    }

    if let Some(email) = email {
        match get_incubatee(conn, &email)? {
            Some(record) => println!(
                "\n🏢 {}: founder {:?} ({} total), field of work {:?}, stage {:?}",
                record.email,
                record.founder_name,
                record.founder_count,
                record.field_of_work_id,
                record.startup_stage_id
            ),
            None => println!("\n❌ No incubatee for {}", email),
        }

        let history = incubatee_history(conn, &email)?;
        println!("\n🕒 {} updates for {}", history.len(), email);
        for event in &history {
            println!(
                "{}  {}",
                event.recorded_at.to_rfc3339(),
                serde_json::to_string(&event.intent)?
            );
        }
    }

    Ok(())
}

fn run_init_db(database: PathBuf, seed: Option<PathBuf>) -> Result<()> {
    println!("🔧 Setting up database...");
    let store = SqliteStore::open(&database)?;
    store.setup()?;
    println!("✓ Database initialized with WAL mode: {}", database.display());

    if let Some(seed_path) = seed {
        let seed = SeedFile::load(&seed_path)?;
        let conn = store.connection();

        for entry in &seed.field_of_work {
            insert_reference_entry(conn, ReferenceSet::FieldOfWork, entry)
                .with_context(|| format!("Failed to seed field of work '{}'", entry.label))?;
        }
        for entry in &seed.startup_stage {
            insert_reference_entry(conn, ReferenceSet::StartupStage, entry)
                .with_context(|| format!("Failed to seed startup stage '{}'", entry.label))?;
        }
        for incubatee in &seed.incubatee {
            insert_incubatee(conn, &incubatee.email, &incubatee.name)
                .with_context(|| format!("Failed to seed incubatee '{}'", incubatee.email))?;
        }

        println!(
            "✓ Seeded {} fields of work, {} startup stages, {} incubatees",
            seed.field_of_work.len(),
            seed.startup_stage.len(),
            seed.incubatee.len()
        );
    }

    Ok(())
}

fn run_import(config: SyncConfig) -> Result<()> {
    println!("🔄 Incubatee Sync - Spreadsheet → Database");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("📂 Source:   {}", config.source.display());
    println!("🗄️  Database: {}", config.database.display());

    // Store is released when it goes out of scope, on success or failure
    let mut store = SqliteStore::open(&config.database)?;
    let source = open_source(&config.source, config.sheet.as_deref());
    let engine = SyncEngine::new(config.columns.clone());

    let report = run_batch(&engine, source.as_ref(), &mut store, config.dry_run)?;

    if config.dry_run {
        println!("\n🔍 Dry run - {} update intents:", report.intents.len());
        for intent in &report.intents {
            println!("{}", serde_json::to_string(intent)?);
        }
    }

    for skipped in &report.skipped_rows {
        println!("⚠️  {}", skipped);
    }
    for key in &report.unmatched_keys {
        println!("❌ No incubatee for {}", key);
    }

    let summary = &report.summary;
    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("✓ Processed: {}", summary.processed);
    println!("✓ Skipped:   {}", summary.skipped);
    println!("✓ Failed:    {}", summary.failed);
    if summary.committed {
        println!("🎉 Import completed successfully!");
    } else {
        println!("✅ Nothing committed (dry run)");
    }

    Ok(())
}
