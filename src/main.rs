use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use serde::Serialize;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use refkeeper::errors::{RefKeeperError, Result};
use refkeeper::resolution::IdentifierPolicy;
use refkeeper::rpc::RpcServer;
use refkeeper::sweep::SweepOptions;
use refkeeper::types::*;
use refkeeper::RefKeeper;

/// Reference-integrity keeper for semi-structured records.
#[derive(Parser)]
#[command(
    name = "refkeeper",
    version,
    about = "Resolve, validate and repair references between records"
)]
struct Cli {
    /// Root directory holding the store (default: current directory)
    #[arg(short, long, global = true)]
    root: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new store
    Init,
    /// Show store statistics
    Status {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },
    /// Create a record from a JSON file
    Create {
        collection: String,
        /// JSON file holding one object
        file: PathBuf,
    },
    /// Print one record
    Get { collection: String, id: String },
    /// Create many records from a JSON array file
    Import {
        collection: String,
        /// JSON file holding an array of objects
        file: PathBuf,
    },
    /// Show how a record's references would resolve, without storing it
    Resolve {
        collection: String,
        file: PathBuf,
        /// Check that identifiers point at existing rows
        #[arg(long)]
        verify: bool,
    },
    /// Manage the reference table
    Lookups {
        #[command(subcommand)]
        command: LookupCommands,
    },
    /// Manage system settings
    Settings {
        #[command(subcommand)]
        command: SettingCommands,
    },
    /// Re-resolve stored records and repair broken references
    Sweep {
        /// Collections to sweep (default: all)
        #[arg(short, long = "collection")]
        collections: Vec<String>,
        /// Pages processed at the same time
        #[arg(long)]
        concurrency: Option<usize>,
        /// Records per page
        #[arg(long)]
        page_size: Option<usize>,
        /// Report what would change without writing
        #[arg(long)]
        dry_run: bool,
        /// Discard saved progress and start over
        #[arg(long)]
        restart: bool,
        /// Print the full report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Serve JSON-RPC over stdio
    Serve,
}

#[derive(Subcommand)]
enum LookupCommands {
    /// List lookup rows
    List {
        #[arg(short, long)]
        category: Option<String>,
        /// Only active rows
        #[arg(long)]
        active: bool,
    },
    /// Add one lookup row
    Add {
        category: String,
        label: String,
        #[arg(long)]
        parent: Option<String>,
        #[arg(long, default_value = "0")]
        order: i64,
    },
    /// Seed lookup rows from a JSON array file
    Seed { file: PathBuf },
}

#[derive(Subcommand)]
enum SettingCommands {
    /// List settings
    List {
        #[arg(short, long)]
        category: Option<String>,
    },
    /// Print one setting
    Get { key: String },
    /// Create or replace a setting; the value is parsed as JSON, else kept as a string
    Set {
        key: String,
        value: String,
        #[arg(short, long, default_value = "general")]
        category: String,
        #[arg(short, long)]
        description: Option<String>,
        #[arg(long)]
        public: bool,
    },
    /// Remove a setting
    Delete { key: String },
}

#[tokio::main]
async fn main() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("refkeeper=info")),
        )
        .with_writer(std::io::stderr)
        .try_init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let root = resolve_path(cli.root);

    match cli.command {
        Commands::Init => {
            RefKeeper::init(&root)?;
            println!("Initialized refkeeper store at {}", root.display());
        }
        Commands::Status { json } => {
            let rk = RefKeeper::open(&root)?;
            let stats = rk.get_stats()?;
            if json {
                print_json(&stats)?;
            } else {
                println!("refkeeper status");
                for (collection, count) in &stats.records_by_collection {
                    println!("  {:<10} {}", collection, count);
                }
                println!("  Lookups:  {}", stats.lookup_count);
                println!("  Settings: {}", stats.setting_count);
                println!("  DB Size:  {} bytes", stats.db_size_bytes);
                if !stats.lookups_by_category.is_empty() {
                    println!("\n  Lookups by category:");
                    for (category, count) in &stats.lookups_by_category {
                        println!("    {}: {}", category, count);
                    }
                }
            }
        }
        Commands::Create { collection, file } => {
            let rk = RefKeeper::open(&root)?;
            let collection = parse_collection(&collection)?;
            let payload = read_object(&file)?;
            let outcome = rk.create(collection, &payload)?;
            print_json(&outcome.to_json())?;
        }
        Commands::Get { collection, id } => {
            let rk = RefKeeper::open(&root)?;
            let record = rk.get(parse_collection(&collection)?, &id)?;
            print_json(&record.to_document())?;
        }
        Commands::Import { collection, file } => {
            let rk = RefKeeper::open(&root)?;
            let collection = parse_collection(&collection)?;
            let rows = match read_json(&file)? {
                Value::Array(rows) => rows,
                _ => return Err(invalid_file(&file, "expected a JSON array")),
            };
            let report = rk.bulk_import(collection, &rows);
            println!(
                "Imported {}/{} {} ({} failed)",
                report.succeeded, report.total, collection, report.failed
            );
            for error in &report.errors {
                println!("  row {}: [{}] {}", error.index, error.status, error.message);
            }
        }
        Commands::Resolve {
            collection,
            file,
            verify,
        } => {
            let rk = RefKeeper::open(&root)?;
            let collection = parse_collection(&collection)?;
            let payload = read_object(&file)?;
            let policy = verify.then_some(IdentifierPolicy::Verify);
            print_json(&rk.resolve(collection, &payload, policy)?)?;
        }
        Commands::Lookups { command } => {
            let rk = RefKeeper::open(&root)?;
            run_lookups(&rk, command)?;
        }
        Commands::Settings { command } => {
            let rk = RefKeeper::open(&root)?;
            run_settings(&rk, command)?;
        }
        Commands::Sweep {
            collections,
            concurrency,
            page_size,
            dry_run,
            restart,
            json,
        } => {
            let rk = RefKeeper::open(&root)?;
            let options = SweepOptions {
                collections: collections
                    .iter()
                    .map(|c| parse_collection(c))
                    .collect::<Result<Vec<_>>>()?,
                concurrency,
                page_size,
                dry_run,
                restart,
                ..SweepOptions::default()
            };
            let report = rk.sweeper().run(&options).await?;
            if json {
                print_json(&report)?;
            } else {
                let mode = if report.dry_run { " (dry run)" } else { "" };
                println!(
                    "Swept {} records in {}ms{}: {} changed, {} conflicts",
                    report.total_scanned(),
                    report.duration_ms,
                    mode,
                    report.total_changed(),
                    report.total_conflicts()
                );
                for c in &report.collections {
                    println!(
                        "  {:<10} scanned {}, changed {}, conflicts {}",
                        c.collection, c.scanned, c.changed, c.conflicts
                    );
                }
            }
        }
        Commands::Serve => {
            let rk = RefKeeper::open(&root)?;
            RpcServer::new(rk).run().await?;
        }
    }

    Ok(())
}

fn run_lookups(rk: &RefKeeper, command: LookupCommands) -> Result<()> {
    match command {
        LookupCommands::List { category, active } => {
            let rows = rk.list_lookups(category.as_deref(), active)?;
            if rows.is_empty() {
                println!("No lookups found");
            }
            for row in &rows {
                let state = if row.active { "" } else { " (inactive)" };
                println!("{} {}: {}{}", row.id, row.category, row.label, state);
            }
        }
        LookupCommands::Add {
            category,
            label,
            parent,
            order,
        } => {
            let row = rk.create_lookup(&NewLookup {
                parent_value: parent,
                order,
                ..NewLookup::new(&category, &label)
            })?;
            println!("{}", row.id);
        }
        LookupCommands::Seed { file } => {
            let rows: Vec<NewLookup> = serde_json::from_value(read_json(&file)?)?;
            let report = rk.seed_lookups(&rows);
            println!(
                "Seeded {}/{} lookups ({} failed)",
                report.succeeded, report.total, report.failed
            );
            for error in &report.errors {
                println!("  row {}: [{}] {}", error.index, error.status, error.message);
            }
        }
    }
    Ok(())
}

fn run_settings(rk: &RefKeeper, command: SettingCommands) -> Result<()> {
    match command {
        SettingCommands::List { category } => {
            for setting in rk.list_settings(category.as_deref(), false)? {
                println!("{} [{}] = {}", setting.key, setting.category, setting.value);
            }
        }
        SettingCommands::Get { key } => print_json(&rk.get_setting(&key)?)?,
        SettingCommands::Set {
            key,
            value,
            category,
            description,
            public,
        } => {
            let value = serde_json::from_str(&value).unwrap_or(Value::String(value));
            let saved = rk.upsert_setting(&SystemSetting {
                key,
                category,
                value,
                description,
                is_public: public,
                updated_at: 0,
            })?;
            print_json(&saved)?;
        }
        SettingCommands::Delete { key } => {
            rk.delete_setting(&key)?;
            println!("Deleted {}", key);
        }
    }
    Ok(())
}

fn resolve_path(path: Option<String>) -> PathBuf {
    match path {
        Some(p) => PathBuf::from(p),
        None => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    }
}

fn parse_collection(name: &str) -> Result<Collection> {
    Collection::from_str(name).ok_or_else(|| {
        RefKeeperError::validation("request", "collection", &format!("unknown collection '{}'", name))
    })
}

fn invalid_file(path: &Path, message: &str) -> RefKeeperError {
    RefKeeperError::validation("request", &path.display().to_string(), message)
}

fn read_json(path: &Path) -> Result<Value> {
    let contents = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

fn read_object(path: &Path) -> Result<Record> {
    match read_json(path)? {
        Value::Object(record) => Ok(record),
        _ => Err(invalid_file(path, "expected a JSON object")),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
