//! tinytable-check - open a database directory and verify its tables
//!
//! Opening runs crash recovery if the log is non-empty. Each table is then
//! walked with a full structural check and its schema and tree shape are
//! printed.

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::Serialize;
use std::path::PathBuf;
use tinytable::{Database, DBConfig, TreeStats};

#[derive(Parser, Debug)]
#[command(name = "tinytable-check", version, about = "Verify tinytable table files")]
struct Args {
    /// Data directory
    dir: PathBuf,

    /// Database name (selects <name>.wal)
    #[arg(short, long, default_value = "main")]
    name: String,

    /// Tables to check (all tables when omitted)
    #[arg(short, long)]
    table: Vec<String>,

    /// Block size the tables were created with
    #[arg(long, default_value_t = 4096)]
    block_size: usize,

    /// Buffer pool capacity in pages
    #[arg(long, default_value_t = 100)]
    pool: usize,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Serialize)]
struct AttributeReport {
    name: String,
    data_type: String,
    constraint: String,
}

#[derive(Serialize)]
struct TableReport {
    name: String,
    rows: u64,
    order: u32,
    key: String,
    attributes: Vec<AttributeReport>,
    stats: Option<TreeStats>,
    error: Option<String>,
}

#[derive(Serialize)]
struct Report {
    dir: PathBuf,
    recovered_records: Option<usize>,
    tables: Vec<TableReport>,
}

fn main() {
    if let Err(e) = run() {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args = Args::parse();
    let config = DBConfig::default()
        .with_block_size(args.block_size)
        .with_pool_capacity(args.pool);
    let db = Database::open_with_config(&args.dir, &args.name, config)
        .with_context(|| format!("opening {}", args.dir.display()))?;

    let names = if args.table.is_empty() {
        db.table_names()?
    } else {
        args.table.clone()
    };

    let mut tables = Vec::with_capacity(names.len());
    for name in &names {
        let table = db
            .open_table(name)
            .with_context(|| format!("opening table '{}'", name))?;
        let header = table.header();
        let checked = table.check();
        tables.push(TableReport {
            name: name.clone(),
            rows: table.len(),
            order: header.order,
            key: table.key_attribute().name.clone(),
            attributes: table
                .schema()
                .attributes()
                .iter()
                .map(|a| AttributeReport {
                    name: a.name.clone(),
                    data_type: a.data_type.name(),
                    constraint: a.constraint.clone(),
                })
                .collect(),
            stats: checked.as_ref().ok().cloned(),
            error: checked.err().map(|e| e.to_string()),
        });
    }

    let report = Report {
        dir: args.dir.clone(),
        recovered_records: db.last_recovery().map(|r| r.redo_count),
        tables,
    };
    let failed = report.tables.iter().filter(|t| t.error.is_some()).count();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    db.close()?;

    if failed > 0 {
        bail!("{} of {} tables failed the check", failed, report.tables.len());
    }
    Ok(())
}

fn print_report(report: &Report) {
    println!("database: {}", report.dir.display());
    if let Some(redo) = report.recovered_records {
        println!("recovery: replayed {} records", redo);
    }
    for table in &report.tables {
        println!();
        println!("table {} ({} rows, order {}, key {})", table.name, table.rows, table.order, table.key);
        for attr in &table.attributes {
            if attr.constraint.is_empty() {
                println!("  {:<20} {}", attr.name, attr.data_type);
            } else {
                println!("  {:<20} {:<10} {}", attr.name, attr.data_type, attr.constraint);
            }
        }
        match (&table.stats, &table.error) {
            (Some(stats), _) => println!(
                "  ok: depth {}, {} internal, {} leaves, {} keys",
                stats.depth, stats.internal_nodes, stats.leaves, stats.keys
            ),
            (None, Some(error)) => println!("  FAILED: {}", error),
            (None, None) => {}
        }
    }
}
