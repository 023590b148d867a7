//! Pipeline runner - processes one uploaded object from the command line
//!
//! Usage:
//!   # Load an object that is already in the bucket:
//!   cargo run --bin pipeline -- --bucket finanzas_personales_raw --name export.xlsx
//!
//!   # Parse and transform only, printing the batch:
//!   cargo run --bin pipeline -- --bucket finanzas_personales_raw --name export.xlsx --dry-run
//!
//!   # Same, as JSON:
//!   cargo run --bin pipeline -- --name export.xlsx --dry-run --json

use anyhow::{Context, Result};
use clap::Parser;
use pipeline::handler::{prepare, Prepared};
use pipeline::source::FileKind;
use pipeline::storage::FsBucketStore;
use pipeline::{Outcome, PgWarehouse, Pipeline, PipelineConfig, StorageEvent};

#[derive(Parser, Debug)]
#[command(name = "pipeline", about = "Loads an uploaded finance export into the warehouse")]
struct Args {
    /// Bucket holding the object
    #[arg(long, default_value = "finanzas_personales_raw")]
    bucket: String,

    /// Object name inside the bucket
    #[arg(long)]
    name: String,

    /// Dry run - transform and print, don't touch the warehouse
    #[arg(long, default_value = "false")]
    dry_run: bool,

    /// With --dry-run, print the whole batch as JSON
    #[arg(long, default_value = "false")]
    json: bool,
}

fn print_summary(prepared: &Prepared) {
    match prepared {
        Prepared::Transactions(batch) => {
            let periods: Vec<String> = batch
                .periods
                .iter()
                .map(|p| format!("{}-{:02}", p.year, p.month))
                .collect();
            println!("Periods: {}", periods.join(", "));
            for (dest, rows) in &batch.groups {
                println!("  {:?}: {} rows", dest, rows.len());
                for tx in rows.iter().take(3) {
                    println!(
                        "    {} | {} | {:?} | {:?} {}",
                        tx.fecha,
                        tx.cuenta,
                        tx.categoria,
                        tx.importe,
                        tx.moneda
                    );
                }
            }
        }
        Prepared::Budget(entries) => {
            println!("Budget lines: {}", entries.len());
            for e in entries.iter().take(5) {
                println!("  {} | {} | {}", e.fecha, e.categoria, e.presupuesto);
            }
        }
    }
}

async fn dry_run(config: &PipelineConfig, event: &StorageEvent, json: bool) -> Result<()> {
    let Some(kind) = FileKind::detect(&event.name) else {
        println!("Unsupported file type - nothing to do");
        return Ok(());
    };

    let store = FsBucketStore::new(config.raw_fs_dir.clone());
    let local = store.object_path(&event.bucket, &event.name)?;
    let prepared = prepare(config, &local, kind)
        .await
        .with_context(|| format!("Failed to transform {}", local.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&prepared)?);
        return Ok(());
    }

    print_summary(&prepared);
    println!("\nDry run - {} rows not loaded", prepared.len());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    pipeline::init_tracing();
    let args = Args::parse();
    let config = PipelineConfig::from_env()?;

    let event = StorageEvent {
        bucket: args.bucket,
        name: args.name,
    };

    println!("=== Finanzas Pipeline ===");
    println!("Object: {}/{}", event.bucket, event.name);
    println!("Mode: {}", if args.dry_run { "dry-run" } else { "live" });

    if args.dry_run {
        return dry_run(&config, &event, args.json).await;
    }

    let db_url = std::env::var("DB_URL").context("DB_URL env var missing")?;
    let warehouse = PgWarehouse::connect(&db_url)
        .await
        .context("Failed to connect to database")?;

    let pipeline = Pipeline::new(config, warehouse);
    match pipeline.handle(&event).await {
        Outcome::Loaded { tables, .. } => {
            println!("\n=== Load Complete ===");
            for t in tables {
                let deleted = t
                    .deleted
                    .map(|n| n.to_string())
                    .unwrap_or_else(|| "delete failed".to_string());
                println!("  {}: {} loaded, {} replaced", t.table, t.loaded, deleted);
            }
        }
        Outcome::Skipped { file } => println!("Skipped {} (unsupported file type)", file),
        Outcome::Failed { error, .. } => anyhow::bail!("Processing failed: {}", error),
    }

    Ok(())
}
