//! Uploader - puts a local export into the raw bucket
//!
//! Usage:
//!   cargo run --bin uploader -- ./exports/2024-03.xlsx
//!   cargo run --bin uploader -- ./presupuesto.csv --bucket finanzas_personales_raw --dest 2024/presupuesto.csv
//!
//!   # Also notify a running trigger service:
//!   cargo run --bin uploader -- ./exports/2024-03.xlsx --notify http://127.0.0.1:8080/

use anyhow::{Context, Result};
use clap::Parser;
use pipeline::storage::FsBucketStore;
use pipeline::StorageEvent;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_BUCKET: &str = "finanzas_personales_raw";

#[derive(Parser, Debug)]
#[command(name = "uploader", about = "Uploads a file to the raw bucket")]
struct Args {
    /// Local file to upload
    local_file_path: PathBuf,

    /// Bucket name
    #[arg(long, default_value = DEFAULT_BUCKET)]
    bucket: String,

    /// Object name in the bucket (default: the local file name)
    #[arg(long)]
    dest: Option<String>,

    /// Trigger endpoint to notify after the upload
    #[arg(long)]
    notify: Option<String>,
}

/// Object name for an upload: `--dest` if given, else the file's base name.
fn destination_name(local: &Path, dest: Option<&str>) -> Result<String> {
    match dest {
        Some(d) => Ok(d.to_string()),
        None => local
            .file_name()
            .map(|f| f.to_string_lossy().to_string())
            .context("Local path has no file name"),
    }
}

async fn notify_trigger(url: &str, event: &StorageEvent) -> Result<serde_json::Value> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(300))
        .build()?;
    let resp = client
        .post(url)
        .json(event)
        .send()
        .await?
        .error_for_status()
        .context("Trigger request failed")?;
    Ok(resp.json().await?)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    pipeline::init_tracing();
    let args = Args::parse();

    let root = std::env::var("RAW_FS_DIR").unwrap_or_else(|_| "./data/buckets".to_string());
    let store = FsBucketStore::new(root);

    let name = destination_name(&args.local_file_path, args.dest.as_deref())?;
    let hash = store
        .upload(&args.local_file_path, &args.bucket, &name)
        .await
        .with_context(|| format!("Failed to upload {}", args.local_file_path.display()))?;

    println!(
        "✅ File '{}' uploaded to ✅ {}/{}",
        args.local_file_path.display(),
        args.bucket,
        name
    );
    tracing::info!(%hash, bucket = %args.bucket, object = %name, "object stored");

    if let Some(url) = &args.notify {
        let event = StorageEvent {
            bucket: args.bucket.clone(),
            name,
        };
        let outcome = notify_trigger(url, &event).await?;
        println!("Trigger response: {}", outcome);
    }

    Ok(())
}
