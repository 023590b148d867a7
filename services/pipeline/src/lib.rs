//! Personal-finance pipeline - turns uploaded exports into warehouse rows
//!
//! Responsibilities:
//! - Download the uploaded object named by a storage event
//! - Parse XLSX transaction exports and semicolon CSV budget exports
//! - Normalize columns, annotate comments, partition by period and account
//! - Replace the affected periods in each destination table
//!
//! Every invocation is stateless: one event, one file, one batch.

pub mod annotate;
pub mod config;
pub mod error;
pub mod handler;
pub mod loader;
pub mod normalize;
pub mod partition;
pub mod records;
pub mod source;
pub mod storage;
pub mod warehouse;

pub use config::{BudgetStrategy, PipelineConfig, TableNames};
pub use error::{PipelineError, Result};
pub use handler::{Outcome, Pipeline, StorageEvent};
pub use warehouse::{PgWarehouse, Warehouse};

/// Install the global tracing subscriber, honoring `RUST_LOG`.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
