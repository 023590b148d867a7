//! Idempotent loading: replace the batch's periods table by table
//!
//! For every destination with rows in the batch the period delete runs
//! first and is awaited, then the rows are appended. A failed delete is
//! logged and the append still runs; a failed append aborts the batch.

use chrono::NaiveDate;
use serde::Serialize;
use std::collections::hash_map::Entry;
use std::collections::{BTreeSet, HashMap};

use crate::config::{BudgetStrategy, TableNames};
use crate::error::Result;
use crate::partition::{periods, Period, TransactionBatch};
use crate::records::{BudgetEntry, Destination, BUDGET_SCHEMA};
use crate::warehouse::{Field, Statement, Value, Warehouse, WriteMode};

const DATE_COLUMN: &str = "fecha";
const BUDGET_KEYS: &[&str] = &["fecha", "categoria"];
const BUDGET_UPDATES: &[&str] = &["presupuesto", "year", "month"];
const BUDGET_COLUMNS: &[&str] = &["fecha", "year", "month", "categoria", "presupuesto"];

/// What happened to one destination table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableLoad {
    pub table: String,
    /// Rows removed before the load; `None` when the delete failed.
    pub deleted: Option<u64>,
    pub loaded: u64,
}

impl TableNames {
    pub fn for_destination(&self, dest: Destination) -> &str {
        match dest {
            Destination::Ledger => &self.ledger,
            Destination::Emotional => &self.emotional,
            Destination::Mileage => &self.mileage,
        }
    }
}

/// Delete `periods` from `table`, then append `rows`.
pub async fn replace_periods<W: Warehouse>(
    warehouse: &W,
    table: &str,
    schema: &[Field],
    periods: &BTreeSet<Period>,
    rows: &[Vec<Value>],
) -> Result<TableLoad> {
    let delete = Statement::DeletePeriods {
        table: table.to_string(),
        date_column: DATE_COLUMN,
        periods: periods.iter().copied().collect(),
    };

    let deleted = match warehouse.execute(&delete).await {
        Ok(n) => {
            tracing::info!(table, periods = periods.len(), deleted = n, "deleted overlapping periods");
            Some(n)
        }
        Err(e) => {
            tracing::error!(table, error = %e, "period delete failed, appending anyway");
            None
        }
    };

    let loaded = warehouse.load(table, schema, rows, WriteMode::Append).await?;
    tracing::info!(table, rows = loaded, "loaded rows");

    Ok(TableLoad {
        table: table.to_string(),
        deleted,
        loaded,
    })
}

/// Load each non-empty destination group of the batch.
pub async fn load_transactions<W: Warehouse>(
    warehouse: &W,
    tables: &TableNames,
    batch: &TransactionBatch,
) -> Result<Vec<TableLoad>> {
    let mut loads = Vec::new();
    for dest in Destination::ALL {
        let group = batch.group(dest);
        if group.is_empty() {
            continue;
        }
        let rows: Vec<Vec<Value>> = group.iter().map(|t| t.to_row(dest)).collect();
        let load = replace_periods(
            warehouse,
            tables.for_destination(dest),
            dest.schema(),
            &batch.periods,
            &rows,
        )
        .await?;
        loads.push(load);
    }
    Ok(loads)
}

/// One entry per (fecha, categoria); a later line overrides an earlier one
/// in the position of the first.
pub fn collapse_budget_keys(entries: &[BudgetEntry]) -> Vec<BudgetEntry> {
    let mut index: HashMap<(NaiveDate, &str), usize> = HashMap::new();
    let mut out: Vec<BudgetEntry> = Vec::with_capacity(entries.len());
    for entry in entries {
        match index.entry((entry.fecha, entry.categoria.as_str())) {
            Entry::Occupied(slot) => out[*slot.get()] = entry.clone(),
            Entry::Vacant(slot) => {
                slot.insert(out.len());
                out.push(entry.clone());
            }
        }
    }
    out
}

/// Stage the entries, MERGE them into the budget table, drop the stage.
async fn merge_budget<W: Warehouse>(
    warehouse: &W,
    tables: &TableNames,
    entries: &[BudgetEntry],
) -> Result<TableLoad> {
    let unique = collapse_budget_keys(entries);
    if unique.len() < entries.len() {
        tracing::warn!(
            collapsed = entries.len() - unique.len(),
            "repeated budget lines for the same date and category, keeping the last"
        );
    }
    let rows: Vec<Vec<Value>> = unique.iter().map(BudgetEntry::to_row).collect();

    warehouse.ensure_table(&tables.budget, BUDGET_SCHEMA).await?;
    let staged = warehouse
        .load(&tables.budget_staging, BUDGET_SCHEMA, &rows, WriteMode::Truncate)
        .await?;
    tracing::info!(table = %tables.budget_staging, rows = staged, "staged budget");

    let merge = Statement::Merge {
        target: tables.budget.clone(),
        source: tables.budget_staging.clone(),
        keys: BUDGET_KEYS,
        updates: BUDGET_UPDATES,
        columns: BUDGET_COLUMNS,
    };
    let merged = warehouse.execute(&merge).await;

    if let Err(e) = warehouse.drop_table(&tables.budget_staging).await {
        tracing::warn!(table = %tables.budget_staging, error = %e, "could not drop staging table");
    } else {
        tracing::info!(table = %tables.budget_staging, "dropped staging table");
    }

    let merged = merged?;
    tracing::info!(table = %tables.budget, rows = merged, "merged budget");
    Ok(TableLoad {
        table: tables.budget.clone(),
        deleted: None,
        loaded: merged,
    })
}

pub async fn load_budget<W: Warehouse>(
    warehouse: &W,
    tables: &TableNames,
    strategy: BudgetStrategy,
    entries: &[BudgetEntry],
) -> Result<Vec<TableLoad>> {
    if entries.is_empty() {
        return Ok(Vec::new());
    }
    let load = match strategy {
        BudgetStrategy::Merge => merge_budget(warehouse, tables, entries).await?,
        BudgetStrategy::Replace => {
            let rows: Vec<Vec<Value>> = entries.iter().map(BudgetEntry::to_row).collect();
            let periods = periods(entries.iter().map(|e| e.fecha));
            replace_periods(warehouse, &tables.budget, BUDGET_SCHEMA, &periods, &rows).await?
        }
    };
    Ok(vec![load])
}
