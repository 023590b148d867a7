//! Storage-event handler: download, transform, load, clean up
//!
//! `Pipeline::handle` is the single entry point used by the trigger service
//! and the command-line runner. It never returns an error: failures are
//! logged with the file and bucket and reported in the `Outcome`.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::Instrument;
use uuid::Uuid;

use crate::annotate::annotate_transactions;
use crate::config::PipelineConfig;
use crate::error::Result;
use crate::loader::{load_budget, load_transactions, TableLoad};
use crate::normalize::{load_timestamp, normalize_budget, normalize_transactions};
use crate::partition::{partition, TransactionBatch};
use crate::records::BudgetEntry;
use crate::source::{read_delimited, read_workbook, FileKind, SheetTable};
use crate::storage::FsBucketStore;
use crate::warehouse::Warehouse;

/// The object-finalized notification: which file landed in which bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageEvent {
    pub bucket: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    /// Not a recognized export; nothing was done.
    Skipped { file: String },
    Loaded { file: String, tables: Vec<TableLoad> },
    Failed { file: String, error: String },
}

/// A parsed upload, ready to load.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", content = "rows", rename_all = "snake_case")]
pub enum Prepared {
    Transactions(TransactionBatch),
    Budget(Vec<BudgetEntry>),
}

impl Prepared {
    pub fn len(&self) -> usize {
        match self {
            Prepared::Transactions(batch) => batch.len(),
            Prepared::Budget(entries) => entries.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Normalize, annotate and partition a transaction sheet.
pub fn transaction_batch(
    table: &SheetTable,
    local_currency: &str,
    loaded_at: NaiveDateTime,
) -> Result<TransactionBatch> {
    let mut txs = normalize_transactions(table, local_currency, loaded_at)?;
    annotate_transactions(&mut txs)?;
    Ok(partition(txs))
}

/// Parse a local file into a loadable batch without touching the warehouse.
///
/// Parsing runs on the blocking pool so large workbooks don't stall the
/// runtime.
pub async fn prepare(config: &PipelineConfig, path: &Path, kind: FileKind) -> Result<Prepared> {
    let span = tracing::Span::current();
    let local_currency = config.local_currency.clone();
    let loaded_at = load_timestamp(config.timezone);

    let task = match kind {
        FileKind::Workbook => {
            let path = path.to_path_buf();
            let sheet_name = config.sheet_name.clone();
            tokio::task::spawn_blocking(move || {
                span.in_scope(|| -> Result<Prepared> {
                    let table = read_workbook(&path, &sheet_name)?;
                    let batch = transaction_batch(&table, &local_currency, loaded_at)?;
                    tracing::info!(
                        rows = batch.len(),
                        periods = batch.periods.len(),
                        "transactions transformed"
                    );
                    Ok(Prepared::Transactions(batch))
                })
            })
        }
        FileKind::Delimited => {
            let bytes = tokio::fs::read(path).await?;
            tokio::task::spawn_blocking(move || {
                span.in_scope(|| -> Result<Prepared> {
                    let table = read_delimited(&bytes)?;
                    let entries = normalize_budget(&table)?;
                    tracing::info!(rows = entries.len(), "budget transformed");
                    Ok(Prepared::Budget(entries))
                })
            })
        }
    };

    task.await?
}

pub struct Pipeline<W> {
    config: PipelineConfig,
    store: FsBucketStore,
    warehouse: W,
}

impl<W: Warehouse> Pipeline<W> {
    pub fn new(config: PipelineConfig, warehouse: W) -> Self {
        let store = FsBucketStore::new(config.raw_fs_dir.clone());
        Self {
            config,
            store,
            warehouse,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn warehouse(&self) -> &W {
        &self.warehouse
    }

    pub async fn prepare(&self, path: &Path, kind: FileKind) -> Result<Prepared> {
        prepare(&self.config, path, kind).await
    }

    pub async fn load(&self, prepared: &Prepared) -> Result<Vec<TableLoad>> {
        match prepared {
            Prepared::Transactions(batch) => {
                load_transactions(&self.warehouse, &self.config.tables, batch).await
            }
            Prepared::Budget(entries) => {
                load_budget(
                    &self.warehouse,
                    &self.config.tables,
                    self.config.budget_strategy,
                    entries,
                )
                .await
            }
        }
    }

    fn temp_path(&self, name: &str) -> PathBuf {
        let base = Path::new(name)
            .file_name()
            .map(|f| f.to_string_lossy().to_string())
            .unwrap_or_else(|| "object".to_string());
        self.config
            .tmp_dir
            .join(format!("{}-{}", Uuid::new_v4(), base))
    }

    async fn process(&self, event: &StorageEvent, kind: FileKind, temp: &Path) -> Result<Vec<TableLoad>> {
        tracing::info!(path = %temp.display(), "downloading object");
        let size = self.store.download(&event.bucket, &event.name, temp).await?;
        tracing::info!(bytes = size, "object downloaded");

        let prepared = self.prepare(temp, kind).await?;
        self.load(&prepared).await
    }

    /// Process one storage event end to end. The temporary copy is always removed.
    pub async fn handle(&self, event: &StorageEvent) -> Outcome {
        let span = tracing::info_span!("storage_event", file = %event.name, bucket = %event.bucket);
        async move {
            tracing::info!("event received");

            let Some(kind) = FileKind::detect(&event.name) else {
                tracing::debug!("unsupported file type, skipping");
                return Outcome::Skipped {
                    file: event.name.clone(),
                };
            };

            let temp = self.temp_path(&event.name);
            let result = self.process(event, kind, &temp).await;

            match tokio::fs::remove_file(&temp).await {
                Ok(()) => tracing::info!(path = %temp.display(), "temporary file removed"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(path = %temp.display(), error = %e, "could not remove temporary file")
                }
            }

            match result {
                Ok(tables) => Outcome::Loaded {
                    file: event.name.clone(),
                    tables,
                },
                Err(e) => {
                    tracing::error!(error = %e, "error processing file");
                    Outcome::Failed {
                        file: event.name.clone(),
                        error: e.to_string(),
                    }
                }
            }
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BudgetStrategy;
    use crate::records::Destination;
    use crate::source::Cell;
    use crate::warehouse::memory::MemoryWarehouse;
    use crate::warehouse::Value;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    const BUDGET_CSV: &str = "fecha;year;month;categoria;presupuesto\n\
                              2024-01-01;2024;1;Comida;500\n\
                              2024-02-01;2024;2;Comida;400\n\
                              ;2024;2;Ocio;50\n";

    struct Fixture {
        dir: TempDir,
        pipeline: Pipeline<MemoryWarehouse>,
    }

    impl Fixture {
        fn new(warehouse: MemoryWarehouse, strategy: BudgetStrategy) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let config = PipelineConfig {
                raw_fs_dir: dir.path().join("buckets"),
                tmp_dir: dir.path().join("tmp"),
                budget_strategy: strategy,
                ..PipelineConfig::default()
            };
            std::fs::create_dir_all(&config.tmp_dir).unwrap();
            Self {
                pipeline: Pipeline::new(config, warehouse),
                dir,
            }
        }

        fn put(&self, name: &str, bytes: &[u8]) -> StorageEvent {
            let path = self.dir.path().join("buckets").join("raw").join(name);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, bytes).unwrap();
            StorageEvent {
                bucket: "raw".to_string(),
                name: name.to_string(),
            }
        }

        fn temp_files(&self) -> usize {
            std::fs::read_dir(self.dir.path().join("tmp")).unwrap().count()
        }
    }

    fn text(s: &str) -> Cell {
        Cell::Text(s.to_string())
    }

    fn sheet(rows: Vec<Vec<Cell>>) -> SheetTable {
        let headers = [
            "Según un período",
            "Cuentas",
            "Categoría",
            "Subcategorías",
            "Nota",
            "PEN",
            "Ingreso/Gasto",
            "Descripción",
            "Importe",
            "Moneda",
            "Cuentas",
        ];
        SheetTable::new(headers.iter().map(|h| h.to_string()).collect(), rows)
    }

    fn row(date: &str, account: &str, comment: &str, pen: f64) -> Vec<Cell> {
        vec![
            text(date),
            text(account),
            text("Comida"),
            Cell::Empty,
            Cell::Empty,
            Cell::Number(pen),
            text("Gasto"),
            text(comment),
            Cell::Number(pen),
            text("PEN"),
            Cell::Number(pen),
        ]
    }

    fn loaded_at() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap()
    }

    // -------------------------------------------------------------------------
    // TRANSFORMATION
    // -------------------------------------------------------------------------

    #[test]
    fn test_worked_days_example_row() {
        let table = sheet(vec![row("2024-02-28", "BCP", "Almuerzo dias trabajados 22", 45.50)]);
        let batch = transaction_batch(&table, "PEN", loaded_at()).unwrap();
        let tx = &batch.group(Destination::Ledger)[0];
        assert_eq!(tx.dias_trabajados, Some(22.0));
        assert_eq!(tx.clave, None);
        assert_eq!(tx.valor, None);
        assert_eq!(tx.importe, Some(45.50));
    }

    #[test]
    fn test_key_value_example_row() {
        let table = sheet(vec![row("2024-02-28", "BCP", "Uber/ 15.30", 15.30)]);
        let batch = transaction_batch(&table, "PEN", loaded_at()).unwrap();
        let tx = &batch.group(Destination::Ledger)[0];
        assert_eq!(tx.clave.as_deref(), Some("Uber/"));
        assert_eq!(tx.valor.as_deref(), Some("15.30"));
        assert_eq!(tx.dias_trabajados, None);
    }

    #[test]
    fn test_routing_keeps_tables_disjoint() {
        let table = sheet(vec![
            row("2024-01-02", "BCP", "", 1.0),
            row("2024-01-03", "Personal", "Feliz/ paseo", 0.0),
            row("2024-01-04", "Kilometraje", "", 12.0),
        ]);
        let batch = transaction_batch(&table, "PEN", loaded_at()).unwrap();
        assert!(batch.group(Destination::Ledger).iter().all(|t| t.cuenta != "Personal"));
        assert!(batch
            .group(Destination::Emotional)
            .iter()
            .all(|t| t.cuenta != "Kilometraje"));
        assert_eq!(batch.group(Destination::Emotional).len(), 1);
        assert_eq!(batch.group(Destination::Mileage).len(), 1);
    }

    #[test]
    fn test_bad_worked_days_fails_batch() {
        let table = sheet(vec![row("2024-01-02", "BCP", "dias trabajados ?", 1.0)]);
        assert!(transaction_batch(&table, "PEN", loaded_at()).is_err());
    }

    // -------------------------------------------------------------------------
    // HANDLER
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_budget_upload_is_loaded_and_temp_removed() {
        let fx = Fixture::new(MemoryWarehouse::default(), BudgetStrategy::Merge);
        let event = fx.put("presupuesto.csv", BUDGET_CSV.as_bytes());

        let outcome = fx.pipeline.handle(&event).await;

        match outcome {
            Outcome::Loaded { tables, .. } => {
                assert_eq!(tables.len(), 1);
                assert_eq!(tables[0].loaded, 2);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        let budget = &fx.pipeline.config().tables.budget;
        let rows = fx.pipeline.warehouse().rows(budget);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][1], Value::Text(Some("2024".to_string())));
        assert_eq!(fx.temp_files(), 0);
    }

    #[tokio::test]
    async fn test_reupload_replaces_budget_periods() {
        let fx = Fixture::new(MemoryWarehouse::default(), BudgetStrategy::Replace);
        let event = fx.put("presupuesto.csv", BUDGET_CSV.as_bytes());

        fx.pipeline.handle(&event).await;
        fx.pipeline.handle(&event).await;

        let budget = &fx.pipeline.config().tables.budget;
        assert_eq!(fx.pipeline.warehouse().rows(budget).len(), 2);
    }

    #[tokio::test]
    async fn test_unsupported_file_is_skipped() {
        let fx = Fixture::new(MemoryWarehouse::default(), BudgetStrategy::Merge);
        let event = fx.put("notas.txt", b"hola");

        let outcome = fx.pipeline.handle(&event).await;

        assert_eq!(
            outcome,
            Outcome::Skipped {
                file: "notas.txt".to_string()
            }
        );
        assert!(fx.pipeline.warehouse().ops().is_empty());
        assert_eq!(fx.temp_files(), 0);
    }

    #[tokio::test]
    async fn test_corrupt_workbook_fails_and_cleans_up() {
        let fx = Fixture::new(MemoryWarehouse::default(), BudgetStrategy::Merge);
        let event = fx.put("2024/export.xlsx", b"not a zip archive");

        let outcome = fx.pipeline.handle(&event).await;

        assert!(matches!(outcome, Outcome::Failed { .. }));
        assert!(fx.pipeline.warehouse().ops().is_empty());
        assert_eq!(fx.temp_files(), 0);
    }

    #[tokio::test]
    async fn test_missing_object_fails() {
        let fx = Fixture::new(MemoryWarehouse::default(), BudgetStrategy::Merge);
        let event = StorageEvent {
            bucket: "raw".to_string(),
            name: "missing.csv".to_string(),
        };

        let outcome = fx.pipeline.handle(&event).await;

        match outcome {
            Outcome::Failed { error, .. } => assert!(error.contains("missing.csv")),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_object_outside_bucket_is_refused() {
        let fx = Fixture::new(MemoryWarehouse::default(), BudgetStrategy::Merge);
        let secret = fx.dir.path().join("secret.csv");
        std::fs::write(&secret, BUDGET_CSV).unwrap();

        for name in [secret.to_string_lossy().to_string(), "../secret.csv".to_string()] {
            let event = StorageEvent {
                bucket: "raw".to_string(),
                name,
            };
            match fx.pipeline.handle(&event).await {
                Outcome::Failed { error, .. } => assert!(error.contains("Invalid object path"), "{}", error),
                other => panic!("unexpected outcome {:?}", other),
            }
        }
        assert!(fx.pipeline.warehouse().ops().is_empty());
        assert_eq!(fx.temp_files(), 0);
    }

    #[tokio::test]
    async fn test_prepare_parses_off_the_runtime() {
        let fx = Fixture::new(MemoryWarehouse::default(), BudgetStrategy::Merge);
        let path = fx.dir.path().join("presupuesto.csv");
        std::fs::write(&path, BUDGET_CSV).unwrap();

        let prepared = prepare(fx.pipeline.config(), &path, FileKind::Delimited)
            .await
            .unwrap();

        assert!(matches!(&prepared, Prepared::Budget(entries) if entries.len() == 2));
        assert!(fx.pipeline.warehouse().ops().is_empty());
    }

    #[tokio::test]
    async fn test_load_failure_is_reported_not_raised() {
        let tables = crate::config::TableNames::default();
        let fx = Fixture::new(
            MemoryWarehouse::default().failing_load(&tables.budget_staging),
            BudgetStrategy::Merge,
        );
        let event = fx.put("presupuesto.csv", BUDGET_CSV.as_bytes());

        let outcome = fx.pipeline.handle(&event).await;

        assert!(matches!(outcome, Outcome::Failed { .. }));
        assert_eq!(fx.temp_files(), 0);
    }

    #[test]
    fn test_outcome_serializes_with_status() {
        let json = serde_json::to_value(Outcome::Skipped {
            file: "a.pdf".to_string(),
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({"status": "skipped", "file": "a.pdf"}));
    }
}
