use chrono_tz::Tz;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{PipelineError, Result};

/// How the budget table is kept idempotent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetStrategy {
    /// Stage the batch, MERGE on (fecha, categoria), drop the stage.
    Merge,
    /// Delete the batch's periods, then append.
    Replace,
}

impl FromStr for BudgetStrategy {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "merge" => Ok(Self::Merge),
            "replace" => Ok(Self::Replace),
            other => Err(PipelineError::Config(format!(
                "BUDGET_STRATEGY must be 'merge' or 'replace', got '{}'",
                other
            ))),
        }
    }
}

/// Destination tables, fully qualified (`schema.table`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableNames {
    pub ledger: String,
    pub emotional: String,
    pub mileage: String,
    pub budget: String,
    pub budget_staging: String,
}

impl Default for TableNames {
    fn default() -> Self {
        Self {
            ledger: "finanzas_personales.historico".to_string(),
            emotional: "finanzas_personales.emocional".to_string(),
            mileage: "finanzas_personales.kilometraje".to_string(),
            budget: "finanzas_personales.presupuesto".to_string(),
            budget_staging: "finanzas_personales.temp_presupuesto".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub raw_fs_dir: PathBuf,
    pub tmp_dir: PathBuf,
    pub timezone: Tz,
    pub local_currency: String,
    pub sheet_name: String,
    pub tables: TableNames,
    pub budget_strategy: BudgetStrategy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            raw_fs_dir: PathBuf::from("./data/buckets"),
            tmp_dir: std::env::temp_dir(),
            timezone: chrono_tz::America::Lima,
            local_currency: "PEN".to_string(),
            sheet_name: "Sheet1".to_string(),
            tables: TableNames::default(),
            budget_strategy: BudgetStrategy::Merge,
        }
    }
}

fn env_or(key: &str, default: String) -> String {
    std::env::var(key).unwrap_or(default)
}

impl PipelineConfig {
    /// Build the configuration from the environment, falling back to defaults.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let timezone = match std::env::var("TIMEZONE") {
            Ok(name) => name
                .parse::<Tz>()
                .map_err(|e| PipelineError::Config(format!("TIMEZONE '{}': {}", name, e)))?,
            Err(_) => defaults.timezone,
        };
        let budget_strategy = match std::env::var("BUDGET_STRATEGY") {
            Ok(s) => s.parse()?,
            Err(_) => defaults.budget_strategy,
        };
        let tables = TableNames {
            ledger: env_or("LEDGER_TABLE", defaults.tables.ledger),
            emotional: env_or("EMOTIONAL_TABLE", defaults.tables.emotional),
            mileage: env_or("MILEAGE_TABLE", defaults.tables.mileage),
            budget: env_or("BUDGET_TABLE", defaults.tables.budget),
            budget_staging: env_or("BUDGET_STAGING_TABLE", defaults.tables.budget_staging),
        };

        Ok(Self {
            raw_fs_dir: std::env::var("RAW_FS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.raw_fs_dir),
            tmp_dir: std::env::var("TMP_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.tmp_dir),
            timezone,
            local_currency: env_or("LOCAL_CURRENCY", defaults.local_currency),
            sheet_name: env_or("SHEET_NAME", defaults.sheet_name),
            tables,
            budget_strategy,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_strategy_parse() {
        assert_eq!("merge".parse::<BudgetStrategy>().unwrap(), BudgetStrategy::Merge);
        assert_eq!(" Replace ".parse::<BudgetStrategy>().unwrap(), BudgetStrategy::Replace);
        assert!("upsert".parse::<BudgetStrategy>().is_err());
    }

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.timezone, chrono_tz::America::Lima);
        assert_eq!(config.local_currency, "PEN");
        assert_eq!(config.sheet_name, "Sheet1");
        assert_eq!(config.tables.ledger, "finanzas_personales.historico");
        assert_eq!(config.budget_strategy, BudgetStrategy::Merge);
    }
}
