use thiserror::Error;

use crate::annotate::AnnotateError;
use crate::warehouse::WarehouseError;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Workbook error: {0}")]
    Workbook(#[from] calamine::Error),

    #[error("Sheet '{0}' not found in workbook")]
    MissingSheet(String),

    #[error("Missing required column '{0}'")]
    MissingColumn(String),

    #[error("Object '{name}' not found in bucket '{bucket}'")]
    ObjectNotFound { bucket: String, name: String },

    #[error("Invalid object path '{name}' in bucket '{bucket}'")]
    InvalidObjectPath { bucket: String, name: String },

    #[error(transparent)]
    Annotate(#[from] AnnotateError),

    #[error(transparent)]
    Warehouse(#[from] WarehouseError),

    #[error("Parse task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
