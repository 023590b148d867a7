//! Column normalization: export layouts into canonical records
//!
//! The transaction export changed over time. Older files have no currency
//! block; newer ones carry `Importe` (amount in the stated currency) and
//! `Moneda` next to the local-currency column. Both map onto one record.

use chrono::{Datelike, Days, NaiveDate, NaiveDateTime};
use chrono_tz::Tz;

use crate::error::Result;
use crate::records::{BudgetEntry, FlowType, Transaction};
use crate::source::{cell, parse_amount, Cell, SheetTable};

// Transaction export headers
const COL_DATE: &str = "Según un período";
const COL_ACCOUNT: &str = "Cuentas";
const COL_CATEGORY: &str = "Categoría";
const COL_SUBCATEGORY: &str = "Subcategorías";
const COL_NOTE: &str = "Nota";
const COL_FLOW: &str = "Ingreso/Gasto";
const COL_COMMENT: &str = "Descripción";
const COL_CONVERTED: &str = "Importe";
const COL_CURRENCY: &str = "Moneda";

// Budget export headers
const BUDGET_COLUMNS: [&str; 5] = ["fecha", "year", "month", "categoria", "presupuesto"];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M:%S",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
];
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y", "%Y/%m/%d"];

/// Which generation of the transaction export a sheet belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// No currency block: every amount is in the local currency.
    Legacy,
    /// `Importe` and `Moneda` present.
    CurrencyAware,
}

impl Layout {
    pub fn detect(table: &SheetTable) -> Self {
        if table.column(COL_CONVERTED).is_some() && table.column(COL_CURRENCY).is_some() {
            Self::CurrencyAware
        } else {
            Self::Legacy
        }
    }
}

/// "Now" in `tz`, without the offset.
pub fn load_timestamp(tz: Tz) -> NaiveDateTime {
    chrono::Utc::now().with_timezone(&tz).naive_local()
}

pub fn round4(x: f64) -> f64 {
    (x * 10_000.0).round() / 10_000.0
}

/// Spreadsheet serial day number (days since 1899-12-30).
fn excel_serial_to_date(serial: f64) -> Option<NaiveDate> {
    if !serial.is_finite() || serial < 1.0 {
        return None;
    }
    NaiveDate::from_ymd_opt(1899, 12, 30)?.checked_add_days(Days::new(serial.floor() as u64))
}

pub fn parse_date_str(raw: &str) -> Option<NaiveDate> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    DATETIME_FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(s, f).ok())
        .map(|dt| dt.date())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|f| NaiveDate::parse_from_str(s, f).ok())
        })
}

/// Calendar date of a cell, time of day discarded.
pub fn parse_date(value: &Cell) -> Option<NaiveDate> {
    match value {
        Cell::DateTime(dt) => Some(dt.date()),
        Cell::Number(n) => excel_serial_to_date(*n),
        Cell::Text(s) => parse_date_str(s),
        Cell::Empty => None,
    }
}

/// Currency columns derived from the local amount and the stated-currency amount.
#[derive(Debug, Clone, PartialEq)]
pub struct Conversion {
    pub moneda: String,
    pub importe_convertido: Option<f64>,
    pub tipo_cambio: Option<f64>,
    pub importe_original: Option<f64>,
    pub moneda_original: String,
}

impl Conversion {
    /// Exports without a currency block carry only the local amount. A
    /// stated `Moneda` is still kept; otherwise it is the local currency.
    pub fn local(importe: Option<f64>, moneda: Option<String>, local_currency: &str) -> Self {
        Self {
            moneda: moneda.unwrap_or_else(|| local_currency.to_string()),
            importe_convertido: importe,
            tipo_cambio: importe.map(|_| 1.0),
            importe_original: importe,
            moneda_original: local_currency.to_string(),
        }
    }

    /// Equal amounts mean the transaction was made in the local currency;
    /// otherwise it was made in the stated one. A zero or missing converted
    /// amount leaves the rate null.
    pub fn derive(
        importe: Option<f64>,
        converted: Option<f64>,
        moneda: Option<String>,
        local_currency: &str,
    ) -> Self {
        let moneda = moneda.unwrap_or_else(|| local_currency.to_string());
        let (moneda_original, importe_original) = match (importe, converted) {
            (Some(l), Some(c)) if l == c => (local_currency.to_string(), Some(l)),
            (_, Some(c)) => (moneda.clone(), Some(c)),
            (l, None) => (local_currency.to_string(), l),
        };
        let tipo_cambio = match (importe, converted) {
            (Some(l), Some(c)) if c != 0.0 => Some(round4(l / c)),
            _ => None,
        };
        Self {
            moneda,
            importe_convertido: converted,
            tipo_cambio,
            importe_original,
            moneda_original,
        }
    }
}

/// Map a transaction sheet onto `Transaction`s.
///
/// Rows without a date or with an unknown income/expense marker are dropped.
/// Sheets without an `Ingreso/Gasto` column leave the flow type null.
/// Annotation fields are left empty for the annotator.
pub fn normalize_transactions(
    table: &SheetTable,
    local_currency: &str,
    loaded_at: NaiveDateTime,
) -> Result<Vec<Transaction>> {
    let date_col = table.require(COL_DATE)?;
    let account_col = table.require(COL_ACCOUNT)?;
    let amount_col = table.require(local_currency)?;
    let flow_col = table.column(COL_FLOW);
    let category_col = table.column(COL_CATEGORY);
    let subcategory_col = table.column(COL_SUBCATEGORY);
    let note_col = table.column(COL_NOTE);
    let comment_col = table.column(COL_COMMENT);
    let converted_col = table.column(COL_CONVERTED);
    let currency_col = table.column(COL_CURRENCY);

    let layout = Layout::detect(table);
    tracing::info!(?layout, rows = table.rows.len(), "normalizing transaction sheet");

    let mut out = Vec::with_capacity(table.rows.len());
    let mut skipped = 0usize;

    for (row_idx, row) in table.rows.iter().enumerate() {
        let Some(fecha) = parse_date(cell(row, Some(date_col))) else {
            skipped += 1;
            continue;
        };

        let ingreso_gasto = match flow_col {
            Some(col) => {
                let flow_raw = cell(row, Some(col)).as_text().unwrap_or_default();
                let Some(flow) = FlowType::parse(&flow_raw) else {
                    tracing::warn!(row = row_idx + 2, value = %flow_raw, "unknown income/expense marker, dropping row");
                    skipped += 1;
                    continue;
                };
                Some(flow)
            }
            None => None,
        };

        let importe = cell(row, Some(amount_col)).as_number();
        let conversion = match layout {
            Layout::Legacy => Conversion::local(importe, cell(row, currency_col).as_text(), local_currency),
            Layout::CurrencyAware => Conversion::derive(
                importe,
                cell(row, converted_col).as_number(),
                cell(row, currency_col).as_text(),
                local_currency,
            ),
        };

        out.push(Transaction {
            fecha,
            cuenta: cell(row, Some(account_col)).as_text().unwrap_or_default(),
            categoria: cell(row, category_col).as_text(),
            subcategoria: cell(row, subcategory_col).as_text(),
            nota: cell(row, note_col).as_text(),
            ingreso_gasto,
            importe,
            moneda: conversion.moneda,
            importe_convertido: conversion.importe_convertido,
            tipo_cambio: conversion.tipo_cambio,
            importe_original: conversion.importe_original,
            moneda_original: conversion.moneda_original,
            comentario: cell(row, comment_col).as_text(),
            fecha_carga: loaded_at,
            dias_trabajados: None,
            clave: None,
            valor: None,
        });
    }

    if skipped > 0 {
        tracing::info!(skipped, kept = out.len(), "dropped incomplete transaction rows");
    }
    Ok(out)
}

/// `2024`, `2024.0` and `" 2024 "` all become `"2024"`.
fn integer_text(value: &Cell) -> Option<String> {
    value.as_number().map(|n| format!("{}", n.trunc() as i64))
}

/// Map a budget CSV onto `BudgetEntry`s. Extra columns are ignored.
pub fn normalize_budget(table: &SheetTable) -> Result<Vec<BudgetEntry>> {
    let [date_col, year_col, month_col, category_col, amount_col] = {
        let mut cols = [0usize; 5];
        for (slot, name) in cols.iter_mut().zip(BUDGET_COLUMNS) {
            *slot = table.require(name)?;
        }
        cols
    };

    let mut out = Vec::with_capacity(table.rows.len());
    let mut skipped = 0usize;

    for (row_idx, row) in table.rows.iter().enumerate() {
        let Some(fecha) = parse_date(cell(row, Some(date_col))) else {
            skipped += 1;
            continue;
        };
        let Some(categoria) = cell(row, Some(category_col)).as_text() else {
            tracing::warn!(row = row_idx + 2, "budget line without category, dropping row");
            skipped += 1;
            continue;
        };
        let Some(presupuesto) = cell(row, Some(amount_col)).as_number() else {
            tracing::warn!(row = row_idx + 2, "budget amount is not a number, dropping row");
            skipped += 1;
            continue;
        };

        out.push(BudgetEntry {
            fecha,
            year: integer_text(cell(row, Some(year_col))).unwrap_or_else(|| fecha.year().to_string()),
            month: integer_text(cell(row, Some(month_col)))
                .unwrap_or_else(|| fecha.month().to_string()),
            categoria,
            presupuesto,
        });
    }

    if skipped > 0 {
        tracing::info!(skipped, kept = out.len(), "dropped incomplete budget rows");
    }
    Ok(out)
}
