//! Source parsing: XLSX workbooks and semicolon-delimited CSV into tables
//!
//! Both formats end up as a `SheetTable`: header names plus rows of cells.
//! Column meaning is assigned later by the normalizer.

use calamine::{open_workbook_auto, Data, DataType, Reader};
use chrono::NaiveDateTime;
use std::collections::HashMap;
use std::path::Path;

use crate::error::{PipelineError, Result};

/// Recognized upload types, by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// Transaction export (XLSX)
    Workbook,
    /// Budget export (semicolon CSV)
    Delimited,
}

impl FileKind {
    pub fn detect(file_name: &str) -> Option<Self> {
        if file_name.ends_with(".xlsx") {
            Some(Self::Workbook)
        } else if file_name.ends_with(".csv") {
            Some(Self::Delimited)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Text(String),
    Number(f64),
    DateTime(NaiveDateTime),
}

impl Cell {
    /// Trimmed text, `None` for empty cells and blank strings.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Cell::Empty => None,
            Cell::Text(s) => {
                let s = s.trim();
                (!s.is_empty()).then(|| s.to_string())
            }
            Cell::Number(n) => Some(n.to_string()),
            Cell::DateTime(dt) => Some(dt.to_string()),
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Cell::Number(n) => Some(*n),
            Cell::Text(s) => parse_amount(s),
            _ => None,
        }
    }
}

/// Parse a number that may use a decimal comma (`1234,5`).
pub fn parse_amount(raw: &str) -> Option<f64> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    s.parse::<f64>()
        .ok()
        .or_else(|| s.replace(',', ".").parse::<f64>().ok())
}

impl From<&Data> for Cell {
    fn from(data: &Data) -> Self {
        match data {
            Data::Empty => Cell::Empty,
            Data::String(s) => Cell::Text(s.clone()),
            Data::Float(f) => Cell::Number(*f),
            Data::Int(i) => Cell::Number(*i as f64),
            Data::Bool(b) => Cell::Text(b.to_string()),
            Data::DateTime(_) => data
                .as_datetime()
                .map(Cell::DateTime)
                .unwrap_or(Cell::Empty),
            Data::DateTimeIso(s) | Data::DurationIso(s) => Cell::Text(s.clone()),
            Data::Error(_) => Cell::Empty,
        }
    }
}

/// A parsed sheet: unique header names and the data rows below them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SheetTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl SheetTable {
    /// Build a table, suffixing repeated headers (`Cuentas`, `Cuentas.1`, ...).
    pub fn new(raw_headers: Vec<String>, rows: Vec<Vec<Cell>>) -> Self {
        let mut seen: HashMap<String, usize> = HashMap::new();
        let headers = raw_headers
            .into_iter()
            .map(|h| {
                let h = h.trim().to_string();
                let count = seen.entry(h.clone()).or_insert(0);
                let name = if *count == 0 {
                    h.clone()
                } else {
                    format!("{}.{}", h, count)
                };
                *count += 1;
                name
            })
            .collect();
        Self { headers, rows }
    }

    pub fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    pub fn require(&self, name: &str) -> Result<usize> {
        self.column(name)
            .ok_or_else(|| PipelineError::MissingColumn(name.to_string()))
    }
}

/// Cell at `col` of `row`, `Cell::Empty` past the end of short rows.
pub fn cell(row: &[Cell], col: Option<usize>) -> &Cell {
    static EMPTY: Cell = Cell::Empty;
    col.and_then(|c| row.get(c)).unwrap_or(&EMPTY)
}

/// Read one named sheet of a workbook. The first row is the header.
pub fn read_workbook(path: &Path, sheet_name: &str) -> Result<SheetTable> {
    let mut workbook = open_workbook_auto(path)?;

    if !workbook.sheet_names().iter().any(|s| s == sheet_name) {
        return Err(PipelineError::MissingSheet(sheet_name.to_string()));
    }
    let range = workbook.worksheet_range(sheet_name)?;

    let mut rows = range.rows();
    let headers: Vec<String> = match rows.next() {
        Some(header) => header
            .iter()
            .map(|c| Cell::from(c).as_text().unwrap_or_default())
            .collect(),
        None => return Ok(SheetTable::default()),
    };
    let data: Vec<Vec<Cell>> = rows.map(|r| r.iter().map(Cell::from).collect()).collect();

    tracing::debug!(sheet = sheet_name, rows = data.len(), "workbook sheet read");
    Ok(SheetTable::new(headers, data))
}

/// Decode bytes as UTF-8, falling back to Windows-1252 (the budget export is Latin-1).
pub fn decode_text(bytes: &[u8]) -> String {
    let text = match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => {
            let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
            decoded.into_owned()
        }
    };
    match text.strip_prefix('\u{feff}') {
        Some(stripped) => stripped.to_string(),
        None => text,
    }
}

/// Parse semicolon-delimited text. Every cell is text; short rows are allowed.
pub fn read_delimited(bytes: &[u8]) -> Result<SheetTable> {
    let content = decode_text(bytes);
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b';')
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());

    let headers: Vec<String> = reader.headers()?.iter().map(|h| h.to_string()).collect();

    let mut rows = Vec::new();
    for (line_idx, result) in reader.records().enumerate() {
        let record = match result {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(line = line_idx + 2, error = %e, "skipping unreadable CSV line");
                continue;
            }
        };
        rows.push(
            record
                .iter()
                .map(|field| {
                    if field.is_empty() {
                        Cell::Empty
                    } else {
                        Cell::Text(field.to_string())
                    }
                })
                .collect(),
        );
    }

    Ok(SheetTable::new(headers, rows))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_file_kind() {
        assert_eq!(FileKind::detect("export.xlsx"), Some(FileKind::Workbook));
        assert_eq!(FileKind::detect("2024/presupuesto.csv"), Some(FileKind::Delimited));
        assert_eq!(FileKind::detect("notes.txt"), None);
        assert_eq!(FileKind::detect("old.xls"), None);
        assert_eq!(FileKind::detect("xlsx"), None);
    }

    #[test]
    fn test_duplicate_headers_are_suffixed() {
        let table = SheetTable::new(
            vec!["Cuentas".into(), "PEN".into(), "Cuentas".into(), " Cuentas ".into()],
            vec![],
        );
        assert_eq!(table.headers, vec!["Cuentas", "PEN", "Cuentas.1", "Cuentas.2"]);
        assert_eq!(table.column("Cuentas.1"), Some(2));
    }

    #[test]
    fn test_require_missing_column() {
        let table = SheetTable::new(vec!["fecha".into()], vec![]);
        let err = table.require("presupuesto").unwrap_err();
        assert!(err.to_string().contains("presupuesto"));
    }

    #[test]
    fn test_read_delimited_semicolons() {
        let csv = "fecha;year;month;categoria;presupuesto\n2024-01-01;2024;1;Comida;500\n";
        let table = read_delimited(csv.as_bytes()).unwrap();
        assert_eq!(table.headers.len(), 5);
        assert_eq!(table.rows.len(), 1);
        assert_eq!(table.rows[0][3], Cell::Text("Comida".into()));
    }

    #[test]
    fn test_read_delimited_latin1() {
        // "categoría" and "Educación" encoded as Latin-1
        let mut bytes = b"fecha;categor".to_vec();
        bytes.push(0xED);
        bytes.extend_from_slice(b"a\n2024-01-01;Educaci");
        bytes.push(0xF3);
        bytes.extend_from_slice(b"n\n");

        let table = read_delimited(&bytes).unwrap();
        assert_eq!(table.headers[1], "categoría");
        assert_eq!(table.rows[0][1], Cell::Text("Educación".into()));
    }

    #[test]
    fn test_read_delimited_bom_and_blank_fields() {
        let csv = "\u{feff}fecha;categoria\n;Comida\n";
        let table = read_delimited(csv.as_bytes()).unwrap();
        assert_eq!(table.headers[0], "fecha");
        assert_eq!(table.rows[0][0], Cell::Empty);
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("45.50"), Some(45.5));
        assert_eq!(parse_amount(" 1234,5 "), Some(1234.5));
        assert_eq!(parse_amount(""), None);
        assert_eq!(parse_amount("n/a"), None);
    }

    #[test]
    fn test_cell_as_text_trims() {
        assert_eq!(Cell::Text("  Comida ".into()).as_text(), Some("Comida".into()));
        assert_eq!(Cell::Text("   ".into()).as_text(), None);
        assert_eq!(Cell::Empty.as_text(), None);
    }

    #[test]
    fn test_short_row_cell_is_empty() {
        let row = vec![Cell::Text("a".into())];
        assert_eq!(cell(&row, Some(3)), &Cell::Empty);
        assert_eq!(cell(&row, None), &Cell::Empty);
        assert_eq!(cell(&row, Some(0)), &Cell::Text("a".into()));
    }
}
