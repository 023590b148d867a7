//! Canonical records and the warehouse schema of each destination table

use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;

use crate::warehouse::{Field, FieldKind, Value};

/// Income/expense marker from the `Ingreso/Gasto` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FlowType {
    Income,
    Expense,
}

impl FlowType {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "ingreso" | "income" => Some(Self::Income),
            "gasto" | "expense" => Some(Self::Expense),
            _ => None,
        }
    }

    /// Value stored in `ingreso_gasto`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Income => "Ingreso",
            Self::Expense => "Gasto",
        }
    }
}

/// A normalized transaction ready for routing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transaction {
    pub fecha: NaiveDate,
    pub cuenta: String,
    pub categoria: Option<String>,
    pub subcategoria: Option<String>,
    pub nota: Option<String>,
    /// `None` for exports without the `Ingreso/Gasto` column.
    pub ingreso_gasto: Option<FlowType>,
    pub importe: Option<f64>,
    pub moneda: String,
    pub importe_convertido: Option<f64>,
    pub tipo_cambio: Option<f64>,
    pub importe_original: Option<f64>,
    pub moneda_original: String,
    pub comentario: Option<String>,
    pub fecha_carga: NaiveDateTime,
    pub dias_trabajados: Option<f64>,
    pub clave: Option<String>,
    pub valor: Option<String>,
}

/// A monthly budget line from the CSV export.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BudgetEntry {
    pub fecha: NaiveDate,
    pub year: String,
    pub month: String,
    pub categoria: String,
    pub presupuesto: f64,
}

/// Destination table of a transaction, chosen by account name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Destination {
    Ledger,
    Emotional,
    Mileage,
}

impl Destination {
    pub const ALL: [Destination; 3] = [Self::Ledger, Self::Emotional, Self::Mileage];

    /// Exact match on the account name.
    pub fn for_account(account: &str) -> Self {
        match account {
            "Personal" => Self::Emotional,
            "Kilometraje" => Self::Mileage,
            _ => Self::Ledger,
        }
    }

    pub fn schema(&self) -> &'static [Field] {
        match self {
            Self::Ledger => LEDGER_SCHEMA,
            Self::Emotional | Self::Mileage => TRACKING_SCHEMA,
        }
    }

    pub fn includes_worked_days(&self) -> bool {
        matches!(self, Self::Ledger)
    }
}

const fn field(name: &'static str, kind: FieldKind) -> Field {
    Field { name, kind }
}

pub const LEDGER_SCHEMA: &[Field] = &[
    field("fecha", FieldKind::Date),
    field("cuenta", FieldKind::Text),
    field("categoria", FieldKind::Text),
    field("subcategoria", FieldKind::Text),
    field("nota", FieldKind::Text),
    field("ingreso_gasto", FieldKind::Text),
    field("importe", FieldKind::Float),
    field("moneda", FieldKind::Text),
    field("importe_convertido", FieldKind::Float),
    field("tipo_cambio", FieldKind::Float),
    field("importe_original", FieldKind::Float),
    field("moneda_original", FieldKind::Text),
    field("comentario", FieldKind::Text),
    field("fecha_carga", FieldKind::DateTime),
    field("dias_trabajados", FieldKind::Float),
    field("clave", FieldKind::Text),
    field("valor", FieldKind::Text),
];

/// Emotional and mileage tables: the ledger columns minus `dias_trabajados`.
pub const TRACKING_SCHEMA: &[Field] = &[
    field("fecha", FieldKind::Date),
    field("cuenta", FieldKind::Text),
    field("categoria", FieldKind::Text),
    field("subcategoria", FieldKind::Text),
    field("nota", FieldKind::Text),
    field("ingreso_gasto", FieldKind::Text),
    field("importe", FieldKind::Float),
    field("moneda", FieldKind::Text),
    field("importe_convertido", FieldKind::Float),
    field("tipo_cambio", FieldKind::Float),
    field("importe_original", FieldKind::Float),
    field("moneda_original", FieldKind::Text),
    field("comentario", FieldKind::Text),
    field("fecha_carga", FieldKind::DateTime),
    field("clave", FieldKind::Text),
    field("valor", FieldKind::Text),
];

pub const BUDGET_SCHEMA: &[Field] = &[
    field("fecha", FieldKind::Date),
    field("year", FieldKind::Text),
    field("month", FieldKind::Text),
    field("categoria", FieldKind::Text),
    field("presupuesto", FieldKind::Float),
];

impl Transaction {
    /// Row in the column order of `dest.schema()`.
    pub fn to_row(&self, dest: Destination) -> Vec<Value> {
        let mut row = vec![
            Value::Date(Some(self.fecha)),
            Value::Text(Some(self.cuenta.clone())),
            Value::Text(self.categoria.clone()),
            Value::Text(self.subcategoria.clone()),
            Value::Text(self.nota.clone()),
            Value::Text(self.ingreso_gasto.map(|f| f.as_str().to_string())),
            Value::Float(self.importe),
            Value::Text(Some(self.moneda.clone())),
            Value::Float(self.importe_convertido),
            Value::Float(self.tipo_cambio),
            Value::Float(self.importe_original),
            Value::Text(Some(self.moneda_original.clone())),
            Value::Text(self.comentario.clone()),
            Value::DateTime(Some(self.fecha_carga)),
        ];
        if dest.includes_worked_days() {
            row.push(Value::Float(self.dias_trabajados));
        }
        row.push(Value::Text(self.clave.clone()));
        row.push(Value::Text(self.valor.clone()));
        row
    }
}

impl BudgetEntry {
    pub fn to_row(&self) -> Vec<Value> {
        vec![
            Value::Date(Some(self.fecha)),
            Value::Text(Some(self.year.clone())),
            Value::Text(Some(self.month.clone())),
            Value::Text(Some(self.categoria.clone())),
            Value::Float(Some(self.presupuesto)),
        ]
    }
}
