//! Comment annotations: worked days and `token/ value` pairs

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use crate::records::Transaction;

const WORKED_DAYS_MARKER: &str = "dias trabajados";

/// Key whose value is the first word only.
const FIRST_WORD_KEY: &str = "C/";

static KEY_VALUE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*([^\s/]+/)\s+(.*)$").expect("valid key/value pattern"));

#[derive(Error, Debug, PartialEq)]
pub enum AnnotateError {
    #[error("Comment '{comment}' has the worked-days marker but no number")]
    WorkedDays { comment: String },
}

/// Lowercase and fold the accented `í` so the marker matches either spelling.
fn fold(comment: &str) -> String {
    comment.to_lowercase().replace('í', "i")
}

/// Extract the number next to "días trabajados".
///
/// `Ok(None)` when the marker is absent; an error when it is present but no
/// number can be read around it.
pub fn worked_days(comment: &str) -> Result<Option<f64>, AnnotateError> {
    let folded = fold(comment);
    let Some(at) = folded.find(WORKED_DAYS_MARKER) else {
        return Ok(None);
    };

    let without_marker = folded.replace(WORKED_DAYS_MARKER, "");
    if let Ok(days) = without_marker.trim().parse::<f64>() {
        return Ok(Some(days));
    }

    let after = folded[at + WORKED_DAYS_MARKER.len()..].trim();
    after
        .parse::<f64>()
        .map(Some)
        .map_err(|_| AnnotateError::WorkedDays {
            comment: comment.to_string(),
        })
}

/// Split a `token/ value` comment into its key (slash included) and value.
pub fn key_value(comment: &str) -> Option<(String, String)> {
    let caps = KEY_VALUE_RE.captures(comment)?;
    let key = caps.get(1)?.as_str().to_string();
    let rest = caps.get(2)?.as_str().trim();

    let value = if key == FIRST_WORD_KEY {
        rest.split_whitespace().next()?
    } else {
        rest
    };
    if value.is_empty() {
        return None;
    }

    Some((key, value.to_string()))
}

/// Derived fields for one comment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Annotations {
    pub dias_trabajados: Option<f64>,
    pub clave: Option<String>,
    pub valor: Option<String>,
}

pub fn annotate(comment: Option<&str>) -> Result<Annotations, AnnotateError> {
    let Some(comment) = comment else {
        return Ok(Annotations::default());
    };
    let (clave, valor) = match key_value(comment) {
        Some((k, v)) => (Some(k), Some(v)),
        None => (None, None),
    };
    Ok(Annotations {
        dias_trabajados: worked_days(comment)?,
        clave,
        valor,
    })
}

/// Fill the derived fields of every transaction from its comment.
pub fn annotate_transactions(txs: &mut [Transaction]) -> Result<(), AnnotateError> {
    for tx in txs.iter_mut() {
        let a = annotate(tx.comentario.as_deref())?;
        tx.dias_trabajados = a.dias_trabajados;
        tx.clave = a.clave;
        tx.valor = a.valor;
    }
    Ok(())
}
