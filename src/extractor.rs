//! Extracción de placeholders del texto del documento.
//!
//! Un placeholder es un token entre corchetes (`[CLIENT_NAME]`). Su grafía
//! literal, corchetes incluidos, es su identidad: la comparación es exacta,
//! sensible a mayúsculas y espacios. La clasificación semántica (si es una
//! fecha, un nombre...) no ocurre aquí sino en el proveedor de inferencia.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;

/// Identificadores entre corchetes: letras, dígitos, `_`, `-` y espacios.
/// No cruza saltos de línea ni corchetes anidados.
static PLACEHOLDER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[[A-Za-z0-9_\- ]+\]").expect("regex de placeholders"));

/// Devuelve los placeholders distintos del texto, en orden de primera
/// aparición. Un documento sin placeholders produce una lista vacía, que no
/// es un error: aguas abajo significa "documento completo de inmediato".
pub fn extract_placeholders(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut ordered = Vec::new();

    for m in PLACEHOLDER_RE.find_iter(text) {
        let token = m.as_str();
        if seen.insert(token.to_string()) {
            ordered.push(token.to_string());
        }
    }

    ordered
}
