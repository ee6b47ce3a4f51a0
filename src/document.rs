//! Contenedor estructurado del documento: árbol de párrafos compuestos por
//! runs de texto con formato.
//!
//! El códec del formato de fichero externo (p.ej. DOCX → JSON) vive fuera de
//! este servicio; cuando un documento llega aquí ya es este árbol. La API
//! pública del módulo es la frontera con ese colaborador:
//!   - `decode(bytes)` / `encode(&tree)`
//!   - `visible_text(&tree)`

use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

/// Un run de texto con formato homogéneo dentro de un párrafo.
/// Los atributos son los mismos que preserva el motor de sustitución.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub text: String,
    #[serde(default)]
    pub bold: bool,
    #[serde(default)]
    pub italic: bool,
    /// Nombre de la fuente, si el contenedor lo especifica.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font: Option<String>,
    /// Tamaño en medios puntos, como lo guardan los contenedores ricos.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Paragraph {
    pub runs: Vec<Run>,
}

impl Paragraph {
    /// Texto visible del párrafo: concatenación de sus runs.
    pub fn text(&self) -> String {
        self.runs.iter().map(|r| r.text.as_str()).collect()
    }
}

/// Árbol completo del documento.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentTree {
    pub paragraphs: Vec<Paragraph>,
}

/// Decodifica los bytes subidos a un árbol de documento.
pub fn decode(bytes: &[u8]) -> AppResult<DocumentTree> {
    serde_json::from_slice(bytes)
        .map_err(|e| AppError::InvalidDocument(format!("no es un contenedor válido: {e}")))
}

/// Codifica el árbol de vuelta a bytes.
///
/// La salida es determinista: mismo árbol, mismos bytes. De ello depende la
/// idempotencia de la descarga del documento completado.
pub fn encode(tree: &DocumentTree) -> AppResult<Vec<u8>> {
    serde_json::to_vec_pretty(tree)
        .map_err(|e| AppError::SubstitutionFailure(format!("no se pudo serializar el árbol: {e}")))
}

/// Texto visible del documento completo, un párrafo por línea.
pub fn visible_text(tree: &DocumentTree) -> String {
    tree.paragraphs
        .iter()
        .map(|p| p.text())
        .collect::<Vec<_>>()
        .join("\n")
}
