//! Errores tipados de la aplicación y su conversión a respuestas HTTP.

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

pub type AppResult<T> = Result<T, AppError>;

/// Taxonomía de errores del motor de rellenado.
///
/// Cada variante se distingue en la respuesta HTTP mediante el campo `kind`,
/// para que el frontend (u otro cliente) pueda reaccionar sin parsear el
/// mensaje en texto libre.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// La subida no es un documento estructurado válido.
    #[error("Documento inválido: {0}")]
    InvalidDocument(String),

    #[error("Sesión no encontrada")]
    SessionNotFound,

    /// Se intentó continuar una conversación que ya terminó.
    #[error("La sesión ya está completa")]
    SessionAlreadyComplete,

    /// Se pidió el documento completado sin haber terminado (y sin `force`).
    #[error("La conversación aún no está completa")]
    ConversationIncomplete,

    /// El proveedor de inferencia falló, devolvió una respuesta malformada
    /// o superó el timeout. La sesión queda intacta y se puede reintentar.
    #[error("Proveedor de inferencia no disponible: {0}")]
    InferenceUnavailable(String),

    /// El árbol del documento no se pudo reescribir.
    #[error("Fallo de sustitución: {0}")]
    SubstitutionFailure(String),
}

impl AppError {
    /// Discriminante estable para la API.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidDocument(_) => "invalid_document",
            Self::SessionNotFound => "session_not_found",
            Self::SessionAlreadyComplete => "session_already_complete",
            Self::ConversationIncomplete => "conversation_incomplete",
            Self::InferenceUnavailable(_) => "inference_unavailable",
            Self::SubstitutionFailure(_) => "substitution_failure",
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidDocument(_) => StatusCode::BAD_REQUEST,
            Self::SessionNotFound => StatusCode::NOT_FOUND,
            Self::SessionAlreadyComplete => StatusCode::CONFLICT,
            Self::ConversationIncomplete => StatusCode::BAD_REQUEST,
            Self::InferenceUnavailable(_) => StatusCode::BAD_GATEWAY,
            Self::SubstitutionFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let body = Json(json!({
            "error": self.to_string(),
            "kind": self.kind(),
        }));
        (self.status_code(), body).into_response()
    }
}
