use std::time::Duration;

use axum::{
    extract::{Json, Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::{
    app_state::AppState,
    conversation, document,
    error::AppError,
    session::{Role, Session, SessionPhase},
    substitute,
};

// --- Payloads y Respuestas de la API ---

#[derive(Deserialize)]
pub struct QuestionRequest {
    session_id: String,
    message: Option<String>,
}

#[derive(Serialize)]
pub struct QuestionResponse {
    message: Option<String>,
    is_complete: bool,
    session_id: String,
    placeholders_filled: Vec<String>,
}

#[derive(Serialize)]
pub struct UploadResponse {
    session_id: String,
    placeholders: Vec<String>,
    message: Option<String>,
    is_complete: bool,
}

#[derive(Deserialize)]
pub struct CompleteParams {
    session_id: String,
    #[serde(default)]
    force: bool,
}

#[derive(Serialize)]
pub struct CompleteResponse {
    session_id: String,
    completed_text: String,
    download_url: String,
    /// Mapeo placeholder → valor, para que el frontend resalte lo rellenado.
    replacements: serde_json::Value,
}

#[derive(Deserialize)]
pub struct ResetPayload {
    session_id: String,
}

// --- Router ---

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/api/upload", post(upload_handler))
        .route("/api/ask-question", post(ask_question_handler))
        .route("/api/complete-document", post(complete_document_handler))
        .route("/api/document/:session_id", get(document_handler))
        .route("/api/download/:session_id", get(download_handler))
        .route("/api/reset", post(reset_handler))
        .route("/api/health", get(health_handler))
        .route("/api/shutdown", post(shutdown_handler))
        .with_state(app_state)
}

fn llm_timeout(state: &AppState) -> Duration {
    Duration::from_secs(state.config.llm_timeout_secs)
}

// --- Handlers ---

/// Sube una plantilla, descubre sus placeholders y arranca la conversación.
/// Si el proveedor falla no queda ninguna sesión a medias registrada.
#[axum::debug_handler]
async fn upload_handler(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    let mut file_bytes: Option<Vec<u8>> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::InvalidDocument(format!("subida multipart inválida: {e}")))?
    {
        if field.name() == Some("file") {
            let bytes = field
                .bytes()
                .await
                .map_err(|e| AppError::InvalidDocument(format!("no se pudo leer el fichero: {e}")))?;
            file_bytes = Some(bytes.to_vec());
            break;
        }
    }

    let bytes = file_bytes
        .ok_or_else(|| AppError::InvalidDocument("falta el campo 'file'".to_string()))?;
    let tree = document::decode(&bytes)?;

    let mut session = Session::new(bytes, tree);
    info!(
        "Documento subido: {} párrafos, {} placeholders",
        session.tree.paragraphs.len(),
        session.placeholders.len()
    );

    let outcome = conversation::start(&mut session, state.llm.as_ref(), llm_timeout(&state)).await?;

    let placeholders = session.placeholders.clone();
    let session_id = state.store.create(session);

    Ok(Json(UploadResponse {
        session_id,
        placeholders,
        message: outcome.message,
        is_complete: outcome.is_complete,
    }))
}

/// Un turno de la conversación. Con `message` procesa la respuesta del
/// usuario; sin él, devuelve la última pregunta registrada (consulta de
/// sólo lectura, útil para reconectar sin avanzar el estado).
#[axum::debug_handler]
async fn ask_question_handler(
    State(state): State<AppState>,
    Json(payload): Json<QuestionRequest>,
) -> Result<Json<QuestionResponse>, AppError> {
    let handle = state
        .store
        .get(&payload.session_id)
        .ok_or(AppError::SessionNotFound)?;
    let mut session = handle.lock().await;

    match payload.message.as_deref().filter(|m| !m.trim().is_empty()) {
        Some(text) => {
            let outcome = conversation::submit_answer(
                &mut session,
                state.llm.as_ref(),
                llm_timeout(&state),
                text,
            )
            .await?;

            Ok(Json(QuestionResponse {
                message: Some(outcome.message),
                is_complete: outcome.is_complete,
                session_id: payload.session_id,
                placeholders_filled: outcome.placeholders_filled,
            }))
        }
        None => {
            let message = session
                .history
                .iter()
                .rev()
                .find(|t| t.role == Role::Assistant)
                .map(|t| t.content.clone());

            Ok(Json(QuestionResponse {
                message,
                is_complete: session.phase == SessionPhase::Complete,
                session_id: payload.session_id,
                placeholders_filled: Vec::new(),
            }))
        }
    }
}

/// Genera el documento completado. Sin `force` exige que la conversación
/// haya terminado; con `force` completa con lo que haya, aplicando la
/// política configurada a los placeholders sin resolver.
#[axum::debug_handler]
async fn complete_document_handler(
    State(state): State<AppState>,
    Query(params): Query<CompleteParams>,
) -> Result<Json<CompleteResponse>, AppError> {
    let handle = state
        .store
        .get(&params.session_id)
        .ok_or(AppError::SessionNotFound)?;
    let mut session = handle.lock().await;

    if session.phase != SessionPhase::Complete {
        if params.force {
            conversation::force_complete(&mut session);
        } else {
            return Err(AppError::ConversationIncomplete);
        }
    }

    let replacements = substitute::resolved_pairs(&session, state.config.unresolved_policy);
    let completed = substitute::apply_replacements(&session.tree, &replacements);
    let completed_text = document::visible_text(&completed);

    // El mapeo se emite en el orden del documento.
    let mut mapping = serde_json::Map::new();
    for placeholder in &session.placeholders {
        if let Some(value) = session.values.get(placeholder) {
            mapping.insert(placeholder.clone(), json!(value));
        }
    }

    info!(
        "Sesión {}: documento completado ({} sustituciones)",
        params.session_id,
        replacements.len()
    );

    Ok(Json(CompleteResponse {
        session_id: params.session_id.clone(),
        completed_text,
        download_url: format!("/api/download/{}", params.session_id),
        replacements: serde_json::Value::Object(mapping),
    }))
}

/// Devuelve el documento original para la vista previa.
#[axum::debug_handler]
async fn document_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let handle = state.store.get(&session_id).ok_or(AppError::SessionNotFound)?;
    let session = handle.lock().await;

    Ok((
        [
            (header::CONTENT_TYPE, "application/json"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"document.json\"",
            ),
        ],
        session.original_bytes.clone(),
    ))
}

/// Descarga del documento completado. Es un artefacto derivado: se regenera
/// en cada petición a partir del estado de la sesión, y con el mismo estado
/// la salida es idéntica byte a byte.
#[axum::debug_handler]
async fn download_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let handle = state.store.get(&session_id).ok_or(AppError::SessionNotFound)?;
    let session = handle.lock().await;

    if session.phase != SessionPhase::Complete {
        return Err(AppError::ConversationIncomplete);
    }

    let replacements = substitute::resolved_pairs(&session, state.config.unresolved_policy);
    let completed = substitute::apply_replacements(&session.tree, &replacements);
    let bytes = document::encode(&completed)?;

    Ok((
        [
            (header::CONTENT_TYPE, "application/json"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"completed_document.json\"",
            ),
        ],
        bytes,
    ))
}

/// Destruye una sesión de forma explícita.
#[axum::debug_handler]
async fn reset_handler(
    State(state): State<AppState>,
    Json(payload): Json<ResetPayload>,
) -> Result<Json<serde_json::Value>, AppError> {
    if !state.store.reset(&payload.session_id) {
        return Err(AppError::SessionNotFound);
    }
    info!("Sesión {} destruida", payload.session_id);
    Ok(Json(json!({ "message": "Sesión destruida." })))
}

#[axum::debug_handler]
async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

// --- Handler de Apagado ---

#[axum::debug_handler]
async fn shutdown_handler(State(state): State<AppState>) -> impl IntoResponse {
    info!("Petición de apagado recibida.");
    if let Some(sender) = state.shutdown_sender.lock().unwrap().take() {
        let _ = sender.send(());
    }
    StatusCode::OK
}
