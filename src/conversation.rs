//! Máquina de estados de la conversación de rellenado.
//!
//! Flujo: `AwaitingFirstQuestion` → `InProgress` → `Complete`. El estado
//! terminal se alcanza de forma natural (todos los placeholders resueltos) o
//! mediante una finalización forzada del caller.
//!
//! Invariantes que este módulo garantiza:
//!   - Las preguntas son estrictamente secuenciales: nunca hay dos preguntas
//!     abiertas a la vez.
//!   - Un fallo del proveedor es atómico: no se añade ningún turno ni se
//!     fusiona ningún binding, y reintentar la misma petición es seguro.
//!   - La completitud la decide esta máquina, no el proveedor: una sesión
//!     sólo se completa de forma natural cuando todos los placeholders
//!     tienen valor.

use std::future::Future;
use std::time::Duration;

use tracing::info;

use crate::error::{AppError, AppResult};
use crate::llm::InferenceProvider;
use crate::session::{ConversationTurn, Role, Session, SessionPhase};

/// Mensaje amable con el que se cierra la conversación, en lugar del JSON
/// crudo del proveedor.
pub const COMPLETION_MESSAGE: &str =
    "¡Perfecto! Ya tengo toda la información necesaria. Generando el documento completado...";

/// Resultado de arrancar la conversación.
#[derive(Debug)]
pub struct StartOutcome {
    /// Primera pregunta, o `None` si el documento ya estaba completo.
    pub message: Option<String>,
    pub is_complete: bool,
}

/// Resultado de procesar una respuesta del usuario.
#[derive(Debug)]
pub struct AnswerOutcome {
    pub message: String,
    pub is_complete: bool,
    /// Placeholders que esta respuesta dejó resueltos, en orden del documento.
    pub placeholders_filled: Vec<String>,
}

async fn with_timeout<T>(
    timeout: Duration,
    fut: impl Future<Output = AppResult<T>>,
) -> AppResult<T> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(AppError::InferenceUnavailable(format!(
            "La llamada al proveedor superó el timeout de {} segundos",
            timeout.as_secs()
        ))),
    }
}

/// Arranca la conversación de una sesión recién creada.
///
/// Un documento sin placeholders queda completo de inmediato, sin llamar al
/// proveedor ni formular pregunta alguna.
pub async fn start(
    session: &mut Session,
    provider: &dyn InferenceProvider,
    timeout: Duration,
) -> AppResult<StartOutcome> {
    if session.placeholders.is_empty() {
        session.phase = SessionPhase::Complete;
        info!("Sesión {} sin placeholders: completa de inmediato", session.id);
        return Ok(StartOutcome { message: None, is_complete: true });
    }

    let question = with_timeout(
        timeout,
        provider.infer_first_question(&session.document_text, &session.placeholders),
    )
    .await?;

    session.phase = SessionPhase::InProgress;
    session.push_turn(Role::Assistant, question.clone());

    Ok(StartOutcome { message: Some(question), is_complete: false })
}

/// Procesa una respuesta del usuario.
///
/// El proveedor recibe el historial con la respuesta ya al final, junto a
/// los placeholders pendientes. Sólo cuando responde con éxito se registran
/// el turno del usuario, los bindings y el siguiente turno del asistente.
pub async fn submit_answer(
    session: &mut Session,
    provider: &dyn InferenceProvider,
    timeout: Duration,
    text: &str,
) -> AppResult<AnswerOutcome> {
    if session.phase == SessionPhase::Complete {
        return Err(AppError::SessionAlreadyComplete);
    }

    // Historial candidato: el real más la respuesta entrante. La sesión no
    // se toca hasta que el proveedor conteste bien.
    let mut candidate_history = session.history.clone();
    candidate_history.push(ConversationTurn::new(Role::User, text));

    let unresolved = session.unresolved();
    let reply = with_timeout(
        timeout,
        provider.infer_bindings(&session.document_text, &candidate_history, &unresolved),
    )
    .await?;

    // Validación previa a cualquier mutación: si tras fusionar estos
    // bindings siguieran quedando placeholders pendientes, necesitamos una
    // pregunta de seguimiento. Una respuesta sin ella (aunque el proveedor
    // se declare "complete") es malformada.
    let would_remain: Vec<&String> = unresolved
        .iter()
        .filter(|p| !reply.bindings.contains_key(*p))
        .collect();

    if !would_remain.is_empty() && reply.next_question.is_none() {
        return Err(AppError::InferenceUnavailable(format!(
            "El proveedor no devolvió pregunta de seguimiento con {} placeholders pendientes",
            would_remain.len()
        )));
    }

    session.push_turn(Role::User, text);
    let placeholders_filled = session.merge_bindings(&reply.bindings);

    if session.is_fully_resolved() {
        session.phase = SessionPhase::Complete;
        session.push_turn(Role::Assistant, COMPLETION_MESSAGE);
        info!("Sesión {} completa de forma natural", session.id);
        return Ok(AnswerOutcome {
            message: COMPLETION_MESSAGE.to_string(),
            is_complete: true,
            placeholders_filled,
        });
    }

    session.phase = SessionPhase::InProgress;
    // Validado arriba: con pendientes siempre hay pregunta.
    let question = reply.next_question.unwrap_or_default();
    session.push_turn(Role::Assistant, question.clone());

    Ok(AnswerOutcome {
        message: question,
        is_complete: false,
        placeholders_filled,
    })
}

/// Finalización forzada: transición incondicional a `Complete`.
///
/// Los placeholders sin valor se tratan en la sustitución según la política
/// configurada, nunca aquí. Queda constancia en el historial como turno de
/// sistema.
pub fn force_complete(session: &mut Session) {
    if session.phase != SessionPhase::Complete {
        let pending = session.unresolved().len();
        info!(
            "Sesión {} forzada a completa con {} placeholders sin resolver",
            session.id, pending
        );
        session.phase = SessionPhase::Complete;
        session.push_turn(
            Role::System,
            format!("Finalización forzada con {pending} placeholders sin resolver."),
        );
    }
}
