//! Abstracción sobre Rig para trabajar con distintos proveedores de LLM.
//! De momento se implementa OpenAI; Gemini/Ollama quedan preparados para el futuro.
//!
//! El proveedor de inferencia es un colaborador opaco con dos capacidades:
//! proponer la siguiente pregunta y deducir bindings placeholder → valor de
//! la respuesta del usuario. Cualquier backend que cumpla el trait sirve.

use std::collections::HashMap;

use async_trait::async_trait;
use rig::completion::Prompt;
use serde::Deserialize;

use crate::config::{AppConfig, LlmProvider};
use crate::error::{AppError, AppResult};
use crate::session::{ConversationTurn, Role};

/// Interpretación de la última respuesta del usuario.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ParsedReply {
    /// Bindings deducidos de la respuesta. Las claves son los tokens
    /// literales del documento, corchetes incluidos.
    #[serde(default)]
    pub bindings: HashMap<String, String>,
    /// Siguiente pregunta al usuario, si falta información.
    #[serde(default)]
    pub next_question: Option<String>,
    /// Señal de que el proveedor cree tener toda la información.
    #[serde(default)]
    pub complete: bool,
}

/// Capacidades que el motor de conversación exige al proveedor.
#[async_trait]
pub trait InferenceProvider: Send + Sync {
    /// Primera pregunta de la conversación, a partir del documento completo
    /// y su conjunto de placeholders.
    async fn infer_first_question(
        &self,
        document_text: &str,
        placeholders: &[String],
    ) -> AppResult<String>;

    /// Interpreta el historial (con la última respuesta del usuario ya al
    /// final) y devuelve bindings más la siguiente pregunta o la señal de
    /// completitud.
    async fn infer_bindings(
        &self,
        document_text: &str,
        history: &[ConversationTurn],
        unresolved: &[String],
    ) -> AppResult<ParsedReply>;
}

// ---------------------------------------------------------------------
// Implementación sobre Rig (OpenAI)
// ---------------------------------------------------------------------

/// Proveedor real construido sobre Rig.
#[derive(Debug, Clone)]
pub struct RigInference {
    pub provider: LlmProvider,
    pub chat_model: String,
}

impl RigInference {
    /// Construye el proveedor a partir de la configuración.
    pub fn from_config(cfg: &AppConfig) -> anyhow::Result<Self> {
        Ok(Self {
            provider: cfg.llm_provider.clone(),
            chat_model: cfg.llm_chat_model.clone(),
        })
    }

    fn model_name(&self) -> &str {
        if self.chat_model.is_empty() {
            "gpt-4o-mini"
        } else {
            self.chat_model.as_str()
        }
    }

    fn ensure_openai(&self) -> AppResult<()> {
        match self.provider {
            LlmProvider::OpenAI => Ok(()),
            ref other => Err(AppError::InferenceUnavailable(format!(
                "Proveedor LLM {other:?} aún no implementado"
            ))),
        }
    }

    async fn prompt_openai(&self, preamble: &str, input: &str) -> AppResult<String> {
        use rig::providers::openai;
        // Trait para client.agent(...)
        use rig::client::CompletionClient as _;

        let client = openai::Client::from_env();
        let agent = client
            .agent(self.model_name())
            .preamble(preamble)
            .build();

        agent
            .prompt(input)
            .await
            .map_err(|e| AppError::InferenceUnavailable(e.to_string()))
    }
}

const FIRST_QUESTION_PROMPT: &str = r#"
Eres un asistente que ayuda a completar plantillas de documentos.
El documento contiene placeholders entre corchetes (ej: [CLIENT_NAME]) que hay que rellenar con información del usuario.

REGLAS:
1. NUNCA inventes valores: toda la información sale de las respuestas del usuario.
2. Pregunta UNA sola cosa cada vez, de forma amable y conversacional.
3. Apóyate en el contexto del documento para que la pregunta sea específica (ej: "Veo que es un contrato de servicios. ¿Cuál es el nombre legal completo del cliente?").
4. Responde en el idioma del documento.

Devuelve únicamente el texto de la primera pregunta, sin explicaciones adicionales.
"#;

const INTERPRET_PROMPT: &str = r#"
Eres un asistente que ayuda a completar plantillas de documentos con placeholders entre corchetes.
Recibirás el documento, el historial de la conversación (la última entrada es la respuesta más reciente del usuario) y la lista de placeholders aún sin resolver.

Tu tarea:
1. Deduce de la respuesta del usuario los valores de cero o más placeholders pendientes.
2. Si queda información por pedir, formula la siguiente pregunta (una sola, referida únicamente a los placeholders pendientes).
3. Si ya no falta nada, marca la conversación como completa.

La salida DEBE ser un único objeto JSON válido con estas claves:
- "bindings": objeto que mapea cada token literal del documento (con corchetes, ej "[CLIENT_NAME]") a su valor. Incluye SOLO valores que el usuario haya proporcionado.
- "next_question": la siguiente pregunta, o null si no hay más.
- "complete": true si toda la información está recogida, false en caso contrario.

No incluyas explicaciones, solo el JSON.
"#;

#[async_trait]
impl InferenceProvider for RigInference {
    async fn infer_first_question(
        &self,
        document_text: &str,
        placeholders: &[String],
    ) -> AppResult<String> {
        self.ensure_openai()?;

        let input = format!(
            "Documento:\n{}\n\nPlaceholders detectados: {}",
            document_text,
            placeholders.join(", ")
        );

        let question = self.prompt_openai(FIRST_QUESTION_PROMPT, &input).await?;
        let question = question.trim();
        if question.is_empty() {
            return Err(AppError::InferenceUnavailable(
                "El proveedor devolvió una pregunta vacía".to_string(),
            ));
        }
        Ok(question.to_string())
    }

    async fn infer_bindings(
        &self,
        document_text: &str,
        history: &[ConversationTurn],
        unresolved: &[String],
    ) -> AppResult<ParsedReply> {
        self.ensure_openai()?;

        let input = format!(
            "Documento:\n{}\n\nConversación hasta ahora:\n{}\n\nPlaceholders pendientes: {}",
            document_text,
            render_history(history),
            unresolved.join(", ")
        );

        let raw = self.prompt_openai(INTERPRET_PROMPT, &input).await?;
        parse_reply(&raw)
    }
}

fn render_history(history: &[ConversationTurn]) -> String {
    history
        .iter()
        .map(|turn| {
            let who = match turn.role {
                Role::System => "Sistema",
                Role::User => "Usuario",
                Role::Assistant => "Asistente",
            };
            format!("{who}: {}", turn.content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Limpia la respuesta del LLM y la parsea como `ParsedReply`.
///
/// Quita los bloques de código markdown y, si aún no parsea, intenta con el
/// fragmento entre la primera `{` y la última `}`. Una respuesta que no
/// contiene JSON válido es un fallo del proveedor, no se recupera en
/// silencio.
fn parse_reply(raw: &str) -> AppResult<ParsedReply> {
    let cleaned = clean_json_reply(raw);
    if let Ok(reply) = serde_json::from_str::<ParsedReply>(&cleaned) {
        return Ok(reply);
    }

    if let (Some(start), Some(end)) = (raw.find('{'), raw.rfind('}')) {
        if end > start {
            if let Ok(reply) = serde_json::from_str::<ParsedReply>(&raw[start..=end]) {
                return Ok(reply);
            }
        }
    }

    Err(AppError::InferenceUnavailable(format!(
        "Respuesta del proveedor malformada: '{}'",
        raw.chars().take(200).collect::<String>()
    )))
}

fn clean_json_reply(raw: &str) -> String {
    let mut s = raw.trim();
    if let Some(rest) = s.strip_prefix("```json") {
        s = rest;
    }
    if let Some(rest) = s.strip_prefix("```") {
        s = rest;
    }
    if let Some(rest) = s.strip_suffix("```") {
        s = rest;
    }
    s.trim().to_string()
}

// ---------------------------------------------------------------------
// Mock determinista para tests
// ---------------------------------------------------------------------


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_reply_plain_json() {
        let reply = parse_reply(
            r#"{"bindings": {"[DATE]": "2024-01-01"}, "next_question": "¿Y el cliente?", "complete": false}"#,
        )
        .unwrap();
        assert_eq!(reply.bindings.get("[DATE]").unwrap(), "2024-01-01");
        assert_eq!(reply.next_question.as_deref(), Some("¿Y el cliente?"));
        assert!(!reply.complete);
    }

    #[test]
    fn test_parse_reply_strips_markdown_fences() {
        let raw = "```json\n{\"bindings\": {}, \"next_question\": null, \"complete\": true}\n```";
        let reply = parse_reply(raw).unwrap();
        assert!(reply.complete);
        assert!(reply.bindings.is_empty());
    }

    #[test]
    fn test_parse_reply_extracts_embedded_object() {
        let raw = "Claro, aquí tienes:\n{\"bindings\": {\"[A]\": \"1\"}, \"complete\": false}\nEspero que sirva.";
        let reply = parse_reply(raw).unwrap();
        assert_eq!(reply.bindings.get("[A]").unwrap(), "1");
    }

    #[test]
    fn test_parse_reply_rejects_non_json() {
        let err = parse_reply("no hay json por ninguna parte").unwrap_err();
        assert_eq!(err.kind(), "inference_unavailable");
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let reply = parse_reply(r#"{"bindings": {"[A]": "1"}}"#).unwrap();
        assert!(reply.next_question.is_none());
        assert!(!reply.complete);
    }
}
