//! Carga y gestión de configuración de la aplicación (servidor + LLM).

use std::env;
use anyhow::{anyhow, Result};

#[derive(Clone, Debug)]
pub enum LlmProvider {
    OpenAI,
    Gemini,
    Ollama,
}

impl LlmProvider {
    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "gemini" => Ok(Self::Gemini),
            "ollama" => Ok(Self::Ollama),
            other => Err(anyhow!("Proveedor LLM no soportado: {other}")),
        }
    }
}

/// Política para los placeholders sin resolver en una finalización forzada.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnresolvedPolicy {
    /// Se conserva el token literal (`[CLIENT_NAME]`) en la salida.
    Retain,
    /// Se sustituye por un marcador en blanco fijo.
    Blank,
}

impl UnresolvedPolicy {
    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "retain" => Ok(Self::Retain),
            "blank" => Ok(Self::Blank),
            other => Err(anyhow!("Política de no-resueltos no soportada: {other}")),
        }
    }
}

/// Configuración completa de la aplicación.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server_addr: String,

    pub llm_provider: LlmProvider,
    pub llm_chat_model: String,
    /// Timeout (en segundos) para cada llamada al proveedor de inferencia.
    pub llm_timeout_secs: u64,

    pub unresolved_policy: UnresolvedPolicy,
}

impl AppConfig {
    /// Carga la configuración desde variables de entorno (usando .env si existe).
    pub fn from_env() -> Result<Self> {
        let server_addr =
            env::var("SERVER_ADDR").unwrap_or_else(|_| "127.0.0.1:3322".to_string());

        let llm_provider_str =
            env::var("LLM_PROVIDER").unwrap_or_else(|_| "openai".to_string());
        let llm_provider = LlmProvider::from_str(&llm_provider_str)?;

        let llm_chat_model =
            env::var("LLM_CHAT_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());

        let llm_timeout_secs = env::var("LLM_TIMEOUT_SECS")
            .unwrap_or_else(|_| "60".to_string())
            .parse::<u64>()
            .map_err(|_| anyhow!("LLM_TIMEOUT_SECS debe ser un número de segundos"))?;

        let unresolved_policy_str =
            env::var("UNRESOLVED_POLICY").unwrap_or_else(|_| "retain".to_string());
        let unresolved_policy = UnresolvedPolicy::from_str(&unresolved_policy_str)?;

        Ok(Self {
            server_addr,
            llm_provider,
            llm_chat_model,
            llm_timeout_secs,
            unresolved_policy,
        })
    }
}
