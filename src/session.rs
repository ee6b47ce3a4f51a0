//! Sesiones de rellenado y su registro en memoria.
//!
//! Una sesión posee en exclusiva su documento original (inmutable), su
//! conjunto ordenado de placeholders, el mapa de valores resueltos y el
//! historial de conversación. Todo vive en memoria durante la vida del
//! proceso: no hay persistencia ni TTL, sólo el reset explícito del caller.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::document::DocumentTree;
use crate::extractor;

// --- Conversación ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Un turno de la conversación. El historial es append-only: los turnos se
/// ordenan por aparición y nunca se reescriben.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
    pub created_at: String,
}

impl ConversationTurn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            created_at: Utc::now().to_rfc3339(),
        }
    }
}

// --- Sesión ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    AwaitingFirstQuestion,
    InProgress,
    Complete,
}

/// Estado completo de una conversación de rellenado.
#[derive(Debug)]
pub struct Session {
    pub id: String,
    /// Bytes originales subidos. Nunca se mutan: la sustitución siempre
    /// produce un árbol derivado nuevo.
    pub original_bytes: Vec<u8>,
    pub tree: DocumentTree,
    pub document_text: String,
    /// Placeholders descubiertos en la creación, en orden de aparición.
    pub placeholders: Vec<String>,
    /// Placeholder → valor resuelto. Crece de forma monótona: una entrada
    /// puede sobrescribirse pero nunca eliminarse.
    pub values: HashMap<String, String>,
    pub history: Vec<ConversationTurn>,
    pub phase: SessionPhase,
}

impl Session {
    /// Crea una sesión nueva a partir del documento decodificado,
    /// descubriendo sus placeholders.
    pub fn new(original_bytes: Vec<u8>, tree: DocumentTree) -> Self {
        let document_text = crate::document::visible_text(&tree);
        let placeholders = extractor::extract_placeholders(&document_text);
        Self {
            id: Uuid::new_v4().to_string(),
            original_bytes,
            tree,
            document_text,
            placeholders,
            values: HashMap::new(),
            history: Vec::new(),
            phase: SessionPhase::AwaitingFirstQuestion,
        }
    }

    pub fn push_turn(&mut self, role: Role, content: impl Into<String>) {
        self.history.push(ConversationTurn::new(role, content));
    }

    /// Placeholders aún sin valor, en el orden del documento.
    pub fn unresolved(&self) -> Vec<String> {
        self.placeholders
            .iter()
            .filter(|p| !self.values.contains_key(*p))
            .cloned()
            .collect()
    }

    pub fn is_fully_resolved(&self) -> bool {
        self.placeholders.iter().all(|p| self.values.contains_key(p))
    }

    /// Fusiona bindings nuevos en el mapa de valores. La fusión es aditiva e
    /// idempotente: el último valor gana y nada se des-resuelve. Las claves
    /// que no correspondan a placeholders de la sesión se ignoran.
    ///
    /// Devuelve los placeholders afectados por esta fusión, en el orden del
    /// documento.
    pub fn merge_bindings(&mut self, bindings: &HashMap<String, String>) -> Vec<String> {
        let mut touched = Vec::new();
        for placeholder in &self.placeholders {
            if let Some(value) = bindings.get(placeholder) {
                self.values.insert(placeholder.clone(), value.clone());
                touched.push(placeholder.clone());
            }
        }
        touched
    }
}

// --- Registro de sesiones ---

/// Registro de sesiones en memoria, compartido por todos los handlers.
///
/// El mutex externo sólo protege el mapa y nunca se mantiene a través de un
/// await; el mutex asíncrono interno serializa las operaciones sobre una
/// misma sesión (una sola pregunta/respuesta en vuelo; las llamadas
/// concurrentes de más se encolan). Sesiones distintas no compiten.
#[derive(Clone, Default)]
pub struct SessionStore {
    sessions: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<Session>>>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registra la sesión y devuelve su identificador.
    pub fn create(&self, session: Session) -> String {
        let id = session.id.clone();
        self.sessions
            .lock()
            .unwrap()
            .insert(id.clone(), Arc::new(tokio::sync::Mutex::new(session)));
        id
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<tokio::sync::Mutex<Session>>> {
        self.sessions.lock().unwrap().get(session_id).cloned()
    }

    /// Destruye la sesión. Devuelve `false` si no existía.
    pub fn reset(&self, session_id: &str) -> bool {
        self.sessions.lock().unwrap().remove(session_id).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{DocumentTree, Paragraph, Run};

    fn tree_with_text(text: &str) -> DocumentTree {
        DocumentTree {
            paragraphs: vec![Paragraph {
                runs: vec![Run { text: text.into(), ..Default::default() }],
            }],
        }
    }

    fn session_with_text(text: &str) -> Session {
        Session::new(text.as_bytes().to_vec(), tree_with_text(text))
    }

    #[test]
    fn test_new_session_discovers_placeholders_in_order() {
        let s = session_with_text("De [A] a [B] pasando por [A] y [C]");
        assert_eq!(s.placeholders, vec!["[A]", "[B]", "[C]"]);
        assert_eq!(s.phase, SessionPhase::AwaitingFirstQuestion);
        assert!(s.values.is_empty());
    }

    #[test]
    fn test_merge_is_additive_and_last_value_wins() {
        let mut s = session_with_text("[A] y [B]");

        let mut first = HashMap::new();
        first.insert("[A]".to_string(), "uno".to_string());
        assert_eq!(s.merge_bindings(&first), vec!["[A]"]);

        // Re-binding: sobrescribe, nunca des-resuelve.
        let mut second = HashMap::new();
        second.insert("[A]".to_string(), "dos".to_string());
        second.insert("[X]".to_string(), "ignorado".to_string());
        assert_eq!(s.merge_bindings(&second), vec!["[A]"]);

        assert_eq!(s.values.get("[A]").unwrap(), "dos");
        assert!(!s.values.contains_key("[X]"));
        assert_eq!(s.unresolved(), vec!["[B]"]);
    }

    #[test]
    fn test_unresolved_follows_document_order() {
        let mut s = session_with_text("[A] [B] [C]");
        let mut bindings = HashMap::new();
        bindings.insert("[B]".to_string(), "valor".to_string());
        s.merge_bindings(&bindings);
        assert_eq!(s.unresolved(), vec!["[A]", "[C]"]);
        assert!(!s.is_fully_resolved());
    }

    #[test]
    fn test_store_create_get_reset() {
        let store = SessionStore::new();
        let id = store.create(session_with_text("[A]"));

        assert!(store.get(&id).is_some());
        assert!(store.get("no-existe").is_none());

        assert!(store.reset(&id));
        assert!(store.get(&id).is_none());
        assert!(!store.reset(&id));
    }

    #[test]
    fn test_sessions_are_independent() {
        let store = SessionStore::new();
        let id_a = store.create(session_with_text("[A]"));
        let id_b = store.create(session_with_text("[B]"));

        store.reset(&id_a);
        assert!(store.get(&id_b).is_some());
    }
}
