use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use crate::{config::AppConfig, llm::InferenceProvider, session::SessionStore};

/// Estado compartido por todos los handlers. El registro de sesiones se
/// construye en el arranque y viaja por referencia: no hay singletons.
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub store: SessionStore,
    pub llm: Arc<dyn InferenceProvider>,
    pub shutdown_sender: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}
