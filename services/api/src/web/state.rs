//! services/api/src/web/state.rs
//!
//! Defines the application's shared state.

use std::sync::Arc;

use declarant_core::batch::BatchOrchestrator;
use declarant_core::ports::SessionStore;

use crate::config::Config;

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn SessionStore>,
    pub orchestrator: Arc<BatchOrchestrator>,
    pub config: Arc<Config>,
}
