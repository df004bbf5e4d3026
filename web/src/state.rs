//! Application state shared across HTTP handlers.

use std::sync::Arc;

use flashsale_core::GenerationManager;

/// Shared state injected into every handler.
///
/// Holds the generation manager rather than an engine: handlers resolve
/// the current engine per request, so a window rotation takes effect
/// without reconstructing the router.
#[derive(Clone)]
pub struct AppState {
    /// Owner of the current engine generation.
    pub manager: Arc<GenerationManager>,
}

impl AppState {
    /// Create state over a running generation manager.
    #[must_use]
    pub fn new(manager: Arc<GenerationManager>) -> Self {
        Self { manager }
    }
}
