//! Shared application state.

use std::sync::Arc;

use tier_control::control::Client;

/// State handed to every handler: the control-plane client.
#[derive(Debug, Clone)]
pub struct AppState {
    /// The control plane everything is projected onto.
    pub control: Arc<Client>,
}

impl AppState {
    /// Wraps a control client.
    #[must_use]
    pub fn new(control: Client) -> Self {
        Self { control: Arc::new(control) }
    }
}
