use crate::services::relay_service::RelayService;

/// Shared application state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub relay: RelayService,
    /// Public URL prefix used when building download links.
    pub base_url: String,
}
