//! Pluggable user-consent prompt for capability requests.

use crate::capability::Capability;
use async_trait::async_trait;
use widgetry_types::PluginId;

/// Everything the consent dialog needs to render.
#[derive(Debug, Clone)]
pub struct ConsentRequest {
    pub plugin_id: PluginId,
    /// Display name from the plugin's manifest.
    pub display_name: String,
    pub capability: Capability,
    /// Optional plugin-supplied justification shown to the user.
    pub reason: Option<String>,
}

/// A pluggable consent decision source.
///
/// The production implementation shows a dialog in the shell; the returned
/// future resolves when the user decides. There is no timeout: the user may
/// leave the dialog open indefinitely.
#[async_trait]
pub trait ConsentPrompt: Send + Sync {
    /// Asks the user to grant or deny one capability for one plugin.
    async fn request_consent(&self, request: ConsentRequest) -> bool;
}

/// Consent source with a fixed answer (for tests and headless runs).
pub struct StaticConsent(pub bool);

#[async_trait]
impl ConsentPrompt for StaticConsent {
    async fn request_consent(&self, _request: ConsentRequest) -> bool {
        self.0
    }
}
