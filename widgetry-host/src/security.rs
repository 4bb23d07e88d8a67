//! Security policy engine: content policy and outbound request filtering.
//!
//! Tracks the declared allowed domains of every running widget and derives
//! two enforcement surfaces from them: the content security policy injected
//! into the render boundary, and the request filter applied to every
//! outbound request.
//!
//! The CSP's network origins are the union over all currently registered
//! widgets (requests are not attributed to an originating window). A
//! stricter per-window attribution is a known future refinement.

use std::collections::BTreeMap;
use std::sync::Mutex;
use tracing::{debug, warn};
use url::Url;
use widgetry_types::PluginId;

/// Schemes allowed through the request filter regardless of host.
const ALLOWED_SCHEMES: [&str; 4] = ["https", "file", "data", "devtools"];

/// Maintains per-widget domain allowlists and enforces protocol/domain
/// filtering on outbound requests.
#[derive(Debug, Default)]
pub struct SecurityPolicyEngine {
    registered: Mutex<BTreeMap<PluginId, Vec<String>>>,
}

impl SecurityPolicyEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a running widget's declared domains.
    ///
    /// Each domain is normalized to an https origin first; entries that fail
    /// normalization (wildcards, angle brackets, unparseable hosts) are
    /// dropped with a warning rather than trusted. Must be called before the
    /// widget's content loads so the policy is active before any script runs.
    pub fn register_widget(&self, plugin_id: &PluginId, domains: &[String]) {
        let mut normalized = Vec::new();
        for raw in domains {
            match normalize_domain(raw) {
                Some(origin) => normalized.push(origin),
                None => {
                    warn!(plugin_id = %plugin_id, domain = %raw, "dropping invalid allowed domain");
                }
            }
        }
        debug!(plugin_id = %plugin_id, domains = normalized.len(), "security registration");
        self.registered
            .lock()
            .expect("security lock poisoned")
            .insert(plugin_id.clone(), normalized);
    }

    /// Removes a widget's domains from the live policy.
    pub fn unregister_widget(&self, plugin_id: &PluginId) {
        self.registered
            .lock()
            .expect("security lock poisoned")
            .remove(plugin_id);
    }

    /// Whether a plugin is currently registered.
    pub fn is_registered(&self, plugin_id: &PluginId) -> bool {
        self.registered
            .lock()
            .expect("security lock poisoned")
            .contains_key(plugin_id)
    }

    /// Builds the content security policy for widget render surfaces.
    ///
    /// Network-reachable origins are the union of all registered widgets'
    /// allowed domains plus the implicit self-origin.
    pub fn content_security_policy(&self) -> String {
        let registered = self.registered.lock().expect("security lock poisoned");
        let mut origins: Vec<&str> = registered
            .values()
            .flatten()
            .map(String::as_str)
            .collect();
        origins.sort_unstable();
        origins.dedup();

        let origins = if origins.is_empty() {
            String::new()
        } else {
            format!(" {}", origins.join(" "))
        };

        format!(
            "default-src 'self'; script-src 'self'; style-src 'self' 'unsafe-inline'; \
             img-src 'self' data:{origins}; connect-src 'self'{origins}"
        )
    }

    /// Request filter for outbound traffic from widget windows.
    ///
    /// Allows the safe scheme set plus local loopback hosts; plain HTTP is
    /// unconditionally blocked regardless of any per-widget allowlist.
    pub fn is_request_allowed(&self, request_url: &str) -> bool {
        let Ok(url) = Url::parse(request_url) else {
            return false;
        };
        let scheme = url.scheme();
        if scheme == "http" {
            return false;
        }
        if ALLOWED_SCHEMES.contains(&scheme) {
            return true;
        }
        matches!(url.host_str(), Some("localhost") | Some("127.0.0.1"))
    }
}

/// Normalizes a declared domain into an https origin string.
///
/// Returns `None` for wildcard or angle-bracket patterns, embedded
/// whitespace, or anything that does not parse to a plain host. The scheme
/// is forced to https regardless of what was declared.
pub fn normalize_domain(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty()
        || trimmed.contains('*')
        || trimmed.contains('<')
        || trimmed.contains('>')
        || trimmed.chars().any(char::is_whitespace)
    {
        return None;
    }

    // Strip a declared scheme; anything other than http(s) is not a domain.
    let host_part = match trimmed.split_once("://") {
        Some(("http" | "https", rest)) => rest,
        Some(_) => return None,
        None => trimmed,
    };
    let host_part = host_part.trim_end_matches('/');

    let url = Url::parse(&format!("https://{host_part}")).ok()?;
    let host = url.host_str()?;
    if url.path() != "/" || url.query().is_some() || !url.username().is_empty() {
        return None;
    }
    match url.port() {
        Some(port) => Some(format!("https://{host}:{port}")),
        None => Some(format!("https://{host}")),
    }
}
