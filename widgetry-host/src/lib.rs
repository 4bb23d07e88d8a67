//! Widget runtime host for Widgetry.
//!
//! Hosts third-party widget windows: drives each instance through its
//! lifecycle, brokers capability permissions with user consent and rate
//! limiting, installs packages from the remote registry, and enforces the
//! security policy on widget content and outbound requests.
//!
//! Widget code itself never links this crate; it talks to the host over the
//! IPC envelope defined in [`envelope`].

mod broker;
mod capability;
mod consent;
mod deeplink;
mod envelope;
mod error;
mod installer;
mod lifecycle;
mod manifest;
mod rate_limit;
mod security;
mod window;

pub use broker::PermissionBroker;
pub use capability::{Capability, CapabilitySet, NetworkCaps, SystemInfoCaps};
pub use consent::{ConsentPrompt, ConsentRequest, StaticConsent};
pub use deeplink::parse_install_link;
pub use envelope::{ErrorKind, IpcEnvelope, IpcError};
pub use error::{HostError, HostResult};
pub use installer::{Installer, RegistryConfig, RegistryEntry};
pub use lifecycle::{
    AppSettings, InstanceState, PersistedInstanceState, WidgetLifecycleManager,
    GRACEFUL_CLOSE_BUDGET,
};
pub use manifest::{
    DeclaredCapabilities, WidgetAuthor, WidgetManifest, WidgetSize, WidgetSizes, MANIFEST_FILE,
};
pub use rate_limit::{RateLimiter, RATE_LIMIT_MAX_CALLS, RATE_LIMIT_WINDOW};
pub use security::{normalize_domain, SecurityPolicyEngine};
pub use window::{
    HeadlessWindowSystem, Position, WindowBounds, WindowHandle, WindowOptions, WindowSystem,
};
