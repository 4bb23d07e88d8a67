//! Capability model for widget permission gating.
//!
//! Capabilities form a closed set; a string outside it is a programming
//! error in the calling plugin and fails loudly with `InvalidConfig`
//! everywhere (never a silent `false`).

use crate::error::{HostError, HostResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A named, gate-able system privilege a plugin may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Capability {
    /// Read CPU model/load information.
    SystemInfoCpu,
    /// Read memory usage information.
    SystemInfoMemory,
    /// Make outbound network requests (to declared domains).
    Network,
}

impl Capability {
    /// All capabilities, in a stable order.
    pub const ALL: [Capability; 3] = [
        Capability::SystemInfoCpu,
        Capability::SystemInfoMemory,
        Capability::Network,
    ];

    /// Wire name as used in IPC calls and rate-limit keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SystemInfoCpu => "systemInfo.cpu",
            Self::SystemInfoMemory => "systemInfo.memory",
            Self::Network => "network",
        }
    }

    /// Human-readable label shown in consent prompts.
    pub fn label(&self) -> &'static str {
        match self {
            Self::SystemInfoCpu => "CPU information",
            Self::SystemInfoMemory => "memory usage information",
            Self::Network => "network access",
        }
    }

    /// Parses a wire capability string, failing loudly on anything outside
    /// the closed set.
    pub fn parse(s: &str) -> HostResult<Self> {
        match s {
            "systemInfo.cpu" => Ok(Self::SystemInfoCpu),
            "systemInfo.memory" => Ok(Self::SystemInfoMemory),
            "network" => Ok(Self::Network),
            other => Err(HostError::InvalidConfig(format!(
                "unknown capability '{other}'"
            ))),
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = HostError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// System-info capability grants.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemInfoCaps {
    pub cpu: bool,
    pub memory: bool,
}

/// Network capability grant plus the declared reachable domains.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkCaps {
    pub enabled: bool,
    #[serde(default)]
    pub allowed_domains: Vec<String>,
}

/// Persisted consent decisions for one plugin.
///
/// Default is everything denied: a manifest's declared capabilities are a
/// list of what may be *requested*, never an automatic grant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilitySet {
    #[serde(default)]
    pub system_info: SystemInfoCaps,
    #[serde(default)]
    pub network: NetworkCaps,
}

impl CapabilitySet {
    /// Returns the stored decision for a capability.
    pub fn is_granted(&self, capability: Capability) -> bool {
        match capability {
            Capability::SystemInfoCpu => self.system_info.cpu,
            Capability::SystemInfoMemory => self.system_info.memory,
            Capability::Network => self.network.enabled,
        }
    }

    /// Records a decision for one capability, leaving unrelated fields
    /// (including the network domain list) untouched.
    pub fn set_granted(&mut self, capability: Capability, granted: bool) {
        match capability {
            Capability::SystemInfoCpu => self.system_info.cpu = granted,
            Capability::SystemInfoMemory => self.system_info.memory = granted,
            Capability::Network => self.network.enabled = granted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parse_known_capabilities() {
        assert_eq!(
            Capability::parse("systemInfo.cpu").unwrap(),
            Capability::SystemInfoCpu
        );
        assert_eq!(
            Capability::parse("systemInfo.memory").unwrap(),
            Capability::SystemInfoMemory
        );
        assert_eq!(Capability::parse("network").unwrap(), Capability::Network);
    }

    #[test]
    fn parse_unknown_fails_loudly() {
        for bad in ["clipboard", "systemInfo", "", "NETWORK", "network "] {
            let err = Capability::parse(bad).unwrap_err();
            assert!(matches!(err, HostError::InvalidConfig(_)), "{bad}");
        }
    }

    #[test]
    fn wire_names_roundtrip() {
        for cap in Capability::ALL {
            assert_eq!(Capability::parse(cap.as_str()).unwrap(), cap);
        }
    }

    #[test]
    fn default_set_denies_everything() {
        let set = CapabilitySet::default();
        for cap in Capability::ALL {
            assert!(!set.is_granted(cap));
        }
    }

    #[test]
    fn set_granted_preserves_unrelated_fields() {
        let mut set = CapabilitySet {
            network: NetworkCaps {
                enabled: false,
                allowed_domains: vec!["api.example.com".into()],
            },
            ..Default::default()
        };

        set.set_granted(Capability::SystemInfoCpu, true);
        set.set_granted(Capability::Network, true);

        assert!(set.system_info.cpu);
        assert!(!set.system_info.memory);
        assert!(set.network.enabled);
        assert_eq!(set.network.allowed_domains, vec!["api.example.com"]);
    }

    #[test]
    fn serde_uses_camel_case() {
        let mut set = CapabilitySet::default();
        set.set_granted(Capability::Network, true);
        let json = serde_json::to_value(&set).unwrap();
        assert_eq!(json["systemInfo"]["cpu"], false);
        assert_eq!(json["network"]["enabled"], true);
        assert!(json["network"]["allowedDomains"].as_array().unwrap().is_empty());
    }

    #[test]
    fn deserialize_partial_set_fills_defaults() {
        let set: CapabilitySet =
            serde_json::from_str(r#"{"network": {"enabled": true}}"#).unwrap();
        assert!(set.network.enabled);
        assert!(!set.system_info.cpu);
    }
}
