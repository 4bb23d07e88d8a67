//! On-disk widget manifest (`widget.config.json`).
//!
//! The manifest is the plugin descriptor: identity, window sizing, and the
//! capabilities the widget may *request* (declaration is never a grant).
//! Manifests are re-read from disk on every enumeration; nothing is cached
//! across installs.

use crate::capability::{NetworkCaps, SystemInfoCaps};
use crate::error::{HostError, HostResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;
use widgetry_types::PluginId;

/// File name of the manifest inside an installed widget directory.
pub const MANIFEST_FILE: &str = "widget.config.json";

/// Author block (optional in the manifest).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WidgetAuthor {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// A window size in logical pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WidgetSize {
    pub width: u32,
    pub height: u32,
}

/// Default plus optional min/max window sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WidgetSizes {
    pub default: WidgetSize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<WidgetSize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<WidgetSize>,
}

/// Capabilities a widget declares it may request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeclaredCapabilities {
    pub system_info: SystemInfoCaps,
    pub network: NetworkCaps,
}

/// Parsed widget manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WidgetManifest {
    pub id: PluginId,
    pub name: String,
    pub display_name: String,
    pub version: String,
    pub entry_point: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<WidgetAuthor>,
    pub permissions: DeclaredCapabilities,
    pub sizes: WidgetSizes,
}

impl WidgetManifest {
    /// Validates structural constraints beyond what serde enforces.
    pub fn validate(&self) -> HostResult<()> {
        if self.name.is_empty() {
            return Err(HostError::InvalidConfig("manifest: name is required".into()));
        }
        if self.display_name.is_empty() {
            return Err(HostError::InvalidConfig(
                "manifest: displayName is required".into(),
            ));
        }
        if self.version.is_empty() {
            return Err(HostError::InvalidConfig(
                "manifest: version is required".into(),
            ));
        }
        if self.entry_point.is_empty() {
            return Err(HostError::InvalidConfig(
                "manifest: entryPoint is required".into(),
            ));
        }
        for (label, size) in [
            ("default", Some(self.sizes.default)),
            ("min", self.sizes.min),
            ("max", self.sizes.max),
        ] {
            if let Some(size) = size {
                if size.width == 0 || size.height == 0 {
                    return Err(HostError::InvalidConfig(format!(
                        "manifest: sizes.{label} must be positive"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Loads and validates the manifest in an installed widget directory.
    pub fn load_from_dir(dir: &Path) -> HostResult<Self> {
        let path = dir.join(MANIFEST_FILE);
        let contents = std::fs::read_to_string(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                HostError::InvalidConfig(format!(
                    "no manifest at {}",
                    path.display()
                ))
            } else {
                e.into()
            }
        })?;
        let manifest: WidgetManifest = serde_json::from_str(&contents)
            .map_err(|e| HostError::InvalidConfig(format!("manifest parse error: {e}")))?;
        manifest.validate()?;
        Ok(manifest)
    }
}

/// Loads the manifest for one installed plugin id.
///
/// Always hits the disk; there is no descriptor cache across installs.
pub fn installed_manifest(widgets_dir: &Path, plugin_id: &PluginId) -> HostResult<WidgetManifest> {
    WidgetManifest::load_from_dir(&widgets_dir.join(plugin_id.as_str()))
}

/// Enumerates all validly-installed widgets under the widgets root.
///
/// Directories without a parseable manifest are skipped with a warning; a
/// half-broken install must not block enumeration of the rest.
pub fn list_installed(widgets_dir: &Path) -> Vec<WidgetManifest> {
    let entries = match std::fs::read_dir(widgets_dir) {
        Ok(entries) => entries,
        Err(_) => return Vec::new(),
    };

    let mut manifests = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        match WidgetManifest::load_from_dir(&path) {
            Ok(manifest) => manifests.push(manifest),
            Err(e) => {
                warn!(dir = %path.display(), "skipping widget directory: {e}");
            }
        }
    }
    manifests.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));
    manifests
}
