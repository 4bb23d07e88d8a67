//! Installation pipeline: resolve, download, extract, validate, finalize.
//!
//! Installs widget packages from the remote registry into the widgets
//! directory. Every stage can abort the whole operation; any failure at or
//! after extraction rolls the target directory back so a failed install can
//! never leave a partially-installed widget the lifecycle manager could
//! later try to instantiate.

use crate::error::{HostError, HostResult};
use crate::manifest::{self, WidgetManifest};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};
use url::Url;
use widgetry_types::PluginId;
use zip::ZipArchive;

/// Registry connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Registry base URL, e.g. `https://registry.widgetry.app`.
    pub base_url: String,
    /// Timeout for the metadata resolve call.
    pub resolve_timeout: Duration,
    /// Timeout for the package download.
    pub download_timeout: Duration,
    /// Redirect ceiling for the download (loop protection).
    pub max_redirects: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            base_url: "https://registry.widgetry.app".to_string(),
            resolve_timeout: Duration::from_secs(30),
            download_timeout: Duration::from_secs(60),
            max_redirects: 5,
        }
    }
}

/// Metadata record returned by the registry for one widget.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryEntry {
    pub id: PluginId,
    pub version: String,
    pub download_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

/// Fetches, validates, and atomically installs widget packages.
pub struct Installer {
    config: RegistryConfig,
    widgets_dir: PathBuf,
    client: reqwest::Client,
}

impl Installer {
    pub fn new(config: RegistryConfig, widgets_dir: impl Into<PathBuf>) -> Self {
        let max_redirects = config.max_redirects;
        let redirect_policy = reqwest::redirect::Policy::custom(move |attempt| {
            if attempt.previous().len() >= max_redirects {
                return attempt.error("too many redirects");
            }
            if https_or_loopback(attempt.url()).is_err() {
                return attempt.error("redirected to a non-HTTPS URL");
            }
            attempt.follow()
        });
        let client = reqwest::Client::builder()
            .redirect(redirect_policy)
            .user_agent("Widgetry/1.0")
            .build()
            .expect("failed to create HTTP client");

        Self {
            config,
            widgets_dir: widgets_dir.into(),
            client,
        }
    }

    /// The directory widgets are installed under.
    pub fn widgets_dir(&self) -> &Path {
        &self.widgets_dir
    }

    /// Runs the full pipeline for one widget id.
    ///
    /// Re-installing an existing id overwrites the previous install in
    /// place; there is no merge.
    pub async fn install(&self, plugin_id: &PluginId) -> HostResult<WidgetManifest> {
        let entry = self.resolve(plugin_id).await?;
        let package = self.download(&entry).await?;

        let target = self.widgets_dir.join(plugin_id.as_str());
        match extract_and_validate(package.path(), &target, plugin_id) {
            Ok(manifest) => {
                // Finalize: the temp download is deleted on drop; the
                // download-counter notification must never fail the install.
                drop(package);
                self.notify_downloaded(plugin_id);
                info!(plugin_id = %plugin_id, version = %manifest.version, "widget installed");
                Ok(manifest)
            }
            Err(e) => {
                rollback(&target);
                Err(e)
            }
        }
    }

    /// Removes an installed widget directory.
    pub fn uninstall(&self, plugin_id: &PluginId) -> HostResult<()> {
        let target = self.widgets_dir.join(plugin_id.as_str());
        if !target.exists() {
            debug!(plugin_id = %plugin_id, "uninstall: nothing installed");
            return Ok(());
        }
        std::fs::remove_dir_all(&target)?;
        info!(plugin_id = %plugin_id, "widget uninstalled");
        Ok(())
    }

    /// Loads the manifest of an installed widget (fresh disk read).
    pub fn installed_manifest(&self, plugin_id: &PluginId) -> HostResult<WidgetManifest> {
        manifest::installed_manifest(&self.widgets_dir, plugin_id)
    }

    /// Enumerates installed widgets (fresh disk reads).
    pub fn list_installed(&self) -> Vec<WidgetManifest> {
        manifest::list_installed(&self.widgets_dir)
    }

    /// Stage 1: resolve the widget's registry metadata.
    async fn resolve(&self, plugin_id: &PluginId) -> HostResult<RegistryEntry> {
        let raw = format!(
            "{}/widgets/{}",
            self.config.base_url.trim_end_matches('/'),
            plugin_id
        );
        let url = Url::parse(&raw)
            .map_err(|e| HostError::InvalidConfig(format!("bad registry URL: {e}")))?;
        https_or_loopback(&url)?;

        let response = self
            .client
            .get(url)
            .timeout(self.config.resolve_timeout)
            .send()
            .await
            .map_err(|e| HostError::Network(format!("registry resolve failed: {e}")))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(HostError::InvalidConfig(format!(
                "widget '{plugin_id}' not found in registry"
            )));
        }
        if !response.status().is_success() {
            return Err(HostError::Network(format!(
                "registry returned HTTP {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| HostError::Network(format!("bad registry response: {e}")))
    }

    /// Stage 2: stream the package to a temporary file.
    ///
    /// The temp file is deleted on drop, so any failure on this path cleans
    /// up the partial download automatically.
    async fn download(&self, entry: &RegistryEntry) -> HostResult<NamedTempFile> {
        let url = Url::parse(&entry.download_url)
            .map_err(|e| HostError::InvalidConfig(format!("bad download URL: {e}")))?;
        https_or_loopback(&url)?;

        let mut response = self
            .client
            .get(url)
            .timeout(self.config.download_timeout)
            .send()
            .await
            .map_err(|e| HostError::Network(format!("package download failed: {e}")))?;

        if !response.status().is_success() {
            return Err(HostError::Network(format!(
                "package download returned HTTP {}",
                response.status()
            )));
        }

        let mut package = NamedTempFile::new()?;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| HostError::Network(format!("package download interrupted: {e}")))?
        {
            package.write_all(&chunk)?;
        }
        package.flush()?;
        Ok(package)
    }

    /// Stage 5 (partial): fire-and-forget download-counter notification.
    fn notify_downloaded(&self, plugin_id: &PluginId) {
        let url = format!(
            "{}/widgets/{}/downloads",
            self.config.base_url.trim_end_matches('/'),
            plugin_id
        );
        let client = self.client.clone();
        let plugin_id = plugin_id.clone();
        tokio::spawn(async move {
            match client
                .post(&url)
                .timeout(Duration::from_secs(10))
                .send()
                .await
            {
                Ok(resp) if !resp.status().is_success() => {
                    warn!(plugin_id = %plugin_id, status = %resp.status(), "download notify rejected");
                }
                Err(e) => {
                    warn!(plugin_id = %plugin_id, "download notify failed: {e}");
                }
                Ok(_) => {}
            }
        });
    }
}

/// Stages 3 and 4: unpack the archive into the target directory and
/// validate the shipped manifest against the requested id.
fn extract_and_validate(
    archive_path: &Path,
    target: &Path,
    plugin_id: &PluginId,
) -> HostResult<WidgetManifest> {
    if target.exists() {
        std::fs::remove_dir_all(target)?;
    }
    std::fs::create_dir_all(target)?;

    let file = std::fs::File::open(archive_path)?;
    let mut archive = ZipArchive::new(file)
        .map_err(|e| HostError::InvalidConfig(format!("unreadable package archive: {e}")))?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| HostError::InvalidConfig(format!("corrupt package archive: {e}")))?;
        // Zip-slip guard: entry paths must stay inside the target.
        let Some(relative) = entry.enclosed_name() else {
            return Err(HostError::InvalidConfig(format!(
                "package entry '{}' escapes the install directory",
                entry.name()
            )));
        };
        let dest = target.join(relative);
        if entry.is_dir() {
            std::fs::create_dir_all(&dest)?;
        } else {
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut out = std::fs::File::create(&dest)?;
            std::io::copy(&mut entry, &mut out)?;
        }
    }

    let manifest = WidgetManifest::load_from_dir(target)?;
    if manifest.id != *plugin_id {
        return Err(HostError::InvalidConfig(format!(
            "id mismatch: package declares '{}' but '{plugin_id}' was requested",
            manifest.id
        )));
    }
    Ok(manifest)
}

/// Recursively removes a failed install target; best-effort.
fn rollback(target: &Path) {
    if target.exists() {
        if let Err(e) = std::fs::remove_dir_all(target) {
            warn!(target = %target.display(), "install rollback failed: {e}");
        }
    }
}

/// HTTPS-only, with an explicit loopback allowance for local development
/// registries.
fn https_or_loopback(url: &Url) -> HostResult<()> {
    if url.scheme() == "https" {
        return Ok(());
    }
    let loopback = matches!(url.host_str(), Some("localhost") | Some("127.0.0.1"));
    if url.scheme() == "http" && loopback {
        return Ok(());
    }
    Err(HostError::InvalidConfig(format!(
        "registry URLs must use HTTPS: {url}"
    )))
}
