//! Widget lifecycle manager.
//!
//! Top-level orchestrator: creates and destroys widget window instances,
//! tracks what is running, persists and restores session state, enforces
//! the concurrent-instance ceiling, and keeps the security policy engine in
//! step with the set of running widgets.
//!
//! Per-instance states run
//! `WindowCreated → ContentLoaded → Running → Closing → Destroyed`, with a
//! crash jumping straight to `Destroyed`. The pre-window requested phase is
//! transient inside `create_instance` (window creation is synchronous) and
//! is never observable.

use crate::capability::CapabilitySet;
use crate::error::{HostError, HostResult};
use crate::manifest::{self, WidgetSize};
use crate::security::SecurityPolicyEngine;
use crate::window::{Position, WindowHandle, WindowOptions, WindowSystem};
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use widgetry_store::{Namespace, WidgetStore};
use widgetry_types::{InstanceId, PluginId};

/// Ceiling on the graceful-exit animation before the window is
/// hard-destroyed.
pub const GRACEFUL_CLOSE_BUDGET: Duration = Duration::from_millis(300);

/// Base position for widgets with no saved geometry.
const DEFAULT_POSITION: Position = Position { x: 120, y: 120 };

/// Spread of the randomized offset applied to default positions so
/// freshly-created windows do not stack exactly.
const POSITION_JITTER: i32 = 48;

/// Host settings persisted in the `appSettings` namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppSettings {
    pub auto_restore: bool,
    pub max_instances: u32,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            auto_restore: true,
            max_instances: 10,
        }
    }
}

const SETTINGS_KEY: &str = "settings";

/// Observable lifecycle states of a widget instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    WindowCreated,
    ContentLoaded,
    Running,
    Closing,
    Destroyed,
}

/// One running, windowed activation of a widget.
pub struct RunningInstance {
    pub instance_id: InstanceId,
    pub plugin_id: PluginId,
    window: Box<dyn WindowHandle>,
    pub created_at: DateTime<Utc>,
    pub state: InstanceState,
}

/// Snapshot of an instance written on close and shutdown, read once at
/// startup for restoration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedInstanceState {
    pub plugin_id: PluginId,
    pub instance_id: InstanceId,
    pub position: Position,
    pub size: WidgetSize,
    pub is_running: bool,
    pub last_active: DateTime<Utc>,
    pub capability_snapshot: CapabilitySet,
}

/// Creates/destroys widget instances and owns the running-instance arena.
///
/// Instances are indexed by opaque [`InstanceId`] and never handed out by
/// reference; all mutation goes through this manager.
pub struct WidgetLifecycleManager {
    store: Arc<WidgetStore>,
    security: Arc<SecurityPolicyEngine>,
    windows: Arc<dyn WindowSystem>,
    widgets_dir: PathBuf,
    instances: HashMap<InstanceId, RunningInstance>,
}

impl WidgetLifecycleManager {
    pub fn new(
        store: Arc<WidgetStore>,
        security: Arc<SecurityPolicyEngine>,
        windows: Arc<dyn WindowSystem>,
        widgets_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            security,
            windows,
            widgets_dir: widgets_dir.into(),
            instances: HashMap::new(),
        }
    }

    /// Current host settings, defaulting (and persisting the default) when
    /// none are stored.
    pub fn settings(&self) -> HostResult<AppSettings> {
        Ok(self
            .store
            .get_or_default(Namespace::AppSettings, SETTINGS_KEY)?)
    }

    // ================================================================
    // Creation
    // ================================================================

    /// Creates a new instance of an installed widget.
    ///
    /// Fails with `InvalidConfig` when the plugin id is unknown or the
    /// running-instance ceiling is reached; no partial state is created in
    /// either case. Initial geometry comes from the most recent persisted
    /// state for the plugin, falling back to manifest defaults plus a
    /// randomized offset.
    pub fn create_instance(&mut self, plugin_id: &PluginId) -> HostResult<InstanceId> {
        self.spawn_instance(plugin_id, None)
    }

    fn spawn_instance(
        &mut self,
        plugin_id: &PluginId,
        geometry: Option<(Position, WidgetSize)>,
    ) -> HostResult<InstanceId> {
        let manifest = manifest::installed_manifest(&self.widgets_dir, plugin_id)?;

        let settings = self.settings()?;
        if self.instances.len() >= settings.max_instances as usize {
            return Err(HostError::InvalidConfig(format!(
                "instance ceiling reached ({} running, max {})",
                self.instances.len(),
                settings.max_instances
            )));
        }

        let (position, size) = match geometry.or_else(|| self.saved_geometry(plugin_id)) {
            Some(geometry) => geometry,
            None => {
                let mut rng = rand::thread_rng();
                let jitter = Position {
                    x: DEFAULT_POSITION.x + rng.gen_range(0..POSITION_JITTER),
                    y: DEFAULT_POSITION.y + rng.gen_range(0..POSITION_JITTER),
                };
                (jitter, manifest.sizes.default)
            }
        };

        let instance_id = InstanceId::new();

        // The content policy must be active before any widget script can
        // execute, so security registration precedes window creation.
        self.security
            .register_widget(plugin_id, &manifest.permissions.network.allowed_domains);

        let options = WindowOptions {
            plugin_id: plugin_id.clone(),
            entry_point: self
                .widgets_dir
                .join(plugin_id.as_str())
                .join(&manifest.entry_point),
            position,
            size,
            min_size: manifest.sizes.min,
            max_size: manifest.sizes.max,
        };
        let window = match self.windows.create_window(&options) {
            Ok(window) => window,
            Err(e) => {
                self.unregister_if_last(plugin_id);
                return Err(e);
            }
        };

        // Registered before content finishes loading, so a crash during
        // load still finds the instance and cleans it up.
        self.instances.insert(
            instance_id,
            RunningInstance {
                instance_id,
                plugin_id: plugin_id.clone(),
                window,
                created_at: Utc::now(),
                state: InstanceState::WindowCreated,
            },
        );

        info!(plugin_id = %plugin_id, instance_id = %instance_id, "widget instance created");
        Ok(instance_id)
    }

    /// Marks an instance's content as loaded (shell callback).
    pub fn notify_content_loaded(&mut self, instance_id: InstanceId) {
        if let Some(instance) = self.instances.get_mut(&instance_id) {
            instance.state = InstanceState::ContentLoaded;
        }
    }

    /// Marks an instance as fully running (shell callback, after first
    /// paint).
    pub fn notify_running(&mut self, instance_id: InstanceId) {
        if let Some(instance) = self.instances.get_mut(&instance_id) {
            instance.state = InstanceState::Running;
        }
    }

    // ================================================================
    // Teardown
    // ================================================================

    /// Closes an instance, persisting its final state first.
    ///
    /// Idempotent: closing an unknown id logs and returns Ok. The state
    /// write happens before the window handle is released so a crash
    /// mid-close cannot lose position data.
    pub async fn close_instance(&mut self, instance_id: InstanceId) -> HostResult<()> {
        let Some(mut instance) = self.instances.remove(&instance_id) else {
            info!(instance_id = %instance_id, "close for unknown instance, ignoring");
            return Ok(());
        };
        instance.state = InstanceState::Closing;

        let persist_result = self.persist_instance(&instance, false);
        if let Err(e) = &persist_result {
            warn!(instance_id = %instance_id, "failed to persist final state: {e}");
        }

        self.unregister_if_last(&instance.plugin_id);

        // Bounded graceful exit; a misbehaving animation cannot stall the
        // host past the budget.
        let _ = tokio::time::timeout(
            GRACEFUL_CLOSE_BUDGET,
            instance.window.close_graceful(GRACEFUL_CLOSE_BUDGET),
        )
        .await;
        instance.window.destroy();
        instance.state = InstanceState::Destroyed;

        info!(instance_id = %instance_id, plugin_id = %instance.plugin_id, "widget instance closed");
        persist_result
    }

    /// Cleans up after a render-process crash.
    ///
    /// Transitions straight to `Destroyed` (no graceful close) and performs
    /// the full cleanup; the widget is not recreated automatically. Returns
    /// the `InstanceCrashed` error for the shell to surface to any caller
    /// still awaiting this instance.
    pub fn handle_crash(&mut self, instance_id: InstanceId, message: &str) -> HostError {
        let crashed = HostError::InstanceCrashed {
            instance_id,
            message: message.to_string(),
        };
        let Some(mut instance) = self.instances.remove(&instance_id) else {
            warn!(instance_id = %instance_id, "crash report for unknown instance");
            return crashed;
        };
        warn!(
            instance_id = %instance_id,
            plugin_id = %instance.plugin_id,
            "widget render process gone: {message}"
        );

        if let Err(e) = self.persist_instance(&instance, false) {
            warn!(instance_id = %instance_id, "failed to persist state after crash: {e}");
        }
        self.unregister_if_last(&instance.plugin_id);
        instance.window.destroy();
        instance.state = InstanceState::Destroyed;
        crashed
    }

    // ================================================================
    // Session persistence
    // ================================================================

    /// Restores the previous session's running instances.
    ///
    /// No-op when auto-restore is disabled. Orphaned states (plugin no
    /// longer installed) are deleted and skipped; one entry failing to
    /// restore never aborts the rest. Returns the number of instances
    /// restored.
    pub fn restore_all(&mut self) -> HostResult<usize> {
        let settings = self.settings()?;
        if !settings.auto_restore {
            info!("auto-restore disabled, skipping session restore");
            return Ok(0);
        }

        let saved: Vec<(String, PersistedInstanceState)> =
            self.store.entries(Namespace::InstanceStates);
        let mut restored = 0;

        for (key, state) in saved {
            if !state.is_running {
                continue;
            }
            if manifest::installed_manifest(&self.widgets_dir, &state.plugin_id).is_err() {
                warn!(plugin_id = %state.plugin_id, "dropping state for uninstalled widget");
                if let Err(e) = self.store.delete(Namespace::InstanceStates, &key) {
                    warn!("failed to delete orphaned instance state: {e}");
                }
                continue;
            }

            match self.spawn_instance(&state.plugin_id, Some((state.position, state.size))) {
                Ok(new_id) => {
                    // The restored instance gets a fresh id; the superseded
                    // entry is replaced right away so a hard crash before
                    // the next shutdown still finds the session.
                    if let Err(e) = self.store.delete(Namespace::InstanceStates, &key) {
                        warn!("failed to delete superseded instance state: {e}");
                    }
                    if let Some(instance) = self.instances.get(&new_id) {
                        if let Err(e) = self.persist_instance(instance, true) {
                            warn!(instance_id = %new_id, "failed to persist restored state: {e}");
                        }
                    }
                    info!(plugin_id = %state.plugin_id, instance_id = %new_id, "widget restored");
                    restored += 1;
                }
                Err(e) => {
                    warn!(plugin_id = %state.plugin_id, "failed to restore widget: {e}");
                }
            }
        }
        Ok(restored)
    }

    /// Persists every running instance (`is_running=true`). A single
    /// instance's save failure is logged, not propagated.
    pub fn save_all_states(&self) {
        for instance in self.instances.values() {
            if let Err(e) = self.persist_instance(instance, true) {
                warn!(instance_id = %instance.instance_id, "failed to save instance state: {e}");
            }
        }
    }

    /// Shuts the session down: saves all running states, then releases
    /// every window without marking the instances closed, so the next
    /// startup can restore them.
    pub fn shutdown(&mut self) {
        self.save_all_states();
        for (_, mut instance) in self.instances.drain() {
            self.security.unregister_widget(&instance.plugin_id);
            instance.window.destroy();
        }
    }

    // ================================================================
    // Queries
    // ================================================================

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    /// Whether any instance of the plugin is currently running.
    pub fn is_running(&self, plugin_id: &PluginId) -> bool {
        self.instances.values().any(|i| i.plugin_id == *plugin_id)
    }

    pub fn instance_ids(&self) -> Vec<InstanceId> {
        self.instances.keys().copied().collect()
    }

    pub fn instance_state(&self, instance_id: InstanceId) -> Option<InstanceState> {
        self.instances.get(&instance_id).map(|i| i.state)
    }

    /// How long an instance has been up.
    pub fn instance_uptime(&self, instance_id: InstanceId) -> Option<chrono::Duration> {
        self.instances
            .get(&instance_id)
            .map(|i| Utc::now() - i.created_at)
    }

    // ================================================================
    // Internals
    // ================================================================

    fn persist_instance(&self, instance: &RunningInstance, is_running: bool) -> HostResult<()> {
        let bounds = instance.window.bounds();
        let snapshot: CapabilitySet = self
            .store
            .get(Namespace::CapabilitySets, instance.plugin_id.as_str())?
            .unwrap_or_default();
        let state = PersistedInstanceState {
            plugin_id: instance.plugin_id.clone(),
            instance_id: instance.instance_id,
            position: bounds.position,
            size: bounds.size,
            is_running,
            last_active: Utc::now(),
            capability_snapshot: snapshot,
        };
        self.store.set(
            Namespace::InstanceStates,
            &instance.instance_id.to_string(),
            &state,
        )?;
        Ok(())
    }

    fn unregister_if_last(&self, plugin_id: &PluginId) {
        if !self.is_running(plugin_id) {
            self.security.unregister_widget(plugin_id);
        }
    }

    /// Most recent persisted geometry for a plugin, if any.
    fn saved_geometry(&self, plugin_id: &PluginId) -> Option<(Position, WidgetSize)> {
        self.store
            .entries::<PersistedInstanceState>(Namespace::InstanceStates)
            .into_iter()
            .filter(|(_, s)| s.plugin_id == *plugin_id)
            .max_by_key(|(_, s)| s.last_active)
            .map(|(_, s)| (s.position, s.size))
    }
}
