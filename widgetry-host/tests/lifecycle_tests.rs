use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use widgetry_host::{
    AppSettings, HeadlessWindowSystem, HostError, InstanceState, PersistedInstanceState,
    SecurityPolicyEngine, WidgetLifecycleManager,
};
use widgetry_store::{Namespace, WidgetStore};
use widgetry_types::PluginId;

fn plugin(id: &str) -> PluginId {
    PluginId::new(id).unwrap()
}

/// Writes a valid installed widget under the widgets root.
fn install_widget(widgets_dir: &Path, id: &str, domains: &[&str]) {
    let dir = widgets_dir.join(id);
    std::fs::create_dir_all(&dir).unwrap();
    let manifest = serde_json::json!({
        "id": id,
        "name": id,
        "displayName": format!("The {id} widget"),
        "version": "1.0.0",
        "entryPoint": "index.html",
        "permissions": {
            "systemInfo": {"cpu": true, "memory": false},
            "network": {"enabled": !domains.is_empty(), "allowedDomains": domains}
        },
        "sizes": {"default": {"width": 320, "height": 240}}
    });
    std::fs::write(dir.join("widget.config.json"), manifest.to_string()).unwrap();
    std::fs::write(dir.join("index.html"), "<html></html>").unwrap();
}

struct Fixture {
    store: Arc<WidgetStore>,
    security: Arc<SecurityPolicyEngine>,
    widgets: TempDir,
}

impl Fixture {
    fn new() -> Self {
        Self {
            store: Arc::new(WidgetStore::open_in_memory()),
            security: Arc::new(SecurityPolicyEngine::new()),
            widgets: TempDir::new().unwrap(),
        }
    }

    fn manager(&self) -> WidgetLifecycleManager {
        WidgetLifecycleManager::new(
            self.store.clone(),
            self.security.clone(),
            Arc::new(HeadlessWindowSystem),
            self.widgets.path(),
        )
    }
}

// ── Creation and state transitions ──────────────────────────────

#[test]
fn create_instance_walks_the_state_machine() {
    let fx = Fixture::new();
    install_widget(fx.widgets.path(), "clock", &[]);
    let mut manager = fx.manager();

    let id = manager.create_instance(&plugin("clock")).unwrap();
    assert_eq!(manager.instance_state(id), Some(InstanceState::WindowCreated));
    assert_eq!(manager.instance_count(), 1);
    assert!(manager.is_running(&plugin("clock")));

    manager.notify_content_loaded(id);
    assert_eq!(manager.instance_state(id), Some(InstanceState::ContentLoaded));

    manager.notify_running(id);
    assert_eq!(manager.instance_state(id), Some(InstanceState::Running));
}

#[test]
fn create_instance_of_uninstalled_widget_fails() {
    let fx = Fixture::new();
    let mut manager = fx.manager();

    let err = manager.create_instance(&plugin("ghost")).unwrap_err();
    assert!(matches!(err, HostError::InvalidConfig(_)));
    assert_eq!(manager.instance_count(), 0);
    assert!(!fx.security.is_registered(&plugin("ghost")));
}

#[test]
fn security_registration_precedes_content() {
    let fx = Fixture::new();
    install_widget(fx.widgets.path(), "weather", &["wx.example.com"]);
    let mut manager = fx.manager();

    manager.create_instance(&plugin("weather")).unwrap();
    assert!(fx.security.is_registered(&plugin("weather")));
    assert!(fx
        .security
        .content_security_policy()
        .contains("https://wx.example.com"));
}

#[test]
fn instance_ceiling_rejects_the_eleventh() {
    let fx = Fixture::new();
    install_widget(fx.widgets.path(), "clock", &[]);
    let mut manager = fx.manager();

    for _ in 0..10 {
        manager.create_instance(&plugin("clock")).unwrap();
    }
    let err = manager.create_instance(&plugin("clock")).unwrap_err();
    assert!(matches!(err, HostError::InvalidConfig(_)));
    assert_eq!(manager.instance_count(), 10);
}

#[test]
fn ceiling_is_configurable() {
    let fx = Fixture::new();
    install_widget(fx.widgets.path(), "clock", &[]);
    fx.store
        .set(
            Namespace::AppSettings,
            "settings",
            &AppSettings {
                auto_restore: true,
                max_instances: 2,
            },
        )
        .unwrap();
    let mut manager = fx.manager();

    manager.create_instance(&plugin("clock")).unwrap();
    manager.create_instance(&plugin("clock")).unwrap();
    assert!(manager.create_instance(&plugin("clock")).is_err());
}

#[test]
fn instance_uptime_tracks_creation() {
    let fx = Fixture::new();
    install_widget(fx.widgets.path(), "clock", &[]);
    let mut manager = fx.manager();

    let id = manager.create_instance(&plugin("clock")).unwrap();
    let uptime = manager.instance_uptime(id).unwrap();
    assert!(uptime.num_milliseconds() >= 0);

    assert!(manager
        .instance_uptime(widgetry_types::InstanceId::new())
        .is_none());
}

// ── Close ───────────────────────────────────────────────────────

#[tokio::test]
async fn close_persists_final_state_and_unregisters() {
    let fx = Fixture::new();
    install_widget(fx.widgets.path(), "weather", &["wx.example.com"]);
    let mut manager = fx.manager();

    let id = manager.create_instance(&plugin("weather")).unwrap();
    manager.close_instance(id).await.unwrap();

    assert_eq!(manager.instance_count(), 0);
    assert!(!fx.security.is_registered(&plugin("weather")));

    let saved: Option<PersistedInstanceState> = fx
        .store
        .get(Namespace::InstanceStates, &id.to_string())
        .unwrap();
    let saved = saved.unwrap();
    assert!(!saved.is_running);
    assert_eq!(saved.plugin_id, plugin("weather"));
    assert_eq!(saved.size.width, 320);
}

#[tokio::test]
async fn close_keeps_policy_while_siblings_run() {
    let fx = Fixture::new();
    install_widget(fx.widgets.path(), "weather", &["wx.example.com"]);
    let mut manager = fx.manager();

    let first = manager.create_instance(&plugin("weather")).unwrap();
    let _second = manager.create_instance(&plugin("weather")).unwrap();

    manager.close_instance(first).await.unwrap();
    assert!(fx.security.is_registered(&plugin("weather")));
}

#[tokio::test]
async fn close_is_idempotent() {
    let fx = Fixture::new();
    install_widget(fx.widgets.path(), "clock", &[]);
    let mut manager = fx.manager();

    let id = manager.create_instance(&plugin("clock")).unwrap();
    manager.close_instance(id).await.unwrap();
    manager.close_instance(id).await.unwrap();
    assert_eq!(manager.instance_count(), 0);
}

// ── Crash handling ──────────────────────────────────────────────

#[test]
fn crash_destroys_and_persists_not_running() {
    let fx = Fixture::new();
    install_widget(fx.widgets.path(), "clock", &[]);
    let mut manager = fx.manager();

    let id = manager.create_instance(&plugin("clock")).unwrap();
    let err = manager.handle_crash(id, "render process gone");
    assert!(matches!(err, HostError::InstanceCrashed { .. }));

    assert_eq!(manager.instance_count(), 0);
    assert!(!fx.security.is_registered(&plugin("clock")));

    let saved: Option<PersistedInstanceState> = fx
        .store
        .get(Namespace::InstanceStates, &id.to_string())
        .unwrap();
    assert!(!saved.unwrap().is_running);
}

#[test]
fn crash_for_unknown_instance_is_ignored() {
    let fx = Fixture::new();
    let mut manager = fx.manager();
    let err = manager.handle_crash(widgetry_types::InstanceId::new(), "spurious");
    assert!(matches!(err, HostError::InstanceCrashed { .. }));
    assert_eq!(manager.instance_count(), 0);
}

// ── Session persistence and restore ─────────────────────────────

#[tokio::test]
async fn shutdown_then_restore_brings_widgets_back() {
    let fx = Fixture::new();
    install_widget(fx.widgets.path(), "clock", &[]);
    install_widget(fx.widgets.path(), "weather", &["wx.example.com"]);

    let mut manager = fx.manager();
    manager.create_instance(&plugin("clock")).unwrap();
    manager.create_instance(&plugin("weather")).unwrap();
    manager.shutdown();
    assert_eq!(manager.instance_count(), 0);

    let mut next = fx.manager();
    let restored = next.restore_all().unwrap();
    assert_eq!(restored, 2);
    assert!(next.is_running(&plugin("clock")));
    assert!(next.is_running(&plugin("weather")));
    assert!(fx.security.is_registered(&plugin("weather")));
}

#[test]
fn restore_writes_replacement_states_immediately() {
    let fx = Fixture::new();
    install_widget(fx.widgets.path(), "clock", &[]);

    let mut manager = fx.manager();
    manager.create_instance(&plugin("clock")).unwrap();
    manager.shutdown();

    let mut next = fx.manager();
    assert_eq!(next.restore_all().unwrap(), 1);

    // A hard crash right after restore must still find the session: the
    // replacement entry is keyed by the new id and marked running.
    let entries: Vec<(String, PersistedInstanceState)> =
        fx.store.entries(Namespace::InstanceStates);
    assert_eq!(entries.len(), 1);
    assert!(entries[0].1.is_running);
    assert_eq!(entries[0].0, next.instance_ids()[0].to_string());
}

#[tokio::test]
async fn closed_instances_are_not_restored() {
    let fx = Fixture::new();
    install_widget(fx.widgets.path(), "clock", &[]);

    let mut manager = fx.manager();
    let id = manager.create_instance(&plugin("clock")).unwrap();
    manager.close_instance(id).await.unwrap();

    let mut next = fx.manager();
    assert_eq!(next.restore_all().unwrap(), 0);
}

#[test]
fn restore_skips_and_deletes_orphaned_states() {
    let fx = Fixture::new();
    install_widget(fx.widgets.path(), "clock", &[]);

    let mut manager = fx.manager();
    manager.create_instance(&plugin("clock")).unwrap();
    manager.shutdown();

    // Uninstall behind the manager's back.
    std::fs::remove_dir_all(fx.widgets.path().join("clock")).unwrap();

    let mut next = fx.manager();
    assert_eq!(next.restore_all().unwrap(), 0);
    assert!(fx.store.keys(Namespace::InstanceStates).is_empty());
}

#[test]
fn restore_respects_auto_restore_setting() {
    let fx = Fixture::new();
    install_widget(fx.widgets.path(), "clock", &[]);

    let mut manager = fx.manager();
    manager.create_instance(&plugin("clock")).unwrap();
    manager.shutdown();

    fx.store
        .set(
            Namespace::AppSettings,
            "settings",
            &AppSettings {
                auto_restore: false,
                max_instances: 10,
            },
        )
        .unwrap();

    let mut next = fx.manager();
    assert_eq!(next.restore_all().unwrap(), 0);
    assert_eq!(next.instance_count(), 0);
}

#[tokio::test]
async fn recreate_reuses_last_saved_geometry() {
    let fx = Fixture::new();
    install_widget(fx.widgets.path(), "clock", &[]);
    let mut manager = fx.manager();

    let first = manager.create_instance(&plugin("clock")).unwrap();
    manager.close_instance(first).await.unwrap();
    let saved: PersistedInstanceState = fx
        .store
        .get(Namespace::InstanceStates, &first.to_string())
        .unwrap()
        .unwrap();

    let second = manager.create_instance(&plugin("clock")).unwrap();
    manager.close_instance(second).await.unwrap();
    let again: PersistedInstanceState = fx
        .store
        .get(Namespace::InstanceStates, &second.to_string())
        .unwrap()
        .unwrap();

    assert_eq!(again.position, saved.position);
    assert_eq!(again.size, saved.size);
}
