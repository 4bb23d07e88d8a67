//! JSON-file backed namespaced key/value store.

use crate::error::StoreResult;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::warn;

/// The four persisted namespaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    /// Persisted instance states, keyed by instance id.
    InstanceStates,
    /// Arbitrary per-plugin key/value data, keyed by plugin id.
    PluginData,
    /// Capability sets, keyed by plugin id.
    CapabilitySets,
    /// Host settings (auto-restore, max instances).
    AppSettings,
}

impl Namespace {
    /// On-disk namespace key.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InstanceStates => "instanceStates",
            Self::PluginData => "pluginData",
            Self::CapabilitySets => "capabilitySets",
            Self::AppSettings => "appSettings",
        }
    }
}

struct Inner {
    namespaces: HashMap<&'static str, Map<String, Value>>,
}

/// Persistent key/value store for plugin data, permission grants, and
/// lifecycle state.
///
/// All methods take `&self`; the store is intended to be shared behind an
/// `Arc` across the host components.
pub struct WidgetStore {
    path: Option<PathBuf>,
    inner: Mutex<Inner>,
}

impl WidgetStore {
    /// Opens the store at `path`, loading existing contents if present.
    ///
    /// An unreadable or unparseable file is preserved as `<path>.corrupt`
    /// and the store starts empty; persisted-state corruption must never be
    /// fatal to the host.
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        let namespaces = match std::fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<HashMap<String, Map<String, Value>>>(
                &contents,
            ) {
                Ok(raw) => {
                    let mut namespaces = HashMap::new();
                    for ns in ALL_NAMESPACES {
                        let entries = raw.get(ns.as_str()).cloned().unwrap_or_default();
                        namespaces.insert(ns.as_str(), entries);
                    }
                    namespaces
                }
                Err(e) => {
                    warn!(path = %path.display(), "store file unparseable, starting empty: {e}");
                    let backup = path.with_extension("json.corrupt");
                    if let Err(e) = std::fs::rename(&path, &backup) {
                        warn!("failed to preserve corrupt store file: {e}");
                    }
                    empty_namespaces()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => empty_namespaces(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path: Some(path),
            inner: Mutex::new(Inner { namespaces }),
        })
    }

    /// Creates an in-memory store with no backing file (for tests).
    pub fn open_in_memory() -> Self {
        Self {
            path: None,
            inner: Mutex::new(Inner {
                namespaces: empty_namespaces(),
            }),
        }
    }

    /// Reads and deserializes the value at `ns`/`key`.
    ///
    /// Returns `Ok(None)` when the key is absent; a present-but-undecodable
    /// entry is an error so callers can decide whether to skip or delete it.
    pub fn get<T: DeserializeOwned>(&self, ns: Namespace, key: &str) -> StoreResult<Option<T>> {
        let inner = self.inner.lock().expect("store lock poisoned");
        match inner.namespaces[ns.as_str()].get(key) {
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
            None => Ok(None),
        }
    }

    /// Serializes and writes `value` at `ns`/`key`, then flushes to disk.
    pub fn set<T: Serialize>(&self, ns: Namespace, key: &str, value: &T) -> StoreResult<()> {
        let mut inner = self.inner.lock().expect("store lock poisoned");
        let encoded = serde_json::to_value(value)?;
        inner
            .namespaces
            .get_mut(ns.as_str())
            .expect("namespace preallocated")
            .insert(key.to_string(), encoded);
        self.flush(&inner)
    }

    /// Deletes `ns`/`key`. Returns whether the key existed.
    pub fn delete(&self, ns: Namespace, key: &str) -> StoreResult<bool> {
        let mut inner = self.inner.lock().expect("store lock poisoned");
        let existed = inner
            .namespaces
            .get_mut(ns.as_str())
            .expect("namespace preallocated")
            .remove(key)
            .is_some();
        if existed {
            self.flush(&inner)?;
        }
        Ok(existed)
    }

    /// Reads the value at `ns`/`key`, atomically inserting and persisting
    /// `T::default()` if the key is absent.
    ///
    /// An undecodable stored entry also yields the default (settings-style
    /// callers must always get a usable value), but is left on disk intact.
    pub fn get_or_default<T>(&self, ns: Namespace, key: &str) -> StoreResult<T>
    where
        T: DeserializeOwned + Serialize + Default,
    {
        let mut inner = self.inner.lock().expect("store lock poisoned");
        match inner.namespaces[ns.as_str()].get(key) {
            Some(value) => match serde_json::from_value(value.clone()) {
                Ok(decoded) => Ok(decoded),
                Err(e) => {
                    warn!(ns = ns.as_str(), key, "undecodable store entry, using default: {e}");
                    Ok(T::default())
                }
            },
            None => {
                let default = T::default();
                let encoded = serde_json::to_value(&default)?;
                inner
                    .namespaces
                    .get_mut(ns.as_str())
                    .expect("namespace preallocated")
                    .insert(key.to_string(), encoded);
                self.flush(&inner)?;
                Ok(default)
            }
        }
    }

    /// Returns all decodable `(key, value)` pairs in a namespace.
    ///
    /// Entries that fail to decode are logged and skipped; one corrupt
    /// persisted entry must not block iteration over the rest.
    pub fn entries<T: DeserializeOwned>(&self, ns: Namespace) -> Vec<(String, T)> {
        let inner = self.inner.lock().expect("store lock poisoned");
        inner.namespaces[ns.as_str()]
            .iter()
            .filter_map(|(key, value)| match serde_json::from_value(value.clone()) {
                Ok(decoded) => Some((key.clone(), decoded)),
                Err(e) => {
                    warn!(ns = ns.as_str(), key, "skipping undecodable store entry: {e}");
                    None
                }
            })
            .collect()
    }

    /// Returns all keys in a namespace.
    pub fn keys(&self, ns: Namespace) -> Vec<String> {
        let inner = self.inner.lock().expect("store lock poisoned");
        inner.namespaces[ns.as_str()].keys().cloned().collect()
    }

    /// Serializes the full store and atomically replaces the backing file.
    fn flush(&self, inner: &Inner) -> StoreResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let contents = serde_json::to_string_pretty(&inner.namespaces)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, contents)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

const ALL_NAMESPACES: [Namespace; 4] = [
    Namespace::InstanceStates,
    Namespace::PluginData,
    Namespace::CapabilitySets,
    Namespace::AppSettings,
];

fn empty_namespaces() -> HashMap<&'static str, Map<String, Value>> {
    ALL_NAMESPACES
        .iter()
        .map(|ns| (ns.as_str(), Map::new()))
        .collect()
}
