//! Permission broker: gates and rate-limits every sensitive API call.
//!
//! Owns the rate limiter, the consent seam, and the persisted per-plugin
//! capability sets. Capability strings are parsed into [`Capability`] at the
//! IPC boundary; by the time a call reaches the broker an unknown capability
//! has already failed with `InvalidConfig`.

use crate::capability::{Capability, CapabilitySet};
use crate::consent::{ConsentPrompt, ConsentRequest};
use crate::error::{HostError, HostResult};
use crate::rate_limit::RateLimiter;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use widgetry_store::{Namespace, WidgetStore};
use widgetry_types::PluginId;

/// Interval between expired-counter sweeps.
const SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

type PendingKey = (PluginId, Capability);

/// Resolves whether a capability call is allowed, prompting the user when no
/// stored decision exists.
pub struct PermissionBroker {
    store: Arc<WidgetStore>,
    prompt: Arc<dyn ConsentPrompt>,
    limiter: Mutex<RateLimiter>,
    /// In-flight consent prompts, so a second request for the same
    /// (plugin, capability) joins the open prompt instead of spawning a
    /// duplicate dialog.
    pending: Mutex<HashMap<PendingKey, watch::Receiver<Option<bool>>>>,
    sweep: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl PermissionBroker {
    pub fn new(store: Arc<WidgetStore>, prompt: Arc<dyn ConsentPrompt>) -> Self {
        Self {
            store,
            prompt,
            limiter: Mutex::new(RateLimiter::new()),
            pending: Mutex::new(HashMap::new()),
            sweep: Mutex::new(None),
        }
    }

    /// Starts the background sweep that bounds rate-limiter memory.
    ///
    /// The task holds only a weak reference and is aborted by
    /// [`shutdown`](Self::shutdown), so it can never fire against a
    /// torn-down broker.
    pub fn start_sweep(self: &Arc<Self>) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            ticker.tick().await; // first tick fires immediately
            loop {
                ticker.tick().await;
                let Some(broker) = weak.upgrade() else {
                    break;
                };
                let mut limiter = broker.limiter.lock().expect("limiter lock poisoned");
                limiter.purge_expired();
                debug!(live_counters = limiter.counter_count(), "rate-limit sweep");
            }
        });
        *self.sweep.lock().expect("sweep lock poisoned") = Some(handle);
    }

    /// Cancels the sweep task. Safe to call more than once.
    pub fn shutdown(&self) {
        if let Some(handle) = self.sweep.lock().expect("sweep lock poisoned").take() {
            handle.abort();
        }
    }

    /// Returns the persisted capability set for a plugin, defaulting to
    /// all-denied when none has been stored yet.
    pub fn capability_set(&self, plugin_id: &PluginId) -> HostResult<CapabilitySet> {
        Ok(self
            .store
            .get(Namespace::CapabilitySets, plugin_id.as_str())?
            .unwrap_or_default())
    }

    /// Returns the stored decision without any user interaction.
    pub fn has_permission(
        &self,
        plugin_id: &PluginId,
        capability: Capability,
    ) -> HostResult<bool> {
        Ok(self.capability_set(plugin_id)?.is_granted(capability))
    }

    /// Resolves a permission request, prompting the user when no stored
    /// grant exists.
    ///
    /// A stored grant short-circuits without prompting. Otherwise the user
    /// is prompted, including when the capability was previously denied, and
    /// the choice is persisted unconditionally, merged into the existing
    /// capability set. Concurrent requests for the same (plugin, capability)
    /// coalesce onto a single prompt; a prompting request that is dropped
    /// mid-prompt vacates the slot so the pair can be prompted again.
    pub async fn request_permission(
        &self,
        plugin_id: &PluginId,
        display_name: &str,
        capability: Capability,
        reason: Option<String>,
    ) -> HostResult<bool> {
        let key = (plugin_id.clone(), capability);
        loop {
            if self.has_permission(plugin_id, capability)? {
                return Ok(true);
            }

            let role = {
                let mut pending = self.pending.lock().expect("pending lock poisoned");
                if let Some(rx) = pending.get(&key) {
                    Err(rx.clone())
                } else {
                    let (tx, rx) = watch::channel(None);
                    pending.insert(key.clone(), rx);
                    Ok(tx)
                }
            };
            let leader_tx = match role {
                // A prompt for this pair is already open; join it. If its
                // owner goes away without resolving, retry and take over.
                Err(rx) => match self.await_open_prompt(rx).await {
                    Some(granted) => return Ok(granted),
                    None => continue,
                },
                Ok(tx) => tx,
            };

            // The slot must be released even if this future is dropped with
            // the dialog still open; the guard handles both exits.
            let slot = PendingSlot { broker: self, key: &key };
            let granted = self
                .prompt
                .request_consent(ConsentRequest {
                    plugin_id: plugin_id.clone(),
                    display_name: display_name.to_string(),
                    capability,
                    reason,
                })
                .await;

            // Persist the decision (grant or denial) before waking followers.
            let persisted = self.record_decision(plugin_id, capability, granted);
            drop(slot);
            let _ = leader_tx.send(Some(granted));

            info!(plugin_id = %plugin_id, capability = %capability, granted, "consent decision");
            persisted?;
            return Ok(granted);
        }
    }

    /// Joins an already-open prompt for the same (plugin, capability).
    ///
    /// Returns `None` when the prompting request was dropped before a
    /// decision arrived; the caller retries and becomes the leader itself.
    async fn await_open_prompt(&self, mut rx: watch::Receiver<Option<bool>>) -> Option<bool> {
        loop {
            if let Some(granted) = *rx.borrow() {
                return Some(granted);
            }
            if rx.changed().await.is_err() {
                warn!("consent prompt abandoned before resolution, re-prompting");
                return None;
            }
        }
    }

    fn record_decision(
        &self,
        plugin_id: &PluginId,
        capability: Capability,
        granted: bool,
    ) -> HostResult<()> {
        let mut set = self.capability_set(plugin_id)?;
        set.set_granted(capability, granted);
        self.store
            .set(Namespace::CapabilitySets, plugin_id.as_str(), &set)?;
        Ok(())
    }

    /// Gate for one capability API call: counts it against the rate limit,
    /// then checks the stored grant.
    ///
    /// An exhausted window fails with `RateLimitExceeded` before the
    /// permission check; a missing or denied grant fails with
    /// `PermissionDenied`. This never prompts; callers wanting consent flow
    /// go through [`request_permission`](Self::request_permission) first.
    pub fn authorize_call(
        &self,
        plugin_id: &PluginId,
        capability: Capability,
    ) -> HostResult<()> {
        self.check_rate_limit(plugin_id, capability, true)?;
        if !self.has_permission(plugin_id, capability)? {
            return Err(HostError::PermissionDenied {
                plugin_id: plugin_id.to_string(),
                capability: capability.as_str().to_string(),
            });
        }
        Ok(())
    }

    /// Records one call against the sliding window and reports whether it is
    /// allowed. With `throw_on_exceed`, an exhausted window becomes a
    /// `RateLimitExceeded` error instead of `false`.
    pub fn check_rate_limit(
        &self,
        plugin_id: &PluginId,
        capability: Capability,
        throw_on_exceed: bool,
    ) -> HostResult<bool> {
        let allowed = self
            .limiter
            .lock()
            .expect("limiter lock poisoned")
            .check(plugin_id, capability);
        if !allowed && throw_on_exceed {
            return Err(HostError::RateLimitExceeded {
                plugin_id: plugin_id.to_string(),
                capability: capability.as_str().to_string(),
            });
        }
        Ok(allowed)
    }
}

impl Drop for PermissionBroker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Frees the in-flight prompt entry for a (plugin, capability) pair, whether
/// the prompting future completes or is dropped mid-prompt.
struct PendingSlot<'a> {
    broker: &'a PermissionBroker,
    key: &'a PendingKey,
}

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        self.broker
            .pending
            .lock()
            .expect("pending lock poisoned")
            .remove(self.key);
    }
}
