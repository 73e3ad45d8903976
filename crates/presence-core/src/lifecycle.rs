//! Signaling plugin lifecycle
//!
//! Tracks the managed plugin set, the subset that is currently connected,
//! and reconnects plugins that fail with anything but an authentication
//! error.

use crate::error::{Result, SignalingError};
use crate::events::{EventEmitter, HandlerEvent};
use crate::plugin::{PluginEventSink, SignalingPlugin, TaggedPluginEvent};
use crate::types::{ConnectionState, PluginErrorCode, PluginId, SignalingPluginHandle};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Delayed reconnect attempts
///
/// Each scheduled attempt is a task that sleeps for the fixed delay and then
/// reports the plugin id on the `due` channel. Attempts are independent: two
/// errors schedule two reconnects.
pub struct ReconnectScheduler {
    due: mpsc::UnboundedSender<PluginId>,
    delay: Duration,
    pending: HashMap<PluginId, Vec<JoinHandle<()>>>,
}

impl ReconnectScheduler {
    pub fn new(delay: Duration, due: mpsc::UnboundedSender<PluginId>) -> Self {
        Self {
            due,
            delay,
            pending: HashMap::new(),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Schedule one reconnect of `plugin_id` after the delay
    pub fn schedule(&mut self, plugin_id: &str) {
        let due = self.due.clone();
        let delay = self.delay;
        let id = plugin_id.to_string();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = due.send(id);
        });

        let handles = self.pending.entry(plugin_id.to_string()).or_default();
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
    }

    /// Abort every outstanding attempt for `plugin_id`
    pub fn cancel(&mut self, plugin_id: &str) -> usize {
        let Some(handles) = self.pending.remove(plugin_id) else {
            return 0;
        };
        let mut cancelled = 0;
        for handle in handles {
            if !handle.is_finished() {
                cancelled += 1;
            }
            handle.abort();
        }
        cancelled
    }

    pub fn cancel_all(&mut self) {
        for (_, handles) in self.pending.drain() {
            for handle in handles {
                handle.abort();
            }
        }
    }

    /// Number of attempts for `plugin_id` that have not fired yet
    pub fn pending_count(&self, plugin_id: &str) -> usize {
        self.pending
            .get(plugin_id)
            .map(|handles| handles.iter().filter(|h| !h.is_finished()).count())
            .unwrap_or(0)
    }
}

struct ManagedPlugin {
    plugin: Arc<dyn SignalingPlugin>,
    state: ConnectionState,
}

impl ManagedPlugin {
    fn handle(&self) -> SignalingPluginHandle {
        SignalingPluginHandle {
            plugin_id: self.plugin.plugin_id().to_string(),
            account_id: self.plugin.account_id().to_string(),
            friendly_name: self.plugin.friendly_name().to_string(),
            connection_state: self.state,
        }
    }
}

/// Plugin-level half of the signaling handler
pub struct PluginLifecycleManager {
    plugins: Vec<ManagedPlugin>,
    connected: Vec<PluginId>,
    is_connected: bool,
    events: EventEmitter,
    reconnects: ReconnectScheduler,
    plugin_events: mpsc::UnboundedSender<TaggedPluginEvent>,
}

impl PluginLifecycleManager {
    pub fn new(
        events: EventEmitter,
        reconnects: ReconnectScheduler,
        plugin_events: mpsc::UnboundedSender<TaggedPluginEvent>,
    ) -> Self {
        Self {
            plugins: Vec::new(),
            connected: Vec::new(),
            is_connected: false,
            events,
            reconnects,
            plugin_events,
        }
    }

    fn find(&self, plugin_id: &str) -> Option<&ManagedPlugin> {
        self.plugins.iter().find(|p| p.plugin.plugin_id() == plugin_id)
    }

    /// The plugin with `plugin_id`, if managed
    pub fn plugin(&self, plugin_id: &str) -> Option<Arc<dyn SignalingPlugin>> {
        self.find(plugin_id).map(|p| p.plugin.clone())
    }

    /// Start managing `plugin` and connect it
    pub async fn add_plugin(&mut self, plugin: Arc<dyn SignalingPlugin>) -> Result<()> {
        let plugin_id = plugin.plugin_id().to_string();
        if self.find(&plugin_id).is_some() {
            return Err(SignalingError::DuplicatePlugin { plugin_id });
        }

        plugin.attach(PluginEventSink::new(plugin_id.clone(), self.plugin_events.clone()));
        self.plugins.push(ManagedPlugin {
            plugin: plugin.clone(),
            state: ConnectionState::Disconnected,
        });
        info!("Added signaling plugin {} ({})", plugin_id, plugin.friendly_name());

        if let Err(e) = plugin.connect().await {
            warn!("Failed to connect {}: {}", plugin_id, e);
        }

        self.events.emit(HandlerEvent::PluginAdded { plugin_id });
        Ok(())
    }

    /// Disconnect and forget a plugin, cancelling its pending reconnects
    pub async fn remove_plugin(&mut self, plugin_id: &str) -> Result<()> {
        let plugin = self
            .plugin(plugin_id)
            .ok_or_else(|| SignalingError::plugin_not_found(plugin_id))?;

        if let Err(e) = plugin.disconnect().await {
            warn!("Failed to disconnect {}: {}", plugin_id, e);
        }

        self.events.emit(HandlerEvent::PluginRemoved {
            plugin_id: plugin_id.to_string(),
        });

        self.plugins.retain(|p| p.plugin.plugin_id() != plugin_id);
        self.connected.retain(|id| id != plugin_id);
        let cancelled = self.reconnects.cancel(plugin_id);
        if cancelled > 0 {
            debug!("Cancelled {} pending reconnects of {}", cancelled, plugin_id);
        }

        info!("Removed signaling plugin {}", plugin_id);
        Ok(())
    }

    /// Add every plugin created from the account list, then mark the
    /// handler connected
    pub async fn load_plugins(&mut self, plugins: Vec<Arc<dyn SignalingPlugin>>) {
        for plugin in plugins {
            if let Err(e) = self.add_plugin(plugin).await {
                warn!("Skipping plugin: {}", e);
            }
        }
        self.is_connected = true;
    }

    pub async fn connect_all(&mut self) {
        info!("Connecting {} signaling plugins", self.plugins.len());
        for managed in &self.plugins {
            if let Err(e) = managed.plugin.connect().await {
                warn!("Failed to connect {}: {}", managed.plugin.plugin_id(), e);
            }
        }
        self.is_connected = true;
    }

    /// Disconnect every connected plugin and clear the connected view
    pub async fn disconnect_all(&mut self) {
        info!("Disconnecting {} signaling plugins", self.connected.len());
        for plugin_id in &self.connected {
            if let Some(managed) = self.find(plugin_id) {
                if let Err(e) = managed.plugin.disconnect().await {
                    warn!("Failed to disconnect {}: {}", plugin_id, e);
                }
            }
        }
        self.connected.clear();
        self.is_connected = false;
    }

    pub async fn connect_plugin(&mut self, plugin_id: &str) -> Result<()> {
        let plugin = self
            .plugin(plugin_id)
            .ok_or_else(|| SignalingError::plugin_not_found(plugin_id))?;
        plugin.connect().await
    }

    /// Disconnect the connected plugins backed by `account_id`
    pub async fn disconnect_plugin(&mut self, account_id: &str) -> usize {
        let matching: Vec<Arc<dyn SignalingPlugin>> = self
            .connected
            .iter()
            .filter_map(|id| self.find(id))
            .filter(|p| p.plugin.account_id() == account_id)
            .map(|p| p.plugin.clone())
            .collect();

        for plugin in &matching {
            if let Err(e) = plugin.disconnect().await {
                warn!("Failed to disconnect {}: {}", plugin.plugin_id(), e);
            }
        }
        matching.len()
    }

    pub fn is_connected(&self) -> bool {
        self.is_connected
    }

    pub fn plugin_loaded(&self, plugin_id: &str) -> bool {
        self.find(plugin_id).is_some()
    }

    pub fn all_plugins(&self) -> Vec<SignalingPluginHandle> {
        self.plugins.iter().map(ManagedPlugin::handle).collect()
    }

    pub fn connected_plugins(&self) -> Vec<SignalingPluginHandle> {
        self.connected
            .iter()
            .filter_map(|id| self.find(id))
            .map(ManagedPlugin::handle)
            .collect()
    }

    pub async fn check_settings(&self) {
        for managed in &self.plugins {
            if let Err(e) = managed.plugin.check_settings().await {
                warn!("Settings check failed for {}: {}", managed.plugin.plugin_id(), e);
            }
        }
    }

    pub async fn refresh_proxy(&self) {
        for managed in &self.plugins {
            if let Err(e) = managed.plugin.refresh_proxy_settings().await {
                warn!("Proxy refresh failed for {}: {}", managed.plugin.plugin_id(), e);
            }
        }
    }

    pub async fn account_configuration_changed(&self, plugin_id: &str) -> Result<()> {
        let plugin = self
            .plugin(plugin_id)
            .ok_or_else(|| SignalingError::plugin_not_found(plugin_id))?;
        plugin.configuration_changed().await
    }

    /// A plugin reported an error
    pub fn on_plugin_error(&mut self, plugin_id: &str, code: PluginErrorCode, message: &str) {
        if !self.plugin_loaded(plugin_id) {
            debug!("Ignoring error from unmanaged plugin {}: {}", plugin_id, message);
            return;
        }

        if code.is_auth_failure() {
            warn!("Authentication failed for {}: {}", plugin_id, message);
            self.events.emit(HandlerEvent::AuthError {
                plugin_id: plugin_id.to_string(),
                message: message.to_string(),
            });
            return;
        }

        warn!(
            "Plugin {} failed ({}): {}, reconnecting in {:?}",
            plugin_id,
            code,
            message,
            self.reconnects.delay()
        );
        self.reconnects.schedule(plugin_id);
        self.events.emit(HandlerEvent::ReconnectScheduled {
            plugin_id: plugin_id.to_string(),
            code,
            delay: self.reconnects.delay(),
        });
    }

    /// A plugin's connection state changed
    pub fn on_plugin_state_changed(&mut self, plugin_id: &str, state: ConnectionState) {
        let Some(managed) = self.plugins.iter_mut().find(|p| p.plugin.plugin_id() == plugin_id) else {
            debug!("Ignoring state change of unmanaged plugin {}", plugin_id);
            return;
        };
        managed.state = state;
        debug!("Plugin {} is now {}", plugin_id, state);

        match state {
            ConnectionState::Disconnected => {
                self.connected.retain(|id| id != plugin_id);
                self.events.emit(HandlerEvent::Disconnected {
                    plugin_id: plugin_id.to_string(),
                });
            }
            ConnectionState::Connected => {
                if !self.connected.iter().any(|id| id == plugin_id) {
                    self.connected.push(plugin_id.to_string());
                }
                self.events.emit(HandlerEvent::Connected {
                    plugin_id: plugin_id.to_string(),
                });
            }
            ConnectionState::Connecting => {}
        }

        self.events.emit(HandlerEvent::StateChanged {
            plugin_id: plugin_id.to_string(),
            state,
        });
    }

    /// A reconnect timer fired
    pub async fn on_reconnect_due(&mut self, plugin_id: &str) {
        let Some(plugin) = self.plugin(plugin_id) else {
            debug!("Reconnect timer fired for removed plugin {}", plugin_id);
            return;
        };

        info!("Reconnecting {}", plugin_id);
        if let Err(e) = plugin.connect().await {
            warn!("Reconnect of {} failed: {}", plugin_id, e);
        }
    }

    pub fn pending_reconnects(&self, plugin_id: &str) -> usize {
        self.reconnects.pending_count(plugin_id)
    }

    /// Cancel every timer; used on shutdown
    pub fn cancel_reconnects(&mut self) {
        self.reconnects.cancel_all();
    }
}
