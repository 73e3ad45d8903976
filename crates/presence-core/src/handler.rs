//! The signaling handler: owner task and its public facade
//!
//! All mutable state lives in [`HandlerCore`], which runs on a single tokio
//! task. [`SignalingHandler`] is a cheap, cloneable front that sends commands
//! to it and waits for the replies.

use crate::coordinator::PresenceCoordinator;
use crate::directory::PeerPresenceRecord;
use crate::error::{Result, SignalingError};
use crate::events::{EventEmitter, EventStream, HandlerEvent};
use crate::lifecycle::PluginLifecycleManager;
use crate::offers::PendingConnection;
use crate::payload::PresenceInfo;
use crate::plugin::{PluginEvent, SignalingPlugin, TaggedPluginEvent};
use crate::types::{Avatar, PluginId, SignalingPluginHandle};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval};

type Reply<T> = oneshot::Sender<T>;

/// Requests sent from the facade to the owner task
pub(crate) enum HandlerCommand {
    AddPlugin {
        plugin: Arc<dyn SignalingPlugin>,
        reply: Reply<Result<()>>,
    },
    RemovePlugin {
        plugin_id: PluginId,
        reply: Reply<Result<()>>,
    },
    LoadPlugins {
        plugins: Vec<Arc<dyn SignalingPlugin>>,
        reply: Reply<()>,
    },
    ConnectAll {
        reply: Reply<()>,
    },
    DisconnectAll {
        reply: Reply<()>,
    },
    ToggleConnect {
        reply: Reply<bool>,
    },
    ConnectPlugin {
        plugin_id: PluginId,
        reply: Reply<Result<()>>,
    },
    DisconnectPlugin {
        account_id: String,
        reply: Reply<usize>,
    },
    CheckSettings {
        reply: Reply<()>,
    },
    RefreshProxy {
        reply: Reply<()>,
    },
    AccountConfigurationChanged {
        plugin_id: PluginId,
        reply: Reply<Result<()>>,
    },
    AllPlugins {
        reply: Reply<Vec<SignalingPluginHandle>>,
    },
    ConnectedPlugins {
        reply: Reply<Vec<SignalingPluginHandle>>,
    },
    PluginLoaded {
        plugin_id: PluginId,
        reply: Reply<bool>,
    },
    IsConnected {
        reply: Reply<bool>,
    },
    PendingReconnects {
        plugin_id: PluginId,
        reply: Reply<usize>,
    },
    PeerRecord {
        peer_id: String,
        reply: Reply<Option<PeerPresenceRecord>>,
    },
    ClaimOffer {
        key: String,
        reply: Reply<Option<PendingConnection>>,
    },
    HasOffer {
        key: String,
        reply: Reply<bool>,
    },
    OfferCount {
        reply: Reply<usize>,
    },
    Flush {
        reply: Reply<()>,
    },
    Shutdown {
        reply: Reply<()>,
    },
}

/// State owned by the handler task
pub(crate) struct HandlerCore {
    coordinator: PresenceCoordinator,
    lifecycle: PluginLifecycleManager,
    events: EventEmitter,
    commands: mpsc::Receiver<HandlerCommand>,
    plugin_events: mpsc::UnboundedReceiver<TaggedPluginEvent>,
    reconnect_due: mpsc::UnboundedReceiver<PluginId>,
    offer_ttl: Option<Duration>,
    sweep_interval: Duration,
}

impl HandlerCore {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        coordinator: PresenceCoordinator,
        lifecycle: PluginLifecycleManager,
        events: EventEmitter,
        commands: mpsc::Receiver<HandlerCommand>,
        plugin_events: mpsc::UnboundedReceiver<TaggedPluginEvent>,
        reconnect_due: mpsc::UnboundedReceiver<PluginId>,
        offer_ttl: Option<Duration>,
        sweep_interval: Duration,
    ) -> Self {
        Self {
            coordinator,
            lifecycle,
            events,
            commands,
            plugin_events,
            reconnect_due,
            offer_ttl,
            sweep_interval,
        }
    }

    /// Main loop; ends on shutdown or once every facade handle is dropped
    pub(crate) async fn run(mut self) {
        tracing::info!("Signaling handler started");

        let mut sweep = self.offer_ttl.map(|_| tokio::time::interval(self.sweep_interval));

        loop {
            // Plugin events and timers drain before commands, so a command
            // observes every event queued ahead of it.
            tokio::select! {
                biased;

                Some(tagged) = self.plugin_events.recv() => {
                    self.handle_plugin_event(tagged).await;
                }

                Some(plugin_id) = self.reconnect_due.recv() => {
                    self.lifecycle.on_reconnect_due(&plugin_id).await;
                }

                command = self.commands.recv() => match command {
                    Some(HandlerCommand::Shutdown { reply }) => {
                        self.shutdown().await;
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command).await,
                    None => {
                        self.shutdown().await;
                        break;
                    }
                },

                _ = next_sweep(&mut sweep) => self.sweep_offers(),
            }
        }

        tracing::info!("Signaling handler stopped");
    }

    async fn handle_plugin_event(&mut self, tagged: TaggedPluginEvent) {
        let TaggedPluginEvent { plugin_id, event } = tagged;

        match event {
            PluginEvent::PeerOnline { peer_id } => {
                self.events.emit(HandlerEvent::PeerOnline {
                    plugin_id: plugin_id.clone(),
                    peer_id: peer_id.clone(),
                });
                let Some(plugin) = self.lifecycle.plugin(&plugin_id) else {
                    tracing::debug!("Peer {} online on removed plugin {}", peer_id, plugin_id);
                    return;
                };
                if let Err(e) = self.coordinator.on_peer_online(plugin.as_ref(), &peer_id).await {
                    tracing::error!("Failed to send presence to {}: {}", peer_id, e);
                }
            }

            PluginEvent::PeerOffline { peer_id } => {
                self.coordinator.on_peer_offline(&plugin_id, &peer_id);
                self.events.emit(HandlerEvent::PeerOffline { plugin_id, peer_id });
            }

            PluginEvent::MessageReceived { from, text } => {
                self.coordinator.on_message(&from, &text);
                self.events.emit(HandlerEvent::MessageReceived {
                    plugin_id,
                    from,
                    text,
                });
            }

            PluginEvent::PresenceInfoReceived { peer_id, info } => {
                match self.coordinator.on_presence_info(&peer_id, info).await {
                    Ok(decision) => tracing::debug!("Presence from {}: {:?}", peer_id, decision),
                    Err(e) => tracing::error!("Failed to connect to {}: {}", peer_id, e),
                }
            }

            PluginEvent::SoftwareVersionReceived { peer_id, version } => {
                self.coordinator.on_software_version(&peer_id, &version);
            }

            PluginEvent::AvatarReceived { peer_id, avatar } => {
                self.coordinator.on_avatar(&peer_id, avatar);
            }

            PluginEvent::OwnAvatarReceived { avatar } => {
                self.coordinator.on_own_avatar(avatar);
            }

            PluginEvent::Error { code, message } => {
                self.lifecycle.on_plugin_error(&plugin_id, code, &message);
            }

            PluginEvent::ConnectionStateChanged { state } => {
                self.lifecycle.on_plugin_state_changed(&plugin_id, state);
            }
        }
    }

    async fn handle_command(&mut self, command: HandlerCommand) {
        match command {
            HandlerCommand::AddPlugin { plugin, reply } => {
                let _ = reply.send(self.lifecycle.add_plugin(plugin).await);
            }
            HandlerCommand::RemovePlugin { plugin_id, reply } => {
                let _ = reply.send(self.lifecycle.remove_plugin(&plugin_id).await);
            }
            HandlerCommand::LoadPlugins { plugins, reply } => {
                self.lifecycle.load_plugins(plugins).await;
                let _ = reply.send(());
            }
            HandlerCommand::ConnectAll { reply } => {
                self.lifecycle.connect_all().await;
                let _ = reply.send(());
            }
            HandlerCommand::DisconnectAll { reply } => {
                self.disconnect_all().await;
                let _ = reply.send(());
            }
            HandlerCommand::ToggleConnect { reply } => {
                if self.lifecycle.is_connected() {
                    self.disconnect_all().await;
                } else {
                    self.lifecycle.connect_all().await;
                }
                let _ = reply.send(self.lifecycle.is_connected());
            }
            HandlerCommand::ConnectPlugin { plugin_id, reply } => {
                let _ = reply.send(self.lifecycle.connect_plugin(&plugin_id).await);
            }
            HandlerCommand::DisconnectPlugin { account_id, reply } => {
                let _ = reply.send(self.lifecycle.disconnect_plugin(&account_id).await);
            }
            HandlerCommand::CheckSettings { reply } => {
                self.lifecycle.check_settings().await;
                let _ = reply.send(());
            }
            HandlerCommand::RefreshProxy { reply } => {
                self.lifecycle.refresh_proxy().await;
                let _ = reply.send(());
            }
            HandlerCommand::AccountConfigurationChanged { plugin_id, reply } => {
                let _ = reply.send(self.lifecycle.account_configuration_changed(&plugin_id).await);
            }
            HandlerCommand::AllPlugins { reply } => {
                let _ = reply.send(self.lifecycle.all_plugins());
            }
            HandlerCommand::ConnectedPlugins { reply } => {
                let _ = reply.send(self.lifecycle.connected_plugins());
            }
            HandlerCommand::PluginLoaded { plugin_id, reply } => {
                let _ = reply.send(self.lifecycle.plugin_loaded(&plugin_id));
            }
            HandlerCommand::IsConnected { reply } => {
                let _ = reply.send(self.lifecycle.is_connected());
            }
            HandlerCommand::PendingReconnects { plugin_id, reply } => {
                let _ = reply.send(self.lifecycle.pending_reconnects(&plugin_id));
            }
            HandlerCommand::PeerRecord { peer_id, reply } => {
                let _ = reply.send(self.coordinator.directory().record(&peer_id).cloned());
            }
            HandlerCommand::ClaimOffer { key, reply } => {
                let _ = reply.send(self.coordinator.claim_offer(&key));
            }
            HandlerCommand::HasOffer { key, reply } => {
                let _ = reply.send(self.coordinator.offers().contains(&key));
            }
            HandlerCommand::OfferCount { reply } => {
                let _ = reply.send(self.coordinator.offers().len());
            }
            HandlerCommand::Flush { reply } => {
                let _ = reply.send(());
            }
            HandlerCommand::Shutdown { reply } => {
                // Handled by the run loop
                let _ = reply.send(());
            }
        }
    }

    async fn disconnect_all(&mut self) {
        self.lifecycle.disconnect_all().await;
        let removed = self.coordinator.clear_peers();
        tracing::debug!("Forgot {} peers", removed);
    }

    fn sweep_offers(&mut self) {
        let Some(ttl) = self.offer_ttl else {
            return;
        };
        let keys = self.coordinator.prune_offers(ttl, Instant::now());
        if !keys.is_empty() {
            self.events.emit(HandlerEvent::OffersExpired { keys });
        }
    }

    async fn shutdown(&mut self) {
        tracing::info!("Shutting down signaling handler");
        self.lifecycle.cancel_reconnects();
        self.disconnect_all().await;
    }
}

async fn next_sweep(sweep: &mut Option<Interval>) {
    match sweep {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Handle to a running signaling handler
///
/// Clones share the same owner task. Every method fails with
/// [`SignalingError::HandlerClosed`] once the handler has shut down.
#[derive(Clone)]
pub struct SignalingHandler {
    commands: mpsc::Sender<HandlerCommand>,
    events: EventEmitter,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl SignalingHandler {
    pub(crate) fn new(
        commands: mpsc::Sender<HandlerCommand>,
        events: EventEmitter,
        task: JoinHandle<()>,
    ) -> Self {
        Self {
            commands,
            events,
            task: Arc::new(Mutex::new(Some(task))),
        }
    }

    async fn request<T>(&self, command: impl FnOnce(Reply<T>) -> HandlerCommand) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(command(tx))
            .await
            .map_err(|_| SignalingError::HandlerClosed)?;
        rx.await.map_err(|_| SignalingError::HandlerClosed)
    }

    // ===== Plugin lifecycle =====

    /// Manage and connect a new plugin
    pub async fn add_plugin(&self, plugin: Arc<dyn SignalingPlugin>) -> Result<()> {
        self.request(|reply| HandlerCommand::AddPlugin { plugin, reply }).await?
    }

    /// Disconnect and forget a plugin
    pub async fn remove_plugin(&self, plugin_id: &str) -> Result<()> {
        let plugin_id = plugin_id.to_string();
        self.request(|reply| HandlerCommand::RemovePlugin { plugin_id, reply }).await?
    }

    /// Add the plugins built from the account list and mark the handler
    /// connected. Duplicates are skipped.
    pub async fn load_plugins(&self, plugins: Vec<Arc<dyn SignalingPlugin>>) -> Result<()> {
        self.request(|reply| HandlerCommand::LoadPlugins { plugins, reply }).await
    }

    pub async fn connect_all(&self) -> Result<()> {
        self.request(|reply| HandlerCommand::ConnectAll { reply }).await
    }

    /// Disconnect every connected plugin and forget all peers and remote
    /// sources
    pub async fn disconnect_all(&self) -> Result<()> {
        self.request(|reply| HandlerCommand::DisconnectAll { reply }).await
    }

    /// Flip between connected and disconnected; returns the new state
    pub async fn toggle_connect(&self) -> Result<bool> {
        self.request(|reply| HandlerCommand::ToggleConnect { reply }).await
    }

    pub async fn connect_plugin(&self, plugin_id: &str) -> Result<()> {
        let plugin_id = plugin_id.to_string();
        self.request(|reply| HandlerCommand::ConnectPlugin { plugin_id, reply }).await?
    }

    /// Disconnect the connected plugins of an account; returns how many
    pub async fn disconnect_plugin(&self, account_id: &str) -> Result<usize> {
        let account_id = account_id.to_string();
        self.request(|reply| HandlerCommand::DisconnectPlugin { account_id, reply })
            .await
    }

    pub async fn check_settings(&self) -> Result<()> {
        self.request(|reply| HandlerCommand::CheckSettings { reply }).await
    }

    /// Global settings changed
    pub async fn settings_changed(&self) -> Result<()> {
        self.check_settings().await
    }

    pub async fn refresh_proxy(&self) -> Result<()> {
        self.request(|reply| HandlerCommand::RefreshProxy { reply }).await
    }

    pub async fn account_configuration_changed(&self, plugin_id: &str) -> Result<()> {
        let plugin_id = plugin_id.to_string();
        self.request(|reply| HandlerCommand::AccountConfigurationChanged { plugin_id, reply })
            .await?
    }

    pub async fn all_plugins(&self) -> Result<Vec<SignalingPluginHandle>> {
        self.request(|reply| HandlerCommand::AllPlugins { reply }).await
    }

    pub async fn connected_plugins(&self) -> Result<Vec<SignalingPluginHandle>> {
        self.request(|reply| HandlerCommand::ConnectedPlugins { reply }).await
    }

    pub async fn plugin_loaded(&self, plugin_id: &str) -> Result<bool> {
        let plugin_id = plugin_id.to_string();
        self.request(|reply| HandlerCommand::PluginLoaded { plugin_id, reply }).await
    }

    pub async fn is_connected(&self) -> Result<bool> {
        self.request(|reply| HandlerCommand::IsConnected { reply }).await
    }

    /// Reconnect attempts for a plugin that have not fired yet
    pub async fn pending_reconnects(&self, plugin_id: &str) -> Result<usize> {
        let plugin_id = plugin_id.to_string();
        self.request(|reply| HandlerCommand::PendingReconnects { plugin_id, reply })
            .await
    }

    // ===== Peer directory =====

    pub async fn peer_record(&self, peer_id: &str) -> Result<Option<PeerPresenceRecord>> {
        let peer_id = peer_id.to_string();
        self.request(|reply| HandlerCommand::PeerRecord { peer_id, reply }).await
    }

    pub async fn presence_info(&self, peer_id: &str) -> Result<Option<PresenceInfo>> {
        Ok(self.peer_record(peer_id).await?.map(|r| r.presence()))
    }

    pub async fn software_version(&self, peer_id: &str) -> Result<Option<String>> {
        Ok(self.peer_record(peer_id).await?.and_then(|r| r.software_version))
    }

    pub async fn avatar(&self, peer_id: &str) -> Result<Option<Avatar>> {
        Ok(self.peer_record(peer_id).await?.and_then(|r| r.avatar))
    }

    // ===== Offers =====

    /// Take the offer for `key`; used when an inbound connection presents it
    pub async fn claim_offer(&self, key: &str) -> Result<Option<PendingConnection>> {
        let key = key.to_string();
        self.request(|reply| HandlerCommand::ClaimOffer { key, reply }).await
    }

    pub async fn has_offer(&self, key: &str) -> Result<bool> {
        let key = key.to_string();
        self.request(|reply| HandlerCommand::HasOffer { key, reply }).await
    }

    pub async fn offer_count(&self) -> Result<usize> {
        self.request(|reply| HandlerCommand::OfferCount { reply }).await
    }

    // ===== Events =====

    /// Subscribe to handler events as a stream
    pub fn subscribe(&self) -> EventStream {
        self.events.stream()
    }

    /// Subscribe to handler events as a raw broadcast receiver
    pub fn event_receiver(&self) -> broadcast::Receiver<HandlerEvent> {
        self.events.subscribe()
    }

    /// Wait until every plugin event queued so far has been processed
    pub async fn flush(&self) -> Result<()> {
        self.request(|reply| HandlerCommand::Flush { reply }).await
    }

    /// Disconnect all plugins, cancel pending reconnects and stop the owner
    /// task
    pub async fn shutdown(&self) -> Result<()> {
        self.request(|reply| HandlerCommand::Shutdown { reply }).await?;

        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::warn!("Signaling handler task ended abnormally: {}", e);
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for SignalingHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalingHandler")
            .field("closed", &self.commands.is_closed())
            .finish()
    }
}
