//! Builder for creating signaling handlers

use crate::config::SignalingConfig;
use crate::coordinator::PresenceCoordinator;
use crate::error::{Result, SignalingError};
use crate::events::EventEmitter;
use crate::handler::{HandlerCore, SignalingHandler};
use crate::lifecycle::{PluginLifecycleManager, ReconnectScheduler};
use crate::negotiation::AddressComparison;
use crate::transport::{LocalIdentity, SourceRegistry, Transport};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const COMMAND_CHANNEL_CAPACITY: usize = 100;

/// Builder for a [`SignalingHandler`]
///
/// The transport, local identity and source registry are required.
///
/// ```no_run
/// # use std::sync::Arc;
/// # use peerlink_presence_core::loopback::{LoopbackIdentity, LoopbackSources, LoopbackTransport};
/// # use peerlink_presence_core::SignalingHandlerBuilder;
/// # async fn example() -> peerlink_presence_core::Result<()> {
/// let handler = SignalingHandlerBuilder::new()
///     .reconnect_delay(std::time::Duration::from_secs(5))
///     .transport(Arc::new(LoopbackTransport::new("203.0.113.7", 50210)))
///     .identity(Arc::new(LoopbackIdentity::new("node-1")))
///     .sources(Arc::new(LoopbackSources::new()))
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct SignalingHandlerBuilder {
    config: SignalingConfig,
    transport: Option<Arc<dyn Transport>>,
    identity: Option<Arc<dyn LocalIdentity>>,
    sources: Option<Arc<dyn SourceRegistry>>,
}

impl SignalingHandlerBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: SignalingConfig) -> Self {
        self.config = config;
        self
    }

    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.config = self.config.with_reconnect_delay(delay);
        self
    }

    pub fn address_comparison(mut self, comparison: AddressComparison) -> Self {
        self.config = self.config.with_address_comparison(comparison);
        self
    }

    /// Expire unclaimed offers after `ttl`
    pub fn offer_ttl(mut self, ttl: Duration) -> Self {
        self.config = self.config.with_offer_ttl(ttl);
        self
    }

    pub fn event_channel_capacity(mut self, capacity: usize) -> Self {
        self.config = self.config.with_event_channel_capacity(capacity);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn identity(mut self, identity: Arc<dyn LocalIdentity>) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn sources(mut self, sources: Arc<dyn SourceRegistry>) -> Self {
        self.sources = Some(sources);
        self
    }

    /// Validate the configuration and start the handler task
    ///
    /// Must be called from within a tokio runtime.
    pub fn build(self) -> Result<SignalingHandler> {
        self.config.validate()?;

        let transport = self
            .transport
            .ok_or_else(|| SignalingError::config("A transport is required"))?;
        let identity = self
            .identity
            .ok_or_else(|| SignalingError::config("A local identity is required"))?;
        let sources = self
            .sources
            .ok_or_else(|| SignalingError::config("A source registry is required"))?;

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| SignalingError::config(format!("No tokio runtime: {}", e)))?;

        let events = EventEmitter::new(self.config.event_channel_capacity);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (plugin_event_tx, plugin_event_rx) = mpsc::unbounded_channel();
        let (due_tx, due_rx) = mpsc::unbounded_channel();

        let coordinator = PresenceCoordinator::new(
            transport,
            identity,
            sources,
            self.config.address_comparison,
            events.clone(),
        );
        let lifecycle = PluginLifecycleManager::new(
            events.clone(),
            ReconnectScheduler::new(self.config.reconnect_delay(), due_tx),
            plugin_event_tx,
        );

        let core = HandlerCore::new(
            coordinator,
            lifecycle,
            events.clone(),
            command_rx,
            plugin_event_rx,
            due_rx,
            self.config.offer_ttl(),
            self.config.offer_sweep_interval(),
        );

        tracing::debug!("Starting signaling handler with {:?}", self.config);
        let task = runtime.spawn(core.run());

        Ok(SignalingHandler::new(command_tx, events, task))
    }
}
