//! Shared fixtures: peerlink nodes wired to a loopback hub

#![allow(dead_code)]

use peerlink_presence_core::loopback::{
    LoopbackHub, LoopbackIdentity, LoopbackPlugin, LoopbackSources, LoopbackTransport,
};
use peerlink_presence_core::{
    HandlerEvent, SignalingConfig, SignalingHandler, SignalingHandlerBuilder, SignalingPlugin,
};
use std::sync::Arc;
use tokio::sync::broadcast;

pub struct Node {
    pub handler: SignalingHandler,
    pub plugin: Arc<LoopbackPlugin>,
    pub transport: Arc<LoopbackTransport>,
    pub identity: Arc<LoopbackIdentity>,
    pub sources: Arc<LoopbackSources>,
    pub events: broadcast::Receiver<HandlerEvent>,
}

impl Node {
    pub fn new(hub: &LoopbackHub, name: &str, transport: LoopbackTransport) -> Self {
        Self::with_config(hub, name, transport, SignalingConfig::default())
    }

    pub fn with_config(hub: &LoopbackHub, name: &str, transport: LoopbackTransport, config: SignalingConfig) -> Self {
        let transport = Arc::new(transport);
        let identity = Arc::new(LoopbackIdentity::new(format!("{}-node", name)));
        let sources = Arc::new(LoopbackSources::new());

        let handler = SignalingHandlerBuilder::new()
            .config(config)
            .transport(transport.clone())
            .identity(identity.clone())
            .sources(sources.clone())
            .build()
            .expect("handler builds");
        let events = handler.event_receiver();

        let plugin = Arc::new(LoopbackPlugin::new(
            hub,
            format!("{}-xmpp", name),
            format!("{}-account", name),
            jid(name),
        ));

        Self {
            handler,
            plugin,
            transport,
            identity,
            sources,
            events,
        }
    }

    pub async fn start(&self) {
        self.handler
            .add_plugin(self.plugin.clone())
            .await
            .expect("plugin added");
    }

    pub fn plugin_id(&self) -> String {
        self.plugin.plugin_id().to_string()
    }

    pub fn peer_id(&self) -> String {
        self.plugin.peer_id().to_string()
    }

    /// Every event received so far
    pub fn drain_events(&mut self) -> Vec<HandlerEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }
}

pub fn jid(name: &str) -> String {
    format!("{}@example.org/peerlink", name)
}

/// Let the nodes exchange messages until every queue is empty
pub async fn settle(nodes: &[&Node]) {
    for _ in 0..4 {
        for node in nodes {
            node.handler.flush().await.expect("handler alive");
        }
    }
}
