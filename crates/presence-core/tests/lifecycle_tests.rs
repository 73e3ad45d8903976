//! Plugin lifecycle through the public handler API

mod common;

use common::{Node, settle};
use peerlink_presence_core::loopback::{LoopbackHub, LoopbackPlugin, LoopbackTransport};
use peerlink_presence_core::{
    ConnectionState, HandlerEvent, PluginErrorCode, SignalingError, SignalingPlugin,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_added_plugin_connects() {
    let hub = LoopbackHub::new();
    let mut node = Node::new(&hub, "alice", LoopbackTransport::unreachable());

    node.start().await;
    settle(&[&node]).await;

    assert!(node.handler.plugin_loaded(&node.plugin_id()).await.unwrap());
    assert_eq!(node.plugin.connect_count(), 1);

    let connected = node.handler.connected_plugins().await.unwrap();
    assert_eq!(connected.len(), 1);
    assert_eq!(connected[0].plugin_id, node.plugin_id());
    assert_eq!(connected[0].account_id, "alice-account");
    assert_eq!(connected[0].connection_state, ConnectionState::Connected);

    let events = node.drain_events();
    assert!(events.contains(&HandlerEvent::PluginAdded {
        plugin_id: node.plugin_id()
    }));
    assert!(events.contains(&HandlerEvent::Connected {
        plugin_id: node.plugin_id()
    }));
}

#[tokio::test]
async fn test_duplicate_plugin_is_rejected() {
    let hub = LoopbackHub::new();
    let node = Node::new(&hub, "alice", LoopbackTransport::unreachable());
    node.start().await;

    let err = node.handler.add_plugin(node.plugin.clone()).await.unwrap_err();
    assert!(matches!(err, SignalingError::DuplicatePlugin { .. }));
    assert_eq!(node.handler.all_plugins().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_disconnect_all_forgets_peers_offers_and_sources() {
    let hub = LoopbackHub::new();
    let alice = Node::new(&hub, "alice", LoopbackTransport::new("198.51.100.4", 50210));
    let bob = Node::new(&hub, "bob", LoopbackTransport::new("203.0.113.7", 50210));

    alice.start().await;
    bob.start().await;
    settle(&[&alice, &bob]).await;

    alice.sources.add_remote("bob-source");
    assert!(alice.handler.peer_record(&bob.peer_id()).await.unwrap().is_some());
    assert_eq!(alice.handler.offer_count().await.unwrap(), 1);
    assert!(!alice.handler.is_connected().await.unwrap());

    alice.handler.connect_all().await.unwrap();
    settle(&[&alice, &bob]).await;
    assert!(alice.handler.is_connected().await.unwrap());

    alice.handler.disconnect_all().await.unwrap();

    assert!(alice.handler.connected_plugins().await.unwrap().is_empty());
    assert_eq!(alice.sources.remote_count(), 0);
    assert!(alice.handler.peer_record(&bob.peer_id()).await.unwrap().is_none());
    assert_eq!(alice.handler.offer_count().await.unwrap(), 0);
    assert!(!alice.handler.is_connected().await.unwrap());
    assert_eq!(alice.plugin.disconnect_count(), 1);

    // Bob saw alice leave the hub
    settle(&[&alice, &bob]).await;
    assert_eq!(hub.online(), vec![bob.peer_id()]);
}

#[tokio::test]
async fn test_toggle_connect_flips_state() {
    let hub = LoopbackHub::new();
    let node = Node::new(&hub, "alice", LoopbackTransport::unreachable());
    node.handler
        .load_plugins(vec![node.plugin.clone() as Arc<dyn SignalingPlugin>])
        .await
        .unwrap();
    settle(&[&node]).await;
    assert!(node.handler.is_connected().await.unwrap());

    assert!(!node.handler.toggle_connect().await.unwrap());
    assert!(node.handler.connected_plugins().await.unwrap().is_empty());
    assert!(hub.online().is_empty());

    assert!(node.handler.toggle_connect().await.unwrap());
    settle(&[&node]).await;
    assert_eq!(node.handler.connected_plugins().await.unwrap().len(), 1);
    assert_eq!(node.plugin.connect_count(), 2);
}

#[tokio::test]
async fn test_disconnect_plugin_by_account() {
    let hub = LoopbackHub::new();
    let node = Node::new(&hub, "alice", LoopbackTransport::unreachable());
    let work = Arc::new(LoopbackPlugin::new(&hub, "work-xmpp", "work-account", "alice@work.example/peerlink"));

    node.start().await;
    node.handler.add_plugin(work.clone()).await.unwrap();
    settle(&[&node]).await;

    assert_eq!(node.handler.disconnect_plugin("work-account").await.unwrap(), 1);
    settle(&[&node]).await;

    assert_eq!(work.disconnect_count(), 1);
    assert_eq!(node.plugin.disconnect_count(), 0);
    let connected = node.handler.connected_plugins().await.unwrap();
    assert_eq!(connected.len(), 1);
    assert_eq!(connected[0].plugin_id, node.plugin_id());

    node.handler.connect_plugin("work-xmpp").await.unwrap();
    settle(&[&node]).await;
    assert_eq!(node.handler.connected_plugins().await.unwrap().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_connection_error_reconnects_after_delay() {
    let hub = LoopbackHub::new();
    let mut node = Node::new(&hub, "alice", LoopbackTransport::unreachable());
    node.start().await;
    settle(&[&node]).await;
    node.drain_events();

    node.plugin.report_error(PluginErrorCode::ConnectionError, "stream reset");
    settle(&[&node]).await;

    assert_eq!(node.handler.pending_reconnects(&node.plugin_id()).await.unwrap(), 1);
    assert_eq!(
        node.drain_events(),
        vec![HandlerEvent::ReconnectScheduled {
            plugin_id: node.plugin_id(),
            code: PluginErrorCode::ConnectionError,
            delay: Duration::from_secs(10),
        }]
    );

    tokio::time::sleep(Duration::from_secs(9)).await;
    settle(&[&node]).await;
    assert_eq!(node.plugin.connect_count(), 1);

    tokio::time::sleep(Duration::from_secs(2)).await;
    settle(&[&node]).await;
    assert_eq!(node.plugin.connect_count(), 2);
    assert_eq!(node.handler.pending_reconnects(&node.plugin_id()).await.unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_every_error_gets_its_own_retry() {
    let hub = LoopbackHub::new();
    let node = Node::new(&hub, "alice", LoopbackTransport::unreachable());
    node.start().await;

    node.plugin.report_error(PluginErrorCode::ConnectionError, "first");
    node.plugin.report_error(PluginErrorCode::Other(503), "second");
    node.plugin.report_error(PluginErrorCode::ConnectionError, "third");
    settle(&[&node]).await;
    assert_eq!(node.handler.pending_reconnects(&node.plugin_id()).await.unwrap(), 3);

    tokio::time::sleep(Duration::from_secs(11)).await;
    settle(&[&node]).await;
    assert_eq!(node.plugin.connect_count(), 4);

    // No further attempts without further errors
    tokio::time::sleep(Duration::from_secs(60)).await;
    settle(&[&node]).await;
    assert_eq!(node.plugin.connect_count(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_auth_error_is_not_retried() {
    let hub = LoopbackHub::new();
    let mut node = Node::new(&hub, "alice", LoopbackTransport::unreachable());
    node.plugin.fail_next_connect(PluginErrorCode::AuthError, "not-authorized");

    node.start().await;
    settle(&[&node]).await;

    assert!(node.drain_events().contains(&HandlerEvent::AuthError {
        plugin_id: node.plugin_id(),
        message: "not-authorized".to_string(),
    }));
    assert_eq!(node.handler.pending_reconnects(&node.plugin_id()).await.unwrap(), 0);
    assert!(node.handler.connected_plugins().await.unwrap().is_empty());

    tokio::time::sleep(Duration::from_secs(120)).await;
    settle(&[&node]).await;
    assert_eq!(node.plugin.connect_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_removed_plugin_is_not_reconnected() {
    let hub = LoopbackHub::new();
    let mut node = Node::new(&hub, "alice", LoopbackTransport::unreachable());
    node.start().await;

    node.plugin.report_error(PluginErrorCode::ConnectionError, "stream reset");
    settle(&[&node]).await;
    node.handler.remove_plugin(&node.plugin_id()).await.unwrap();

    assert!(!node.handler.plugin_loaded(&node.plugin_id()).await.unwrap());
    assert!(node.drain_events().contains(&HandlerEvent::PluginRemoved {
        plugin_id: node.plugin_id()
    }));

    tokio::time::sleep(Duration::from_secs(30)).await;
    settle(&[&node]).await;
    assert_eq!(node.plugin.connect_count(), 1);
    assert_eq!(node.plugin.disconnect_count(), 1);
}

#[tokio::test]
async fn test_settings_and_proxy_fan_out() {
    let hub = LoopbackHub::new();
    let node = Node::new(&hub, "alice", LoopbackTransport::unreachable());
    node.start().await;

    node.handler.check_settings().await.unwrap();
    node.handler.settings_changed().await.unwrap();
    node.handler.refresh_proxy().await.unwrap();
    node.handler
        .account_configuration_changed(&node.plugin_id())
        .await
        .unwrap();

    assert_eq!(node.plugin.settings_checks(), 2);
    assert_eq!(node.plugin.proxy_refreshes(), 1);
    assert_eq!(node.plugin.configuration_changes(), 1);

    let err = node.handler.account_configuration_changed("ghost").await.unwrap_err();
    assert!(matches!(err, SignalingError::PluginNotFound { .. }));
}

#[tokio::test]
async fn test_shutdown_disconnects_and_closes() {
    let hub = LoopbackHub::new();
    let node = Node::new(&hub, "alice", LoopbackTransport::unreachable());
    node.start().await;
    settle(&[&node]).await;

    let clone = node.handler.clone();
    node.handler.shutdown().await.unwrap();

    assert_eq!(node.plugin.disconnect_count(), 1);
    assert!(hub.online().is_empty());
    assert!(matches!(
        clone.all_plugins().await,
        Err(SignalingError::HandlerClosed)
    ));
}
