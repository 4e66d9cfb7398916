//! End-to-end tests for Orbitdrop.
//!
//! Each test runs a real signaling hub on an ephemeral port and connects
//! full clients to it over WebSockets. Direct channels use the in-memory
//! transport, so the whole pairing flow (share request, accept, offer,
//! answer, candidates) travels through the hub exactly as it would in
//! production.

use std::sync::Arc;
use std::time::Duration;

use orbitdrop_core::channel::memory::MemoryNetwork;
use orbitdrop_core::channel::NullChannelFactory;
use orbitdrop_core::client::{Client, ClientEvent};
use orbitdrop_core::config::Config;
use orbitdrop_core::device::Device;
use orbitdrop_core::hub::{self, Hub};
use orbitdrop_core::session::PairingStatus;
use orbitdrop_core::transfer::{
    TransferContent, TransferEvent, TransferKind, TransferStatus,
};
use tokio::sync::mpsc;

const EVENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Bind a hub on an ephemeral port and serve it in the background.
async fn start_hub() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind hub listener");
    let addr = listener.local_addr().expect("hub local addr");
    tokio::spawn(hub::serve(Arc::new(Hub::new()), listener));
    format!("ws://{addr}/ws")
}

fn test_config(device_id: &str, name: &str, hub_url: &str) -> Config {
    let mut config = Config::default();
    config.general.device_id = device_id.to_string();
    config.general.device_name = name.to_string();
    config.network.hub_url = hub_url.to_string();
    config
}

/// Wait for the first event the extractor accepts, skipping the rest.
async fn wait_for<T>(
    events: &mut mpsc::UnboundedReceiver<ClientEvent>,
    mut extract: impl FnMut(ClientEvent) -> Option<T>,
) -> T {
    tokio::time::timeout(EVENT_TIMEOUT, async {
        loop {
            let event = events.recv().await.expect("client event stream ended");
            if let Some(found) = extract(event) {
                return found;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

async fn wait_for_peer(
    events: &mut mpsc::UnboundedReceiver<ClientEvent>,
    peer_id: &str,
) -> Device {
    let peer_id = peer_id.to_string();
    wait_for(events, move |event| match event {
        ClientEvent::Presence(devices) => devices.into_iter().find(|device| device.id == peer_id),
        _ => None,
    })
    .await
}

#[tokio::test]
async fn test_presence_excludes_self_and_sees_peer() {
    let hub_url = start_hub().await;
    let network = MemoryNetwork::new();

    let config_a = test_config("device-a", "Laptop", &hub_url);
    let config_b = test_config("device-b", "Phone", &hub_url);

    let (_client_a, mut events_a) =
        Client::start(&config_a, Arc::new(network.factory("device-a")));
    let (_client_b, mut events_b) =
        Client::start(&config_b, Arc::new(network.factory("device-b")));

    let peer_of_a = wait_for_peer(&mut events_a, "device-b").await;
    assert_eq!(peer_of_a.name, "Phone");

    let peer_of_b = wait_for_peer(&mut events_b, "device-a").await;
    assert_eq!(peer_of_b.name, "Laptop");
}

#[tokio::test]
async fn test_text_transfer_over_direct_channel() {
    let hub_url = start_hub().await;
    let network = MemoryNetwork::new();

    let config_a = test_config("d1", "Laptop", &hub_url);
    let config_b = test_config("d2", "Phone", &hub_url);

    let (client_a, mut events_a) = Client::start(&config_a, Arc::new(network.factory("d1")));
    let (client_b, mut events_b) = Client::start(&config_b, Arc::new(network.factory("d2")));

    let device_b = wait_for_peer(&mut events_a, "d2").await;
    client_a.queue_text(&device_b, "hello");

    // the receiver decides; accepting kicks off negotiation on the sender
    let request = wait_for(&mut events_b, |event| match event {
        ClientEvent::ShareRequested(request) => Some(request),
        _ => None,
    })
    .await;
    assert_eq!(request.from, "d1");
    assert_eq!(request.kind, TransferKind::Text);
    client_b.accept_share_request(&request);

    // sender reaches connected, drains the queue, and completes
    wait_for(&mut events_a, |event| {
        matches!(
            event,
            ClientEvent::Pairing {
                ref peer_id,
                status: PairingStatus::Connected,
            } if peer_id == "d2"
        )
        .then_some(())
    })
    .await;

    let added_a = wait_for(&mut events_a, |event| match event {
        ClientEvent::Transfer(TransferEvent::Added(item)) => Some(item),
        _ => None,
    })
    .await;
    assert_eq!(added_a.status, TransferStatus::Sending);
    assert_eq!(added_a.content, TransferContent::Text("hello".to_string()));

    // receiver: one receiving record, then completion with the decoded text
    let added_b = wait_for(&mut events_b, |event| match event {
        ClientEvent::Transfer(TransferEvent::Added(item)) => Some(item),
        _ => None,
    })
    .await;
    assert_eq!(added_b.status, TransferStatus::Receiving);
    assert_eq!(added_b.sender, "d1");

    let patch_b = wait_for(&mut events_b, |event| match event {
        ClientEvent::Transfer(TransferEvent::Updated { id, patch })
            if id == added_b.id && patch.content.is_some() =>
        {
            Some(patch)
        }
        _ => None,
    })
    .await;
    assert_eq!(patch_b.status, Some(TransferStatus::Completed));
    assert_eq!(patch_b.content, Some(TransferContent::Text("hello".to_string())));

    // sender progress reaches 100
    wait_for(&mut events_a, |event| match event {
        ClientEvent::Transfer(TransferEvent::Updated { id, patch })
            if id == added_a.id
                && patch.progress == Some(100)
                && patch.status == Some(TransferStatus::Completed) =>
        {
            Some(())
        }
        _ => None,
    })
    .await;
}

#[tokio::test]
async fn test_file_transfer_over_direct_channel() {
    let hub_url = start_hub().await;
    let network = MemoryNetwork::new();

    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("archive.bin");
    // 200 KB at the default 64 KB chunk size -> 4 chunks
    let payload: Vec<u8> = (0u32..200 * 1024).map(|i| (i % 241) as u8).collect();
    tokio::fs::write(&path, &payload).await.expect("write payload");

    let config_a = test_config("d1", "Laptop", &hub_url);
    let config_b = test_config("d2", "Phone", &hub_url);

    let (client_a, mut events_a) = Client::start(&config_a, Arc::new(network.factory("d1")));
    let (client_b, mut events_b) = Client::start(&config_b, Arc::new(network.factory("d2")));

    let device_b = wait_for_peer(&mut events_a, "d2").await;
    client_a.queue_file(&device_b, &path, TransferKind::File);

    let request = wait_for(&mut events_b, |event| match event {
        ClientEvent::ShareRequested(request) => Some(request),
        _ => None,
    })
    .await;
    assert_eq!(request.file_name.as_deref(), Some("archive.bin"));
    assert_eq!(request.file_size, Some(payload.len() as u64));
    client_b.accept_share_request(&request);

    let added_b = wait_for(&mut events_b, |event| match event {
        ClientEvent::Transfer(TransferEvent::Added(item)) => Some(item),
        _ => None,
    })
    .await;

    let content = wait_for(&mut events_b, |event| match event {
        ClientEvent::Transfer(TransferEvent::Updated { id, patch })
            if id == added_b.id && patch.content.is_some() =>
        {
            patch.content
        }
        _ => None,
    })
    .await;
    match content {
        TransferContent::Bytes { data, .. } => assert_eq!(data.as_ref(), payload.as_slice()),
        other => panic!("expected binary content, got {other:?}"),
    }
}

#[tokio::test]
async fn test_relay_fallback_when_no_direct_transport() {
    let hub_url = start_hub().await;

    let config_a = test_config("d1", "Laptop", &hub_url);
    let config_b = test_config("d2", "Phone", &hub_url);

    // no direct-channel transport anywhere: accepting pairs, negotiation
    // collapses, and the payload takes the hub
    let (client_a, mut events_a) = Client::start(&config_a, Arc::new(NullChannelFactory));
    let (client_b, mut events_b) = Client::start(&config_b, Arc::new(NullChannelFactory));

    let device_b = wait_for_peer(&mut events_a, "d2").await;
    client_a.queue_text(&device_b, "via the hub");

    let request = wait_for(&mut events_b, |event| match event {
        ClientEvent::ShareRequested(request) => Some(request),
        _ => None,
    })
    .await;
    client_b.accept_share_request(&request);

    // sender pairing collapses to paused, then the relay path carries it
    wait_for(&mut events_a, |event| {
        matches!(
            event,
            ClientEvent::Pairing {
                status: PairingStatus::Paused,
                ..
            }
        )
        .then_some(())
    })
    .await;

    let added_b = wait_for(&mut events_b, |event| match event {
        ClientEvent::Transfer(TransferEvent::Added(item)) => Some(item),
        _ => None,
    })
    .await;
    assert_eq!(added_b.status, TransferStatus::Receiving);

    let patch_b = wait_for(&mut events_b, |event| match event {
        ClientEvent::Transfer(TransferEvent::Updated { patch, .. })
            if patch.content.is_some() =>
        {
            Some(patch)
        }
        _ => None,
    })
    .await;
    assert_eq!(
        patch_b.content,
        Some(TransferContent::Text("via the hub".to_string()))
    );

    // sender saw its own record complete (fire-and-forget semantics)
    wait_for(&mut events_a, |event| match event {
        ClientEvent::Transfer(TransferEvent::Updated { patch, .. })
            if patch.status == Some(TransferStatus::Completed) =>
        {
            Some(())
        }
        _ => None,
    })
    .await;
}

#[tokio::test]
async fn test_no_transport_marks_transfer_failed() {
    let hub_url = start_hub().await;

    let mut config_a = test_config("d1", "Laptop", &hub_url);
    config_a.transfer.relay_fallback = false;
    let config_b = test_config("d2", "Phone", &hub_url);

    let (client_a, mut events_a) = Client::start(&config_a, Arc::new(NullChannelFactory));
    let (client_b, mut events_b) = Client::start(&config_b, Arc::new(NullChannelFactory));

    let device_b = wait_for_peer(&mut events_a, "d2").await;
    client_a.queue_text(&device_b, "stranded");

    let request = wait_for(&mut events_b, |event| match event {
        ClientEvent::ShareRequested(request) => Some(request),
        _ => None,
    })
    .await;
    client_b.accept_share_request(&request);

    let failed = wait_for(&mut events_a, |event| match event {
        ClientEvent::Transfer(TransferEvent::Added(item))
            if item.status == TransferStatus::Failed =>
        {
            Some(item)
        }
        _ => None,
    })
    .await;
    let error = failed.error.expect("failure reason");
    assert!(error.contains("no viable transport"), "unexpected error: {error}");
}

#[tokio::test]
async fn test_reject_share_request() {
    let hub_url = start_hub().await;
    let network = MemoryNetwork::new();

    let config_a = test_config("d1", "Laptop", &hub_url);
    let config_b = test_config("d2", "Phone", &hub_url);

    let (client_a, mut events_a) = Client::start(&config_a, Arc::new(network.factory("d1")));
    let (client_b, mut events_b) = Client::start(&config_b, Arc::new(network.factory("d2")));

    let device_b = wait_for_peer(&mut events_a, "d2").await;
    client_a.queue_text(&device_b, "unwanted");

    let request = wait_for(&mut events_b, |event| match event {
        ClientEvent::ShareRequested(request) => Some(request),
        _ => None,
    })
    .await;
    client_b.reject_share_request(&request);

    wait_for(&mut events_a, |event| {
        matches!(
            event,
            ClientEvent::Pairing {
                ref peer_id,
                status: PairingStatus::Rejected,
            } if peer_id == "d2"
        )
        .then_some(())
    })
    .await;
}

#[tokio::test]
async fn test_text_message_through_hub() {
    let hub_url = start_hub().await;
    let network = MemoryNetwork::new();

    let config_a = test_config("d1", "Laptop", &hub_url);
    let config_b = test_config("d2", "Phone", &hub_url);

    let (client_a, mut events_a) = Client::start(&config_a, Arc::new(network.factory("d1")));
    let (_client_b, mut events_b) = Client::start(&config_b, Arc::new(network.factory("d2")));

    let device_b = wait_for_peer(&mut events_a, "d2").await;
    client_a.send_text_message(&device_b, "ping without pairing");

    let (from, text) = wait_for(&mut events_b, |event| match event {
        ClientEvent::TextReceived { from, text } => Some((from, text)),
        _ => None,
    })
    .await;
    assert_eq!(from, "d1");
    assert_eq!(text, "ping without pairing");
}

#[tokio::test]
async fn test_rename_propagates_through_presence() {
    let hub_url = start_hub().await;
    let network = MemoryNetwork::new();

    let config_a = test_config("d1", "Laptop", &hub_url);
    let config_b = test_config("d2", "Phone", &hub_url);

    let (client_a, mut events_a) = Client::start(&config_a, Arc::new(network.factory("d1")));
    let (_client_b, mut events_b) = Client::start(&config_b, Arc::new(network.factory("d2")));

    wait_for_peer(&mut events_a, "d2").await;
    wait_for_peer(&mut events_b, "d1").await;

    client_a.rename("Rocket");

    let renamed = wait_for(&mut events_b, |event| match event {
        ClientEvent::Presence(devices) => devices
            .into_iter()
            .find(|device| device.id == "d1" && device.name == "Rocket"),
        _ => None,
    })
    .await;
    assert_eq!(renamed.name, "Rocket");
}
