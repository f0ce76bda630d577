//! Gateway client integration tests against the in-process fake
//! gateway: awaitable attach/request exchanges and ordered teardown.

mod harness;

use std::sync::atomic::Ordering;
use std::time::Duration;

use lectern_core::RosterUpdate;
use lectern_rtc::gateway::{
    GatewayClient, ParticipantType, RoomEvent, RoomRequest, VIDEOROOM_PLUGIN,
};

use harness::FakeGateway;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
const KEEPALIVE: Duration = Duration::from_secs(60);

async fn connect(gateway: &FakeGateway) -> GatewayClient {
    harness::init_test_tracing();
    GatewayClient::connect(&gateway.url, REQUEST_TIMEOUT, KEEPALIVE)
        .await
        .expect("gateway connect failed")
}

#[tokio::test]
async fn test_connect_establishes_a_gateway_session() {
    let gateway = FakeGateway::spawn().await;
    let client = connect(&gateway).await;
    assert!(client.session_id() > 0);
    client.destroy().await;
}

#[tokio::test]
async fn test_connect_to_unreachable_gateway_fails() {
    let result = GatewayClient::connect("ws://127.0.0.1:1", REQUEST_TIMEOUT, KEEPALIVE).await;
    assert!(matches!(result, Err(lectern_rtc::Error::GatewayConnect(_))));
}

#[tokio::test]
async fn test_list_participants_round_trip() {
    let gateway = FakeGateway::spawn().await;
    gateway
        .state
        .participants
        .lock()
        .push((7, "[MENTOR] Kim".to_string()));

    let client = connect(&gateway).await;
    let handle = client.attach(VIDEOROOM_PLUGIN).await.unwrap();

    let reply = handle
        .request(&RoomRequest::ListParticipants { room: 42 })
        .await
        .unwrap();
    let update = reply
        .room_event()
        .and_then(|e| e.as_roster_update())
        .unwrap();
    match update {
        RosterUpdate::Snapshot(participants) => {
            assert_eq!(participants.len(), 1);
            assert_eq!(participants[0].display, "[MENTOR] Kim");
        }
        other => panic!("unexpected update: {other:?}"),
    }

    client.destroy().await;
}

#[tokio::test]
async fn test_async_join_waits_through_the_ack() {
    let gateway = FakeGateway::spawn().await;
    let client = connect(&gateway).await;
    let handle = client.attach(VIDEOROOM_PLUGIN).await.unwrap();

    let reply = handle
        .request(&RoomRequest::Join {
            room: 42,
            ptype: ParticipantType::Publisher,
            display: Some("[MENTOR] Kim".to_string()),
            feed: None,
        })
        .await
        .unwrap();

    match reply.room_event() {
        Some(RoomEvent::Joined { room, .. }) => assert_eq!(room, 42),
        other => panic!("unexpected reply: {other:?}"),
    }

    client.destroy().await;
}

#[tokio::test]
async fn test_destroy_detaches_handles_in_reverse_attach_order() {
    let gateway = FakeGateway::spawn().await;
    let client = connect(&gateway).await;

    let first = client.attach(VIDEOROOM_PLUGIN).await.unwrap();
    let second = client.attach(VIDEOROOM_PLUGIN).await.unwrap();

    client.destroy().await;
    client.destroy().await; // exactly one destroy per connect

    assert_eq!(gateway.state.destroys.load(Ordering::SeqCst), 1);
    assert_eq!(
        *gateway.state.detach_order.lock(),
        vec![second.id(), first.id()]
    );
}

#[tokio::test]
async fn test_explicitly_detached_handle_is_not_detached_again() {
    let gateway = FakeGateway::spawn().await;
    let client = connect(&gateway).await;

    let handle = client.attach(VIDEOROOM_PLUGIN).await.unwrap();
    handle.detach().await.unwrap();
    handle.detach().await.unwrap(); // idempotent

    client.destroy().await;

    assert_eq!(*gateway.state.detach_order.lock(), vec![handle.id()]);
    assert!(handle.is_detached());
}
