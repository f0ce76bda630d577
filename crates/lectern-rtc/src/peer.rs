//! Peer-connection construction shared by publisher and subscriber.

use std::sync::Arc;

use tracing::debug;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

use crate::config::EngineConfig;
use crate::events::{emit, EventSender, SessionEvent};
use crate::{Error, Result};

/// Create a peer connection with default codecs/interceptors and the
/// configured ICE servers, reporting connection-state changes on the
/// engine event stream.
pub(crate) async fn create_peer_connection(
    config: &EngineConfig,
    events: EventSender,
) -> Result<Arc<RTCPeerConnection>> {
    let mut media_engine = MediaEngine::default();
    media_engine.register_default_codecs()?;

    let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;

    let api = APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build();

    let mut ice_servers: Vec<RTCIceServer> = config
        .stun_servers
        .iter()
        .map(|url| RTCIceServer {
            urls: vec![url.clone()],
            ..Default::default()
        })
        .collect();
    for turn in &config.turn_servers {
        ice_servers.push(RTCIceServer {
            urls: vec![turn.url.clone()],
            username: turn.username.clone(),
            credential: turn.credential.clone(),
            ..Default::default()
        });
    }

    let rtc_config = RTCConfiguration {
        ice_servers,
        ..Default::default()
    };

    let pc = Arc::new(api.new_peer_connection(rtc_config).await?);

    pc.on_peer_connection_state_change(Box::new(move |state| {
        let events = events.clone();
        Box::pin(async move {
            debug!(%state, "peer connection state change");
            emit(
                &events,
                SessionEvent::ConnectionStateChanged {
                    state: state.to_string(),
                },
            );
        })
    }));

    Ok(pc)
}

/// Apply a local description and wait for ICE gathering to complete,
/// returning the full description to put on the wire.
///
/// Candidates are not trickled; the gateway accepts complete SDPs, and
/// waiting removes the candidate-ordering races entirely.
pub(crate) async fn set_local_and_gather(
    pc: &Arc<RTCPeerConnection>,
    description: RTCSessionDescription,
) -> Result<RTCSessionDescription> {
    const GATHER_TIMEOUT: std::time::Duration = std::time::Duration::from_millis(2500);

    let mut gather_complete = pc.gathering_complete_promise().await;
    pc.set_local_description(description)
        .await
        .map_err(|e| Error::Negotiation(format!("set_local_description failed: {e}")))?;

    // A stalled interface must not stall the negotiation; whatever has
    // been gathered by the deadline goes on the wire.
    if tokio::time::timeout(GATHER_TIMEOUT, gather_complete.recv())
        .await
        .is_err()
    {
        debug!("ICE gathering timeout after {GATHER_TIMEOUT:?}");
    }

    pc.local_description().await.ok_or_else(|| {
        Error::Negotiation("no local description after ICE gathering".to_string())
    })
}
