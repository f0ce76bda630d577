//! Mentee-side subscriber session.
//!
//! Attaches a subscriber handle per resolved feed, answers the
//! gateway's offer with receive-only media, and rebinds inbound tracks
//! to the viewing surface as they arrive. At most one subscription
//! exists at a time, and at most one subscribe-join is ever in flight.

use std::sync::Arc;

use lectern_core::FeedId;
use tracing::{debug, info, warn};
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

use crate::config::EngineConfig;
use crate::events::{emit, EventSender, SessionEvent};
use crate::gateway::{
    GatewayClient, HandleEvent, Jsep, ParticipantType, PluginHandle, RoomEvent, RoomRequest,
    VIDEOROOM_PLUGIN,
};
use crate::peer;
use crate::surface::{MediaSurface, RemoteStream};
use crate::{Error, Result};

struct Subscription {
    feed: FeedId,
    handle: Arc<PluginHandle>,
    pc: Arc<RTCPeerConnection>,
    pump: tokio::task::JoinHandle<()>,
}

/// Mentee-side session: binds one remote feed to the viewing surface.
pub struct SubscriberSession {
    room: u64,
    client: Arc<GatewayClient>,
    config: EngineConfig,
    surface: Arc<dyn MediaSurface>,
    events: EventSender,
    /// Holding this lock across the whole join is what guarantees no
    /// two subscribe-joins are ever in flight together.
    current: tokio::sync::Mutex<Option<Subscription>>,
}

impl SubscriberSession {
    /// Subscriber for a room over an established gateway connection.
    pub fn new(
        room: u64,
        client: Arc<GatewayClient>,
        config: EngineConfig,
        surface: Arc<dyn MediaSurface>,
        events: EventSender,
    ) -> Self {
        Self {
            room,
            client,
            config,
            surface,
            events,
            current: tokio::sync::Mutex::new(None),
        }
    }

    /// Feed currently bound, if any.
    pub async fn current_feed(&self) -> Option<FeedId> {
        self.current.lock().await.as_ref().map(|s| s.feed)
    }

    /// Subscribe to a feed. Subscribing to the already-bound feed is a
    /// no-op; switching feeds always unsubscribes the previous one
    /// first.
    pub async fn subscribe_to(&self, feed: FeedId) -> Result<()> {
        let mut current = self.current.lock().await;

        if let Some(subscription) = current.as_ref() {
            if subscription.feed == feed {
                return Ok(());
            }
        }
        if let Some(previous) = current.take() {
            self.release(previous).await;
        }

        info!(feed = %feed, room = self.room, "subscribing");

        let handle = self.client.attach(VIDEOROOM_PLUGIN).await?;
        let pc = match peer::create_peer_connection(&self.config, self.events.clone()).await {
            Ok(pc) => pc,
            Err(e) => {
                let _ = handle.detach().await;
                return Err(e);
            }
        };

        // Inbound media accumulates track-by-track into one stream;
        // every arrival rebinds the surface so a feed swap never
        // leaves a stale stream attached.
        let remote = Arc::new(parking_lot::Mutex::new(RemoteStream::new()));
        {
            let remote = Arc::clone(&remote);
            let surface = Arc::clone(&self.surface);
            pc.on_track(Box::new(move |track, _receiver, _transceiver| {
                let remote = Arc::clone(&remote);
                let surface = Arc::clone(&surface);
                Box::pin(async move {
                    let mut stream = remote.lock();
                    debug!(kind = %track.kind(), "remote track arrived");
                    stream.upsert(track);
                    surface.bind_remote(&stream);
                })
            }));
        }

        match self.join_feed(&handle, &pc, feed).await {
            Ok(()) => {}
            Err(e) => {
                let _ = handle.detach().await;
                let _ = pc.close().await;
                return Err(e);
            }
        }

        // Drain the handle's event stream so gateway-side hangups are
        // at least visible in the logs.
        let pump = {
            let handle = Arc::clone(&handle);
            tokio::spawn(async move {
                while let Some(event) = handle.next_event().await {
                    if let HandleEvent::Hangup { reason } = event {
                        debug!(?reason, "subscriber handle hung up");
                    }
                }
            })
        };

        *current = Some(Subscription {
            feed,
            handle,
            pc,
            pump,
        });
        emit(
            &self.events,
            SessionEvent::SubscriptionChanged { feed: Some(feed) },
        );
        Ok(())
    }

    /// Subscribe-join exchange: join names the feed, the reply carries
    /// the gateway's offer, our answer is receive-only, and `start`
    /// acknowledges with that answer.
    async fn join_feed(
        &self,
        handle: &Arc<PluginHandle>,
        pc: &Arc<RTCPeerConnection>,
        feed: FeedId,
    ) -> Result<()> {
        let join = RoomRequest::Join {
            room: self.room,
            ptype: ParticipantType::Subscriber,
            display: None,
            feed: Some(feed.0),
        };
        let reply = handle.request(&join).await?;

        match reply.room_event() {
            Some(RoomEvent::Attached { id, .. }) => {
                debug!(feed = id, "attached to feed");
            }
            _ => {
                return Err(Error::Gateway(
                    "subscribe join was not an attached event".to_string(),
                ))
            }
        }

        let offer = reply
            .jsep
            .filter(Jsep::is_offer)
            .ok_or_else(|| Error::Negotiation("gateway sent no offer".to_string()))?;

        let remote = RTCSessionDescription::offer(offer.sdp)
            .map_err(|e| Error::Negotiation(format!("invalid offer: {e}")))?;
        pc.set_remote_description(remote)
            .await
            .map_err(|e| Error::Negotiation(format!("set_remote_description failed: {e}")))?;

        // No local tracks were added, so the generated answer is
        // receive-only on every media section.
        let answer = pc
            .create_answer(None)
            .await
            .map_err(|e| Error::Negotiation(format!("create_answer failed: {e}")))?;
        let local = peer::set_local_and_gather(pc, answer).await?;

        handle
            .request_with_jsep(&RoomRequest::Start, Jsep::answer(local.sdp))
            .await?;

        Ok(())
    }

    /// Drop the current subscription, if any. Idempotent.
    pub async fn unsubscribe(&self) {
        let mut current = self.current.lock().await;
        if let Some(subscription) = current.take() {
            info!(feed = %subscription.feed, "unsubscribing");
            self.release(subscription).await;
            emit(&self.events, SessionEvent::SubscriptionChanged { feed: None });
        }
    }

    async fn release(&self, subscription: Subscription) {
        subscription.pump.abort();
        if let Err(e) = subscription.handle.detach().await {
            warn!("subscriber detach failed: {e}");
        }
        if let Err(e) = subscription.pc.close().await {
            warn!("subscriber peer connection close failed: {e}");
        }
        // never retain a handle bound to a feed that no longer exists
        self.surface.clear();
    }

    /// Teardown alias used by the lifecycle controller.
    pub async fn close(&self) {
        self.unsubscribe().await;
    }
}
