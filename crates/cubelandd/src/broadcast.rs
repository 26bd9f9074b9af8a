//! Broadcast fan-out — the bus consumer.
//!
//! One task drains the bus, encodes each event into an outbound frame
//! exactly once, and walks the session registry delivering it. All
//! broadcasts carry tag 0. Delivery uses the non-blocking queue path: a
//! session whose outbound queue is full loses the frame (with a warning)
//! rather than stalling the bus.

use crate::server::ServerShared;
use crate::session::SessionHandle;
use bytes::Bytes;
use cubeland_core::codec::{encode_payload, WireEncode};
use cubeland_core::frame::encode_frame;
use cubeland_core::proto::{block_change, chat, endpoint, movement, time};
use cubeland_services::BroadcastEvent;
use std::sync::Arc;
use tokio::sync::{broadcast as shutdown_channel, mpsc};
use uuid::Uuid;

pub async fn run_consumer(
    shared: Arc<ServerShared>,
    mut rx: mpsc::Receiver<BroadcastEvent>,
    mut shutdown: shutdown_channel::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::debug!("broadcast consumer shutting down");
                return;
            }

            event = rx.recv() => {
                let Some(event) = event else {
                    tracing::debug!("bus closed, broadcast consumer exiting");
                    return;
                };
                deliver(&shared, event);
            }
        }
    }
}

/// Which sessions a frame goes to.
enum Audience {
    /// Every authenticated session.
    Authenticated,
    /// Every authenticated session except one session id.
    ExceptSession(cubeland_services::SessionId),
    /// Every authenticated session except one player.
    ExceptPlayer(Uuid),
}

fn deliver(shared: &ServerShared, event: BroadcastEvent) {
    let (frame, audience) = match event {
        BroadcastEvent::BlockEdits { origin, changes } => {
            let message = block_change::BlockChangeBroadcast { changes };
            (
                encode(endpoint::BLOCK_CHANGE, block_change::BROADCAST, &message),
                Audience::ExceptSession(origin),
            )
        }
        BroadcastEvent::Chat { from, message } => {
            let message = chat::ChatMessage {
                sender: from,
                message,
            };
            (
                encode(endpoint::CHAT, chat::MESSAGE, &message),
                Audience::Authenticated,
            )
        }
        BroadcastEvent::PlayerJoined { id, display_name } => {
            let message = chat::ChatPlayerJoined {
                player_id: id,
                display_name,
            };
            (
                encode(endpoint::CHAT, chat::PLAYER_JOINED, &message),
                Audience::Authenticated,
            )
        }
        BroadcastEvent::PlayerLeft { id } => {
            let message = chat::ChatPlayerLeft { player_id: id };
            (
                encode(endpoint::CHAT, chat::PLAYER_LEFT, &message),
                Audience::Authenticated,
            )
        }
        BroadcastEvent::PlayerMoved {
            id,
            position,
            angles,
        } => {
            let message = movement::PlayerPositionBroadcast {
                player_id: id,
                position,
                angles,
            };
            (
                encode(
                    endpoint::PLAYER_MOVEMENT,
                    movement::POSITION_BROADCAST,
                    &message,
                ),
                Audience::ExceptPlayer(id),
            )
        }
        BroadcastEvent::TimeTick { current_time } => {
            let message = time::TimeUpdate { current_time };
            (
                encode(endpoint::TIME, time::UPDATE, &message),
                Audience::Authenticated,
            )
        }
    };

    let Some(frame) = frame else { return };

    shared.sessions.for_each(|session| {
        if wants(session, &audience) {
            // send_frame drops on a full queue; that is the backpressure
            // policy for broadcasts.
            session.send_frame(frame.clone());
        }
    });
}

fn wants(session: &Arc<SessionHandle>, audience: &Audience) -> bool {
    let Some(player) = session.player_id() else {
        return false;
    };
    match audience {
        Audience::Authenticated => true,
        Audience::ExceptSession(origin) => session.id != *origin,
        Audience::ExceptPlayer(subject) => player != *subject,
    }
}

fn encode<M: WireEncode>(ep: u8, kind: u8, message: &M) -> Option<Bytes> {
    match encode_frame(ep, kind, 0, &encode_payload(message)) {
        Ok(frame) => Some(frame),
        Err(e) => {
            tracing::warn!(endpoint = ep, kind, error = %e, "broadcast frame encoding failed");
            None
        }
    }
}
