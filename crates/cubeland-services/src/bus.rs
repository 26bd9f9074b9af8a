//! Broadcast bus — cross-session event fan-out.
//!
//! Handlers and background tasks publish [`BroadcastEvent`]s; a consumer in
//! the daemon encodes each event into an outbound frame once and delivers it
//! to every interested session. Each event carries everything needed to
//! build that frame, so the consumer never reaches back into session state.

use cubeland_core::proto::block_change::BlockChangeInfo;
use cubeland_core::proto::Vec3;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Unique per-connection identifier, assigned at accept time.
pub type SessionId = u64;

/// Depth of the bus queue and of each session's outbound queue.
pub const QUEUE_DEPTH: usize = 256;

#[derive(Debug, Clone)]
pub enum BroadcastEvent {
    /// Blocks edited by one session. Delivered to every authenticated
    /// session except the originator — the originator already applied the
    /// edit locally and must not see it echoed.
    BlockEdits {
        origin: SessionId,
        changes: Vec<BlockChangeInfo>,
    },

    /// A chat line. Delivered to every authenticated session.
    Chat { from: Uuid, message: String },

    /// A player finished authenticating.
    PlayerJoined { id: Uuid, display_name: String },

    /// An authenticated player's session ended.
    PlayerLeft { id: Uuid },

    /// A player moved. Delivered to everyone except the subject.
    PlayerMoved {
        id: Uuid,
        position: Vec3,
        angles: Vec3,
    },

    /// Periodic world clock broadcast.
    TimeTick { current_time: f64 },
}

/// Publishing half of the bus, cloned into every producer.
#[derive(Clone)]
pub struct BusSender {
    tx: mpsc::Sender<BroadcastEvent>,
}

impl BusSender {
    /// Publish an event. Awaits queue space — publishers may block briefly,
    /// the consumer never does.
    pub async fn publish(&self, event: BroadcastEvent) {
        if self.tx.send(event).await.is_err() {
            tracing::warn!("broadcast bus is gone, event dropped");
        }
    }
}

/// Create the bus. The receiver goes to the daemon's fan-out consumer.
pub fn channel() -> (BusSender, mpsc::Receiver<BroadcastEvent>) {
    let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
    (BusSender { tx }, rx)
}
