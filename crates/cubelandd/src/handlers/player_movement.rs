//! Player movement endpoint.
//!
//! Position updates carry a 32-bit epoch so late or reordered packets can
//! be discarded: an epoch behind the last accepted one by fewer than
//! `EPOCH_SLACK` is stale, a larger gap is treated as counter wrap and
//! accepted. The session's broadcast tick publishes the position to other
//! players only when it changed since the last tick.
//!
//! The latest position persists to the player-info KV under
//! `server.player.position`; it is loaded once after authentication and
//! replayed to the client as `PlayerPositionInitial`.

use crate::dispatch::{HandlerContext, PacketHandler};
use async_trait::async_trait;
use cubeland_core::codec::{decode_payload, encode_payload};
use cubeland_core::error::ProtocolError;
use cubeland_core::frame::FrameHeader;
use cubeland_core::proto::{endpoint, movement, Vec3};
use cubeland_services::{BroadcastEvent, WorldSource, PLAYER_POSITION_KEY};

/// Maximum backwards epoch distance still treated as stale (not wrap).
const EPOCH_SLACK: u32 = 10;

pub struct PlayerMovement {
    last_epoch: u32,
    position: Vec3,
    angles: Vec3,
    /// Position changed since the last save.
    dirty: bool,
    /// Position changed since the last broadcast tick.
    needs_broadcast: bool,
    loaded_initial: bool,
}

impl PlayerMovement {
    pub fn new() -> Self {
        Self {
            last_epoch: 0,
            position: Vec3::default(),
            angles: Vec3::default(),
            dirty: false,
            needs_broadcast: false,
            loaded_initial: false,
        }
    }

    fn handle_position_changed(
        &mut self,
        cx: &mut HandlerContext<'_>,
        payload: &[u8],
    ) -> Result<(), ProtocolError> {
        let update: movement::PlayerPositionChanged = decode_payload(payload)?;

        if update.epoch < self.last_epoch && self.last_epoch - update.epoch < EPOCH_SLACK {
            tracing::debug!(
                session = cx.session.id,
                epoch = update.epoch,
                last_epoch = self.last_epoch,
                "stale position update discarded"
            );
            return Ok(());
        }

        self.last_epoch = update.epoch;
        self.position = update.position;
        self.angles = update.angles;
        self.dirty = true;
        self.needs_broadcast = true;
        Ok(())
    }
}

#[async_trait]
impl PacketHandler for PlayerMovement {
    fn can_handle(&self, header: &FrameHeader) -> bool {
        header.endpoint == endpoint::PLAYER_MOVEMENT
            && header.kind != 0
            && header.kind < movement::TYPE_MAX
    }

    async fn handle(
        &mut self,
        cx: &mut HandlerContext<'_>,
        header: &FrameHeader,
        payload: &[u8],
    ) -> Result<(), ProtocolError> {
        cx.require_player()?;

        match header.kind {
            movement::POSITION_CHANGED => self.handle_position_changed(cx, payload),
            kind => Err(ProtocolError::UnexpectedState(format!(
                "movement type {kind:#04x} is not client-to-server"
            ))),
        }
    }

    async fn broadcast_tick(&mut self, cx: &mut HandlerContext<'_>) -> Result<(), ProtocolError> {
        if !self.needs_broadcast {
            return Ok(());
        }
        let Some(player) = cx.session.player_id() else {
            return Ok(());
        };

        cx.shared
            .bus
            .publish(BroadcastEvent::PlayerMoved {
                id: player,
                position: self.position,
                angles: self.angles,
            })
            .await;
        self.needs_broadcast = false;
        Ok(())
    }

    async fn auth_state_changed(
        &mut self,
        cx: &mut HandlerContext<'_>,
    ) -> Result<(), ProtocolError> {
        if self.loaded_initial {
            return Ok(());
        }
        let Some(player) = cx.session.player_id() else {
            return Ok(());
        };
        self.loaded_initial = true;

        let stored = cx
            .shared
            .world
            .get_player_info(player, PLAYER_POSITION_KEY)
            .await
            .map_err(|e| ProtocolError::StorageUnavailable(e.to_string()))?;

        let Some(bytes) = stored else {
            // First time on this world; the client picks its spawn.
            return Ok(());
        };

        let saved: movement::SavedPosition = match decode_payload(&bytes) {
            Ok(saved) => saved,
            Err(e) => {
                tracing::warn!(player = %player, error = %e, "saved position is corrupt");
                return Ok(());
            }
        };

        self.position = saved.position;
        self.angles = saved.angles;

        cx.push(
            endpoint::PLAYER_MOVEMENT,
            movement::POSITION_INITIAL,
            &movement::PlayerPositionInitial {
                position: saved.position,
                angles: saved.angles,
            },
        )
        .await
    }

    fn is_dirty(&self) -> bool {
        self.dirty
    }

    async fn save(&mut self, cx: &mut HandlerContext<'_>) -> Result<(), ProtocolError> {
        let Some(player) = cx.session.player_id() else {
            return Ok(());
        };

        let saved = movement::SavedPosition {
            position: self.position,
            angles: self.angles,
        };
        cx.shared
            .world
            .set_player_info(player, PLAYER_POSITION_KEY, encode_payload(&saved))
            .await
            .map_err(|e| ProtocolError::StorageUnavailable(e.to_string()))?;

        self.dirty = false;
        Ok(())
    }
}
