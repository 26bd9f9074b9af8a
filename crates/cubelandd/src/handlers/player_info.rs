//! Player info endpoint — per-player KV access.
//!
//! Keys are arbitrary UTF-8, values opaque bytes. Gets answer on the
//! request tag; sets have no reply. Everything is scoped to the session's
//! authenticated player id.

use crate::dispatch::{HandlerContext, PacketHandler};
use async_trait::async_trait;
use cubeland_core::codec::decode_payload;
use cubeland_core::error::ProtocolError;
use cubeland_core::frame::FrameHeader;
use cubeland_core::proto::{endpoint, player_info};
use cubeland_services::WorldSource;

pub struct PlayerInfo;

impl PlayerInfo {
    pub fn new() -> Self {
        Self
    }

    async fn handle_get(
        &mut self,
        cx: &mut HandlerContext<'_>,
        header: &FrameHeader,
        payload: &[u8],
    ) -> Result<(), ProtocolError> {
        let player = cx.require_player()?;
        let request: player_info::PlayerInfoGet = decode_payload(payload)?;

        let value = cx
            .shared
            .world
            .get_player_info(player, &request.key)
            .await
            .map_err(|e| ProtocolError::StorageUnavailable(e.to_string()))?;

        let reply = player_info::PlayerInfoGetReply {
            key: request.key,
            found: value.is_some(),
            data: value,
        };
        cx.respond(
            endpoint::PLAYER_INFO,
            player_info::GET_REPLY,
            header.tag,
            &reply,
        )
        .await
    }

    async fn handle_set(
        &mut self,
        cx: &mut HandlerContext<'_>,
        payload: &[u8],
    ) -> Result<(), ProtocolError> {
        let player = cx.require_player()?;
        let request: player_info::PlayerInfoSet = decode_payload(payload)?;

        cx.shared
            .world
            .set_player_info(player, &request.key, request.data.unwrap_or_default())
            .await
            .map_err(|e| ProtocolError::StorageUnavailable(e.to_string()))
    }
}

#[async_trait]
impl PacketHandler for PlayerInfo {
    fn can_handle(&self, header: &FrameHeader) -> bool {
        header.endpoint == endpoint::PLAYER_INFO
            && header.kind != 0
            && header.kind < player_info::TYPE_MAX
    }

    async fn handle(
        &mut self,
        cx: &mut HandlerContext<'_>,
        header: &FrameHeader,
        payload: &[u8],
    ) -> Result<(), ProtocolError> {
        match header.kind {
            player_info::GET => self.handle_get(cx, header, payload).await,
            player_info::SET => self.handle_set(cx, payload).await,
            kind => Err(ProtocolError::UnexpectedState(format!(
                "player info type {kind:#04x} is not client-to-server"
            ))),
        }
    }
}
