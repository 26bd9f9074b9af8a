//! World info endpoint — read-only access to the world KV.
//!
//! There is deliberately no set operation on this endpoint; world keys are
//! written by the server itself (clock persistence) or by out-of-band
//! tooling.

use crate::dispatch::{HandlerContext, PacketHandler};
use async_trait::async_trait;
use cubeland_core::codec::decode_payload;
use cubeland_core::error::ProtocolError;
use cubeland_core::frame::FrameHeader;
use cubeland_core::proto::{endpoint, world_info};
use cubeland_services::WorldSource;

pub struct WorldInfo;

impl WorldInfo {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PacketHandler for WorldInfo {
    fn can_handle(&self, header: &FrameHeader) -> bool {
        header.endpoint == endpoint::WORLD_INFO
            && header.kind != 0
            && header.kind < world_info::TYPE_MAX
    }

    async fn handle(
        &mut self,
        cx: &mut HandlerContext<'_>,
        header: &FrameHeader,
        payload: &[u8],
    ) -> Result<(), ProtocolError> {
        cx.require_player()?;

        match header.kind {
            world_info::GET => {
                let request: world_info::WorldInfoGet = decode_payload(payload)?;

                let value = cx
                    .shared
                    .world
                    .get_world_info(&request.key)
                    .await
                    .map_err(|e| ProtocolError::StorageUnavailable(e.to_string()))?;

                let reply = world_info::WorldInfoGetReply {
                    key: request.key,
                    found: value.is_some(),
                    data: value,
                };
                cx.respond(
                    endpoint::WORLD_INFO,
                    world_info::GET_REPLY,
                    header.tag,
                    &reply,
                )
                .await
            }
            kind => Err(ProtocolError::UnexpectedState(format!(
                "world info type {kind:#04x} is not client-to-server"
            ))),
        }
    }
}
