//! Chat endpoint.
//!
//! Inbound chat lines are republished on the bus with the sender forced to
//! the session's authenticated player id — whatever id the client put in
//! the message is ignored. Join/leave notices are produced by the auth
//! handler and the reaper; this handler only consumes the client→server
//! direction.

use crate::dispatch::{HandlerContext, PacketHandler};
use async_trait::async_trait;
use cubeland_core::codec::decode_payload;
use cubeland_core::error::ProtocolError;
use cubeland_core::frame::FrameHeader;
use cubeland_core::proto::{chat, endpoint};
use cubeland_services::BroadcastEvent;

pub struct Chat;

impl Chat {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PacketHandler for Chat {
    fn can_handle(&self, header: &FrameHeader) -> bool {
        header.endpoint == endpoint::CHAT && header.kind != 0 && header.kind < chat::TYPE_MAX
    }

    async fn handle(
        &mut self,
        cx: &mut HandlerContext<'_>,
        header: &FrameHeader,
        payload: &[u8],
    ) -> Result<(), ProtocolError> {
        let player = cx.require_player()?;

        match header.kind {
            chat::MESSAGE => {
                let message: chat::ChatMessage = decode_payload(payload)?;

                tracing::trace!(player = %player, "chat message received");
                cx.shared
                    .bus
                    .publish(BroadcastEvent::Chat {
                        from: player,
                        message: message.message,
                    })
                    .await;
                Ok(())
            }
            kind => Err(ProtocolError::UnexpectedState(format!(
                "chat type {kind:#04x} is not client-to-server"
            ))),
        }
    }
}
