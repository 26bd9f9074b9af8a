//! Block change endpoint.
//!
//! Client edits are applied straight to the chunk, the chunk is marked
//! dirty, and the batch is published on the bus — the consumer fans it out
//! to every other authenticated session, so the originator never sees its
//! own edit echoed back. A veto step could drop changes before the apply;
//! no veto is currently installed.

use crate::dispatch::{HandlerContext, PacketHandler};
use async_trait::async_trait;
use cubeland_core::codec::decode_payload;
use cubeland_core::error::ProtocolError;
use cubeland_core::frame::FrameHeader;
use cubeland_core::proto::{block_change, endpoint};
use cubeland_services::{BroadcastEvent, WorldSource};

pub struct BlockChange;

impl BlockChange {
    pub fn new() -> Self {
        Self
    }

    async fn handle_report(
        &mut self,
        cx: &mut HandlerContext<'_>,
        payload: &[u8],
    ) -> Result<(), ProtocolError> {
        let report: block_change::BlockChangeReport = decode_payload(payload)?;

        if report.changes.is_empty() {
            return Err(ProtocolError::Malformed("empty block change report".into()));
        }

        for change in &report.changes {
            let chunk = cx
                .shared
                .chunk_at(change.chunk_pos)
                .await
                .map_err(|e| ProtocolError::StorageUnavailable(e.to_string()))?;

            chunk
                .write()
                .set_block(change.block_pos, change.new_id)
                .map_err(|e| ProtocolError::Malformed(e.to_string()))?;
            cx.shared.world.mark_chunk_dirty(&chunk);

            tracing::trace!(
                session = cx.session.id,
                chunk = %change.chunk_pos,
                block = ?change.block_pos,
                id = %change.new_id,
                "block changed"
            );
        }

        cx.shared
            .bus
            .publish(BroadcastEvent::BlockEdits {
                origin: cx.session.id,
                changes: report.changes,
            })
            .await;
        Ok(())
    }

    fn handle_unregister(
        &mut self,
        cx: &mut HandlerContext<'_>,
        payload: &[u8],
    ) -> Result<(), ProtocolError> {
        let request: block_change::BlockChangeUnregister = decode_payload(payload)?;

        if !cx.shared.observers.remove(request.chunk_pos, cx.session.id) {
            tracing::error!(
                session = cx.session.id,
                chunk = %request.chunk_pos,
                "unsubscribe for chunk without a registration"
            );
        }
        Ok(())
    }
}

#[async_trait]
impl PacketHandler for BlockChange {
    fn can_handle(&self, header: &FrameHeader) -> bool {
        header.endpoint == endpoint::BLOCK_CHANGE
            && header.kind != 0
            && header.kind < block_change::TYPE_MAX
    }

    async fn handle(
        &mut self,
        cx: &mut HandlerContext<'_>,
        header: &FrameHeader,
        payload: &[u8],
    ) -> Result<(), ProtocolError> {
        cx.require_player()?;

        match header.kind {
            block_change::REPORT => self.handle_report(cx, payload).await,
            block_change::UNREGISTER => self.handle_unregister(cx, payload),
            kind => Err(ProtocolError::UnexpectedState(format!(
                "block change type {kind:#04x} is not client-to-server"
            ))),
        }
    }
}
