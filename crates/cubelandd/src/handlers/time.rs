//! Time endpoint.
//!
//! Entirely server→client: the initial clock state goes out once when
//! authentication completes, and periodic `TimeUpdate`s arrive via the bus
//! (`TimeTick` events from the clock task). No client→server time messages
//! exist, so anything inbound on this endpoint is a protocol violation.

use crate::dispatch::{HandlerContext, PacketHandler};
use async_trait::async_trait;
use cubeland_core::error::ProtocolError;
use cubeland_core::frame::FrameHeader;
use cubeland_core::proto::{endpoint, time};

pub struct Time;

impl Time {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PacketHandler for Time {
    fn can_handle(&self, header: &FrameHeader) -> bool {
        header.endpoint == endpoint::TIME && header.kind != 0 && header.kind < time::TYPE_MAX
    }

    async fn handle(
        &mut self,
        cx: &mut HandlerContext<'_>,
        header: &FrameHeader,
        _payload: &[u8],
    ) -> Result<(), ProtocolError> {
        cx.require_player()?;
        Err(ProtocolError::UnexpectedState(format!(
            "time type {:#04x} is not client-to-server",
            header.kind
        )))
    }

    async fn auth_state_changed(
        &mut self,
        cx: &mut HandlerContext<'_>,
    ) -> Result<(), ProtocolError> {
        if cx.session.player_id().is_none() {
            return Ok(());
        }

        let initial = time::TimeInitialState {
            tick_factor: cx.shared.clock.tick_factor(),
            current_time: cx.shared.clock.now(),
        };
        cx.push(endpoint::TIME, time::INITIAL_STATE, &initial).await
    }
}
