//! Routes incoming frames to the appropriate endpoint handler.
//!
//! A session owns an ordered list of handlers; the first whose
//! [`PacketHandler::can_handle`] accepts a frame gets it. Unmatched frames
//! are logged and dropped — never fatal. The registry itself knows nothing
//! about authentication; handlers that need it check the session state and
//! fail with `Unauthorized` themselves.

use crate::server::ServerShared;
use crate::session::SessionHandle;
use async_trait::async_trait;
use cubeland_core::codec::{encode_payload, WireEncode};
use cubeland_core::error::ProtocolError;
use cubeland_core::frame::{encode_frame, FrameHeader};
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use uuid::Uuid;

/// Everything a handler can touch while processing one frame.
///
/// The connection reference is the session task's own write path, so
/// responses written here preserve the single-writer invariant.
pub struct HandlerContext<'a> {
    pub conn: &'a mut (dyn AsyncWrite + Unpin + Send),
    pub session: &'a Arc<SessionHandle>,
    pub shared: &'a Arc<ServerShared>,
}

impl HandlerContext<'_> {
    /// Write a reply frame correlated to a request tag.
    pub async fn respond<M: WireEncode>(
        &mut self,
        endpoint: u8,
        kind: u8,
        tag: u16,
        message: &M,
    ) -> Result<(), ProtocolError> {
        let frame = encode_frame(endpoint, kind, tag, &encode_payload(message))?;
        self.conn
            .write_all(&frame)
            .await
            .map_err(|e| ProtocolError::Connection(e.to_string()))
    }

    /// Write an unsolicited (tag 0) frame.
    pub async fn push<M: WireEncode>(
        &mut self,
        endpoint: u8,
        kind: u8,
        message: &M,
    ) -> Result<(), ProtocolError> {
        self.respond(endpoint, kind, 0, message).await
    }

    /// The authenticated player id, or `Unauthorized`.
    pub fn require_player(&self) -> Result<Uuid, ProtocolError> {
        self.session.player_id().ok_or(ProtocolError::Unauthorized)
    }
}

/// One endpoint's server-side state machine.
#[async_trait]
pub trait PacketHandler: Send {
    /// Whether this handler accepts the frame. Implementations check the
    /// endpoint number and that the sub-type is within their valid range.
    fn can_handle(&self, header: &FrameHeader) -> bool;

    /// Process one frame. Errors are mapped to the session disposition in
    /// the error policy; only `closes_session` kinds end the connection.
    async fn handle(
        &mut self,
        cx: &mut HandlerContext<'_>,
        header: &FrameHeader,
        payload: &[u8],
    ) -> Result<(), ProtocolError>;

    /// Invoked on every handler when the session's auth state changes.
    async fn auth_state_changed(
        &mut self,
        _cx: &mut HandlerContext<'_>,
    ) -> Result<(), ProtocolError> {
        Ok(())
    }

    /// Invoked on the session's periodic broadcast interval.
    async fn broadcast_tick(&mut self, _cx: &mut HandlerContext<'_>) -> Result<(), ProtocolError> {
        Ok(())
    }

    /// Whether this handler has state pending persistence.
    fn is_dirty(&self) -> bool {
        false
    }

    /// Persist dirty state. Only called when [`is_dirty`] reports true.
    ///
    /// [`is_dirty`]: PacketHandler::is_dirty
    async fn save(&mut self, _cx: &mut HandlerContext<'_>) -> Result<(), ProtocolError> {
        Ok(())
    }
}

/// Ordered handler list for one session.
pub struct HandlerRegistry {
    handlers: Vec<Box<dyn PacketHandler>>,
}

impl HandlerRegistry {
    pub fn new(handlers: Vec<Box<dyn PacketHandler>>) -> Self {
        Self { handlers }
    }

    /// Dispatch one frame. Returns false when no handler claimed it.
    pub async fn dispatch(
        &mut self,
        cx: &mut HandlerContext<'_>,
        header: &FrameHeader,
        payload: &[u8],
    ) -> Result<bool, ProtocolError> {
        for handler in &mut self.handlers {
            if handler.can_handle(header) {
                handler.handle(cx, header, payload).await?;
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub async fn auth_state_changed(
        &mut self,
        cx: &mut HandlerContext<'_>,
    ) -> Result<(), ProtocolError> {
        for handler in &mut self.handlers {
            handler.auth_state_changed(cx).await?;
        }
        Ok(())
    }

    pub async fn broadcast_tick(
        &mut self,
        cx: &mut HandlerContext<'_>,
    ) -> Result<(), ProtocolError> {
        for handler in &mut self.handlers {
            handler.broadcast_tick(cx).await?;
        }
        Ok(())
    }

    /// Run the save hook of every dirty handler, logging failures.
    pub async fn save_dirty(&mut self, cx: &mut HandlerContext<'_>) {
        for handler in &mut self.handlers {
            if handler.is_dirty() {
                if let Err(e) = handler.save(cx).await {
                    tracing::warn!(error = %e, "handler save failed");
                }
            }
        }
    }
}
