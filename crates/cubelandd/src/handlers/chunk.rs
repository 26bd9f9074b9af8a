//! Chunk transfer endpoint.
//!
//! A `ChunkGet` resolves the chunk through the process-wide weak cache (or
//! the world source on a miss), then streams every occupied Y slice through
//! the serializer pool. Slices arrive as unsolicited frames in any order;
//! the `ChunkCompletion` — carrying the request tag and the slice count —
//! tells the client when the set is complete. Completion also registers the
//! session as an edit observer of the chunk.
//!
//! A second request for a chunk that is still streaming is logged and
//! silently ignored.

use crate::dispatch::{HandlerContext, PacketHandler};
use crate::serializer::SliceJob;
use crate::server::ServerShared;
use crate::session::SessionHandle;
use async_trait::async_trait;
use cubeland_core::codec::decode_payload;
use cubeland_core::error::ProtocolError;
use cubeland_core::frame::FrameHeader;
use cubeland_core::proto::{chunk, endpoint, ChunkPos};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

pub struct ChunkLoader {
    /// Chunk positions this session is currently being streamed. Shared
    /// with the per-request transfer task, which clears the marker when the
    /// completion frame is out.
    pending: Arc<Mutex<HashSet<ChunkPos>>>,
}

impl ChunkLoader {
    pub fn new() -> Self {
        Self {
            pending: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    fn handle_get(
        &mut self,
        cx: &mut HandlerContext<'_>,
        header: &FrameHeader,
        payload: &[u8],
    ) -> Result<(), ProtocolError> {
        let request: chunk::ChunkGet = decode_payload(payload)?;
        let pos = request.chunk_pos;

        {
            let mut pending = self.pending.lock().expect("pending lock poisoned");
            if !pending.insert(pos) {
                tracing::warn!(
                    session = cx.session.id,
                    chunk = %pos,
                    "duplicate chunk request ignored"
                );
                return Ok(());
            }
        }

        tracing::trace!(session = cx.session.id, chunk = %pos, "chunk requested");

        tokio::spawn(run_transfer(
            cx.shared.clone(),
            cx.session.clone(),
            self.pending.clone(),
            pos,
            header.tag,
        ));
        Ok(())
    }
}

/// One chunk transfer, run as its own task so the session loop keeps
/// serving other endpoints while slices stream.
async fn run_transfer(
    shared: Arc<ServerShared>,
    session: Arc<SessionHandle>,
    pending: Arc<Mutex<HashSet<ChunkPos>>>,
    pos: ChunkPos,
    tag: u16,
) {
    let result = transfer(&shared, &session, pos, tag).await;
    pending.lock().expect("pending lock poisoned").remove(&pos);

    if let Err(e) = result {
        tracing::warn!(session = session.id, chunk = %pos, error = %e, "chunk transfer failed");
    }
}

async fn transfer(
    shared: &Arc<ServerShared>,
    session: &Arc<SessionHandle>,
    pos: ChunkPos,
    tag: u16,
) -> Result<(), ProtocolError> {
    let chunk_handle = shared
        .chunk_at(pos)
        .await
        .map_err(|e| ProtocolError::StorageUnavailable(e.to_string()))?;

    let levels = chunk_handle.read().occupied_levels();

    // Queue one serializer job per occupied level, then wait for all of
    // them; slices may hit the wire in any order.
    let mut completions = Vec::with_capacity(levels.len());
    for y in &levels {
        let (done_tx, done_rx) = oneshot::channel();
        let submitted = shared
            .serializer
            .submit(SliceJob {
                chunk: chunk_handle.clone(),
                y: *y,
                session: session.clone(),
                done: done_tx,
            })
            .await;
        if submitted {
            completions.push(done_rx);
        }
    }
    for done in completions {
        let _ = done.await;
    }

    let meta = {
        let data = chunk_handle.read();
        let mut entries: Vec<chunk::MetaEntry> = data
            .meta
            .iter()
            .map(|(key, value)| chunk::MetaEntry {
                key: key.clone(),
                value: value.clone(),
            })
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        entries
    };

    // The client is about to hold this chunk; keep it posted on edits.
    // Registered before the completion goes out so a client that has seen
    // the completion is already an observer.
    shared.observers.add(pos, session.id);

    let completion = chunk::ChunkCompletion {
        chunk_pos: pos,
        num_slices: levels.len() as u32,
        meta,
    };
    let frame = cubeland_core::frame::encode_frame(
        endpoint::CHUNK,
        chunk::COMPLETION,
        tag,
        &cubeland_core::codec::encode_payload(&completion),
    )?;
    session.send_frame_wait(frame).await;

    tracing::trace!(
        session = session.id,
        chunk = %pos,
        slices = levels.len(),
        "chunk transfer complete"
    );
    Ok(())
}

#[async_trait]
impl PacketHandler for ChunkLoader {
    fn can_handle(&self, header: &FrameHeader) -> bool {
        header.endpoint == endpoint::CHUNK && header.kind != 0 && header.kind < chunk::TYPE_MAX
    }

    async fn handle(
        &mut self,
        cx: &mut HandlerContext<'_>,
        header: &FrameHeader,
        payload: &[u8],
    ) -> Result<(), ProtocolError> {
        cx.require_player()?;

        match header.kind {
            chunk::GET => self.handle_get(cx, header, payload),
            kind => Err(ProtocolError::UnexpectedState(format!(
                "chunk type {kind:#04x} is not client-to-server"
            ))),
        }
    }
}
