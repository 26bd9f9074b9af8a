//! Chunk slice serializer pool.
//!
//! Serializing a 256×256 slice is pure CPU work; a small shared worker pool
//! keeps it off the session tasks. Each job serializes one Y level of one
//! chunk, wraps it in a `ChunkSliceData` frame, and queues it on the
//! requesting session's outbound channel — waiting for space rather than
//! dropping, so a slow client throttles its own chunk stream.

use crate::session::SessionHandle;
use cubeland_core::codec::encode_payload;
use cubeland_core::frame::encode_frame;
use cubeland_core::proto::{chunk, endpoint};
use cubeland_services::{ChunkHandle, QUEUE_DEPTH};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

pub struct SliceJob {
    pub chunk: Arc<ChunkHandle>,
    pub y: usize,
    pub session: Arc<SessionHandle>,
    /// Resolves when the slice has been queued (true) or skipped (false).
    pub done: oneshot::Sender<bool>,
}

#[derive(Clone)]
pub struct SerializerPool {
    tx: mpsc::Sender<SliceJob>,
}

impl SerializerPool {
    /// Spawn `workers` serializer tasks sharing one job queue.
    pub fn start(workers: usize) -> Self {
        let (tx, rx) = mpsc::channel::<SliceJob>(QUEUE_DEPTH);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        for index in 0..workers.max(1) {
            tokio::spawn(run_worker(index, rx.clone()));
        }

        Self { tx }
    }

    /// Queue a slice job. Returns false if the pool has shut down.
    pub async fn submit(&self, job: SliceJob) -> bool {
        self.tx.send(job).await.is_ok()
    }
}

async fn run_worker(index: usize, rx: Arc<tokio::sync::Mutex<mpsc::Receiver<SliceJob>>>) {
    loop {
        // The receiver lock is only held while waiting; each job is
        // processed outside it so workers run in parallel.
        let job = { rx.lock().await.recv().await };
        let Some(job) = job else {
            tracing::debug!(worker = index, "chunk serializer worker exiting");
            return;
        };

        let encoded = {
            let guard = job.chunk.read();
            guard.serialize_slice(job.y).map(|data| chunk::ChunkSliceData {
                chunk_pos: guard.pos,
                y: job.y as u32,
                data,
            })
        };

        let queued = match encoded {
            Some(message) => {
                match encode_frame(
                    endpoint::CHUNK,
                    chunk::SLICE_DATA,
                    0,
                    &encode_payload(&message),
                ) {
                    Ok(frame) => job.session.send_frame_wait(frame).await,
                    Err(e) => {
                        tracing::warn!(
                            chunk = %message.chunk_pos,
                            y = message.y,
                            error = %e,
                            "slice frame encoding failed"
                        );
                        false
                    }
                }
            }
            // Level emptied between scheduling and serialization.
            None => false,
        };

        let _ = job.done.send(queued);
    }
}
