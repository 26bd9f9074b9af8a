//! World storage interface.
//!
//! The server core never touches world files directly; it consumes an async
//! source that can produce chunks and read/write two small KV namespaces
//! (world-wide and per-player). Terrain generation, on-disk formats, and
//! chunk eviction all live behind this trait.

use crate::chunk_types::ChunkHandle;
use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

/// World-info key the clock persists under.
pub const WORLD_TIME_KEY: &str = "server.world.time";

/// Player-info key the movement handler persists under.
pub const PLAYER_POSITION_KEY: &str = "server.player.position";

#[derive(Debug, thiserror::Error)]
pub enum WorldError {
    #[error("world storage I/O failed: {0}")]
    Io(String),

    #[error("world storage backend is shut down")]
    Closed,
}

#[async_trait]
pub trait WorldSource: Send + Sync {
    /// Fetch (loading or generating as needed) the chunk at `(x, z)`.
    async fn get_chunk(&self, x: i32, z: i32) -> Result<Arc<ChunkHandle>, WorldError>;

    /// Read a world-info key. `None` when the key has never been written.
    async fn get_world_info(&self, key: &str) -> Result<Option<Vec<u8>>, WorldError>;

    async fn set_world_info(&self, key: &str, value: Vec<u8>) -> Result<(), WorldError>;

    /// Read a per-player key.
    async fn get_player_info(&self, player: Uuid, key: &str)
        -> Result<Option<Vec<u8>>, WorldError>;

    async fn set_player_info(
        &self,
        player: Uuid,
        key: &str,
        value: Vec<u8>,
    ) -> Result<(), WorldError>;

    /// Note that a chunk has unsaved edits.
    fn mark_chunk_dirty(&self, chunk: &Arc<ChunkHandle>);

    /// Write out every dirty chunk before returning. Called on shutdown.
    async fn flush_dirty_sync(&self) -> Result<(), WorldError>;
}
