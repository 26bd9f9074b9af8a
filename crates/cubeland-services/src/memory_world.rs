//! In-memory world source.
//!
//! Backs the daemon when no persistent storage is wired up, and every test
//! that needs a world. Chunks are generated flat on first request: one
//! ground layer at y = 0 of a fixed block id.

use crate::chunk_types::{Chunk, ChunkHandle, CHUNK_DIM};
use crate::world::{WorldError, WorldSource};
use async_trait::async_trait;
use cubeland_core::proto::{BlockPos, ChunkPos};
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Block id used for the generated ground layer.
pub fn ground_block_id() -> Uuid {
    Uuid::from_u128(0x43554245_4c414e44_00000000_47524e44)
}

pub struct MemoryWorldSource {
    chunks: DashMap<(i32, i32), Arc<ChunkHandle>>,
    world_info: DashMap<String, Vec<u8>>,
    player_info: DashMap<(Uuid, String), Vec<u8>>,
    dirty: Mutex<HashSet<(i32, i32)>>,
}

impl MemoryWorldSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            chunks: DashMap::new(),
            world_info: DashMap::new(),
            player_info: DashMap::new(),
            dirty: Mutex::new(HashSet::new()),
        })
    }

    fn generate(pos: ChunkPos) -> Arc<ChunkHandle> {
        let mut chunk = Chunk::new(pos);
        let ground = ground_block_id();
        for x in 0..CHUNK_DIM as i32 {
            for z in 0..CHUNK_DIM as i32 {
                // generation stays in bounds, the error cannot fire
                let _ = chunk.set_block(BlockPos::new(x, 0, z), ground);
            }
        }
        chunk
            .meta
            .insert("generator".to_string(), "flat".to_string());
        ChunkHandle::new(chunk)
    }

    /// Chunk coordinates currently marked dirty. For tests and stats.
    pub fn dirty_chunks(&self) -> Vec<(i32, i32)> {
        self.dirty.lock().expect("dirty lock poisoned").iter().copied().collect()
    }
}

#[async_trait]
impl WorldSource for MemoryWorldSource {
    async fn get_chunk(&self, x: i32, z: i32) -> Result<Arc<ChunkHandle>, WorldError> {
        let handle = self
            .chunks
            .entry((x, z))
            .or_insert_with(|| Self::generate(ChunkPos::new(x, z)))
            .clone();
        Ok(handle)
    }

    async fn get_world_info(&self, key: &str) -> Result<Option<Vec<u8>>, WorldError> {
        Ok(self.world_info.get(key).map(|v| v.clone()))
    }

    async fn set_world_info(&self, key: &str, value: Vec<u8>) -> Result<(), WorldError> {
        self.world_info.insert(key.to_string(), value);
        Ok(())
    }

    async fn get_player_info(
        &self,
        player: Uuid,
        key: &str,
    ) -> Result<Option<Vec<u8>>, WorldError> {
        Ok(self
            .player_info
            .get(&(player, key.to_string()))
            .map(|v| v.clone()))
    }

    async fn set_player_info(
        &self,
        player: Uuid,
        key: &str,
        value: Vec<u8>,
    ) -> Result<(), WorldError> {
        self.player_info.insert((player, key.to_string()), value);
        Ok(())
    }

    fn mark_chunk_dirty(&self, chunk: &Arc<ChunkHandle>) {
        self.dirty
            .lock()
            .expect("dirty lock poisoned")
            .insert((chunk.pos.x, chunk.pos.z));
    }

    async fn flush_dirty_sync(&self) -> Result<(), WorldError> {
        // Nothing to write anywhere; flushing just clears the markers.
        self.dirty.lock().expect("dirty lock poisoned").clear();
        Ok(())
    }
}
