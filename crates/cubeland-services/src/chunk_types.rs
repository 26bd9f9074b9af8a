//! In-memory chunk representation.
//!
//! A chunk is a 256×256×256 block volume addressed by a horizontal grid
//! coordinate. Block ids are UUIDs; each chunk interns them into a dense
//! per-chunk id map so the bulk storage is a grid of 16-bit indices.
//! Index 0 is always "empty".
//!
//! The exact slice encoding is a storage concern — the network layer ships
//! whatever [`ChunkSlice::serialize`] emits, opaque to the protocol.

use cubeland_core::proto::{BlockPos, ChunkPos};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use uuid::Uuid;

/// Blocks per edge of a chunk, and Y levels per chunk.
pub const CHUNK_DIM: usize = 256;

/// One 256×256 horizontal layer of block ids.
#[derive(Debug, Clone)]
pub struct ChunkSlice {
    /// Row-major grid of indices into the chunk's id map. 0 = empty.
    blocks: Vec<u16>,
}

impl ChunkSlice {
    pub fn new() -> Self {
        Self {
            blocks: vec![0; CHUNK_DIM * CHUNK_DIM],
        }
    }

    fn index(x: usize, z: usize) -> usize {
        z * CHUNK_DIM + x
    }

    pub fn get(&self, x: usize, z: usize) -> u16 {
        self.blocks[Self::index(x, z)]
    }

    pub fn set(&mut self, x: usize, z: usize, id: u16) {
        self.blocks[Self::index(x, z)] = id;
    }

    /// Whether every cell is empty.
    pub fn is_empty(&self) -> bool {
        self.blocks.iter().all(|&b| b == 0)
    }

    /// Serialize this slice for transport: the chunk id map (so the grid is
    /// self-describing) followed by the grid as little-endian u16s.
    pub fn serialize(&self, id_map: &[Uuid]) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + id_map.len() * 16 + self.blocks.len() * 2);
        out.extend_from_slice(&(id_map.len() as u32).to_le_bytes());
        for id in id_map {
            out.extend_from_slice(id.as_bytes());
        }
        for block in &self.blocks {
            out.extend_from_slice(&block.to_le_bytes());
        }
        out
    }
}

impl Default for ChunkSlice {
    fn default() -> Self {
        Self::new()
    }
}

/// A chunk's block data plus its metadata map.
#[derive(Debug)]
pub struct Chunk {
    pub pos: ChunkPos,
    pub meta: HashMap<String, String>,
    /// Interned block ids. Index 0 is the empty block.
    id_map: Vec<Uuid>,
    /// One optional slice per Y level. `None` = entirely empty layer.
    slices: Vec<Option<ChunkSlice>>,
}

impl Chunk {
    pub fn new(pos: ChunkPos) -> Self {
        let mut slices = Vec::with_capacity(CHUNK_DIM);
        slices.resize_with(CHUNK_DIM, || None);
        Self {
            pos,
            meta: HashMap::new(),
            id_map: vec![Uuid::nil()],
            slices,
        }
    }

    /// Intern a block id, returning its grid index.
    fn intern(&mut self, id: Uuid) -> u16 {
        if let Some(idx) = self.id_map.iter().position(|&existing| existing == id) {
            return idx as u16;
        }
        self.id_map.push(id);
        (self.id_map.len() - 1) as u16
    }

    pub fn id_map(&self) -> &[Uuid] {
        &self.id_map
    }

    /// Place a block. Out-of-range positions are rejected.
    pub fn set_block(&mut self, pos: BlockPos, id: Uuid) -> Result<(), ChunkError> {
        let (x, y, z) = Self::check_bounds(pos)?;
        let idx = self.intern(id);
        let slice = self.slices[y].get_or_insert_with(ChunkSlice::new);
        slice.set(x, z, idx);
        Ok(())
    }

    /// Read a block. `None` for empty cells.
    pub fn get_block(&self, pos: BlockPos) -> Result<Option<Uuid>, ChunkError> {
        let (x, y, z) = Self::check_bounds(pos)?;
        let Some(slice) = &self.slices[y] else {
            return Ok(None);
        };
        match slice.get(x, z) {
            0 => Ok(None),
            idx => Ok(Some(self.id_map[idx as usize])),
        }
    }

    fn check_bounds(pos: BlockPos) -> Result<(usize, usize, usize), ChunkError> {
        let range = 0..CHUNK_DIM as i32;
        if !range.contains(&pos.x) || !range.contains(&pos.y) || !range.contains(&pos.z) {
            return Err(ChunkError::OutOfBounds(pos));
        }
        Ok((pos.x as usize, pos.y as usize, pos.z as usize))
    }

    /// Y levels that hold at least one block, lowest first.
    pub fn occupied_levels(&self) -> Vec<usize> {
        self.slices
            .iter()
            .enumerate()
            .filter_map(|(y, slice)| match slice {
                Some(s) if !s.is_empty() => Some(y),
                _ => None,
            })
            .collect()
    }

    /// Serialize the slice at `y`, or `None` if that layer is empty.
    pub fn serialize_slice(&self, y: usize) -> Option<Vec<u8>> {
        self.slices
            .get(y)?
            .as_ref()
            .map(|slice| slice.serialize(&self.id_map))
    }
}

#[derive(Debug, Clone, Copy, thiserror::Error)]
pub enum ChunkError {
    #[error("block position {0:?} outside chunk bounds")]
    OutOfBounds(BlockPos),
}

/// Shared, lockable chunk as handed out by the world source.
///
/// The lock is plain `std::sync` — holders do quick in-memory reads and
/// writes, never I/O.
#[derive(Debug)]
pub struct ChunkHandle {
    pub pos: ChunkPos,
    data: RwLock<Chunk>,
}

impl ChunkHandle {
    pub fn new(chunk: Chunk) -> Arc<Self> {
        Arc::new(Self {
            pos: chunk.pos,
            data: RwLock::new(chunk),
        })
    }

    pub fn read(&self) -> std::sync::RwLockReadGuard<'_, Chunk> {
        self.data.read().expect("chunk lock poisoned")
    }

    pub fn write(&self) -> std::sync::RwLockWriteGuard<'_, Chunk> {
        self.data.write().expect("chunk lock poisoned")
    }
}
