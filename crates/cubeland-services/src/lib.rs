//! Service-level building blocks shared by the daemon and its tests:
//! the world-source abstraction and chunk types, the player key cache,
//! the broadcast bus, the chunk observer table, and the world clock.

mod bus;
mod chunk_types;
mod clock;
mod keycache;
mod memory_world;
mod observers;
mod world;

pub use bus::{channel as bus_channel, BroadcastEvent, BusSender, SessionId, QUEUE_DEPTH};
pub use chunk_types::{Chunk, ChunkError, ChunkHandle, ChunkSlice, CHUNK_DIM};
pub use clock::WorldClock;
pub use keycache::{KeyCache, KeyCacheError, KeyCacheStats};
pub use memory_world::{ground_block_id, MemoryWorldSource};
pub use observers::ChunkObservers;
pub use world::{WorldError, WorldSource, PLAYER_POSITION_KEY, WORLD_TIME_KEY};
