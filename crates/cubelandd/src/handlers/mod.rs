//! Endpoint handlers — one server-side state machine per protocol endpoint.

mod auth;
mod block_change;
mod chat;
mod chunk;
mod player_info;
mod player_movement;
mod time;
mod world_info;

pub use auth::Auth;
pub use block_change::BlockChange;
pub use chat::Chat;
pub use chunk::ChunkLoader;
pub use player_info::PlayerInfo;
pub use player_movement::PlayerMovement;
pub use time::Time;
pub use world_info::WorldInfo;

use crate::dispatch::PacketHandler;

/// The full handler set for a new session, in dispatch order.
pub fn default_handlers() -> Vec<Box<dyn PacketHandler>> {
    vec![
        Box::new(Auth::new()),
        Box::new(ChunkLoader::new()),
        Box::new(BlockChange::new()),
        Box::new(Chat::new()),
        Box::new(PlayerInfo::new()),
        Box::new(WorldInfo::new()),
        Box::new(PlayerMovement::new()),
        Box::new(Time::new()),
    ]
}
