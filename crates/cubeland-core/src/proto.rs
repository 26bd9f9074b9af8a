//! Protocol messages for every endpoint.
//!
//! Endpoint numbers and message sub-types are part of the wire contract.
//! Each endpoint's sub-type space is dense starting at 1, with 0 reserved;
//! `TYPE_MAX` is one past the last valid value and the dispatcher drops
//! anything at or above it.
//!
//! Payload layouts follow the codec rules in [`crate::codec`]; the field
//! order in each struct is the wire order.

use crate::codec::{DecodeError, Reader, WireDecode, WireEncode};
use uuid::Uuid;

// ── Endpoints ─────────────────────────────────────────────────────────────────

pub mod endpoint {
    pub const AUTH: u8 = 1;
    pub const CHUNK: u8 = 2;
    pub const BLOCK_CHANGE: u8 = 3;
    pub const CHAT: u8 = 4;
    pub const PLAYER_INFO: u8 = 5;
    pub const WORLD_INFO: u8 = 6;
    pub const PLAYER_MOVEMENT: u8 = 7;
    pub const TIME: u8 = 8;
}

// ── Shared geometry types ─────────────────────────────────────────────────────

/// Horizontal chunk coordinate on the world grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkPos {
    pub x: i32,
    pub z: i32,
}

impl ChunkPos {
    pub fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }
}

impl std::fmt::Display for ChunkPos {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.x, self.z)
    }
}

impl WireEncode for ChunkPos {
    fn encode(&self, out: &mut Vec<u8>) {
        self.x.encode(out);
        self.z.encode(out);
    }
}

impl WireDecode for ChunkPos {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            x: i32::decode(r)?,
            z: i32::decode(r)?,
        })
    }
}

/// Block position relative to its chunk origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl BlockPos {
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }
}

impl WireEncode for BlockPos {
    fn encode(&self, out: &mut Vec<u8>) {
        self.x.encode(out);
        self.y.encode(out);
        self.z.encode(out);
    }
}

impl WireDecode for BlockPos {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            x: i32::decode(r)?,
            y: i32::decode(r)?,
            z: i32::decode(r)?,
        })
    }
}

/// Player position or view angles.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

impl WireEncode for Vec3 {
    fn encode(&self, out: &mut Vec<u8>) {
        self.x.encode(out);
        self.y.encode(out);
        self.z.encode(out);
    }
}

impl WireDecode for Vec3 {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            x: f32::decode(r)?,
            y: f32::decode(r)?,
            z: f32::decode(r)?,
        })
    }
}

// Most message bodies are plain field sequences; this keeps their codec
// impls down to a field list.
macro_rules! wire_message {
    ($name:ident { $($field:ident),+ $(,)? }) => {
        impl WireEncode for $name {
            fn encode(&self, out: &mut Vec<u8>) {
                $(self.$field.encode(out);)+
            }
        }
        impl WireDecode for $name {
            fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
                Ok(Self {
                    $($field: WireDecode::decode(r)?,)+
                })
            }
        }
    };
}

// ── Endpoint 1: Authentication ────────────────────────────────────────────────

pub mod auth {
    use super::*;

    pub const REQUEST: u8 = 1;
    pub const CHALLENGE: u8 = 2;
    pub const CHALLENGE_REPLY: u8 = 3;
    pub const STATUS: u8 = 4;
    pub const GET_CONNECTED: u8 = 5;
    pub const GET_CONNECTED_REPLY: u8 = 6;
    pub const TYPE_MAX: u8 = 7;

    /// Length of the random challenge the server issues.
    pub const CHALLENGE_LEN: usize = 32;

    /// Client → server: start authenticating as `client_id`.
    #[derive(Debug, Clone, PartialEq)]
    pub struct AuthRequest {
        pub client_id: Uuid,
        pub display_name: String,
    }
    wire_message!(AuthRequest { client_id, display_name });

    /// Server → client: sign this random data.
    #[derive(Debug, Clone, PartialEq)]
    pub struct AuthChallenge {
        pub challenge: [u8; CHALLENGE_LEN],
    }
    wire_message!(AuthChallenge { challenge });

    /// Client → server: DER-encoded ECDSA signature over the challenge bytes.
    #[derive(Debug, Clone, PartialEq)]
    pub struct AuthChallengeReply {
        pub signature: Vec<u8>,
    }
    wire_message!(AuthChallengeReply { signature });

    /// Outcome of an authentication attempt.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    #[repr(u8)]
    pub enum AuthState {
        Success = 1,
        UnknownId = 2,
        InvalidSignature = 3,
        TemporaryError = 4,
    }

    impl WireEncode for AuthState {
        fn encode(&self, out: &mut Vec<u8>) {
            out.push(*self as u8);
        }
    }

    impl WireDecode for AuthState {
        fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
            match r.u8()? {
                1 => Ok(Self::Success),
                2 => Ok(Self::UnknownId),
                3 => Ok(Self::InvalidSignature),
                4 => Ok(Self::TemporaryError),
                value => Err(DecodeError::BadDiscriminant {
                    what: "auth state",
                    value,
                }),
            }
        }
    }

    /// Server → client: result of the challenge verification.
    #[derive(Debug, Clone, PartialEq)]
    pub struct AuthStatus {
        pub state: AuthState,
    }
    wire_message!(AuthStatus { state });

    /// Client → server: list everyone currently on the server.
    #[derive(Debug, Clone, PartialEq)]
    pub struct AuthGetConnected {
        pub include_address: bool,
    }
    wire_message!(AuthGetConnected { include_address });

    #[derive(Debug, Clone, PartialEq)]
    pub struct ConnectedPlayer {
        pub id: Uuid,
        pub display_name: String,
        pub remote_addr: Option<String>,
    }
    wire_message!(ConnectedPlayer {
        id,
        display_name,
        remote_addr
    });

    /// Server → client: reply to [`AuthGetConnected`].
    #[derive(Debug, Clone, PartialEq)]
    pub struct AuthGetConnectedReply {
        pub players: Vec<ConnectedPlayer>,
    }
    wire_message!(AuthGetConnectedReply { players });
}

// ── Endpoint 2: Chunk transfer ────────────────────────────────────────────────

pub mod chunk {
    use super::*;

    pub const GET: u8 = 1;
    pub const SLICE_DATA: u8 = 2;
    pub const COMPLETION: u8 = 3;
    pub const TYPE_MAX: u8 = 4;

    /// Client → server: stream me this chunk.
    #[derive(Debug, Clone, PartialEq)]
    pub struct ChunkGet {
        pub chunk_pos: ChunkPos,
    }
    wire_message!(ChunkGet { chunk_pos });

    /// One key/value pair of chunk metadata.
    #[derive(Debug, Clone, PartialEq)]
    pub struct MetaEntry {
        pub key: String,
        pub value: String,
    }
    wire_message!(MetaEntry { key, value });

    /// Server → client: one serialized Y-slice. Slices arrive in any order.
    #[derive(Debug, Clone, PartialEq)]
    pub struct ChunkSliceData {
        pub chunk_pos: ChunkPos,
        /// Y level of this slice within the chunk.
        pub y: u32,
        /// Opaque slice encoding, exactly as the storage emitted it.
        pub data: Vec<u8>,
    }
    wire_message!(ChunkSliceData { chunk_pos, y, data });

    /// Server → client: all slices for the chunk have been sent.
    #[derive(Debug, Clone, PartialEq)]
    pub struct ChunkCompletion {
        pub chunk_pos: ChunkPos,
        pub num_slices: u32,
        pub meta: Vec<MetaEntry>,
    }
    wire_message!(ChunkCompletion {
        chunk_pos,
        num_slices,
        meta
    });
}

// ── Endpoint 3: Block change ──────────────────────────────────────────────────

pub mod block_change {
    use super::*;

    pub const REPORT: u8 = 1;
    pub const BROADCAST: u8 = 2;
    pub const UNREGISTER: u8 = 3;
    pub const TYPE_MAX: u8 = 4;

    /// A single changed block.
    #[derive(Debug, Clone, PartialEq)]
    pub struct BlockChangeInfo {
        pub chunk_pos: ChunkPos,
        pub block_pos: BlockPos,
        /// Block id to place. Not validated against a registry.
        pub new_id: Uuid,
    }
    wire_message!(BlockChangeInfo {
        chunk_pos,
        block_pos,
        new_id
    });

    /// Client → server: blocks this client edited.
    #[derive(Debug, Clone, PartialEq)]
    pub struct BlockChangeReport {
        pub changes: Vec<BlockChangeInfo>,
    }
    wire_message!(BlockChangeReport { changes });

    /// Server → client: edits made by other clients.
    #[derive(Debug, Clone, PartialEq)]
    pub struct BlockChangeBroadcast {
        pub changes: Vec<BlockChangeInfo>,
    }
    wire_message!(BlockChangeBroadcast { changes });

    /// Client → server: stop sending edit notifications for a chunk.
    #[derive(Debug, Clone, PartialEq)]
    pub struct BlockChangeUnregister {
        pub chunk_pos: ChunkPos,
    }
    wire_message!(BlockChangeUnregister { chunk_pos });
}

// ── Endpoint 4: Chat ──────────────────────────────────────────────────────────

pub mod chat {
    use super::*;

    pub const MESSAGE: u8 = 1;
    pub const PLAYER_JOINED: u8 = 2;
    pub const PLAYER_LEFT: u8 = 3;
    pub const TYPE_MAX: u8 = 4;

    /// A chat line. Client → server submissions carry the sender's own id;
    /// the server substitutes the authenticated player id before relaying.
    #[derive(Debug, Clone, PartialEq)]
    pub struct ChatMessage {
        pub sender: Uuid,
        pub message: String,
    }
    wire_message!(ChatMessage { sender, message });

    /// Server → client: someone joined.
    #[derive(Debug, Clone, PartialEq)]
    pub struct ChatPlayerJoined {
        pub player_id: Uuid,
        pub display_name: String,
    }
    wire_message!(ChatPlayerJoined {
        player_id,
        display_name
    });

    /// Server → client: someone left.
    #[derive(Debug, Clone, PartialEq)]
    pub struct ChatPlayerLeft {
        pub player_id: Uuid,
    }
    wire_message!(ChatPlayerLeft { player_id });
}

// ── Endpoint 5: Player info ───────────────────────────────────────────────────

pub mod player_info {
    use super::*;

    pub const GET: u8 = 1;
    pub const GET_REPLY: u8 = 2;
    pub const SET: u8 = 3;
    pub const TYPE_MAX: u8 = 4;

    #[derive(Debug, Clone, PartialEq)]
    pub struct PlayerInfoGet {
        pub key: String,
    }
    wire_message!(PlayerInfoGet { key });

    #[derive(Debug, Clone, PartialEq)]
    pub struct PlayerInfoGetReply {
        pub key: String,
        pub found: bool,
        pub data: Option<Vec<u8>>,
    }
    wire_message!(PlayerInfoGetReply { key, found, data });

    /// Set (or clear, when `data` is absent) a per-player key. No reply.
    #[derive(Debug, Clone, PartialEq)]
    pub struct PlayerInfoSet {
        pub key: String,
        pub data: Option<Vec<u8>>,
    }
    wire_message!(PlayerInfoSet { key, data });
}

// ── Endpoint 6: World info ────────────────────────────────────────────────────

pub mod world_info {
    use super::*;

    pub const GET: u8 = 1;
    pub const GET_REPLY: u8 = 2;
    pub const TYPE_MAX: u8 = 3;

    #[derive(Debug, Clone, PartialEq)]
    pub struct WorldInfoGet {
        pub key: String,
    }
    wire_message!(WorldInfoGet { key });

    #[derive(Debug, Clone, PartialEq)]
    pub struct WorldInfoGetReply {
        pub key: String,
        pub found: bool,
        pub data: Option<Vec<u8>>,
    }
    wire_message!(WorldInfoGetReply { key, found, data });
}

// ── Endpoint 7: Player movement ───────────────────────────────────────────────

pub mod movement {
    use super::*;

    pub const POSITION_CHANGED: u8 = 1;
    pub const POSITION_BROADCAST: u8 = 2;
    pub const POSITION_INITIAL: u8 = 3;
    pub const TYPE_MAX: u8 = 4;

    /// Client → server: where the client thinks it is now.
    #[derive(Debug, Clone, PartialEq)]
    pub struct PlayerPositionChanged {
        /// Monotonic update counter used to discard stale packets.
        pub epoch: u32,
        pub position: Vec3,
        pub angles: Vec3,
    }
    wire_message!(PlayerPositionChanged {
        epoch,
        position,
        angles
    });

    /// Server → client: another player's position.
    #[derive(Debug, Clone, PartialEq)]
    pub struct PlayerPositionBroadcast {
        pub player_id: Uuid,
        pub position: Vec3,
        pub angles: Vec3,
    }
    wire_message!(PlayerPositionBroadcast {
        player_id,
        position,
        angles
    });

    /// Server → client: last saved position, replayed after authentication.
    #[derive(Debug, Clone, PartialEq)]
    pub struct PlayerPositionInitial {
        pub position: Vec3,
        pub angles: Vec3,
    }
    wire_message!(PlayerPositionInitial { position, angles });

    /// Value persisted under the reserved `server.player.position` key.
    #[derive(Debug, Clone, PartialEq)]
    pub struct SavedPosition {
        pub position: Vec3,
        pub angles: Vec3,
    }
    wire_message!(SavedPosition { position, angles });
}

// ── Endpoint 8: Time ──────────────────────────────────────────────────────────

pub mod time {
    use super::*;

    pub const INITIAL_STATE: u8 = 1;
    pub const UPDATE: u8 = 2;
    pub const TYPE_MAX: u8 = 3;

    /// Server → client: sent once after authentication completes.
    #[derive(Debug, Clone, PartialEq)]
    pub struct TimeInitialState {
        /// In-world days per real second.
        pub tick_factor: f64,
        pub current_time: f64,
    }
    wire_message!(TimeInitialState {
        tick_factor,
        current_time
    });

    /// Server → client: periodic clock broadcast.
    #[derive(Debug, Clone, PartialEq)]
    pub struct TimeUpdate {
        pub current_time: f64,
    }
    wire_message!(TimeUpdate { current_time });

    /// Value persisted under the reserved `server.world.time` key.
    #[derive(Debug, Clone, PartialEq)]
    pub struct TimeData {
        pub time: f64,
    }
    wire_message!(TimeData { time });
}

/// One past the highest valid sub-type for an endpoint, or `None` for an
/// endpoint number outside the protocol.
pub fn type_max(endpoint_id: u8) -> Option<u8> {
    match endpoint_id {
        endpoint::AUTH => Some(auth::TYPE_MAX),
        endpoint::CHUNK => Some(chunk::TYPE_MAX),
        endpoint::BLOCK_CHANGE => Some(block_change::TYPE_MAX),
        endpoint::CHAT => Some(chat::TYPE_MAX),
        endpoint::PLAYER_INFO => Some(player_info::TYPE_MAX),
        endpoint::WORLD_INFO => Some(world_info::TYPE_MAX),
        endpoint::PLAYER_MOVEMENT => Some(movement::TYPE_MAX),
        endpoint::TIME => Some(time::TYPE_MAX),
        _ => None,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
