//! cubelandd — the Cubeland game server core.
//!
//! A TLS server that authenticates players by challenge/response, streams
//! world chunks on demand, and fans out block edits, chat, presence,
//! movement, and the world clock to connected peers over a framed binary
//! protocol.

pub mod broadcast;
pub mod dispatch;
pub mod handlers;
pub mod listener;
pub mod serializer;
pub mod server;
pub mod session;
