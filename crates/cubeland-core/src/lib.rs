//! Cubeland protocol core — wire framing, payload codec, message types,
//! identity crypto, configuration, and the protocol error taxonomy.
//!
//! This crate holds everything both the server daemon and a protocol client
//! need to speak the wire format. It deliberately has no networking of its
//! own beyond the frame read/write helpers.

pub mod codec;
pub mod config;
pub mod crypto;
pub mod error;
pub mod frame;
pub mod proto;
