//! End-to-end tests: a real server instance on an ephemeral port, driven by
//! a minimal protocol client over TLS.

mod infra;
pub use infra::*;

mod client;
pub use client::*;

mod auth;
mod chunks;
mod edits;
mod keycache;
mod movement;
mod timekeeping;
