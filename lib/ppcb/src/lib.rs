//! Request/response file-transfer protocol over a reliable stream or
//! unreliable datagrams, with an optional per-packet retransmission mode.
//!
//! The crate is split along the protocol layers: `packet` knows the wire
//! layout, `codec` validates incoming frames against the session state,
//! `transport` moves frames over a socket, `retry` bounds the resend loops,
//! and `client`/`server` drive whole sessions.

pub mod client;
pub mod codec;
pub mod logging;
pub mod packet;
pub mod retry;
pub mod server;
pub mod shared;
pub mod transport;
