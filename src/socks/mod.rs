//! SOCKS5 protocol engine
//!
//! The wire codec, the handshake state machine, the CONNECT executor,
//! and the first-flight payload splitter. The handshake and CONNECT
//! stages are driven by the server core; the codec types are public so
//! callers can build their own tooling around the frames.

pub mod codec;
pub mod consts;
pub(crate) mod connect;
pub(crate) mod handshake;
pub(crate) mod splitter;

pub use codec::{DestAddr, Greeting, Reply, Request, UserPassRequest};
