//! # socksplit - SOCKS5 proxy with first-flight payload splitting
//!
//! socksplit is a SOCKS5 (RFC 1928) proxy server with two distinguishing
//! features: pluggable per-connection authorization and connect-time
//! policy hooks, and an outbound payload-splitting stage that fragments
//! the very first bytes of a relayed TCP stream so that SNI and
//! `Host:` substrings are never contiguous within a single TCP segment.
//!
//! ## Features
//!
//! - **CONNECT proxying**: RFC 1928 greeting, method negotiation, and
//!   CONNECT with bidirectional relay (BIND and UDP ASSOCIATE are
//!   answered with "command not supported")
//! - **Username/password authentication**: RFC 1929 sub-negotiation,
//!   with a no-auth-first fallback so an IP allow-list can front a
//!   password gate
//! - **Policy hooks**: ordered connect hooks that may rewrite or refuse
//!   destinations, close hooks that observe teardown, and a typed datum
//!   authorizers can attach to a connection
//! - **Payload splitting**: TLS ClientHello and plaintext HTTP initial
//!   bytes are forwarded in shaped fragments to defeat naive substring
//!   filters
//!
//! ## Usage
//!
//! ```rust,ignore
//! use socksplit::Server;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut server = Server::new();
//!     server.no_auth_authorizer_fn(|_conn| Ok(()));
//!     server.handle_connect_fn(|_conn, host| {
//!         tracing::info!("connecting to {host}");
//!         Ok(host)
//!     });
//!
//!     server.listen_and_serve("127.0.0.1:1080").await
//! }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod config;
pub mod error;
pub mod hooks;
pub mod policy;
pub mod server;
pub mod socks;

// Re-export commonly used items
pub use config::{load_config, Config};
pub use error::Socks5Error;
pub use server::{Connection, Server};

/// Version of the socksplit library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name of the application
pub const NAME: &str = env!("CARGO_PKG_NAME");
