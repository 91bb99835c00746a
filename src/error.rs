//! Error types for socksplit
//!
//! This module defines the protocol error taxonomy used throughout the
//! server core. User-supplied hooks return [`anyhow::Error`]; the two
//! sentinel kinds ([`Socks5Error::AuthenticationFailed`] and
//! [`Socks5Error::NotAllowedByRuleset`]) are recognized by downcast and
//! drive control flow in the handshake and CONNECT stages.

use std::io;
use thiserror::Error;

/// Errors produced by the SOCKS5 protocol engine.
#[derive(Error, Debug)]
pub enum Socks5Error {
    /// Underlying transport failure.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Version octet of a greeting or request was not 0x05.
    #[error("unsupported SOCKS version: {0:#04x}")]
    UnsupportedVersion(u8),

    /// Version octet of a username/password frame was not 0x01.
    #[error("unsupported username/password sub-negotiation version: {0:#04x}")]
    UnsupportedAuthVersion(u8),

    /// Request carried an unknown address type.
    #[error("address type not supported: {0:#04x}")]
    AddressTypeNotSupported(u8),

    /// Domain name in a reply exceeds 255 bytes.
    #[error("domain name too long: {0} bytes")]
    DomainTooLong(usize),

    /// Bound address in a reply is shorter than its address type mandates.
    #[error("bound address shorter than its address type mandates")]
    InvalidBoundAddress,

    /// Client could not be authenticated, or an authorizer rejected it.
    #[error("authentication failed")]
    AuthenticationFailed,

    /// A connect hook refused the destination.
    #[error("connection not allowed by ruleset")]
    NotAllowedByRuleset,

    /// Request carried a command other than CONNECT.
    #[error("command not supported: {0:#04x}")]
    CommandNotSupported(u8),

    /// Upstream dial failed (resolution or connect).
    #[error("dial to {host} failed: {source}")]
    Dial {
        /// The `host:port` target that could not be reached.
        host: String,
        /// The resolver or connect error.
        source: io::Error,
    },

    /// The bidirectional relay terminated with an error.
    #[error("relay failed: {0}")]
    Relay(#[source] io::Error),
}

impl Socks5Error {
    /// True if `err` is the policy-rejection sentinel an authorizer uses
    /// to signal "this client may not proceed, try the next method".
    pub fn is_auth_rejection(err: &anyhow::Error) -> bool {
        matches!(
            err.downcast_ref::<Socks5Error>(),
            Some(Socks5Error::AuthenticationFailed)
        )
    }

    /// True if `err` is the sentinel a connect hook uses to refuse a
    /// destination without failing the connection.
    pub fn is_ruleset_rejection(err: &anyhow::Error) -> bool {
        matches!(
            err.downcast_ref::<Socks5Error>(),
            Some(Socks5Error::NotAllowedByRuleset)
        )
    }
}
