//! SOCKS5 protocol constants
//!
//! Defines all constants used in the SOCKS5 protocol implementation.

/// SOCKS5 protocol version
pub const SOCKS5_VERSION: u8 = 0x05;

/// SOCKS5 username/password sub-negotiation version (RFC 1929)
pub const AUTH_VERSION: u8 = 0x01;

// Authentication methods
/// No authentication required
pub const AUTH_METHOD_NONE: u8 = 0x00;
/// Username/password authentication
pub const AUTH_METHOD_PASSWORD: u8 = 0x02;
/// No acceptable methods
pub const AUTH_METHOD_NOT_ACCEPTABLE: u8 = 0xFF;

// Username/password sub-negotiation status codes
/// Authentication succeeded
pub const AUTH_STATUS_SUCCESS: u8 = 0x00;
/// Authentication failed
pub const AUTH_STATUS_FAILURE: u8 = 0x01;

// Commands
/// TCP CONNECT command
pub const CMD_CONNECT: u8 = 0x01;
/// TCP BIND command (not implemented)
pub const CMD_BIND: u8 = 0x02;
/// UDP ASSOCIATE command (not implemented)
pub const CMD_UDP_ASSOCIATE: u8 = 0x03;

// Address types
/// IPv4 address
pub const ADDR_TYPE_IPV4: u8 = 0x01;
/// Domain name
pub const ADDR_TYPE_DOMAIN: u8 = 0x03;
/// IPv6 address
pub const ADDR_TYPE_IPV6: u8 = 0x04;

// Reply codes
/// Succeeded
pub const REPLY_SUCCEEDED: u8 = 0x00;
/// General SOCKS server failure
pub const REPLY_GENERAL_FAILURE: u8 = 0x01;
/// Connection not allowed by ruleset
pub const REPLY_CONNECTION_NOT_ALLOWED: u8 = 0x02;
/// Network unreachable
pub const REPLY_NETWORK_UNREACHABLE: u8 = 0x03;
/// Host unreachable
pub const REPLY_HOST_UNREACHABLE: u8 = 0x04;
/// Connection refused
pub const REPLY_CONNECTION_REFUSED: u8 = 0x05;
/// TTL expired
pub const REPLY_TTL_EXPIRED: u8 = 0x06;
/// Command not supported
pub const REPLY_COMMAND_NOT_SUPPORTED: u8 = 0x07;
/// Address type not supported
pub const REPLY_ADDRESS_TYPE_NOT_SUPPORTED: u8 = 0x08;

/// Reserved byte value (always 0x00)
pub const RESERVED: u8 = 0x00;

/// Maximum domain name length in a SOCKS5 address
pub const MAX_DOMAIN_LEN: usize = 255;
