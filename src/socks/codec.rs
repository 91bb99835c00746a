//! SOCKS5 wire codec
//!
//! Frame types for the four wire operations the server performs: reading a
//! greeting, reading a username/password sub-negotiation frame, reading a
//! request, and writing a reply. All reads stitch partial reads via
//! `read_exact`; ports are big-endian 16-bit.

use crate::error::Socks5Error;
use crate::socks::consts::*;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

type Result<T> = std::result::Result<T, Socks5Error>;

async fn read_u8<R>(reader: &mut R) -> std::io::Result<u8>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut buf = [0u8; 1];
    reader.read_exact(&mut buf).await?;
    Ok(buf[0])
}

/// Client greeting advertising the authentication methods it supports.
///
/// ```text
/// +----+----------+----------+
/// |VER | NMETHODS | METHODS  |
/// +----+----------+----------+
/// | 1  |    1     | 1 to 255 |
/// +----+----------+----------+
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Greeting {
    /// Method identifiers in the order the client sent them.
    pub methods: Vec<u8>,
}

impl Greeting {
    /// Read a greeting from the stream. The version octet is validated
    /// before anything else is consumed.
    pub async fn read_from<R>(reader: &mut R) -> Result<Self>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let version = read_u8(reader).await?;
        if version != SOCKS5_VERSION {
            return Err(Socks5Error::UnsupportedVersion(version));
        }

        let nmethods = read_u8(reader).await?;
        let mut methods = vec![0u8; nmethods as usize];
        reader.read_exact(&mut methods).await?;

        Ok(Greeting { methods })
    }

    /// Whether the client advertised the given method.
    pub fn offers(&self, method: u8) -> bool {
        self.methods.contains(&method)
    }
}

/// Username/password sub-negotiation frame (RFC 1929).
///
/// ```text
/// +----+------+----------+------+----------+
/// |VER | ULEN |  UNAME   | PLEN |  PASSWD  |
/// +----+------+----------+------+----------+
/// | 1  |  1   | 1 to 255 |  1   | 1 to 255 |
/// +----+------+----------+------+----------+
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserPassRequest {
    /// Raw username bytes.
    pub username: Vec<u8>,
    /// Raw password bytes.
    pub password: Vec<u8>,
}

impl UserPassRequest {
    /// Read a username/password frame from the stream.
    pub async fn read_from<R>(reader: &mut R) -> Result<Self>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let version = read_u8(reader).await?;
        if version != AUTH_VERSION {
            return Err(Socks5Error::UnsupportedAuthVersion(version));
        }

        let ulen = read_u8(reader).await?;
        let mut username = vec![0u8; ulen as usize];
        reader.read_exact(&mut username).await?;

        let plen = read_u8(reader).await?;
        let mut password = vec![0u8; plen as usize];
        reader.read_exact(&mut password).await?;

        Ok(UserPassRequest { username, password })
    }
}

/// Destination address carried in a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DestAddr {
    /// Four raw octets.
    Ipv4(Ipv4Addr),
    /// Length-prefixed name, kept as text.
    Domain(String),
    /// Sixteen raw octets.
    Ipv6(Ipv6Addr),
}

/// Client request.
///
/// ```text
/// +----+-----+-------+------+----------+----------+
/// |VER | CMD |  RSV  | ATYP | DST.ADDR | DST.PORT |
/// +----+-----+-------+------+----------+----------+
/// | 1  |  1  | X'00' |  1   | Variable |    2     |
/// +----+-----+-------+------+----------+----------+
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// The command octet (CONNECT, BIND, UDP ASSOCIATE).
    pub command: u8,
    /// Destination address.
    pub dest: DestAddr,
    /// Destination port.
    pub port: u16,
}

impl Request {
    /// Read a request from the stream. An unknown address type fails
    /// before any bytes past `ATYP` are consumed.
    pub async fn read_from<R>(reader: &mut R) -> Result<Self>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut header = [0u8; 4];
        reader.read_exact(&mut header).await?;

        let version = header[0];
        let command = header[1];
        let addr_type = header[3];

        if version != SOCKS5_VERSION {
            return Err(Socks5Error::UnsupportedVersion(version));
        }

        let dest = match addr_type {
            ADDR_TYPE_IPV4 => {
                let mut octets = [0u8; 4];
                reader.read_exact(&mut octets).await?;
                DestAddr::Ipv4(Ipv4Addr::from(octets))
            }
            ADDR_TYPE_DOMAIN => {
                let len = read_u8(reader).await?;
                let mut name = vec![0u8; len as usize];
                reader.read_exact(&mut name).await?;
                DestAddr::Domain(String::from_utf8_lossy(&name).into_owned())
            }
            ADDR_TYPE_IPV6 => {
                let mut octets = [0u8; 16];
                reader.read_exact(&mut octets).await?;
                DestAddr::Ipv6(Ipv6Addr::from(octets))
            }
            other => return Err(Socks5Error::AddressTypeNotSupported(other)),
        };

        let mut port = [0u8; 2];
        reader.read_exact(&mut port).await?;
        let port = u16::from_be_bytes(port);

        Ok(Request {
            command,
            dest,
            port,
        })
    }

    /// The `host:port` string handed to connect hooks and the dialer.
    /// IPv6 addresses are bracketed so the string stays dialable.
    pub fn dest_string(&self) -> String {
        match &self.dest {
            DestAddr::Ipv4(ip) => SocketAddr::new(IpAddr::V4(*ip), self.port).to_string(),
            DestAddr::Ipv6(ip) => SocketAddr::new(IpAddr::V6(*ip), self.port).to_string(),
            DestAddr::Domain(name) => format!("{}:{}", name, self.port),
        }
    }
}

/// Server reply, kept wire-shaped so serialization can enforce the
/// address-length constraints of each address type.
///
/// ```text
/// +----+-----+-------+------+----------+----------+
/// |VER | REP |  RSV  | ATYP | BND.ADDR | BND.PORT |
/// +----+-----+-------+------+----------+----------+
/// | 1  |  1  | X'00' |  1   | Variable |    2     |
/// +----+-----+-------+------+----------+----------+
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Reply code.
    pub code: u8,
    /// Address type of the bound address.
    pub atyp: u8,
    /// Raw bound address bytes (4, 16, or a domain name).
    pub bind_addr: Vec<u8>,
    /// Bound port.
    pub bind_port: u16,
}

impl Reply {
    /// Success reply carrying the local address of the upstream socket.
    pub fn success(bound: SocketAddr) -> Self {
        match bound {
            SocketAddr::V4(addr) => Reply {
                code: REPLY_SUCCEEDED,
                atyp: ADDR_TYPE_IPV4,
                bind_addr: addr.ip().octets().to_vec(),
                bind_port: addr.port(),
            },
            SocketAddr::V6(addr) => Reply {
                code: REPLY_SUCCEEDED,
                atyp: ADDR_TYPE_IPV6,
                bind_addr: addr.ip().octets().to_vec(),
                bind_port: addr.port(),
            },
        }
    }

    /// Error reply with a zeroed IPv4 bound address.
    pub fn error(code: u8) -> Self {
        Reply {
            code,
            atyp: ADDR_TYPE_IPV4,
            bind_addr: vec![0; 4],
            bind_port: 0,
        }
    }

    /// Serialize and write the reply to the stream.
    pub async fn write_to<W>(&self, writer: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut buf = Vec::with_capacity(22);
        buf.extend_from_slice(&[SOCKS5_VERSION, self.code, RESERVED, self.atyp]);

        match self.atyp {
            ADDR_TYPE_IPV4 => {
                if self.bind_addr.len() < 4 {
                    return Err(Socks5Error::InvalidBoundAddress);
                }
                buf.extend_from_slice(&self.bind_addr[..4]);
            }
            ADDR_TYPE_DOMAIN => {
                if self.bind_addr.len() > MAX_DOMAIN_LEN {
                    return Err(Socks5Error::DomainTooLong(self.bind_addr.len()));
                }
                buf.push(self.bind_addr.len() as u8);
                buf.extend_from_slice(&self.bind_addr);
            }
            ADDR_TYPE_IPV6 => {
                if self.bind_addr.len() < 16 {
                    return Err(Socks5Error::InvalidBoundAddress);
                }
                buf.extend_from_slice(&self.bind_addr[..16]);
            }
            other => return Err(Socks5Error::AddressTypeNotSupported(other)),
        }

        buf.extend_from_slice(&self.bind_port.to_be_bytes());

        writer.write_all(&buf).await?;
        writer.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn request_bytes(command: u8, atyp: u8, addr: &[u8], port: u16) -> Vec<u8> {
        let mut bytes = vec![SOCKS5_VERSION, command, RESERVED, atyp];
        bytes.extend_from_slice(addr);
        bytes.extend_from_slice(&port.to_be_bytes());
        bytes
    }

    #[tokio::test]
    async fn test_read_greeting() {
        let mut cursor = Cursor::new(vec![0x05, 0x02, 0x00, 0x02]);
        let greeting = Greeting::read_from(&mut cursor).await.unwrap();

        assert_eq!(greeting.methods, vec![0x00, 0x02]);
        assert!(greeting.offers(AUTH_METHOD_NONE));
        assert!(greeting.offers(AUTH_METHOD_PASSWORD));
        assert!(!greeting.offers(0x01));
    }

    #[tokio::test]
    async fn test_read_greeting_bad_version() {
        let mut cursor = Cursor::new(vec![0x04, 0x01, 0x00]);
        let err = Greeting::read_from(&mut cursor).await.unwrap_err();
        assert!(matches!(err, Socks5Error::UnsupportedVersion(0x04)));
    }

    #[tokio::test]
    async fn test_read_greeting_short() {
        let mut cursor = Cursor::new(vec![0x05, 0x03, 0x00]);
        let err = Greeting::read_from(&mut cursor).await.unwrap_err();
        assert!(matches!(err, Socks5Error::Io(_)));
    }

    #[tokio::test]
    async fn test_read_userpass() {
        let mut bytes = vec![AUTH_VERSION, 5];
        bytes.extend_from_slice(b"alice");
        bytes.push(3);
        bytes.extend_from_slice(b"xxx");

        let mut cursor = Cursor::new(bytes);
        let frame = UserPassRequest::read_from(&mut cursor).await.unwrap();

        assert_eq!(frame.username, b"alice");
        assert_eq!(frame.password, b"xxx");
    }

    #[tokio::test]
    async fn test_read_userpass_bad_version() {
        let mut cursor = Cursor::new(vec![0x05, 1, b'a', 1, b'b']);
        let err = UserPassRequest::read_from(&mut cursor).await.unwrap_err();
        assert!(matches!(err, Socks5Error::UnsupportedAuthVersion(0x05)));
    }

    #[tokio::test]
    async fn test_read_request_ipv4() {
        let bytes = request_bytes(CMD_CONNECT, ADDR_TYPE_IPV4, &[127, 0, 0, 1], 80);
        let mut cursor = Cursor::new(bytes);
        let request = Request::read_from(&mut cursor).await.unwrap();

        assert_eq!(request.command, CMD_CONNECT);
        assert_eq!(request.dest, DestAddr::Ipv4(Ipv4Addr::new(127, 0, 0, 1)));
        assert_eq!(request.port, 80);
        assert_eq!(request.dest_string(), "127.0.0.1:80");
    }

    #[tokio::test]
    async fn test_read_request_domain() {
        let mut addr = vec![11u8];
        addr.extend_from_slice(b"example.com");
        let bytes = request_bytes(CMD_CONNECT, ADDR_TYPE_DOMAIN, &addr, 443);
        let mut cursor = Cursor::new(bytes);
        let request = Request::read_from(&mut cursor).await.unwrap();

        assert_eq!(request.dest, DestAddr::Domain("example.com".to_string()));
        assert_eq!(request.dest_string(), "example.com:443");
    }

    #[tokio::test]
    async fn test_read_request_ipv6() {
        let mut octets = [0u8; 16];
        octets[15] = 1;
        let bytes = request_bytes(CMD_CONNECT, ADDR_TYPE_IPV6, &octets, 8080);
        let mut cursor = Cursor::new(bytes);
        let request = Request::read_from(&mut cursor).await.unwrap();

        assert_eq!(request.dest, DestAddr::Ipv6(Ipv6Addr::LOCALHOST));
        assert_eq!(request.dest_string(), "[::1]:8080");
    }

    #[tokio::test]
    async fn test_read_request_unknown_atyp() {
        let bytes = request_bytes(CMD_CONNECT, 0x05, &[0, 0, 0, 0], 80);
        let mut cursor = Cursor::new(bytes);
        let err = Request::read_from(&mut cursor).await.unwrap_err();

        assert!(matches!(err, Socks5Error::AddressTypeNotSupported(0x05)));
        // Nothing past ATYP may have been consumed.
        assert_eq!(cursor.position(), 4);
    }

    #[tokio::test]
    async fn test_read_request_bad_version() {
        let mut bytes = request_bytes(CMD_CONNECT, ADDR_TYPE_IPV4, &[127, 0, 0, 1], 80);
        bytes[0] = 0x04;
        let mut cursor = Cursor::new(bytes);
        let err = Request::read_from(&mut cursor).await.unwrap_err();
        assert!(matches!(err, Socks5Error::UnsupportedVersion(0x04)));
    }

    #[tokio::test]
    async fn test_write_reply_success_ipv4() {
        let bound: SocketAddr = "127.0.0.1:54321".parse().unwrap();
        let mut buffer = Vec::new();
        Reply::success(bound).write_to(&mut buffer).await.unwrap();

        assert_eq!(
            buffer,
            vec![0x05, 0x00, 0x00, 0x01, 0x7F, 0x00, 0x00, 0x01, 0xD4, 0x31]
        );
    }

    #[tokio::test]
    async fn test_write_reply_success_ipv6() {
        let bound: SocketAddr = "[::1]:443".parse().unwrap();
        let mut buffer = Vec::new();
        Reply::success(bound).write_to(&mut buffer).await.unwrap();

        assert_eq!(buffer.len(), 4 + 16 + 2);
        assert_eq!(&buffer[..4], &[0x05, 0x00, 0x00, 0x04]);
        assert_eq!(&buffer[20..], &443u16.to_be_bytes());
    }

    #[tokio::test]
    async fn test_write_reply_error() {
        let mut buffer = Vec::new();
        Reply::error(REPLY_COMMAND_NOT_SUPPORTED)
            .write_to(&mut buffer)
            .await
            .unwrap();

        assert_eq!(
            buffer,
            vec![0x05, 0x07, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]
        );
    }

    #[tokio::test]
    async fn test_write_reply_domain() {
        let reply = Reply {
            code: REPLY_SUCCEEDED,
            atyp: ADDR_TYPE_DOMAIN,
            bind_addr: b"proxy.internal".to_vec(),
            bind_port: 1080,
        };
        let mut buffer = Vec::new();
        reply.write_to(&mut buffer).await.unwrap();

        assert_eq!(buffer[3], ADDR_TYPE_DOMAIN);
        assert_eq!(buffer[4], 14);
        assert_eq!(&buffer[5..19], b"proxy.internal");
        assert_eq!(&buffer[19..], &1080u16.to_be_bytes());
    }

    #[tokio::test]
    async fn test_write_reply_domain_too_long() {
        let reply = Reply {
            code: REPLY_SUCCEEDED,
            atyp: ADDR_TYPE_DOMAIN,
            bind_addr: vec![b'a'; 256],
            bind_port: 80,
        };
        let mut buffer = Vec::new();
        let err = reply.write_to(&mut buffer).await.unwrap_err();
        assert!(matches!(err, Socks5Error::DomainTooLong(256)));
    }

    #[tokio::test]
    async fn test_write_reply_short_bound_address() {
        let reply = Reply {
            code: REPLY_SUCCEEDED,
            atyp: ADDR_TYPE_IPV6,
            bind_addr: vec![0; 4],
            bind_port: 80,
        };
        let mut buffer = Vec::new();
        let err = reply.write_to(&mut buffer).await.unwrap_err();
        assert!(matches!(err, Socks5Error::InvalidBoundAddress));
        assert!(buffer.is_empty());
    }
}
